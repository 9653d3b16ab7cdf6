//! # Rigger Engine
//!
//! The engine turns a bootstrap plan into an executable pipeline and
//! drives it against a freshly provisioned host: wait for the host to
//! accept connections, run environment/install commands, render and
//! deliver configuration artifacts (skipping transfers whose content has
//! not changed since the last run), and finish with an integration
//! command once everything else completed.
//!
//! ## Key pieces
//!
//! - **`orchestrator`**: the pipeline state machine (dependency
//!   ordering, fail-fast cascading, transfer-ledger consultation)
//! - **`render`**: `${{ name }}` template rendering plus the deferred
//!   value resolution barrier
//! - **`executor`**: the remote channel abstraction, with OpenSSH and
//!   dry-run implementations
//! - **`readiness`**: the polling gate for hosts that are still booting
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rigger_engine::{load_plan_file, Pipeline, RunOptions};
//! use rigger_engine::executor::DryRun;
//! use rigger_util::ledger::MemoryLedger;
//!
//! # async fn demo() -> Result<(), rigger_engine::BootstrapError> {
//! let plan = load_plan_file("plans/jump-host.yaml")?;
//! let (pipeline, _deferred) = Pipeline::from_plan(&plan, "plans".as_ref())?;
//!
//! let executor = DryRun::new();
//! let ledger = MemoryLedger::new();
//! let report = rigger_engine::run_pipeline(&pipeline, &executor, &ledger, &RunOptions::default()).await;
//! println!("{}: success = {}", report.host, report.is_success());
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use rigger_types::PlanDefinition;

pub mod command;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod readiness;
pub mod render;

pub use command::CommandLine;
pub use error::BootstrapError;
pub use executor::{DryRun, ExecOutput, OpenSsh, RemoteExecutor};
pub use orchestrator::{
    run_fleet, run_pipeline, DeferredBindings, HostRun, Pipeline, RunOptions, RunOutcome, RunReport, StepReport,
    StepStatus, READY_STEP_ID,
};
pub use readiness::{await_ready, ReadinessProbe};
pub use render::{
    preview_bindings, render_template, render_template_redacted, resolve_bindings, Binding, Bindings, Deferred,
    DeferredResolver, ResolvedBindings,
};

/// Load a plan document from the filesystem.
///
/// YAML and JSON both parse; the format is detected by the parser, not
/// the file extension. Validation happens later, in
/// [`Pipeline::from_plan`].
pub fn load_plan_file(path: impl AsRef<Path>) -> Result<PlanDefinition, BootstrapError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|error| BootstrapError::Plan(format!("cannot read plan file '{}': {error}", path.display())))?;
    serde_yaml::from_str(&content)
        .map_err(|error| BootstrapError::Plan(format!("cannot parse plan file '{}': {error}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_plan_file_parses_yaml() {
        let directory = tempfile::tempdir().expect("tempdir");
        let plan_path = directory.path().join("plan.yaml");
        std::fs::write(
            &plan_path,
            r#"
plan: smoke
host:
  name: host-a
  address: 10.0.0.5
  user: ubuntu
commands:
  - id: install
    run: "true"
"#,
        )
        .expect("write plan");

        let plan = load_plan_file(&plan_path).expect("load");
        assert_eq!(plan.plan, "smoke");
        assert_eq!(plan.commands.len(), 1);
    }

    #[test]
    fn unreadable_plan_is_a_plan_error() {
        let error = load_plan_file("/definitely/missing/plan.yaml").expect_err("should fail");
        assert!(matches!(error, BootstrapError::Plan(_)));
    }
}
