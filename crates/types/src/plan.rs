//! Bootstrap plan schema definitions.
//!
//! A plan is authored as YAML (or JSON) and parsed into these models before
//! the engine turns it into an executable pipeline. The document covers four
//! concerns: the target host and its readiness policy, plain command steps
//! (environment setup, installing the task runner), artifacts to render and
//! deliver, and the final integration command.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub mod validation;

/// Identifier reserved for the integration step when the plan does not name one.
pub const DEFAULT_INTEGRATE_ID: &str = "integrate";

/// Complete bootstrap plan for a single target host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDefinition {
    /// Canonical plan identifier (for example, `jump-host-ad`).
    #[serde(default)]
    pub plan: String,
    /// Optional descriptive copy surfaced by `rigger check`.
    #[serde(default)]
    pub description: Option<String>,
    /// Connection and readiness settings for the target host.
    pub host: HostDefinition,
    /// Plain command steps executed over the remote channel.
    #[serde(default)]
    pub commands: Vec<CommandStepDefinition>,
    /// Configuration artifacts rendered from templates and delivered to the host.
    #[serde(default)]
    pub artifacts: Vec<ArtifactDefinition>,
    /// Final command executed once every other step has completed.
    #[serde(default)]
    pub integrate: Option<IntegrateDefinition>,
}

/// Connection descriptor and readiness policy for one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDefinition {
    /// Stable host identifier used to key transfer-ledger entries.
    pub name: String,
    /// Address the remote channel connects to (IP or DNS name).
    pub address: String,
    /// Login identity on the host.
    pub user: String,
    /// Remote port for the channel.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path to the private key material, when not supplied by the agent.
    #[serde(default)]
    pub identity_file: Option<String>,
    /// Readiness-gate policy applied before any step runs.
    #[serde(default)]
    pub ready: ReadinessDefinition,
}

/// Readiness-gate policy for a freshly created host.
///
/// Durations are authored as `30s` / `2m` strings (bare numbers mean
/// seconds), matching the repeat/poll syntax used elsewhere in the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessDefinition {
    /// Optional fixed settle delay applied before the first probe.
    #[serde(default)]
    pub settle: Option<String>,
    /// Interval between probe attempts.
    #[serde(default = "default_ready_interval")]
    pub interval: String,
    /// Overall deadline after which the gate reports a timeout.
    #[serde(default = "default_ready_timeout")]
    pub timeout: String,
    /// Probe command executed on the host; success means reachable.
    #[serde(default = "default_ready_probe")]
    pub probe: String,
}

impl Default for ReadinessDefinition {
    fn default() -> Self {
        Self {
            settle: None,
            interval: default_ready_interval(),
            timeout: default_ready_timeout(),
            probe: default_ready_probe(),
        }
    }
}

/// A plain command step, such as writing an environment file or installing
/// the task runner.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CommandStepDefinition {
    /// Unique step identifier referenced by `depends_on` edges.
    pub id: String,
    /// Optional descriptive copy surfaced in reports.
    #[serde(default)]
    pub description: Option<String>,
    /// Shell text executed verbatim on the host. Mutually exclusive with `argv`.
    #[serde(default)]
    pub run: Option<String>,
    /// Structured command where every element is quoted as a single argument.
    /// Mutually exclusive with `run`.
    #[serde(default)]
    pub argv: Vec<String>,
    /// Step identifiers that must complete before this step starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A configuration artifact: template in, rendered file out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDefinition {
    /// Unique artifact identifier; also keys transfer-ledger entries.
    pub id: String,
    /// Template path, resolved relative to the plan document.
    pub template: String,
    /// Destination path on the host. Must be unique within the plan.
    pub destination: String,
    /// Step identifiers that must complete before this transfer starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Placeholder bindings in authoring order.
    #[serde(default)]
    pub bindings: IndexMap<String, BindingDefinition>,
}

/// Value supplied for a template placeholder.
///
/// Literal strings are the shorthand; the detailed form sources the value
/// from the environment, marks it secret, or declares it deferred (resolved
/// by the embedding program after some external resource finishes
/// provisioning).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum BindingDefinition {
    /// Literal value written into the rendered artifact.
    Literal(String),
    /// Structured binding with an explicit source.
    Detailed(DetailedBinding),
}

/// Structured binding source declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DetailedBinding {
    /// Literal value, when the detailed form is only used to set `secret`.
    #[serde(default)]
    pub value: Option<String>,
    /// Environment variable read when the pipeline is constructed.
    #[serde(default)]
    pub env: Option<String>,
    /// The value arrives programmatically before the run; rendering blocks
    /// on it at the resolution barrier.
    #[serde(default)]
    pub deferred: bool,
    /// Never log or print this value; reports and previews redact it.
    #[serde(default)]
    pub secret: bool,
}

/// The final integration command.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IntegrateDefinition {
    /// Step identifier; defaults to `integrate`.
    #[serde(default = "default_integrate_id")]
    pub id: String,
    /// Optional descriptive copy surfaced in reports.
    #[serde(default)]
    pub description: Option<String>,
    /// Shell text executed verbatim on the host. Mutually exclusive with `argv`.
    #[serde(default)]
    pub run: Option<String>,
    /// Structured command where every element is quoted as a single argument.
    #[serde(default)]
    pub argv: Vec<String>,
}

impl PlanDefinition {
    /// All step identifiers declared by the plan, in authoring order.
    pub fn step_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for command in &self.commands {
            ids.push(command.id.as_str());
        }
        for artifact in &self.artifacts {
            ids.push(artifact.id.as_str());
        }
        if let Some(integrate) = &self.integrate {
            ids.push(integrate.id.as_str());
        }
        ids
    }
}

impl BindingDefinition {
    /// Returns true when the value must never be logged or printed.
    pub fn is_secret(&self) -> bool {
        match self {
            BindingDefinition::Literal(_) => false,
            BindingDefinition::Detailed(detailed) => detailed.secret,
        }
    }

    /// Returns true when the value is supplied programmatically before the run.
    pub fn is_deferred(&self) -> bool {
        match self {
            BindingDefinition::Literal(_) => false,
            BindingDefinition::Detailed(detailed) => detailed.deferred,
        }
    }
}

fn default_port() -> u16 {
    22
}

fn default_ready_interval() -> String {
    "5s".to_string()
}

fn default_ready_timeout() -> String {
    "5m".to_string()
}

fn default_ready_probe() -> String {
    "true".to_string()
}

fn default_integrate_id() -> String {
    DEFAULT_INTEGRATE_ID.to_string()
}
