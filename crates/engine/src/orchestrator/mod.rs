//! The bootstrap orchestrator.
//!
//! Turns a plan document into a directed acyclic pipeline of steps and
//! executes it against one host: wait for the host to accept connections,
//! run the command steps, render/fingerprint/deliver each artifact, and
//! finish with the integration command once everything else completed.
//!
//! Failure policy is fail-fast with per-step cascading: a failed step
//! marks every transitive successor failed without executing it, while
//! steps with no dependency path to the failure still run. The first
//! failure becomes the run's terminal error.
//!
//! Within one host the steps execute sequentially in dependency order,
//! since a single freshly booted machine gains nothing from parallel SSH
//! sessions. Parallelism lives at the fleet level: [`run_fleet`] drives
//! one independent pipeline per host under a bounded concurrency limit.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use rigger_types::{plan::validation::validate_plan, ArtifactDefinition, BindingDefinition, HostDefinition, PlanDefinition};
use rigger_util::fingerprint::Fingerprint;
use rigger_util::ledger::{TransferKey, TransferLedger};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::command::CommandLine;
use crate::error::BootstrapError;
use crate::executor::RemoteExecutor;
use crate::readiness::{await_ready, ReadinessProbe};
use crate::render::{render_template, resolve_bindings, Binding, Bindings, Deferred, DeferredResolver};

pub mod report;
pub use report::{RunOutcome, RunReport, StepReport, StepStatus};

/// Reserved identifier for the implicit readiness step every pipeline
/// starts with.
pub const READY_STEP_ID: &str = "await-ready";

/// Caller-configurable knobs for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Deadline for each individual remote operation.
    pub op_timeout: Duration,
    /// Deadline for the binding resolution barrier of each artifact.
    pub binding_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_secs(120),
            binding_timeout: Duration::from_secs(300),
        }
    }
}

/// One unit of pipeline work with explicit predecessors.
#[derive(Debug, Clone)]
struct Step {
    id: String,
    action: StepAction,
    depends_on: Vec<String>,
}

#[derive(Debug, Clone)]
enum StepAction {
    /// Block until the host accepts the readiness probe.
    AwaitReady,
    /// Execute a command over the remote channel.
    Command(CommandLine),
    /// Render, fingerprint, and (when changed) deliver an artifact.
    Transfer(TransferSpec),
}

/// Everything needed to deliver one artifact.
#[derive(Debug, Clone)]
struct TransferSpec {
    artifact_id: String,
    template_name: String,
    template_path: PathBuf,
    destination: String,
    bindings: Bindings,
}

/// An executable, cycle-checked pipeline for one host.
///
/// Built once per run from a plan document. Steps are stored in
/// execution (topological) order; deferred bindings declared by the plan
/// are resolved through the [`DeferredBindings`] handle returned
/// alongside the pipeline.
#[derive(Debug)]
pub struct Pipeline {
    host: HostDefinition,
    readiness: ReadinessProbe,
    steps: Vec<Step>,
}

/// Producer handles for the plan's deferred bindings.
///
/// The embedding program resolves each entry once the external resource
/// it depends on (a directory service, a generated secret) has finished
/// provisioning. Dropping the handle with entries still pending makes
/// the affected transfer steps fail with `ResourceNotReady`.
#[derive(Debug, Default)]
pub struct DeferredBindings {
    pending: Vec<PendingValue>,
}

#[derive(Debug)]
struct PendingValue {
    artifact_id: String,
    name: String,
    resolver: DeferredResolver,
}

impl DeferredBindings {
    /// Whether every declared deferred binding has been resolved.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// `(artifact, binding)` pairs still awaiting a value.
    pub fn pending(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pending
            .iter()
            .map(|value| (value.artifact_id.as_str(), value.name.as_str()))
    }

    /// Supply the value for one deferred binding.
    pub fn resolve(&mut self, artifact_id: &str, name: &str, value: impl Into<String>) -> Result<(), BootstrapError> {
        let position = self
            .pending
            .iter()
            .position(|pending| pending.artifact_id == artifact_id && pending.name == name)
            .ok_or_else(|| {
                BootstrapError::Plan(format!("no pending deferred binding '{name}' on artifact '{artifact_id}'"))
            })?;
        let pending = self.pending.swap_remove(position);
        pending.resolver.resolve(value);
        Ok(())
    }
}

impl Pipeline {
    /// Build a pipeline from a validated plan. Template paths resolve
    /// relative to `plan_dir`; environment-sourced bindings are read here,
    /// and deferred bindings get resolver handles in the returned
    /// [`DeferredBindings`].
    pub fn from_plan(plan: &PlanDefinition, plan_dir: &Path) -> Result<(Self, DeferredBindings), BootstrapError> {
        let issues = validate_plan(plan);
        if !issues.is_empty() {
            let summary: Vec<String> = issues.iter().map(ToString::to_string).collect();
            return Err(BootstrapError::Plan(summary.join("; ")));
        }
        if plan.step_ids().contains(&READY_STEP_ID) {
            return Err(BootstrapError::Plan(format!("step identifier '{READY_STEP_ID}' is reserved")));
        }

        let readiness = ReadinessProbe::from_definition(&plan.host.ready)?;
        let mut deferred = DeferredBindings::default();
        let mut steps = vec![Step {
            id: READY_STEP_ID.to_string(),
            action: StepAction::AwaitReady,
            depends_on: Vec::new(),
        }];

        for command in &plan.commands {
            steps.push(Step {
                id: command.id.clone(),
                action: StepAction::Command(command_from_parts(command.run.as_deref(), &command.argv)),
                depends_on: with_ready(&command.depends_on),
            });
        }

        for artifact in &plan.artifacts {
            let bindings = bindings_from_definition(artifact, &mut deferred)?;
            steps.push(Step {
                id: artifact.id.clone(),
                action: StepAction::Transfer(TransferSpec {
                    artifact_id: artifact.id.clone(),
                    template_name: artifact.template.clone(),
                    template_path: plan_dir.join(&artifact.template),
                    destination: artifact.destination.clone(),
                    bindings,
                }),
                depends_on: with_ready(&artifact.depends_on),
            });
        }

        if let Some(integrate) = &plan.integrate {
            // The integration step waits on every other step in the plan.
            let predecessors: Vec<String> = steps.iter().map(|step| step.id.clone()).collect();
            steps.push(Step {
                id: integrate.id.clone(),
                action: StepAction::Command(command_from_parts(integrate.run.as_deref(), &integrate.argv)),
                depends_on: predecessors,
            });
        }

        let steps = order_steps(steps)?;
        Ok((
            Self {
                host: plan.host.clone(),
                readiness,
                steps,
            },
            deferred,
        ))
    }

    /// The host this pipeline targets.
    pub fn host(&self) -> &HostDefinition {
        &self.host
    }

    /// Step identifiers in execution order.
    pub fn step_order(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.id.as_str()).collect()
    }

    /// Replace or insert a binding on an artifact, for callers that attach
    /// values programmatically instead of through the plan document.
    pub fn bind(&mut self, artifact_id: &str, name: &str, binding: Binding) -> Result<(), BootstrapError> {
        let spec = self
            .steps
            .iter_mut()
            .find_map(|step| match &mut step.action {
                StepAction::Transfer(spec) if spec.artifact_id == artifact_id => Some(spec),
                _ => None,
            })
            .ok_or_else(|| BootstrapError::Plan(format!("unknown artifact '{artifact_id}'")))?;
        spec.bindings.insert(name.to_string(), binding);
        Ok(())
    }

    /// Deferred bindings that have not received a value yet.
    pub fn pending_bindings(&self) -> Vec<(String, String)> {
        let mut pending = Vec::new();
        for step in &self.steps {
            let StepAction::Transfer(spec) = &step.action else {
                continue;
            };
            for (name, binding) in &spec.bindings {
                if let Binding::Deferred(value) = binding
                    && value.current().is_none()
                {
                    pending.push((spec.artifact_id.clone(), name.clone()));
                }
            }
        }
        pending
    }

    /// Iterate artifacts with their bindings, for previews.
    pub fn artifacts(&self) -> impl Iterator<Item = (&str, &Path, &str, &Bindings)> {
        self.steps.iter().filter_map(|step| match &step.action {
            StepAction::Transfer(spec) => Some((
                spec.artifact_id.as_str(),
                spec.template_path.as_path(),
                spec.destination.as_str(),
                &spec.bindings,
            )),
            _ => None,
        })
    }
}

fn with_ready(declared: &[String]) -> Vec<String> {
    let mut depends_on = vec![READY_STEP_ID.to_string()];
    depends_on.extend(declared.iter().cloned());
    depends_on
}

fn command_from_parts(run: Option<&str>, argv: &[String]) -> CommandLine {
    match run {
        Some(text) if !text.trim().is_empty() => CommandLine::script(text),
        _ => CommandLine::argv(argv[0].clone(), argv[1..].iter().cloned()),
    }
}

fn bindings_from_definition(
    artifact: &ArtifactDefinition,
    deferred: &mut DeferredBindings,
) -> Result<Bindings, BootstrapError> {
    let mut bindings = Bindings::new();
    for (name, definition) in &artifact.bindings {
        let binding = match definition {
            BindingDefinition::Literal(text) => Binding::value(text.clone()),
            BindingDefinition::Detailed(detailed) if detailed.deferred => {
                let (resolver, handle) = if detailed.secret {
                    Deferred::pending_secret(name.clone())
                } else {
                    Deferred::pending(name.clone())
                };
                deferred.pending.push(PendingValue {
                    artifact_id: artifact.id.clone(),
                    name: name.clone(),
                    resolver,
                });
                Binding::Deferred(handle)
            }
            BindingDefinition::Detailed(detailed) => {
                let text = match (&detailed.value, &detailed.env) {
                    (Some(text), _) => text.clone(),
                    (None, Some(variable)) => std::env::var(variable).map_err(|_| {
                        BootstrapError::Plan(format!(
                            "artifacts.{}.bindings.{name}: environment variable '{variable}' is not set",
                            artifact.id
                        ))
                    })?,
                    (None, None) => unreachable!("validated: detailed binding has exactly one source"),
                };
                if detailed.secret {
                    Binding::secret(text)
                } else {
                    Binding::value(text)
                }
            }
        };
        bindings.insert(name.clone(), binding);
    }
    Ok(bindings)
}

fn order_steps(steps: Vec<Step>) -> Result<Vec<Step>, BootstrapError> {
    let mut lookup: IndexMap<String, Step> = steps.into_iter().map(|step| (step.id.clone(), step)).collect();

    let mut in_degrees: IndexMap<String, usize> = lookup.keys().map(|id| (id.clone(), 0)).collect();
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for (step_id, step) in &lookup {
        let mut seen = HashSet::new();
        for dependency in &step.depends_on {
            if !lookup.contains_key(dependency) {
                return Err(BootstrapError::Plan(format!(
                    "step '{step_id}' depends on unknown step '{dependency}'"
                )));
            }
            if !seen.insert(dependency) {
                continue;
            }
            *in_degrees.get_mut(step_id).expect("in-degree entry exists") += 1;
            adjacency.entry(dependency.clone()).or_default().push(step_id.clone());
        }
    }

    let mut queue: VecDeque<String> = in_degrees
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| id.clone())
        .collect();

    let mut ordered_ids = Vec::with_capacity(lookup.len());
    while let Some(step_id) = queue.pop_front() {
        ordered_ids.push(step_id.clone());
        if let Some(children) = adjacency.get(&step_id) {
            for child in children {
                let degree = in_degrees.get_mut(child).expect("dependent step exists in degrees");
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(child.clone());
                }
            }
        }
    }

    if ordered_ids.len() != lookup.len() {
        let mut remaining: Vec<String> = in_degrees
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(id, _)| id)
            .collect();
        remaining.sort();
        return Err(BootstrapError::Plan(format!(
            "cycle detected in pipeline steps involving: {}",
            remaining.join(", ")
        )));
    }

    Ok(ordered_ids
        .into_iter()
        .map(|id| lookup.shift_remove(&id).expect("ordered id exists"))
        .collect())
}

/// Execute the pipeline against its host.
///
/// Never returns an error: every failure is captured in the report, with
/// the first one as the terminal outcome. The ledger is consulted before
/// and updated after each artifact transfer.
pub async fn run_pipeline(
    pipeline: &Pipeline,
    executor: &dyn RemoteExecutor,
    ledger: &dyn TransferLedger,
    options: &RunOptions,
) -> RunReport {
    info!(host = %pipeline.host.name, steps = pipeline.steps.len(), "starting bootstrap run");

    let mut statuses: IndexMap<String, StepStatus> = IndexMap::new();
    let mut reports: Vec<StepReport> = Vec::with_capacity(pipeline.steps.len());
    let mut first_failure: Option<(String, BootstrapError)> = None;

    for step in &pipeline.steps {
        // Fail-fast cascade: a failed predecessor poisons the step before
        // it ever starts. Skipped predecessors satisfy the edge.
        if let Some(blocked_by) = step
            .depends_on
            .iter()
            .find(|dependency| statuses.get(dependency.as_str()) == Some(&StepStatus::Failed))
        {
            warn!(step = %step.id, predecessor = %blocked_by, "step cancelled: predecessor failed");
            statuses.insert(step.id.clone(), StepStatus::Failed);
            reports.push(StepReport {
                id: step.id.clone(),
                status: StepStatus::Failed,
                detail: Some(format!("not started: predecessor '{blocked_by}' failed")),
                bytes_sent: 0,
                duration: Duration::ZERO,
            });
            continue;
        }

        statuses.insert(step.id.clone(), StepStatus::Running);
        debug!(step = %step.id, "step running");
        let started = Instant::now();

        match execute_step(pipeline, step, executor, ledger, options).await {
            Ok(StepOutcome::Completed { bytes_sent }) => {
                let duration = started.elapsed();
                debug!(step = %step.id, ?duration, "step succeeded");
                statuses.insert(step.id.clone(), StepStatus::Succeeded);
                reports.push(StepReport {
                    id: step.id.clone(),
                    status: StepStatus::Succeeded,
                    detail: None,
                    bytes_sent,
                    duration,
                });
            }
            Ok(StepOutcome::Unchanged) => {
                let duration = started.elapsed();
                debug!(step = %step.id, "step skipped: content unchanged");
                statuses.insert(step.id.clone(), StepStatus::Skipped);
                reports.push(StepReport {
                    id: step.id.clone(),
                    status: StepStatus::Skipped,
                    detail: Some("content unchanged; transfer skipped".to_string()),
                    bytes_sent: 0,
                    duration,
                });
            }
            Err(failure) => {
                let duration = started.elapsed();
                error!(step = %step.id, error = %failure, "step failed");
                statuses.insert(step.id.clone(), StepStatus::Failed);
                reports.push(StepReport {
                    id: step.id.clone(),
                    status: StepStatus::Failed,
                    detail: Some(failure.to_string()),
                    bytes_sent: 0,
                    duration,
                });
                if first_failure.is_none() {
                    first_failure = Some((step.id.clone(), failure));
                }
            }
        }
    }

    let outcome = match first_failure {
        None => {
            info!(host = %pipeline.host.name, "bootstrap run succeeded");
            RunOutcome::Succeeded
        }
        Some((step, failure)) => {
            error!(host = %pipeline.host.name, step = %step, error = %failure, "bootstrap run failed");
            RunOutcome::Failed { step, error: failure }
        }
    };

    RunReport {
        host: pipeline.host.name.clone(),
        steps: reports,
        outcome,
    }
}

enum StepOutcome {
    Completed { bytes_sent: u64 },
    Unchanged,
}

async fn execute_step(
    pipeline: &Pipeline,
    step: &Step,
    executor: &dyn RemoteExecutor,
    ledger: &dyn TransferLedger,
    options: &RunOptions,
) -> Result<StepOutcome, BootstrapError> {
    match &step.action {
        StepAction::AwaitReady => {
            await_ready(executor, &pipeline.readiness, options.op_timeout).await?;
            Ok(StepOutcome::Completed { bytes_sent: 0 })
        }
        StepAction::Command(command) => {
            match timeout(options.op_timeout, executor.run(command)).await {
                Ok(Ok(_output)) => Ok(StepOutcome::Completed { bytes_sent: 0 }),
                Ok(Err(failure)) => Err(failure),
                Err(_elapsed) => Err(BootstrapError::Connection {
                    reason: format!("command '{}' timed out after {:?}", command.describe(), options.op_timeout),
                }),
            }
        }
        StepAction::Transfer(spec) => transfer_artifact(pipeline, spec, executor, ledger, options).await,
    }
}

async fn transfer_artifact(
    pipeline: &Pipeline,
    spec: &TransferSpec,
    executor: &dyn RemoteExecutor,
    ledger: &dyn TransferLedger,
    options: &RunOptions,
) -> Result<StepOutcome, BootstrapError> {
    let resolved = resolve_bindings(&spec.bindings, options.binding_timeout).await?;

    let source = tokio::fs::read_to_string(&spec.template_path)
        .await
        .map_err(|error| BootstrapError::Template {
            template: spec.template_name.clone(),
            reason: format!("cannot read template: {error}"),
        })?;
    let rendered = render_template(&spec.template_name, &source, &resolved)?;
    let fingerprint = Fingerprint::of_bytes(rendered.as_bytes());

    let key = TransferKey::new(pipeline.host.name.as_str(), spec.artifact_id.as_str());
    let previous = ledger.last_delivered(&key).map_err(|error| BootstrapError::Transfer {
        destination: spec.destination.clone(),
        reason: format!("ledger read failed: {error}"),
    })?;
    if previous.is_some_and(|record| record.fingerprint == fingerprint) {
        return Ok(StepOutcome::Unchanged);
    }

    match timeout(options.op_timeout, executor.upload(rendered.as_bytes(), &spec.destination)).await {
        Ok(Ok(())) => {}
        Ok(Err(failure)) => return Err(failure),
        Err(_elapsed) => {
            return Err(BootstrapError::Transfer {
                destination: spec.destination.clone(),
                reason: format!("timed out after {:?}", options.op_timeout),
            });
        }
    }

    // Recorded only after the upload succeeded, so a crash mid-transfer
    // leaves the previous record in place and the next run retries.
    ledger.record_delivery(key, fingerprint).map_err(|error| BootstrapError::Transfer {
        destination: spec.destination.clone(),
        reason: format!("ledger write failed: {error}"),
    })?;

    Ok(StepOutcome::Completed {
        bytes_sent: rendered.len() as u64,
    })
}

/// One host's pipeline plus the channel that reaches it.
pub struct HostRun {
    /// The pipeline to execute.
    pub pipeline: Pipeline,
    /// Channel to the pipeline's host.
    pub executor: Arc<dyn RemoteExecutor>,
}

/// Bootstrap many hosts concurrently, one independent pipeline per host,
/// at most `max_concurrency` in flight. Reports come back in input order.
pub async fn run_fleet(
    runs: Vec<HostRun>,
    ledger: Arc<dyn TransferLedger>,
    options: RunOptions,
    max_concurrency: usize,
) -> Vec<RunReport> {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let total = runs.len();
    let mut tasks = JoinSet::new();

    for (index, host_run) in runs.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let ledger = Arc::clone(&ledger);
        let options = options.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore stays open");
            let report = run_pipeline(&host_run.pipeline, host_run.executor.as_ref(), ledger.as_ref(), &options).await;
            (index, report)
        });
    }

    let mut slots: Vec<Option<RunReport>> = std::iter::repeat_with(|| None).take(total).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, report)) => slots[index] = Some(report),
            Err(join_error) => error!(error = %join_error, "bootstrap task aborted"),
        }
    }
    slots.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{DryRun, DryRunEvent, ExecOutput};
    use async_trait::async_trait;
    use rigger_types::{CommandStepDefinition, DetailedBinding, IntegrateDefinition, ReadinessDefinition};
    use rigger_util::ledger::MemoryLedger;
    use std::fs;
    use std::sync::Mutex;

    fn write_templates(dir: &Path) {
        fs::write(
            dir.join("resolv.conf"),
            "search ${{ domain_name }}\nnameserver ${{ dns1 }}\n",
        )
        .expect("write resolv template");
        fs::write(
            dir.join("justfile"),
            "integrate-ad:\n\tsudo pam-auth-update --enable mkhomedir\n",
        )
        .expect("write justfile template");
    }

    fn host(name: &str) -> HostDefinition {
        HostDefinition {
            name: name.into(),
            address: "10.0.4.21".into(),
            user: "ubuntu".into(),
            port: 22,
            identity_file: None,
            ready: ReadinessDefinition::default(),
        }
    }

    fn resolv_bindings(dns1: &str) -> IndexMap<String, BindingDefinition> {
        let mut bindings = IndexMap::new();
        bindings.insert("domain_name".to_string(), BindingDefinition::Literal("corp.example.com".into()));
        bindings.insert("dns1".to_string(), BindingDefinition::Literal(dns1.into()));
        bindings
    }

    fn sample_plan() -> PlanDefinition {
        PlanDefinition {
            plan: "jump-host".into(),
            description: None,
            host: host("jump-host"),
            commands: vec![
                CommandStepDefinition {
                    id: "set-env".into(),
                    run: Some("echo \"export AD_DOMAIN=corp.example.com\" >> .env".into()),
                    ..Default::default()
                },
                CommandStepDefinition {
                    id: "install-runner".into(),
                    run: Some("curl -sSf https://just.systems/install.sh | bash -s -- --to ~/bin".into()),
                    ..Default::default()
                },
            ],
            artifacts: vec![
                ArtifactDefinition {
                    id: "justfile".into(),
                    template: "justfile".into(),
                    destination: "~/justfile".into(),
                    depends_on: vec![],
                    bindings: IndexMap::new(),
                },
                ArtifactDefinition {
                    id: "resolv".into(),
                    template: "resolv.conf".into(),
                    destination: "~/resolv.conf".into(),
                    depends_on: vec![],
                    bindings: resolv_bindings("10.0.0.2"),
                },
            ],
            integrate: Some(IntegrateDefinition {
                id: "integrate".into(),
                description: None,
                run: Some("export PATH=\"$PATH:$HOME/bin\"; just integrate-ad".into()),
                argv: vec![],
            }),
        }
    }

    /// Executor with injectable failures, recording commands as attempted
    /// and uploads as completed.
    #[derive(Default)]
    struct ScriptedExecutor {
        fail_commands_containing: Option<&'static str>,
        fail_uploads_to: Option<&'static str>,
        events: Mutex<Vec<DryRunEvent>>,
    }

    impl ScriptedExecutor {
        fn events(&self) -> Vec<DryRunEvent> {
            self.events.lock().expect("events mutex").clone()
        }
    }

    #[async_trait]
    impl RemoteExecutor for ScriptedExecutor {
        async fn run(&self, command: &CommandLine) -> Result<ExecOutput, BootstrapError> {
            let line = command.describe();
            self.events.lock().expect("events mutex").push(DryRunEvent::Command(line.clone()));
            if let Some(needle) = self.fail_commands_containing
                && line.contains(needle)
            {
                return Err(BootstrapError::CommandFailed {
                    command: line,
                    status: 1,
                    output: "boom".into(),
                });
            }
            Ok(ExecOutput::default())
        }

        async fn upload(&self, content: &[u8], remote_path: &str) -> Result<(), BootstrapError> {
            if let Some(needle) = self.fail_uploads_to
                && remote_path.contains(needle)
            {
                return Err(BootstrapError::Transfer {
                    destination: remote_path.into(),
                    reason: "write failed".into(),
                });
            }
            self.events.lock().expect("events mutex").push(DryRunEvent::Upload {
                remote_path: remote_path.into(),
                bytes: content.len(),
            });
            Ok(())
        }
    }

    /// A host that never accepts anything.
    struct AlwaysDown;

    #[async_trait]
    impl RemoteExecutor for AlwaysDown {
        async fn run(&self, _command: &CommandLine) -> Result<ExecOutput, BootstrapError> {
            Err(BootstrapError::Connection {
                reason: "connection refused".into(),
            })
        }

        async fn upload(&self, _content: &[u8], _remote_path: &str) -> Result<(), BootstrapError> {
            Err(BootstrapError::Transfer {
                destination: "nowhere".into(),
                reason: "connection refused".into(),
            })
        }
    }

    fn upload_paths(events: &[DryRunEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|event| match event {
                DryRunEvent::Upload { remote_path, .. } => Some(remote_path.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn full_pipeline_succeeds_and_integrates_last() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_templates(dir.path());
        let (pipeline, deferred) = Pipeline::from_plan(&sample_plan(), dir.path()).expect("pipeline");
        assert!(deferred.is_empty());
        assert_eq!(pipeline.step_order()[0], READY_STEP_ID);

        let executor = DryRun::new();
        let ledger = MemoryLedger::new();
        let report = run_pipeline(&pipeline, &executor, &ledger, &RunOptions::default()).await;

        assert!(report.is_success(), "outcome: {:?}", report.outcome);
        for id in ["set-env", "install-runner", "justfile", "resolv", "integrate"] {
            assert_eq!(report.step(id).expect(id).status, StepStatus::Succeeded, "step {id}");
        }

        let events = executor.events();
        assert!(
            matches!(events.last(), Some(DryRunEvent::Command(line)) if line.contains("integrate-ad")),
            "integration must come last: {events:?}"
        );
        assert_eq!(upload_paths(&events), vec!["~/justfile", "~/resolv.conf"]);
        assert!(report.bytes_sent() > 0);
    }

    #[tokio::test]
    async fn second_run_skips_unchanged_artifacts() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_templates(dir.path());
        let ledger = MemoryLedger::new();
        let plan = sample_plan();

        let (pipeline, _) = Pipeline::from_plan(&plan, dir.path()).expect("pipeline");
        let first = run_pipeline(&pipeline, &DryRun::new(), &ledger, &RunOptions::default()).await;
        assert!(first.is_success());

        let (pipeline, _) = Pipeline::from_plan(&plan, dir.path()).expect("pipeline");
        let executor = DryRun::new();
        let second = run_pipeline(&pipeline, &executor, &ledger, &RunOptions::default()).await;

        assert!(second.is_success());
        for id in ["justfile", "resolv"] {
            let step = second.step(id).expect(id);
            assert_eq!(step.status, StepStatus::Skipped, "step {id}");
            assert_eq!(step.bytes_sent, 0);
        }
        // The skip satisfies the integration step's dependency edge.
        assert_eq!(second.step("integrate").expect("integrate").status, StepStatus::Succeeded);
        assert!(upload_paths(&executor.events()).is_empty());
        assert_eq!(second.bytes_sent(), 0);
    }

    #[tokio::test]
    async fn changed_binding_forces_retransfer() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_templates(dir.path());
        let ledger = MemoryLedger::new();

        let (pipeline, _) = Pipeline::from_plan(&sample_plan(), dir.path()).expect("pipeline");
        run_pipeline(&pipeline, &DryRun::new(), &ledger, &RunOptions::default()).await;

        // A caller changing one bound value programmatically is enough to
        // force a re-transfer of that artifact alone.
        let (mut pipeline, _) = Pipeline::from_plan(&sample_plan(), dir.path()).expect("pipeline");
        pipeline.bind("resolv", "dns1", Binding::value("10.0.0.3")).expect("bind");
        let executor = DryRun::new();
        let report = run_pipeline(&pipeline, &executor, &ledger, &RunOptions::default()).await;

        assert_eq!(report.step("resolv").expect("resolv").status, StepStatus::Succeeded);
        assert_eq!(report.step("justfile").expect("justfile").status, StepStatus::Skipped);
        assert_eq!(upload_paths(&executor.events()), vec!["~/resolv.conf"]);
    }

    #[tokio::test]
    async fn install_failure_cascades_to_integrate_but_not_independent_steps() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_templates(dir.path());
        let (pipeline, _) = Pipeline::from_plan(&sample_plan(), dir.path()).expect("pipeline");

        let executor = ScriptedExecutor {
            fail_commands_containing: Some("install.sh"),
            ..Default::default()
        };
        let ledger = MemoryLedger::new();
        let report = run_pipeline(&pipeline, &executor, &ledger, &RunOptions::default()).await;

        assert_eq!(report.step("install-runner").expect("install").status, StepStatus::Failed);
        // Steps with no dependency path to the failure still complete.
        assert_eq!(report.step("set-env").expect("set-env").status, StepStatus::Succeeded);
        assert_eq!(report.step("justfile").expect("justfile").status, StepStatus::Succeeded);
        assert_eq!(report.step("resolv").expect("resolv").status, StepStatus::Succeeded);

        let integrate = report.step("integrate").expect("integrate");
        assert_eq!(integrate.status, StepStatus::Failed);
        assert!(integrate.detail.as_deref().unwrap_or_default().contains("not started"));

        match &report.outcome {
            RunOutcome::Failed { step, error } => {
                assert_eq!(step, "install-runner");
                assert!(matches!(error, BootstrapError::CommandFailed { .. }));
            }
            RunOutcome::Succeeded => panic!("run must fail"),
        }

        let events = executor.events();
        assert!(
            !events
                .iter()
                .any(|event| matches!(event, DryRunEvent::Command(line) if line.contains("integrate-ad"))),
            "integration must never be attempted: {events:?}"
        );
    }

    #[tokio::test]
    async fn dependent_transfer_never_starts_when_predecessor_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_templates(dir.path());
        let mut plan = sample_plan();
        plan.artifacts[1].depends_on = vec!["install-runner".into()];
        let (pipeline, _) = Pipeline::from_plan(&plan, dir.path()).expect("pipeline");

        let executor = ScriptedExecutor {
            fail_commands_containing: Some("install.sh"),
            ..Default::default()
        };
        let report = run_pipeline(&pipeline, &executor, &MemoryLedger::new(), &RunOptions::default()).await;

        let resolv = report.step("resolv").expect("resolv");
        assert_eq!(resolv.status, StepStatus::Failed);
        assert!(resolv.detail.as_deref().unwrap_or_default().contains("not started"));
        assert_eq!(upload_paths(&executor.events()), vec!["~/justfile"]);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_timeout_blocks_every_step() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_templates(dir.path());
        let mut plan = sample_plan();
        plan.host.ready = ReadinessDefinition {
            settle: None,
            interval: "5s".into(),
            timeout: "10s".into(),
            probe: "true".into(),
        };
        let (pipeline, _) = Pipeline::from_plan(&plan, dir.path()).expect("pipeline");

        let report = run_pipeline(&pipeline, &AlwaysDown, &MemoryLedger::new(), &RunOptions::default()).await;

        for step in &report.steps {
            assert_eq!(step.status, StepStatus::Failed, "step {}", step.id);
        }
        match &report.outcome {
            RunOutcome::Failed { step, error } => {
                assert_eq!(step, READY_STEP_ID);
                assert!(matches!(error, BootstrapError::TimedOut { .. }));
            }
            RunOutcome::Succeeded => panic!("run must fail"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_binding_blocks_its_transfer_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_templates(dir.path());
        let mut plan = sample_plan();
        plan.artifacts[1].bindings.insert(
            "dns1".to_string(),
            BindingDefinition::Detailed(DetailedBinding {
                deferred: true,
                ..Default::default()
            }),
        );
        let (pipeline, mut deferred) = Pipeline::from_plan(&plan, dir.path()).expect("pipeline");
        assert_eq!(pipeline.pending_bindings(), vec![("resolv".to_string(), "dns1".to_string())]);

        tokio::spawn(async move {
            // The directory service "finishes provisioning" later.
            tokio::time::sleep(Duration::from_millis(50)).await;
            deferred.resolve("resolv", "dns1", "10.0.0.2").expect("resolve");
        });

        let executor = DryRun::new();
        let report = run_pipeline(&pipeline, &executor, &MemoryLedger::new(), &RunOptions::default()).await;

        assert!(report.is_success(), "outcome: {:?}", report.outcome);
        // The independent artifact lands before the blocked one.
        assert_eq!(upload_paths(&executor.events()), vec!["~/justfile", "~/resolv.conf"]);
    }

    #[tokio::test]
    async fn dropped_resolver_fails_only_dependents() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_templates(dir.path());
        let mut plan = sample_plan();
        plan.artifacts[1].bindings.insert(
            "dns1".to_string(),
            BindingDefinition::Detailed(DetailedBinding {
                deferred: true,
                ..Default::default()
            }),
        );
        let (pipeline, deferred) = Pipeline::from_plan(&plan, dir.path()).expect("pipeline");
        drop(deferred);

        let report = run_pipeline(&pipeline, &DryRun::new(), &MemoryLedger::new(), &RunOptions::default()).await;

        assert_eq!(report.step("resolv").expect("resolv").status, StepStatus::Failed);
        assert_eq!(report.step("justfile").expect("justfile").status, StepStatus::Succeeded);
        assert_eq!(report.step("integrate").expect("integrate").status, StepStatus::Failed);
        match &report.outcome {
            RunOutcome::Failed { step, error } => {
                assert_eq!(step, "resolv");
                assert!(matches!(error, BootstrapError::ResourceNotReady { .. }));
            }
            RunOutcome::Succeeded => panic!("run must fail"),
        }
    }

    #[tokio::test]
    async fn failed_upload_keeps_the_previous_ledger_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_templates(dir.path());
        let ledger = MemoryLedger::new();
        let key = TransferKey::new("jump-host", "resolv");

        let (pipeline, _) = Pipeline::from_plan(&sample_plan(), dir.path()).expect("pipeline");
        run_pipeline(&pipeline, &DryRun::new(), &ledger, &RunOptions::default()).await;
        let delivered = ledger.last_delivered(&key).expect("ledger").expect("record");

        let mut changed = sample_plan();
        changed.artifacts[1].bindings = resolv_bindings("10.0.0.3");
        let (pipeline, _) = Pipeline::from_plan(&changed, dir.path()).expect("pipeline");
        let executor = ScriptedExecutor {
            fail_uploads_to: Some("resolv"),
            ..Default::default()
        };
        let report = run_pipeline(&pipeline, &executor, &ledger, &RunOptions::default()).await;

        assert!(!report.is_success());
        // The record still names the previously delivered content, so the
        // next run retries the transfer.
        let after_failure = ledger.last_delivered(&key).expect("ledger").expect("record");
        assert_eq!(after_failure.fingerprint, delivered.fingerprint);
    }

    #[tokio::test]
    async fn env_bindings_are_read_at_pipeline_construction() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_templates(dir.path());
        fs::write(dir.path().join("useradd.sh"), "echo \"${{ ad_password }}\" | kinit admin\n").expect("write template");

        let mut plan = sample_plan();
        let mut bindings = IndexMap::new();
        bindings.insert(
            "ad_password".to_string(),
            BindingDefinition::Detailed(DetailedBinding {
                env: Some("RIGGER_TEST_AD_PASSWORD".into()),
                secret: true,
                ..Default::default()
            }),
        );
        plan.artifacts.push(ArtifactDefinition {
            id: "useradd".into(),
            template: "useradd.sh".into(),
            destination: "~/useradd.sh".into(),
            depends_on: vec![],
            bindings,
        });

        let missing = Pipeline::from_plan(&plan, dir.path()).expect_err("unset variable must fail");
        assert!(matches!(&missing, BootstrapError::Plan(message) if message.contains("RIGGER_TEST_AD_PASSWORD")));

        let (pipeline, _) = temp_env::with_var("RIGGER_TEST_AD_PASSWORD", Some("hunter2"), || {
            Pipeline::from_plan(&plan, dir.path())
        })
        .expect("pipeline");

        let executor = DryRun::new();
        let report = run_pipeline(&pipeline, &executor, &MemoryLedger::new(), &RunOptions::default()).await;
        assert!(report.is_success(), "outcome: {:?}", report.outcome);
        assert!(upload_paths(&executor.events()).contains(&"~/useradd.sh"));
    }

    #[tokio::test]
    async fn cycle_detection_is_a_plan_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_templates(dir.path());
        let mut plan = sample_plan();
        plan.commands[0].depends_on = vec!["install-runner".into()];
        plan.commands[1].depends_on = vec!["set-env".into()];

        let error = Pipeline::from_plan(&plan, dir.path()).expect_err("should fail");
        assert!(matches!(&error, BootstrapError::Plan(message) if message.contains("cycle")));
    }

    #[tokio::test]
    async fn reserved_ready_identifier_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_templates(dir.path());
        let mut plan = sample_plan();
        plan.commands[0].id = READY_STEP_ID.into();

        let error = Pipeline::from_plan(&plan, dir.path()).expect_err("should fail");
        assert!(matches!(&error, BootstrapError::Plan(message) if message.contains("reserved")));
    }

    #[tokio::test]
    async fn fleet_runs_report_in_input_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_templates(dir.path());
        let ledger: Arc<dyn TransferLedger> = Arc::new(MemoryLedger::new());

        let mut runs = Vec::new();
        for name in ["host-a", "host-b", "host-c"] {
            let mut plan = sample_plan();
            plan.host = host(name);
            let (pipeline, _) = Pipeline::from_plan(&plan, dir.path()).expect("pipeline");
            runs.push(HostRun {
                pipeline,
                executor: Arc::new(DryRun::new()),
            });
        }

        let reports = run_fleet(runs, Arc::clone(&ledger), RunOptions::default(), 2).await;

        let hosts: Vec<&str> = reports.iter().map(|report| report.host.as_str()).collect();
        assert_eq!(hosts, vec!["host-a", "host-b", "host-c"]);
        assert!(reports.iter().all(RunReport::is_success));
        // Ledger entries stay keyed per host.
        for name in ["host-a", "host-b", "host-c"] {
            assert!(ledger
                .last_delivered(&TransferKey::new(name, "resolv"))
                .expect("ledger")
                .is_some());
        }
    }
}
