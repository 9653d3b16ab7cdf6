//! Rigger CLI: check, preview, and execute bootstrap plans.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rigger_engine::executor::{DryRun, DryRunEvent, OpenSsh};
use rigger_engine::{
    load_plan_file, preview_bindings, render_template, render_template_redacted, run_pipeline, Pipeline, RunOptions,
    RunOutcome, RunReport,
};
use rigger_types::validate_plan;
use rigger_util::ledger::{JsonFileLedger, MemoryLedger, TransferLedger};

#[derive(Parser)]
#[command(name = "rigger", version, about = "Bootstrap freshly provisioned hosts from a plan")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a plan, printing the execution order.
    Check {
        /// Path to the plan document.
        plan: PathBuf,
    },
    /// Render the plan's artifacts locally without touching the network.
    Render {
        /// Path to the plan document.
        plan: PathBuf,
        /// Print secret binding values instead of redacting them.
        #[arg(long)]
        reveal: bool,
    },
    /// Execute the plan against its host.
    Run {
        /// Path to the plan document.
        plan: PathBuf,
        /// Transfer-ledger file; defaults to the user config directory.
        #[arg(long)]
        ledger: Option<PathBuf>,
        /// Record what would happen instead of connecting to the host.
        #[arg(long)]
        dry_run: bool,
        /// Per-operation timeout in seconds.
        #[arg(long, default_value_t = 120)]
        op_timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Check { plan } => {
            check(&plan)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Render { plan, reveal } => {
            render(&plan, reveal)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            plan,
            ledger,
            dry_run,
            op_timeout,
        } => run(&plan, ledger, dry_run, op_timeout).await,
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn check(plan_path: &Path) -> Result<()> {
    let plan = load_plan_file(plan_path)?;

    let issues = validate_plan(&plan);
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!("{issue}");
        }
        bail!("plan has {} validation issue(s)", issues.len());
    }

    let (pipeline, deferred) = Pipeline::from_plan(&plan, &plan_dir(plan_path))?;
    println!(
        "plan '{}' targets {}@{}:{}",
        plan.plan, plan.host.user, plan.host.address, plan.host.port
    );
    println!("execution order:");
    for id in pipeline.step_order() {
        println!("  {id}");
    }
    if !deferred.is_empty() {
        println!("deferred bindings (supplied by the embedding program):");
        for (artifact, name) in deferred.pending() {
            println!("  {artifact}.{name}");
        }
    }
    Ok(())
}

fn render(plan_path: &Path, reveal: bool) -> Result<()> {
    let plan = load_plan_file(plan_path)?;
    let (pipeline, _deferred) = Pipeline::from_plan(&plan, &plan_dir(plan_path))?;

    for (artifact_id, template_path, destination, bindings) in pipeline.artifacts() {
        let source = std::fs::read_to_string(template_path)
            .with_context(|| format!("cannot read template {}", template_path.display()))?;
        let resolved = preview_bindings(bindings);
        let rendered = if reveal {
            render_template(artifact_id, &source, &resolved)?
        } else {
            render_template_redacted(artifact_id, &source, &resolved)?
        };
        println!("# {artifact_id} -> {destination}");
        println!("{rendered}");
    }
    Ok(())
}

async fn run(plan_path: &Path, ledger_path: Option<PathBuf>, dry_run: bool, op_timeout: u64) -> Result<ExitCode> {
    let plan = load_plan_file(plan_path)?;
    let (pipeline, deferred) = Pipeline::from_plan(&plan, &plan_dir(plan_path))?;

    if !deferred.is_empty() {
        let pending: Vec<String> = deferred.pending().map(|(artifact, name)| format!("{artifact}.{name}")).collect();
        bail!(
            "plan declares deferred bindings ({}); they are resolved through the library API, not the CLI",
            pending.join(", ")
        );
    }

    let options = RunOptions {
        op_timeout: Duration::from_secs(op_timeout),
        ..Default::default()
    };

    // A dry run records operations against a throwaway ledger so the real
    // skip/transfer state is left untouched.
    let ledger: Box<dyn TransferLedger> = if dry_run {
        Box::new(MemoryLedger::new())
    } else {
        match ledger_path {
            Some(path) => Box::new(JsonFileLedger::open(path)?),
            None => Box::new(JsonFileLedger::open_default()?),
        }
    };

    let report = if dry_run {
        let executor = DryRun::new();
        let report = run_pipeline(&pipeline, &executor, ledger.as_ref(), &options).await;
        for event in executor.events() {
            match event {
                DryRunEvent::Command(line) => println!("would run: {line}"),
                DryRunEvent::Upload { remote_path, bytes } => {
                    println!("would upload {bytes} bytes -> {remote_path}");
                }
            }
        }
        report
    } else {
        let executor = OpenSsh::new(pipeline.host());
        run_pipeline(&pipeline, &executor, ledger.as_ref(), &options).await
    };

    print_report(&report);
    Ok(if report.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn print_report(report: &RunReport) {
    println!("host {}:", report.host);
    for step in &report.steps {
        println!(
            "  {:<16} {:<9} {:>6}ms  {}",
            step.id,
            step.status.to_string(),
            step.duration.as_millis(),
            step.detail.as_deref().unwrap_or_default()
        );
    }
    match &report.outcome {
        RunOutcome::Succeeded => println!("run succeeded ({} bytes transferred)", report.bytes_sent()),
        RunOutcome::Failed { step, error } => println!("run failed at step '{step}': {error}"),
    }
}

fn plan_dir(plan_path: &Path) -> PathBuf {
    match plan_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
