//! Declarative plan validation.
//!
//! These checks catch authoring mistakes before the engine builds a
//! pipeline: duplicate or malformed step identifiers, dangling
//! `depends_on` references, ambiguous binding sources, and destination
//! collisions. Cycle detection is left to the engine's ordering pass,
//! which has to walk the graph anyway.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{BindingDefinition, PlanDefinition};

static STEP_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("step id pattern compiles"));

/// A single validation finding, addressed by a dotted document path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanIssue {
    /// Document location, for example `artifacts.resolv.destination`.
    pub path: String,
    /// Human-readable description of the problem.
    pub message: String,
}

impl std::fmt::Display for PlanIssue {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}: {}", self.path, self.message)
    }
}

/// Validate a plan document. An empty result means the plan is well formed.
pub fn validate_plan(plan: &PlanDefinition) -> Vec<PlanIssue> {
    let mut issues = Vec::new();

    require_non_empty(&mut issues, "host.name", &plan.host.name);
    require_non_empty(&mut issues, "host.address", &plan.host.address);
    require_non_empty(&mut issues, "host.user", &plan.host.user);

    let step_ids = plan.step_ids();
    for (index, id) in step_ids.iter().enumerate() {
        let path = format!("steps[{index}].id");
        if id.is_empty() {
            issues.push(issue(&path, "step identifier must not be empty"));
            continue;
        }
        if !STEP_ID_PATTERN.is_match(id) {
            issues.push(issue(
                &path,
                &format!("step identifier '{id}' must match {}", STEP_ID_PATTERN.as_str()),
            ));
        }
        if step_ids[..index].contains(id) {
            issues.push(issue(&path, &format!("duplicate step identifier '{id}'")));
        }
    }

    let integrate_id = plan.integrate.as_ref().map(|integrate| integrate.id.as_str());

    for command in &plan.commands {
        let path = format!("commands.{}", command.id);
        check_command_body(&mut issues, &path, command.run.as_deref(), &command.argv);
        check_depends_on(&mut issues, &path, &command.id, &command.depends_on, &step_ids, integrate_id);
    }

    let mut destinations: Vec<&str> = Vec::new();
    for artifact in &plan.artifacts {
        let path = format!("artifacts.{}", artifact.id);
        require_non_empty(&mut issues, &format!("{path}.template"), &artifact.template);
        require_non_empty(&mut issues, &format!("{path}.destination"), &artifact.destination);

        if destinations.contains(&artifact.destination.as_str()) {
            issues.push(issue(
                &format!("{path}.destination"),
                &format!("destination '{}' is already used by another artifact", artifact.destination),
            ));
        }
        destinations.push(artifact.destination.as_str());

        check_depends_on(&mut issues, &path, &artifact.id, &artifact.depends_on, &step_ids, integrate_id);

        for (name, binding) in &artifact.bindings {
            check_binding(&mut issues, &format!("{path}.bindings.{name}"), binding);
        }
    }

    if let Some(integrate) = &plan.integrate {
        let path = format!("integrate.{}", integrate.id);
        check_command_body(&mut issues, &path, integrate.run.as_deref(), &integrate.argv);
    }

    issues
}

fn check_command_body(issues: &mut Vec<PlanIssue>, path: &str, run: Option<&str>, argv: &[String]) {
    let has_run = run.is_some_and(|text| !text.trim().is_empty());
    let has_argv = !argv.is_empty();
    match (has_run, has_argv) {
        (true, true) => issues.push(issue(path, "'run' and 'argv' are mutually exclusive")),
        (false, false) => issues.push(issue(path, "one of 'run' or 'argv' is required")),
        _ => {}
    }
}

fn check_depends_on(
    issues: &mut Vec<PlanIssue>,
    path: &str,
    own_id: &str,
    depends_on: &[String],
    step_ids: &[&str],
    integrate_id: Option<&str>,
) {
    for dependency in depends_on {
        let dependency_path = format!("{path}.depends_on");
        if dependency == own_id {
            issues.push(issue(&dependency_path, &format!("step '{own_id}' cannot depend on itself")));
        } else if Some(dependency.as_str()) == integrate_id {
            issues.push(issue(
                &dependency_path,
                &format!("'{dependency}' is the integration step and cannot be a predecessor"),
            ));
        } else if !step_ids.contains(&dependency.as_str()) {
            issues.push(issue(&dependency_path, &format!("unknown step '{dependency}'")));
        }
    }
}

fn check_binding(issues: &mut Vec<PlanIssue>, path: &str, binding: &BindingDefinition) {
    let BindingDefinition::Detailed(detailed) = binding else {
        return;
    };
    let sources = usize::from(detailed.value.is_some())
        + usize::from(detailed.env.is_some())
        + usize::from(detailed.deferred);
    if sources != 1 {
        issues.push(issue(path, "exactly one of 'value', 'env', or 'deferred: true' is required"));
    }
}

fn require_non_empty(issues: &mut Vec<PlanIssue>, path: &str, value: &str) {
    if value.trim().is_empty() {
        issues.push(issue(path, "must not be empty"));
    }
}

fn issue(path: &str, message: &str) -> PlanIssue {
    PlanIssue {
        path: path.to_string(),
        message: message.to_string(),
    }
}
