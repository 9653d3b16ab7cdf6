//! Strongly typed bootstrap-plan schema shared across the engine and CLI.
//!
//! A plan document describes everything needed to configure one freshly
//! provisioned host: how to reach it, which command steps to run, which
//! configuration artifacts to render and deliver, and the integration
//! command that ties the host into the rest of the environment. The models
//! intentionally preserve authoring order (via `IndexMap`) so rendered
//! artifacts and reports list bindings in the sequence the author wrote.

pub mod plan;

pub use plan::{
    ArtifactDefinition, BindingDefinition, CommandStepDefinition, DetailedBinding, HostDefinition,
    IntegrateDefinition, PlanDefinition, ReadinessDefinition, DEFAULT_INTEGRATE_ID,
};
pub use plan::validation::{validate_plan, PlanIssue};
