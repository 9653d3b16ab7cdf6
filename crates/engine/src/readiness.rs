//! Readiness gate for freshly created hosts.
//!
//! A host that was just provisioned usually refuses connections for a
//! while. The gate polls a trivial probe command until it succeeds or an
//! overall deadline lapses; an optional settle delay covers hosts whose
//! boot time is well characterized. Calling the gate on an already-ready
//! host returns on the first probe.

use std::time::Duration;

use rigger_types::ReadinessDefinition;
use rigger_util::duration::parse_duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

use crate::command::CommandLine;
use crate::error::BootstrapError;
use crate::executor::RemoteExecutor;

/// Parsed readiness policy for one host.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    /// Fixed delay before the first probe.
    pub settle: Option<Duration>,
    /// Pause between probe attempts.
    pub interval: Duration,
    /// Overall deadline, measured from the start of the gate.
    pub deadline: Duration,
    /// Probe command; success means the host is reachable.
    pub probe: CommandLine,
}

impl ReadinessProbe {
    /// Parse the plan's readiness block. Malformed durations are plan
    /// defects, not runtime failures.
    pub fn from_definition(definition: &ReadinessDefinition) -> Result<Self, BootstrapError> {
        let settle = match &definition.settle {
            Some(text) => Some(parse_readiness_duration("settle", text)?),
            None => None,
        };
        Ok(Self {
            settle,
            interval: parse_readiness_duration("interval", &definition.interval)?,
            deadline: parse_readiness_duration("timeout", &definition.timeout)?,
            probe: CommandLine::script(definition.probe.clone()),
        })
    }
}

fn parse_readiness_duration(field: &str, text: &str) -> Result<Duration, BootstrapError> {
    parse_duration(text).ok_or_else(|| BootstrapError::Plan(format!("host.ready.{field}: cannot parse duration '{text}'")))
}

/// Block until the host accepts the probe or the deadline lapses.
///
/// Each probe attempt is individually capped by `attempt_timeout` so a
/// black-holed connection cannot absorb the whole deadline. Failures
/// between attempts are expected and only logged.
pub async fn await_ready(
    executor: &dyn RemoteExecutor,
    probe: &ReadinessProbe,
    attempt_timeout: Duration,
) -> Result<(), BootstrapError> {
    let gate_opened = Instant::now();

    if let Some(settle) = probe.settle {
        debug!(?settle, "settling before first readiness probe");
        sleep(settle).await;
    }

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match timeout(attempt_timeout, executor.run(&probe.probe)).await {
            Ok(Ok(_)) => {
                debug!(attempt, "host is ready");
                return Ok(());
            }
            Ok(Err(error)) => debug!(attempt, %error, "readiness probe failed"),
            Err(_elapsed) => debug!(attempt, "readiness probe attempt timed out"),
        }

        if gate_opened.elapsed() + probe.interval >= probe.deadline {
            return Err(BootstrapError::TimedOut {
                operation: "readiness probe".into(),
                deadline: probe.deadline,
            });
        }
        sleep(probe.interval).await;
    }
}
