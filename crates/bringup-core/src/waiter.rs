//! Bounded polling for cluster convergence.

use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::executor::{ExecOptions, Executor, Invocation};
use crate::outcome::{Failure, Outcome};
use crate::sink::{MetricEvent, Sink};

/// Poll `predicate` until it returns true or `deadline` elapses.
///
/// The first poll happens immediately and later polls are at least
/// `poll_interval` apart. When less than one interval remains, the waiter
/// sleeps out the remainder and gives up without polling again, so the call
/// returns within `deadline` plus the duration of one in-flight poll.
pub fn wait_until<F>(
    sink: &Sink,
    what: &str,
    poll_interval: Duration,
    deadline: Duration,
    mut predicate: F,
) -> Outcome
where
    F: FnMut() -> bool,
{
    let poll_interval = poll_interval.max(Duration::from_millis(1));
    let mut span = sink.span("wait");
    span.attr("target", what);

    let start = Instant::now();
    let mut polls: u32 = 0;
    let converged = loop {
        polls += 1;
        if predicate() {
            break true;
        }
        let elapsed = start.elapsed();
        if elapsed >= deadline {
            break false;
        }
        let remaining = deadline - elapsed;
        if remaining < poll_interval {
            std::thread::sleep(remaining);
            break false;
        }
        std::thread::sleep(poll_interval);
    };
    let elapsed = start.elapsed();

    let outcome = if converged {
        sink.info(format!("{what} ready after {polls} poll(s)"));
        Outcome::Success
    } else {
        Outcome::Failure(Failure::timeout(format!(
            "{what} not ready after {}s ({polls} polls)",
            deadline.as_secs_f64()
        )))
    };

    sink.metric(
        MetricEvent::counter("wait.polls", f64::from(polls)).tag("status", outcome.label()),
    );
    sink.metric(MetricEvent::histogram_ms("wait.duration", elapsed).tag("status", outcome.label()));
    span.attr("polls", polls.to_string());
    span.record_outcome(&outcome);
    outcome
}

// ---------------------------------------------------------------------------
// Deployment readiness
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DeploymentList {
    #[serde(default)]
    items: Vec<Deployment>,
}

#[derive(Debug, Deserialize)]
struct Deployment {
    #[serde(default)]
    spec: DeploymentSpec,
    #[serde(default)]
    status: DeploymentStatus,
}

#[derive(Debug, Default, Deserialize)]
struct DeploymentSpec {
    replicas: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentStatus {
    #[serde(default)]
    available_replicas: i64,
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

impl Deployment {
    fn available(&self) -> bool {
        // Kubernetes defaults an unset replica count to 1.
        let wanted = self.spec.replicas.unwrap_or(1);
        let condition = self
            .status
            .conditions
            .iter()
            .any(|c| c.kind == "Available" && c.status == "True");
        condition && self.status.available_replicas >= wanted
    }
}

/// Parse `kubectl get deployments -o json` output. An empty list is not
/// ready: there is nothing to converge on yet.
pub fn all_available(json: &str) -> bool {
    match serde_json::from_str::<DeploymentList>(json) {
        Ok(list) => !list.items.is_empty() && list.items.iter().all(Deployment::available),
        Err(e) => {
            tracing::debug!(error = %e, "unparseable deployment list");
            false
        }
    }
}

/// Whether every deployment in `namespace` reports `Available`. Query
/// failures count as "not yet".
pub fn deployments_available(exec: &Executor<'_>, namespace: &str) -> bool {
    let query = Invocation::new("kubectl", ["get", "deployments", "-n", namespace, "-o", "json"]);
    match exec.execute(&query, ExecOptions::CAPTURE) {
        Ok(record) if record.success() => all_available(record.stdout_trimmed()),
        Ok(_) => false,
        Err(e) => {
            tracing::debug!(error = %e, "deployment query failed");
            false
        }
    }
}
