//! Fail-fast step sequencing.
//!
//! A command is an ordered list of [`Step`]s. The sequencer runs them one at
//! a time and stops at the first failure; later steps stay pending and are
//! reported as skipped. There are no retries: every step is idempotent, so
//! the operator re-runs the command.
//!
//! ```text
//! Pending ──▶ Running ──▶ Succeeded
//!                    └──▶ Failed   (halts the sequence)
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::outcome::Outcome;
use crate::sink::{Level, LogEvent, MetricEvent, Sink};

pub type Action<C> = Box<dyn Fn(&C) -> Outcome>;

/// A named unit of work within a command.
pub struct Step<C> {
    pub name: String,
    pub description: String,
    action: Action<C>,
}

impl<C> Step<C> {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        action: impl Fn(&C) -> Outcome + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            action: Box::new(action),
        }
    }
}

impl<C> fmt::Debug for Step<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub name: String,
    pub state: StepState,
    pub outcome: Outcome,
    #[serde(rename = "duration_ms", serialize_with = "serialize_ms")]
    pub duration: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct SequenceResult {
    pub command: String,
    pub per_step: Vec<StepReport>,
    /// Steps never started because an earlier step failed.
    pub skipped: Vec<String>,
    pub overall: Outcome,
    #[serde(rename = "duration_ms", serialize_with = "serialize_ms")]
    pub duration: Duration,
}

impl SequenceResult {
    /// Process exit status: 0 on success, 1 on any failure.
    pub fn exit_code(&self) -> i32 {
        if self.overall.is_success() {
            0
        } else {
            1
        }
    }

    pub fn failed_step(&self) -> Option<&StepReport> {
        self.per_step.iter().find(|r| r.state == StepState::Failed)
    }
}

fn serialize_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

pub struct Sequencer<'a> {
    sink: &'a Sink,
    command: String,
}

impl<'a> Sequencer<'a> {
    pub fn new(sink: &'a Sink, command: impl Into<String>) -> Self {
        Self {
            sink,
            command: command.into(),
        }
    }

    pub fn run<C>(&self, steps: &[Step<C>], ctx: &C) -> SequenceResult {
        let mut seq_span = self.sink.span("sequence");
        seq_span.attr("command", self.command.clone());

        self.sink.metric(
            MetricEvent::counter("sequence.start", 1.0).tag("command", self.command.as_str()),
        );
        let start = Instant::now();
        let total = steps.len();
        let mut per_step = Vec::with_capacity(total);
        let mut overall = Outcome::Success;

        for (i, step) in steps.iter().enumerate() {
            self.sink.info(format!(
                "Step {}/{}: {} - {}",
                i + 1,
                total,
                step.name,
                step.description
            ));
            let report = self.run_step(step, ctx);
            let failed = report.state == StepState::Failed;
            if failed {
                overall = report.outcome.clone();
            }
            per_step.push(report);
            if failed {
                break;
            }
        }

        let skipped: Vec<String> = steps[per_step.len()..]
            .iter()
            .map(|s| s.name.clone())
            .collect();
        if !skipped.is_empty() {
            self.sink
                .warn(format!("skipped after failure: {}", skipped.join(", ")));
        }

        let duration = start.elapsed();
        self.sink.metric(
            MetricEvent::histogram_ms("sequence.duration", duration)
                .tag("command", self.command.as_str())
                .tag("status", overall.label()),
        );
        self.sink.metric(
            MetricEvent::counter("sequence.count", 1.0)
                .tag("command", self.command.as_str())
                .tag("status", overall.label()),
        );
        seq_span.record_outcome(&overall);

        SequenceResult {
            command: self.command.clone(),
            per_step,
            skipped,
            overall,
            duration,
        }
    }

    fn run_step<C>(&self, step: &Step<C>, ctx: &C) -> StepReport {
        let mut span = self.sink.span(format!("step.{}", step.name));
        span.attr("step", step.name.clone());
        span.attr("command", self.command.clone());
        tracing::debug!(step = %step.name, state = ?StepState::Running);
        self.sink.metric(
            MetricEvent::counter("step.start", 1.0)
                .tag("step", step.name.as_str())
                .tag("command", self.command.as_str()),
        );

        let start = Instant::now();
        let outcome = (step.action)(ctx);
        let duration = start.elapsed();

        let state = if outcome.is_success() {
            StepState::Succeeded
        } else {
            StepState::Failed
        };
        match &outcome {
            Outcome::Success => self.sink.info(format!("{} succeeded", step.name)),
            Outcome::Failure(_) => self
                .sink
                .log(LogEvent::new(Level::Error, format!("{} {outcome}", step.name))),
        }

        self.sink.metric(
            MetricEvent::histogram_ms("step.duration", duration)
                .tag("step", step.name.as_str())
                .tag("status", outcome.label()),
        );
        self.sink.metric(
            MetricEvent::counter("step.count", 1.0)
                .tag("step", step.name.as_str())
                .tag("status", outcome.label()),
        );
        span.record_outcome(&outcome);

        StepReport {
            name: step.name.clone(),
            state,
            outcome,
            duration,
        }
    }
}
