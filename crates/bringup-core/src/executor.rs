//! External process execution.
//!
//! Every call to helm, kubectl, kind or docker goes through [`Executor`],
//! which times the call, builds an immutable [`ExecutionRecord`] and reports
//! it to the sink. The process itself is started by a [`Runner`] so tests can
//! substitute a scripted cluster for the real tools.

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{BringupError, Result};
use crate::redact::Redactor;
use crate::sink::{Level, LogEvent, MetricEvent, Sink};

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// A program, its arguments and an optional stdin payload.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    redactor: Redactor,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            redactor: Redactor::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Mask `secret` wherever this invocation is logged or recorded.
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.redactor = self.redactor.with_secret(secret);
        self
    }

    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// The command line as it may appear in logs.
    pub fn redacted_argv(&self) -> Vec<String> {
        self.redactor.redact_all(&self.argv())
    }

    pub fn display(&self) -> String {
        self.redacted_argv().join(" ")
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// What a runner observed: exit status and, when captured, output.
#[derive(Debug, Clone, Default)]
pub struct RawOutput {
    /// Process exit code; `-1` when terminated by a signal.
    pub exit_code: i32,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// Starts processes. `Err` means the process could not be started at all.
pub trait Runner {
    fn run(&self, invocation: &Invocation, capture_output: bool) -> std::io::Result<RawOutput>;

    /// Whether `program` can be found on `PATH`.
    fn locate(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

/// Runs real processes with `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn run(&self, invocation: &Invocation, capture_output: bool) -> std::io::Result<RawOutput> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);

        if invocation.stdin.is_some() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }
        if capture_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        let mut child = cmd.spawn()?;
        if let Some(input) = &invocation.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                // A tool may exit before reading its input; its exit code says why.
                if let Err(e) = stdin.write_all(input.as_bytes()) {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(e);
                    }
                }
            }
        }
        let output = child.wait_with_output()?;

        let text = |bytes: &[u8]| String::from_utf8_lossy(bytes).into_owned();
        Ok(RawOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: capture_output.then(|| text(&output.stdout)),
            stderr: capture_output.then(|| text(&output.stderr)),
        })
    }
}

// ---------------------------------------------------------------------------
// ExecutionRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct ExecOptions {
    pub capture_output: bool,
    pub must_succeed: bool,
    /// Mask secrets in captured stdout. Off only when stdout is fed to
    /// another tool verbatim and never logged.
    pub redact_stdout: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self::PASSTHROUGH
    }
}

impl ExecOptions {
    /// Output inherited, exit code left to the caller.
    pub const PASSTHROUGH: ExecOptions = ExecOptions {
        capture_output: false,
        must_succeed: false,
        redact_stdout: true,
    };
    /// Output captured, exit code left to the caller.
    pub const CAPTURE: ExecOptions = ExecOptions {
        capture_output: true,
        must_succeed: false,
        redact_stdout: true,
    };
    /// Output captured, non-zero exit is an error.
    pub const CHECKED: ExecOptions = ExecOptions {
        capture_output: true,
        must_succeed: true,
        redact_stdout: true,
    };
    /// Output captured verbatim for piping into a second command.
    pub const RENDER: ExecOptions = ExecOptions {
        capture_output: true,
        must_succeed: false,
        redact_stdout: false,
    };
}

/// One external invocation. Created once, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub command_line: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_ms")]
    pub duration: Duration,
    pub exit_code: i32,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

fn serialize_ms<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl ExecutionRecord {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.as_deref().map(str::trim).unwrap_or("")
    }

    /// Captured stderr, falling back to stdout, for diagnostics.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.as_deref().unwrap_or("").trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        self.stdout_trimmed().to_string()
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
pub struct Executor<'a> {
    runner: &'a dyn Runner,
    sink: &'a Sink,
}

impl<'a> Executor<'a> {
    pub fn new(runner: &'a dyn Runner, sink: &'a Sink) -> Self {
        Self { runner, sink }
    }

    pub fn sink(&self) -> &'a Sink {
        self.sink
    }

    pub fn locate(&self, program: &str) -> bool {
        self.runner.locate(program)
    }

    pub fn execute(&self, invocation: &Invocation, opts: ExecOptions) -> Result<ExecutionRecord> {
        let command_line = invocation.redacted_argv();
        let display = command_line.join(" ");
        self.sink.info(format!("$ {display}"));

        let started_at = Utc::now();
        let start = Instant::now();
        let result = self.runner.run(invocation, opts.capture_output);
        let duration = start.elapsed();

        let raw = match result {
            Ok(raw) => raw,
            Err(source) => {
                self.report(&invocation.program, duration, false, -1);
                return Err(BringupError::Spawn {
                    program: invocation.program.clone(),
                    source,
                });
            }
        };

        let redactor = invocation.redactor();
        let record = ExecutionRecord {
            command_line,
            started_at,
            duration,
            exit_code: raw.exit_code,
            stdout: raw.stdout.map(|s| {
                if opts.redact_stdout {
                    redactor.redact(&s).into_owned()
                } else {
                    s
                }
            }),
            stderr: raw.stderr.map(|s| redactor.redact(&s).into_owned()),
        };
        self.report(&invocation.program, duration, record.success(), record.exit_code);

        if opts.must_succeed && !record.success() {
            return Err(BringupError::ExternalCommand {
                argv: display,
                exit_code: record.exit_code,
                output: record.diagnostic(),
            });
        }
        Ok(record)
    }

    fn report(&self, program: &str, duration: Duration, success: bool, exit_code: i32) {
        let status = if success { "success" } else { "failure" };
        self.sink.metric(
            MetricEvent::histogram_ms("command.duration", duration)
                .tag("program", program)
                .tag("status", status),
        );
        self.sink.metric(
            MetricEvent::counter("command.count", 1.0)
                .tag("program", program)
                .tag("status", status),
        );
        self.sink.log(
            LogEvent::new(Level::Debug, format!("{program} finished ({status})"))
                .command(program)
                .duration(duration)
                .exit_code(exit_code),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemoryBackend, MetricKind};
    use crate::testing::ScriptedRunner;

    fn sink_with_memory() -> (Sink, MemoryBackend) {
        let memory = MemoryBackend::new();
        (Sink::new().with_backend(memory.clone()), memory)
    }

    #[test]
    fn records_success_and_emits_events() {
        let runner = ScriptedRunner::new().respond("helm repo list", 0, "datadog\n", "");
        let (sink, memory) = sink_with_memory();
        let exec = Executor::new(&runner, &sink);

        let record = exec
            .execute(&Invocation::new("helm", ["repo", "list"]), ExecOptions::CAPTURE)
            .unwrap();
        assert!(record.success());
        assert_eq!(record.command_line, vec!["helm", "repo", "list"]);
        assert_eq!(record.stdout_trimmed(), "datadog");

        let durations = memory.metrics_named("command.duration");
        assert_eq!(durations.len(), 1);
        assert_eq!(durations[0].kind, MetricKind::Histogram);
        assert_eq!(durations[0].tag_value("program"), Some("helm"));
        assert_eq!(durations[0].tag_value("status"), Some("success"));
        assert_eq!(memory.metrics_named("command.count").len(), 1);
        assert!(memory
            .logs()
            .iter()
            .any(|l| l.level == Level::Debug && l.exit_code == Some(0)));
    }

    #[test]
    fn non_zero_exit_is_returned_when_not_checked() {
        let runner = ScriptedRunner::new().respond("kubectl wait", 1, "", "timed out");
        let (sink, memory) = sink_with_memory();
        let exec = Executor::new(&runner, &sink);

        let record = exec
            .execute(&Invocation::new("kubectl", ["wait"]), ExecOptions::CAPTURE)
            .unwrap();
        assert_eq!(record.exit_code, 1);
        assert_eq!(
            memory.metrics_named("command.count")[0].tag_value("status"),
            Some("failure")
        );
    }

    #[test]
    fn must_succeed_turns_exit_into_error() {
        let runner = ScriptedRunner::new().respond("kubectl apply", 1, "", "connection refused");
        let sink = Sink::new();
        let exec = Executor::new(&runner, &sink);

        let err = exec
            .execute(
                &Invocation::new("kubectl", ["apply", "-f", "-"]),
                ExecOptions::CHECKED,
            )
            .unwrap_err();
        match err {
            BringupError::ExternalCommand {
                argv,
                exit_code,
                output,
            } => {
                assert_eq!(argv, "kubectl apply -f -");
                assert_eq!(exit_code, 1);
                assert_eq!(output, "connection refused");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn spawn_failure_still_emits_metrics() {
        let runner = ScriptedRunner::new().missing("docker");
        let (sink, memory) = sink_with_memory();
        let exec = Executor::new(&runner, &sink);

        let err = exec
            .execute(&Invocation::new("docker", ["info"]), ExecOptions::PASSTHROUGH)
            .unwrap_err();
        assert!(matches!(err, BringupError::Spawn { .. }));
        assert_eq!(memory.metrics_named("command.count").len(), 1);
        assert_eq!(memory.metrics_named("command.duration").len(), 1);
    }

    #[test]
    fn secrets_never_reach_the_record_or_logs() {
        let runner = ScriptedRunner::new().respond("kubectl create", 0, "key: topsecret123", "");
        let (sink, memory) = sink_with_memory();
        let exec = Executor::new(&runner, &sink);

        let inv = Invocation::new(
            "kubectl",
            ["create", "secret", "generic", "s", "--from-literal=api-key=topsecret123"],
        )
        .secret("topsecret123");
        let record = exec.execute(&inv, ExecOptions::CAPTURE).unwrap();

        assert!(record.command_line.iter().all(|a| !a.contains("topsecret123")));
        assert!(!record.stdout_trimmed().contains("topsecret123"));
        assert!(memory.logs().iter().all(|l| !l.message.contains("topsecret123")));
    }

    #[test]
    fn system_runner_captures_output() {
        let record = SystemRunner
            .run(&Invocation::new("sh", ["-c", "echo out; echo err >&2; exit 3"]), true)
            .unwrap();
        assert_eq!(record.exit_code, 3);
        assert_eq!(record.stdout.as_deref(), Some("out\n"));
        assert_eq!(record.stderr.as_deref(), Some("err\n"));
    }

    #[test]
    fn system_runner_feeds_stdin() {
        let inv = Invocation::new("cat", Vec::<String>::new()).stdin("kind: Namespace\n");
        let record = SystemRunner.run(&inv, true).unwrap();
        assert_eq!(record.stdout.as_deref(), Some("kind: Namespace\n"));
    }

    #[test]
    fn system_runner_reports_missing_program() {
        let inv = Invocation::new("__bringup_missing_tool__", ["--version"]);
        assert!(SystemRunner.run(&inv, true).is_err());
    }
}
