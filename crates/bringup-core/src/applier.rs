//! Idempotent resource application.
//!
//! Every resource is applied in two phases: a local render that needs no
//! cluster (`kubectl create --dry-run=client`, `kubectl apply
//! --dry-run=client`, `helm template`, or in-process for secrets so values
//! never reach an argv), then a single declarative apply (`kubectl apply`,
//! `helm upgrade --install`). Applying the same spec twice
//! converges to the same cluster state. Nothing is retried or rolled back.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::Result;
use crate::executor::{ExecOptions, ExecutionRecord, Executor, Invocation};
use crate::outcome::{Failure, FailureKind, Outcome};
use crate::sink::MetricEvent;

/// Output fragments that mean the input itself was rejected.
const INVALID_MARKERS: &[&str] = &[
    "error validating",
    "is invalid",
    "error parsing",
    "unknown field",
    "no matches for kind",
    "error converting yaml",
    "parse error",
    "execution error",
    "Error: template:",
];

/// Output fragments that mean the cluster or registry could not be reached.
const TRANSPORT_MARKERS: &[&str] = &[
    "connection refused",
    "was refused",
    "cluster unreachable",
    "no such host",
    "i/o timeout",
    "Unauthorized",
    "forbidden",
    "Unable to connect to the server",
    "failed to download openapi",
    "dial tcp",
];

const TIMEOUT_MARKERS: &[&str] = &["timed out", "context deadline exceeded"];

// ---------------------------------------------------------------------------
// ResourceSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Namespace,
    Secret,
    Release,
    Manifest,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Namespace => "namespace",
            ResourceKind::Secret => "secret",
            ResourceKind::Release => "release",
            ResourceKind::Manifest => "manifest",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a manifest comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    /// A single file, applied with `-f`.
    File(PathBuf),
    /// A kustomization directory, applied with `-k`.
    Kustomize(PathBuf),
}

impl ManifestSource {
    fn flag(&self) -> &'static str {
        match self {
            ManifestSource::File(_) => "-f",
            ManifestSource::Kustomize(_) => "-k",
        }
    }

    fn path(&self) -> &PathBuf {
        match self {
            ManifestSource::File(p) | ManifestSource::Kustomize(p) => p,
        }
    }
}

/// A Helm release as `helm upgrade --install` sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseSpec {
    pub chart: String,
    pub version: Option<String>,
    pub values_files: Vec<PathBuf>,
    /// `key=value` pairs passed with `--set`.
    pub set: Vec<String>,
    /// Readiness timeout handed to helm's `--wait`.
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesiredConfig {
    Namespace,
    /// Literal entries of an Opaque secret. Values are masked in all output.
    Secret { data: Vec<(String, String)> },
    Release(ReleaseSpec),
    Manifest(ManifestSource),
}

/// Desired state of one cluster object, identified by `identity` (and
/// `namespace` where the kind is namespaced).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub identity: String,
    pub namespace: Option<String>,
    pub desired: DesiredConfig,
}

impl ResourceSpec {
    pub fn namespace(name: impl Into<String>) -> Self {
        Self {
            identity: name.into(),
            namespace: None,
            desired: DesiredConfig::Namespace,
        }
    }

    pub fn secret(
        name: impl Into<String>,
        namespace: impl Into<String>,
        data: Vec<(String, String)>,
    ) -> Self {
        Self {
            identity: name.into(),
            namespace: Some(namespace.into()),
            desired: DesiredConfig::Secret { data },
        }
    }

    pub fn release(
        name: impl Into<String>,
        namespace: impl Into<String>,
        release: ReleaseSpec,
    ) -> Self {
        Self {
            identity: name.into(),
            namespace: Some(namespace.into()),
            desired: DesiredConfig::Release(release),
        }
    }

    pub fn manifest(source: ManifestSource, namespace: Option<String>) -> Self {
        Self {
            identity: source.path().display().to_string(),
            namespace,
            desired: DesiredConfig::Manifest(source),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self.desired {
            DesiredConfig::Namespace => ResourceKind::Namespace,
            DesiredConfig::Secret { .. } => ResourceKind::Secret,
            DesiredConfig::Release(_) => ResourceKind::Release,
            DesiredConfig::Manifest(_) => ResourceKind::Manifest,
        }
    }

    /// `kind 'identity'`, used in messages.
    pub fn label(&self) -> String {
        format!("{} '{}'", self.kind(), self.identity)
    }
}

// ---------------------------------------------------------------------------
// Applier
// ---------------------------------------------------------------------------

pub struct Applier<'a> {
    exec: Executor<'a>,
}

type Step<T> = std::result::Result<T, Failure>;

impl<'a> Applier<'a> {
    pub fn new(exec: Executor<'a>) -> Self {
        Self { exec }
    }

    /// Converge `spec` with one apply attempt.
    pub fn apply(&self, spec: &ResourceSpec) -> Outcome {
        let sink = self.exec.sink();
        let kind = spec.kind();
        let mut span = sink.span(format!("apply.{kind}"));
        span.attr("resource", spec.identity.clone());
        if let Some(ns) = &spec.namespace {
            span.attr("namespace", ns.clone());
        }

        let start = Instant::now();
        let outcome: Outcome = match &spec.desired {
            DesiredConfig::Namespace => self.apply_namespace(spec),
            DesiredConfig::Secret { data } => self.apply_secret(spec, data),
            DesiredConfig::Manifest(source) => self.apply_manifest(spec, source),
            DesiredConfig::Release(release) => self.apply_release(spec, release),
        }
        .into();
        let elapsed = start.elapsed();

        match &outcome {
            Outcome::Success => sink.info(format!("{} applied", spec.label())),
            Outcome::Failure(f) => sink.warn(format!("{} not applied: {}", spec.label(), f.message)),
        }
        sink.metric(
            MetricEvent::histogram_ms("apply.duration", elapsed)
                .tag("kind", kind.as_str())
                .tag("status", outcome.label()),
        );
        sink.metric(
            MetricEvent::counter("apply.count", 1.0)
                .tag("kind", kind.as_str())
                .tag("status", outcome.label()),
        );
        span.record_outcome(&outcome);
        outcome
    }

    /// Trimmed stdout of a read-only `kubectl` query. Non-zero exit is an
    /// error.
    pub fn kubectl_output<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let record = self
            .exec
            .execute(&Invocation::new("kubectl", args), ExecOptions::CHECKED)?;
        Ok(record.stdout_trimmed().to_string())
    }

    /// Run a command with inherited output, ignoring its exit code.
    pub fn show<I, S>(&self, program: &str, args: I) -> Result<ExecutionRecord>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec
            .execute(&Invocation::new(program, args), ExecOptions::PASSTHROUGH)
    }

    // -----------------------------------------------------------------------
    // Per-kind strategies
    // -----------------------------------------------------------------------

    fn apply_namespace(&self, spec: &ResourceSpec) -> Step<()> {
        let render = Invocation::new(
            "kubectl",
            ["create", "namespace", spec.identity.as_str(), "--dry-run=client", "-o", "yaml"],
        );
        let doc = self.render(spec, &render)?;
        self.apply_stdin(spec, doc)
    }

    fn apply_secret(&self, spec: &ResourceSpec, data: &[(String, String)]) -> Step<()> {
        let doc = render_secret(spec, data)?;
        let apply = data.iter().fold(
            Invocation::new("kubectl", ["apply", "-f", "-"]).stdin(doc),
            |inv, (_, value)| inv.secret(value.clone()),
        );
        let record = self.run(&apply)?;
        self.check_applied(spec, &record)
    }

    fn apply_manifest(&self, spec: &ResourceSpec, source: &ManifestSource) -> Step<()> {
        let path = source.path();
        if !path.exists() {
            return Err(Failure::new(
                FailureKind::MissingInput,
                format!("{} not found", path.display()),
            ));
        }
        let path = path.display().to_string();
        let mut base = vec!["apply".to_string(), source.flag().to_string(), path];
        if let Some(ns) = &spec.namespace {
            base.push(format!("--namespace={ns}"));
        }

        let render = Invocation::new("kubectl", base.iter().cloned()).arg("--dry-run=client");
        self.render(spec, &render)?;

        let record = self.run(&Invocation::new("kubectl", base))?;
        self.check_applied(spec, &record)
    }

    fn apply_release(&self, spec: &ResourceSpec, release: &ReleaseSpec) -> Step<()> {
        if let Some(missing) = release.values_files.iter().find(|p| !p.exists()) {
            return Err(Failure::new(
                FailureKind::MissingInput,
                format!("{} not found", missing.display()),
            ));
        }
        let namespace = spec.namespace.as_deref().unwrap_or("default");
        let mut chart_args = vec![format!("--namespace={namespace}")];
        if let Some(version) = &release.version {
            chart_args.push(format!("--version={version}"));
        }
        for values in &release.values_files {
            chart_args.push(format!("--values={}", values.display()));
        }
        for pair in &release.set {
            chart_args.push(format!("--set={pair}"));
        }

        let render = Invocation::new(
            "helm",
            ["template".to_string(), spec.identity.clone(), release.chart.clone()],
        );
        let render = chart_args.iter().fold(render, |inv, a| inv.arg(a.clone()));
        self.render(spec, &render)?;

        let install = Invocation::new(
            "helm",
            [
                "upgrade".to_string(),
                "--install".to_string(),
                spec.identity.clone(),
                release.chart.clone(),
            ],
        );
        let install = chart_args
            .into_iter()
            .fold(install, |inv, a| inv.arg(a))
            .arg("--wait")
            .arg(format!("--timeout={}s", release.timeout.as_secs()));

        let record = self.run(&install)?;
        if record.success() {
            return Ok(());
        }
        let output = record.diagnostic();
        if record.duration >= release.timeout || contains_any(&output, TIMEOUT_MARKERS) {
            return Err(Failure::timeout(format!(
                "{} not ready within {}s: {}",
                spec.label(),
                release.timeout.as_secs(),
                output
            )));
        }
        Err(self.rejection(spec, &record, FailureKind::ExternalCommand))
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn run(&self, invocation: &Invocation) -> Step<ExecutionRecord> {
        self.exec
            .execute(invocation, ExecOptions::CAPTURE)
            .map_err(Failure::from)
    }

    /// Local render. Returns the rendered document verbatim.
    fn render(&self, spec: &ResourceSpec, invocation: &Invocation) -> Step<String> {
        let record = self
            .exec
            .execute(invocation, ExecOptions::RENDER)
            .map_err(Failure::from)?;
        if !record.success() {
            return Err(self.rejection(spec, &record, FailureKind::ResourceApply));
        }
        Ok(record.stdout.unwrap_or_default())
    }

    fn apply_stdin(&self, spec: &ResourceSpec, doc: String) -> Step<()> {
        let record = self.run(&Invocation::new("kubectl", ["apply", "-f", "-"]).stdin(doc))?;
        self.check_applied(spec, &record)
    }

    fn check_applied(&self, spec: &ResourceSpec, record: &ExecutionRecord) -> Step<()> {
        if record.success() {
            let change = record.stdout_trimmed();
            if !change.is_empty() {
                self.exec.sink().info(change.to_string());
            }
            return Ok(());
        }
        Err(self.rejection(spec, record, FailureKind::ExternalCommand))
    }

    fn rejection(&self, spec: &ResourceSpec, record: &ExecutionRecord, fallback: FailureKind) -> Failure {
        let output = record.diagnostic();
        let kind = classify(&output, fallback);
        Failure::new(
            kind,
            format!(
                "{} ('{}' exited with code {}): {}",
                spec.label(),
                record.command_line.join(" "),
                record.exit_code,
                output
            ),
        )
    }
}

/// Map tool output to the failure taxonomy. Transport problems win over
/// input rejections: kubectl reports an unreachable API server as
/// `error validating … failed to download openapi … connection refused`.
/// Anything unrecognised takes `fallback`.
pub fn classify(output: &str, fallback: FailureKind) -> FailureKind {
    if contains_any(output, TRANSPORT_MARKERS) {
        FailureKind::ExternalCommand
    } else if contains_any(output, INVALID_MARKERS) {
        FailureKind::ResourceApply
    } else {
        fallback
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SecretManifest<'a> {
    api_version: &'static str,
    kind: &'static str,
    metadata: ObjectMeta<'a>,
    #[serde(rename = "type")]
    secret_type: &'static str,
    string_data: BTreeMap<&'a str, &'a str>,
}

#[derive(Serialize)]
struct ObjectMeta<'a> {
    name: &'a str,
    namespace: &'a str,
}

/// Opaque Secret as YAML. `stringData` lets the API server do the base64
/// encoding.
fn render_secret(spec: &ResourceSpec, data: &[(String, String)]) -> Step<String> {
    let manifest = SecretManifest {
        api_version: "v1",
        kind: "Secret",
        metadata: ObjectMeta {
            name: &spec.identity,
            namespace: spec.namespace.as_deref().unwrap_or("default"),
        },
        secret_type: "Opaque",
        string_data: data.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect(),
    };
    serde_yaml::to_string(&manifest).map_err(|e| {
        Failure::new(
            FailureKind::ResourceApply,
            format!("{}: cannot render: {e}", spec.label()),
        )
    })
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
