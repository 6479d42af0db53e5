//! Test doubles for the process boundary.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::io;

use crate::executor::{Invocation, RawOutput, Runner};

fn not_found(program: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{program}: not found"))
}

fn ok(stdout: impl Into<String>) -> io::Result<RawOutput> {
    Ok(RawOutput {
        exit_code: 0,
        stdout: Some(stdout.into()),
        stderr: Some(String::new()),
    })
}

fn fail(code: i32, stderr: impl Into<String>) -> io::Result<RawOutput> {
    Ok(RawOutput {
        exit_code: code,
        stdout: Some(String::new()),
        stderr: Some(stderr.into()),
    })
}

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

/// Answers invocations by command-line prefix; anything unmatched exits 0.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: Vec<(String, RawOutput)>,
    missing: BTreeSet<String>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, prefix: &str, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        self.responses.push((
            prefix.to_string(),
            RawOutput {
                exit_code,
                stdout: Some(stdout.to_string()),
                stderr: Some(stderr.to_string()),
            },
        ));
        self
    }

    pub fn missing(mut self, program: &str) -> Self {
        self.missing.insert(program.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl Runner for ScriptedRunner {
    fn run(&self, invocation: &Invocation, _capture_output: bool) -> io::Result<RawOutput> {
        let line = invocation.argv().join(" ");
        self.calls.borrow_mut().push(line.clone());
        if self.missing.contains(&invocation.program) {
            return Err(not_found(&invocation.program));
        }
        Ok(self
            .responses
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default())
    }

    fn locate(&self, program: &str) -> bool {
        !self.missing.contains(program)
    }
}

// ---------------------------------------------------------------------------
// FakeCluster
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ClusterState {
    /// `kind/namespace/name` → applied document.
    resources: BTreeMap<String, String>,
    /// release name → (chart, revision).
    releases: BTreeMap<String, (String, u32)>,
    kind_clusters: BTreeSet<String>,
    mutations: u32,
    deployment_polls: u32,
    calls: Vec<String>,
}

/// An in-memory stand-in for helm, kubectl and kind.
///
/// Applies are idempotent the way the real tools are: re-applying an identical
/// document reports `unchanged` and does not count as a mutation.
#[derive(Default)]
pub struct FakeCluster {
    state: RefCell<ClusterState>,
    missing: BTreeSet<String>,
    unreachable: bool,
    helm_times_out: bool,
    invalid_marker: Option<String>,
    deployments_ready_after: Option<u32>,
    external_ip: Option<String>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            deployments_ready_after: Some(0),
            ..Self::default()
        }
    }

    /// Requests that need the API server fail as if it were down.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn missing(mut self, program: &str) -> Self {
        self.missing.insert(program.to_string());
        self
    }

    pub fn helm_times_out(mut self) -> Self {
        self.helm_times_out = true;
        self
    }

    /// Server-side apply rejects documents containing `marker`.
    pub fn reject_containing(mut self, marker: &str) -> Self {
        self.invalid_marker = Some(marker.to_string());
        self
    }

    /// Deployments report available after `polls` unsuccessful queries;
    /// `None` means never.
    pub fn deployments_ready_after(mut self, polls: Option<u32>) -> Self {
        self.deployments_ready_after = polls;
        self
    }

    pub fn with_external_ip(mut self, ip: &str) -> Self {
        self.external_ip = Some(ip.to_string());
        self
    }

    pub fn with_kind_cluster(self, name: &str) -> Self {
        self.state.borrow_mut().kind_clusters.insert(name.to_string());
        self
    }

    pub fn mutations(&self) -> u32 {
        self.state.borrow().mutations
    }

    pub fn resource(&self, key: &str) -> Option<String> {
        self.state.borrow().resources.get(key).cloned()
    }

    pub fn resource_keys(&self) -> Vec<String> {
        self.state.borrow().resources.keys().cloned().collect()
    }

    pub fn release_revision(&self, name: &str) -> Option<u32> {
        self.state.borrow().releases.get(name).map(|(_, rev)| *rev)
    }

    pub fn kind_clusters(&self) -> Vec<String> {
        self.state.borrow().kind_clusters.iter().cloned().collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn calls_to(&self, program: &str) -> usize {
        let prefix = format!("{program} ");
        self.calls().iter().filter(|c| c.starts_with(&prefix)).count()
    }

    /// What kubectl prints when the API server is down. `apply` fails while
    /// fetching the OpenAPI schema for validation, even with a client dry run.
    fn refused(args: &[String]) -> io::Result<RawOutput> {
        if args.first().is_some_and(|a| a == "apply") {
            return fail(
                1,
                "error: error validating \"STDIN\": error validating data: failed to download openapi: \
                 Get \"https://127.0.0.1:6443/openapi/v2?timeout=32s\": dial tcp 127.0.0.1:6443: \
                 connect: connection refused; if you choose to ignore these errors, turn validation off \
                 with --validate=false",
            );
        }
        fail(
            1,
            "The connection to the server 127.0.0.1:6443 was refused - did you specify the right host or port?",
        )
    }

    fn kubectl(&self, args: &[String], stdin: Option<&str>) -> io::Result<RawOutput> {
        let dry_run = args.iter().any(|a| a == "--dry-run=client");
        let local_render = dry_run && args.first().is_some_and(|a| a == "create");
        if self.unreachable && !local_render {
            return Self::refused(args);
        }
        let namespace = flag_value(args, "--namespace", "-n").unwrap_or_else(|| "default".into());
        let words: Vec<&str> = args.iter().map(String::as_str).collect();

        match words.as_slice() {
            ["create", "namespace", name, ..] => ok(format!(
                "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: {name}\n"
            )),
            ["apply", "-f", "-"] => self.apply_document(stdin.unwrap_or("")),
            ["apply", ..] if dry_run => ok("configured (dry run)\n"),
            ["apply", flag, path, ..] if *flag == "-f" || *flag == "-k" => {
                self.store(&format!("manifest/{namespace}/{path}"), path)
            }
            ["get", "deployments", ..] => self.deployments_json(),
            ["get", "service", ..] => ok(self.external_ip.clone().unwrap_or_default()),
            ["get", "pods", ..] => ok("NAME READY STATUS\nstore-front-1 1/1 Running\n"),
            ["config", "use-context", _] => ok("Switched context.\n"),
            ["rollout", "status", ..] => ok("daemon set successfully rolled out\n"),
            _ => ok(""),
        }
    }

    fn apply_document(&self, doc: &str) -> io::Result<RawOutput> {
        if let Some(marker) = &self.invalid_marker {
            if doc.contains(marker.as_str()) {
                return fail(
                    1,
                    "error: error validating \"STDIN\": error validating data: unknown field",
                );
            }
        }
        let kind = yaml_field(doc, "kind:").unwrap_or_else(|| "Unknown".into());
        let name = yaml_field(doc, "name:").unwrap_or_else(|| "unnamed".into());
        let namespace = yaml_field(doc, "namespace:").unwrap_or_default();
        self.store(&format!("{kind}/{namespace}/{name}"), doc)
    }

    fn store(&self, key: &str, doc: &str) -> io::Result<RawOutput> {
        let mut state = self.state.borrow_mut();
        let verb = match state.resources.get(key) {
            Some(existing) if existing == doc => "unchanged",
            Some(_) => "configured",
            None => "created",
        };
        if verb != "unchanged" {
            state.mutations += 1;
            state.resources.insert(key.to_string(), doc.to_string());
        }
        ok(format!("{key} {verb}\n"))
    }

    fn deployments_json(&self) -> io::Result<RawOutput> {
        let mut state = self.state.borrow_mut();
        let polls = state.deployment_polls;
        state.deployment_polls += 1;
        let ready = self.deployments_ready_after.is_some_and(|n| polls >= n);
        let available = if ready { 1 } else { 0 };
        let status = if ready { "True" } else { "False" };
        ok(format!(
            r#"{{"items":[{{"metadata":{{"name":"store-front"}},"spec":{{"replicas":1}},"status":{{"availableReplicas":{available},"conditions":[{{"type":"Available","status":"{status}"}}]}}}}]}}"#
        ))
    }

    fn helm(&self, args: &[String]) -> io::Result<RawOutput> {
        let words: Vec<&str> = args.iter().map(String::as_str).collect();
        match words.as_slice() {
            ["repo", ..] => ok(""),
            ["template", ..] => {
                if let Some(marker) = &self.invalid_marker {
                    if args.iter().any(|a| a.contains(marker.as_str())) {
                        return fail(1, "Error: template: parse error: bad values");
                    }
                }
                ok("---\n# rendered\n")
            }
            ["upgrade", "--install", release, chart, ..] => {
                if self.unreachable {
                    return fail(1, "Error: Kubernetes cluster unreachable: connection refused");
                }
                if self.helm_times_out {
                    return fail(1, "Error: UPGRADE FAILED: context deadline exceeded");
                }
                let mut state = self.state.borrow_mut();
                let entry = state
                    .releases
                    .entry(release.to_string())
                    .or_insert_with(|| (chart.to_string(), 0));
                entry.1 += 1;
                let revision = entry.1;
                state.mutations += u32::from(revision == 1);
                ok(format!("Release \"{release}\" has been upgraded. REVISION: {revision}\n"))
            }
            _ => ok(""),
        }
    }

    fn kind(&self, args: &[String]) -> io::Result<RawOutput> {
        let name = flag_value(args, "--name", "--name").unwrap_or_else(|| "kind".into());
        let words: Vec<&str> = args.iter().map(String::as_str).collect();
        let mut state = self.state.borrow_mut();
        match words.as_slice() {
            ["get", "clusters"] => {
                let list: Vec<String> = state.kind_clusters.iter().cloned().collect();
                ok(list.join("\n"))
            }
            ["create", "cluster", ..] => {
                if !state.kind_clusters.insert(name.clone()) {
                    return fail(1, format!("ERROR: node(s) already exist for a cluster with the name \"{name}\""));
                }
                state.mutations += 1;
                ok("")
            }
            ["delete", "cluster", ..] => {
                state.kind_clusters.remove(&name);
                state.mutations += 1;
                ok("")
            }
            _ => ok(""),
        }
    }
}

impl Runner for FakeCluster {
    fn run(&self, invocation: &Invocation, _capture_output: bool) -> io::Result<RawOutput> {
        self.state
            .borrow_mut()
            .calls
            .push(invocation.argv().join(" "));
        if self.missing.contains(&invocation.program) {
            return Err(not_found(&invocation.program));
        }
        match invocation.program.as_str() {
            "kubectl" => self.kubectl(&invocation.args, invocation.stdin.as_deref()),
            "helm" => self.helm(&invocation.args),
            "kind" => self.kind(&invocation.args),
            _ => ok(""),
        }
    }

    fn locate(&self, program: &str) -> bool {
        !self.missing.contains(program)
    }
}

fn flag_value(args: &[String], long: &str, short: &str) -> Option<String> {
    let prefix = format!("{long}=");
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(v) = arg.strip_prefix(&prefix) {
            return Some(v.to_string());
        }
        if arg == long || arg == short {
            return iter.next().cloned();
        }
    }
    None
}

fn yaml_field(doc: &str, key: &str) -> Option<String> {
    doc.lines()
        .map(str::trim)
        .find_map(|l| l.strip_prefix(key))
        .map(|v| v.trim().to_string())
}
