//! Local KIND cluster lifecycle.
//!
//! Cluster existence is never cached: every operation asks `kind get
//! clusters` again, so a cluster created or deleted out of band is seen on
//! the next call.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::{BringupError, Result};
use crate::executor::{ExecOptions, Executor, Invocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Existence {
    Absent,
    Present,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterState {
    pub name: String,
    pub existence: Existence,
}

// ---------------------------------------------------------------------------
// Conflict resolution
// ---------------------------------------------------------------------------

/// What to do when asked to create a cluster that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    Reuse,
    Recreate,
    Fail,
}

/// Decides a [`ConflictPolicy`] for a named cluster, possibly by asking the
/// operator.
pub trait ConflictResolver {
    fn resolve(&self, cluster: &str) -> ConflictPolicy;
}

impl ConflictResolver for ConflictPolicy {
    fn resolve(&self, _cluster: &str) -> ConflictPolicy {
        *self
    }
}

// ---------------------------------------------------------------------------
// Preflight
// ---------------------------------------------------------------------------

/// Fail with `MissingInput` naming every tool not found on `PATH`.
pub fn preflight<S: AsRef<str>>(exec: &Executor<'_>, tools: &[S]) -> Result<()> {
    let missing: Vec<&str> = tools
        .iter()
        .map(AsRef::as_ref)
        .filter(|t| !exec.locate(t))
        .collect();
    if missing.is_empty() {
        let names: Vec<&str> = tools.iter().map(AsRef::as_ref).collect();
        exec.sink().info(format!("found {}", names.join(", ")));
        return Ok(());
    }
    Err(BringupError::MissingInput(format!(
        "required tools not installed: {}",
        missing.join(", ")
    )))
}

// ---------------------------------------------------------------------------
// ClusterManager
// ---------------------------------------------------------------------------

pub struct ClusterManager<'a> {
    exec: Executor<'a>,
    name: String,
    config_file: PathBuf,
}

impl<'a> ClusterManager<'a> {
    pub fn new(exec: Executor<'a>, name: impl Into<String>, config_file: PathBuf) -> Self {
        Self {
            exec,
            name: name.into(),
            config_file,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// kubeconfig context kind writes for this cluster.
    pub fn context(&self) -> String {
        format!("kind-{}", self.name)
    }

    pub fn state(&self) -> Result<ClusterState> {
        let record = self
            .exec
            .execute(&Invocation::new("kind", ["get", "clusters"]), ExecOptions::CHECKED)?;
        let present = record
            .stdout_trimmed()
            .split_whitespace()
            .any(|c| c == self.name);
        Ok(ClusterState {
            name: self.name.clone(),
            existence: if present {
                Existence::Present
            } else {
                Existence::Absent
            },
        })
    }

    /// Create the cluster. An existing cluster is a `ClusterConflict`.
    pub fn create(&self) -> Result<()> {
        if self.state()?.existence == Existence::Present {
            return Err(BringupError::ClusterConflict(self.name.clone()));
        }
        if !self.config_file.exists() {
            return Err(BringupError::MissingInput(format!(
                "{} not found",
                self.config_file.display()
            )));
        }
        self.exec.sink().info(format!("creating kind cluster '{}'", self.name));
        let invocation = Invocation::new(
            "kind",
            [
                "create".to_string(),
                "cluster".to_string(),
                "--config".to_string(),
                self.config_file.display().to_string(),
                "--name".to_string(),
                self.name.clone(),
            ],
        );
        self.exec.execute(&invocation, streamed_checked())?;
        Ok(())
    }

    /// Delete the cluster. Deleting an absent cluster succeeds without
    /// calling `kind delete`.
    pub fn delete(&self) -> Result<()> {
        if self.state()?.existence == Existence::Absent {
            self.exec
                .sink()
                .info(format!("cluster '{}' does not exist", self.name));
            return Ok(());
        }
        self.exec.sink().info(format!("deleting cluster '{}'", self.name));
        let invocation = Invocation::new(
            "kind",
            ["delete", "cluster", "--name", self.name.as_str()],
        );
        self.exec.execute(&invocation, streamed_checked())?;
        Ok(())
    }

    /// Create the cluster, settling an existing one with `resolver`.
    pub fn ensure(&self, resolver: &dyn ConflictResolver) -> Result<()> {
        match self.create() {
            Err(BringupError::ClusterConflict(name)) => {
                self.exec
                    .sink()
                    .warn(format!("cluster '{name}' already exists"));
                match resolver.resolve(&name) {
                    ConflictPolicy::Reuse => {
                        self.exec.sink().info("using existing cluster");
                        Ok(())
                    }
                    ConflictPolicy::Recreate => {
                        self.delete()?;
                        self.create()
                    }
                    ConflictPolicy::Fail => Err(BringupError::ClusterConflict(name)),
                }
            }
            other => other,
        }
    }

    /// Point kubectl at this cluster.
    pub fn use_context(&self) -> Result<()> {
        let invocation = Invocation::new(
            "kubectl",
            ["config".to_string(), "use-context".to_string(), self.context()],
        );
        self.exec.execute(&invocation, ExecOptions::CHECKED)?;
        Ok(())
    }
}

fn streamed_checked() -> ExecOptions {
    ExecOptions {
        must_succeed: true,
        ..ExecOptions::PASSTHROUGH
    }
}
