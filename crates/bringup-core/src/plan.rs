//! Command plans: which steps a command runs, and what each step does.

use std::fmt;

use serde::Serialize;

use crate::applier::{Applier, ManifestSource, ReleaseSpec, ResourceSpec};
use crate::cluster::{preflight, ClusterManager, ConflictPolicy, ConflictResolver};
use crate::config::{Config, HelmRepo};
use crate::executor::{ExecOptions, Executor, Invocation, Runner};
use crate::outcome::{Failure, FailureKind, Outcome};
use crate::sequencer::{SequenceResult, Sequencer, Step};
use crate::sink::Sink;
use crate::waiter::{deployments_available, wait_until};

type StepResult = std::result::Result<(), Failure>;

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandName {
    Repos,
    InstallAgent,
    DeployApp,
    RunAll,
    ClusterUp,
    ClusterDeploy,
    ClusterDelete,
    ClusterCilium,
}

impl CommandName {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandName::Repos => "repos",
            CommandName::InstallAgent => "install-agent",
            CommandName::DeployApp => "deploy-app",
            CommandName::RunAll => "run-all",
            CommandName::ClusterUp => "cluster-up",
            CommandName::ClusterDeploy => "cluster-deploy",
            CommandName::ClusterDelete => "cluster-delete",
            CommandName::ClusterCilium => "cluster-cilium",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-supplied settings. Anything left unset falls back to the config
/// file, then to built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    pub api_key: Option<String>,
    /// Datadog cluster tag for agent commands; KIND cluster name for
    /// `cluster` commands.
    pub cluster_name: Option<String>,
    pub with_cilium: bool,
    /// Overrides the context's conflict resolver for `cluster up`.
    pub conflict: Option<ConflictPolicy>,
}

#[derive(Debug, Clone)]
pub struct Command {
    pub name: CommandName,
    pub options: CommandOptions,
}

impl Command {
    pub fn new(name: CommandName, options: CommandOptions) -> Self {
        Self { name, options }
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything a step action may touch. Built once per run.
pub struct Context<'a> {
    pub command: Command,
    pub config: Config,
    runner: &'a dyn Runner,
    sink: &'a Sink,
    resolver: &'a dyn ConflictResolver,
}

impl<'a> Context<'a> {
    /// Existing clusters are reused unless a resolver says otherwise.
    pub fn new(command: Command, config: Config, runner: &'a dyn Runner, sink: &'a Sink) -> Self {
        Self {
            command,
            config,
            runner,
            sink,
            resolver: &ConflictPolicy::Reuse,
        }
    }

    pub fn with_resolver(mut self, resolver: &'a dyn ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn sink(&self) -> &'a Sink {
        self.sink
    }

    pub fn exec(&self) -> Executor<'a> {
        Executor::new(self.runner, self.sink)
    }

    pub fn applier(&self) -> Applier<'a> {
        Applier::new(self.exec())
    }

    pub fn options(&self) -> &CommandOptions {
        &self.command.options
    }

    pub fn kind_cluster_name(&self) -> String {
        self.options()
            .cluster_name
            .clone()
            .unwrap_or_else(|| self.config.kind.cluster_name.clone())
    }

    pub fn cluster(&self) -> ClusterManager<'a> {
        ClusterManager::new(
            self.exec(),
            self.kind_cluster_name(),
            self.config.resolve(&self.config.kind.config_file),
        )
    }
}

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

/// The ordered steps for `command`.
pub fn steps_for<'a>(command: &Command) -> Vec<Step<Context<'a>>> {
    match command.name {
        CommandName::Repos => vec![helm_repos_step()],
        CommandName::InstallAgent => vec![install_agent_step()],
        CommandName::DeployApp => vec![deploy_app_step()],
        CommandName::RunAll => vec![helm_repos_step(), install_agent_step(), deploy_app_step()],
        CommandName::ClusterUp => {
            let mut steps = vec![
                preflight_step(false),
                Step::new("create-cluster", "Create KIND cluster", |ctx: &Context<'a>| {
                    Outcome::from(create_cluster(ctx))
                }),
                use_context_step(),
            ];
            if command.options.with_cilium {
                steps.push(Step::new(
                    "install-cilium",
                    "Install Cilium CNI (optional)",
                    |ctx: &Context<'a>| {
                        if let Err(f) = install_cilium(ctx) {
                            ctx.sink().warn(format!(
                                "Cilium installation failed, continuing without NetworkPolicy: {}",
                                f.message
                            ));
                        }
                        Outcome::Success
                    },
                ));
            }
            steps.push(deploy_local_app_step());
            steps
        }
        CommandName::ClusterDeploy => vec![
            preflight_step(false),
            use_context_step(),
            deploy_local_app_step(),
        ],
        CommandName::ClusterDelete => vec![
            preflight_step(false),
            Step::new("delete-cluster", "Delete KIND cluster", |ctx: &Context<'a>| {
                Outcome::from(ctx.cluster().delete())
            }),
        ],
        CommandName::ClusterCilium => vec![
            preflight_step(true),
            Step::new("install-cilium", "Install Cilium CNI", |ctx: &Context<'a>| {
                Outcome::from(install_cilium(ctx))
            }),
        ],
    }
}

/// Run `ctx.command` to completion.
pub fn execute(ctx: &Context<'_>) -> SequenceResult {
    let steps = steps_for(&ctx.command);
    Sequencer::new(ctx.sink(), ctx.command.name.as_str()).run(&steps, ctx)
}

fn helm_repos_step<'a>() -> Step<Context<'a>> {
    Step::new("helm-repos", "Add and update Helm repositories", |ctx: &Context<'a>| {
        Outcome::from(helm_repos(ctx))
    })
}

fn install_agent_step<'a>() -> Step<Context<'a>> {
    Step::new("install-agent", "Install Datadog agent via Helm", |ctx: &Context<'a>| {
        Outcome::from(install_agent(ctx))
    })
}

fn deploy_app_step<'a>() -> Step<Context<'a>> {
    Step::new("deploy-app", "Deploy AKS Store Demo", |ctx: &Context<'a>| {
        Outcome::from(deploy_app(ctx))
    })
}

fn preflight_step<'a>(with_helm: bool) -> Step<Context<'a>> {
    Step::new("preflight", "Check required tools", move |ctx: &Context<'a>| {
        let mut tools = ctx.config.kind.required_tools.clone();
        if with_helm {
            tools.push("helm".to_string());
        }
        Outcome::from(preflight(&ctx.exec(), &tools))
    })
}

fn use_context_step<'a>() -> Step<Context<'a>> {
    Step::new("use-context", "Switch kubectl context", |ctx: &Context<'a>| {
        Outcome::from(ctx.cluster().use_context())
    })
}

fn deploy_local_app_step<'a>() -> Step<Context<'a>> {
    Step::new("deploy-local-app", "Deploy AKS Store Demo with kustomize", |ctx: &Context<'a>| {
        Outcome::from(deploy_local_app(ctx))
    })
}

// ---------------------------------------------------------------------------
// Step actions
// ---------------------------------------------------------------------------

fn helm_repos(ctx: &Context) -> StepResult {
    let exec = ctx.exec();
    for repo in &ctx.config.repos {
        helm_repo_add(&exec, repo)?;
    }
    warn_on_failure(
        &exec,
        &Invocation::new("helm", ["repo", "update"]),
        "helm repo update failed",
    )?;
    exec.execute(&Invocation::new("helm", ["repo", "list"]), ExecOptions::PASSTHROUGH)?;
    Ok(())
}

fn install_agent(ctx: &Context) -> StepResult {
    let agent = &ctx.config.agent;
    let api_key = ctx
        .options()
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| Failure::new(FailureKind::MissingInput, "--api-key or DD_API_KEY required"))?;

    let values = ctx.config.resolve(&agent.values_file);
    if !values.exists() {
        return Err(Failure::new(
            FailureKind::MissingInput,
            format!("{} not found", values.display()),
        ));
    }

    let applier = ctx.applier();
    applier
        .apply(&ResourceSpec::namespace(agent.namespace.clone()))
        .into_result()?;
    applier
        .apply(&ResourceSpec::secret(
            agent.secret_name.clone(),
            agent.namespace.clone(),
            vec![("api-key".to_string(), api_key)],
        ))
        .into_result()?;

    let cluster_name = ctx
        .options()
        .cluster_name
        .clone()
        .unwrap_or_else(|| agent.cluster_name.clone());
    let release = ReleaseSpec {
        chart: agent.chart.clone(),
        version: Some(agent.chart_version.clone()),
        values_files: vec![values],
        set: vec![
            format!("datadog.apiKeyExistingSecret={}", agent.secret_name),
            format!("datadog.site={}", agent.site),
            format!("datadog.clusterName={cluster_name}"),
            format!("agents.image.tag={}", agent.agent_version),
            "clusterAgent.enabled=true".to_string(),
            format!("clusterAgent.image.tag={}", agent.agent_version),
        ],
        timeout: agent.timeout(),
    };
    applier
        .apply(&ResourceSpec::release(
            agent.release.clone(),
            agent.namespace.clone(),
            release,
        ))
        .into_result()?;

    ctx.sink().info(format!(
        "Datadog installed. Verify: kubectl get pods -n {}",
        agent.namespace
    ));
    Ok(())
}

fn deploy_app(ctx: &Context) -> StepResult {
    let app = &ctx.config.app;
    let manifest = ManifestSource::File(ctx.config.resolve(&app.manifest));
    ctx.applier()
        .apply(&ResourceSpec::manifest(manifest, None))
        .into_result()?;

    wait_for_workload(ctx);

    let jsonpath = "jsonpath={.status.loadBalancer.ingress[0].ip}";
    let ip = ctx
        .applier()
        .kubectl_output(["get", "service", app.service.as_str(), "-n", app.namespace.as_str(), "-o", jsonpath])
        .unwrap_or_default();
    if ip.is_empty() {
        ctx.sink().info(format!(
            "External IP pending. Check: kubectl get service {} -n {}",
            app.service, app.namespace
        ));
    } else {
        ctx.sink().info(format!("Store Front URL: http://{ip}"));
    }

    show_pods(ctx);
    Ok(())
}

fn deploy_local_app(ctx: &Context) -> StepResult {
    let source = ManifestSource::Kustomize(ctx.config.resolve(&ctx.config.kind.kustomize_dir));
    ctx.applier()
        .apply(&ResourceSpec::manifest(source, None))
        .into_result()?;

    wait_for_workload(ctx);
    show_pods(ctx);
    ctx.sink()
        .info(format!("Store URL: {}", ctx.config.kind.url));
    Ok(())
}

fn create_cluster(ctx: &Context) -> StepResult {
    let cluster = ctx.cluster();
    let result = match ctx.options().conflict {
        Some(policy) => cluster.ensure(&policy),
        None => cluster.ensure(ctx.resolver),
    };
    result.map_err(Failure::from)
}

fn install_cilium(ctx: &Context) -> StepResult {
    let exec = ctx.exec();
    let cilium = &ctx.config.cilium;
    preflight(&exec, &["helm"])?;

    helm_repo_add(&exec, &cilium.repo)?;
    warn_on_failure(
        &exec,
        &Invocation::new("helm", ["repo", "update", cilium.repo.name.as_str()]),
        "helm repo update failed",
    )?;

    let release = ReleaseSpec {
        chart: cilium.chart.clone(),
        version: None,
        values_files: Vec::new(),
        set: cilium.set.clone(),
        timeout: std::time::Duration::from_secs(cilium.timeout_seconds),
    };
    ctx.applier()
        .apply(&ResourceSpec::release("cilium", cilium.namespace.clone(), release))
        .into_result()?;

    warn_on_failure(
        &exec,
        &Invocation::new(
            "kubectl",
            [
                "-n".to_string(),
                cilium.namespace.clone(),
                "rollout".to_string(),
                "status".to_string(),
                "daemonset/cilium".to_string(),
                format!("--timeout={}s", cilium.rollout_timeout_seconds),
            ],
        ),
        "cilium daemonset not rolled out yet",
    )?;
    ctx.sink()
        .info("Cilium installed - NetworkPolicy enforcement active");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn helm_repo_add(exec: &Executor<'_>, repo: &HelmRepo) -> StepResult {
    warn_on_failure(
        exec,
        &Invocation::new(
            "helm",
            ["repo", "add", repo.name.as_str(), repo.url.as_str(), "--force-update"],
        ),
        &format!("failed to add helm repo '{}'", repo.name),
    )
}

/// Run with inherited output. A non-zero exit is only a warning; a tool that
/// cannot be started is a failure.
fn warn_on_failure(exec: &Executor<'_>, invocation: &Invocation, warning: &str) -> StepResult {
    let record = exec.execute(invocation, ExecOptions::PASSTHROUGH)?;
    if !record.success() {
        exec.sink()
            .warn(format!("{warning} (exit code {})", record.exit_code));
    }
    Ok(())
}

/// Wait for the app namespace to converge. Running out of time is reported
/// but does not fail the step.
fn wait_for_workload(ctx: &Context) {
    let app = &ctx.config.app;
    let exec = ctx.exec();
    let what = format!("deployments in '{}'", app.namespace);
    let outcome = wait_until(
        ctx.sink(),
        &what,
        app.poll_interval(),
        app.wait_timeout(),
        || deployments_available(&exec, &app.namespace),
    );
    if let Outcome::Failure(f) = outcome {
        ctx.sink()
            .warn(format!("Timed out waiting for deployments: {}", f.message));
    }
}

fn show_pods(ctx: &Context) {
    let namespace = ctx.config.app.namespace.as_str();
    if let Err(e) = ctx.applier().show("kubectl", ["get", "pods", "-n", namespace]) {
        ctx.sink().warn(format!("could not list pods: {e}"));
    }
}
