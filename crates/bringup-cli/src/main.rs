mod cmd;

use bringup_cli::telemetry::{self, LogFormat};
use bringup_core::plan::{CommandName, CommandOptions};
use clap::{Args, Parser, Subcommand};
use cmd::{cluster::ClusterSubcommand, config::ConfigSubcommand, GlobalArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "bringup",
    about = "Idempotent Kubernetes environment bring-up: Helm repos, Datadog agent, sample app, local KIND clusters",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ./bringup.yaml when present)
    #[arg(long, global = true, env = "BRINGUP_CONFIG")]
    config: Option<PathBuf>,

    /// Output the run summary as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Enable debug logging
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    /// Log line format
    #[arg(
        long,
        global = true,
        env = "BRINGUP_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Text
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct AgentArgs {
    /// Datadog API key
    #[arg(long, env = "DD_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Cluster name reported to Datadog
    #[arg(long)]
    cluster_name: Option<String>,
}

impl AgentArgs {
    fn into_options(self) -> CommandOptions {
        CommandOptions {
            api_key: self.api_key,
            cluster_name: self.cluster_name,
            ..CommandOptions::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Add and update Helm repositories
    Repos,

    /// Install or upgrade the Datadog agent via Helm
    InstallAgent {
        #[command(flatten)]
        agent: AgentArgs,
    },

    /// Deploy the AKS Store Demo sample app and wait for it
    DeployApp,

    /// Run repos, install-agent and deploy-app in order
    RunAll {
        #[command(flatten)]
        agent: AgentArgs,
    },

    /// Manage the local KIND cluster
    Cluster {
        #[command(subcommand)]
        subcommand: ClusterSubcommand,
    },

    /// Inspect and validate the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    telemetry::init_logging(cli.verbose, cli.log_format);

    let global = GlobalArgs {
        config: cli.config,
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Repos => cmd::run_plan(&global, CommandName::Repos, CommandOptions::default()),
        Commands::InstallAgent { agent } => {
            cmd::run_plan(&global, CommandName::InstallAgent, agent.into_options())
        }
        Commands::DeployApp => {
            cmd::run_plan(&global, CommandName::DeployApp, CommandOptions::default())
        }
        Commands::RunAll { agent } => {
            cmd::run_plan(&global, CommandName::RunAll, agent.into_options())
        }
        Commands::Cluster { subcommand } => cmd::cluster::run(&global, subcommand),
        Commands::Config { subcommand } => cmd::config::run(&global, subcommand),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
