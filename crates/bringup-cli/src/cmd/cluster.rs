use bringup_core::cluster::ConflictPolicy;
use bringup_core::plan::{CommandName, CommandOptions};
use clap::Subcommand;

use super::{run_plan, GlobalArgs};

#[derive(Subcommand)]
pub enum ClusterSubcommand {
    /// Create the cluster and deploy the app
    Up {
        /// Install Cilium for NetworkPolicy support
        #[arg(long)]
        cilium: bool,

        /// Delete and recreate an existing cluster without asking
        #[arg(long, conflicts_with = "reuse")]
        recreate: bool,

        /// Keep an existing cluster without asking
        #[arg(long)]
        reuse: bool,

        /// KIND cluster name
        #[arg(long)]
        cluster_name: Option<String>,
    },

    /// Deploy the app to an existing cluster
    Deploy {
        /// KIND cluster name
        #[arg(long)]
        cluster_name: Option<String>,
    },

    /// Delete the cluster
    Delete {
        /// KIND cluster name
        #[arg(long)]
        cluster_name: Option<String>,
    },

    /// Install Cilium into an existing cluster
    Cilium {
        /// KIND cluster name
        #[arg(long)]
        cluster_name: Option<String>,
    },
}

pub fn run(global: &GlobalArgs, subcmd: ClusterSubcommand) -> anyhow::Result<()> {
    let (name, options) = match subcmd {
        ClusterSubcommand::Up {
            cilium,
            recreate,
            reuse,
            cluster_name,
        } => (
            CommandName::ClusterUp,
            CommandOptions {
                cluster_name,
                with_cilium: cilium,
                conflict: conflict_policy(recreate, reuse),
                ..CommandOptions::default()
            },
        ),
        ClusterSubcommand::Deploy { cluster_name } => {
            (CommandName::ClusterDeploy, named(cluster_name))
        }
        ClusterSubcommand::Delete { cluster_name } => {
            (CommandName::ClusterDelete, named(cluster_name))
        }
        ClusterSubcommand::Cilium { cluster_name } => {
            (CommandName::ClusterCilium, named(cluster_name))
        }
    };
    run_plan(global, name, options)
}

fn named(cluster_name: Option<String>) -> CommandOptions {
    CommandOptions {
        cluster_name,
        ..CommandOptions::default()
    }
}

/// `None` leaves the decision to the interactive prompt.
fn conflict_policy(recreate: bool, reuse: bool) -> Option<ConflictPolicy> {
    match (recreate, reuse) {
        (true, _) => Some(ConflictPolicy::Recreate),
        (false, true) => Some(ConflictPolicy::Reuse),
        (false, false) => None,
    }
}
