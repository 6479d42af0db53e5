pub mod cluster;
pub mod config;

use std::path::PathBuf;

use anyhow::Context as _;
use bringup_cli::output::print_summary;
use bringup_cli::prompt::PromptResolver;
use bringup_cli::telemetry;
use bringup_core::config::{Config, WarnLevel};
use bringup_core::executor::SystemRunner;
use bringup_core::plan::{self, Command, CommandName, CommandOptions, Context};

/// Flags shared by every subcommand.
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub json: bool,
}

/// Load the config once, reporting validation problems. Errors abort.
pub fn load_config(global: &GlobalArgs) -> anyhow::Result<Config> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let config =
        Config::discover(global.config.as_deref(), &cwd).context("failed to load config")?;

    let mut errors = Vec::new();
    for w in config.validate() {
        match w.level {
            WarnLevel::Warning => tracing::warn!("config: {}", w.message),
            WarnLevel::Error => errors.push(w.message),
        }
    }
    if !errors.is_empty() {
        anyhow::bail!("invalid config: {}", errors.join("; "));
    }
    Ok(config)
}

/// Run one command plan end to end and print its summary. A failed plan is
/// returned as an error so the process exits 1.
pub fn run_plan(
    global: &GlobalArgs,
    name: CommandName,
    options: CommandOptions,
) -> anyhow::Result<()> {
    let config = load_config(global)?;

    let sink = telemetry::build_sink();
    let runner = SystemRunner;
    let resolver = PromptResolver;
    let ctx = Context::new(Command::new(name, options), config, &runner, &sink)
        .with_resolver(&resolver);

    let result = plan::execute(&ctx);
    sink.flush();

    print_summary(&result, global.json)?;
    if !result.overall.is_success() {
        anyhow::bail!("{} {}", result.command, result.overall);
    }
    Ok(())
}
