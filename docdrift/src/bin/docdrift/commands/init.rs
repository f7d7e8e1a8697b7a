use anyhow::{Context, Result};
use clap::Args;
use docdrift::DriftConfig;

use crate::context::ProjectContext;
use crate::help::ExampleGroup;
use crate::output::OutputManager;

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Initialize",
    commands: &[
        "docdrift init                         # Write .docdrift/config.toml with defaults",
        "docdrift init --migrations-dir db/migrations",
        "docdrift init --force                 # Overwrite an existing config",
    ],
}];

#[derive(Args)]
pub struct InitArgs {
    /// Directory for generated migration scripts, relative to the project root
    #[arg(long)]
    migrations_dir: Option<String>,

    /// Key prefix for documents stored in Redis
    #[arg(long)]
    prefix: Option<String>,

    /// Overwrite an existing configuration file
    #[arg(long)]
    force: bool,
}

pub async fn handle_init(args: InitArgs, output: &OutputManager) -> Result<()> {
    let root = std::env::current_dir().context("Failed to get current directory")?;
    let ctx = ProjectContext::from_root(root)?;

    output.heading("Initialize docdrift");

    if ctx.is_initialized() && !args.force {
        output.warning(&format!("Already initialized: {}", ctx.config_path.display()));
        output.info("Use --force to overwrite the configuration");
        return Ok(());
    }

    let mut config = DriftConfig::default();
    if let Some(dir) = args.migrations_dir {
        config.project.migrations_dir = dir;
    }
    if let Some(prefix) = args.prefix {
        config.redis.prefix = prefix;
    }

    config
        .save(&ctx.config_path)
        .with_context(|| format!("Failed to write {}", ctx.config_path.display()))?;
    output.success(&format!("Created {}", ctx.config_path.display()));

    let snapshots_dir = ctx.project_root.join(&config.project.snapshots_dir);
    let migrations_dir = ctx.project_root.join(&config.project.migrations_dir);
    for dir in [&snapshots_dir, &migrations_dir] {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        output.bullet(&format!("Directory: {}", dir.display()));
    }

    output.info("Next steps:");
    output.bullet("Export declared.json and observed.json snapshots into the snapshots directory");
    output.bullet("Run 'docdrift generate --name <slug>'");
    output.bullet("Set REDIS_URL and run 'docdrift migrate up'");

    Ok(())
}
