mod commands;
mod context;
mod help;
mod output;
mod theme;

use anyhow::Result;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand, error::ErrorKind};

use commands::{
    generate::{GenerateArgs, handle_generate},
    init::{InitArgs, handle_init},
    migrate::{MigrateCommands, handle_migrate_commands},
};
use output::{GlobalOptions, OutputFormat, OutputManager};

#[derive(Parser)]
#[command(name = "docdrift")]
#[command(version)]
#[command(
    about = "Schema drift detection and reversible migrations for document stores",
    long_about = r#"Schema drift detection and migration CLI that provides:

• Deterministic snapshot hashing and structural diffs
• Safety-classified, reversible migration scripts
• Transactional execution with a non-transactional fallback
• A ledger of generated and applied migrations

Commands:
  init      Initialize docdrift in a project
  generate  Diff snapshots and write a migration script
  migrate   Apply, roll back and inspect migrations
"#
)]
#[command(subcommand_required = true, arg_required_else_help = true)]
struct Cli {
    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    output: OutputFormat,

    /// Suppress output (only errors will be shown)
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Enable verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn parse_with_styles() -> Self {
        let matches = match help::decorate(Cli::command()).try_get_matches() {
            Ok(matches) => matches,
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::MissingSubcommand | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) =>
            {
                help::missing_subcommand(help::decorate(Cli::command()), err.exit_code())
            }
            Err(err) => err.exit(),
        };
        Cli::from_arg_matches(&matches).unwrap_or_else(|err| err.exit())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize docdrift in the current project
    Init(InitArgs),

    /// Diff the observed and declared snapshots and write a migration script
    Generate(GenerateArgs),

    /// Apply, roll back and inspect migrations
    #[command(subcommand)]
    Migrate(MigrateCommands),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse_with_styles();

    let default_filter = if cli.verbose { "docdrift=debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(err) = execute(cli).await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let global_options = GlobalOptions {
        output_format: cli.output,
        quiet: cli.quiet,
        verbose: cli.verbose,
        no_color: cli.no_color,
    };

    let output = OutputManager::new(global_options);

    match cli.command {
        Commands::Init(args) => {
            handle_init(args, &output).await?;
        }
        Commands::Generate(args) => {
            handle_generate(args, &output).await?;
        }
        Commands::Migrate(migrate_cmd) => {
            handle_migrate_commands(migrate_cmd, &output).await?;
        }
    }

    Ok(())
}
