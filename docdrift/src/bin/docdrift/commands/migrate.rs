use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color as TableColor, Table};
use docdrift::executor::MigrationStatus;
use docdrift::{BatchReport, Executor, Phase};
use serde::Serialize;

use crate::context::ProjectContext;
use crate::help::ExampleGroup;
use crate::output::{GlobalOptions, OutputManager, TableDisplay};
use crate::theme::Mark;

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Apply Migrations",
        commands: &[
            "docdrift migrate up                  # Apply all pending migrations",
            "docdrift migrate up --dry-run        # Preview what would be applied",
            "docdrift migrate up --run-manual     # Also run drops after commit",
        ],
    },
    ExampleGroup {
        title: "Roll Back",
        commands: &[
            "docdrift migrate down                                   # Revert the last applied migration",
            "docdrift migrate down --target 20241228_100000_init     # Revert everything after it",
        ],
    },
    ExampleGroup {
        title: "Inspect",
        commands: &[
            "docdrift migrate status",
            "docdrift --output json migrate status",
        ],
    },
];

#[derive(Subcommand)]
pub enum MigrateCommands {
    /// Apply pending migrations in filename order
    #[command(name = "up")]
    Up {
        /// Preview what would be applied without making changes
        #[arg(long)]
        dry_run: bool,

        /// Run manual commands (drops) after each migration commits
        #[arg(long)]
        run_manual: bool,
    },

    /// Roll back the last applied migration, or everything after --target
    #[command(name = "down")]
    Down {
        /// Keep this migration applied and revert every later one
        #[arg(long)]
        target: Option<String>,

        /// Preview what would be reverted without making changes
        #[arg(long)]
        dry_run: bool,
    },

    /// Show applied and pending migrations
    #[command(name = "status")]
    Status,
}

#[derive(Serialize)]
#[serde(transparent)]
struct ReportView<'a>(&'a BatchReport);

impl TableDisplay for ReportView<'_> {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = OutputManager::table(
            options,
            &["Migration", "Phase", "Transactional", "Commands", "Documents", "Manual", "Time"],
        );
        for outcome in &self.0.outcomes {
            let phase = Cell::new(outcome.phase.to_string());
            let phase = match (options.no_color, outcome.phase) {
                (true, _) => phase,
                (false, Phase::Committed) => phase.fg(TableColor::Green),
                (false, Phase::Failed) => phase.fg(TableColor::Red),
                (false, _) => phase.fg(TableColor::Yellow),
            };
            table.add_row(vec![
                Cell::new(&outcome.filename),
                phase,
                Cell::new(if outcome.transactional { "yes" } else { "no" }),
                Cell::new(outcome.commands_run),
                Cell::new(outcome.documents_affected),
                Cell::new(outcome.manual.len()),
                Cell::new(format!("{}ms", outcome.execution_time_ms)),
            ]);
        }
        table
    }

    fn to_compact(&self) -> String {
        let status = if self.0.is_success() { "ok" } else { "failed" };
        format!(
            "{} {status}: {} of {} migration(s){}",
            self.0.direction,
            self.0.succeeded,
            self.0.outcomes.len(),
            if self.0.dry_run { " (dry run)" } else { "" }
        )
    }
}

#[derive(Serialize)]
#[serde(transparent)]
struct StatusView(Vec<MigrationStatus>);

impl TableDisplay for StatusView {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = OutputManager::table(options, &["Migration", "State", "Applied At", "File"]);
        for status in &self.0 {
            let state = if status.applied { "applied" } else { "pending" };
            let state = if options.no_color {
                Cell::new(state)
            } else if status.applied {
                Cell::new(state).fg(TableColor::Green)
            } else {
                Cell::new(state).fg(TableColor::Yellow)
            };
            table.add_row(vec![
                Cell::new(&status.filename),
                state,
                Cell::new(
                    status
                        .applied_at
                        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                        .unwrap_or_default(),
                ),
                Cell::new(if status.file_present { "present" } else { "missing" }),
            ]);
        }
        table
    }

    fn to_compact(&self) -> String {
        let applied = self.0.iter().filter(|s| s.applied).count();
        format!("{applied} applied, {} pending", self.0.len() - applied)
    }
}

pub async fn handle_migrate_commands(command: MigrateCommands, output: &OutputManager) -> Result<()> {
    let ctx = ProjectContext::find()?;

    if !ctx.is_initialized() {
        output.error("docdrift is not initialized in this project.");
        output.info("Run 'docdrift init' first to initialize.");
        anyhow::bail!("Project not initialized");
    }

    match command {
        MigrateCommands::Up { dry_run, run_manual } => handle_up(&ctx, dry_run, run_manual, output).await,
        MigrateCommands::Down { target, dry_run } => handle_down(&ctx, target.as_deref(), dry_run, output).await,
        MigrateCommands::Status => handle_status(&ctx, output).await,
    }
}

async fn handle_up(ctx: &ProjectContext, dry_run: bool, run_manual: bool, output: &OutputManager) -> Result<()> {
    output.heading("Apply Migrations");
    if dry_run {
        output.warning("DRY RUN MODE - No changes will be made");
    }

    let mut store = connect(ctx, output).await?;
    let mut options = ctx.config.executor_options();
    options.dry_run = dry_run;
    options.run_manual |= run_manual;

    let mut executor = Executor::new(&mut store, ctx.config.ledger(), options);
    let report = executor
        .migrate_up(&ctx.migrations_dir)
        .await
        .context("Failed to run migrations")?;

    report_batch(&report, output)
}

async fn handle_down(ctx: &ProjectContext, target: Option<&str>, dry_run: bool, output: &OutputManager) -> Result<()> {
    output.heading("Roll Back Migrations");
    if dry_run {
        output.warning("DRY RUN MODE - No changes will be made");
    }
    if let Some(target) = target {
        output.key_value("Target", target);
    }

    let mut store = connect(ctx, output).await?;
    let mut options = ctx.config.executor_options();
    options.dry_run = dry_run;

    let mut executor = Executor::new(&mut store, ctx.config.ledger(), options);
    let report = executor
        .rollback(&ctx.migrations_dir, target)
        .await
        .context("Failed to roll back migrations")?;

    report_batch(&report, output)
}

async fn handle_status(ctx: &ProjectContext, output: &OutputManager) -> Result<()> {
    output.heading("Migration Status");

    let mut store = connect(ctx, output).await?;
    let mut executor = Executor::new(&mut store, ctx.config.ledger(), ctx.config.executor_options());
    let statuses = executor
        .status(&ctx.migrations_dir)
        .await
        .context("Failed to read migration status")?;

    if statuses.is_empty() {
        output.warning("No migrations found");
        return Ok(());
    }

    for missing in statuses.iter().filter(|s| !s.file_present) {
        output.warning(&format!("{} is in the ledger but its file is missing", missing.filename));
    }
    output.display(&StatusView(statuses))
}

async fn connect(ctx: &ProjectContext, output: &OutputManager) -> Result<docdrift::RedisStore> {
    let url = ctx.redis_url().inspect_err(|_| {
        output.error("REDIS_URL is not set and no Redis URL is configured");
    })?;
    output.verbose(&format!("Redis: {url}"));

    output.progress("Connecting to Redis");
    let store = ctx.connect().await;
    output.clear_line();
    let store = store?;
    output.success("Connected to Redis");
    Ok(store)
}

/// Print the batch, then turn a stopped batch into an error so the process exits non-zero.
fn report_batch(report: &BatchReport, output: &OutputManager) -> Result<()> {
    if report.outcomes.is_empty() {
        output.success("Nothing to do; all migrations are up to date");
        return Ok(());
    }

    output.display(&ReportView(report))?;

    for outcome in &report.outcomes {
        if !outcome.transactional {
            output.warning(&format!("{} ran without a transaction", outcome.filename));
        }
        for warning in &outcome.warnings {
            output.warning(&format!("{}: {warning}", outcome.filename));
        }
        if !outcome.manual.is_empty() && !outcome.manual_executed {
            output.info(&format!("{}: manual commands to run:", outcome.filename));
            for command in &outcome.manual {
                output.mark(Mark::Manual, command);
            }
        }
    }

    output.heading("Summary");
    if report.dry_run {
        output.warning("DRY RUN - No actual changes were made");
        return Ok(());
    }

    if let Some(failure) = &report.failure {
        output.error(&format!(
            "{} succeeded before {} failed: {}",
            report.succeeded, failure.migration, failure.message
        ));
        output.info(&failure.remedy);
    } else {
        output.success(&format!("{} migration(s) {}", report.succeeded, verb(report)));
    }

    report.clone().into_result()?;
    Ok(())
}

fn verb(report: &BatchReport) -> &'static str {
    match report.direction {
        docdrift::Direction::Up => "applied",
        docdrift::Direction::Down => "reverted",
    }
}
