use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Table};
use docdrift::diff::{ChangeCounts, SafetyTally, summarize};
use docdrift::generate::{GeneratedMigration, generate, record};
use serde::Serialize;
use std::path::PathBuf;

use crate::context::ProjectContext;
use crate::help::ExampleGroup;
use crate::output::{GlobalOptions, OutputManager, TableDisplay};
use crate::theme::{ICONS, Mark};

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Generate Migrations",
        commands: &[
            "docdrift generate --name add_phone        # Diff the default snapshots and write a script",
            "docdrift generate                         # Name the script after the detected change",
        ],
    },
    ExampleGroup {
        title: "Explicit Snapshots",
        commands: &[
            "docdrift generate --observed live.json --declared models.json",
            "docdrift generate --no-record             # Skip the ledger; recorded on first run",
        ],
    },
];

#[derive(Args)]
pub struct GenerateArgs {
    /// Slug for the migration (e.g., add_phone, split_name)
    #[arg(short, long)]
    name: Option<String>,

    /// Snapshot sampled from live storage (default: <snapshots_dir>/observed.json)
    #[arg(long)]
    observed: Option<PathBuf>,

    /// Snapshot declared by the application models (default: <snapshots_dir>/declared.json)
    #[arg(long)]
    declared: Option<PathBuf>,

    /// Do not record the generated migration in the ledger
    #[arg(long)]
    no_record: bool,
}

/// Summary of a generated script for table/JSON output
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedView {
    filename: String,
    path: String,
    from_hash: String,
    to_hash: String,
    summary: String,
    safety: SafetyTally,
    warnings: Vec<String>,
    changes: ChangeCounts,
}

impl GeneratedView {
    fn new(generated: &GeneratedMigration) -> Self {
        Self {
            filename: generated.script.filename(),
            path: generated.path.display().to_string(),
            from_hash: generated.script.from_hash.clone(),
            to_hash: generated.script.to_hash.clone(),
            summary: summarize(&generated.diff.metadata),
            safety: SafetyTally::of(&generated.diff),
            warnings: generated.diff.warnings.clone(),
            changes: generated.diff.metadata.clone(),
        }
    }
}

impl TableDisplay for GeneratedView {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = OutputManager::table(options, &["Migration", "Changes", "Safety"]);
        table.add_row(vec![
            Cell::new(&self.filename),
            Cell::new(&self.summary),
            Cell::new(self.safety.to_string()),
        ]);
        table
    }

    fn to_compact(&self) -> String {
        format!("{} {} [{}]", self.filename, self.summary, self.safety)
    }
}

pub async fn handle_generate(args: GenerateArgs, output: &OutputManager) -> Result<()> {
    let ctx = ProjectContext::find()?;

    if !ctx.is_initialized() {
        output.error("docdrift is not initialized in this project.");
        output.info("Run 'docdrift init' first to initialize.");
        anyhow::bail!("Project not initialized");
    }

    output.heading("Generate Migration");

    let observed_path = ctx.snapshot_path(args.observed.as_deref(), "observed");
    let declared_path = ctx.snapshot_path(args.declared.as_deref(), "declared");
    output.key_value("Observed", &observed_path.display().to_string());
    output.key_value("Declared", &declared_path.display().to_string());

    output.progress("Loading snapshots");
    let observed = ctx.load_snapshot(&observed_path)?;
    let declared = ctx.load_snapshot(&declared_path)?;
    output.clear_line();

    let generated = generate(
        observed,
        declared,
        &ctx.config.diff_options(),
        &ctx.migrations_dir,
        args.name.as_deref(),
    )
    .context("Failed to generate migration")?;

    let Some(generated) = generated else {
        output.success("No schema changes detected");
        output.info("Declared and observed snapshots match");
        return Ok(());
    };

    print_changes(&generated.diff.metadata, output);
    print_commands(&generated, output);

    if !generated.diff.warnings.is_empty() {
        output.heading("Warnings");
        for warning in &generated.diff.warnings {
            output.warning(warning);
        }
    }

    if args.no_record {
        output.verbose("Ledger recording skipped (--no-record)");
    } else {
        record_in_ledger(&ctx, &generated, output).await;
    }

    output.heading("Summary");
    output.display(&GeneratedView::new(&generated))?;
    output.success(&format!("Created: {}", generated.path.display()));

    output.info("Next steps:");
    output.bullet("Review the generated script, especially manual commands");
    output.bullet("Run 'docdrift migrate up' to apply");

    Ok(())
}

fn print_changes(changes: &ChangeCounts, output: &OutputManager) {
    output.heading("Detected Changes");
    output.info(&summarize(changes));

    for name in &changes.collections.added {
        output.mark(Mark::Added, &format!("collection {name}"));
    }
    for name in &changes.collections.removed {
        output.mark(Mark::Removed, &format!("collection {name}"));
    }
    for path in &changes.fields.added {
        output.mark(Mark::Added, &format!("field {path}"));
    }
    for path in &changes.fields.removed {
        output.mark(Mark::Removed, &format!("field {path}"));
    }
    for rename in &changes.fields.renamed {
        output.mark(
            Mark::Changed,
            &format!(
                "{}: {} {} {} ({:.0}% confidence)",
                rename.collection,
                rename.from,
                ICONS.arrow,
                rename.to,
                rename.confidence * 100.0
            ),
        );
    }
    for modified in &changes.fields.modified {
        output.mark(
            Mark::Changed,
            &format!(
                "{}.{} ({})",
                modified.collection,
                modified.path,
                modified.attributes.join(", ")
            ),
        );
    }
    for name in &changes.indexes.added {
        output.mark(Mark::Added, &format!("index {name}"));
    }
    for name in &changes.indexes.removed {
        output.mark(Mark::Removed, &format!("index {name}"));
    }
}

fn print_commands(generated: &GeneratedMigration, output: &OutputManager) {
    output.heading("Up Commands");
    for command in &generated.script.up {
        output.command(command.safety_level, &command.to_string());
    }

    let manual: Vec<_> = generated.diff.manual_commands().collect();
    if !manual.is_empty() {
        output.heading("Manual Commands");
        for command in manual {
            output.mark(Mark::Manual, &command.description);
        }
    }
}

async fn record_in_ledger(ctx: &ProjectContext, generated: &GeneratedMigration, output: &OutputManager) {
    output.progress("Recording migration in ledger");
    let recorded = match ctx.connect().await {
        Ok(mut store) => record(&mut store, &ctx.config.ledger(), &generated.script)
            .await
            .map_err(anyhow::Error::from),
        Err(err) => Err(err),
    };
    output.clear_line();

    match recorded {
        Ok(_) => output.bullet("Recorded in ledger"),
        Err(err) => {
            output.warning(&format!("Not recorded in ledger: {err:#}"));
            output.info("It will be recorded when first applied");
        }
    }
}
