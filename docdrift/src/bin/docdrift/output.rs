use std::io::Write;

use anyhow::Result;
use clap::ValueEnum;
use colored::{Color, Colorize};
use comfy_table::{Attribute, Cell, Color as TableColor, Table};
use docdrift::SafetyLevel;
use serde::Serialize;

use crate::theme::{ICONS, Mark, THEME};

/// How command results are printed.
#[derive(Clone, Copy, Debug, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable tables
    #[default]
    Table,
    /// Pretty-printed JSON, with progress and messages suppressed
    Json,
    /// One line per result
    Compact,
}

/// Flags shared by every subcommand.
#[derive(Clone, Debug, Default)]
pub struct GlobalOptions {
    pub output_format: OutputFormat,
    pub quiet: bool,
    pub verbose: bool,
    pub no_color: bool,
}

/// Result types that can be printed in every output format.
pub trait TableDisplay {
    fn to_table(&self, options: &GlobalOptions) -> Table;
    fn to_compact(&self) -> String;
}

pub struct OutputManager {
    pub options: GlobalOptions,
}

impl OutputManager {
    pub fn new(options: GlobalOptions) -> Self {
        Self { options }
    }

    pub fn is_json(&self) -> bool {
        self.options.output_format == OutputFormat::Json
    }

    /// Format `data` for the configured output format.
    pub fn render<T>(&self, data: &T) -> Result<String>
    where
        T: Serialize + TableDisplay,
    {
        Ok(match self.options.output_format {
            OutputFormat::Json => serde_json::to_string_pretty(data)?,
            OutputFormat::Table => data.to_table(&self.options).to_string(),
            OutputFormat::Compact => data.to_compact(),
        })
    }

    /// Print `data` unless `--quiet` is set.
    pub fn display<T>(&self, data: &T) -> Result<()>
    where
        T: Serialize + TableDisplay,
    {
        if !self.options.quiet {
            println!("{}", self.render(data)?);
        }
        Ok(())
    }

    pub fn success(&self, message: &str) {
        if self.chatty() {
            println!("{}", self.styled(ICONS.success, THEME.success, message));
        }
    }

    /// Errors go to stderr and are never suppressed.
    pub fn error(&self, message: &str) {
        eprintln!("{}", self.styled(ICONS.error, THEME.error, message));
    }

    pub fn warning(&self, message: &str) {
        if self.chatty() {
            println!("{}", self.styled(ICONS.warning, THEME.warning, message));
        }
    }

    /// Diagnostic detail on stderr, shown only with `--verbose`.
    pub fn verbose(&self, message: &str) {
        if self.options.verbose && !self.options.quiet {
            eprintln!("{}", self.styled(ICONS.arrow, THEME.muted, message));
        }
    }

    pub fn info(&self, message: &str) {
        if self.chatty() {
            println!("{}", self.styled(ICONS.info, THEME.info, message));
        }
    }

    pub fn heading(&self, text: &str) {
        if !self.chatty() {
            return;
        }
        if self.options.no_color {
            println!("\n{text}\n{}", "=".repeat(text.chars().count()));
        } else {
            println!("\n{}", text.color(THEME.primary).bold());
        }
    }

    pub fn key_value(&self, key: &str, value: &str) {
        if !self.chatty() {
            return;
        }
        if self.options.no_color {
            println!("{key}: {value}");
        } else {
            println!("{}: {}", key.color(THEME.key).bold(), value.color(THEME.value));
        }
    }

    pub fn bullet(&self, text: &str) {
        self.prefixed(ICONS.bullet, THEME.muted, text);
    }

    /// One entry of a change listing: `+ field users.phone`.
    pub fn mark(&self, mark: Mark, text: &str) {
        self.prefixed(mark.icon(), mark.color(), text);
    }

    /// A rendered command prefixed by its safety level.
    pub fn command(&self, level: SafetyLevel, text: &str) {
        let label = format!("{:<11}", format!("[{level}]"));
        self.prefixed(&label, THEME.for_safety(level), text);
    }

    /// Table with the themed preset and a bold header row.
    pub fn table(options: &GlobalOptions, headers: &[&str]) -> Table {
        let mut table = Table::new();
        table.load_preset(if options.no_color {
            comfy_table::presets::ASCII_FULL
        } else {
            comfy_table::presets::UTF8_FULL_CONDENSED
        });
        table.set_header(headers.iter().map(|h| {
            let cell = Cell::new(h).add_attribute(Attribute::Bold);
            if options.no_color { cell } else { cell.fg(TableColor::Cyan) }
        }));
        table
    }

    /// Transient status line, overwritten by the next `clear_line`.
    pub fn progress(&self, message: &str) {
        if self.chatty() {
            print!("\r{}...", self.styled(ICONS.loading, THEME.highlight, message));
            std::io::stdout().flush().ok();
        }
    }

    pub fn clear_line(&self) {
        if self.chatty() {
            print!("\r{:80}\r", "");
            std::io::stdout().flush().ok();
        }
    }

    /// Human-oriented messages are suppressed in quiet and JSON modes.
    fn chatty(&self) -> bool {
        !self.options.quiet && !self.is_json()
    }

    fn styled(&self, icon: &str, color: Color, message: &str) -> String {
        if self.options.no_color {
            format!("{icon} {message}")
        } else {
            format!("{} {}", icon.color(color), message.color(color))
        }
    }

    /// Indented line whose prefix alone is colored.
    fn prefixed(&self, prefix: &str, color: Color, text: &str) {
        if !self.chatty() {
            return;
        }
        if self.options.no_color {
            println!("  {prefix} {text}");
        } else {
            println!("  {} {text}", prefix.color(color));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct PlanRow {
        migration: &'static str,
        safety: SafetyLevel,
    }

    impl TableDisplay for PlanRow {
        fn to_table(&self, options: &GlobalOptions) -> Table {
            let mut table = OutputManager::table(options, &["Migration", "Safety"]);
            table.add_row(vec![Cell::new(self.migration), Cell::new(self.safety.to_string())]);
            table
        }

        fn to_compact(&self) -> String {
            format!("{} {}", self.migration, self.safety)
        }
    }

    fn row() -> PlanRow {
        PlanRow {
            migration: "20240101_000000_add_phone.json",
            safety: SafetyLevel::Warning,
        }
    }

    fn manager(output_format: OutputFormat) -> OutputManager {
        OutputManager::new(GlobalOptions {
            output_format,
            no_color: true,
            ..Default::default()
        })
    }

    #[test]
    fn test_json_rendering_is_machine_readable() {
        let manager = manager(OutputFormat::Json);
        assert!(manager.is_json());
        assert!(!manager.chatty());

        let rendered = manager.render(&row()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["migration"], "20240101_000000_add_phone.json");
        assert_eq!(value["safety"], "warning");
    }

    #[test]
    fn test_table_rendering_includes_headers() {
        let rendered = manager(OutputFormat::Table).render(&row()).unwrap();
        assert!(rendered.contains("Migration"));
        assert!(rendered.contains("20240101_000000_add_phone.json"));
    }

    #[test]
    fn test_compact_rendering() {
        let rendered = manager(OutputFormat::Compact).render(&row()).unwrap();
        assert_eq!(rendered, "20240101_000000_add_phone.json warning");
    }

    #[test]
    fn test_quiet_suppresses_messages() {
        let manager = OutputManager::new(GlobalOptions {
            quiet: true,
            ..Default::default()
        });
        assert!(!manager.chatty());
        assert!(manager.display(&row()).is_ok());
    }

    #[test]
    fn test_plain_styling_without_color() {
        let manager = manager(OutputFormat::Table);
        assert_eq!(manager.styled(ICONS.info, THEME.info, "3 pending"), "ℹ 3 pending");
    }
}
