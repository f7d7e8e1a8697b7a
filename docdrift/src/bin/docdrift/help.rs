//! Styled `--help` output: themed clap styles, per-command example
//! appendices and the environment-variable footer.

use std::fmt::Write;
use std::io::{self, Write as IoWrite};

use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Color as ClapColor, RgbColor, Style};
use clap::{ColorChoice, Command};
use colored::{Color, Colorize, control::ShouldColorize};

use crate::commands::{generate, init, migrate};
use crate::theme::{ICONS, THEME};

/// A titled list of example invocations shown under a command's help.
#[derive(Clone, Copy)]
pub struct ExampleGroup {
    pub title: &'static str,
    pub commands: &'static [&'static str],
}

const COMMAND_EXAMPLES: &[(&str, &[ExampleGroup])] = &[
    ("init", init::EXAMPLES),
    ("generate", generate::EXAMPLES),
    ("migrate", migrate::EXAMPLES),
];

const ENVIRONMENT_VARIABLES: &[(&str, &str)] = &[
    ("REDIS_URL", "Redis connection URL for the ledger and migrations"),
    ("RUST_LOG", "Log filter for library diagnostics (e.g. docdrift=debug)"),
    ("NO_COLOR", "Disable colored output"),
];

/// Decorate the derived clap command with theme styles and appendices.
pub fn decorate(command: Command) -> Command {
    let color = ShouldColorize::from_env().should_colorize();
    let mut command = command
        .styles(styles())
        .color(if color { ColorChoice::Auto } else { ColorChoice::Never })
        .after_long_help(footer(color));

    for (name, groups) in COMMAND_EXAMPLES {
        if let Some(sub) = command.find_subcommand_mut(name) {
            *sub = sub.clone().after_long_help(examples(groups, color));
        }
    }
    command
}

/// Report a missing subcommand with the full help and exit.
pub fn missing_subcommand(mut command: Command, exit_code: i32) -> ! {
    let name = command.get_display_name().unwrap_or_else(|| command.get_name()).to_string();
    eprintln!("\nerror: '{name}' requires a subcommand but one was not provided\n");

    let mut stderr = io::stderr();
    if command.write_long_help(&mut stderr).is_ok() {
        let _ = stderr.write_all(b"\n");
        let _ = stderr.flush();
    }
    std::process::exit(exit_code);
}

fn examples(groups: &[ExampleGroup], color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", paint("Examples:", THEME.highlight, true, color));
    for (i, group) in groups.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "  {}", paint(group.title, THEME.primary, true, color));
        let arrow = paint(ICONS.arrow, THEME.secondary, false, color);
        for line in group.commands {
            let _ = writeln!(out, "    {arrow} {}", paint(line, THEME.secondary, false, color));
        }
    }
    out
}

fn footer(color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", paint("Environment Variables:", THEME.highlight, true, color));
    let width = ENVIRONMENT_VARIABLES.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    for (key, description) in ENVIRONMENT_VARIABLES {
        let key = paint(&format!("{key:<width$}"), THEME.key, true, color);
        let _ = writeln!(out, "  {key}  {}", paint(description, THEME.value, false, color));
    }
    let _ = writeln!(
        out,
        "\n{} {}",
        paint("Tip:", THEME.highlight, true, color),
        paint(
            "Use 'docdrift <command> --help' to view examples for each command.",
            THEME.secondary,
            false,
            color
        )
    );
    out
}

fn paint(text: &str, color: Color, bold: bool, enabled: bool) -> String {
    match (enabled, bold) {
        (false, _) => text.to_string(),
        (true, false) => text.color(color).to_string(),
        (true, true) => text.color(color).bold().to_string(),
    }
}

fn styles() -> Styles {
    let fg = |color: Color| Style::new().fg_color(Some(clap_color(color)));
    Styles::styled()
        .usage(fg(THEME.primary).bold())
        .header(fg(THEME.highlight).bold())
        .literal(fg(THEME.secondary))
        .placeholder(fg(THEME.muted))
        .valid(fg(THEME.success))
        .invalid(fg(THEME.warning))
        .error(fg(THEME.error).bold())
}

fn clap_color(color: Color) -> ClapColor {
    let ansi = match color {
        Color::TrueColor { r, g, b } => return ClapColor::Rgb(RgbColor(r, g, b)),
        Color::Black => AnsiColor::Black,
        Color::Red => AnsiColor::Red,
        Color::Green => AnsiColor::Green,
        Color::Yellow => AnsiColor::Yellow,
        Color::Blue => AnsiColor::Blue,
        Color::Magenta => AnsiColor::Magenta,
        Color::Cyan => AnsiColor::Cyan,
        Color::White => AnsiColor::White,
        Color::BrightBlack => AnsiColor::BrightBlack,
        Color::BrightRed => AnsiColor::BrightRed,
        Color::BrightGreen => AnsiColor::BrightGreen,
        Color::BrightYellow => AnsiColor::BrightYellow,
        Color::BrightBlue => AnsiColor::BrightBlue,
        Color::BrightMagenta => AnsiColor::BrightMagenta,
        Color::BrightCyan => AnsiColor::BrightCyan,
        Color::BrightWhite => AnsiColor::BrightWhite,
    };
    ClapColor::Ansi(ansi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_examples_render_without_color() {
        let rendered = examples(init::EXAMPLES, false);
        assert!(rendered.starts_with("Examples:\n"));
        assert!(rendered.contains("→ docdrift init"));
    }

    #[test]
    fn test_footer_lists_environment_variables() {
        let rendered = footer(false);
        assert!(rendered.contains("REDIS_URL"));
        assert!(rendered.contains("docdrift <command> --help"));
    }

    #[test]
    fn test_theme_colors_map_to_ansi() {
        assert_eq!(clap_color(Color::BrightRed), ClapColor::Ansi(AnsiColor::BrightRed));
        assert_eq!(
            clap_color(Color::TrueColor { r: 1, g: 2, b: 3 }),
            ClapColor::Rgb(RgbColor(1, 2, 3))
        );
    }
}
