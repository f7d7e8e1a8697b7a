use colored::Color;
use docdrift::SafetyLevel;
use once_cell::sync::Lazy;

/// CLI color theme configuration
pub struct ColorTheme {
    pub success: Color,
    pub error: Color,
    pub warning: Color,
    pub info: Color,
    pub highlight: Color,
    pub muted: Color,
    pub primary: Color,
    pub secondary: Color,
    pub key: Color,
    pub value: Color,
    pub dangerous: Color,
}

impl ColorTheme {
    pub fn for_safety(&self, level: SafetyLevel) -> Color {
        match level {
            SafetyLevel::Safe => self.success,
            SafetyLevel::Warning => self.warning,
            SafetyLevel::Dangerous => self.dangerous,
        }
    }
}

impl Default for ColorTheme {
    fn default() -> Self {
        Self {
            success: Color::Green,
            error: Color::Red,
            warning: Color::Yellow,
            info: Color::Blue,
            highlight: Color::Cyan,
            muted: Color::BrightBlack,
            primary: Color::BrightBlue,
            secondary: Color::Magenta,
            key: Color::BrightCyan,
            value: Color::White,
            dangerous: Color::BrightRed,
        }
    }
}

pub static THEME: Lazy<ColorTheme> = Lazy::new(ColorTheme::default);

pub struct Icons {
    pub success: &'static str,
    pub error: &'static str,
    pub warning: &'static str,
    pub info: &'static str,
    pub arrow: &'static str,
    pub bullet: &'static str,
    pub loading: &'static str,
}

pub const ICONS: Icons = Icons {
    success: "✓",
    error: "✗",
    warning: "⚠",
    info: "ℹ",
    arrow: "→",
    bullet: "•",
    loading: "⟳",
};

/// Leading marker of a line in a change listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Added,
    Removed,
    Changed,
    Manual,
}

impl Mark {
    pub fn icon(self) -> &'static str {
        match self {
            Mark::Added => "+",
            Mark::Removed => "-",
            Mark::Changed => "~",
            Mark::Manual => "✋",
        }
    }

    pub fn color(self) -> Color {
        match self {
            Mark::Added => THEME.success,
            Mark::Removed => THEME.error,
            Mark::Changed => THEME.warning,
            Mark::Manual => THEME.highlight,
        }
    }
}
