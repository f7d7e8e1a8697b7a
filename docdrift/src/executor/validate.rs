//! Structural validation of migration scripts before anything runs.

use log::warn;
use serde_json::Value;

use super::script::{FILENAME_PATTERN, MigrationScript, ScriptFile};
use crate::command::MigrationCommand;
use crate::errors::{ValidationError, ValidationIssue};

/// A script that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedScript {
    pub file: ScriptFile,
    pub script: MigrationScript,
    /// Dangerous patterns found in the script; reported, never blocking
    pub warnings: Vec<String>,
}

/// Validate every script; any structural issue fails the whole batch.
pub fn validate_scripts(files: Vec<ScriptFile>) -> Result<Vec<ValidatedScript>, ValidationError> {
    let mut issues = Vec::new();
    let mut validated = Vec::with_capacity(files.len());

    for file in files {
        match validate_script(&file) {
            Ok((script, warnings)) => {
                for warning in &warnings {
                    warn!("{}: {warning}", file.filename);
                }
                validated.push(ValidatedScript { file, script, warnings });
            }
            Err(mut found) => issues.append(&mut found),
        }
    }

    if issues.is_empty() {
        Ok(validated)
    } else {
        Err(ValidationError::new(issues))
    }
}

/// Parse and check one script, returning it with its dangerous-pattern warnings.
pub fn validate_script(file: &ScriptFile) -> Result<(MigrationScript, Vec<String>), Vec<ValidationIssue>> {
    let name = file.filename.as_str();
    let mut issues = Vec::new();

    if !FILENAME_PATTERN.is_match(&file.stem) {
        issues.push(ValidationIssue::new(
            name,
            "invalid_filename",
            "expected YYYYMMDD_HHMMSS_<slug>.json",
        ));
    }

    let raw: Value = match serde_json::from_str(&file.content) {
        Ok(value) => value,
        Err(err) => {
            issues.push(ValidationIssue::new(name, "invalid_json", err.to_string()));
            return Err(issues);
        }
    };
    let Some(object) = raw.as_object() else {
        issues.push(ValidationIssue::new(name, "invalid_json", "script must be a JSON object"));
        return Err(issues);
    };

    if let Some(declared) = object.get("name").and_then(Value::as_str)
        && declared != file.stem
    {
        issues.push(ValidationIssue::new(
            name,
            "name_mismatch",
            format!("script name `{declared}` does not match its file name"),
        ));
    }

    let up = entry_point(name, object.get("up"), "up", &mut issues);
    let down = entry_point(name, object.get("down"), "down", &mut issues);

    if !issues.is_empty() {
        return Err(issues);
    }

    let mut script: MigrationScript = match serde_json::from_value(raw.clone()) {
        Ok(script) => script,
        Err(err) => return Err(vec![ValidationIssue::new(name, "invalid_script", err.to_string())]),
    };
    script.name = file.stem.clone();
    script.up = up;
    script.down = down;

    let mut warnings = Vec::new();
    for (label, commands) in [("up", &script.up), ("down", &script.down)] {
        for (i, command) in commands.iter().enumerate() {
            if let Some(pattern) = command.command.dangerous_pattern() {
                warnings.push(format!(
                    "{label}[{i}]: {pattern} on `{}`",
                    command.command.collection()
                ));
            }
        }
    }
    Ok((script, warnings))
}

fn entry_point(
    name: &str,
    value: Option<&Value>,
    label: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Vec<MigrationCommand> {
    let Some(value) = value else {
        issues.push(ValidationIssue::new(
            name,
            "missing_entry_point",
            format!("no `{label}` command list"),
        ));
        return Vec::new();
    };
    let Some(items) = value.as_array() else {
        issues.push(ValidationIssue::new(
            name,
            "invalid_entry_point",
            format!("`{label}` must be an array of commands"),
        ));
        return Vec::new();
    };

    let mut commands = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match serde_json::from_value::<MigrationCommand>(item.clone()) {
            Ok(command) if command.command.collection().trim().is_empty() => {
                issues.push(ValidationIssue::new(
                    name,
                    "empty_collection",
                    format!("{label}[{i}] names no collection"),
                ));
            }
            Ok(command) => commands.push(command),
            Err(err) => issues.push(ValidationIssue::new(
                name,
                "invalid_command",
                format!("{label}[{i}]: {err}"),
            )),
        }
    }
    commands
}
