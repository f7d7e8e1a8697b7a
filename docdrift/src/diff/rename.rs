use std::collections::BTreeSet;

use super::RenameTieBreak;
use crate::snapshot::FieldDefinition;

// Weights in tenths so that scores are exact decimals.
const TYPE_WEIGHT: u32 = 4;
const NULLABLE_WEIGHT: u32 = 2;
const REQUIRED_WEIGHT: u32 = 2;
const DEFAULT_WEIGHT: u32 = 1;
const ENUM_WEIGHT: u32 = 1;

const TIE_EPSILON: f64 = 1e-9;

/// A removed path matched to an added path.
#[derive(Debug, Clone, PartialEq)]
pub struct RenameCandidate {
    pub from: String,
    pub to: String,
    pub confidence: f64,
}

/// Weighted similarity of two field definitions, in `0.0..=1.0`.
pub fn confidence(removed: &FieldDefinition, added: &FieldDefinition) -> f64 {
    let mut score = 0;
    if removed.field_type == added.field_type {
        score += TYPE_WEIGHT;
    }
    if removed.nullable == added.nullable {
        score += NULLABLE_WEIGHT;
    }
    if removed.required == added.required {
        score += REQUIRED_WEIGHT;
    }
    if removed.default == added.default {
        score += DEFAULT_WEIGHT;
    }
    if same_enum_set(removed, added) {
        score += ENUM_WEIGHT;
    }
    f64::from(score) / 10.0
}

pub(crate) fn same_enum_set(a: &FieldDefinition, b: &FieldDefinition) -> bool {
    let as_set = |f: &FieldDefinition| {
        f.enum_values
            .as_ref()
            .map(|values| values.iter().cloned().collect::<BTreeSet<String>>())
    };
    as_set(a) == as_set(b)
}

/// Greedily pair removed paths with added paths.
///
/// Removed paths are visited in sorted order; each takes its best unmatched
/// added path whose confidence is strictly above `threshold`. Returns the
/// accepted pairs and a warning for every ambiguous match.
pub fn infer_renames(
    removed: &[(&str, &FieldDefinition)],
    added: &[(&str, &FieldDefinition)],
    threshold: f64,
    ties: RenameTieBreak,
) -> (Vec<RenameCandidate>, Vec<String>) {
    let mut removed: Vec<&(&str, &FieldDefinition)> = removed.iter().collect();
    removed.sort_by(|a, b| a.0.cmp(b.0));
    let mut added: Vec<&(&str, &FieldDefinition)> = added.iter().collect();
    added.sort_by(|a, b| a.0.cmp(b.0));

    let mut taken: BTreeSet<&str> = BTreeSet::new();
    let mut renames = Vec::new();
    let mut warnings = Vec::new();

    for (from, old) in removed {
        let scored: Vec<(&str, f64)> = added
            .iter()
            .filter(|(to, _)| !taken.contains(to))
            .map(|(to, new)| (*to, confidence(old, new)))
            .filter(|(_, score)| *score > threshold)
            .collect();
        let Some(best) = scored.iter().map(|(_, score)| *score).reduce(f64::max) else {
            continue;
        };
        let leaders: Vec<&str> = scored
            .iter()
            .filter(|(_, score)| (best - score).abs() < TIE_EPSILON)
            .map(|(to, _)| *to)
            .collect();

        let chosen = if leaders.len() > 1 {
            match ties {
                RenameTieBreak::Lexicographic => {
                    warnings.push(format!(
                        "{from} matches {} equally well; assuming rename to {}",
                        leaders.join(", "),
                        leaders[0]
                    ));
                    leaders[0]
                }
                RenameTieBreak::Refuse => {
                    warnings.push(format!(
                        "{from} matches {} equally well; not treating it as a rename",
                        leaders.join(", ")
                    ));
                    continue;
                }
            }
        } else {
            leaders[0]
        };

        taken.insert(chosen);
        renames.push(RenameCandidate {
            from: from.to_string(),
            to: chosen.to_string(),
            confidence: best,
        });
    }

    (renames, warnings)
}
