//! Text classification — capability layer.
//!
//! Pure functions that map captured portal text plus keyword rules to a
//! normalized status. No engine, no flow knowledge.

use regex::Regex;
use std::sync::OnceLock;

use crate::model::ConsultStatus;

fn whitespace_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Normalize captured text for keyword comparison: non-breaking spaces
/// become plain spaces, whitespace runs collapse, the result is trimmed,
/// uppercased and stripped of Latin diacritics so "Benefício" and
/// "beneficio" compare equal.
pub fn normalize_text(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let cleaned = value.replace('\u{00A0}', " ");
    let collapsed = whitespace_runs().replace_all(&cleaned, " ");
    collapsed
        .trim()
        .chars()
        .flat_map(char::to_uppercase)
        .map(fold_diacritic)
        .collect()
}

/// Fold one uppercased Latin character to its unaccented base.
fn fold_diacritic(c: char) -> char {
    match c {
        'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'Ç' => 'C',
        'Ñ' => 'N',
        other => other,
    }
}

/// Classify normalized portal text against the three keyword sets.
///
/// Precedence is fixed: positive wins over negative wins over error;
/// no keyword match (or empty text) is Indefinite.
pub fn classify(
    raw_text: &str,
    positive_keywords: &[String],
    negative_keywords: &[String],
    error_keywords: &[String],
) -> ConsultStatus {
    let normalized = normalize_text(raw_text);
    if normalized.is_empty() {
        return ConsultStatus::Indefinite;
    }

    if matches_any(&normalized, positive_keywords) {
        ConsultStatus::Positive
    } else if matches_any(&normalized, negative_keywords) {
        ConsultStatus::Negative
    } else if matches_any(&normalized, error_keywords) {
        ConsultStatus::Error
    } else {
        ConsultStatus::Indefinite
    }
}

fn matches_any(normalized: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| {
        let key = normalize_text(k);
        !key.is_empty() && normalized.contains(key.as_str())
    })
}

/// Apply the plan post-processing rule to a classified status.
///
/// A non-empty plan promotes Indefinite/Negative to Positive (unreliable
/// status selectors on some portals still render the plan field); a
/// Positive with no plan text falls back to the status message as the
/// plan value. Returns the final (status, plan) pair.
pub fn resolve_plan(
    status: ConsultStatus,
    plan_text: &str,
    message: &str,
) -> (ConsultStatus, String) {
    if !normalize_text(plan_text).is_empty() {
        let status = match status {
            ConsultStatus::Indefinite | ConsultStatus::Negative => ConsultStatus::Positive,
            other => other,
        };
        (status, plan_text.to_string())
    } else if status == ConsultStatus::Positive && !message.is_empty() {
        (status, message.to_string())
    } else {
        (status, String::new())
    }
}
