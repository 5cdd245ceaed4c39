//! `{{identifier}}` placeholder scanning and substitution.
//!
//! This is the only place that knows the placeholder syntax. The context
//! uses it to resolve parameters, the engine's dependency analyzer uses it
//! to find references.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

// Compiled once; `None` only if the literal pattern were invalid.
fn pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").ok())
        .as_ref()
}

/// Identifiers referenced by `text`, in order of appearance (duplicates kept).
pub fn references(text: &str) -> Vec<&str> {
    let Some(re) = pattern() else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// Identifiers referenced anywhere inside a JSON value, recursing through
/// arrays and objects. Non-string leaves contribute nothing.
pub fn references_in_value(value: &Value) -> Vec<&str> {
    let mut out = Vec::new();
    collect(value, &mut out);
    out
}

fn collect<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.extend(references(s)),
        Value::Array(items) => items.iter().for_each(|v| collect(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect(v, out)),
        _ => {}
    }
}

/// Replace every placeholder for which `lookup` yields a value.
///
/// Unmatched placeholders are left verbatim.
pub fn substitute<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let Some(re) = pattern() else {
        return text.to_owned();
    };
    re.replace_all(text, |caps: &Captures<'_>| {
        lookup(&caps[1]).unwrap_or_else(|| caps[0].to_owned())
    })
    .into_owned()
}

/// Text form of a context value as it appears after substitution.
///
/// Strings are inserted raw; everything else uses its JSON rendering.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
