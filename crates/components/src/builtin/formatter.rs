//! `formatter`: text and number formatting, no setup required.

use std::any::Any;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};

use crate::{Action, Component, ComponentError, Params, ResultMap, SharedContext};

pub const NAME: &str = "formatter";
pub const TEXT_ACTION: &str = "formatter.text";
pub const NUMBER_ACTION: &str = "formatter.number";

const TEXT_OPERATIONS: &[&str] = &["urlencode", "replace", "strip_prefix"];
const NUMBER_OPERATIONS: &[&str] = &["format_currency", "random_number"];
const CURRENCIES: &[&str] = &["USD", "EUR", "GBP"];

#[derive(Debug, Default)]
pub struct Formatter;

impl Component for Formatter {
    fn name(&self) -> &str {
        NAME
    }

    fn setup(&mut self, _profile: &Params) -> Result<(), ComponentError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn text_param<'a>(params: &'a Params, key: &str) -> &'a str {
    params.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn into_result(value: Value) -> ResultMap {
    match value {
        Value::Object(map) => map,
        _ => ResultMap::new(),
    }
}

/// `formatter.text`: `urlencode`, `replace`, `strip_prefix`.
pub struct TextAction {
    params: Params,
}

impl TextAction {
    pub fn new(params: Params) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Action for TextAction {
    async fn execute(&self, _ctx: &SharedContext) -> Result<ResultMap, ComponentError> {
        let input = text_param(&self.params, "input");
        let formatted = match text_param(&self.params, "operation") {
            "urlencode" => urlencode(input),
            "replace" => input.replace(
                text_param(&self.params, "old_value"),
                text_param(&self.params, "new_value"),
            ),
            "strip_prefix" => {
                let prefix = text_param(&self.params, "prefix");
                input.strip_prefix(prefix).unwrap_or(input).to_owned()
            }
            other => {
                return Err(ComponentError::Fault(format!(
                    "unknown text operation: '{other}'"
                )))
            }
        };
        Ok(into_result(json!({ "formatted_text": formatted, "success": true })))
    }

    fn field_choices(&self, field_name: &str, _field_config: &Value) -> Vec<String> {
        match field_name {
            "operation" => TEXT_OPERATIONS.iter().map(|s| s.to_string()).collect(),
            _ => Vec::new(),
        }
    }
}

/// `formatter.number`: `format_currency`, `random_number`.
pub struct NumberAction {
    params: Params,
}

impl NumberAction {
    pub fn new(params: Params) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Action for NumberAction {
    async fn execute(&self, _ctx: &SharedContext) -> Result<ResultMap, ComponentError> {
        let formatted = match text_param(&self.params, "operation") {
            "format_currency" => {
                let amount = number_param(&self.params, "amount").unwrap_or(0.0);
                let currency = self
                    .params
                    .get("currency")
                    .and_then(Value::as_str)
                    .unwrap_or("USD");
                format_currency(amount, currency)
            }
            "random_number" => {
                let min = integer_param(&self.params, "min_value", 0);
                let max = integer_param(&self.params, "max_value", 100);
                let (min, max) = if min <= max { (min, max) } else { (0, 100) };
                rand::thread_rng().gen_range(min..=max).to_string()
            }
            other => {
                return Err(ComponentError::Fault(format!(
                    "unknown number operation: '{other}'"
                )))
            }
        };
        Ok(into_result(json!({ "formatted_number": formatted, "success": true })))
    }

    fn field_choices(&self, field_name: &str, _field_config: &Value) -> Vec<String> {
        let choices: &[&str] = match field_name {
            "operation" => NUMBER_OPERATIONS,
            "currency" => CURRENCIES,
            _ => &[],
        };
        choices.iter().map(|s| s.to_string()).collect()
    }
}

/// Accepts numbers and numeric strings (resolved placeholders are strings).
fn number_param(params: &Params, key: &str) -> Option<f64> {
    match params.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn integer_param(params: &Params, key: &str, default: i64) -> i64 {
    match params.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn format_currency(amount: f64, currency: &str) -> String {
    let body = group_thousands(amount);
    match currency.to_uppercase().as_str() {
        "USD" => format!("${body}"),
        "EUR" => format!("€{body}"),
        "GBP" => format!("£{body}"),
        other => format!("{body} {other}"),
    }
}

/// `1234567.891` → `1,234,567.89`
fn group_thousands(amount: f64) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{sign}{grouped}.{frac_part}")
}

/// Percent-encode everything except unreserved characters and `/`.
fn urlencode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
