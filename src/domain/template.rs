//! Template transformation for secret values
//!
//! A template reshapes a JSON-valued secret before it is served or mirrored:
//! `{{.key}}` placeholders are substituted from the secret's JSON fields,
//! and the result is validated against the secret's declared output format.
//! Transformation is best-effort by design: any failure falls back to the
//! untransformed value rather than rejecting the upsert.

use crate::domain::{SecretFormat, SecretMeta};
use serde_json::Value;
use std::sync::OnceLock;

/// Placeholder text produced for keys missing from the secret value.
/// Key/value pairs carrying it are dropped from the rendered output.
const NO_VALUE: &str = "<no value>";

fn placeholder_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"\{\{\s*\.([A-Za-z0-9_.-]+)\s*\}\}")
            .expect("placeholder pattern is valid")
    })
}

/// Check whether the provided string is a valid JSON object.
pub fn valid_json(s: &str) -> bool {
    matches!(serde_json::from_str::<Value>(s), Ok(Value::Object(_)))
}

/// Convert a JSON string into a YAML string.
pub fn json_to_yaml(js: &str) -> Result<String, serde_yaml::Error> {
    let value: Value = serde_json::from_str(js)
        .map_err(<serde_yaml::Error as serde::de::Error>::custom)?;
    serde_yaml::to_string(&value)
}

/// Apply a template to a JSON-valued secret.
///
/// Substitutes `{{.key}}` placeholders from the top-level fields of the
/// JSON value. Returns the input value unchanged when the value is not a
/// JSON object or the template contains no placeholders. Placeholders for
/// missing keys render as `<no value>` and their pairs are pruned from the
/// output.
pub fn try_parse(template: &str, value: &str) -> String {
    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(value) else {
        return value.to_string();
    };

    let re = placeholder_regex();
    if !re.is_match(template) {
        return value.to_string();
    }

    let rendered = re.replace_all(template, |caps: &regex::Captures<'_>| {
        match fields.get(&caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => NO_VALUE.to_string(),
        }
    });

    remove_pairs_with_no_value(&rendered)
}

/// Drop key/value pairs whose value side rendered as `<no value>`.
/// Helpful when the template names keys the secret does not carry.
fn remove_pairs_with_no_value(input: &str) -> String {
    if !input.contains(NO_VALUE) {
        return input.to_string();
    }

    let filtered: Vec<&str> = input
        .split(',')
        .filter(|pair| match pair.splitn(2, ':').nth(1) {
            Some(value) => !value.contains(NO_VALUE),
            None => true,
        })
        .collect();

    filtered.join(",")
}

/// Transform a single secret value according to its metadata.
///
/// 1. Apply the template when one is set, otherwise keep the value.
/// 2. Validate against the declared format: `json` falls back to the
///    original value when the result is not valid JSON; `yaml` converts
///    valid JSON to YAML and otherwise passes the result through; `raw`
///    passes the result through untouched.
pub fn transform(meta: &SecretMeta, value: &str) -> String {
    let value = value.trim();
    let template = meta.template.trim();

    let parsed =
        if template.is_empty() { value.to_string() } else { try_parse(template, value) };

    match meta.format {
        SecretFormat::Json => {
            if valid_json(&parsed) {
                parsed
            } else {
                value.to_string()
            }
        }
        SecretFormat::Yaml => {
            if valid_json(&parsed) {
                json_to_yaml(&parsed).unwrap_or(parsed)
            } else {
                parsed
            }
        }
        SecretFormat::Raw => parsed,
    }
}
