//! CloudRF embedded metadata.
//! CloudRF writes a JSON object into a `<textarea>` inside the HTML description of its
//! placemarks. When it can be pulled out and decoded it carries the authoritative site name.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

static TEXTAREA_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<textarea[^>]*>(\{.*?\})</textarea>").expect("textarea pattern is valid")
});

/// Decodes the JSON object embedded in `text`.
/// Returns `None` both when there is no marker and when its payload is not a JSON object.
pub fn decode_embedded(text: &str) -> Option<Map<String, Value>> {
    let captured = TEXTAREA_JSON.captures(text)?.get(1)?.as_str();
    match serde_json::from_str::<Value>(captured) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Site name stored under `field` in the embedded payload, if any.
pub fn embedded_site_name(text: &str, field: &str) -> Option<String> {
    let payload = decode_embedded(text)?;
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}
