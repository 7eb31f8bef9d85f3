//! Engine output extraction and validation.
//!
//! The engine may print progress text before its result, so only the last
//! non-empty line of stdout is treated as the payload. The payload is checked
//! structurally (a `FeatureCollection` with a `features` array) and then
//! decoded into the typed [`ViewshedResponse`]. Nothing from the payload is
//! trusted until both steps pass.

use geojson::{FeatureCollection, JsonValue};

use crate::error::{Result, ViewshedError};
use crate::response::ViewshedResponse;

/// Maximum number of payload bytes retained in errors and logs.
pub const PAYLOAD_PREFIX_BYTES: usize = 512;

/// Return the last non-empty line of the engine output, trimmed.
pub fn last_non_empty_line(output: &str) -> Option<&str> {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
}

/// Parse and validate the engine's standard output.
///
/// # Errors
///
/// - [`ViewshedError::EmptyEngineOutput`] if the output is empty or whitespace.
/// - [`ViewshedError::InvalidGeojsonFormat`] if the last non-empty line is not
///   JSON, is not a `FeatureCollection`, lacks a `features` array, or contains
///   a feature that does not match its `properties.type` tag.
pub fn parse_engine_output(output: &str) -> Result<ViewshedResponse> {
    let payload = last_non_empty_line(output).ok_or(ViewshedError::EmptyEngineOutput)?;

    let value: JsonValue = serde_json::from_str(payload)
        .map_err(|e| invalid(payload, format!("payload is not valid JSON ({})", e)))?;

    match value.get("type") {
        Some(JsonValue::String(t)) if t == "FeatureCollection" => {}
        _ => return Err(invalid(payload, "expected a FeatureCollection")),
    }

    if !value.get("features").map_or(false, JsonValue::is_array) {
        return Err(invalid(payload, "features must be an array"));
    }

    let collection = FeatureCollection::try_from(value)
        .map_err(|e| invalid(payload, format!("malformed GeoJSON ({})", e)))?;

    ViewshedResponse::try_from(collection).map_err(|reason| invalid(payload, reason))
}

fn invalid(payload: &str, message: impl Into<String>) -> ViewshedError {
    let message = message.into();
    let prefix = bounded_prefix(payload, PAYLOAD_PREFIX_BYTES);
    tracing::warn!(reason = %message, payload = %prefix, "Rejected viewshed engine output");
    ViewshedError::InvalidGeojsonFormat {
        message,
        payload: prefix.to_string(),
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a character.
fn bounded_prefix(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
