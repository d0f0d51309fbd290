//! Pull a JSON value out of free-form model output

use serde_json::Value;

use crate::core::OracleProtocolError;

/// Parse the JSON object in `text`.
///
/// Accepts bare JSON, a fenced ```json block, or an object embedded in
/// surrounding prose.
pub fn extract_json(text: &str) -> Result<Value, OracleProtocolError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(fenced) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(fenced) {
            return Ok(value);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    let preview: String = trimmed.chars().take(120).collect();
    Err(OracleProtocolError::MalformedResponse(format!(
        "no JSON object in response: {}",
        preview
    )))
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    // Skip the language tag line
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}
