//! Whole-bundle JSON.

use crate::model::Bundle;

pub fn render(bundle: &Bundle, pretty: bool) -> serde_json::Result<String> {
    let mut text = if pretty {
        serde_json::to_string_pretty(bundle)?
    } else {
        serde_json::to_string(bundle)?
    };
    text.push('\n');
    Ok(text)
}
