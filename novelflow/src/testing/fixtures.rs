//! Canned model responses and request maps.

use serde_json::{json, Map, Value};

/// A fenced settings response, the way chat models usually answer.
#[must_use]
pub fn settings_json(title: &str) -> String {
    let body = json!({
        "title": title,
        "summary": "A news anchor fakes her death and returns three years later.",
        "characters": [
            {"name": "Lin Wan", "role": "protagonist", "description": "Star anchor"},
            {"name": "Zhou Ming", "role": "supporting", "description": "Her husband"}
        ]
    });
    format!("Here are the settings:\n```json\n{body:#}\n```")
}

/// An outline response with `chapters` entries.
#[must_use]
pub fn outline_json(chapters: usize) -> String {
    let entries: Vec<Value> = (1..=chapters)
        .map(|index| {
            json!({
                "index": index,
                "title": format!("Chapter {index}"),
                "summary": format!("Events of chapter {index}."),
                "target_length": 800
            })
        })
        .collect();
    format!("{:#}", json!({ "chapters": entries }))
}

/// Prose for chapter `index`.
#[must_use]
pub fn chapter_text(index: usize) -> String {
    format!("The rain had not stopped since chapter {index} began. She waited by the studio door.")
}

/// Converts a `json!` object into a parameter map.
#[must_use]
pub fn params_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
