use serde_json::Value;

/// Render the one-line LCD event for a status payload, if it carries an
/// `index`. The index is right-aligned to 3 characters; `type` and `event`
/// collapse to a single token when byte-equal.
pub fn status_event_line(json: &Value) -> Option<String> {
    if json.get("index").is_none() {
        return None;
    }
    let index = json["index"].as_u64().unwrap_or(0);
    let mut line = format!("[{index:3}]");

    let kind = json.get("type").and_then(Value::as_str);
    let event = json.get("event").and_then(Value::as_str);

    match (kind, event) {
        (Some(kind), Some(event)) if kind == event => {
            line.push(' ');
            line.push_str(kind);
        }
        (Some(kind), Some(event)) => {
            line.push(' ');
            line.push_str(kind);
            line.push(' ');
            line.push_str(event);
        }
        (Some(token), None) | (None, Some(token)) => {
            line.push(' ');
            line.push_str(token);
        }
        (None, None) => {}
    }

    Some(line)
}
