use serde_json::{json, Map, Value};

pub const JSON_SCHEMA_VERSION: &str = "http://json-schema.org/draft-07/schema#";

/// Recursive deep merge. Object values merge key-wise; anything else
/// (scalars, arrays, null) is replaced wholesale by `src`.
pub fn merge_json(dst: &mut Value, src: &Value) {
    let Value::Object(src_map) = src else {
        *dst = src.clone();
        return;
    };
    if !dst.is_object() {
        *dst = Value::Object(Map::new());
    }
    if let Value::Object(dst_map) = dst {
        for (key, value) in src_map {
            match dst_map.get_mut(key) {
                Some(existing) => merge_json(existing, value),
                None => {
                    dst_map.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

fn platform_config_properties() -> Value {
    json!({
        "activeBrightnessPercent": {
            "title": "LCD Active Brightness (%)",
            "description": "Brightness of the LCD when active (defaults to 100%). Must be a number between 0 and 100.",
            "type": "integer",
            "minimum": 0,
            "maximum": 100
        },
        "inactiveBrightnessPercent": {
            "title": "LCD Inactive Brightness (%)",
            "description": "Brightness of the LCD when in-active (defaults to 10%). Must be a number between 0 and 100.",
            "type": "integer",
            "minimum": 0,
            "maximum": 100
        },
        "activeDisplaySeconds": {
            "title": "LCD Active Display Timeout (seconds)",
            "description": "How long the LCD remains 'active' after an event is detected (defaults to 10 seconds, setting to 0 disables the timeout). Must be a number between 0 and 600 (i.e. 10 minutes).",
            "type": "integer",
            "minimum": 0,
            "maximum": 600
        },
        "eventDisplaySeconds": {
            "title": "LCD Event Display Timeout (seconds)",
            "description": "How long the last event is displayed on the LCD (defaults to 3 seconds, setting to 0 disables the timeout). Must be a number between 0 and 600 (i.e. 10 minutes).",
            "type": "integer",
            "minimum": 0,
            "maximum": 600
        }
    })
}

fn platform_command_properties() -> Value {
    json!({
        "restart": {
            "title": "Restart",
            "type": "boolean"
        }
    })
}

/// Holds the firmware-supplied schema fragments and composes them with the
/// platform schema for adoption output. Writes replace the stored fragment
/// wholesale; platform properties win scalar conflicts on read.
#[derive(Debug, Default)]
pub struct SchemaComposer {
    config_fragment: Option<Value>,
    command_fragment: Option<Value>,
}

impl SchemaComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_config_schema(&mut self, fragment: &Value) {
        self.config_fragment = Some(fragment.clone());
    }

    pub fn set_command_schema(&mut self, fragment: &Value) {
        self.command_fragment = Some(fragment.clone());
    }

    pub fn composed_config_schema(&self, short_name: &str) -> Value {
        compose(
            short_name,
            self.config_fragment.as_ref(),
            &platform_config_properties(),
        )
    }

    pub fn composed_command_schema(&self, short_name: &str) -> Value {
        compose(
            short_name,
            self.command_fragment.as_ref(),
            &platform_command_properties(),
        )
    }
}

fn compose(short_name: &str, fragment: Option<&Value>, platform: &Value) -> Value {
    let mut properties = Value::Object(Map::new());

    // Firmware fragment first, platform on top so platform wins conflicts.
    if let Some(fragment) = fragment {
        merge_json(&mut properties, fragment);
    }
    merge_json(&mut properties, platform);

    json!({
        "$schema": JSON_SCHEMA_VERSION,
        "title": short_name,
        "type": "object",
        "properties": properties,
    })
}
