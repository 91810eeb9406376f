use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MQTT connection settings in their persisted/REST form. The broker address
/// and port come from persisted config; the client id defaults to the
/// MAC-derived value until persisted config overrides it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttSettings {
    pub broker: String,
    pub port: u16,
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(rename = "topicPrefix", default)]
    pub topic_prefix: Option<String>,
    #[serde(rename = "topicSuffix", default)]
    pub topic_suffix: Option<String>,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker: String::new(),
            port: 1883,
            client_id: String::new(),
            username: None,
            password: None,
            topic_prefix: None,
            topic_suffix: None,
        }
    }
}

/// Display tuning keys recognised in inbound config payloads. Keys are
/// recognised by presence; absent keys leave the current setting unchanged.
/// Values are applied as-is; bounds are advertised in the schema only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayTuning {
    pub active_brightness_percent: Option<u8>,
    pub inactive_brightness_percent: Option<u8>,
    pub active_display_seconds: Option<u16>,
    pub event_display_seconds: Option<u16>,
}

impl DisplayTuning {
    pub fn from_json(json: &Value) -> Self {
        Self {
            active_brightness_percent: json
                .get("activeBrightnessPercent")
                .and_then(Value::as_u64)
                .map(|v| v as u8),
            inactive_brightness_percent: json
                .get("inactiveBrightnessPercent")
                .and_then(Value::as_u64)
                .map(|v| v as u8),
            active_display_seconds: json
                .get("activeDisplaySeconds")
                .and_then(Value::as_u64)
                .map(|v| v as u16),
            event_display_seconds: json
                .get("eventDisplaySeconds")
                .and_then(Value::as_u64)
                .map(|v| v as u16),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
