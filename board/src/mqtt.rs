use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use carrier_common::MqttSettings;

use crate::ports::MqttTransport;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReceiveError {
    #[error("empty mqtt payload received")]
    ZeroLength,
    #[error("failed to deserialise mqtt json payload")]
    JsonParse,
    #[error("no mqtt config handler")]
    NoConfigHandler,
    #[error("no mqtt command handler")]
    NoCommandHandler,
}

#[derive(Debug, PartialEq)]
pub enum Inbound {
    Config(Value),
    Command(Value),
}

/// Settings view returned over REST; the password never leaves the device.
#[derive(Debug, Serialize)]
pub struct MqttSettingsView {
    pub broker: String,
    pub port: u16,
    #[serde(rename = "clientId")]
    pub client_id: String,
    pub username: Option<String>,
    #[serde(rename = "passwordSet")]
    pub password_set: bool,
    #[serde(rename = "topicPrefix")]
    pub topic_prefix: Option<String>,
    #[serde(rename = "topicSuffix")]
    pub topic_suffix: Option<String>,
}

impl From<&MqttSettings> for MqttSettingsView {
    fn from(settings: &MqttSettings) -> Self {
        Self {
            broker: settings.broker.clone(),
            port: settings.port,
            client_id: settings.client_id.clone(),
            username: settings.username.clone(),
            password_set: settings.password.as_deref().is_some_and(|p| !p.is_empty()),
            topic_prefix: settings.topic_prefix.clone(),
            topic_suffix: settings.topic_suffix.clone(),
        }
    }
}

/// Pub/sub session: topic construction, inbound classification and the
/// publish helpers. The wire protocol lives behind `MqttTransport`.
#[derive(Debug, Default)]
pub struct MqttSession {
    settings: MqttSettings,
    config_handler: bool,
    command_handler: bool,
}

impl MqttSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }

    pub fn apply_settings(&mut self, settings: MqttSettings) {
        self.settings = settings;
    }

    pub fn set_broker(&mut self, broker: &str, port: u16) {
        self.settings.broker = broker.to_string();
        self.settings.port = port;
    }

    pub fn set_client_id(&mut self, client_id: &str) {
        self.settings.client_id = client_id.to_string();
    }

    pub fn set_credentials(&mut self, username: &str, password: &str) {
        self.settings.username = Some(username.to_string());
        self.settings.password = Some(password.to_string());
    }

    pub fn set_topic_prefix(&mut self, prefix: &str) {
        self.settings.topic_prefix = Some(prefix.to_string());
    }

    pub fn set_topic_suffix(&mut self, suffix: &str) {
        self.settings.topic_suffix = Some(suffix.to_string());
    }

    pub(crate) fn set_handlers_registered(&mut self, config: bool, command: bool) {
        self.config_handler = config;
        self.command_handler = command;
    }

    fn topic(&self, kind: &str) -> String {
        let mut topic = String::new();
        if let Some(prefix) = self.settings.topic_prefix.as_deref() {
            if !prefix.is_empty() {
                topic.push_str(prefix);
                topic.push('/');
            }
        }
        topic.push_str(kind);
        topic.push('/');
        topic.push_str(&self.settings.client_id);
        if let Some(suffix) = self.settings.topic_suffix.as_deref() {
            if !suffix.is_empty() {
                topic.push('/');
                topic.push_str(suffix);
            }
        }
        topic
    }

    pub fn config_topic(&self) -> String {
        self.topic("conf")
    }

    pub fn command_topic(&self) -> String {
        self.topic("cmnd")
    }

    pub fn status_topic(&self) -> String {
        self.topic("stat")
    }

    pub fn telemetry_topic(&self) -> String {
        self.topic("tele")
    }

    pub fn log_topic(&self) -> String {
        self.topic("log")
    }

    pub fn adopt_topic(&self) -> String {
        format!("{}/adopt", self.status_topic())
    }

    /// Classify an inbound frame. `Ok(None)` means the topic is not ours;
    /// errors are logged and swallowed by the caller.
    pub fn receive(&self, topic: &str, payload: &[u8]) -> Result<Option<Inbound>, ReceiveError> {
        if payload.is_empty() {
            return Err(ReceiveError::ZeroLength);
        }

        let is_config = topic == self.config_topic();
        let is_command = topic == self.command_topic();
        if !is_config && !is_command {
            return Ok(None);
        }

        if is_config && !self.config_handler {
            return Err(ReceiveError::NoConfigHandler);
        }
        if is_command && !self.command_handler {
            return Err(ReceiveError::NoCommandHandler);
        }

        let json: Value = serde_json::from_slice(payload).map_err(|_| ReceiveError::JsonParse)?;

        Ok(Some(if is_config {
            Inbound::Config(json)
        } else {
            Inbound::Command(json)
        }))
    }

    pub fn publish_status(&self, transport: &mut dyn MqttTransport, json: &Value) -> bool {
        self.publish_json(transport, &self.status_topic(), json, false)
    }

    pub fn publish_telemetry(&self, transport: &mut dyn MqttTransport, json: &Value) -> bool {
        self.publish_json(transport, &self.telemetry_topic(), json, false)
    }

    /// Adoption is retained so a controller that starts later still sees it.
    pub fn publish_adopt(&self, transport: &mut dyn MqttTransport, json: &Value) -> bool {
        self.publish_json(transport, &self.adopt_topic(), json, true)
    }

    fn publish_json(
        &self,
        transport: &mut dyn MqttTransport,
        topic: &str,
        json: &Value,
        retain: bool,
    ) -> bool {
        match serde_json::to_vec(json) {
            Ok(payload) => transport.publish(topic, &payload, retain),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> MqttSession {
        let mut session = MqttSession::new();
        session.set_client_id("ddeef3");
        session.set_handlers_registered(true, true);
        session
    }

    #[test]
    fn topics_are_kind_slash_client_id() {
        let session = session();

        assert_eq!(session.config_topic(), "conf/ddeef3");
        assert_eq!(session.command_topic(), "cmnd/ddeef3");
        assert_eq!(session.status_topic(), "stat/ddeef3");
        assert_eq!(session.telemetry_topic(), "tele/ddeef3");
        assert_eq!(session.log_topic(), "log/ddeef3");
        assert_eq!(session.adopt_topic(), "stat/ddeef3/adopt");
    }

    #[test]
    fn prefix_and_suffix_wrap_the_topic() {
        let mut session = session();
        session.set_topic_prefix("site");
        session.set_topic_suffix("rack1");

        assert_eq!(session.config_topic(), "site/conf/ddeef3/rack1");
        assert_eq!(session.adopt_topic(), "site/stat/ddeef3/rack1/adopt");
    }

    #[test]
    fn empty_payload_is_rejected_first() {
        let session = session();
        assert_eq!(
            session.receive("conf/ddeef3", b""),
            Err(ReceiveError::ZeroLength)
        );
    }

    #[test]
    fn unknown_topic_is_ignored() {
        let session = session();
        assert_eq!(session.receive("stat/other", b"{}"), Ok(None));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let session = session();
        assert_eq!(
            session.receive("conf/ddeef3", b"{not json"),
            Err(ReceiveError::JsonParse)
        );
    }

    #[test]
    fn missing_handlers_are_reported() {
        let mut session = session();
        session.set_handlers_registered(false, false);

        assert_eq!(
            session.receive("conf/ddeef3", b"{}"),
            Err(ReceiveError::NoConfigHandler)
        );
        assert_eq!(
            session.receive("cmnd/ddeef3", b"{}"),
            Err(ReceiveError::NoCommandHandler)
        );
    }

    #[test]
    fn config_and_command_frames_classify() {
        let session = session();

        assert_eq!(
            session.receive("conf/ddeef3", br#"{"a":1}"#),
            Ok(Some(Inbound::Config(json!({"a": 1}))))
        );
        assert_eq!(
            session.receive("cmnd/ddeef3", br#"{"restart":true}"#),
            Ok(Some(Inbound::Command(json!({"restart": true}))))
        );
    }

    #[test]
    fn settings_view_redacts_password() {
        let mut session = session();
        session.set_broker("192.168.1.10", 1883);
        session.set_credentials("device", "secret");

        let view = MqttSettingsView::from(session.settings());
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["broker"], "192.168.1.10");
        assert_eq!(json["passwordSet"], true);
        assert!(json.get("password").is_none());
    }
}
