use std::io;
use std::net::Ipv4Addr;

use serde_json::{json, Value};
use tracing::{info, warn};

use carrier_common::{
    build_adoption, default_client_id, derive_ethernet_mac, format_mac, status_event_line,
    DisplayTuning, FirmwareInfo, NetworkReport, SchemaComposer,
};

use crate::logging::LogFan;
use crate::mqtt::{Inbound, MqttSession, MqttSettingsView};
use crate::ports::{
    ApiPort, ApiRequest, DisplayPort, EthernetPort, LogoSource, MqttEvent, MqttTransport,
    SystemPort,
};

pub type JsonCallback = Box<dyn FnMut(&Value)>;

/// The carrier board façade. Owns the network, MQTT, REST and display
/// collaborators and mediates between them and the user firmware. Constructed
/// once in `main`; firmware drives it from its startup and main-loop hooks.
pub struct Carrier<E, T, A, D, S>
where
    E: EthernetPort,
    T: MqttTransport,
    A: ApiPort,
    D: DisplayPort,
    S: SystemPort,
{
    identity: FirmwareInfo,
    eth: E,
    transport: T,
    api: A,
    display: D,
    system: S,
    session: MqttSession,
    composer: SchemaComposer,
    log: LogFan,
    on_config: Option<JsonCallback>,
    on_command: Option<JsonCallback>,
    mac: [u8; 6],
    began: bool,
}

impl<E, T, A, D, S> Carrier<E, T, A, D, S>
where
    E: EthernetPort,
    T: MqttTransport,
    A: ApiPort,
    D: DisplayPort,
    S: SystemPort,
{
    pub fn new(identity: FirmwareInfo, eth: E, transport: T, api: A, display: D, system: S) -> Self {
        Self {
            identity,
            eth,
            transport,
            api,
            display,
            system,
            session: MqttSession::new(),
            composer: SchemaComposer::new(),
            log: LogFan::new(),
            on_config: None,
            on_command: None,
            mac: [0; 6],
            began: false,
        }
    }

    /// Bring the board up: display, then network, then the MQTT defaults,
    /// then the REST API. The callbacks are bound once; repeat calls are
    /// ignored.
    pub fn begin(&mut self, on_config: JsonCallback, on_command: JsonCallback) {
        if self.began {
            warn!("begin called twice; keeping original callbacks");
            return;
        }
        self.began = true;

        let identity_json = self.identity.to_json();
        self.log_line(&format!("[carrier] {identity_json}"));

        self.on_config = Some(on_config);
        self.on_command = Some(on_command);
        self.session.set_handlers_registered(true, true);

        self.init_display();
        self.init_network();
        self.init_mqtt();
        self.init_rest_api();
    }

    /// Main-loop hook. MQTT and REST are serviced only while the link is up;
    /// the display ticks unconditionally.
    pub fn tick(&mut self) {
        if self.eth.link_up() {
            self.eth.maintain();
            while let Some(event) = self.transport.poll() {
                self.handle_mqtt_event(event);
            }
            self.serve_api();
        }
        self.display.tick();
    }

    /// Replaces any previously supplied config fragment wholesale.
    pub fn set_config_schema(&mut self, json: &Value) {
        self.composer.set_config_schema(json);
    }

    /// Replaces any previously supplied command fragment wholesale.
    pub fn set_command_schema(&mut self, json: &Value) {
        self.composer.set_command_schema(json);
    }

    pub fn mqtt(&mut self) -> &mut MqttSession {
        &mut self.session
    }

    pub fn api(&mut self) -> &mut A {
        &mut self.api
    }

    pub fn display(&mut self) -> &mut D {
        &mut self.display
    }

    /// Publish to the status topic. A payload with an `index` is also
    /// rendered as a one-line event on the LCD, link or no link.
    pub fn publish_status(&mut self, json: &Value) -> bool {
        if let Some(line) = status_event_line(json) {
            self.display.show_event(&line);
        }

        if !self.eth.link_up() {
            return false;
        }

        let ok = self.session.publish_status(&mut self.transport, json);
        if ok {
            self.display.pulse_tx();
        }
        ok
    }

    /// Publish to the telemetry topic; link-guarded, no LCD event.
    pub fn publish_telemetry(&mut self, json: &Value) -> bool {
        if !self.eth.link_up() {
            return false;
        }

        let ok = self.session.publish_telemetry(&mut self.transport, json);
        if ok {
            self.display.pulse_tx();
        }
        ok
    }

    fn init_display(&mut self) {
        self.display.begin();
        let source = self.display.draw_header(
            self.identity.short_name,
            self.identity.maker,
            self.identity.version,
            self.identity.logo,
        );
        let line = match source {
            LogoSource::Filesystem => "[carrier] logo loaded from filesystem",
            LogoSource::Firmware => "[carrier] logo loaded from firmware image",
            LogoSource::BuiltIn => "[carrier] no logo found, using built-in default",
            LogoSource::Missing => "[carrier] no logo found",
        };
        self.log_line(line);
    }

    fn init_network(&mut self) {
        self.mac = derive_ethernet_mac(self.system.base_mac());
        self.log_line(&format!(
            "[carrier] ethernet mac address: {}",
            format_mac(self.mac)
        ));

        let ip = match self.eth.bring_up(self.mac) {
            Ok(ip) => ip,
            Err(err) => {
                self.log_line(&format!("[carrier] {err}"));
                Ipv4Addr::UNSPECIFIED
            }
        };
        self.log_line(&format!("[carrier] ip address: {ip}"));
    }

    fn init_mqtt(&mut self) {
        // Must run before the REST API loads persisted settings, which take
        // precedence over this default.
        self.session.set_client_id(&default_client_id(self.mac));
    }

    fn init_rest_api(&mut self) {
        self.api.begin();
        if let Some(settings) = self.api.load_settings() {
            self.session.apply_settings(settings);
        }
        self.transport.configure(self.session.settings());
    }

    fn handle_mqtt_event(&mut self, event: MqttEvent) {
        match event {
            MqttEvent::Connected => self.handle_connected(),
            MqttEvent::Disconnected(reason) => {
                self.log_line(&format!("[carrier] mqtt {}", reason.as_str()));
            }
            MqttEvent::Message { topic, payload } => self.handle_frame(&topic, &payload),
        }
    }

    fn handle_connected(&mut self) {
        self.log.set_topic(self.session.log_topic());

        self.transport.subscribe(&self.session.config_topic());
        self.transport.subscribe(&self.session.command_topic());

        let adoption = self.build_adoption();
        self.session.publish_adopt(&mut self.transport, &adoption);

        self.log_line("[carrier] mqtt connected");
    }

    fn handle_frame(&mut self, topic: &str, payload: &[u8]) {
        self.display.pulse_rx();

        match self.session.receive(topic, payload) {
            Ok(Some(Inbound::Config(json))) => self.dispatch_config(json),
            Ok(Some(Inbound::Command(json))) => self.dispatch_command(json),
            Ok(None) => {}
            Err(err) => self.log_line(&format!("[carrier] {err}")),
        }
    }

    /// Platform-recognised keys first, then the firmware callback with the
    /// same payload; firmware sees the platform keys too.
    fn dispatch_config(&mut self, json: Value) {
        let tuning = DisplayTuning::from_json(&json);
        if let Some(percent) = tuning.active_brightness_percent {
            self.display.set_active_brightness(percent);
        }
        if let Some(percent) = tuning.inactive_brightness_percent {
            self.display.set_inactive_brightness(percent);
        }
        if let Some(seconds) = tuning.active_display_seconds {
            self.display.set_active_display_seconds(seconds);
        }
        if let Some(seconds) = tuning.event_display_seconds {
            self.display.set_event_display_seconds(seconds);
        }

        if let Some(callback) = self.on_config.as_mut() {
            callback(&json);
        }
    }

    fn dispatch_command(&mut self, json: Value) {
        if json.get("restart").and_then(Value::as_bool).unwrap_or(false) {
            self.system.restart();
            // On hardware restart never returns; nothing else from this
            // message may be delivered.
            return;
        }

        if let Some(callback) = self.on_command.as_mut() {
            callback(&json);
        }
    }

    fn serve_api(&mut self) {
        while let Some(exchange) = self.api.next_request() {
            match exchange.request {
                ApiRequest::Adopt => (exchange.respond)(self.build_adoption()),
                ApiRequest::GetMqttSettings => {
                    let view = MqttSettingsView::from(self.session.settings());
                    (exchange.respond)(serde_json::to_value(view).unwrap_or(Value::Null));
                }
                ApiRequest::SetMqttSettings(settings) => {
                    self.session.apply_settings(settings.clone());
                    self.transport.configure(self.session.settings());
                    let saved = self.api.save_settings(&settings);
                    (exchange.respond)(json!({ "saved": saved }));
                }
                ApiRequest::Restart => {
                    (exchange.respond)(json!({ "restart": true }));
                    self.system.restart();
                }
            }
        }
    }

    fn build_adoption(&self) -> Value {
        let network = NetworkReport {
            ip: self.eth.ip(),
            mac: self.mac,
        };
        build_adoption(&self.identity, self.system.stats(), network, &self.composer)
    }

    fn log_line(&mut self, line: &str) {
        info!("{line}");
        if let Some(topic) = self.log.topic() {
            if self.transport.connected() {
                self.transport.publish(topic, line.as_bytes(), false);
            }
        }
    }
}

/// Firmware can log through the façade directly; completed lines fan out to
/// serial and, when connected, the MQTT log topic.
impl<E, T, A, D, S> io::Write for Carrier<E, T, A, D, S>
where
    E: EthernetPort,
    T: MqttTransport,
    A: ApiPort,
    D: DisplayPort,
    S: SystemPort,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let lines = self.log.accept(buf);
        for line in &lines {
            self.log_line(line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use crate::ports::ApiExchange;
    use crate::sim::{SimApi, SimDisplay, SimEthernet, SimMqtt, SimSystem};

    const BASE_MAC: [u8; 6] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xF0];

    fn identity() -> FirmwareInfo {
        FirmwareInfo::new("Demo Firmware", "demo", "Example Maker", "1.2.3")
    }

    type SimCarrier = Carrier<SimEthernet, SimMqtt, SimApi, SimDisplay, SimSystem>;

    fn carrier() -> SimCarrier {
        Carrier::new(
            identity(),
            SimEthernet::new([192, 168, 1, 52]),
            SimMqtt::new(),
            SimApi::new(),
            SimDisplay::new(),
            SimSystem::new(BASE_MAC),
        )
    }

    fn noop() -> JsonCallback {
        Box::new(|_| {})
    }

    fn recorder(seen: &Rc<RefCell<Vec<Value>>>) -> JsonCallback {
        let seen = Rc::clone(seen);
        Box::new(move |json| seen.borrow_mut().push(json.clone()))
    }

    #[test]
    fn begin_installs_mac_derived_client_id() {
        let mut carrier = carrier();
        carrier.begin(noop(), noop());

        assert_eq!(carrier.mqtt().settings().client_id, "ddeef3");
    }

    #[test]
    fn persisted_settings_override_default_client_id() {
        let mut carrier = carrier();
        carrier.api().set_stored_settings(carrier_common::MqttSettings {
            broker: "192.168.1.10".to_string(),
            client_id: "rack-main".to_string(),
            ..Default::default()
        });

        carrier.begin(noop(), noop());

        assert_eq!(carrier.mqtt().settings().client_id, "rack-main");
        assert_eq!(carrier.mqtt().settings().broker, "192.168.1.10");
    }

    #[test]
    fn second_begin_keeps_original_callbacks() {
        let first = Rc::new(RefCell::new(Vec::new()));
        let second = Rc::new(RefCell::new(Vec::new()));

        let mut carrier = carrier();
        carrier.begin(recorder(&first), noop());
        carrier.begin(recorder(&second), noop());

        let conf_topic = carrier.mqtt().config_topic();
        carrier.transport.inject_message(&conf_topic, br#"{"x":1}"#);
        carrier.tick();

        assert_eq!(first.borrow().len(), 1);
        assert!(second.borrow().is_empty());
    }

    #[test]
    fn tick_always_ticks_display_even_with_link_down() {
        let mut carrier = carrier();
        carrier.begin(noop(), noop());
        carrier.eth.set_link(false);

        carrier.tick();
        carrier.tick();

        assert_eq!(carrier.display().ticks, 2);
    }

    #[test]
    fn config_message_applies_platform_keys_then_firmware_callback() {
        let journal = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::new(RefCell::new(Vec::new()));

        let mut carrier = carrier();
        carrier.display.attach_journal(&journal);
        {
            let journal = Rc::clone(&journal);
            let seen = Rc::clone(&seen);
            carrier.begin(
                Box::new(move |json| {
                    journal.borrow_mut().push("firmware config".to_string());
                    seen.borrow_mut().push(json.clone());
                }),
                noop(),
            );
        }

        let payload = json!({"activeBrightnessPercent": 80, "mySetting": 42});
        let conf_topic = carrier.mqtt().config_topic();
        carrier
            .transport
            .inject_message(&conf_topic, payload.to_string().as_bytes());
        carrier.tick();

        assert_eq!(carrier.display().active_brightness, Some(80));
        // Platform handling precedes the firmware callback, which sees the
        // full payload including the platform key.
        assert_eq!(
            journal.borrow().as_slice(),
            ["set_active_brightness(80)", "firmware config"]
        );
        assert_eq!(seen.borrow().as_slice(), [payload]);
    }

    #[test]
    fn restart_command_is_terminal() {
        let seen = Rc::new(RefCell::new(Vec::new()));

        let mut carrier = carrier();
        let restarted = carrier.system.restarted_handle();
        carrier.begin(noop(), recorder(&seen));

        let cmnd_topic = carrier.mqtt().command_topic();
        carrier
            .transport
            .inject_message(&cmnd_topic, br#"{"restart": true, "foo": 1}"#);
        carrier.tick();

        assert!(restarted.get());
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn restart_false_falls_through_to_firmware() {
        let seen = Rc::new(RefCell::new(Vec::new()));

        let mut carrier = carrier();
        let restarted = carrier.system.restarted_handle();
        carrier.begin(noop(), recorder(&seen));

        let cmnd_topic = carrier.mqtt().command_topic();
        carrier
            .transport
            .inject_message(&cmnd_topic, br#"{"restart": false, "foo": 1}"#);
        carrier.tick();

        assert!(!restarted.get());
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn receive_errors_are_swallowed() {
        let mut carrier = carrier();
        carrier.begin(noop(), noop());

        let conf_topic = carrier.mqtt().config_topic();
        carrier.transport.inject_message(&conf_topic, b"{broken");
        carrier.transport.inject_message(&conf_topic, b"");
        carrier.tick();

        // Both frames pulsed the RX indicator and were dropped.
        assert_eq!(carrier.display().rx_pulses, 2);
    }

    #[test]
    fn status_publish_renders_event_and_returns_false_when_link_down() {
        let mut carrier = carrier();
        carrier.begin(noop(), noop());
        carrier.eth.set_link(false);

        let ok = carrier.publish_status(&json!({"index": 7, "type": "button", "event": "button"}));

        assert!(!ok);
        assert_eq!(carrier.display().events, ["[  7] button"]);
        assert_eq!(carrier.display().tx_pulses, 0);
    }

    #[test]
    fn status_publish_with_link_up_publishes_and_pulses_tx() {
        let mut carrier = carrier();
        carrier.begin(noop(), noop());

        let ok = carrier.publish_status(&json!({"index": 12, "type": "button", "event": "press"}));

        assert!(ok);
        assert_eq!(carrier.display().events, ["[ 12] button press"]);
        assert_eq!(carrier.display().tx_pulses, 1);

        let published = carrier.transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "stat/ddeef3");
    }

    #[test]
    fn failed_publish_does_not_pulse_tx() {
        let mut carrier = carrier();
        carrier.begin(noop(), noop());
        carrier.transport.set_publish_result(false);

        let ok = carrier.publish_status(&json!({"index": 1}));

        assert!(!ok);
        assert_eq!(carrier.display().tx_pulses, 0);
    }

    #[test]
    fn telemetry_publish_has_no_lcd_event() {
        let mut carrier = carrier();
        carrier.begin(noop(), noop());

        let ok = carrier.publish_telemetry(&json!({"index": 3, "uptime": 12}));

        assert!(ok);
        assert!(carrier.display().events.is_empty());
        assert_eq!(carrier.transport.published()[0].0, "tele/ddeef3");
    }

    #[test]
    fn connect_subscribes_publishes_adoption_and_sets_log_topic() {
        let mut carrier = carrier();
        carrier.begin(noop(), noop());

        carrier.transport.inject_event(MqttEvent::Connected);
        carrier.tick();

        let subscribed = carrier.transport.subscribed();
        assert!(subscribed.contains(&"conf/ddeef3".to_string()));
        assert!(subscribed.contains(&"cmnd/ddeef3".to_string()));

        let published = carrier.transport.published();
        let adopt = published
            .iter()
            .find(|(topic, _, _)| topic == "stat/ddeef3/adopt")
            .expect("adoption published on connect");
        assert!(adopt.2, "adoption is retained");

        let adoption: Value = serde_json::from_slice(&adopt.1).unwrap();
        assert_eq!(adoption["network"]["mac"], "AA:BB:CC:DD:EE:F3");
        assert_eq!(adoption["network"]["ip"], "192.168.1.52");

        // The "mqtt connected" line fans out to the log topic.
        let logged = published
            .iter()
            .any(|(topic, payload, _)| topic == "log/ddeef3" && payload.ends_with(b"mqtt connected"));
        assert!(logged);
    }

    #[test]
    fn adoption_request_reflects_latest_schema_only() {
        let mut carrier = carrier();
        carrier.begin(noop(), noop());
        carrier.set_config_schema(&json!({"first": {"type": "string"}}));
        carrier.set_config_schema(&json!({"foo": {"type": "string"}}));

        let reply = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&reply);
        carrier.api().push_request(ApiExchange {
            request: ApiRequest::Adopt,
            respond: Box::new(move |json| *slot.lock().unwrap() = Some(json)),
        });
        carrier.tick();

        let adoption = reply.lock().unwrap().take().expect("adopt served");
        let properties = &adoption["configSchema"]["properties"];
        assert!(properties.get("first").is_none());
        for key in [
            "foo",
            "activeBrightnessPercent",
            "inactiveBrightnessPercent",
            "activeDisplaySeconds",
            "eventDisplaySeconds",
        ] {
            assert!(properties.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn settings_update_over_api_reconfigures_and_persists() {
        let mut carrier = carrier();
        carrier.begin(noop(), noop());

        let settings = carrier_common::MqttSettings {
            broker: "10.0.0.9".to_string(),
            client_id: "renamed".to_string(),
            ..Default::default()
        };
        carrier.api().push_request(ApiExchange {
            request: ApiRequest::SetMqttSettings(settings.clone()),
            respond: Box::new(|_| {}),
        });
        carrier.tick();

        assert_eq!(carrier.mqtt().settings().client_id, "renamed");
        assert_eq!(carrier.transport.configured().last().unwrap().broker, "10.0.0.9");
        assert_eq!(carrier.api().saved().last(), Some(&settings));
    }

    #[test]
    fn api_is_not_served_while_link_down() {
        let mut carrier = carrier();
        carrier.begin(noop(), noop());
        carrier.eth.set_link(false);

        let reply = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&reply);
        carrier.api().push_request(ApiExchange {
            request: ApiRequest::Adopt,
            respond: Box::new(move |json| *slot.lock().unwrap() = Some(json)),
        });
        carrier.tick();

        assert!(reply.lock().unwrap().is_none());
    }

    #[test]
    fn write_forwards_completed_lines_to_the_log() {
        use std::io::Write;

        let mut carrier = carrier();
        carrier.begin(noop(), noop());
        carrier.transport.inject_event(MqttEvent::Connected);
        carrier.tick();

        carrier.write_all(b"hello from firmware\n").unwrap();

        let published = carrier.transport.published();
        assert!(published
            .iter()
            .any(|(topic, payload, _)| topic == "log/ddeef3"
                && payload == b"hello from firmware"));
    }

    #[test]
    fn dhcp_failure_reports_unspecified_ip() {
        let mut carrier = carrier();
        carrier.eth.fail_dhcp(true);
        carrier.begin(noop(), noop());

        // Bring-up failed but the board stays alive; publishes are guarded
        // by the link state, which SimEthernet keeps down after a failure.
        assert!(!carrier.publish_status(&json!({"state": "idle"})));
    }
}
