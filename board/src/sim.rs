//! Simulated port implementations for development off the bench and for the
//! façade tests. State that outlives the façade (restart flags, journals) is
//! shared through `Rc` handles; the loop model is single-threaded.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::rc::Rc;

use carrier_common::{MqttSettings, SystemStats};

use crate::ports::{
    ApiExchange, ApiPort, DisplayPort, EthError, EthernetPort, LogoSource, MqttEvent,
    MqttTransport, SystemPort,
};

#[derive(Debug)]
pub struct SimEthernet {
    ip: Ipv4Addr,
    link: bool,
    fail_dhcp: bool,
    up: bool,
}

impl SimEthernet {
    pub fn new(ip: [u8; 4]) -> Self {
        Self {
            ip: Ipv4Addr::from(ip),
            link: true,
            fail_dhcp: false,
            up: false,
        }
    }

    pub fn set_link(&mut self, link: bool) {
        self.link = link;
    }

    pub fn fail_dhcp(&mut self, fail: bool) {
        self.fail_dhcp = fail;
    }
}

impl EthernetPort for SimEthernet {
    fn bring_up(&mut self, _mac: [u8; 6]) -> Result<Ipv4Addr, EthError> {
        if self.fail_dhcp {
            self.up = false;
            return Err(EthError::DhcpTimeout(15_000));
        }
        self.up = true;
        Ok(self.ip)
    }

    fn maintain(&mut self) {}

    fn link_up(&self) -> bool {
        self.link && self.up
    }

    fn ip(&self) -> Ipv4Addr {
        if self.up {
            self.ip
        } else {
            Ipv4Addr::UNSPECIFIED
        }
    }
}

#[derive(Debug, Default)]
pub struct SimMqtt {
    connected: bool,
    publish_result: bool,
    queue: VecDeque<MqttEvent>,
    published: Vec<(String, Vec<u8>, bool)>,
    subscribed: Vec<String>,
    configured: Vec<MqttSettings>,
}

impl SimMqtt {
    pub fn new() -> Self {
        Self {
            connected: true,
            publish_result: true,
            ..Default::default()
        }
    }

    pub fn inject_event(&mut self, event: MqttEvent) {
        self.queue.push_back(event);
    }

    pub fn inject_message(&mut self, topic: &str, payload: &[u8]) {
        self.queue.push_back(MqttEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
    }

    pub fn set_publish_result(&mut self, result: bool) {
        self.publish_result = result;
    }

    pub fn published(&self) -> &[(String, Vec<u8>, bool)] {
        &self.published
    }

    pub fn subscribed(&self) -> &[String] {
        &self.subscribed
    }

    pub fn configured(&self) -> &[MqttSettings] {
        &self.configured
    }
}

impl MqttTransport for SimMqtt {
    fn configure(&mut self, settings: &MqttSettings) {
        self.configured.push(settings.clone());
    }

    fn connected(&self) -> bool {
        self.connected
    }

    fn poll(&mut self) -> Option<MqttEvent> {
        self.queue.pop_front()
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> bool {
        if !self.publish_result {
            return false;
        }
        self.published
            .push((topic.to_string(), payload.to_vec(), retain));
        true
    }

    fn subscribe(&mut self, topic: &str) -> bool {
        self.subscribed.push(topic.to_string());
        true
    }
}

#[derive(Debug, Default)]
pub struct SimDisplay {
    pub active_brightness: Option<u8>,
    pub inactive_brightness: Option<u8>,
    pub active_display_seconds: Option<u16>,
    pub event_display_seconds: Option<u16>,
    pub events: Vec<String>,
    pub rx_pulses: u32,
    pub tx_pulses: u32,
    pub ticks: u32,
    pub header: Option<String>,
    journal: Option<Rc<RefCell<Vec<String>>>>,
}

impl SimDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record setter calls into a shared journal so tests can assert order
    /// across the display and the firmware callbacks.
    pub fn attach_journal(&mut self, journal: &Rc<RefCell<Vec<String>>>) {
        self.journal = Some(Rc::clone(journal));
    }

    fn journal(&mut self, entry: String) {
        if let Some(journal) = &self.journal {
            journal.borrow_mut().push(entry);
        }
    }
}

impl DisplayPort for SimDisplay {
    fn begin(&mut self) {}

    fn draw_header(
        &mut self,
        short_name: &str,
        maker: &str,
        version: &str,
        logo: Option<&[u8]>,
    ) -> LogoSource {
        self.header = Some(format!("{short_name} {version} by {maker}"));
        if logo.is_some() {
            LogoSource::Firmware
        } else {
            LogoSource::BuiltIn
        }
    }

    fn set_active_brightness(&mut self, percent: u8) {
        self.journal(format!("set_active_brightness({percent})"));
        self.active_brightness = Some(percent);
    }

    fn set_inactive_brightness(&mut self, percent: u8) {
        self.journal(format!("set_inactive_brightness({percent})"));
        self.inactive_brightness = Some(percent);
    }

    fn set_active_display_seconds(&mut self, seconds: u16) {
        self.journal(format!("set_active_display_seconds({seconds})"));
        self.active_display_seconds = Some(seconds);
    }

    fn set_event_display_seconds(&mut self, seconds: u16) {
        self.journal(format!("set_event_display_seconds({seconds})"));
        self.event_display_seconds = Some(seconds);
    }

    fn pulse_rx(&mut self) {
        self.rx_pulses += 1;
    }

    fn pulse_tx(&mut self) {
        self.tx_pulses += 1;
    }

    fn show_event(&mut self, text: &str) {
        self.events.push(text.to_string());
    }

    fn tick(&mut self) {
        self.ticks += 1;
    }
}

#[derive(Debug)]
pub struct SimSystem {
    base_mac: [u8; 6],
    stats: SystemStats,
    restarted: Rc<Cell<bool>>,
}

impl SimSystem {
    pub fn new(base_mac: [u8; 6]) -> Self {
        Self {
            base_mac,
            stats: SystemStats::default(),
            restarted: Rc::new(Cell::new(false)),
        }
    }

    pub fn set_stats(&mut self, stats: SystemStats) {
        self.stats = stats;
    }

    /// Handle that stays valid after the system port moves into the façade.
    pub fn restarted_handle(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.restarted)
    }
}

impl SystemPort for SimSystem {
    fn base_mac(&self) -> [u8; 6] {
        self.base_mac
    }

    fn stats(&self) -> SystemStats {
        self.stats
    }

    fn restart(&mut self) {
        self.restarted.set(true);
    }
}

#[derive(Default)]
pub struct SimApi {
    stored: Option<MqttSettings>,
    saved: Vec<MqttSettings>,
    pending: VecDeque<ApiExchange>,
    listening: bool,
}

impl SimApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stored_settings(&mut self, settings: MqttSettings) {
        self.stored = Some(settings);
    }

    pub fn push_request(&mut self, exchange: ApiExchange) {
        self.pending.push_back(exchange);
    }

    pub fn saved(&self) -> &[MqttSettings] {
        &self.saved
    }

    pub fn listening(&self) -> bool {
        self.listening
    }
}

impl ApiPort for SimApi {
    fn begin(&mut self) {
        self.listening = true;
    }

    fn load_settings(&mut self) -> Option<MqttSettings> {
        self.stored.clone()
    }

    fn save_settings(&mut self, settings: &MqttSettings) -> bool {
        self.saved.push(settings.clone());
        true
    }

    fn next_request(&mut self) -> Option<ApiExchange> {
        self.pending.pop_front()
    }
}
