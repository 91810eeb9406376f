use std::net::Ipv4Addr;

use serde_json::Value;
use thiserror::Error;

use carrier_common::{MqttSettings, SystemStats};

#[derive(Debug, Error)]
pub enum EthError {
    #[error("dhcp lease not acquired within {0} ms")]
    DhcpTimeout(u64),
    #[error("ethernet driver error: {0}")]
    Driver(String),
}

/// Disconnect states reported by the MQTT transport, matching the broker
/// handshake return codes plus the transport-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ConnectionTimeout,
    ConnectionLost,
    ConnectFailed,
    Disconnected,
    BadProtocol,
    BadClientId,
    Unavailable,
    BadCredentials,
    Unauthorized,
}

impl DisconnectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionTimeout => "connection timeout",
            Self::ConnectionLost => "connection lost",
            Self::ConnectFailed => "connect failed",
            Self::Disconnected => "disconnected",
            Self::BadProtocol => "bad protocol",
            Self::BadClientId => "bad client id",
            Self::Unavailable => "unavailable",
            Self::BadCredentials => "bad credentials",
            Self::Unauthorized => "unauthorised",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttEvent {
    Connected,
    Disconnected(DisconnectReason),
    Message { topic: String, payload: Vec<u8> },
}

/// Wire-level MQTT collaborator. Connection upkeep and reconnection are the
/// transport's responsibility; the façade only pumps events and publishes.
pub trait MqttTransport {
    fn configure(&mut self, settings: &MqttSettings);
    fn connected(&self) -> bool;
    fn poll(&mut self) -> Option<MqttEvent>;
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> bool;
    fn subscribe(&mut self, topic: &str) -> bool;
}

/// Where the splash logo was sourced from, in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoSource {
    Filesystem,
    Firmware,
    BuiltIn,
    Missing,
}

pub trait DisplayPort {
    fn begin(&mut self);
    fn draw_header(
        &mut self,
        short_name: &str,
        maker: &str,
        version: &str,
        logo: Option<&[u8]>,
    ) -> LogoSource;
    fn set_active_brightness(&mut self, percent: u8);
    fn set_inactive_brightness(&mut self, percent: u8);
    fn set_active_display_seconds(&mut self, seconds: u16);
    fn set_event_display_seconds(&mut self, seconds: u16);
    fn pulse_rx(&mut self);
    fn pulse_tx(&mut self);
    fn show_event(&mut self, text: &str);
    fn tick(&mut self);
}

pub trait EthernetPort {
    /// Reset the PHY and acquire a DHCP lease for the given MAC.
    fn bring_up(&mut self, mac: [u8; 6]) -> Result<Ipv4Addr, EthError>;
    /// Maintain the DHCP lease; called once per loop iteration while up.
    fn maintain(&mut self);
    fn link_up(&self) -> bool;
    /// 0.0.0.0 while no lease is held.
    fn ip(&self) -> Ipv4Addr;
}

pub trait SystemPort {
    fn base_mac(&self) -> [u8; 6];
    fn stats(&self) -> SystemStats;
    /// On hardware this does not return.
    fn restart(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRequest {
    Adopt,
    GetMqttSettings,
    SetMqttSettings(MqttSettings),
    Restart,
}

/// One pending REST exchange, pumped from the cooperative loop. The adapter
/// owns the transport side of the response.
pub struct ApiExchange {
    pub request: ApiRequest,
    pub respond: Box<dyn FnOnce(Value) + Send>,
}

pub trait ApiPort {
    /// Start listening. Called once during `begin`.
    fn begin(&mut self);
    /// Persisted MQTT settings, if any. Loaded after the MAC-derived client
    /// id default is installed, so persisted values win.
    fn load_settings(&mut self) -> Option<MqttSettings>;
    fn save_settings(&mut self, settings: &MqttSettings) -> bool;
    fn next_request(&mut self) -> Option<ApiExchange>;
}
