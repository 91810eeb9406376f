//! Board support for the Ethernet carrier: a single façade binding the MQTT
//! session, REST API, LCD and Ethernet collaborators behind the firmware's
//! startup and main-loop hooks.

pub mod facade;
pub mod logging;
pub mod mqtt;
pub mod ports;
pub mod sim;

#[cfg(feature = "esp32")]
pub mod esp;
#[cfg(not(feature = "esp32"))]
pub mod host;

pub use facade::{Carrier, JsonCallback};
pub use mqtt::{Inbound, MqttSession, MqttSettingsView, ReceiveError};
pub use ports::{
    ApiExchange, ApiPort, ApiRequest, DisconnectReason, DisplayPort, EthError, EthernetPort,
    LogoSource, MqttEvent, MqttTransport, SystemPort,
};
