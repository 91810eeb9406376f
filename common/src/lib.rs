pub mod adopt;
pub mod config;
pub mod event;
pub mod identity;
pub mod net;
pub mod schema;

pub use adopt::{build_adoption, NetworkReport, SystemStats};
pub use config::{DisplayTuning, MqttSettings};
pub use event::status_event_line;
pub use identity::FirmwareInfo;
pub use net::{default_client_id, derive_ethernet_mac, format_mac};
pub use schema::{merge_json, SchemaComposer, JSON_SCHEMA_VERSION};
