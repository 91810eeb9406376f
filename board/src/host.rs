//! Adapters for running carrier firmware on a development machine: a real
//! MQTT connection via rumqttc, the REST API served by axum on a dedicated
//! thread and bridged into the cooperative loop, and a JSON file standing in
//! for the on-device settings store.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rumqttc::{Client, ConnectReturnCode, Connection, ConnectionError, Event, MqttOptions, Packet, QoS};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use carrier_common::{MqttSettings, SystemStats};

use crate::ports::{
    ApiExchange, ApiPort, ApiRequest, DisconnectReason, DisplayPort, EthError, EthernetPort,
    LogoSource, MqttEvent, MqttTransport, SystemPort,
};

pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

fn data_dir() -> PathBuf {
    std::env::var("CARRIER_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.carrier"))
}

/// MQTT transport over the synchronous rumqttc client. The client's event
/// loop owns reconnection; this adapter only surfaces events.
#[derive(Default)]
pub struct HostMqtt {
    client: Option<Client>,
    connection: Option<Connection>,
    connected: bool,
}

impl HostMqtt {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MqttTransport for HostMqtt {
    fn configure(&mut self, settings: &MqttSettings) {
        if settings.broker.is_empty() {
            warn!("mqtt broker not configured; transport idle");
            self.client = None;
            self.connection = None;
            self.connected = false;
            return;
        }

        let mut options = MqttOptions::new(
            settings.client_id.clone(),
            settings.broker.clone(),
            settings.port,
        );
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) =
            (settings.username.clone(), settings.password.clone())
        {
            options.set_credentials(username, password);
        }

        let (client, connection) = Client::new(options, 64);
        self.client = Some(client);
        self.connection = Some(connection);
        self.connected = false;
    }

    fn connected(&self) -> bool {
        self.connected
    }

    fn poll(&mut self) -> Option<MqttEvent> {
        let connection = self.connection.as_mut()?;

        match connection.recv_timeout(Duration::from_millis(10)) {
            Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                if ack.code == ConnectReturnCode::Success {
                    self.connected = true;
                    Some(MqttEvent::Connected)
                } else {
                    self.connected = false;
                    Some(MqttEvent::Disconnected(map_return_code(ack.code)))
                }
            }
            Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => Some(MqttEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            }),
            Ok(Ok(_)) => None,
            Ok(Err(err)) => {
                if self.connected {
                    self.connected = false;
                    Some(MqttEvent::Disconnected(map_connection_error(&err)))
                } else {
                    // Broker unreachable; back off so the cooperative loop
                    // is not spun flat out by immediate errors.
                    debug!("mqtt connect attempt failed: {err}");
                    thread::sleep(Duration::from_millis(250));
                    None
                }
            }
            Err(_) => None,
        }
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> bool {
        let Some(client) = self.client.as_mut() else {
            return false;
        };
        client
            .publish(topic, QoS::AtMostOnce, retain, payload)
            .is_ok()
    }

    fn subscribe(&mut self, topic: &str) -> bool {
        let Some(client) = self.client.as_mut() else {
            return false;
        };
        client.subscribe(topic, QoS::AtMostOnce).is_ok()
    }
}

fn map_return_code(code: ConnectReturnCode) -> DisconnectReason {
    match code {
        ConnectReturnCode::RefusedProtocolVersion => DisconnectReason::BadProtocol,
        ConnectReturnCode::BadClientId => DisconnectReason::BadClientId,
        ConnectReturnCode::ServiceUnavailable => DisconnectReason::Unavailable,
        ConnectReturnCode::BadUserNamePassword => DisconnectReason::BadCredentials,
        ConnectReturnCode::NotAuthorized => DisconnectReason::Unauthorized,
        _ => DisconnectReason::ConnectFailed,
    }
}

fn map_connection_error(err: &ConnectionError) -> DisconnectReason {
    match err {
        ConnectionError::ConnectionRefused(code) => map_return_code(*code),
        ConnectionError::Io(_) => DisconnectReason::ConnectionLost,
        ConnectionError::NetworkTimeout => DisconnectReason::ConnectionTimeout,
        _ => DisconnectReason::Disconnected,
    }
}

/// REST API served by axum on its own thread. Requests cross into the
/// cooperative loop over an unbounded channel and are answered through a
/// oneshot carried in the exchange.
pub struct HostApi {
    port: u16,
    settings_path: PathBuf,
    rx: Option<mpsc::UnboundedReceiver<ApiExchange>>,
}

impl HostApi {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            settings_path: data_dir().join("mqtt.json"),
            rx: None,
        }
    }

    /// Bind eagerly, propagating listener errors to the caller. `begin`
    /// becomes a no-op afterwards.
    pub fn bind(port: u16) -> anyhow::Result<Self> {
        let mut api = Self::new(port);
        let listener = std::net::TcpListener::bind(("0.0.0.0", port))
            .with_context(|| format!("failed to bind rest api listener on port {port}"))?;
        api.rx = Some(spawn_server(listener));
        Ok(api)
    }
}

fn spawn_server(listener: std::net::TcpListener) -> mpsc::UnboundedReceiver<ApiExchange> {
    let (tx, rx) = mpsc::unbounded_channel();

    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!("rest api runtime failed to start: {err}");
                return;
            }
        };

        runtime.block_on(async move {
            if let Err(err) = listener.set_nonblocking(true) {
                warn!("rest api listener setup failed: {err}");
                return;
            }
            let listener = match tokio::net::TcpListener::from_std(listener) {
                Ok(listener) => listener,
                Err(err) => {
                    warn!("rest api listener setup failed: {err}");
                    return;
                }
            };

            let app = Router::new()
                .route("/adopt", get(handle_adopt))
                .route("/mqtt", get(handle_get_mqtt).post(handle_post_mqtt))
                .route("/restart", post(handle_restart))
                .with_state(tx);

            if let Err(err) = axum::serve(listener, app).await {
                warn!("rest api server stopped: {err}");
            }
        });
    });

    rx
}

type ApiSender = mpsc::UnboundedSender<ApiExchange>;

async fn exchange(tx: &ApiSender, request: ApiRequest) -> Result<Json<Value>, StatusCode> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let exchange = ApiExchange {
        request,
        respond: Box::new(move |json| {
            let _ = reply_tx.send(json);
        }),
    };
    tx.send(exchange).map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    match tokio::time::timeout(Duration::from_secs(5), reply_rx).await {
        Ok(Ok(json)) => Ok(Json(json)),
        // The loop is stalled or gone; either way the exchange is dead.
        _ => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

async fn handle_adopt(State(tx): State<ApiSender>) -> Result<Json<Value>, StatusCode> {
    exchange(&tx, ApiRequest::Adopt).await
}

async fn handle_get_mqtt(State(tx): State<ApiSender>) -> Result<Json<Value>, StatusCode> {
    exchange(&tx, ApiRequest::GetMqttSettings).await
}

async fn handle_post_mqtt(
    State(tx): State<ApiSender>,
    Json(settings): Json<MqttSettings>,
) -> Result<Json<Value>, StatusCode> {
    exchange(&tx, ApiRequest::SetMqttSettings(settings)).await
}

async fn handle_restart(State(tx): State<ApiSender>) -> Result<Json<Value>, StatusCode> {
    exchange(&tx, ApiRequest::Restart).await
}

impl ApiPort for HostApi {
    fn begin(&mut self) {
        if self.rx.is_some() {
            return;
        }
        match std::net::TcpListener::bind(("0.0.0.0", self.port)) {
            Ok(listener) => {
                self.rx = Some(spawn_server(listener));
                info!("rest api listening on port {}", self.port);
            }
            Err(err) => warn!("rest api bind failed on port {}: {err}", self.port),
        }
    }

    fn load_settings(&mut self) -> Option<MqttSettings> {
        let raw = std::fs::read(&self.settings_path).ok()?;
        match serde_json::from_slice(&raw) {
            Ok(settings) => Some(settings),
            Err(err) => {
                warn!(
                    "ignoring malformed settings file {}: {err}",
                    self.settings_path.display()
                );
                None
            }
        }
    }

    fn save_settings(&mut self, settings: &MqttSettings) -> bool {
        if let Some(parent) = self.settings_path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return false;
            }
        }
        match serde_json::to_vec_pretty(settings) {
            Ok(payload) => std::fs::write(&self.settings_path, payload).is_ok(),
            Err(_) => false,
        }
    }

    fn next_request(&mut self) -> Option<ApiExchange> {
        self.rx.as_mut()?.try_recv().ok()
    }
}

/// Stand-in for the carrier's PHY on a dev machine: the host network is
/// assumed up once "brought up", with a caller-supplied address.
pub struct HostEthernet {
    ip: Ipv4Addr,
    up: bool,
}

impl HostEthernet {
    pub fn new(ip: Ipv4Addr) -> Self {
        Self { ip, up: false }
    }
}

impl EthernetPort for HostEthernet {
    fn bring_up(&mut self, mac: [u8; 6]) -> Result<Ipv4Addr, EthError> {
        debug!(
            "host ethernet: no PHY to reset, reporting {} for {}",
            self.ip,
            carrier_common::format_mac(mac)
        );
        self.up = true;
        Ok(self.ip)
    }

    fn maintain(&mut self) {}

    fn link_up(&self) -> bool {
        self.up
    }

    fn ip(&self) -> Ipv4Addr {
        if self.up {
            self.ip
        } else {
            Ipv4Addr::UNSPECIFIED
        }
    }
}

/// Renders display traffic into the log stream.
#[derive(Debug, Default)]
pub struct ConsoleDisplay;

impl DisplayPort for ConsoleDisplay {
    fn begin(&mut self) {}

    fn draw_header(
        &mut self,
        short_name: &str,
        maker: &str,
        version: &str,
        logo: Option<&[u8]>,
    ) -> LogoSource {
        info!("display: {short_name} {version} by {maker}");
        if logo.is_some() {
            LogoSource::Firmware
        } else {
            LogoSource::Missing
        }
    }

    fn set_active_brightness(&mut self, percent: u8) {
        debug!("display: active brightness {percent}%");
    }

    fn set_inactive_brightness(&mut self, percent: u8) {
        debug!("display: inactive brightness {percent}%");
    }

    fn set_active_display_seconds(&mut self, seconds: u16) {
        debug!("display: active timeout {seconds}s");
    }

    fn set_event_display_seconds(&mut self, seconds: u16) {
        debug!("display: event timeout {seconds}s");
    }

    fn pulse_rx(&mut self) {}

    fn pulse_tx(&mut self) {}

    fn show_event(&mut self, text: &str) {
        info!("display event: {text}");
    }

    fn tick(&mut self) {}
}

pub struct HostSystem {
    base_mac: [u8; 6],
}

impl HostSystem {
    pub fn new(base_mac: [u8; 6]) -> Self {
        Self { base_mac }
    }
}

impl SystemPort for HostSystem {
    fn base_mac(&self) -> [u8; 6] {
        self.base_mac
    }

    fn stats(&self) -> SystemStats {
        // No chip counters on a dev machine; zeros per the adoption contract.
        SystemStats::default()
    }

    fn restart(&mut self) {
        info!("restart requested; exiting host process");
        std::process::exit(0);
    }
}
