//! Device-side adapters for the ESP32 carrier: W5500 Ethernet over SPI,
//! ESP-IDF MQTT client, HTTP server + NVS settings store, and chip system
//! info. The LCD driver is external; device firmware supplies its own
//! `DisplayPort` implementation (or `LogDisplay` for headless bring-up).

use std::net::Ipv4Addr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use embedded_svc::http::Method;
use embedded_svc::io::{Read as _, Write as _};
use embedded_svc::mqtt::client::{EventPayload, QoS};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, PinDriver};
use esp_idf_hal::spi::{config::DriverConfig, SpiDriver, SPI2};
use esp_idf_hal::units::FromValueType;
use esp_idf_svc::eth::{BlockingEth, EspEth, EthDriver, SpiEthChipset};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::http::server::{Configuration as HttpConfiguration, EspHttpServer};
use esp_idf_svc::log::EspLogger;
use esp_idf_svc::mqtt::client::{EspMqttClient, MqttClientConfiguration};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use log::{info, warn};
use serde_json::Value;

use carrier_common::{MqttSettings, SystemStats};

use crate::ports::{
    ApiExchange, ApiPort, ApiRequest, DisconnectReason, DisplayPort, EthError, EthernetPort,
    LogoSource, MqttEvent, MqttTransport, SystemPort,
};

pub const ETHERNET_CS_PIN: i32 = 5;
pub const PHY_RESET_PIN: i32 = 13;
pub const I2C_SDA_PIN: i32 = 21;
pub const I2C_SCL_PIN: i32 = 22;
pub const REST_API_PORT: u16 = 80;
pub const DHCP_TIMEOUT_MS: u64 = 15_000;
pub const DHCP_RESPONSE_TIMEOUT_MS: u64 = 4_000;

const NVS_NAMESPACE: &str = "carrier";
const NVS_SETTINGS_KEY: &str = "mqtt_json";
const NVS_SETTINGS_MAX: usize = 512;
const API_REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const SPI_BAUDRATE_MHZ: u32 = 20;

pub fn init_logging() {
    EspLogger::initialize_default();
}

/// SPI wiring for the W5500. Chip select is GPIO 5 and the PHY reset line
/// GPIO 13 on this carrier; the interrupt line varies by revision.
pub struct EthParts {
    pub spi: SPI2,
    pub sclk: AnyOutputPin,
    pub mosi: AnyOutputPin,
    pub miso: AnyIOPin,
    pub cs: AnyOutputPin,
    pub int: AnyIOPin,
    pub rst: AnyOutputPin,
    pub sysloop: EspSystemEventLoop,
}

pub struct EspEthernet {
    parts: Option<EthParts>,
    eth: Option<BlockingEth<EspEth<'static, SpiDriver<'static>>>>,
}

impl EspEthernet {
    pub fn new(parts: EthParts) -> Self {
        Self {
            parts: Some(parts),
            eth: None,
        }
    }
}

impl EthernetPort for EspEthernet {
    fn bring_up(&mut self, mac: [u8; 6]) -> Result<Ipv4Addr, EthError> {
        let parts = self
            .parts
            .take()
            .ok_or_else(|| EthError::Driver("ethernet already brought up".to_string()))?;

        // Hard reset sequence the W5500 expects on this carrier.
        {
            let mut rst = PinDriver::output(parts.rst)
                .map_err(|err| EthError::Driver(err.to_string()))?;
            rst.set_high().map_err(|err| EthError::Driver(err.to_string()))?;
            FreeRtos::delay_ms(250);
            rst.set_low().map_err(|err| EthError::Driver(err.to_string()))?;
            FreeRtos::delay_ms(50);
            rst.set_high().map_err(|err| EthError::Driver(err.to_string()))?;
            FreeRtos::delay_ms(350);
        }

        let spi = SpiDriver::new(
            parts.spi,
            parts.sclk,
            parts.mosi,
            Some(parts.miso),
            &DriverConfig::new(),
        )
        .map_err(|err| EthError::Driver(err.to_string()))?;

        let driver = EthDriver::new_spi(
            spi,
            parts.int,
            Some(parts.cs),
            None,
            SpiEthChipset::W5500,
            SPI_BAUDRATE_MHZ.MHz().into(),
            Some(&mac),
            None,
            parts.sysloop.clone(),
        )
        .map_err(|err| EthError::Driver(err.to_string()))?;

        let eth = EspEth::wrap(driver).map_err(|err| EthError::Driver(err.to_string()))?;
        let mut eth = BlockingEth::wrap(eth, parts.sysloop)
            .map_err(|err| EthError::Driver(err.to_string()))?;

        eth.start().map_err(|err| EthError::Driver(err.to_string()))?;
        eth.wait_netif_up()
            .map_err(|_| EthError::DhcpTimeout(DHCP_TIMEOUT_MS))?;

        let ip = eth
            .eth()
            .netif()
            .get_ip_info()
            .map(|info| info.ip)
            .unwrap_or(Ipv4Addr::UNSPECIFIED);

        self.eth = Some(eth);
        Ok(ip)
    }

    fn maintain(&mut self) {
        // lwIP renews the DHCP lease on its own.
    }

    fn link_up(&self) -> bool {
        self.eth
            .as_ref()
            .map(|eth| eth.eth().is_up().unwrap_or(false))
            .unwrap_or(false)
    }

    fn ip(&self) -> Ipv4Addr {
        self.eth
            .as_ref()
            .and_then(|eth| eth.eth().netif().get_ip_info().ok())
            .map(|info| info.ip)
            .unwrap_or(Ipv4Addr::UNSPECIFIED)
    }
}

/// ESP-IDF MQTT client. The client's own task handles reconnection; a pump
/// thread forwards its events into a channel the cooperative loop drains.
#[derive(Default)]
pub struct EspMqtt {
    client: Option<EspMqttClient<'static>>,
    events: Option<Receiver<MqttEvent>>,
    connected: bool,
}

impl EspMqtt {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MqttTransport for EspMqtt {
    fn configure(&mut self, settings: &MqttSettings) {
        if settings.broker.is_empty() {
            warn!("mqtt broker not configured; transport idle");
            self.client = None;
            self.events = None;
            self.connected = false;
            return;
        }

        let url = format!("mqtt://{}:{}", settings.broker, settings.port);
        let config = MqttClientConfiguration {
            client_id: Some(&settings.client_id),
            username: settings.username.as_deref(),
            password: settings.password.as_deref(),
            ..Default::default()
        };

        match EspMqttClient::new(&url, &config) {
            Ok((client, mut connection)) => {
                let (tx, rx): (Sender<MqttEvent>, Receiver<MqttEvent>) = mpsc::channel();
                thread::spawn(move || {
                    while let Ok(event) = connection.next() {
                        let mapped = match event.payload() {
                            EventPayload::Connected(_) => Some(MqttEvent::Connected),
                            EventPayload::Disconnected => Some(MqttEvent::Disconnected(
                                DisconnectReason::ConnectionLost,
                            )),
                            EventPayload::Received { topic, data, .. } => {
                                topic.map(|topic| MqttEvent::Message {
                                    topic: topic.to_string(),
                                    payload: data.to_vec(),
                                })
                            }
                            _ => None,
                        };
                        if let Some(mapped) = mapped {
                            if tx.send(mapped).is_err() {
                                break;
                            }
                        }
                    }
                });
                self.client = Some(client);
                self.events = Some(rx);
                self.connected = false;
            }
            Err(err) => warn!("mqtt client setup failed: {err}"),
        }
    }

    fn connected(&self) -> bool {
        self.connected
    }

    fn poll(&mut self) -> Option<MqttEvent> {
        let event = self.events.as_ref()?.try_recv().ok()?;
        match &event {
            MqttEvent::Connected => self.connected = true,
            MqttEvent::Disconnected(_) => self.connected = false,
            MqttEvent::Message { .. } => {}
        }
        Some(event)
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> bool {
        let Some(client) = self.client.as_mut() else {
            return false;
        };
        client
            .enqueue(topic, QoS::AtMostOnce, retain, payload)
            .is_ok()
    }

    fn subscribe(&mut self, topic: &str) -> bool {
        let Some(client) = self.client.as_mut() else {
            return false;
        };
        client.subscribe(topic, QoS::AtMostOnce).is_ok()
    }
}

/// REST API on the device: ESP-IDF HTTP server with NVS-backed settings.
/// Server handlers run on the httpd task and cross into the cooperative
/// loop over a channel, mirroring the host adapter.
pub struct EspApi {
    nvs: EspNvs<NvsDefault>,
    server: Option<EspHttpServer<'static>>,
    rx: Option<Receiver<ApiExchange>>,
}

impl EspApi {
    pub fn new(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)?;
        Ok(Self {
            nvs,
            server: None,
            rx: None,
        })
    }

    fn register_route(
        server: &mut EspHttpServer<'static>,
        uri: &str,
        method: Method,
        tx: Sender<ApiExchange>,
        build: fn(Option<Value>) -> Option<ApiRequest>,
    ) -> anyhow::Result<()> {
        server.fn_handler(uri, method, move |mut request| {
            let body = if method == Method::Post {
                let mut raw = Vec::new();
                let mut buf = [0u8; 128];
                loop {
                    let read = request.read(&mut buf)?;
                    if read == 0 {
                        break;
                    }
                    raw.extend_from_slice(&buf[..read]);
                }
                serde_json::from_slice(&raw).ok()
            } else {
                None
            };

            let Some(api_request) = build(body) else {
                request
                    .into_status_response(400)?
                    .write_all(b"{\"error\":\"bad request\"}")?;
                return Ok(());
            };

            let (reply_tx, reply_rx) = mpsc::sync_channel(1);
            let exchange = ApiExchange {
                request: api_request,
                respond: Box::new(move |json| {
                    let _ = reply_tx.send(json);
                }),
            };
            if tx.send(exchange).is_err() {
                request.into_status_response(503)?;
                return Ok(());
            }

            match reply_rx.recv_timeout(API_REPLY_TIMEOUT) {
                Ok(json) => {
                    let payload = json.to_string();
                    let mut response = request
                        .into_response(200, None, &[("Content-Type", "application/json")])?;
                    response.write_all(payload.as_bytes())?;
                }
                Err(_) => {
                    request.into_status_response(503)?;
                }
            }
            Ok(())
        })?;
        Ok(())
    }
}

impl ApiPort for EspApi {
    fn begin(&mut self) {
        let config = HttpConfiguration {
            http_port: REST_API_PORT,
            ..Default::default()
        };
        let mut server = match EspHttpServer::new(&config) {
            Ok(server) => server,
            Err(err) => {
                warn!("rest api server failed to start: {err}");
                return;
            }
        };

        let (tx, rx) = mpsc::channel();
        let routes: [(&str, Method, fn(Option<Value>) -> Option<ApiRequest>); 4] = [
            ("/adopt", Method::Get, |_| Some(ApiRequest::Adopt)),
            ("/mqtt", Method::Get, |_| Some(ApiRequest::GetMqttSettings)),
            ("/mqtt", Method::Post, |body| {
                let settings = serde_json::from_value(body?).ok()?;
                Some(ApiRequest::SetMqttSettings(settings))
            }),
            ("/restart", Method::Post, |_| Some(ApiRequest::Restart)),
        ];
        for (uri, method, build) in routes {
            if let Err(err) = Self::register_route(&mut server, uri, method, tx.clone(), build) {
                warn!("rest api route {uri} failed to register: {err}");
            }
        }

        self.server = Some(server);
        self.rx = Some(rx);
        info!("rest api listening on port {REST_API_PORT}");
    }

    fn load_settings(&mut self) -> Option<MqttSettings> {
        let mut buf = [0u8; NVS_SETTINGS_MAX];
        let raw = self.nvs.get_str(NVS_SETTINGS_KEY, &mut buf).ok()??;
        match serde_json::from_str(raw) {
            Ok(settings) => Some(settings),
            Err(err) => {
                warn!("ignoring malformed persisted mqtt settings: {err}");
                None
            }
        }
    }

    fn save_settings(&mut self, settings: &MqttSettings) -> bool {
        match serde_json::to_string(settings) {
            Ok(payload) => self.nvs.set_str(NVS_SETTINGS_KEY, &payload).is_ok(),
            Err(_) => false,
        }
    }

    fn next_request(&mut self) -> Option<ApiExchange> {
        self.rx.as_ref()?.try_recv().ok()
    }
}

pub struct EspSystem;

impl SystemPort for EspSystem {
    fn base_mac(&self) -> [u8; 6] {
        let mut mac = [0u8; 6];
        unsafe {
            esp_idf_svc::sys::esp_read_mac(
                mac.as_mut_ptr(),
                esp_idf_svc::sys::esp_mac_type_t_ESP_MAC_WIFI_STA,
            );
        }
        mac
    }

    fn stats(&self) -> SystemStats {
        use esp_idf_svc::sys;

        let (heap_total, heap_free, heap_max_alloc) = unsafe {
            let total = sys::heap_caps_get_total_size(sys::MALLOC_CAP_DEFAULT) as u64;
            let free = sys::heap_caps_get_free_size(sys::MALLOC_CAP_DEFAULT) as u64;
            let largest = sys::heap_caps_get_largest_free_block(sys::MALLOC_CAP_DEFAULT) as u64;
            (total, free, largest)
        };

        let flash_size = unsafe { sys::spi_flash_get_chip_size() as u64 };

        let (app_total, app_used) = unsafe {
            let partition = sys::esp_ota_get_running_partition();
            if partition.is_null() {
                (0, 0)
            } else {
                // The image size inside the partition is not tracked here;
                // the partition size bounds both fields.
                ((*partition).size as u64, 0)
            }
        };

        let (fs_total, fs_used) = unsafe {
            let mut total = 0usize;
            let mut used = 0usize;
            if sys::esp_spiffs_info(std::ptr::null(), &mut total, &mut used) == sys::ESP_OK {
                (total as u64, used as u64)
            } else {
                (0, 0)
            }
        };

        SystemStats {
            heap_used_bytes: heap_total.saturating_sub(heap_free),
            heap_free_bytes: heap_free,
            heap_max_alloc_bytes: heap_max_alloc,
            flash_chip_size_bytes: flash_size,
            sketch_space_used_bytes: app_used,
            sketch_space_total_bytes: app_total,
            file_system_used_bytes: fs_used,
            file_system_total_bytes: fs_total,
        }
    }

    fn restart(&mut self) {
        esp_idf_hal::reset::restart();
    }
}

/// Headless display for bring-up; real panels implement `DisplayPort`.
#[derive(Debug, Default)]
pub struct LogDisplay;

impl DisplayPort for LogDisplay {
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

    fn set_active_brightness(&mut self, _percent: u8) {}

    fn set_inactive_brightness(&mut self, _percent: u8) {}

    fn set_active_display_seconds(&mut self, _seconds: u16) {}

    fn set_event_display_seconds(&mut self, _seconds: u16) {}

    fn pulse_rx(&mut self) {}

    fn pulse_tx(&mut self) {}

    fn show_event(&mut self, text: &str) {
        info!("display event: {text}");
    }

    fn tick(&mut self) {}
}
