use std::net::Ipv4Addr;

use serde::Serialize;
use serde_json::{json, Value};

use crate::identity::FirmwareInfo;
use crate::net::format_mac;
use crate::schema::SchemaComposer;

/// Live system counters, queried from the platform at each adoption build.
/// Values that cannot be read surface as zero rather than errors.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SystemStats {
    #[serde(rename = "heapUsedBytes")]
    pub heap_used_bytes: u64,
    #[serde(rename = "heapFreeBytes")]
    pub heap_free_bytes: u64,
    #[serde(rename = "heapMaxAllocBytes")]
    pub heap_max_alloc_bytes: u64,
    #[serde(rename = "flashChipSizeBytes")]
    pub flash_chip_size_bytes: u64,
    #[serde(rename = "sketchSpaceUsedBytes")]
    pub sketch_space_used_bytes: u64,
    #[serde(rename = "sketchSpaceTotalBytes")]
    pub sketch_space_total_bytes: u64,
    #[serde(rename = "fileSystemUsedBytes")]
    pub file_system_used_bytes: u64,
    #[serde(rename = "fileSystemTotalBytes")]
    pub file_system_total_bytes: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkReport {
    pub ip: Ipv4Addr,
    pub mac: [u8; 6],
}

impl Default for NetworkReport {
    fn default() -> Self {
        Self {
            ip: Ipv4Addr::UNSPECIFIED,
            mac: [0; 6],
        }
    }
}

/// Build the adoption document an external controller consumes to discover
/// the device: identity, live system state, network identity and the
/// composed config/command schemas.
pub fn build_adoption(
    identity: &FirmwareInfo,
    stats: SystemStats,
    network: NetworkReport,
    composer: &SchemaComposer,
) -> Value {
    json!({
        "firmware": identity.to_json(),
        "system": stats,
        "network": {
            "mode": "ethernet",
            "ip": network.ip.to_string(),
            "mac": format_mac(network.mac),
        },
        "configSchema": composer.composed_config_schema(identity.short_name),
        "commandSchema": composer.composed_command_schema(identity.short_name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn identity() -> FirmwareInfo {
        FirmwareInfo::new("Demo Firmware", "demo", "Example Maker", "1.2.3")
            .with_github_url("https://example.com/demo")
    }

    #[test]
    fn adoption_carries_all_four_sections() {
        let composer = SchemaComposer::new();
        let network = NetworkReport {
            ip: Ipv4Addr::new(192, 168, 1, 52),
            mac: [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xF3],
        };

        let adoption = build_adoption(&identity(), SystemStats::default(), network, &composer);

        assert_eq!(adoption["firmware"]["shortName"], "demo");
        assert_eq!(adoption["network"]["mode"], "ethernet");
        assert_eq!(adoption["network"]["ip"], "192.168.1.52");
        assert_eq!(adoption["network"]["mac"], "AA:BB:CC:DD:EE:F3");
        assert_eq!(adoption["configSchema"]["title"], "demo");
        assert_eq!(adoption["commandSchema"]["properties"]["restart"]["type"], "boolean");
    }

    #[test]
    fn firmware_fragment_and_platform_keys_coexist() {
        let mut composer = SchemaComposer::new();
        composer.set_config_schema(&serde_json::json!({"foo": {"type": "string"}}));

        let adoption = build_adoption(
            &identity(),
            SystemStats::default(),
            NetworkReport::default(),
            &composer,
        );

        let properties = &adoption["configSchema"]["properties"];
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
    fn link_down_surfaces_as_zero_values() {
        let adoption = build_adoption(
            &identity(),
            SystemStats::default(),
            NetworkReport::default(),
            &SchemaComposer::new(),
        );

        assert_eq!(adoption["network"]["ip"], "0.0.0.0");
        assert_eq!(adoption["system"]["heapFreeBytes"], 0);
    }

    #[test]
    fn system_stats_serialize_camel_case() {
        let stats = SystemStats {
            heap_used_bytes: 320_000,
            heap_free_bytes: 120_000,
            heap_max_alloc_bytes: 80_000,
            flash_chip_size_bytes: 4_194_304,
            sketch_space_used_bytes: 1_000_000,
            sketch_space_total_bytes: 1_310_720,
            file_system_used_bytes: 1024,
            file_system_total_bytes: 524_288,
        };

        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["heapMaxAllocBytes"], 80_000);
        assert_eq!(json["fileSystemTotalBytes"], 524_288);
    }
}
