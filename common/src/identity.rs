use serde_json::{json, Value};

/// Firmware identity, bound once at build time.
#[derive(Debug, Clone)]
pub struct FirmwareInfo {
    pub name: &'static str,
    pub short_name: &'static str,
    pub maker: &'static str,
    pub version: &'static str,
    pub github_url: Option<&'static str>,
    pub logo: Option<&'static [u8]>,
}

impl FirmwareInfo {
    pub const fn new(
        name: &'static str,
        short_name: &'static str,
        maker: &'static str,
        version: &'static str,
    ) -> Self {
        Self {
            name,
            short_name,
            maker,
            version,
            github_url: None,
            logo: None,
        }
    }

    #[must_use]
    pub const fn with_github_url(mut self, url: &'static str) -> Self {
        self.github_url = Some(url);
        self
    }

    #[must_use]
    pub const fn with_logo(mut self, logo: &'static [u8]) -> Self {
        self.logo = Some(logo);
        self
    }

    pub fn to_json(&self) -> Value {
        let mut firmware = json!({
            "name": self.name,
            "shortName": self.short_name,
            "maker": self.maker,
            "version": self.version,
        });
        if let Some(url) = self.github_url {
            firmware["githubUrl"] = json!(url);
        }
        firmware
    }
}
