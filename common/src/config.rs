use serde::{Deserialize, Serialize};

use crate::error::NodeError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    /// Fixed channel for the join; `None` lets the radio scan.
    #[serde(default)]
    pub wifi_channel: Option<u8>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            wifi_channel: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Skip server certificate verification on HTTPS requests.
    pub accept_invalid_certs: bool,
    pub http_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            accept_invalid_certs: true,
            http_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    pub join_attempts: u32,
    pub join_retry_ms: u64,
    pub connected_splash_ms: u64,
    pub poll_interval_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            join_attempts: 20,
            join_retry_ms: 500,
            connected_splash_ms: 2_000,
            poll_interval_ms: 5_000,
            reconnect_delay_ms: 5_000,
        }
    }
}

/// Bus and panel settings. Pin assignments are fixed by the board wiring in the ESP back-end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HardwareConfig {
    pub i2c_baudrate_hz: u32,
    pub lcd_i2c_address: u8,
    pub lcd_columns: u8,
    pub lcd_rows: u8,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            i2c_baudrate_hz: 100_000,
            lcd_i2c_address: 0x27,
            lcd_columns: 16,
            lcd_rows: 2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    pub network: NetworkConfig,
    pub service: ServiceConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
}

impl TimingConfig {
    pub fn sanitize(&mut self) {
        self.join_attempts = self.join_attempts.clamp(1, 600);
        self.join_retry_ms = self.join_retry_ms.clamp(50, 10_000);
        self.connected_splash_ms = self.connected_splash_ms.min(10_000);
        self.poll_interval_ms = self.poll_interval_ms.clamp(500, 3_600_000);
        self.reconnect_delay_ms = self.reconnect_delay_ms.clamp(500, 600_000);
    }
}

impl HardwareConfig {
    pub fn sanitize(&mut self) {
        // PCF8574 backpacks answer on 0x20..=0x27, the "A" variant on 0x38..=0x3F.
        if !(0x20..=0x27).contains(&self.lcd_i2c_address)
            && !(0x38..=0x3F).contains(&self.lcd_i2c_address)
        {
            self.lcd_i2c_address = 0x27;
        }

        self.lcd_columns = self.lcd_columns.clamp(8, 40);
        self.lcd_rows = self.lcd_rows.clamp(1, 4);
        self.i2c_baudrate_hz = self.i2c_baudrate_hz.clamp(10_000, 400_000);
    }
}

impl NodeConfig {
    pub fn sanitize(&mut self) {
        self.timing.sanitize();
        self.hardware.sanitize();
        self.service.http_timeout_ms = self.service.http_timeout_ms.clamp(1_000, 60_000);

        if matches!(self.network.wifi_channel, Some(0) | Some(15..=u8::MAX)) {
            self.network.wifi_channel = None;
        }
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        if self.network.wifi_ssid.trim().is_empty() {
            return Err(NodeError::Config("wifi ssid is empty".to_string()));
        }
        if self.network.wifi_ssid.len() > 32 {
            return Err(NodeError::Config("wifi ssid too long".to_string()));
        }
        if self.network.wifi_pass.len() > 64 {
            return Err(NodeError::Config("wifi password too long".to_string()));
        }

        let endpoint = self.service.endpoint.trim();
        if endpoint.is_empty() {
            return Err(NodeError::Config("service endpoint is empty".to_string()));
        }
        if !endpoint.starts_with("https://") && !endpoint.starts_with("http://") {
            return Err(NodeError::Config(format!(
                "service endpoint `{endpoint}` is not an http(s) URL"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn valid() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.network.wifi_ssid = "Wokwi-GUEST".to_string();
        config.service.endpoint = "https://example.com".to_string();
        config
    }

    #[test]
    fn defaults_match_firmware_timing() {
        let timing = TimingConfig::default();
        assert_eq!(timing.join_attempts, 20);
        assert_eq!(timing.join_retry_ms, 500);
        assert_eq!(timing.poll_interval_ms, 5_000);
        assert_eq!(timing.reconnect_delay_ms, 5_000);
        assert!(ServiceConfig::default().accept_invalid_certs);
    }

    #[test]
    fn sanitize_clamps_out_of_range_values() {
        let mut config = valid();
        config.timing.join_attempts = 0;
        config.timing.poll_interval_ms = 1;
        config.hardware.lcd_i2c_address = 0x50;
        config.hardware.lcd_columns = 200;
        config.network.wifi_channel = Some(42);
        config.sanitize();

        assert_eq!(config.timing.join_attempts, 1);
        assert_eq!(config.timing.poll_interval_ms, 500);
        assert_eq!(config.hardware.lcd_i2c_address, 0x27);
        assert_eq!(config.hardware.lcd_columns, 40);
        assert_eq!(config.network.wifi_channel, None);
    }

    #[test]
    fn sanitize_keeps_valid_channel() {
        let mut config = valid();
        config.network.wifi_channel = Some(6);
        config.sanitize();
        assert_eq!(config.network.wifi_channel, Some(6));
    }

    #[test]
    fn validate_rejects_missing_fields() {
        assert!(valid().validate().is_ok());

        let mut config = valid();
        config.network.wifi_ssid.clear();
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));

        let mut config = valid();
        config.service.endpoint = "ftp://example.com".to_string();
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));
    }

    #[test]
    fn deserializes_without_optional_sections() {
        let config: NodeConfig = serde_json::from_str(
            r#"{
                "network": {"wifi_ssid": "lab", "wifi_pass": "secret"},
                "service": {
                    "endpoint": "https://example.com",
                    "api_key": "k",
                    "accept_invalid_certs": false,
                    "http_timeout_ms": 5000
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.network.wifi_channel, None);
        assert_eq!(config.hardware, HardwareConfig::default());
        assert!(!config.service.accept_invalid_certs);
    }
}
