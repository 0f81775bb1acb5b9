//! On-disk configuration: one TOML file describing the set of virtual BMCs
//! this process should serve, each keyed by its IPMB address. Every nested
//! struct mirrors one of the original `*_CONFIG` dicts (see DESIGN.md) as an
//! `Option<T>`-field "overrides" struct merged over a hard-coded `Default`.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// UDP port the RMCP+ listener binds, overridden by `--port`.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    pub auth: AuthConfig,
    #[serde(rename = "target", default)]
    pub targets: HashMap<String, TargetConfig>,
}

fn default_listen_port() -> u16 {
    623
}

impl Config {
    /// Looks up a target by its IPMB address, parsing the TOML table key as
    /// a `0x`-prefixed or decimal byte.
    pub fn find_target_by_address(&self, address: u8) -> Option<(&String, &TargetConfig)> {
        self.targets.iter().find(|(key, _)| parse_address(key) == Some(address))
    }
}

pub fn parse_address(key: &str) -> Option<u8> {
    if let Some(hex) = key.strip_prefix("0x") {
        u8::from_str_radix(hex, 16).ok()
    } else {
        key.parse().ok()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: Option<String>,
    pub password_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    #[default]
    Fake,
    Esp8266,
    Esp8266Wol,
    Gpio,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetConfig {
    pub kind: TargetKind,
    #[serde(default)]
    pub button: ButtonConfigOverride,
    #[serde(default)]
    pub gpio: GpioConfigOverride,
    #[serde(default)]
    pub command_telnet: TelnetConfigOverride,
    #[serde(default)]
    pub sol_telnet: TelnetConfigOverride,
    #[serde(default)]
    pub uart: UartConfigOverride,
    #[serde(default)]
    pub wol: WolConfigOverride,
}

/// `BUTTON_CONFIG` in `buttonbmc.py`.
#[derive(Debug, Clone, Copy)]
pub struct ButtonConfig {
    pub initial_power_status_value: bool,
    pub initial_power_button_value: bool,
    pub initial_reset_button_value: bool,
    pub power_off_press_duration_secs: f64,
    pub power_on_press_duration_secs: f64,
    pub power_cycle_off_press_duration_secs: f64,
    pub power_cycle_wait_duration_secs: f64,
    pub power_cycle_on_press_duration_secs: f64,
    pub power_reset_press_duration_secs: f64,
    pub power_shutdown_press_duration_secs: f64,
    pub power_shutdown_wait_duration_secs: f64,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        ButtonConfig {
            initial_power_status_value: false,
            initial_power_button_value: false,
            initial_reset_button_value: false,
            power_off_press_duration_secs: 5.0,
            power_on_press_duration_secs: 1.0,
            power_cycle_off_press_duration_secs: 5.0,
            power_cycle_wait_duration_secs: 1.0,
            power_cycle_on_press_duration_secs: 1.0,
            power_reset_press_duration_secs: 1.0,
            power_shutdown_press_duration_secs: 1.0,
            power_shutdown_wait_duration_secs: 20.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ButtonConfigOverride {
    pub initial_power_status_value: Option<bool>,
    pub initial_power_button_value: Option<bool>,
    pub initial_reset_button_value: Option<bool>,
    pub power_off_press_duration_secs: Option<f64>,
    pub power_on_press_duration_secs: Option<f64>,
    pub power_cycle_off_press_duration_secs: Option<f64>,
    pub power_cycle_wait_duration_secs: Option<f64>,
    pub power_cycle_on_press_duration_secs: Option<f64>,
    pub power_reset_press_duration_secs: Option<f64>,
    pub power_shutdown_press_duration_secs: Option<f64>,
    pub power_shutdown_wait_duration_secs: Option<f64>,
}

impl ButtonConfigOverride {
    pub fn resolve(&self) -> ButtonConfig {
        let d = ButtonConfig::default();
        ButtonConfig {
            initial_power_status_value: self.initial_power_status_value.unwrap_or(d.initial_power_status_value),
            initial_power_button_value: self.initial_power_button_value.unwrap_or(d.initial_power_button_value),
            initial_reset_button_value: self.initial_reset_button_value.unwrap_or(d.initial_reset_button_value),
            power_off_press_duration_secs: self.power_off_press_duration_secs.unwrap_or(d.power_off_press_duration_secs),
            power_on_press_duration_secs: self.power_on_press_duration_secs.unwrap_or(d.power_on_press_duration_secs),
            power_cycle_off_press_duration_secs: self.power_cycle_off_press_duration_secs.unwrap_or(d.power_cycle_off_press_duration_secs),
            power_cycle_wait_duration_secs: self.power_cycle_wait_duration_secs.unwrap_or(d.power_cycle_wait_duration_secs),
            power_cycle_on_press_duration_secs: self.power_cycle_on_press_duration_secs.unwrap_or(d.power_cycle_on_press_duration_secs),
            power_reset_press_duration_secs: self.power_reset_press_duration_secs.unwrap_or(d.power_reset_press_duration_secs),
            power_shutdown_press_duration_secs: self.power_shutdown_press_duration_secs.unwrap_or(d.power_shutdown_press_duration_secs),
            power_shutdown_wait_duration_secs: self.power_shutdown_wait_duration_secs.unwrap_or(d.power_shutdown_wait_duration_secs),
        }
    }
}

/// `GPIO_CONFIG` in `pinbmc.py`. `None` pins are unwired (`PinUnwired`).
#[derive(Debug, Clone, Copy)]
pub struct GpioConfig {
    pub status_pin: Option<u8>,
    pub power_pin: Option<u8>,
    pub reset_pin: Option<u8>,
    pub invert_status_pin_logic: bool,
    pub invert_power_pin_logic: bool,
    pub invert_reset_pin_logic: bool,
}

impl Default for GpioConfig {
    fn default() -> Self {
        GpioConfig {
            status_pin: Some(2),
            power_pin: Some(0),
            reset_pin: None,
            invert_status_pin_logic: false,
            invert_power_pin_logic: true,
            invert_reset_pin_logic: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GpioConfigOverride {
    pub status_pin: Option<Option<u8>>,
    pub power_pin: Option<Option<u8>>,
    pub reset_pin: Option<Option<u8>>,
    pub invert_status_pin_logic: Option<bool>,
    pub invert_power_pin_logic: Option<bool>,
    pub invert_reset_pin_logic: Option<bool>,
}

impl GpioConfigOverride {
    pub fn resolve(&self) -> GpioConfig {
        let d = GpioConfig::default();
        GpioConfig {
            status_pin: self.status_pin.unwrap_or(d.status_pin),
            power_pin: self.power_pin.unwrap_or(d.power_pin),
            reset_pin: self.reset_pin.unwrap_or(d.reset_pin),
            invert_status_pin_logic: self.invert_status_pin_logic.unwrap_or(d.invert_status_pin_logic),
            invert_power_pin_logic: self.invert_power_pin_logic.unwrap_or(d.invert_power_pin_logic),
            invert_reset_pin_logic: self.invert_reset_pin_logic.unwrap_or(d.invert_reset_pin_logic),
        }
    }
}

/// `COMMAND_TELNET_CONFIG`/`SOL_TELNET_CONFIG` in `telnetbmc.py`. Callers
/// pick which default to resolve against via [`TelnetConfigOverride::resolve_command`]
/// / [`TelnetConfigOverride::resolve_sol`].
#[derive(Debug, Clone)]
pub struct TelnetConfig {
    pub host: String,
    pub port: u16,
    pub baud: u32,
    pub crlf: String,
    pub response_timeout_secs: f64,
    pub connection_timeout_secs: f64,
    pub connection_retries: u32,
}

impl TelnetConfig {
    fn command_default() -> Self {
        TelnetConfig {
            host: "192.168.4.1".to_string(),
            port: 24,
            baud: 115_200,
            crlf: "\r\n".to_string(),
            response_timeout_secs: 0.15,
            connection_timeout_secs: 2.1,
            connection_retries: 1,
        }
    }

    fn sol_default() -> Self {
        TelnetConfig {
            host: "192.168.4.1".to_string(),
            port: 23,
            baud: 115_200,
            crlf: "\r\n".to_string(),
            response_timeout_secs: 5.0,
            connection_timeout_secs: 2.1,
            connection_retries: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelnetConfigOverride {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub baud: Option<u32>,
    pub crlf: Option<String>,
    pub response_timeout_secs: Option<f64>,
    pub connection_timeout_secs: Option<f64>,
    pub connection_retries: Option<u32>,
}

impl TelnetConfigOverride {
    pub fn resolve_command(&self) -> TelnetConfig {
        self.resolve_over(TelnetConfig::command_default())
    }

    pub fn resolve_sol(&self) -> TelnetConfig {
        self.resolve_over(TelnetConfig::sol_default())
    }

    fn resolve_over(&self, d: TelnetConfig) -> TelnetConfig {
        TelnetConfig {
            host: self.host.clone().unwrap_or(d.host),
            port: self.port.unwrap_or(d.port),
            baud: self.baud.unwrap_or(d.baud),
            crlf: self.crlf.clone().unwrap_or(d.crlf),
            response_timeout_secs: self.response_timeout_secs.unwrap_or(d.response_timeout_secs),
            connection_timeout_secs: self.connection_timeout_secs.unwrap_or(d.connection_timeout_secs),
            connection_retries: self.connection_retries.unwrap_or(d.connection_retries),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl Parity {
    pub fn as_command_text(&self) -> &'static str {
        match self {
            Parity::None => "none",
            Parity::Even => "even",
            Parity::Odd => "odd",
        }
    }
}

/// `UART_CONFIG` in `esp8266bmc.py`.
#[derive(Debug, Clone, Copy)]
pub struct UartConfig {
    pub bridge_port: u16,
    pub tx_pin: u8,
    pub rx_pin: u8,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

impl Default for UartConfig {
    fn default() -> Self {
        UartConfig {
            bridge_port: 23,
            tx_pin: 1,
            rx_pin: 3,
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UartConfigOverride {
    pub bridge_port: Option<u16>,
    pub tx_pin: Option<u8>,
    pub rx_pin: Option<u8>,
    pub baud_rate: Option<u32>,
    pub data_bits: Option<u8>,
    pub stop_bits: Option<u8>,
    pub parity: Option<Parity>,
}

impl UartConfigOverride {
    pub fn resolve(&self) -> UartConfig {
        let d = UartConfig::default();
        UartConfig {
            bridge_port: self.bridge_port.unwrap_or(d.bridge_port),
            tx_pin: self.tx_pin.unwrap_or(d.tx_pin),
            rx_pin: self.rx_pin.unwrap_or(d.rx_pin),
            baud_rate: self.baud_rate.unwrap_or(d.baud_rate),
            data_bits: self.data_bits.unwrap_or(d.data_bits),
            stop_bits: self.stop_bits.unwrap_or(d.stop_bits),
            parity: self.parity.unwrap_or(d.parity),
        }
    }
}

/// `WOL_CONFIG` in `esp8266wakeonlanbmc.py`.
#[derive(Debug, Clone)]
pub struct WolConfig {
    pub mac: String,
    pub port: u16,
    pub broadcast_ip: String,
}

impl Default for WolConfig {
    fn default() -> Self {
        WolConfig {
            mac: "AA:BB:CC:DD:EE:FF".to_string(),
            port: 9,
            broadcast_ip: "255.255.255.255".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WolConfigOverride {
    pub mac: Option<String>,
    pub port: Option<u16>,
    pub broadcast_ip: Option<String>,
}

impl WolConfigOverride {
    pub fn resolve(&self) -> WolConfig {
        let d = WolConfig::default();
        WolConfig {
            mac: self.mac.clone().unwrap_or(d.mac),
            port: self.port.unwrap_or(d.port),
            broadcast_ip: self.broadcast_ip.clone().unwrap_or(d.broadcast_ip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_and_decimal_target_addresses() {
        assert_eq!(parse_address("0x72"), Some(0x72));
        assert_eq!(parse_address("114"), Some(114));
        assert_eq!(parse_address("not-an-address"), None);
    }

    #[test]
    fn button_config_override_falls_back_to_defaults() {
        let resolved = ButtonConfigOverride::default().resolve();
        assert_eq!(resolved.power_off_press_duration_secs, 5.0);
        assert!(!resolved.initial_power_status_value);
    }

    #[test]
    fn telnet_config_command_and_sol_defaults_differ() {
        let over = TelnetConfigOverride::default();
        assert_eq!(over.resolve_command().port, 24);
        assert_eq!(over.resolve_sol().port, 23);
        assert_eq!(over.resolve_sol().response_timeout_secs, 5.0);
    }

    #[test]
    fn toml_config_parses_minimal_document() {
        let doc = r#"
            [auth]
            username = "admin"
            password = "hunter2"

            [target.0x72]
            kind = "esp8266"
        "#;
        let cfg: Config = toml::from_str(doc).unwrap();
        assert_eq!(cfg.listen_port, 623);
        let (_, target) = cfg.find_target_by_address(0x72).unwrap();
        assert_eq!(target.kind, TargetKind::Esp8266);
    }
}
