//! Wake-on-LAN chassis variant: wraps a [`ButtonChassis`] and overrides only
//! `press_power_on`/`press_power_off`, reusing the cycle/reset/shutdown
//! defaults unchanged (`original_source/esp8266wakeonlanbmc.py::Esp8266WakeOnLanBmc`).

use crate::chassis::{ButtonChassis, ChassisPolicy};
use crate::config::{ButtonConfig, WolConfig};
use crate::error::BmcResult;
use crate::pin::Pin;
use crate::telnet::TelnetSession;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use wake_on_lan::MagicPacket;

/// While waiting for the target to wake up and bring its telnet shell back,
/// the command session's retry budget is temporarily widened
/// (`esp8266wakeonlanbmc.py`'s inline constants).
const WAKE_RETRY_ATTEMPTS: u32 = 5;
const WAKE_RETRY_TIMEOUT: Duration = Duration::from_secs(3);

pub struct WolChassis {
    inner: ButtonChassis,
    command_telnet: Arc<TelnetSession>,
    config: WolConfig,
}

impl WolChassis {
    pub fn new(inner: ButtonChassis, command_telnet: Arc<TelnetSession>, config: WolConfig) -> Self {
        WolChassis {
            inner,
            command_telnet,
            config,
        }
    }

    fn parse_mac(&self) -> BmcResult<[u8; 6]> {
        let mut bytes = [0u8; 6];
        for (i, part) in self.config.mac.split(':').enumerate().take(6) {
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|e| crate::error::BmcError::Unspecified(anyhow::anyhow!("invalid MAC address {}: {}", self.config.mac, e)))?;
        }
        Ok(bytes)
    }
}

#[async_trait]
impl ChassisPolicy for WolChassis {
    fn power_status_pin(&mut self) -> &mut dyn Pin {
        self.inner.power_status_pin()
    }

    fn power_button_pin(&mut self) -> Option<&mut dyn Pin> {
        self.inner.power_button_pin()
    }

    fn reset_button_pin(&mut self) -> Option<&mut dyn Pin> {
        self.inner.reset_button_pin()
    }

    fn config(&self) -> &ButtonConfig {
        self.inner.config()
    }

    /// Power state is read from whether the command telnet channel is
    /// currently reachable, not from a status pin — there is no status pin
    /// to read once the target is gone over WoL
    /// (`esp8266wakeonlanbmc.py::setup_power_status` swaps in
    /// `AsyncSerialSessionConnectionStatus(self.command_telnet_session)` for
    /// exactly this reason).
    async fn power_state(&mut self) -> BmcResult<bool> {
        Ok(self.command_telnet.is_connected().await)
    }

    /// Sends a WoL magic packet instead of pressing a power button, widening
    /// the command telnet session's retry budget while the target boots and
    /// restoring it once the shell answers again.
    async fn press_power_on(&mut self) -> BmcResult<bool> {
        let mac = self.parse_mac()?;
        let packet = MagicPacket::new(&mac);
        packet
            .send_to((self.config.broadcast_ip.as_str(), self.config.port), "0.0.0.0:0")
            .map_err(|e| crate::error::BmcError::Unspecified(anyhow::anyhow!("failed to send WoL magic packet: {}", e)))?;

        let previous = self
            .command_telnet
            .widen_retry_budget(WAKE_RETRY_ATTEMPTS, WAKE_RETRY_TIMEOUT)
            .await;

        let press_duration = Duration::from_secs_f64(self.config().power_on_press_duration_secs);
        tokio::time::sleep(press_duration).await;
        let _ = self.command_telnet.connect().await;

        self.command_telnet.restore_retry_budget(previous).await;

        self.power_state().await
    }

    /// Presses the power button as normal, then drops the command telnet
    /// session so it redials cleanly the next time it's needed
    /// (`esp8266wakeonlanbmc.py::press_power_off`).
    async fn press_power_off(&mut self) -> BmcResult<bool> {
        let result = self.inner.press_power_off().await;
        self.command_telnet.disconnect().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin::FakePin;

    fn fast_config() -> ButtonConfig {
        ButtonConfig {
            power_off_press_duration_secs: 0.0,
            power_on_press_duration_secs: 0.0,
            ..ButtonConfig::default()
        }
    }

    #[test]
    fn parses_colon_separated_mac_address() {
        let chassis = WolChassis::new(
            ButtonChassis::new(Box::new(FakePin::new(Some(0), false, false, false)), None, None, fast_config()),
            Arc::new(TelnetSession::new(&crate::config::TelnetConfigOverride::default().resolve_command())),
            WolConfig::default(),
        );
        assert_eq!(chassis.parse_mac().unwrap(), [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    }

    #[tokio::test]
    async fn power_state_reflects_command_telnet_reachability_not_the_status_pin() {
        // Status pin reads "on", but the command channel has never connected —
        // the WoL variant must report power state from reachability, not the pin.
        let mut chassis = WolChassis::new(
            ButtonChassis::new(Box::new(FakePin::new(Some(0), false, true, false)), None, None, fast_config()),
            Arc::new(TelnetSession::new(&crate::config::TelnetConfigOverride::default().resolve_command())),
            WolConfig::default(),
        );
        assert_eq!(chassis.power_state().await.unwrap(), false);
    }
}
