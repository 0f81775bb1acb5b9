//! The ESP8266 "Universal IO Bridge" (UIB) telnet shell command alphabet
//! and the pin/serial clients built on top of it
//! (`original_source/esp8266bmc.py`).

use crate::command::{Command, CommandInvoker};
use crate::config::{Parity, UartConfig};
use crate::error::{BmcError, BmcResult};
use crate::pin::{self, Pin};
use crate::telnet::TelnetTransport;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;

enum PinCommandKind {
    KeepAlive,
    ValidateIoConfig,
    ValidateIoState,
    ConfigIo,
    ConfigIoFlag,
    WriteState,
    ReadState,
}

/// An ESP8266-backed digital pin: setup runs the validate-then-reconcile
/// sequence (config first, then state) before the pin is considered ready.
pub struct Esp8266Pin {
    transport: Arc<dyn TelnetTransport>,
    pin: Option<u8>,
    is_output: bool,
    initial_value: bool,
    invert_logic: bool,
    logic_level: u8,
    invoker: CommandInvoker,
}

impl Esp8266Pin {
    pub fn new(
        transport: Arc<dyn TelnetTransport>,
        pin: Option<u8>,
        is_output: bool,
        initial_value: bool,
        invert_logic: bool,
    ) -> Self {
        let logic_level = if pin::value_to_logic_level(initial_value, invert_logic) { 1 } else { 0 };
        Esp8266Pin {
            transport,
            pin,
            is_output,
            initial_value,
            invert_logic,
            logic_level,
            invoker: CommandInvoker::default(),
        }
    }

    fn needs_autostart(&self) -> bool {
        let initial_level = if pin::value_to_logic_level(self.initial_value, self.invert_logic) { 1 } else { 0 };
        self.is_output && initial_level == 1
    }

    fn state_of(&self, level: u8) -> &'static str {
        if level == 1 { "on" } else { "off" }
    }

    fn mode(&self) -> &'static str {
        if self.is_output { "output" } else { "input" }
    }

    fn command(&self, kind: PinCommandKind) -> Command {
        let pin = self.pin.expect("command only built for wired pins");
        let mode = self.mode();
        let autostart_flag = if self.needs_autostart() { "autostart" } else { "" };

        match kind {
            PinCommandKind::KeepAlive => Command::new(
                "KEEP_ALIVE",
                "",
                Regex::new(r"(\> empty command|\: command unknown)").unwrap(),
            ),
            PinCommandKind::ValidateIoConfig => Command::new(
                "VALIDATE_IO_CONFIG",
                format!("im 0 {pin}"),
                Regex::new(&format!(
                    r"pin:  {pin}, mode: digital {mode}\s+\[hw: digital {mode}\s*\] flags: \[{autostart_flag}\],(?: {mode},)? state: (?P<state>on|off), max value: 1, info:"
                ))
                .unwrap(),
            ),
            PinCommandKind::ValidateIoState => {
                let state = self.state_of(self.logic_level);
                Command::new(
                    "VALIDATE_IO_STATE",
                    format!("im 0 {pin}"),
                    Regex::new(&format!(
                        r"pin:  {pin}, mode: digital {mode}\s+\[hw: digital {mode}\s*\] flags: \[{autostart_flag}\],(?: {mode},)? state: (?P<state>{state}), max value: 1, info:"
                    ))
                    .unwrap(),
                )
            }
            PinCommandKind::ConfigIo => {
                let direction = if self.is_output { "doutput" } else { "dinput" };
                Command::new(
                    "CONFIG_IO",
                    format!("im 0 {pin} {direction}"),
                    Regex::new(&format!(r"pin:  (?P<pin>{pin}), mode: digital (?P<mode>{mode})\s+\[hw: digital {mode}\s*\]")).unwrap(),
                )
            }
            PinCommandKind::ConfigIoFlag => {
                let verb = if self.needs_autostart() { "isf" } else { "icf" };
                Command::new(
                    "CONFIG_IO_FLAG",
                    format!("{verb} 0 {pin} autostart"),
                    Regex::new(&format!(r"flags for pin 0/(?P<pin>{pin}):(?P<flag>{autostart_flag})")).unwrap(),
                )
            }
            PinCommandKind::WriteState => {
                let regex = if self.is_output {
                    Regex::new(&format!(r"digital output: \[(?P<logic_level>{})\]", self.logic_level)).unwrap()
                } else {
                    Regex::new(&format!(r"digital input: cannot write to gpio {}", self.logic_level)).unwrap()
                };
                Command::new("WRITE_STATE", format!("iw 0 {pin} {}", self.logic_level), regex)
            }
            PinCommandKind::ReadState => Command::new(
                "READ_STATE",
                format!("ir 0 {pin}"),
                Regex::new(&format!(r"digital {mode}: \[(?P<logic_level>0|1)\]")).unwrap(),
            ),
        }
    }

    async fn try_invoke(&self, commands: Vec<Command>) -> Option<Vec<std::collections::HashMap<String, String>>> {
        match self.invoker.invoke(self.transport.as_ref(), &commands).await {
            Ok(captures) => Some(captures),
            Err(e) => {
                tracing::debug!(error = %e, "ESP8266 pin command batch failed");
                None
            }
        }
    }
}

#[async_trait]
impl Pin for Esp8266Pin {
    fn pin_number(&self) -> Option<u8> {
        self.pin
    }

    fn is_output(&self) -> bool {
        self.is_output
    }

    fn invert_logic(&self) -> bool {
        self.invert_logic
    }

    async fn setup(&mut self) -> BmcResult<()> {
        let Some(pin) = self.pin else { return Ok(()) };

        let has_connection = self.try_invoke(vec![self.command(PinCommandKind::KeepAlive)]).await.is_some();
        if !has_connection {
            tracing::warn!(pin, "no connection available for pin");
            return Ok(());
        }

        let has_valid_config = self.try_invoke(vec![self.command(PinCommandKind::ValidateIoConfig)]).await.is_some();
        if !has_valid_config {
            tracing::debug!(pin, "unexpected config, reconfiguring");
            self.try_invoke(vec![self.command(PinCommandKind::ConfigIo), self.command(PinCommandKind::ConfigIoFlag)])
                .await;
        }

        let has_valid_state = self.try_invoke(vec![self.command(PinCommandKind::ValidateIoState)]).await.is_some();
        if !has_valid_state {
            tracing::debug!(pin, logic_level = self.logic_level, "unexpected logic level");
            if self.is_output {
                self.try_invoke(vec![self.command(PinCommandKind::WriteState)]).await;
            }
        }

        Ok(())
    }

    async fn set_value(&mut self, value: bool) -> BmcResult<bool> {
        let _pin = self.pin.ok_or(BmcError::PinUnwired("esp8266"))?;
        self.logic_level = if pin::value_to_logic_level(value, self.invert_logic) { 1 } else { 0 };
        let cmd = self.command(PinCommandKind::WriteState);
        let captures = self.invoker.invoke(self.transport.as_ref(), std::slice::from_ref(&cmd)).await?;
        if let Some(level) = captures[0].get("logic_level").and_then(|s| s.parse::<u8>().ok()) {
            self.logic_level = level;
        }
        Ok(pin::logic_level_to_value(self.logic_level == 1, self.invert_logic))
    }

    async fn get_value(&mut self) -> BmcResult<bool> {
        let _pin = self.pin.ok_or(BmcError::PinUnwired("esp8266"))?;
        let cmd = self.command(PinCommandKind::ReadState);
        let captures = self.invoker.invoke(self.transport.as_ref(), std::slice::from_ref(&cmd)).await?;
        if let Some(level) = captures[0].get("logic_level").and_then(|s| s.parse::<u8>().ok()) {
            self.logic_level = level;
        }
        Ok(pin::logic_level_to_value(self.logic_level == 1, self.invert_logic))
    }
}

enum UartCommandKind {
    ValidateFlagLogToUart,
    ValidateBridgePort,
    ValidateTx,
    ValidateRx,
    ValidateBaud,
    ValidateDataBits,
    ValidateStopBits,
    ValidateParity,
    ConfigFlagLogToUart,
    ConfigBridgePort,
    ConfigTx,
    ConfigRx,
    ConfigBaud,
    ConfigStopBits,
    ConfigDataBits,
    ConfigParity,
}

fn parity_response_text(parity: Parity) -> &'static str {
    parity.as_command_text()
}

fn uart_command(config: &UartConfig, kind: UartCommandKind) -> Command {
    let bp = config.bridge_port;
    let tx = config.tx_pin;
    let rx = config.rx_pin;
    let baud = config.baud_rate;
    let data_bits = config.data_bits;
    let stop_bits = config.stop_bits;
    let parity = parity_response_text(config.parity);

    match kind {
        UartCommandKind::ValidateFlagLogToUart => {
            Command::new("VALIDATE_FLAG_LOG_TO_UART", "fu", Regex::new(r">\s+no log-to-uart").unwrap())
        }
        UartCommandKind::ValidateBridgePort => {
            Command::new("VALIDATE_UART_BRIDGE_PORT_CONFIG", "bp", Regex::new(&format!(r"\> port: {bp}")).unwrap())
        }
        UartCommandKind::ValidateTx => Command::new(
            "VALIDATE_UART_TX_CONFIG",
            format!("im 0 {tx}"),
            Regex::new(&format!(
                r"pin:  {tx}, mode: uart\s+\[hw: uart\s+\] flags: \[\], uart, max value: 255, info: uart 0, pin: tx, autofill: no, character: 0x00"
            ))
            .unwrap(),
        ),
        UartCommandKind::ValidateRx => Command::new(
            "VALIDATE_UART_RX_CONFIG",
            format!("im 0 {rx}"),
            Regex::new(&format!(r"pin:  {rx}, mode: uart\s+\[hw: uart\s+\] flags: \[\], uart, max value: 255, info: uart 0, pin: rx")).unwrap(),
        ),
        UartCommandKind::ValidateBaud => Command::new(
            "VALIDATE_UART_BAUD_CONFIG",
            "ub 0",
            Regex::new(&format!(r"\> baudrate\[0\]: {baud}")).unwrap(),
        ),
        UartCommandKind::ValidateDataBits => Command::new(
            "VALIDATE_UART_DATA_BITS_CONFIG",
            "ud 0",
            Regex::new(&format!(r"data bits\[0\]: {data_bits}")).unwrap(),
        ),
        UartCommandKind::ValidateStopBits => Command::new(
            "VALIDATE_UART_STOP_BITS_CONFIG",
            "us 0",
            Regex::new(&format!(r"\> stop bits\[0\]: {stop_bits}")).unwrap(),
        ),
        UartCommandKind::ValidateParity => Command::new(
            "VALIDATE_UART_PARITY_CONFIG",
            "up 0",
            Regex::new(&format!(r"parity\[0\]: {parity}")).unwrap(),
        ),
        UartCommandKind::ConfigFlagLogToUart => {
            Command::new("CONFIG_FLAG_LOG_TO_UART", "fu log-to-uart", Regex::new(r">\s+no log-to-uart").unwrap())
        }
        UartCommandKind::ConfigBridgePort => {
            Command::new("CONFIG_UART_BRIDGE_PORT", format!("bp {bp}"), Regex::new(&format!(r"\> port: {bp}")).unwrap())
        }
        UartCommandKind::ConfigTx => Command::new(
            "CONFIG_UART_TX",
            format!("im 0 {tx} uart"),
            Regex::new(&format!(
                r"pin:  {tx}, mode: uart\s+\[hw: uart\s+\] flags: \[\], uart, max value: 255, info: uart 0, pin: tx, autofill: no, character: 0x00"
            ))
            .unwrap(),
        ),
        UartCommandKind::ConfigRx => Command::new(
            "CONFIG_UART_RX",
            format!("im 0 {rx} uart"),
            Regex::new(&format!(r"pin:  {rx}, mode: uart\s+\[hw: uart\s+\] flags: \[\], uart, max value: 255, info: uart 0, pin: rx")).unwrap(),
        ),
        UartCommandKind::ConfigBaud => Command::new(
            "CONFIG_UART_BAUD",
            format!("ub 0 {baud}"),
            Regex::new(&format!(r"\> baudrate\[0\]: {baud}")).unwrap(),
        ),
        UartCommandKind::ConfigStopBits => Command::new(
            "CONFIG_UART_STOP_BITS",
            format!("us 0 {stop_bits}"),
            Regex::new(&format!(r"(\> cannot delete config \(default values\)|data bits\[0\]: {data_bits})")).unwrap(),
        ),
        UartCommandKind::ConfigDataBits => Command::new(
            "CONFIG_UART_DATA_BITS",
            format!("ud 0 {data_bits}"),
            Regex::new(&format!(r"(\> cannot set config|data bits\[0\]: {data_bits})")).unwrap(),
        ),
        UartCommandKind::ConfigParity => Command::new(
            "CONFIG_UART_PARITY",
            format!("up 0 {parity}"),
            Regex::new(&format!(r"(none\> cannot set config|parity\[0\]: {parity})")).unwrap(),
        ),
    }
}

/// Validates, and on mismatch reconfigures, the UART bridge before the SOL
/// pump is allowed to proceed (SPEC_FULL §10.5).
pub async fn setup_uart(transport: &dyn TelnetTransport, config: &UartConfig) -> BmcResult<()> {
    let invoker = CommandInvoker::default();

    let keep_alive = Command::new(
        "KEEP_ALIVE",
        "",
        Regex::new(r"(\> empty command|\: command unknown)").unwrap(),
    );
    if invoker.invoke(transport, &[keep_alive]).await.is_err() {
        tracing::warn!("no connection available for serial command host");
        return Ok(());
    }

    let validations = [
        uart_command(config, UartCommandKind::ValidateFlagLogToUart),
        uart_command(config, UartCommandKind::ValidateBridgePort),
        uart_command(config, UartCommandKind::ValidateTx),
        uart_command(config, UartCommandKind::ValidateRx),
        uart_command(config, UartCommandKind::ValidateBaud),
        uart_command(config, UartCommandKind::ValidateDataBits),
        uart_command(config, UartCommandKind::ValidateStopBits),
        uart_command(config, UartCommandKind::ValidateParity),
    ];

    if invoker.invoke(transport, &validations).await.is_ok() {
        return Ok(());
    }

    tracing::debug!("unexpected UART config, reconfiguring");
    let reconfigure = [
        uart_command(config, UartCommandKind::ConfigFlagLogToUart),
        uart_command(config, UartCommandKind::ConfigBridgePort),
        uart_command(config, UartCommandKind::ConfigTx),
        uart_command(config, UartCommandKind::ConfigRx),
        uart_command(config, UartCommandKind::ConfigBaud),
        uart_command(config, UartCommandKind::ConfigStopBits),
        uart_command(config, UartCommandKind::ConfigDataBits),
        uart_command(config, UartCommandKind::ConfigParity),
    ];
    let _ = invoker.invoke(transport, &reconfigure).await;
    Ok(())
}
