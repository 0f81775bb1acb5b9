use clap::Parser;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use ipmi_bridge::bmc::VirtualBmc;
use ipmi_bridge::bridge::IpmbBridge;
use ipmi_bridge::chassis::{ButtonChassis, ChassisPolicy};
use ipmi_bridge::config::{self, Config, TargetConfig, TargetKind};
#[cfg(feature = "gpio")]
use ipmi_bridge::gpio_pin::GpioPin;
use ipmi_bridge::esp8266::Esp8266Pin;
use ipmi_bridge::pin::{FakePin, Pin};
use ipmi_bridge::rmcp::{self, IncomingDatagram};
use ipmi_bridge::telnet::{TelnetSession, TelnetTransport};
use ipmi_bridge::wol::WolChassis;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let args = Cli::parse();

    let raw = std::fs::read(&args.config)?;
    let mut config: Config = toml::from_slice(&raw)?;

    match (&config.auth.password, &config.auth.password_file) {
        (Some(_), None) => (),
        (None, Some(path)) => {
            let password = std::fs::read_to_string(path)?;
            config.auth.password = Some(password.trim_end_matches('\n').to_owned());
        }
        (None, None) => anyhow::bail!("Either `password` or `password_file` must be provided"),
        (Some(_), Some(_)) => anyhow::bail!("Cannot set both `password` and `password_file`"),
    }

    let listen_port = args.port.unwrap_or(config.listen_port);

    let mut bridge = IpmbBridge::new();
    for (key, target) in &config.targets {
        let Some(address) = config::parse_address(key) else {
            anyhow::bail!("target table key '{key}' is not a valid IPMB address");
        };
        let bmc = build_target(address, target, listen_port)?;
        bridge.add_target(address, bmc);
    }

    bridge.setup().await?;

    let socket = Arc::new(UdpSocket::bind(("0.0.0.0", listen_port)).await?);
    tracing::info!(port = listen_port, "listening");

    run(socket, bridge).await
}

/// Instantiates one [`VirtualBmc`] from its resolved target config,
/// selecting the pin/chassis implementation by [`TargetKind`]
/// (`original_source/pypmb.py::main`'s `add_target` calls).
fn build_target(address: u8, target: &TargetConfig, listen_port: u16) -> anyhow::Result<VirtualBmc> {
    let button_config = target.button.resolve();
    let command_telnet = Arc::new(TelnetSession::new(&target.command_telnet.resolve_command()));
    let sol_telnet: Arc<dyn TelnetTransport> = Arc::new(TelnetSession::new(&target.sol_telnet.resolve_sol()));

    let chassis: Box<dyn ChassisPolicy> = match target.kind {
        TargetKind::Fake => {
            let gpio = target.gpio.resolve();
            Box::new(ButtonChassis::new(
                Box::new(FakePin::new(gpio.status_pin, false, button_config.initial_power_status_value, gpio.invert_status_pin_logic)),
                Some(Box::new(FakePin::new(gpio.power_pin, true, button_config.initial_power_button_value, gpio.invert_power_pin_logic))),
                gpio.reset_pin.map(|p| Box::new(FakePin::new(Some(p), true, button_config.initial_reset_button_value, gpio.invert_reset_pin_logic)) as Box<dyn Pin>),
                button_config,
            ))
        }
        TargetKind::Esp8266 => {
            let gpio = target.gpio.resolve();
            let command_transport: Arc<dyn TelnetTransport> = command_telnet.clone();
            Box::new(ButtonChassis::new(
                Box::new(Esp8266Pin::new(command_transport.clone(), gpio.status_pin, false, button_config.initial_power_status_value, gpio.invert_status_pin_logic)),
                Some(Box::new(Esp8266Pin::new(command_transport.clone(), gpio.power_pin, true, button_config.initial_power_button_value, gpio.invert_power_pin_logic))),
                gpio.reset_pin.map(|p| {
                    Box::new(Esp8266Pin::new(command_transport, Some(p), true, button_config.initial_reset_button_value, gpio.invert_reset_pin_logic)) as Box<dyn Pin>
                }),
                button_config,
            ))
        }
        TargetKind::Esp8266Wol => {
            let gpio = target.gpio.resolve();
            let command_transport: Arc<dyn TelnetTransport> = command_telnet.clone();
            let inner = ButtonChassis::new(
                Box::new(Esp8266Pin::new(command_transport.clone(), gpio.status_pin, false, button_config.initial_power_status_value, gpio.invert_status_pin_logic)),
                Some(Box::new(Esp8266Pin::new(command_transport.clone(), gpio.power_pin, true, button_config.initial_power_button_value, gpio.invert_power_pin_logic))),
                gpio.reset_pin.map(|p| {
                    Box::new(Esp8266Pin::new(command_transport, Some(p), true, button_config.initial_reset_button_value, gpio.invert_reset_pin_logic)) as Box<dyn Pin>
                }),
                button_config,
            );
            Box::new(WolChassis::new(inner, command_telnet.clone(), target.wol.resolve()))
        }
        #[cfg(feature = "gpio")]
        TargetKind::Gpio => {
            let gpio = target.gpio.resolve();
            Box::new(ButtonChassis::new(
                Box::new(GpioPin::new(gpio.status_pin, false, button_config.initial_power_status_value, gpio.invert_status_pin_logic)),
                Some(Box::new(GpioPin::new(gpio.power_pin, true, button_config.initial_power_button_value, gpio.invert_power_pin_logic))),
                gpio.reset_pin.map(|p| Box::new(GpioPin::new(Some(p), true, button_config.initial_reset_button_value, gpio.invert_reset_pin_logic)) as Box<dyn Pin>),
                button_config,
            ))
        }
        #[cfg(not(feature = "gpio"))]
        TargetKind::Gpio => anyhow::bail!("this build was not compiled with the `gpio` feature"),
    };

    let uart_config = matches!(target.kind, TargetKind::Esp8266 | TargetKind::Esp8266Wol).then(|| target.uart.resolve());

    Ok(VirtualBmc::new(address, chassis, sol_telnet, uart_config, listen_port))
}

/// The UDP receive loop: parse each datagram, dispatch it, and write the
/// response back to the originating peer.
async fn run(socket: Arc<UdpSocket>, mut bridge: IpmbBridge) -> anyhow::Result<()> {
    let mut buf = vec![0u8; 2048];
    let mut sol_peers: HashMap<SocketAddr, mpsc::Sender<Vec<u8>>> = HashMap::new();

    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        let datagram = rmcp::parse_datagram(&buf[..len]);

        match datagram {
            IncomingDatagram::AsfPresencePing { message_tag } => {
                let reply = rmcp::encode_asf_pong(message_tag);
                socket.send_to(&reply, peer).await?;
            }
            IncomingDatagram::Ipmi(request) => {
                let session_id = request.session_id;
                let sequence = request.sequence;

                let sol_tx = sol_peers.entry(peer).or_insert_with(|| {
                    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
                    let socket = Arc::clone(&socket);
                    tokio::spawn(async move {
                        while let Some(chunk) = rx.recv().await {
                            let datagram = rmcp::encode_sol_payload(session_id, &chunk);
                            if socket.send_to(&datagram, peer).await.is_err() {
                                return;
                            }
                        }
                    });
                    tx
                });

                match bridge.handle_raw_request(request, sol_tx.clone()).await {
                    Some(response) => {
                        let bytes = rmcp::encode_ipmi_response(session_id, sequence, &response);
                        socket.send_to(&bytes, peer).await?;
                    }
                    None => {
                        // In-flight retransmit: the original request is still
                        // being handled, drop this one silently (spec.md §4.5).
                        tracing::debug!(session_id, sequence, "dropping in-flight retransmit");
                    }
                }
            }
            IncomingDatagram::Sol { session_id, data } => {
                if let Err(e) = bridge.route_sol_data(session_id, &data).await {
                    tracing::debug!(session_id, error = %e, "dropping inbound SOL datagram");
                }
            }
            IncomingDatagram::Unrecognized => {
                tracing::debug!(?peer, "ignoring unrecognized datagram");
            }
        }
    }
}
