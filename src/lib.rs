pub mod bmc;
pub mod bridge;
pub mod button;
pub mod chassis;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod esp8266;
#[cfg(feature = "gpio")]
pub mod gpio_pin;
pub mod pin;
pub mod rmcp;
pub mod sol;
pub mod telnet;
pub mod wol;
