//! `press`/`toggle` over a [`Pin`], exactly as `buttonbmc.py::Button` does
//! for any `AsyncStatus` — flattened here into free functions since every
//! `Pin` already exposes `get_value`/`set_value` (§9 REDESIGN: composition
//! over the `Button` -> `DigitalPin` inheritance link).

use crate::error::BmcResult;
use crate::pin::Pin;
use std::time::Duration;

/// Drives the pin high, holds for `press_duration`, then releases.
/// Returns the value observed right before release (mirrors
/// `Button.press`, which returns the restored "not pressed" value).
pub async fn press(pin: &mut dyn Pin, press_duration: Duration) -> BmcResult<bool> {
    pin.set_value(true).await?;
    tokio::time::sleep(press_duration).await;
    pin.set_value(false).await
}

/// Flips the pin's current value, holds for `toggle_duration`, then
/// restores the original value.
pub async fn toggle(pin: &mut dyn Pin, toggle_duration: Duration) -> BmcResult<bool> {
    let value = pin.get_value().await?;
    pin.set_value(!value).await?;
    tokio::time::sleep(toggle_duration).await;
    pin.set_value(value).await
}
