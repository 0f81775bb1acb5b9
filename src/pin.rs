//! The hardware-abstraction seam every power/reset/status pin implements,
//! whether it's backed by a telnet bridge, local GPIO, or nothing at all.
//!
//! `logic_level` and `value` are kept distinct exactly like the original
//! `DigitalPin`: `value` is the caller-facing boolean ("is this button
//! pressed", "is the system powered"), `logic_level` is what actually goes
//! out over the wire, and `invert_logic` is the XOR between them.

use crate::error::BmcResult;
use async_trait::async_trait;

/// Maps a caller-facing boolean onto the wire-level logic level, honoring
/// `invert_logic` (`pinbmc.py::DigitalPin.value_to_logic_level`).
pub fn value_to_logic_level(value: bool, invert_logic: bool) -> bool {
    value != invert_logic
}

/// Inverse of [`value_to_logic_level`].
pub fn logic_level_to_value(logic_level: bool, invert_logic: bool) -> bool {
    logic_level != invert_logic
}

#[async_trait]
pub trait Pin: Send {
    /// `None` means unwired; callers must treat every operation on such a
    /// pin as [`crate::error::BmcError::PinUnwired`].
    fn pin_number(&self) -> Option<u8>;

    fn is_output(&self) -> bool;

    fn invert_logic(&self) -> bool;

    /// One-time bring-up (validate/reconcile remote state, configure local
    /// GPIO direction, ...).
    async fn setup(&mut self) -> BmcResult<()>;

    /// Pushes `value` out to the pin and returns the value actually
    /// observed afterward (mirrors `DigitalPin.set_value`'s round trip
    /// through `logic_level_to_value`).
    async fn set_value(&mut self, value: bool) -> BmcResult<bool>;

    /// Reads the pin's current value.
    async fn get_value(&mut self) -> BmcResult<bool>;
}

/// In-memory pin with no backing hardware; used for the `"fake"` target
/// kind and throughout the test suite.
pub struct FakePin {
    pin: Option<u8>,
    is_output: bool,
    invert_logic: bool,
    value: bool,
}

impl FakePin {
    pub fn new(pin: Option<u8>, is_output: bool, initial_value: bool, invert_logic: bool) -> Self {
        FakePin {
            pin,
            is_output,
            invert_logic,
            value: initial_value,
        }
    }
}

#[async_trait]
impl Pin for FakePin {
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
        Ok(())
    }

    async fn set_value(&mut self, value: bool) -> BmcResult<bool> {
        if self.pin.is_none() {
            return Err(crate::error::BmcError::PinUnwired("fake"));
        }
        self.value = value;
        Ok(self.value)
    }

    async fn get_value(&mut self) -> BmcResult<bool> {
        if self.pin.is_none() {
            return Err(crate::error::BmcError::PinUnwired("fake"));
        }
        Ok(self.value)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// A power/reset/status pin triple sharing one power-state cell, so a
    /// chassis test double behaves like real hardware: pressing the power
    /// button actually flips what the status pin reads, and pressing reset
    /// forces the status pin back to "on" — unlike the plain [`FakePin`],
    /// whose pins are independent and can never satisfy a chassis
    /// directive's post-condition (spec.md §4.4) on their own.
    #[derive(Clone, Copy)]
    pub enum LinkRole {
        PowerButton,
        ResetButton,
    }

    pub struct LinkedFakePin {
        pin: Option<u8>,
        is_output: bool,
        value: bool,
        role: Option<LinkRole>,
        shared_power: Arc<Mutex<bool>>,
    }

    impl LinkedFakePin {
        pub fn status(shared_power: Arc<Mutex<bool>>) -> Self {
            LinkedFakePin {
                pin: Some(2),
                is_output: false,
                value: false,
                role: None,
                shared_power,
            }
        }

        pub fn power_button(shared_power: Arc<Mutex<bool>>) -> Self {
            LinkedFakePin {
                pin: Some(0),
                is_output: true,
                value: false,
                role: Some(LinkRole::PowerButton),
                shared_power,
            }
        }

        pub fn reset_button(shared_power: Arc<Mutex<bool>>) -> Self {
            LinkedFakePin {
                pin: Some(1),
                is_output: true,
                value: false,
                role: Some(LinkRole::ResetButton),
                shared_power,
            }
        }
    }

    #[async_trait]
    impl Pin for LinkedFakePin {
        fn pin_number(&self) -> Option<u8> {
            self.pin
        }

        fn is_output(&self) -> bool {
            self.is_output
        }

        fn invert_logic(&self) -> bool {
            false
        }

        async fn setup(&mut self) -> BmcResult<()> {
            Ok(())
        }

        async fn set_value(&mut self, value: bool) -> BmcResult<bool> {
            self.value = value;
            // A press is "set true, sleep, set false" (button::press); act
            // on the release edge, once the press has actually happened.
            if !value {
                if let Some(role) = self.role {
                    let mut power = self.shared_power.lock().await;
                    match role {
                        LinkRole::PowerButton => *power = !*power,
                        LinkRole::ResetButton => *power = true,
                    }
                }
            }
            Ok(self.value)
        }

        async fn get_value(&mut self) -> BmcResult<bool> {
            match self.role {
                None => Ok(*self.shared_power.lock().await),
                Some(_) => Ok(self.value),
            }
        }
    }

    #[test]
    fn logic_level_round_trips_through_invert() {
        for invert in [false, true] {
            for value in [false, true] {
                let level = value_to_logic_level(value, invert);
                assert_eq!(logic_level_to_value(level, invert), value);
            }
        }
    }

    #[tokio::test]
    async fn unwired_pin_rejects_reads_and_writes() {
        let mut pin = FakePin::new(None, true, false, false);
        assert!(pin.get_value().await.is_err());
        assert!(pin.set_value(true).await.is_err());
    }

    #[tokio::test]
    async fn wired_fake_pin_round_trips_value() {
        let mut pin = FakePin::new(Some(4), true, false, false);
        assert_eq!(pin.set_value(true).await.unwrap(), true);
        assert_eq!(pin.get_value().await.unwrap(), true);
    }
}
