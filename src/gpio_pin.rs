//! Local Raspberry Pi GPIO pin, feature-gated behind `gpio`
//! (`original_source/pibmc.py::PiPin`).

use crate::error::{BmcError, BmcResult};
use crate::pin::{self, Pin};
use async_trait::async_trait;
use rppal::gpio::{Gpio, InputPin, Level, OutputPin};

enum Direction {
    Input(InputPin),
    Output(OutputPin),
}

pub struct GpioPin {
    pin: Option<u8>,
    is_output: bool,
    invert_logic: bool,
    initial_value: bool,
    direction: Option<Direction>,
}

impl GpioPin {
    pub fn new(pin: Option<u8>, is_output: bool, initial_value: bool, invert_logic: bool) -> Self {
        GpioPin {
            pin,
            is_output,
            invert_logic,
            initial_value,
            direction: None,
        }
    }
}

fn level_for(logic_level: bool) -> Level {
    if logic_level { Level::High } else { Level::Low }
}

#[async_trait]
impl Pin for GpioPin {
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
        let Some(pin_number) = self.pin else { return Ok(()) };
        let gpio = Gpio::new().map_err(|e| BmcError::Unspecified(e.into()))?;
        let pin = gpio.get(pin_number).map_err(|e| BmcError::Unspecified(e.into()))?;

        self.direction = Some(if self.is_output {
            let initial_level = pin::value_to_logic_level(self.initial_value, self.invert_logic);
            let mut output = pin.into_output();
            output.write(level_for(initial_level));
            Direction::Output(output)
        } else {
            Direction::Input(pin.into_input())
        });
        Ok(())
    }

    async fn set_value(&mut self, value: bool) -> BmcResult<bool> {
        self.pin.ok_or(BmcError::PinUnwired("gpio"))?;
        let logic_level = pin::value_to_logic_level(value, self.invert_logic);
        match &mut self.direction {
            Some(Direction::Output(output)) => {
                output.write(level_for(logic_level));
                Ok(pin::logic_level_to_value(logic_level, self.invert_logic))
            }
            _ => Err(BmcError::Unspecified(anyhow::anyhow!("GPIO pin is not configured as an output"))),
        }
    }

    async fn get_value(&mut self) -> BmcResult<bool> {
        self.pin.ok_or(BmcError::PinUnwired("gpio"))?;
        let logic_level = match &self.direction {
            Some(Direction::Output(output)) => output.is_set_high(),
            Some(Direction::Input(input)) => input.is_high(),
            None => return Err(BmcError::Unspecified(anyhow::anyhow!("GPIO pin not set up"))),
        };
        Ok(pin::logic_level_to_value(logic_level, self.invert_logic))
    }
}
