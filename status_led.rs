use log::warn;
use rppal::gpio::{Gpio, OutputPin};

use crate::error::ConfigError;

const LED_SLOW_PERIOD_MS: f64 = 1000.0;
const LED_FAST_PERIOD_MS: f64 = 200.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Off,
    Solid,
    /// Network trouble.
    SlowBlink,
    /// Sensor trouble.
    FastBlink,
}

impl Pattern {
    /// Blink frequency in Hz, if the pattern blinks.
    pub fn frequency(self) -> Option<f64> {
        match self {
            Pattern::SlowBlink => Some(1000.0 / LED_SLOW_PERIOD_MS),
            Pattern::FastBlink => Some(1000.0 / LED_FAST_PERIOD_MS),
            Pattern::Off | Pattern::Solid => None,
        }
    }
}

/// Best effort: indicator failures are logged and otherwise ignored.
pub trait StatusIndicator {
    fn show(&mut self, pattern: Pattern);
}

impl<T: StatusIndicator + ?Sized> StatusIndicator for Box<T> {
    fn show(&mut self, pattern: Pattern) {
        (**self).show(pattern)
    }
}

pub struct GpioLed {
    pin: OutputPin,
    current: Option<Pattern>,
}

impl GpioLed {
    pub fn new(bcm_pin: u8) -> Result<Self, ConfigError> {
        let pin = Gpio::new()
            .and_then(|gpio| gpio.get(bcm_pin))
            .map_err(|e| ConfigError::Gpio(format!("pin {}: {}", bcm_pin, e)))?
            .into_output_low();
        Ok(GpioLed { pin, current: None })
    }
}

impl StatusIndicator for GpioLed {
    fn show(&mut self, pattern: Pattern) {
        if self.current == Some(pattern) {
            return;
        }
        self.current = Some(pattern);

        let result = match pattern.frequency() {
            Some(hz) => self.pin.set_pwm_frequency(hz, 0.5),
            None => self.pin.clear_pwm(),
        };
        if let Err(e) = result {
            warn!("status led: {}", e);
        }
        match pattern {
            Pattern::Off => self.pin.set_low(),
            Pattern::Solid => self.pin.set_high(),
            Pattern::SlowBlink | Pattern::FastBlink => {}
        }
    }
}

/// Stand-in when no LED pin is configured.
pub struct NoIndicator;

impl StatusIndicator for NoIndicator {
    fn show(&mut self, _pattern: Pattern) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blink_frequencies() {
        assert_eq!(Pattern::SlowBlink.frequency(), Some(1.0));
        assert_eq!(Pattern::FastBlink.frequency(), Some(5.0));
        assert_eq!(Pattern::Solid.frequency(), None);
        assert_eq!(Pattern::Off.frequency(), None);
    }
}
