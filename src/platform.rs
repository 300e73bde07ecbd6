//! Platform bindings: adapters from `embedded-hal` traits to the output
//! sink seams, plus in-memory sinks for tests and virtual deployments.
//!
//! The engine never talks to hardware directly. A platform layer (GPIO
//! expander, I²C PWM chip, relay board) exposes its pins through
//! `embedded-hal` and a [`SinkFactory`](crate::builder::SinkFactory) hands
//! the adapters below to the builder for the declared outputs. Bus-level
//! serialization is the binding's concern; the single-owner rule keeps each
//! pin single-writer on the engine side.

use std::sync::Arc;

use embedded_hal::digital::OutputPin;
use embedded_hal::pwm::SetDutyCycle;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::output::{PwmSink, SwitchSink};

// ---------------------------------------------------------------------------
// embedded-hal adapters
// ---------------------------------------------------------------------------

/// Drives a GPIO pin from a switch output.
pub struct HalSwitchSink<P> {
    pin: P,
}

impl<P: OutputPin + Send> HalSwitchSink<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }
}

impl<P: OutputPin + Send> SwitchSink for HalSwitchSink<P> {
    fn write(&mut self, on: bool) -> Result<()> {
        let result = if on { self.pin.set_high() } else { self.pin.set_low() };
        result.map_err(|_| Error::Sink("GPIO write failed".to_owned()))
    }
}

/// Drives a hardware PWM channel; the channel's native resolution is
/// authoritative.
pub struct HalPwmSink<P> {
    channel: P,
}

impl<P: SetDutyCycle + Send> HalPwmSink<P> {
    pub fn new(channel: P) -> Self {
        Self { channel }
    }
}

impl<P: SetDutyCycle + Send> PwmSink for HalPwmSink<P> {
    fn write(&mut self, duty: f64) -> Result<()> {
        let max = self.channel.max_duty_cycle();
        let ticks = (duty.clamp(0.0, 1.0) * f64::from(max)).round() as u16;
        self.channel
            .set_duty_cycle(ticks)
            .map_err(|_| Error::Sink("PWM write failed".to_owned()))
    }

    fn resolution(&self) -> u32 {
        u32::from(self.channel.max_duty_cycle())
    }
}

// ---------------------------------------------------------------------------
// In-memory sinks
// ---------------------------------------------------------------------------

/// Records switch states; clone it to keep a handle for assertions.
#[derive(Clone, Default)]
pub struct MemorySwitchSink {
    state: Arc<Mutex<Option<bool>>>,
}

impl MemorySwitchSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<bool> {
        *self.state.lock()
    }
}

impl SwitchSink for MemorySwitchSink {
    fn write(&mut self, on: bool) -> Result<()> {
        *self.state.lock() = Some(on);
        Ok(())
    }
}

/// Records duty cycles; clone it to keep a handle for assertions.
#[derive(Clone)]
pub struct MemoryPwmSink {
    duty: Arc<Mutex<Option<f64>>>,
    resolution: u32,
}

impl MemoryPwmSink {
    pub fn new(resolution: u32) -> Self {
        Self { duty: Arc::new(Mutex::new(None)), resolution }
    }

    pub fn last(&self) -> Option<f64> {
        *self.duty.lock()
    }
}

impl PwmSink for MemoryPwmSink {
    fn write(&mut self, duty: f64) -> Result<()> {
        *self.duty.lock() = Some(duty);
        Ok(())
    }

    fn resolution(&self) -> u32 {
        self.resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakePin {
        high: bool,
    }

    impl embedded_hal::digital::ErrorType for FakePin {
        type Error = core::convert::Infallible;
    }

    impl OutputPin for FakePin {
        fn set_low(&mut self) -> std::result::Result<(), Self::Error> {
            self.high = false;
            Ok(())
        }

        fn set_high(&mut self) -> std::result::Result<(), Self::Error> {
            self.high = true;
            Ok(())
        }
    }

    #[test]
    fn hal_switch_sink_sets_pin() {
        let mut sink = HalSwitchSink::new(FakePin::default());
        sink.write(true).unwrap();
        assert!(sink.pin.high);
        sink.write(false).unwrap();
        assert!(!sink.pin.high);
    }

    struct FakeChannel {
        duty: u16,
    }

    impl embedded_hal::pwm::ErrorType for FakeChannel {
        type Error = core::convert::Infallible;
    }

    impl SetDutyCycle for FakeChannel {
        fn max_duty_cycle(&self) -> u16 {
            4095
        }

        fn set_duty_cycle(&mut self, duty: u16) -> std::result::Result<(), Self::Error> {
            self.duty = duty;
            Ok(())
        }
    }

    #[test]
    fn hal_pwm_sink_scales_duty() {
        let mut sink = HalPwmSink::new(FakeChannel { duty: 0 });
        assert_eq!(sink.resolution(), 4095);
        sink.write(0.5).unwrap();
        assert_eq!(sink.channel.duty, 2048);
        sink.write(1.0).unwrap();
        assert_eq!(sink.channel.duty, 4095);
    }

    #[test]
    fn memory_sinks_record() {
        let mut switch = MemorySwitchSink::new();
        assert_eq!(switch.last(), None);
        switch.write(true).unwrap();
        assert_eq!(switch.last(), Some(true));

        let mut pwm = MemoryPwmSink::new(256);
        pwm.write(0.25).unwrap();
        assert_eq!(pwm.last(), Some(0.25));
        assert_eq!(pwm.resolution(), 256);
    }
}
