//! Input devices: the sources of truth for graph values.
//!
//! An input never observes another device; producer threads (GPIO polling,
//! bus monitors, the network layer) feed it through
//! [`Device::push_value`](crate::device::Device::push_value) and failures
//! through `push_invalid`. Each input carries an operating range; crossing
//! it is tracked with `>=`/`<=` comparisons so a binary switch registers
//! both extremes.

use log::warn;
use parking_lot::Mutex;

use crate::config::InputEntry;
use crate::device::{Device, DeviceKind};
use crate::error::ConfigError;

/// What kind of source an input represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Binary contact, value ∈ {0, 1}.
    Switch,
    /// Continuous level in [0, 1].
    Pwm,
    /// Temperature in degrees Celsius.
    Temperature,
    /// Momentary push button: a high push produces a 1→0 pulse.
    Button,
}

impl InputKind {
    pub(crate) fn model_id(self) -> &'static str {
        match self {
            Self::Switch => "SwitchInput",
            Self::Pwm => "PwmInput",
            Self::Temperature => "TemperatureInput",
            Self::Button => "ButtonInput",
        }
    }

    /// Default operating range when the entry does not narrow it.
    fn default_range(self) -> (f64, f64) {
        match self {
            Self::Switch | Self::Pwm | Self::Button => (0.0, 1.0),
            Self::Temperature => (-20.0, 100.0),
        }
    }
}

/// Payload for [`DeviceKind::Input`].
pub struct Input {
    kind: InputKind,
    range_min: f64,
    range_max: f64,
    flags: Mutex<RangeFlags>,
}

#[derive(Default)]
struct RangeFlags {
    out_of_range_low: bool,
    out_of_range_high: bool,
}

impl Input {
    /// Build an input device from its config entry.
    pub(crate) fn create(kind: InputKind, entry: &InputEntry) -> Result<std::sync::Arc<Device>, ConfigError> {
        if entry.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        let (mut min, mut max) = kind.default_range();
        if let Some(m) = entry.min {
            min = m;
        }
        if let Some(m) = entry.max {
            max = m;
        }
        if max <= min {
            warn!("'{}' has an invalid operating range, adjusting", entry.name);
            max = min + 1.0;
        }
        let input = Self {
            kind,
            range_min: min,
            range_max: max,
            flags: Mutex::new(RangeFlags { out_of_range_low: true, out_of_range_high: false }),
        };
        Ok(Device::new(
            entry.name.trim().to_owned(),
            kind.model_id(),
            entry.username.clone(),
            entry.userdescription.clone(),
            entry.default.unwrap_or(0.0),
            DeviceKind::Input(input),
        ))
    }

    pub fn input_kind(&self) -> InputKind {
        self.kind
    }

    pub fn range_min(&self) -> f64 {
        self.range_min
    }

    pub fn range_max(&self) -> f64 {
        self.range_max
    }

    pub fn out_of_range_low(&self) -> bool {
        self.flags.lock().out_of_range_low
    }

    pub fn out_of_range_high(&self) -> bool {
        self.flags.lock().out_of_range_high
    }

    /// Track range crossings. `>=`/`<=` so binary inputs hit both ends;
    /// the two states are mutually exclusive.
    pub(crate) fn update_range_flags(&self, value: f64) {
        let mut flags = self.flags.lock();
        if value >= self.range_max {
            flags.out_of_range_low = false;
            flags.out_of_range_high = true;
        } else if value <= self.range_min {
            flags.out_of_range_high = false;
            flags.out_of_range_low = true;
        }
    }

    pub(crate) fn description(&self) -> Vec<String> {
        vec![match self.kind {
            InputKind::Switch => "Switch input".to_owned(),
            InputKind::Pwm => "PWM input".to_owned(),
            InputKind::Temperature => "Temperature input".to_owned(),
            InputKind::Button => "Button input".to_owned(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputEntry;

    fn entry(name: &str) -> InputEntry {
        InputEntry {
            name: name.to_owned(),
            username: None,
            userdescription: None,
            default: None,
            min: None,
            max: None,
        }
    }

    #[test]
    fn push_marks_valid_and_propagates() {
        let input = Input::create(InputKind::Pwm, &entry("a")).unwrap();
        assert!(!input.get_valid());
        input.push_value(0.5);
        assert!(input.get_valid());
        assert_eq!(input.get_value(), 0.5);
    }

    #[test]
    fn invalid_input_reports_default() {
        let mut e = entry("a");
        e.default = Some(0.25);
        let input = Input::create(InputKind::Pwm, &e).unwrap();
        input.push_value(0.9);
        input.push_invalid();
        assert!(!input.get_valid());
        assert_eq!(input.get_value(), 0.25);
    }

    #[test]
    fn button_pushes_pulse_back_to_zero() {
        let button = Input::create(InputKind::Button, &entry("b")).unwrap();
        button.push_value(1.0);
        assert_eq!(button.get_value(), 0.0);
        assert!(button.get_valid());
    }

    #[test]
    fn range_flags_follow_value() {
        let input = Input::create(InputKind::Switch, &entry("s")).unwrap();
        let DeviceKind::Input(payload) = input.kind() else { unreachable!() };
        assert!(payload.out_of_range_low());
        input.push_value(1.0);
        assert!(payload.out_of_range_high());
        assert!(!payload.out_of_range_low());
        input.push_value(0.0);
        assert!(payload.out_of_range_low());
        assert!(!payload.out_of_range_high());
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(Input::create(InputKind::Switch, &entry("  ")).is_err());
    }
}
