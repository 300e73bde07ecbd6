//! Output devices: sinks that drive the physical (or virtual) world.
//!
//! An output is owned by exactly one producer — the single-writer rule that
//! keeps hardware buses coherent. The hardware itself sits behind the
//! [`SwitchSink`]/[`PwmSink`] traits; adapters over `embedded-hal` pins live
//! in [`crate::platform`]. Sink write failures are logged and swallowed, a
//! flaky actuator must not stall the graph.

use log::{error, info, warn};
use parking_lot::Mutex;

use crate::config::OutputEntry;
use crate::device::{Device, DeviceKind};
use crate::error::{ConfigError, Result, WiringError};
use crate::maths::{fuzzy_zero, is_high};

/// Default PWM quantisation when no hardware fixes it.
const DEFAULT_PWM_RESOLUTION: u32 = 1024;

/// Lowest and highest accepted PWM resolutions (7 to 24 bit).
const MIN_PWM_RESOLUTION: u32 = 128;
const MAX_PWM_RESOLUTION: u32 = 16_777_215;

/// Binary actuator endpoint (relay, GPIO pin).
pub trait SwitchSink: Send {
    fn write(&mut self, on: bool) -> Result<()>;
}

/// Duty-cycle actuator endpoint (LED channel, motor driver).
pub trait PwmSink: Send {
    /// Apply a duty cycle in [0, 1].
    fn write(&mut self, duty: f64) -> Result<()>;
    /// Native resolution of the channel in steps.
    fn resolution(&self) -> u32;
}

pub(crate) enum Sink {
    Switch(Box<dyn SwitchSink>),
    Pwm(Box<dyn PwmSink>),
}

/// Output flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Value ∈ {0, 1}; any fuzzy-nonzero write is coerced to 1.
    Switch,
    /// Value ∈ [0, 1], quantised to the resolution.
    Pwm,
}

/// Payload for [`DeviceKind::Output`].
pub struct Output {
    kind: OutputKind,
    resolution: u32,
    owner: Mutex<Option<String>>,
    sink: Mutex<Option<Sink>>,
}

impl Output {
    /// Build an output device from its config entry and an optional
    /// hardware sink. A hardware PWM channel fixes the resolution at its
    /// native value; otherwise a configured resolution in [128, 16777215]
    /// is honoured.
    pub(crate) fn create(
        kind: OutputKind,
        entry: &OutputEntry,
        sink: Option<Sink>,
    ) -> std::result::Result<std::sync::Arc<Device>, ConfigError> {
        if entry.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }

        let native = match &sink {
            Some(Sink::Pwm(pwm)) => Some(pwm.resolution()),
            _ => None,
        };
        let mut resolution = native.unwrap_or(DEFAULT_PWM_RESOLUTION);
        if kind == OutputKind::Pwm {
            if let Some(requested) = entry.resolution {
                if !(MIN_PWM_RESOLUTION..=MAX_PWM_RESOLUTION).contains(&requested) {
                    error!(
                        "Requested resolution {requested} for '{}' is out of range - defaulting to {resolution}",
                        entry.name
                    );
                } else if native.is_some_and(|max| requested > max) {
                    error!(
                        "Requested resolution {requested} for '{}' exceeds the channel maximum - defaulting to {resolution}",
                        entry.name
                    );
                } else {
                    resolution = requested;
                    info!("Set resolution to {resolution} for '{}'", entry.name);
                }
            }
        }

        let output = Self {
            kind,
            resolution,
            owner: Mutex::new(None),
            sink: Mutex::new(sink),
        };
        let default = match kind {
            OutputKind::Switch => {
                let d = entry.default.unwrap_or(0.0);
                if fuzzy_zero(d) { 0.0 } else { 1.0 }
            }
            OutputKind::Pwm => entry.default.unwrap_or(0.0).clamp(0.0, 1.0),
        };
        Ok(Device::new(
            entry.name.trim().to_owned(),
            match kind {
                OutputKind::Switch => "SwitchOutput",
                OutputKind::Pwm => "PwmOutput",
            },
            entry.username.clone(),
            entry.userdescription.clone(),
            default,
            DeviceKind::Output(output),
        ))
    }

    pub fn output_kind(&self) -> OutputKind {
        self.kind
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn has_owner(&self) -> bool {
        self.owner.lock().is_some()
    }

    pub fn owner(&self) -> Option<String> {
        self.owner.lock().clone()
    }

    /// Claim this output for a producer. There can be only one owner.
    pub(crate) fn claim(&self, output_id: &str, claimant: &str) -> std::result::Result<(), WiringError> {
        let mut owner = self.owner.lock();
        if let Some(existing) = owner.as_ref() {
            return Err(WiringError::OutputOwned {
                output: output_id.to_owned(),
                owner: existing.clone(),
                claimant: claimant.to_owned(),
            });
        }
        *owner = Some(claimant.to_owned());
        Ok(())
    }

    pub(crate) fn release(&self) {
        *self.owner.lock() = None;
    }

    /// Coerce an incoming value to this output's domain. `None` means the
    /// write should be suppressed (sub-resolution PWM change).
    pub(crate) fn coerce(&self, current: f64, value: f64) -> Option<f64> {
        match self.kind {
            OutputKind::Switch => Some(if fuzzy_zero(value) { 0.0 } else { 1.0 }),
            OutputKind::Pwm => {
                let value = value.clamp(0.0, 1.0);
                if (current - value).abs() < 1.0 / f64::from(self.resolution) {
                    return None;
                }
                Some(value)
            }
        }
    }

    /// Drive the physical side with an already-coerced value.
    pub(crate) fn drive(&self, id: &str, value: f64) {
        let mut sink = self.sink.lock();
        let result = match sink.as_mut() {
            Some(Sink::Switch(s)) => s.write(is_high(value)),
            Some(Sink::Pwm(p)) => p.write(value),
            None => Ok(()),
        };
        if let Err(e) = result {
            warn!("Output '{id}' failed to drive its sink: {e}");
        }
    }

    pub(crate) fn description(&self) -> Vec<String> {
        match self.kind {
            OutputKind::Switch => vec!["On/off switch".to_owned()],
            OutputKind::Pwm => vec![format!("Constant PWM ({} steps)", self.resolution)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> OutputEntry {
        OutputEntry {
            name: name.to_owned(),
            username: None,
            userdescription: None,
            default: None,
            resolution: None,
        }
    }

    fn payload(device: &Device) -> &Output {
        match device.kind() {
            DeviceKind::Output(o) => o,
            _ => unreachable!(),
        }
    }

    #[test]
    fn switch_coerces_to_binary() {
        let out = Output::create(OutputKind::Switch, &entry("o"), None).unwrap();
        out.set_value(0.4);
        assert_eq!(out.get_value(), 1.0);
        out.set_value(1e-14);
        assert_eq!(out.get_value(), 0.0);
    }

    #[test]
    fn pwm_suppresses_sub_resolution_changes() {
        let out = Output::create(OutputKind::Pwm, &entry("o"), None).unwrap();
        out.set_value(0.5);
        assert_eq!(out.get_value(), 0.5);
        // 1/1024 ≈ 0.00098; a smaller delta must not register
        out.set_value(0.5 + 0.0005);
        assert_eq!(out.get_value(), 0.5);
        out.set_value(0.6);
        assert_eq!(out.get_value(), 0.6);
    }

    #[test]
    fn pwm_clamps_into_unit_range() {
        let out = Output::create(OutputKind::Pwm, &entry("o"), None).unwrap();
        out.set_value(1.7);
        assert_eq!(out.get_value(), 1.0);
        out.set_value(-0.3);
        assert_eq!(out.get_value(), 0.0);
    }

    #[test]
    fn configured_resolution_respects_bounds() {
        let mut e = entry("o");
        e.resolution = Some(64); // below minimum, ignored
        let out = Output::create(OutputKind::Pwm, &e, None).unwrap();
        assert_eq!(payload(&out).resolution(), DEFAULT_PWM_RESOLUTION);

        e.resolution = Some(4096);
        let out = Output::create(OutputKind::Pwm, &e, None).unwrap();
        assert_eq!(payload(&out).resolution(), 4096);
    }

    #[test]
    fn single_owner_enforced() {
        let out = Output::create(OutputKind::Switch, &entry("o"), None).unwrap();
        let payload = payload(&out);
        payload.claim("o", "first").unwrap();
        let denied = payload.claim("o", "second");
        assert!(matches!(denied, Err(WiringError::OutputOwned { .. })));
        assert_eq!(payload.owner().as_deref(), Some("first"));
    }
}
