//! Logic controls: stateless and stateful reducers over N inputs.
//!
//! Complex operations (the comparisons and the Running* family) designate a
//! *reference* input — the right-hand side of a comparison or the reset
//! signal — and RunningAverage additionally a *trigger* input whose rising
//! edge takes a sample. Both are tracked as ordinary inputs so the shared
//! value/validity bookkeeping covers them uniformly.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{ControlCore, ControlState};
use crate::config::LogicEntry;
use crate::device::{Device, DeviceKind};
use crate::error::{ConfigError, WiringError};
use crate::maths::{RunningAverage, fuzzy_eq, is_high};

/// Reduction applied to the control's inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Passthrough,
    Equal,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Any,
    All,
    None,
    Average,
    Toggle,
    Invert,
    Maximum,
    Minimum,
    Multiply,
    RunningAverage,
    RunningMax,
    RunningMin,
}

impl Operation {
    pub fn from_name(name: &str) -> Option<Self> {
        let operation = match name.trim().to_uppercase().as_str() {
            "PASSTHROUGH" => Self::Passthrough,
            "EQUAL" => Self::Equal,
            "LESSTHAN" => Self::LessThan,
            "LESSTHANOREQUAL" => Self::LessThanOrEqual,
            "GREATERTHAN" => Self::GreaterThan,
            "GREATERTHANOREQUAL" => Self::GreaterThanOrEqual,
            "ANY" => Self::Any,
            "ALL" => Self::All,
            "NONE" => Self::None,
            "AVERAGE" => Self::Average,
            "TOGGLE" => Self::Toggle,
            "INVERT" => Self::Invert,
            "MAXIMUM" => Self::Maximum,
            "MINIMUM" => Self::Minimum,
            "MULTIPLY" => Self::Multiply,
            "RUNNINGAVERAGE" => Self::RunningAverage,
            "RUNNINGMAX" => Self::RunningMax,
            "RUNNINGMIN" => Self::RunningMin,
            _ => return None,
        };
        Some(operation)
    }

    /// Operations that compare or reset against a reference device.
    pub fn is_complex(self) -> bool {
        matches!(
            self,
            Self::Equal
                | Self::LessThan
                | Self::LessThanOrEqual
                | Self::GreaterThan
                | Self::GreaterThanOrEqual
                | Self::RunningAverage
                | Self::RunningMax
                | Self::RunningMin
        )
    }
}

/// Payload for [`DeviceKind::Logic`].
pub struct LogicControl {
    core: ControlCore,
    operation: Operation,
    reference_id: Option<String>,
    trigger_id: Option<String>,
    state: Mutex<LogicState>,
}

struct LogicState {
    /// The designated input of a complex operation: the one listed input
    /// that is neither the reference nor the trigger. Fixed at validation.
    input_device_id: Option<String>,
    average: RunningAverage,
    first_running: bool,
    running_value: f64,
}

impl LogicControl {
    pub(crate) fn create(entry: &LogicEntry) -> Result<Arc<Device>, ConfigError> {
        let name = entry.name.trim();
        if name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        let operation =
            Operation::from_name(&entry.operation).ok_or_else(|| ConfigError::UnknownOperation {
                device: name.to_owned(),
                operation: entry.operation.clone(),
            })?;

        let mut inputs = entry.inputs.clone();
        let mut reference_id = None;
        let mut trigger_id = None;

        if operation.is_complex() {
            // the reference is tracked as a normal input so the shared
            // value/valid logic covers it; we just remember which one it is
            let reference = entry
                .references
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or(ConfigError::MissingField { device: name.to_owned(), field: "references" })?;
            inputs.push(reference.to_owned());
            reference_id = Some(reference.to_owned());

            if operation == Operation::RunningAverage {
                let trigger = entry
                    .triggers
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .ok_or(ConfigError::MissingField { device: name.to_owned(), field: "triggers" })?;
                inputs.push(trigger.to_owned());
                trigger_id = Some(trigger.to_owned());
            }
        }

        let control = Self {
            core: ControlCore::new(inputs, entry.outputs.clone()),
            operation,
            reference_id,
            trigger_id,
            state: Mutex::new(LogicState {
                input_device_id: None,
                average: RunningAverage::new(entry.window.unwrap_or(0)),
                first_running: true,
                running_value: 0.0,
            }),
        };
        Ok(Device::new(
            name.to_owned(),
            "LogicControl",
            entry.username.clone(),
            entry.userdescription.clone(),
            entry.default.unwrap_or(0.0),
            DeviceKind::Logic(control),
        ))
    }

    pub fn core(&self) -> &ControlCore {
        &self.core
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn reference_id(&self) -> Option<&str> {
        self.reference_id.as_deref()
    }

    pub fn trigger_id(&self) -> Option<&str> {
        self.trigger_id.as_deref()
    }

    /// Operation-specific arity checks against the resolved input set, plus
    /// designation of the comparison input for complex operations.
    pub(crate) fn validate(&self, id: &str) -> Result<(), WiringError> {
        let count = self.core.input_ids().len();
        match self.operation {
            Operation::Any
            | Operation::All
            | Operation::None
            | Operation::Average
            | Operation::Maximum
            | Operation::Minimum
            | Operation::Multiply => {
                if count < 2 {
                    return Err(WiringError::WrongArity {
                        device: id.to_owned(),
                        need: "at least 2",
                        got: count,
                    });
                }
            }
            Operation::Passthrough | Operation::Toggle | Operation::Invert => {
                if count != 1 {
                    return Err(WiringError::WrongArity {
                        device: id.to_owned(),
                        need: "exactly 1",
                        got: count,
                    });
                }
            }
            Operation::Equal
            | Operation::LessThan
            | Operation::LessThanOrEqual
            | Operation::GreaterThan
            | Operation::GreaterThanOrEqual
            | Operation::RunningMax
            | Operation::RunningMin => {
                if count != 2 {
                    return Err(WiringError::WrongArity {
                        device: id.to_owned(),
                        need: "1 input and 1 reference",
                        got: count,
                    });
                }
            }
            Operation::RunningAverage => {
                if count != 3 {
                    return Err(WiringError::WrongArity {
                        device: id.to_owned(),
                        need: "1 input, 1 reference and 1 trigger",
                        got: count,
                    });
                }
            }
        }

        if self.operation.is_complex() {
            let designated = self
                .core
                .input_ids()
                .iter()
                .find(|input| {
                    self.reference_id.as_deref() != Some(input.as_str())
                        && self.trigger_id.as_deref() != Some(input.as_str())
                })
                .cloned();
            match designated {
                Some(input) => self.state.lock().input_device_id = Some(input),
                None => {
                    return Err(WiringError::WrongArity {
                        device: id.to_owned(),
                        need: "a distinct comparison input",
                        got: count,
                    });
                }
            }
        }
        Ok(())
    }

    /// Derive the output value from the current input snapshot.
    pub(crate) fn calculate(&self, owner: &Arc<Device>, st: &mut ControlState) {
        let mut ls = self.state.lock();

        // no change by default
        let current = owner.get_value();
        let mut new_value = current;

        let value_of = |id: &Option<String>| -> f64 {
            id.as_deref().and_then(|id| st.input_values.get(id)).copied().unwrap_or(0.0)
        };
        let last_of = |id: &Option<String>| -> f64 {
            id.as_deref().and_then(|id| st.last_input_values.get(id)).copied().unwrap_or(0.0)
        };

        let input_value = value_of(&ls.input_device_id);
        let reference_value = value_of(&self.reference_id);

        match self.operation {
            Operation::RunningAverage => {
                // samples are taken on trigger edges, not value changes;
                // when reset and sample coincide, reset wins first and the
                // average restarts with exactly one sample
                let trigger_value = value_of(&self.trigger_id);
                let reference_rose = is_high(reference_value) && !is_high(last_of(&self.reference_id));
                let trigger_rose = is_high(trigger_value) && !is_high(last_of(&self.trigger_id));
                if reference_rose {
                    ls.average.reset();
                    new_value = ls.average.mean();
                }
                if trigger_rose {
                    new_value = ls.average.add_value(input_value);
                }
                // consume both edges so a recompute caused by another input
                // cannot sample or reset a second time
                if let Some(id) = self.trigger_id.as_deref() {
                    st.last_input_values.insert(id.to_owned(), trigger_value);
                }
                if let Some(id) = self.reference_id.as_deref() {
                    st.last_input_values.insert(id.to_owned(), reference_value);
                }
            }
            Operation::RunningMax => {
                // reset on reference high, always seed from the first sample
                if is_high(reference_value) || ls.first_running || input_value > ls.running_value {
                    ls.running_value = input_value;
                    ls.first_running = false;
                    new_value = input_value;
                }
            }
            Operation::RunningMin => {
                if is_high(reference_value) || ls.first_running || input_value < ls.running_value {
                    ls.running_value = input_value;
                    ls.first_running = false;
                    new_value = input_value;
                }
            }
            Operation::Passthrough => {
                new_value = value_of(&Some(self.core.input_ids()[0].clone()));
            }
            Operation::Equal => {
                new_value = if fuzzy_eq(input_value, reference_value) { 1.0 } else { 0.0 };
            }
            Operation::LessThan => {
                new_value = if input_value < reference_value { 1.0 } else { 0.0 };
            }
            Operation::LessThanOrEqual => {
                new_value = if input_value <= reference_value { 1.0 } else { 0.0 };
            }
            Operation::GreaterThan => {
                new_value = if input_value > reference_value { 1.0 } else { 0.0 };
            }
            Operation::GreaterThanOrEqual => {
                new_value = if input_value >= reference_value { 1.0 } else { 0.0 };
            }
            Operation::All => {
                let all = st.input_values.values().all(|v| is_high(*v));
                new_value = if all { 1.0 } else { 0.0 };
            }
            Operation::Any | Operation::None => {
                let any = st.input_values.values().any(|v| is_high(*v));
                new_value = if (self.operation == Operation::Any) == any { 1.0 } else { 0.0 };
            }
            Operation::Average => {
                let sum: f64 = st.input_values.values().sum();
                new_value = sum / st.input_values.len() as f64;
            }
            Operation::Multiply => {
                new_value = st.input_values.values().product();
            }
            Operation::Toggle => {
                // flip on every rising edge of the sole input
                let id = Some(self.core.input_ids()[0].clone());
                if !is_high(last_of(&id)) && is_high(value_of(&id)) {
                    new_value = if is_high(current) { 0.0 } else { 1.0 };
                }
            }
            Operation::Invert => {
                let id = Some(self.core.input_ids()[0].clone());
                new_value = if is_high(value_of(&id)) { 0.0 } else { 1.0 };
            }
            Operation::Maximum => {
                new_value = st.input_values.values().fold(f64::NEG_INFINITY, |a, v| a.max(*v));
            }
            Operation::Minimum => {
                new_value = st.input_values.values().fold(f64::INFINITY, |a, v| a.min(*v));
            }
        }

        drop(ls);
        owner.set_value(new_value);
    }

    pub(crate) fn description(&self) -> Vec<String> {
        let reference = || self.reference_id.clone().unwrap_or_else(|| "unknown".to_owned());
        vec![match self.operation {
            Operation::Passthrough => "Passthrough".to_owned(),
            Operation::Equal => format!("Equal to '{}'", reference()),
            Operation::LessThan => format!("Less than '{}'", reference()),
            Operation::LessThanOrEqual => format!("Less than or equal to '{}'", reference()),
            Operation::GreaterThan => format!("Greater than '{}'", reference()),
            Operation::GreaterThanOrEqual => format!("Greater than or equal to '{}'", reference()),
            Operation::Any => "Any".to_owned(),
            Operation::All => "All".to_owned(),
            Operation::None => "None".to_owned(),
            Operation::Average => "Average".to_owned(),
            Operation::Toggle => "Toggle".to_owned(),
            Operation::Invert => "Invert".to_owned(),
            Operation::Maximum => "Maximum".to_owned(),
            Operation::Minimum => "Minimum".to_owned(),
            Operation::Multiply => "Multiply".to_owned(),
            Operation::RunningAverage => "Running average".to_owned(),
            Operation::RunningMax => "Running max".to_owned(),
            Operation::RunningMin => "Running min".to_owned(),
        }]
    }
}
