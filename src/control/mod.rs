//! Controls: devices whose value is derived from their inputs.
//!
//! [`ControlCore`] carries what every control shares — the declared input
//! and output id lists, the edges resolved against the registry during
//! validation, and the per-input value/validity bookkeeping that decides
//! when the control itself is valid.
//!
//! A control is valid iff all of its inputs are valid and each has
//! delivered at least one value; while invalid its value is the default.
//! Every input change runs the same sequence: record the value, mark the
//! input valid (a value implies validity), re-derive the control's own
//! validity, and — when valid — recompute the output.

pub mod logic;
pub mod timer;
pub mod transition;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use crate::device::{Device, DeviceKind};
use crate::maths::fuzzy_eq;

/// Shared state of every control variant.
pub struct ControlCore {
    input_ids: Vec<String>,
    output_ids: Vec<String>,
    state: Mutex<ControlState>,
}

/// Mutable control bookkeeping, guarded by the control's own mutex.
pub(crate) struct ControlState {
    /// Resolved input edges (id → device), filled during validation.
    pub inputs: HashMap<String, Weak<Device>>,
    /// Resolved output edges (id → device), filled during validation.
    pub outputs: HashMap<String, Weak<Device>>,
    /// Strong claims on owned output devices; released on drop.
    pub owned_outputs: Vec<Arc<Device>>,
    /// Latest value per input, present only while that input is valid.
    pub input_values: HashMap<String, f64>,
    /// Previous value per input, for edge detection (Toggle).
    pub last_input_values: HashMap<String, f64>,
    /// Validity per input, seeded to false at finish.
    pub input_valids: HashMap<String, bool>,
    pub all_inputs_valid: bool,
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = Vec::new();
    for id in ids {
        let id = id.trim().to_owned();
        if !id.is_empty() && !seen.contains(&id) {
            seen.push(id);
        }
    }
    seen
}

impl ControlCore {
    pub(crate) fn new(input_ids: Vec<String>, output_ids: Vec<String>) -> Self {
        Self {
            input_ids: dedup(input_ids),
            output_ids: dedup(output_ids),
            state: Mutex::new(ControlState {
                inputs: HashMap::new(),
                outputs: HashMap::new(),
                owned_outputs: Vec::new(),
                input_values: HashMap::new(),
                last_input_values: HashMap::new(),
                input_valids: HashMap::new(),
                all_inputs_valid: false,
            }),
        }
    }

    pub fn input_ids(&self) -> &[String] {
        &self.input_ids
    }

    pub fn output_ids(&self) -> &[String] {
        &self.output_ids
    }

    pub fn is_known_input(&self, id: &str) -> bool {
        !id.is_empty() && self.input_ids.iter().any(|i| i == id)
    }

    pub fn is_known_output(&self, id: &str) -> bool {
        !id.is_empty() && self.output_ids.iter().any(|o| o == id)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock()
    }

    // ── Inbound input notifications ───────────────────────────

    pub(crate) fn input_value_changed(&self, owner: &Arc<Device>, source: &Arc<Device>, value: f64) {
        if !owner.validated() {
            return;
        }
        let mut st = self.state.lock();
        let id = source.id();
        if !st.inputs.contains_key(id) {
            return;
        }

        // ignore known values from valid inputs
        if st.input_valids.get(id).copied().unwrap_or(false)
            && st.input_values.get(id).is_some_and(|prev| fuzzy_eq(*prev, value))
        {
            return;
        }

        // remember the previous value if there was one; otherwise seed it
        // with the new value so no spurious edge is detected
        let last = st.input_values.get(id).copied().unwrap_or(value);
        st.input_values.insert(id.to_owned(), value);
        st.last_input_values.insert(id.to_owned(), last);

        // a delivered value implies the input is valid
        Self::set_input_valid(&mut st, id, true);
        self.check_input_values(owner, &mut st);
    }

    pub(crate) fn input_valid_changed(&self, owner: &Arc<Device>, source: &Arc<Device>, valid: bool) {
        if !owner.validated() {
            return;
        }
        let mut st = self.state.lock();
        if !st.inputs.contains_key(source.id()) {
            return;
        }
        Self::set_input_valid(&mut st, source.id(), valid);
        self.check_input_values(owner, &mut st);
    }

    fn set_input_valid(st: &mut ControlState, id: &str, valid: bool) {
        if st.input_valids.get(id).copied() == Some(valid) {
            return;
        }
        st.input_valids.insert(id.to_owned(), valid);
        if valid {
            st.all_inputs_valid = st.input_valids.values().all(|v| *v);
        } else {
            st.all_inputs_valid = false;
            st.input_values.remove(id);
            st.last_input_values.remove(id);
        }
    }

    /// Re-derive this control's validity and, when valid, its output.
    fn check_input_values(&self, owner: &Arc<Device>, st: &mut ControlState) {
        let is_valid = st.all_inputs_valid && st.input_values.len() == self.input_ids.len();
        owner.set_valid(is_valid);
        if is_valid {
            calculate_output(owner, st);
        }
    }
}

/// Recompute a control's value from a consistent snapshot of its inputs.
pub(crate) fn calculate_output(owner: &Arc<Device>, st: &mut ControlState) {
    match owner.kind() {
        DeviceKind::Logic(c) => c.calculate(owner, st),
        DeviceKind::Transition(c) => c.calculate(owner, st),
        // timers derive their value from the clock, not from inputs
        DeviceKind::Timer(_) => {}
        _ => {}
    }
}
