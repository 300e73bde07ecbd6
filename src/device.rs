//! Device base: the common header every graph node shares and the observer
//! protocol that moves value/validity changes between nodes.
//!
//! The original deep hierarchy (device → input/output/control → concrete)
//! is flattened into [`DeviceKind`] tagged variants over one [`Device`]
//! struct. Behavioural differences are a dispatch on the tag.
//!
//! ## Locking and fan-out
//!
//! Every device guards its mutable cell (value, valid, observer list) with
//! its own mutex. A producer snapshots its observers under that lock,
//! releases it, and only then dispatches — so no lock is ever held across
//! fan-out and the non-reentrant mutexes cannot deadlock along the acyclic
//! producer→consumer edges.
//!
//! Two ordering guarantees hold for every producer:
//! - observers never receive a value notification while the producer is
//!   invalid;
//! - `set_valid(false)` resets the value to the default (delivering that
//!   value notification first) before the valid=false notification.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use log::warn;
use parking_lot::Mutex;

use crate::bus::SystemEvent;
use crate::control::ControlCore;
use crate::control::logic::LogicControl;
use crate::control::timer::TimerControl;
use crate::control::transition::TransitionControl;
use crate::input::{Input, InputKind};
use crate::maths::{fuzzy_eq, is_high};
use crate::notify::{Notification, Notifier};
use crate::output::Output;

/// Concrete payload of a device.
pub enum DeviceKind {
    Input(Input),
    Output(Output),
    Logic(LogicControl),
    Timer(TimerControl),
    Transition(TransitionControl),
    Notification(Notification),
    Notifier(Notifier),
}

/// One node of the device graph.
///
/// Held as `Arc<Device>` by the registry; all inter-device references are
/// weak except a producer's ownership claim on its outputs.
pub struct Device {
    id: String,
    model_id: &'static str,
    user_name: Option<String>,
    user_description: Option<String>,
    kind: DeviceKind,
    shared: Mutex<Shared>,
    validated: AtomicBool,
}

struct Shared {
    value: f64,
    valid: bool,
    default_value: f64,
    observers: Vec<Weak<Device>>,
}

impl Device {
    pub(crate) fn new(
        id: String,
        model_id: &'static str,
        user_name: Option<String>,
        user_description: Option<String>,
        default_value: f64,
        kind: DeviceKind,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            model_id,
            user_name,
            user_description,
            kind,
            shared: Mutex::new(Shared {
                value: default_value,
                valid: false,
                default_value,
                observers: Vec::new(),
            }),
            validated: AtomicBool::new(false),
        })
    }

    // ── Header accessors ──────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model_id(&self) -> &'static str {
        self.model_id
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    pub fn user_description(&self) -> Option<&str> {
        self.user_description.as_deref()
    }

    /// The name shown to users: the user name when set, the id otherwise.
    pub fn display_name(&self) -> &str {
        self.user_name.as_deref().unwrap_or(&self.id)
    }

    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    pub fn get_value(&self) -> f64 {
        self.shared.lock().value
    }

    pub fn get_valid(&self) -> bool {
        self.shared.lock().valid
    }

    pub fn default_value(&self) -> f64 {
        self.shared.lock().default_value
    }

    pub(crate) fn is_control(&self) -> bool {
        matches!(
            self.kind,
            DeviceKind::Logic(_) | DeviceKind::Timer(_) | DeviceKind::Transition(_)
        )
    }

    pub(crate) fn control_core(&self) -> Option<&ControlCore> {
        match &self.kind {
            DeviceKind::Logic(c) => Some(c.core()),
            DeviceKind::Timer(c) => Some(c.core()),
            DeviceKind::Transition(c) => Some(c.core()),
            _ => None,
        }
    }

    pub(crate) fn mark_validated(&self) {
        self.validated.store(true, Ordering::Release);
    }

    pub(crate) fn validated(&self) -> bool {
        self.validated.load(Ordering::Acquire)
    }

    // ── Observer protocol ─────────────────────────────────────

    /// Register an observer for value/valid notifications. Duplicate
    /// subscriptions of the same device are ignored.
    pub fn subscribe(&self, observer: &Arc<Device>) {
        let mut shared = self.shared.lock();
        let known = shared
            .observers
            .iter()
            .any(|w| w.upgrade().is_some_and(|o| Arc::ptr_eq(&o, observer)));
        if !known {
            shared.observers.push(Arc::downgrade(observer));
        }
    }

    /// Remove an observer; dead entries are swept as a side effect.
    pub fn unsubscribe(&self, observer: &Arc<Device>) {
        let mut shared = self.shared.lock();
        shared.observers.retain(|w| match w.upgrade() {
            Some(o) => !Arc::ptr_eq(&o, observer),
            None => false,
        });
    }

    fn alive_observers(shared: &Shared) -> Vec<Arc<Device>> {
        shared.observers.iter().filter_map(Weak::upgrade).collect()
    }

    // ── Value and validity ────────────────────────────────────

    /// Update the device value and fan the change out to observers.
    ///
    /// Fuzzy-equal updates are suppressed. Controls ignore writes until the
    /// build has finished them; inputs route through [`Self::push_value`] so
    /// a write implies a valid reading.
    pub fn set_value(self: &Arc<Self>, value: f64) {
        if self.is_control() && !self.validated() {
            return;
        }
        if matches!(self.kind, DeviceKind::Input(_)) {
            self.push_value(value);
            return;
        }
        self.apply_value(value);
    }

    /// Update the device validity.
    ///
    /// Invalidation resets the value to the default first, so observers see
    /// the default-value notification before the valid=false notification.
    pub fn set_valid(self: &Arc<Self>, valid: bool) {
        if self.is_control() && !self.validated() {
            return;
        }
        if !valid {
            let default = self.default_value();
            self.apply_value(default);
        }
        let observers;
        {
            let mut shared = self.shared.lock();
            if shared.valid == valid {
                return;
            }
            shared.valid = valid;
            observers = Self::alive_observers(&shared);
        }
        for observer in observers {
            observer.source_valid_changed(self, valid);
        }
    }

    /// Push a fresh reading into an input device.
    ///
    /// A pushed value implies the input is valid again; the first value
    /// after an invalid period is always delivered downstream, even if it
    /// equals the stale one. Button inputs are momentary: a high push emits
    /// a 1 followed immediately by a 0.
    pub fn push_value(self: &Arc<Self>, value: f64) {
        let DeviceKind::Input(input) = &self.kind else {
            warn!("'{}' is not an input, dropping pushed value", self.id);
            return;
        };
        if matches!(input.input_kind(), InputKind::Button) && is_high(value) {
            self.input_set(1.0);
            self.input_set(0.0);
            return;
        }
        self.input_set(value);
    }

    /// Mark an input as unreadable (sensor fault, bus error). Recovery is
    /// automatic on the next successful push.
    pub fn push_invalid(self: &Arc<Self>) {
        if matches!(self.kind, DeviceKind::Input(_)) {
            self.set_valid(false);
        } else {
            warn!("'{}' is not an input, ignoring invalidation", self.id);
        }
    }

    fn input_set(self: &Arc<Self>, value: f64) {
        let was_valid = self.get_valid();
        if !was_valid {
            self.set_valid(true);
        }
        let observers;
        {
            let mut shared = self.shared.lock();
            if was_valid && fuzzy_eq(shared.value, value) {
                return;
            }
            shared.value = value;
            observers = Self::alive_observers(&shared);
        }
        if let DeviceKind::Input(input) = &self.kind {
            input.update_range_flags(value);
        }
        for observer in observers {
            observer.source_value_changed(self, value);
        }
    }

    fn apply_value(self: &Arc<Self>, value: f64) {
        if let DeviceKind::Output(output) = &self.kind {
            let observers;
            let coerced;
            {
                let mut shared = self.shared.lock();
                match output.coerce(shared.value, value) {
                    Some(v) if !fuzzy_eq(shared.value, v) => coerced = v,
                    _ => return,
                }
                shared.value = coerced;
                observers = Self::alive_observers(&shared);
            }
            output.drive(&self.id, coerced);
            for observer in observers {
                observer.source_value_changed(self, coerced);
            }
            return;
        }
        let observers;
        {
            let mut shared = self.shared.lock();
            if fuzzy_eq(shared.value, value) {
                return;
            }
            shared.value = value;
            observers = Self::alive_observers(&shared);
        }
        for observer in observers {
            observer.source_value_changed(self, value);
        }
    }

    /// Set the value without notifying anyone. Used while a timed device is
    /// still invalid during start-up; the value is announced after the
    /// device is marked valid.
    pub(crate) fn seed_value(&self, value: f64) {
        self.shared.lock().value = value;
    }

    /// Fan the current value out unconditionally (start-up announcement).
    pub(crate) fn announce_value(self: &Arc<Self>) {
        let (value, observers) = {
            let shared = self.shared.lock();
            (shared.value, Self::alive_observers(&shared))
        };
        for observer in observers {
            observer.source_value_changed(self, value);
        }
    }

    // ── Inbound notifications ─────────────────────────────────

    fn source_value_changed(self: &Arc<Self>, source: &Arc<Device>, value: f64) {
        match &self.kind {
            DeviceKind::Output(_) => self.set_value(value),
            DeviceKind::Logic(c) => c.core().input_value_changed(self, source, value),
            DeviceKind::Transition(c) => c.core().input_value_changed(self, source, value),
            DeviceKind::Notification(n) => n.input_value_changed(self, source, value),
            DeviceKind::Timer(_) | DeviceKind::Input(_) | DeviceKind::Notifier(_) => {}
        }
    }

    fn source_valid_changed(self: &Arc<Self>, source: &Arc<Device>, valid: bool) {
        match &self.kind {
            DeviceKind::Output(_) => self.set_valid(valid),
            DeviceKind::Logic(c) => c.core().input_valid_changed(self, source, valid),
            DeviceKind::Transition(c) => c.core().input_valid_changed(self, source, valid),
            DeviceKind::Notification(_)
            | DeviceKind::Timer(_)
            | DeviceKind::Input(_)
            | DeviceKind::Notifier(_) => {}
        }
    }

    /// Deliver a system event from the bus.
    pub(crate) fn handle_event(self: &Arc<Self>, event: SystemEvent) {
        match &self.kind {
            DeviceKind::Notification(n) => n.handle_event(self, event),
            DeviceKind::Transition(t) => t.handle_event(self, event),
            _ => {}
        }
    }

    /// Description lines for graph export.
    pub(crate) fn description(&self) -> Vec<String> {
        match &self.kind {
            DeviceKind::Input(i) => i.description(),
            DeviceKind::Output(o) => o.description(),
            DeviceKind::Logic(c) => c.description(),
            DeviceKind::Timer(c) => c.description(),
            DeviceKind::Transition(c) => c.description(),
            DeviceKind::Notification(n) => n.description(),
            DeviceKind::Notifier(n) => n.description(),
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.lock();
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("model", &self.model_id)
            .field("value", &shared.value)
            .field("valid", &shared.valid)
            .finish_non_exhaustive()
    }
}
