//! Graph construction: create, validate, cycle-check, finish.
//!
//! The builder instantiates every declared device, registers it under its
//! unique id, then runs three wiring passes:
//!
//! 1. **Validate** — resolve every referenced id, reject self-references,
//!    enforce producer/consumer reciprocity, single ownership of outputs
//!    and operation arity. A failing device is removed; survivors proceed.
//! 2. **Cycle check** — walk the output edges from every control; a cycle
//!    removes every device on the reported path.
//! 3. **Finish** — establish observer subscriptions along every resolved
//!    edge, claim output ownership, resolve notification endpoints and mark
//!    devices validated. Only after this may any signal be acted upon.
//!
//! No error aborts the build: every problem is logged, recorded in the
//! build report and the remainder of the graph carries on.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info, warn};

use crate::bus::{EventBus, SystemEvent};
use crate::config::{Config, NotifierEntry, OutputEntry};
use crate::device::{Device, DeviceKind};
use crate::error::{Error, WiringError};
use crate::input::{Input, InputKind};
use crate::notify::{LogTransport, Notification, Notifier, NotifierTransport};
use crate::output::{Output, OutputKind, PwmSink, Sink, SwitchSink};
use crate::registry::Registry;
use crate::sched::Scheduler;

/// Fallback application name for notification templates.
const APPLICATION_NAME: &str = "hearth";

// ---------------------------------------------------------------------------
// Platform factories
// ---------------------------------------------------------------------------

/// Provides hardware sinks for declared outputs. A platform binding (GPIO,
/// I²C) implements this; returning `None` leaves the output virtual.
pub trait SinkFactory {
    fn switch_sink(&mut self, _entry: &OutputEntry) -> Option<Box<dyn SwitchSink>> {
        None
    }

    fn pwm_sink(&mut self, _entry: &OutputEntry) -> Option<Box<dyn PwmSink>> {
        None
    }
}

/// No hardware: every output is virtual.
pub struct NoSinks;

impl SinkFactory for NoSinks {}

/// Creates notifier transports from their declared type.
pub trait TransportFactory {
    fn create(&mut self, entry: &NotifierEntry) -> Option<Box<dyn NotifierTransport>>;
}

/// The built-in transport set: `log`.
pub struct DefaultTransports;

impl TransportFactory for DefaultTransports {
    fn create(&mut self, entry: &NotifierEntry) -> Option<Box<dyn NotifierTransport>> {
        match entry.transport.trim().to_lowercase().as_str() {
            "log" => Some(Box::new(LogTransport)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Automation
// ---------------------------------------------------------------------------

/// A built device graph with its scheduler and event bus.
pub struct Automation {
    registry: Arc<Registry>,
    scheduler: Arc<Scheduler>,
    bus: Arc<EventBus>,
    pub(crate) inputs: Vec<Arc<Device>>,
    pub(crate) outputs: Vec<Arc<Device>>,
    pub(crate) controls: Vec<Arc<Device>>,
    pub(crate) notifications: Vec<Arc<Device>>,
    pub(crate) notifiers: Vec<Arc<Device>>,
    errors: Vec<Error>,
    started: AtomicBool,
}

impl Automation {
    /// Build the graph with virtual outputs and the default transports.
    pub fn build(config: &Config) -> Self {
        Self::build_with(config, &mut NoSinks, &mut DefaultTransports)
    }

    /// Build the graph with platform-provided sinks and transports.
    pub fn build_with(
        config: &Config,
        sinks: &mut dyn SinkFactory,
        transports: &mut dyn TransportFactory,
    ) -> Self {
        let mut automation = Self {
            registry: Registry::new(),
            scheduler: Scheduler::new(),
            bus: EventBus::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            controls: Vec::new(),
            notifications: Vec::new(),
            notifiers: Vec::new(),
            errors: Vec::new(),
            started: AtomicBool::new(false),
        };

        automation.create_devices(config, sinks, transports);
        automation.validate_devices();
        automation.check_cycles();
        automation.finish_devices();

        info!(
            "Built graph: {} inputs, {} outputs, {} controls, {} notifications, {} notifiers ({} errors)",
            automation.inputs.len(),
            automation.outputs.len(),
            automation.controls.len(),
            automation.notifications.len(),
            automation.notifiers.len(),
            automation.errors.len()
        );
        automation
    }

    // ── Phase 1: create ───────────────────────────────────────

    fn create_devices(
        &mut self,
        config: &Config,
        sinks: &mut dyn SinkFactory,
        transports: &mut dyn TransportFactory,
    ) {
        let sensor_groups = [
            (InputKind::Switch, &config.sensors.switch),
            (InputKind::Pwm, &config.sensors.pwm),
            (InputKind::Temperature, &config.sensors.temperature),
            (InputKind::Button, &config.sensors.button),
        ];
        for (kind, entries) in sensor_groups {
            for entry in entries.values() {
                match Input::create(kind, entry) {
                    Ok(device) => self.register(device, Category::Input),
                    Err(e) => self.report(e.into()),
                }
            }
        }

        for entry in config.outputs.switch.values() {
            let sink = sinks.switch_sink(entry).map(Sink::Switch);
            match Output::create(OutputKind::Switch, entry, sink) {
                Ok(device) => self.register(device, Category::Output),
                Err(e) => self.report(e.into()),
            }
        }
        for entry in config.outputs.pwm.values() {
            let sink = sinks.pwm_sink(entry).map(Sink::Pwm);
            match Output::create(OutputKind::Pwm, entry, sink) {
                Ok(device) => self.register(device, Category::Output),
                Err(e) => self.report(e.into()),
            }
        }

        for entry in config.controls.logic.values() {
            match crate::control::logic::LogicControl::create(entry) {
                Ok(device) => self.register(device, Category::Control),
                Err(e) => self.report(e.into()),
            }
        }
        for entry in config.controls.timer.values() {
            match crate::control::timer::TimerControl::create(entry) {
                Ok(device) => self.register(device, Category::Control),
                Err(e) => self.report(e.into()),
            }
        }
        for entry in config.controls.transition.values() {
            match crate::control::transition::TransitionControl::create(entry) {
                Ok(device) => self.register(device, Category::Control),
                Err(e) => self.report(e.into()),
            }
        }

        for entry in config.notify.notifiers.values() {
            let Some(transport) = transports.create(entry) else {
                self.report(
                    crate::error::ConfigError::UnknownTransport {
                        device: entry.name.clone(),
                        transport: entry.transport.clone(),
                    }
                    .into(),
                );
                continue;
            };
            match Notifier::create(entry, transport) {
                Ok(device) => self.register(device, Category::Notifier),
                Err(e) => self.report(e.into()),
            }
        }

        let application_name =
            config.application_name.clone().unwrap_or_else(|| APPLICATION_NAME.to_owned());
        for entry in config.notify.notifications.values() {
            match Notification::create(entry, &application_name) {
                Ok(device) => self.register(device, Category::Notification),
                Err(e) => self.report(e.into()),
            }
        }
    }

    fn register(&mut self, device: Arc<Device>, category: Category) {
        if let Err(e) = self.registry.insert(Arc::clone(&device)) {
            self.report(e.into());
            return;
        }
        match category {
            Category::Input => self.inputs.push(device),
            Category::Output => self.outputs.push(device),
            Category::Control => self.controls.push(device),
            Category::Notification => self.notifications.push(device),
            Category::Notifier => self.notifiers.push(device),
        }
    }

    fn report(&mut self, error: Error) {
        error!("{error}");
        self.errors.push(error);
    }

    // ── Phase 2: validate ─────────────────────────────────────

    fn validate_devices(&mut self) {
        let mut rejected = Vec::new();
        for control in &self.controls {
            if let Err(e) = validate_control(&self.registry, control) {
                rejected.push((control.id().to_owned(), e));
            }
        }
        for notification in &self.notifications {
            if let Err(e) = validate_notification(&self.registry, notification) {
                rejected.push((notification.id().to_owned(), e));
            }
        }
        for (id, error) in rejected {
            error!("Failed to complete device '{id}' - removing");
            self.remove_device(&id);
            self.errors.push(error);
        }
    }

    // ── Phase 3: cycle check ──────────────────────────────────

    fn check_cycles(&mut self) {
        let mut removed: HashSet<String> = HashSet::new();
        for control in self.controls.clone() {
            if removed.contains(control.id()) {
                continue;
            }
            let mut path = Vec::new();
            let mut visited = HashSet::new();
            if let Some(cycle) = find_cycle(&control, control.id(), &mut path, &mut visited) {
                self.report(WiringError::Cycle(cycle.clone()).into());
                for id in cycle {
                    if removed.insert(id.clone()) {
                        self.remove_device(&id);
                    }
                }
            }
        }
    }

    // ── Phase 4: finish ───────────────────────────────────────

    fn finish_devices(&mut self) {
        let mut rejected = Vec::new();
        for control in &self.controls {
            if let Err(e) = finish_control(control) {
                rejected.push((control.id().to_owned(), e));
            }
        }
        for (id, error) in rejected {
            error!("Failed to finish device '{id}' - removing");
            self.remove_device(&id);
            self.errors.push(error);
        }

        for notification in &self.notifications {
            finish_notification(&self.registry, &self.bus, notification);
        }

        // transitions follow system time changes via the bus
        for control in &self.controls {
            if matches!(control.kind(), DeviceKind::Transition(_)) {
                self.bus.subscribe(control);
            }
        }
    }

    fn remove_device(&mut self, id: &str) {
        if let Some(device) = self.registry.remove(id) {
            // give back any claimed outputs so survivors could reuse them
            if let Some(core) = device.control_core() {
                let mut st = core.lock();
                for owned in st.owned_outputs.drain(..) {
                    if let DeviceKind::Output(output) = owned.kind() {
                        output.release();
                    }
                }
            }
        }
        self.inputs.retain(|d| d.id() != id);
        self.outputs.retain(|d| d.id() != id);
        self.controls.retain(|d| d.id() != id);
        self.notifications.retain(|d| d.id() != id);
        self.notifiers.retain(|d| d.id() != id);
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Start timed devices and announce the start event. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        // transitions need their scheduler before any timer fans out
        for control in &self.controls {
            if let DeviceKind::Transition(transition) = control.kind() {
                transition.attach(&self.scheduler);
            }
        }
        for control in &self.controls {
            if let DeviceKind::Timer(timer) = control.kind() {
                timer.start(control, &self.scheduler);
            }
        }
        self.bus.post(SystemEvent::Start);
    }

    /// Deterministic shutdown: announce stop, cancel every timer and
    /// animation, drain the bus, stop the scheduler.
    pub fn stop(&self) {
        self.bus.post(SystemEvent::Stop);
        for control in &self.controls {
            match control.kind() {
                DeviceKind::Timer(timer) => timer.stop(),
                DeviceKind::Transition(transition) => transition.stop(),
                _ => {}
            }
        }
        self.bus.shutdown();
        self.scheduler.shutdown();
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn device(&self, id: &str) -> Option<Arc<Device>> {
        self.registry.get(id)
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Per-device problems recorded during the build.
    pub fn build_errors(&self) -> &[Error] {
        &self.errors
    }

    /// Serialize the built graph as DOT.
    pub fn dot_graph(&self) -> String {
        crate::graph::export(self)
    }
}

impl Drop for Automation {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Category {
    Input,
    Output,
    Control,
    Notification,
    Notifier,
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn validate_control(registry: &Registry, device: &Arc<Device>) -> Result<(), Error> {
    let core = device.control_core().expect("control device");
    let id = device.id();

    {
        let mut st = core.lock();

        for input_id in core.input_ids() {
            if input_id == id {
                return Err(WiringError::SelfReference(id.to_owned()).into());
            }
            let input = registry.get(input_id).ok_or_else(|| WiringError::UnknownDevice {
                device: id.to_owned(),
                referenced: input_id.clone(),
            })?;
            match input.kind() {
                DeviceKind::Input(_) => {}
                DeviceKind::Logic(_) | DeviceKind::Timer(_) | DeviceKind::Transition(_) => {
                    // a control named as input must expect us as an output
                    let peer = input.control_core().expect("control device");
                    if !peer.is_known_output(id) {
                        return Err(WiringError::NotReciprocal {
                            device: id.to_owned(),
                            peer: input_id.clone(),
                        }
                        .into());
                    }
                }
                _ => {
                    return Err(WiringError::BadRole {
                        device: id.to_owned(),
                        referenced: input_id.clone(),
                        expected: "an input",
                    }
                    .into());
                }
            }
            st.inputs.insert(input_id.clone(), Arc::downgrade(&input));
        }

        for output_id in core.output_ids() {
            if output_id == id {
                return Err(WiringError::SelfReference(id.to_owned()).into());
            }
            let output = registry.get(output_id).ok_or_else(|| WiringError::UnknownDevice {
                device: id.to_owned(),
                referenced: output_id.clone(),
            })?;
            match output.kind() {
                DeviceKind::Output(o) => {
                    if let Some(owner) = o.owner() {
                        return Err(WiringError::OutputOwned {
                            output: output_id.clone(),
                            owner,
                            claimant: id.to_owned(),
                        }
                        .into());
                    }
                }
                DeviceKind::Logic(_) | DeviceKind::Timer(_) | DeviceKind::Transition(_) => {
                    // a control named as output must expect us as an input
                    // (timers expect none, so they can never be a consumer)
                    let peer = output.control_core().expect("control device");
                    if !peer.is_known_input(id) {
                        return Err(WiringError::NotReciprocal {
                            device: id.to_owned(),
                            peer: output_id.clone(),
                        }
                        .into());
                    }
                }
                DeviceKind::Notification(n) => {
                    if !n.is_known_input(id) {
                        return Err(WiringError::NotReciprocal {
                            device: id.to_owned(),
                            peer: output_id.clone(),
                        }
                        .into());
                    }
                }
                _ => {
                    return Err(WiringError::BadRole {
                        device: id.to_owned(),
                        referenced: output_id.clone(),
                        expected: "an output",
                    }
                    .into());
                }
            }
            st.outputs.insert(output_id.clone(), Arc::downgrade(&output));
        }
    }

    // every control must drive something
    if core.output_ids().is_empty() {
        return Err(WiringError::NoOutputs(id.to_owned()).into());
    }

    match device.kind() {
        DeviceKind::Logic(logic) => logic.validate(id)?,
        DeviceKind::Timer(_) => {
            if !core.input_ids().is_empty() {
                return Err(WiringError::InputsNotAllowed(id.to_owned()).into());
            }
        }
        DeviceKind::Transition(_) => {
            if core.input_ids().len() != 1 {
                return Err(WiringError::WrongArity {
                    device: id.to_owned(),
                    need: "exactly 1",
                    got: core.input_ids().len(),
                }
                .into());
            }
        }
        _ => {}
    }
    Ok(())
}

fn validate_notification(registry: &Registry, device: &Arc<Device>) -> Result<(), Error> {
    let DeviceKind::Notification(notification) = device.kind() else {
        return Ok(());
    };
    if let Some(input_id) = notification.input_id() {
        let input = registry.get(input_id).ok_or_else(|| WiringError::UnknownDevice {
            device: device.id().to_owned(),
            referenced: input_id.to_owned(),
        })?;
        match input.kind() {
            DeviceKind::Input(_)
            | DeviceKind::Logic(_)
            | DeviceKind::Timer(_)
            | DeviceKind::Transition(_) => {}
            _ => {
                return Err(WiringError::BadRole {
                    device: device.id().to_owned(),
                    referenced: input_id.to_owned(),
                    expected: "an input",
                }
                .into());
            }
        }
    }
    Ok(())
}

/// Depth-first search along output edges looking for `target`. Returns the
/// id path of the cycle when found.
fn find_cycle(
    device: &Arc<Device>,
    target: &str,
    path: &mut Vec<String>,
    visited: &mut HashSet<String>,
) -> Option<Vec<String>> {
    if !visited.insert(device.id().to_owned()) {
        return None;
    }
    path.push(device.id().to_owned());

    let outputs: Vec<(String, Option<Arc<Device>>)> = {
        let core = device.control_core()?;
        let st = core.lock();
        st.outputs.iter().map(|(id, weak)| (id.clone(), weak.upgrade())).collect()
    };

    for (output_id, output) in outputs {
        if output_id == target {
            let mut cycle = path.clone();
            cycle.push(output_id);
            return Some(cycle);
        }
        if let Some(output) = output {
            if output.control_core().is_some() {
                if let Some(cycle) = find_cycle(&output, target, path, visited) {
                    return Some(cycle);
                }
            }
        }
    }

    path.pop();
    None
}

// ---------------------------------------------------------------------------
// Finish helpers
// ---------------------------------------------------------------------------

fn finish_control(device: &Arc<Device>) -> Result<(), Error> {
    let core = device.control_core().expect("control device");
    let mut st = core.lock();

    let outputs: Vec<(String, Option<Arc<Device>>)> =
        st.outputs.iter().map(|(id, weak)| (id.clone(), weak.upgrade())).collect();
    for (output_id, output) in outputs {
        let Some(output) = output else {
            return Err(WiringError::UnknownDevice {
                device: device.id().to_owned(),
                referenced: output_id,
            }
            .into());
        };
        match output.kind() {
            DeviceKind::Output(o) => {
                o.claim(&output_id, device.id())?;
                st.owned_outputs.push(Arc::clone(&output));
                device.subscribe(&output);
            }
            DeviceKind::Logic(_) | DeviceKind::Timer(_) | DeviceKind::Transition(_) => {
                device.subscribe(&output);
            }
            // notifications subscribe themselves during their own finish
            DeviceKind::Notification(_) => {}
            _ => {}
        }
    }

    let inputs: Vec<(String, Option<Arc<Device>>)> =
        st.inputs.iter().map(|(id, weak)| (id.clone(), weak.upgrade())).collect();
    for (input_id, input) in inputs {
        let Some(input) = input else {
            return Err(WiringError::UnknownDevice {
                device: device.id().to_owned(),
                referenced: input_id,
            }
            .into());
        };
        input.subscribe(device);
        st.input_valids.insert(input_id, false);
    }
    drop(st);

    device.mark_validated();
    info!("{}: Ready", device.id());
    Ok(())
}

fn finish_notification(registry: &Registry, bus: &Arc<EventBus>, device: &Arc<Device>) {
    let DeviceKind::Notification(notification) = device.kind() else {
        return;
    };

    let mut notifier_links = Vec::new();
    for notifier_id in notification.notifier_ids() {
        match registry.get(notifier_id) {
            Some(notifier) if matches!(notifier.kind(), DeviceKind::Notifier(_)) => {
                notifier_links.push(Arc::downgrade(&notifier));
            }
            _ => {
                error!("Notification '{}' failed to find notifier '{notifier_id}'", device.id());
            }
        }
    }

    let mut reference_links = Vec::new();
    for reference_id in notification.reference_ids() {
        match registry.get(reference_id) {
            Some(reference) => reference_links.push(Arc::downgrade(&reference)),
            None => {
                warn!("Notification '{}' reference '{reference_id}' not found", device.id());
            }
        }
    }
    notification.set_links(notifier_links, reference_links);

    if let Some(input_id) = notification.input_id() {
        if let Some(input) = registry.get(input_id) {
            input.subscribe(device);
        }
    } else {
        // system notifications listen on the process bus
        bus.subscribe(device);
    }

    device.mark_validated();
    device.set_valid(true);
}
