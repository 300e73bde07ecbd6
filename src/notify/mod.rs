//! Notification subsystem: observe events and edges, format messages,
//! dispatch to notifiers.
//!
//! Two notification variants share the template machinery: *system*
//! notifications listen for named process events on the bus, *trigger*
//! notifications watch one input device for 0↔1 edges. Notifiers are the
//! dispatch endpoints; their transports sit behind [`NotifierTransport`]
//! and no formatting or delivery error is ever allowed to escape into the
//! graph — one faulty notifier must not halt propagation.

pub mod template;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use log::{error, info, warn};
use parking_lot::Mutex;

use crate::bus::SystemEvent;
use crate::config::{NotificationEntry, NotifierEntry};
use crate::device::{Device, DeviceKind};
use crate::error::{ConfigError, Result};

// ---------------------------------------------------------------------------
// Notifiers
// ---------------------------------------------------------------------------

/// A dispatch endpoint. Implementations wrap an external transport (log
/// line, IM gateway, webhook, ...) — all outside the engine's scope.
pub trait NotifierTransport: Send + Sync {
    /// Human-readable description for the graph export.
    fn describe(&self) -> String;
    /// Deliver a formatted message as a key-value map.
    fn deliver(&self, message: &BTreeMap<String, String>) -> Result<()>;
}

/// Transport that writes notifications to the log.
pub struct LogTransport;

impl NotifierTransport for LogTransport {
    fn describe(&self) -> String {
        "Log notifier".to_owned()
    }

    fn deliver(&self, message: &BTreeMap<String, String>) -> Result<()> {
        let title = message.get(template::MESSAGE_TITLE).map_or("", String::as_str);
        let body = message.get(template::MESSAGE_BODY).map_or("", String::as_str);
        info!("notification: {title}: {body}");
        Ok(())
    }
}

/// Transport that records messages in memory; used by tests and the
/// service layer's self-checks.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    messages: Arc<Mutex<Vec<BTreeMap<String, String>>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<BTreeMap<String, String>> {
        self.messages.lock().clone()
    }
}

impl NotifierTransport for MemoryTransport {
    fn describe(&self) -> String {
        "Memory notifier".to_owned()
    }

    fn deliver(&self, message: &BTreeMap<String, String>) -> Result<()> {
        self.messages.lock().push(message.clone());
        Ok(())
    }
}

/// Payload for [`DeviceKind::Notifier`].
pub struct Notifier {
    transport: Box<dyn NotifierTransport>,
}

impl Notifier {
    pub(crate) fn create(
        entry: &NotifierEntry,
        transport: Box<dyn NotifierTransport>,
    ) -> std::result::Result<Arc<Device>, ConfigError> {
        if entry.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        Ok(Device::new(
            entry.name.trim().to_owned(),
            "Notifier",
            entry.username.clone(),
            entry.userdescription.clone(),
            0.0,
            DeviceKind::Notifier(Self { transport }),
        ))
    }

    /// Deliver, swallowing transport errors.
    pub(crate) fn deliver(&self, id: &str, message: &BTreeMap<String, String>) {
        if let Err(e) = self.transport.deliver(message) {
            error!("notifier '{id}' failed to deliver: {e}");
        }
    }

    pub(crate) fn description(&self) -> Vec<String> {
        vec![self.transport.describe()]
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Variant-specific behaviour of a notification.
pub enum NotificationKind {
    /// Fires when one of the subscribed process events arrives.
    System { events: Vec<SystemEvent> },
    /// Fires on a 0↔1 edge of the watched input device.
    Trigger {
        input_id: String,
        /// true fires on the rising edge, false on the falling edge.
        trigger_high: bool,
        reference_ids: Vec<String>,
        last_value: Mutex<f64>,
    },
}

/// Resolved graph links, filled during the finish phase.
#[derive(Default)]
struct Links {
    notifiers: Vec<Weak<Device>>,
    references: Vec<Weak<Device>>,
}

/// Payload for [`DeviceKind::Notification`].
pub struct Notification {
    notifier_ids: Vec<String>,
    title: String,
    body: String,
    application_name: String,
    kind: NotificationKind,
    links: Mutex<Links>,
}

impl Notification {
    pub(crate) fn create(
        entry: &NotificationEntry,
        application_name: &str,
    ) -> std::result::Result<Arc<Device>, ConfigError> {
        let name = entry.name.trim();
        if name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if entry.outputs.is_empty() {
            return Err(ConfigError::MissingField { device: name.to_owned(), field: "outputs" });
        }
        if entry.message.body.is_empty() {
            return Err(ConfigError::MissingField { device: name.to_owned(), field: "message" });
        }

        let kind = match entry.kind.trim().to_lowercase().as_str() {
            "system" => {
                let mut events = Vec::new();
                for raw in &entry.inputs {
                    let event = SystemEvent::from_name(raw).ok_or_else(|| ConfigError::UnknownEvent {
                        device: name.to_owned(),
                        event: raw.clone(),
                    })?;
                    if !events.contains(&event) {
                        events.push(event);
                    }
                }
                if events.is_empty() {
                    return Err(ConfigError::MissingField { device: name.to_owned(), field: "inputs" });
                }
                NotificationKind::System { events }
            }
            "trigger" => {
                let input_id = entry
                    .inputs
                    .first()
                    .map(|s| s.trim().to_owned())
                    .filter(|s| !s.is_empty())
                    .ok_or(ConfigError::MissingField { device: name.to_owned(), field: "inputs" })?;
                NotificationKind::Trigger {
                    input_id,
                    trigger_high: !entry.triggerlow,
                    reference_ids: entry.references.clone(),
                    // for a falling-edge trigger assume the input starts high
                    last_value: Mutex::new(if entry.triggerlow { 1.0 } else { 0.0 }),
                }
            }
            other => {
                return Err(ConfigError::UnknownNotificationKind {
                    device: name.to_owned(),
                    kind: other.to_owned(),
                });
            }
        };

        Ok(Device::new(
            name.to_owned(),
            "Notification",
            entry.username.clone(),
            entry.userdescription.clone(),
            0.0,
            DeviceKind::Notification(Self {
                notifier_ids: entry.outputs.clone(),
                title: entry.message.title.clone().unwrap_or_default(),
                body: entry.message.body.clone(),
                application_name: application_name.to_owned(),
                kind,
                links: Mutex::new(Links::default()),
            }),
        ))
    }

    pub fn notification_kind(&self) -> &NotificationKind {
        &self.kind
    }

    pub fn notifier_ids(&self) -> &[String] {
        &self.notifier_ids
    }

    /// The watched device id of a trigger notification.
    pub fn input_id(&self) -> Option<&str> {
        match &self.kind {
            NotificationKind::Trigger { input_id, .. } => Some(input_id),
            NotificationKind::System { .. } => None,
        }
    }

    pub fn reference_ids(&self) -> &[String] {
        match &self.kind {
            NotificationKind::Trigger { reference_ids, .. } => reference_ids,
            NotificationKind::System { .. } => &[],
        }
    }

    pub(crate) fn is_known_input(&self, id: &str) -> bool {
        self.input_id() == Some(id)
    }

    /// Store resolved notifier and reference links (finish phase).
    pub(crate) fn set_links(&self, notifiers: Vec<Weak<Device>>, references: Vec<Weak<Device>>) {
        let mut links = self.links.lock();
        links.notifiers = notifiers;
        links.references = references;
    }

    // ── Firing ────────────────────────────────────────────────

    /// Edge detection on the watched input. Only the edge fires; hold time
    /// is irrelevant, and the opposite edge is silent.
    pub(crate) fn input_value_changed(&self, owner: &Arc<Device>, source: &Arc<Device>, value: f64) {
        let NotificationKind::Trigger { input_id, trigger_high, last_value, .. } = &self.kind
        else {
            return;
        };
        if source.id() != input_id {
            warn!("notification '{}' signalled from unknown input", owner.id());
            return;
        }

        let mut last = last_value.lock();
        let rising = value > 0.0 && *last <= 0.0;
        let falling = value <= 0.0 && *last > 0.0;
        let fire = (rising && *trigger_high) || (falling && !*trigger_high);
        *last = value;
        drop(last);

        if fire {
            let mut custom = HashMap::new();
            custom.insert("inputname".to_owned(), input_id.clone());
            custom.insert("name".to_owned(), owner.display_name().to_owned());
            for reference in self.links.lock().references.iter().filter_map(Weak::upgrade) {
                custom.insert(reference.id().to_owned(), format!("{}", reference.get_value()));
            }
            self.dispatch(custom);
        }
    }

    /// System events from the bus.
    pub(crate) fn handle_event(&self, _owner: &Arc<Device>, event: SystemEvent) {
        let NotificationKind::System { events } = &self.kind else {
            return;
        };
        if events.contains(&event) {
            let mut custom = HashMap::new();
            custom.insert("event".to_owned(), event.name().to_owned());
            self.dispatch(custom);
        }
    }

    fn dispatch(&self, custom: HashMap<String, String>) {
        let message = template::render(&self.application_name, &self.title, &self.body, &custom);
        for notifier in self.links.lock().notifiers.iter().filter_map(Weak::upgrade) {
            if let DeviceKind::Notifier(n) = notifier.kind() {
                n.deliver(notifier.id(), &message);
            }
        }
    }

    pub(crate) fn description(&self) -> Vec<String> {
        match &self.kind {
            NotificationKind::System { events } => {
                let mut lines = vec!["System event".to_owned()];
                lines.extend(events.iter().map(|e| e.name().to_owned()));
                lines
            }
            NotificationKind::Trigger { trigger_high: true, .. } => vec!["Trigger 0 to 1".to_owned()],
            NotificationKind::Trigger { .. } => vec!["Trigger 1 to 0".to_owned()],
        }
    }
}
