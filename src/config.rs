//! Declarative configuration model.
//!
//! The document is a nested mapping with top-level keys `sensors`,
//! `outputs`, `controls` and `notify`. Every device entry carries a `name`
//! that becomes its unique id, plus optional `username` and
//! `userdescription` display strings. Input and output references are
//! written as lists of device ids (a bare string is accepted for a single
//! reference).
//!
//! ```json
//! {
//!   "sensors":  { "switch": { "hall": { "name": "hall" } } },
//!   "outputs":  { "switch": { "lamp": { "name": "lamp" } } },
//!   "controls": {
//!     "logic": { "follow": { "name": "follow", "operation": "passthrough",
//!                            "inputs": "hall", "outputs": "lamp" } }
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Application name interpolated into notification templates.
    #[serde(default, rename = "applicationname")]
    pub application_name: Option<String>,
    #[serde(default)]
    pub sensors: SensorsConfig,
    #[serde(default)]
    pub outputs: OutputsConfig,
    #[serde(default)]
    pub controls: ControlsConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Config {
    /// Parse a configuration document from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Document(e.to_string()))
    }

    /// Parse a configuration document from a reader.
    pub fn from_reader(reader: impl std::io::Read) -> Result<Self, ConfigError> {
        serde_json::from_reader(reader).map_err(|e| ConfigError::Document(e.to_string()))
    }
}

/// Declared input devices, grouped by kind.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SensorsConfig {
    #[serde(default)]
    pub switch: BTreeMap<String, InputEntry>,
    #[serde(default)]
    pub pwm: BTreeMap<String, InputEntry>,
    #[serde(default)]
    pub temperature: BTreeMap<String, InputEntry>,
    #[serde(default)]
    pub button: BTreeMap<String, InputEntry>,
}

/// Declared output devices, grouped by kind.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputsConfig {
    #[serde(default)]
    pub switch: BTreeMap<String, OutputEntry>,
    #[serde(default)]
    pub pwm: BTreeMap<String, OutputEntry>,
}

/// Declared controls, grouped by kind.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlsConfig {
    #[serde(default)]
    pub logic: BTreeMap<String, LogicEntry>,
    #[serde(default)]
    pub timer: BTreeMap<String, TimerEntry>,
    #[serde(default)]
    pub transition: BTreeMap<String, TransitionEntry>,
}

/// The notification subsystem: dispatch endpoints and the notifications
/// bound to them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub notifiers: BTreeMap<String, NotifierEntry>,
    #[serde(default)]
    pub notifications: BTreeMap<String, NotificationEntry>,
}

// ---------------------------------------------------------------------------
// Device entries
// ---------------------------------------------------------------------------

/// A sensor/input declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct InputEntry {
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub userdescription: Option<String>,
    /// Value assumed while the input is invalid.
    #[serde(default)]
    pub default: Option<f64>,
    /// Operating range, used for out-of-range tracking.
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// An output declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputEntry {
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub userdescription: Option<String>,
    #[serde(default)]
    pub default: Option<f64>,
    /// PWM quantisation steps; ignored for switches and hardware channels
    /// with a fixed native resolution.
    #[serde(default)]
    pub resolution: Option<u32>,
}

/// A logic control declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct LogicEntry {
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub userdescription: Option<String>,
    pub operation: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub inputs: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub outputs: Vec<String>,
    /// Comparison right-hand side or running reset device.
    #[serde(default)]
    pub references: Option<String>,
    /// Sampling device for RunningAverage.
    #[serde(default)]
    pub triggers: Option<String>,
    /// Bounded window for RunningAverage; 0 or absent means unbounded.
    #[serde(default)]
    pub window: Option<usize>,
    #[serde(default)]
    pub default: Option<f64>,
}

/// A timer control declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct TimerEntry {
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub userdescription: Option<String>,
    #[serde(rename = "type")]
    pub timer_type: String,
    pub start: String,
    pub duration: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub outputs: Vec<String>,
}

/// A transition control declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct TransitionEntry {
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub userdescription: Option<String>,
    pub curve: String,
    pub duration: String,
    /// Forced start state, 0 or 1.
    #[serde(default)]
    pub default: Option<f64>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub inputs: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub outputs: Vec<String>,
}

/// A notifier (dispatch endpoint) declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifierEntry {
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub userdescription: Option<String>,
    /// Transport type, e.g. `log`.
    #[serde(rename = "type")]
    pub transport: String,
}

/// A notification declaration — `system` listens for named process events,
/// `trigger` watches one input device for 0↔1 edges.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationEntry {
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub userdescription: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    /// Event names (system) or the watched device id (trigger).
    #[serde(default, deserialize_with = "one_or_many")]
    pub inputs: Vec<String>,
    /// Notifier ids to dispatch to.
    #[serde(default, deserialize_with = "one_or_many")]
    pub outputs: Vec<String>,
    pub message: MessageEntry,
    /// Fire on the falling edge instead of the rising edge.
    #[serde(default, deserialize_with = "yes_or_bool")]
    pub triggerlow: bool,
    /// Devices whose live values are interpolated into the message.
    #[serde(default, deserialize_with = "one_or_many")]
    pub references: Vec<String>,
}

/// Notification message templates; the title is optional.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageEntry {
    #[serde(default)]
    pub title: Option<String>,
    pub body: String,
}

// ---------------------------------------------------------------------------
// Deserialization helpers
// ---------------------------------------------------------------------------

/// Accept `"id"` or `["id", "id2"]`.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(id) => vec![id],
        OneOrMany::Many(ids) => ids,
    })
}

/// Accept `true`/`false` or the legacy `"yes"`/`"no"` strings.
fn yes_or_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => matches!(s.trim().to_lowercase().as_str(), "yes" | "true" | "1"),
    })
}
