//! Unified error types for the automation runtime.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! builder's error handling uniform. Configuration and wiring problems are
//! reported per device and never abort the whole build; transient runtime
//! failures are not errors at all — they surface as `valid = false` on the
//! affected device and cascade downstream as default-valued invalidity.

use std::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the runtime funnels into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A device entry could not be parsed from configuration.
    Config(ConfigError),
    /// A device could not be wired into the graph.
    Wiring(WiringError),
    /// An output sink rejected a write.
    Sink(String),
    /// The scheduler or event bus is gone; fatal for the process.
    Shutdown(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Wiring(e) => write!(f, "wiring: {e}"),
            Self::Sink(msg) => write!(f, "sink: {msg}"),
            Self::Shutdown(msg) => write!(f, "shutdown: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// A malformed device entry. The offending device is skipped and the build
/// continues with the remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration document itself failed to deserialize.
    Document(String),
    /// A required field is missing.
    MissingField { device: String, field: &'static str },
    /// A time string failed to parse.
    InvalidTime(String),
    /// A numeric value is outside its permitted range.
    OutOfRange { device: String, what: &'static str },
    /// Unknown logic operation name.
    UnknownOperation { device: String, operation: String },
    /// Unknown timer type name.
    UnknownTimerType { device: String, timer_type: String },
    /// Unknown easing curve name.
    UnknownCurve { device: String, curve: String },
    /// Unknown system event name.
    UnknownEvent { device: String, event: String },
    /// Unknown notifier transport type.
    UnknownTransport { device: String, transport: String },
    /// Unknown notification variant (not `system` or `trigger`).
    UnknownNotificationKind { device: String, kind: String },
    /// A device entry has an empty name.
    EmptyName,
    /// Two device entries share a unique id.
    DuplicateId(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Document(msg) => write!(f, "invalid document: {msg}"),
            Self::MissingField { device, field } => {
                write!(f, "'{device}' is missing required field '{field}'")
            }
            Self::InvalidTime(time) => write!(f, "cannot parse time from '{time}'"),
            Self::OutOfRange { device, what } => write!(f, "'{device}' has out-of-range {what}"),
            Self::UnknownOperation { device, operation } => {
                write!(f, "unrecognised operation '{operation}' for '{device}'")
            }
            Self::UnknownTimerType { device, timer_type } => {
                write!(f, "unknown timer type '{timer_type}' for '{device}'")
            }
            Self::UnknownCurve { device, curve } => {
                write!(f, "unknown transition curve '{curve}' for '{device}'")
            }
            Self::UnknownEvent { device, event } => {
                write!(f, "unknown system event '{event}' for '{device}'")
            }
            Self::UnknownTransport { device, transport } => {
                write!(f, "unknown notifier type '{transport}' for '{device}'")
            }
            Self::UnknownNotificationKind { device, kind } => {
                write!(f, "unknown notification type '{kind}' for '{device}'")
            }
            Self::EmptyName => write!(f, "device entry with empty name"),
            Self::DuplicateId(id) => write!(f, "duplicate unique id '{id}'"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Wiring errors
// ---------------------------------------------------------------------------

/// A device that parsed cleanly but cannot be connected. The device is
/// removed from the registry; surviving devices proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WiringError {
    /// A referenced id does not exist in the registry.
    UnknownDevice { device: String, referenced: String },
    /// A device lists itself as an input or output.
    SelfReference(String),
    /// A control named as input does not list this device as an output, or
    /// vice versa.
    NotReciprocal { device: String, peer: String },
    /// The referenced device cannot play the requested role (e.g. an input
    /// device used as an output).
    BadRole { device: String, referenced: String, expected: &'static str },
    /// An output already has an owner.
    OutputOwned { output: String, owner: String, claimant: String },
    /// The number of resolved inputs does not match the operation.
    WrongArity { device: String, need: &'static str, got: usize },
    /// The device has no outputs.
    NoOutputs(String),
    /// Timers cannot have inputs.
    InputsNotAllowed(String),
    /// A cycle through the output edges, reported as the id path.
    Cycle(Vec<String>),
}

impl fmt::Display for WiringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownDevice { device, referenced } => {
                write!(f, "failed to find '{referenced}' for '{device}'")
            }
            Self::SelfReference(id) => write!(f, "'{id}' cannot reference itself"),
            Self::NotReciprocal { device, peer } => {
                write!(f, "'{peer}' does not recognise '{device}'")
            }
            Self::BadRole { device, referenced, expected } => {
                write!(f, "'{referenced}' cannot act as {expected} for '{device}'")
            }
            Self::OutputOwned { output, owner, claimant } => {
                write!(f, "output '{output}' (for '{claimant}') already owned by '{owner}'")
            }
            Self::WrongArity { device, need, got } => {
                write!(f, "'{device}' has {got} inputs (needs {need})")
            }
            Self::NoOutputs(id) => write!(f, "'{id}' needs at least one output"),
            Self::InputsNotAllowed(id) => write!(f, "'{id}' cannot have inputs"),
            Self::Cycle(path) => write!(f, "circular reference found: {}", path.join("->")),
        }
    }
}

impl From<WiringError> for Error {
    fn from(e: WiringError) -> Self {
        Self::Wiring(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, Error>;
