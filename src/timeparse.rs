//! Time string parsing.
//!
//! Timer and transition entries specify times as `MM`, `HH:MM` or
//! `DD:HH:MM`, optionally suffixed with `.SS` for seconds. Seconds and
//! minutes run 0–59, hours 0–23 and days 0–365 (weekly timers restrict the
//! day further, see the timer control).

use crate::error::ConfigError;

/// A parsed time string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpec {
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

impl TimeSpec {
    /// Total duration in whole seconds.
    pub fn total_secs(&self) -> u64 {
        u64::from(self.seconds)
            + u64::from(self.minutes) * 60
            + u64::from(self.hours) * 60 * 60
            + u64::from(self.days) * 24 * 60 * 60
    }

    /// Total duration in milliseconds.
    pub fn total_ms(&self) -> u64 {
        self.total_secs() * 1000
    }
}

fn component(raw: &str, max: u32, original: &str) -> Result<u32, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0);
    }
    let value: u32 = raw
        .parse()
        .map_err(|_| ConfigError::InvalidTime(original.to_owned()))?;
    if value > max {
        return Err(ConfigError::InvalidTime(original.to_owned()));
    }
    Ok(value)
}

/// Parse `MM`, `HH:MM` or `DD:HH:MM` with an optional trailing `.SS`.
pub fn parse_time_string(time: &str) -> Result<TimeSpec, ConfigError> {
    // take seconds off the end if present
    let (body, tail) = match time.split_once('.') {
        Some((body, tail)) => (body, Some(tail)),
        None => (time, None),
    };

    let seconds = match tail {
        Some(raw) if !raw.trim().is_empty() => component(raw, 59, time)?,
        _ => 0,
    };

    let fields: Vec<&str> = body.split(':').collect();
    if fields.len() > 3 {
        return Err(ConfigError::InvalidTime(time.to_owned()));
    }

    let days = if fields.len() == 3 { component(fields[0], 365, time)? } else { 0 };
    let hours = if fields.len() > 1 { component(fields[fields.len() - 2], 23, time)? } else { 0 };
    let minutes = component(fields[fields.len() - 1], 59, time)?;

    Ok(TimeSpec { days, hours, minutes, seconds })
}

/// Human-readable rendering of a duration, `hh:mm.ss` with an optional day
/// prefix. Used in graph export labels.
pub fn duration_to_string(days: u32, total_secs: u64) -> String {
    let within_day = total_secs % (24 * 60 * 60);
    let hours = within_day / 3600;
    let minutes = (within_day % 3600) / 60;
    let seconds = within_day % 60;
    if days > 0 {
        format!("{days}days {hours:02}:{minutes:02}.{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}.{seconds:02}")
    }
}
