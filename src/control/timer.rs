//! Timer controls: periodic boolean outputs derived from the wall clock.
//!
//! Regular timers (Minutely/Hourly/Daily/Weekly) compute, at every firing,
//! the time since the start of the current period, derive the current
//! on/off state and the delay to the next transition, then re-arm a
//! single-shot. This is self-clocking: each firing resynchronises against
//! the wall clock, so drift never accumulates. The delay is shortened by
//! 10 % to hone in with sub-second accuracy and clamped to one hour so a
//! system-time jump is picked up within the hour.
//!
//! Custom timers have no calendar period: the output simply toggles, off
//! for the `start` interval and on for `duration`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Local, Timelike};
use log::info;
use parking_lot::Mutex;

use super::ControlCore;
use crate::config::TimerEntry;
use crate::device::{Device, DeviceKind};
use crate::error::ConfigError;
use crate::sched::{Scheduler, TimerHandle};
use crate::timeparse::{duration_to_string, parse_time_string};

const MSECS_IN_MINUTE: u64 = 60 * 1000;
const MSECS_IN_HOUR: u64 = MSECS_IN_MINUTE * 60;
const MSECS_IN_DAY: u64 = MSECS_IN_HOUR * 24;
const MSECS_IN_WEEK: u64 = MSECS_IN_DAY * 7;

/// Calendar base of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Custom,
    Minutely,
    Hourly,
    Daily,
    Weekly,
}

impl TimerKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name.trim().to_uppercase().as_str() {
            "CUSTOM" => Self::Custom,
            "MINUTELY" => Self::Minutely,
            "HOURLY" => Self::Hourly,
            "DAILY" => Self::Daily,
            "WEEKLY" => Self::Weekly,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Custom => "Custom",
            Self::Minutely => "Minutely",
            Self::Hourly => "Hourly",
            Self::Daily => "Daily",
            Self::Weekly => "Weekly",
        }
    }

    /// Period length; Custom has no inherent period.
    fn period_ms(self) -> u64 {
        match self {
            Self::Custom => 0,
            Self::Minutely => MSECS_IN_MINUTE,
            Self::Hourly => MSECS_IN_HOUR,
            Self::Daily => MSECS_IN_DAY,
            Self::Weekly => MSECS_IN_WEEK,
        }
    }
}

/// Payload for [`DeviceKind::Timer`].
pub struct TimerControl {
    core: ControlCore,
    kind: TimerKind,
    /// Offset of the on phase from the period start (for Weekly this
    /// includes the weekday as whole days from Monday).
    start_ms: u64,
    duration_ms: u64,
    /// As configured, for descriptions: weekday 1–7 for Weekly.
    start_day: u32,
    duration_days: u32,
    state: Mutex<TimerState>,
}

struct TimerState {
    first_trigger: bool,
    scheduler: Option<Arc<Scheduler>>,
    handle: Option<TimerHandle>,
}

impl TimerControl {
    pub(crate) fn create(entry: &TimerEntry) -> Result<Arc<Device>, ConfigError> {
        let name = entry.name.trim();
        if name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        let kind = TimerKind::from_name(&entry.timer_type).ok_or_else(|| {
            ConfigError::UnknownTimerType {
                device: name.to_owned(),
                timer_type: entry.timer_type.clone(),
            }
        })?;

        let start = parse_time_string(&entry.start)?;
        let duration = parse_time_string(&entry.duration)?;

        let start_ms;
        if kind == TimerKind::Weekly {
            // weekday 1 (Monday) through 7 (Sunday), offset from Monday 00:00
            if !(1..=7).contains(&start.days) {
                return Err(ConfigError::OutOfRange { device: name.to_owned(), what: "weekday" });
            }
            start_ms = u64::from(start.days - 1) * MSECS_IN_DAY
                + (u64::from(start.seconds)
                    + u64::from(start.minutes) * 60
                    + u64::from(start.hours) * 3600)
                    * 1000;
        } else {
            start_ms = start.total_ms();
        }
        let duration_ms = duration.total_ms();

        if kind == TimerKind::Custom {
            // sub-second frequency or duration is pointless
            if start_ms < 1000 || duration_ms < 1000 {
                return Err(ConfigError::OutOfRange {
                    device: name.to_owned(),
                    what: "custom timer frequency/duration",
                });
            }
        } else {
            // the on period must start and finish within one cycle:
            // start < period, 0 < duration < period
            let period = kind.period_ms();
            if start_ms >= period || duration_ms < 1000 || duration_ms >= period {
                return Err(ConfigError::OutOfRange {
                    device: name.to_owned(),
                    what: "start/duration for timer type",
                });
            }
        }

        let control = Self {
            core: ControlCore::new(Vec::new(), entry.outputs.clone()),
            kind,
            start_ms,
            duration_ms,
            start_day: start.days,
            duration_days: duration.days,
            state: Mutex::new(TimerState { first_trigger: true, scheduler: None, handle: None }),
        };
        Ok(Device::new(
            name.to_owned(),
            "TimerControl",
            entry.username.clone(),
            entry.userdescription.clone(),
            0.0,
            DeviceKind::Timer(control),
        ))
    }

    pub fn core(&self) -> &ControlCore {
        &self.core
    }

    pub fn timer_kind(&self) -> TimerKind {
        self.kind
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Arm the timer after the graph is finished.
    ///
    /// The initial value is seeded silently, the device marked valid, and
    /// only then announced — observers never see a value from an invalid
    /// producer. A custom timer is fudged to on first so the initial firing
    /// toggles it into its off phase.
    pub(crate) fn start(&self, owner: &Arc<Device>, scheduler: &Arc<Scheduler>) {
        self.state.lock().scheduler = Some(Arc::clone(scheduler));

        if self.kind == TimerKind::Custom {
            owner.seed_value(1.0);
        }
        self.fire(owner, false);
        owner.set_valid(true);
        owner.announce_value();
    }

    /// Cancel the armed single-shot; the timer stays quiet afterwards.
    pub(crate) fn stop(&self) {
        let mut ts = self.state.lock();
        if let Some(handle) = ts.handle.take() {
            handle.cancel();
        }
        ts.scheduler = None;
    }

    /// One firing: derive state, re-arm, publish.
    fn fire(&self, owner: &Arc<Device>, notify: bool) {
        let mut ts = self.state.lock();
        let first = ts.first_trigger;
        ts.first_trigger = false;

        let new_value;
        match self.kind {
            TimerKind::Custom => {
                // toggle; off phase lasts `start`, on phase lasts `duration`
                let current = owner.get_value();
                let delay = if current > 0.0 { self.start_ms } else { self.duration_ms };
                self.arm(&mut ts, owner, delay);
                new_value = if current > 0.0 { 0.0 } else { 1.0 };
            }
            _ => {
                let elapsed = self.msecs_since_period_start();
                let (on, mut next) = self.state_and_delay(elapsed);

                if first && on {
                    info!(
                        "Triggering timer '{}' late - will run for {:.1}s instead of {}s",
                        owner.id(),
                        next as f64 / 1000.0,
                        self.duration_ms / 1000
                    );
                }

                // fire a little early to hone in on the exact boundary
                if next > 100 {
                    next -= next / 10;
                }
                if next > MSECS_IN_HOUR {
                    next = MSECS_IN_HOUR;
                }

                self.arm(&mut ts, owner, next);
                new_value = if on { 1.0 } else { 0.0 };
            }
        }
        drop(ts);

        if notify {
            owner.set_value(new_value);
        } else {
            owner.seed_value(new_value);
        }
    }

    fn arm(&self, ts: &mut TimerState, owner: &Arc<Device>, delay_ms: u64) {
        let Some(scheduler) = ts.scheduler.as_ref() else {
            return;
        };
        let weak = Arc::downgrade(owner);
        let handle = scheduler.schedule(Duration::from_millis(delay_ms), move || {
            if let Some(device) = weak.upgrade() {
                if let DeviceKind::Timer(timer) = device.kind() {
                    timer.fire(&device, true);
                }
            }
        });
        ts.handle = Some(handle);
    }

    // ── Period arithmetic (pure) ──────────────────────────────

    /// Current on/off state and the delay to the next transition, given the
    /// milliseconds elapsed since the period start.
    ///
    /// Four shapes are possible within one period: `-_` (starts at zero),
    /// `_-_` (no wrap), `_-` (ends at the boundary) and `-_-` (the on
    /// phase wraps the boundary).
    fn state_and_delay(&self, elapsed: u64) -> (bool, u64) {
        let period = self.kind.period_ms();
        let start = self.start_ms;
        let finish = start + self.duration_ms;

        if start == 0 {
            // on/off -_
            let on = elapsed <= self.duration_ms;
            let next = if on { self.duration_ms - elapsed } else { period - elapsed };
            (on, next)
        } else if finish < period {
            // off/on/off _-_
            if elapsed < start {
                (false, start - elapsed)
            } else if elapsed > finish {
                (false, period - elapsed)
            } else {
                (true, finish - elapsed)
            }
        } else if finish == period {
            // off/on _-
            let on = elapsed >= start;
            let next = if on { period - elapsed } else { start - elapsed };
            (on, next)
        } else {
            // on/off/on -_- : the tail of the on phase wraps into the start
            let first_start = finish - period;
            if elapsed <= first_start {
                (true, first_start - elapsed)
            } else if elapsed >= start {
                (true, period - elapsed)
            } else {
                (false, start - elapsed)
            }
        }
    }

    /// Milliseconds since the most recent 0↔1 edge given the elapsed time
    /// in the current period. Period boundaries that are not transitions do
    /// not count.
    fn time_since_last_transition_at(&self, elapsed: u64) -> u64 {
        let period = self.kind.period_ms();
        let start = self.start_ms;
        let finish = start + self.duration_ms;

        if start == 0 {
            if elapsed <= self.duration_ms { elapsed } else { elapsed - self.duration_ms }
        } else if finish < period {
            if elapsed < start {
                elapsed + (period - finish)
            } else if elapsed > finish {
                elapsed - finish
            } else {
                elapsed - start
            }
        } else if finish == period {
            if elapsed >= start { elapsed - start } else { elapsed }
        } else {
            let first_start = finish - period;
            if elapsed <= first_start {
                elapsed + (period - start)
            } else if elapsed >= start {
                elapsed - start
            } else {
                elapsed - first_start
            }
        }
    }

    /// Milliseconds since the most recent 0↔1 edge.
    ///
    /// Pure in the timer's configuration and the wall clock, so downstream
    /// transitions may call it mid fan-out. Custom timers have no defined
    /// period and report 0.
    pub fn time_since_last_transition_ms(&self) -> u64 {
        if self.kind == TimerKind::Custom {
            return 0;
        }
        self.time_since_last_transition_at(self.msecs_since_period_start())
    }

    /// Local-time milliseconds since the start of the current period.
    fn msecs_since_period_start(&self) -> u64 {
        let now = Local::now();
        let subsec = u64::from(now.nanosecond() / 1_000_000).min(999);
        let second = u64::from(now.second());
        let minute = u64::from(now.minute());
        let hour = u64::from(now.hour());
        let weekday = u64::from(now.weekday().num_days_from_monday());

        match self.kind {
            TimerKind::Custom => 0,
            TimerKind::Minutely => second * 1000 + subsec,
            TimerKind::Hourly => (minute * 60 + second) * 1000 + subsec,
            TimerKind::Daily => ((hour * 60 + minute) * 60 + second) * 1000 + subsec,
            TimerKind::Weekly => {
                weekday * MSECS_IN_DAY + ((hour * 60 + minute) * 60 + second) * 1000 + subsec
            }
        }
    }

    pub(crate) fn description(&self) -> Vec<String> {
        let length = duration_to_string(self.duration_days, self.duration_ms / 1000);
        let start = duration_to_string(0, (self.start_ms / 1000) % (24 * 60 * 60));
        match self.kind {
            TimerKind::Custom => vec![
                "Custom Timer".to_owned(),
                format!("Frequency {}", duration_to_string(0, self.start_ms / 1000)),
                format!("Duration {length}"),
            ],
            TimerKind::Weekly => vec![
                "Weekly Timer".to_owned(),
                format!("Start day {} {start}", self.start_day),
                format!("Duration {length}"),
            ],
            kind => vec![
                format!("{} Timer", kind.name()),
                format!("Start {start}"),
                format!("Duration {length}"),
            ],
        }
    }
}
