//! Transition controls: eased animation between 0 and 1.
//!
//! The single input is a binary target; the output glides towards it over
//! the configured duration, shaped by an easing curve. Internally a linear
//! progress variable advances (or reverses) on scheduler ticks and the
//! curve maps progress to the output, so a direction change mid-flight
//! reverses from the current position without a jump.
//!
//! When the input is a timer, the first evaluation seeks into the
//! animation using the timer's time-since-last-transition, so a controller
//! restarted mid-sunrise resumes at the right brightness instead of
//! ramping for the full duration again.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use log::info;
use parking_lot::Mutex;

use super::{ControlCore, ControlState};
use crate::bus::SystemEvent;
use crate::config::TransitionEntry;
use crate::device::{Device, DeviceKind};
use crate::easing::Easing;
use crate::error::ConfigError;
use crate::maths::fuzzy_eq;
use crate::sched::{Scheduler, TimerHandle};
use crate::timeparse::{duration_to_string, parse_time_string};

/// Animation frame interval.
const TICK: Duration = Duration::from_millis(20);

/// Delay before re-evaluating after a system time change, to let upstream
/// timers resynchronise first.
const TIME_CHANGE_GRACE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Payload for [`DeviceKind::Transition`].
pub struct TransitionControl {
    core: ControlCore,
    curve: Easing,
    duration_secs: u64,
    state: Mutex<AnimState>,
}

struct AnimState {
    first_trigger: bool,
    /// Last accepted input target; filters duplicate updates, since the
    /// output itself is decoupled from the input while animating.
    transition_value: f64,
    /// Linear progress of the animation time base, 0..=1.
    progress: f64,
    direction: Direction,
    running: bool,
    last_tick: Option<Instant>,
    scheduler: Option<Arc<Scheduler>>,
    tick_handle: Option<TimerHandle>,
}

impl TransitionControl {
    pub(crate) fn create(entry: &TransitionEntry) -> Result<Arc<Device>, ConfigError> {
        let name = entry.name.trim();
        if name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        let curve = Easing::from_name(&entry.curve).ok_or_else(|| ConfigError::UnknownCurve {
            device: name.to_owned(),
            curve: entry.curve.clone(),
        })?;

        let duration_secs = parse_time_string(&entry.duration)?.total_secs();
        if duration_secs < 1 {
            return Err(ConfigError::OutOfRange {
                device: name.to_owned(),
                what: "transition duration",
            });
        }

        // an explicit default forces the resting state, 0 or 1 only
        let default = match entry.default {
            None => 0.0,
            Some(d) if d == 0.0 || d == 1.0 => d,
            Some(_) => {
                return Err(ConfigError::OutOfRange {
                    device: name.to_owned(),
                    what: "transition default",
                });
            }
        };

        let control = Self {
            core: ControlCore::new(entry.inputs.clone(), entry.outputs.clone()),
            curve,
            duration_secs,
            state: Mutex::new(AnimState {
                first_trigger: true,
                transition_value: default,
                progress: default,
                direction: Direction::Forward,
                running: false,
                last_tick: None,
                scheduler: None,
                tick_handle: None,
            }),
        };
        Ok(Device::new(
            name.to_owned(),
            "TransitionControl",
            entry.username.clone(),
            entry.userdescription.clone(),
            default,
            DeviceKind::Transition(control),
        ))
    }

    pub fn core(&self) -> &ControlCore {
        &self.core
    }

    pub fn curve(&self) -> Easing {
        self.curve
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    /// Hand the animation its scheduler; called when the graph starts.
    pub(crate) fn attach(&self, scheduler: &Arc<Scheduler>) {
        self.state.lock().scheduler = Some(Arc::clone(scheduler));
    }

    /// Cancel any in-flight animation frame.
    pub(crate) fn stop(&self) {
        let mut anim = self.state.lock();
        anim.running = false;
        if let Some(handle) = anim.tick_handle.take() {
            handle.cancel();
        }
        anim.scheduler = None;
    }

    // ── Recomputation ─────────────────────────────────────────

    /// React to a change of the (single) input.
    pub(crate) fn calculate(&self, owner: &Arc<Device>, st: &mut ControlState) {
        let input_id = &self.core.input_ids()[0];
        let target = st.input_values.get(input_id).copied().unwrap_or(0.0);

        let mut anim = self.state.lock();

        if anim.first_trigger {
            anim.first_trigger = false;
            anim.transition_value = target;

            let input_device = st.inputs.get(input_id).and_then(Weak::upgrade);
            let timer = input_device.as_ref().and_then(|device| match device.kind() {
                DeviceKind::Timer(t) => Some(t),
                _ => None,
            });

            if let Some(timer) = timer {
                let elapsed_secs = timer.time_since_last_transition_ms() / 1000;
                if elapsed_secs > self.duration_secs {
                    // the edge is long past: no animation, land on the target
                    info!(
                        "Transition '{}' is initially inactive (value '{target}')",
                        owner.id()
                    );
                    anim.progress = if target > 0.0 { 1.0 } else { 0.0 };
                    anim.running = false;
                    drop(anim);
                    owner.set_value(target);
                    return;
                }

                // part way through: start from the opposite end and seek
                info!(
                    "Forcing transition '{}' to {:.0}% complete ({})",
                    owner.id(),
                    (elapsed_secs as f64 / self.duration_secs as f64) * 100.0,
                    if target > 0.0 { "rising" } else { "falling" }
                );
                owner.set_value(if target > 0.0 { 0.0 } else { 1.0 });
                let fraction = elapsed_secs as f64 / self.duration_secs as f64;
                anim.progress = if target > 0.0 { fraction } else { 1.0 - fraction };
            } else {
                // a plain input: nothing to do if the output already rests
                // at the target
                if fuzzy_eq(owner.get_value(), target) {
                    info!(
                        "Transition '{}' is initially inactive (value '{target}')",
                        owner.id()
                    );
                    anim.progress = if target > 0.0 { 1.0 } else { 0.0 };
                    return;
                }
            }
        } else {
            if fuzzy_eq(target, anim.transition_value) {
                return;
            }
            anim.transition_value = target;
        }

        // a rising target plays the curve forward, a falling one mirrors
        // it; if a frame is mid-flight this simply reverses from the
        // current position
        anim.direction = if target > 0.0 { Direction::Forward } else { Direction::Backward };
        anim.running = true;
        anim.last_tick = Some(Instant::now());
        self.arm_tick(&mut anim, owner);
    }

    /// One animation frame.
    fn tick(&self, owner: &Arc<Device>) {
        let value;
        {
            let mut anim = self.state.lock();
            if !anim.running {
                return;
            }
            let now = Instant::now();
            let dt = anim.last_tick.map_or(0.0, |last| now.duration_since(last).as_secs_f64());
            anim.last_tick = Some(now);

            let delta = dt / self.duration_secs as f64;
            match anim.direction {
                Direction::Forward => anim.progress = (anim.progress + delta).min(1.0),
                Direction::Backward => anim.progress = (anim.progress - delta).max(0.0),
            }

            let finished = match anim.direction {
                Direction::Forward => anim.progress >= 1.0,
                Direction::Backward => anim.progress <= 0.0,
            };
            value = self.curve.apply(anim.progress);
            if finished {
                anim.running = false;
                anim.tick_handle = None;
            } else {
                self.arm_tick(&mut anim, owner);
            }
        }
        owner.set_value(value);
    }

    fn arm_tick(&self, anim: &mut AnimState, owner: &Arc<Device>) {
        let Some(scheduler) = anim.scheduler.as_ref() else {
            return;
        };
        let weak = Arc::downgrade(owner);
        anim.tick_handle = Some(scheduler.schedule(TICK, move || {
            if let Some(device) = weak.upgrade() {
                if let DeviceKind::Transition(transition) = device.kind() {
                    transition.tick(&device);
                }
            }
        }));
    }

    // ── System time changes ───────────────────────────────────

    /// A system time change may have moved any upstream timer; wait a
    /// moment for timers to resynchronise, then redo the startup
    /// computation.
    pub(crate) fn handle_event(&self, owner: &Arc<Device>, event: SystemEvent) {
        if event != SystemEvent::SystemTimeChanged {
            return;
        }
        let scheduler = self.state.lock().scheduler.clone();
        let Some(scheduler) = scheduler else {
            return;
        };
        let weak = Arc::downgrade(owner);
        let _ = scheduler.schedule(TIME_CHANGE_GRACE, move || {
            if let Some(device) = weak.upgrade() {
                if let DeviceKind::Transition(transition) = device.kind() {
                    transition.restart(&device);
                }
            }
        });
    }

    fn restart(&self, owner: &Arc<Device>) {
        info!("Transition '{}' restarting", owner.id());
        {
            let mut anim = self.state.lock();
            anim.first_trigger = true;
            anim.running = false;
        }
        if owner.get_valid() {
            let mut st = self.core.lock();
            super::calculate_output(owner, &mut st);
        }
    }

    pub(crate) fn description(&self) -> Vec<String> {
        let days = (self.duration_secs / 86_400) as u32;
        vec![
            format!("{} transition", self.curve.name()),
            format!("Duration {}", duration_to_string(days, self.duration_secs)),
        ]
    }
}
