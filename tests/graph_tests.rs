//! Whole-graph scenarios: build from JSON config, push input values, watch
//! propagation reach outputs and notifiers.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use hearth::builder::{NoSinks, TransportFactory};
use hearth::config::NotifierEntry;
use hearth::notify::{LogTransport, MemoryTransport, NotifierTransport};
use hearth::{Automation, Config, Error, WiringError};

/// Transport factory that hands out a shared in-memory transport for
/// `memory` notifiers.
struct TestTransports {
    memory: MemoryTransport,
}

impl TestTransports {
    fn new() -> Self {
        Self { memory: MemoryTransport::new() }
    }
}

impl TransportFactory for TestTransports {
    fn create(&mut self, entry: &NotifierEntry) -> Option<Box<dyn NotifierTransport>> {
        match entry.transport.as_str() {
            "memory" => Some(Box::new(self.memory.clone())),
            "log" => Some(Box::new(LogTransport)),
            _ => None,
        }
    }
}

fn build(json: &str) -> Automation {
    Automation::build(&Config::from_json(json).expect("config parses"))
}

fn wait_for_messages(transport: &MemoryTransport, count: usize) -> Vec<BTreeMap<String, String>> {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let messages = transport.messages();
        if messages.len() >= count || Instant::now() > deadline {
            return messages;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

// ── Logic propagation ─────────────────────────────────────────

#[test]
fn and_of_two_switches() {
    let automation = build(
        r#"{
            "sensors": { "switch": {
                "a": { "name": "a" },
                "b": { "name": "b" }
            } },
            "outputs": { "switch": { "lamp": { "name": "lamp" } } },
            "controls": { "logic": { "and": {
                "name": "and", "operation": "all",
                "inputs": ["a", "b"], "outputs": "lamp"
            } } }
        }"#,
    );
    assert!(automation.build_errors().is_empty());

    let a = automation.device("a").unwrap();
    let b = automation.device("b").unwrap();
    let and = automation.device("and").unwrap();
    let lamp = automation.device("lamp").unwrap();

    // one input still unknown: the control stays invalid
    a.push_value(1.0);
    assert!(!and.get_valid());

    b.push_value(0.0);
    assert!(and.get_valid());
    assert_eq!(and.get_value(), 0.0);
    assert_eq!(lamp.get_value(), 0.0);

    b.push_value(1.0);
    assert_eq!(and.get_value(), 1.0);
    assert_eq!(lamp.get_value(), 1.0);

    // a sensor fault cascades: default value, invalid
    a.push_invalid();
    assert!(!and.get_valid());
    assert_eq!(and.get_value(), 0.0);
    assert!(!lamp.get_valid());
    assert_eq!(lamp.get_value(), 0.0);

    // recovery is automatic on the next good reading
    a.push_value(1.0);
    assert!(and.get_valid());
    assert_eq!(lamp.get_value(), 1.0);
}

#[test]
fn passthrough_tracks_its_input() {
    let automation = build(
        r#"{
            "sensors": { "pwm": { "level": { "name": "level" } } },
            "outputs": { "pwm": { "dimmer": { "name": "dimmer" } } },
            "controls": { "logic": { "follow": {
                "name": "follow", "operation": "passthrough",
                "inputs": "level", "outputs": "dimmer"
            } } }
        }"#,
    );
    assert!(automation.build_errors().is_empty());

    let level = automation.device("level").unwrap();
    let dimmer = automation.device("dimmer").unwrap();

    for value in [0.1, 0.35, 0.8, 0.0, 1.0] {
        level.push_value(value);
        assert_eq!(dimmer.get_value(), value);
    }
}

#[test]
fn toggle_flips_on_rising_edges_only() {
    let automation = build(
        r#"{
            "sensors": { "switch": { "btn": { "name": "btn" } } },
            "outputs": { "switch": { "light": { "name": "light" } } },
            "controls": { "logic": { "flip": {
                "name": "flip", "operation": "toggle",
                "inputs": "btn", "outputs": "light"
            } } }
        }"#,
    );
    let btn = automation.device("btn").unwrap();
    let light = automation.device("light").unwrap();

    // the first sample seeds edge detection, it does not flip
    btn.push_value(0.0);
    assert_eq!(light.get_value(), 0.0);

    btn.push_value(1.0);
    assert_eq!(light.get_value(), 1.0);

    // steady high input: repeated identical updates are no-ops
    btn.push_value(1.0);
    btn.push_value(1.0);
    assert_eq!(light.get_value(), 1.0);

    btn.push_value(0.0);
    assert_eq!(light.get_value(), 1.0);

    btn.push_value(1.0);
    assert_eq!(light.get_value(), 0.0);
}

#[test]
fn running_average_with_window() {
    let automation = build(
        r#"{
            "sensors": {
                "temperature": { "probe": { "name": "probe" } },
                "switch": {
                    "reset": { "name": "reset" },
                    "tick": { "name": "tick" }
                }
            },
            "outputs": { "switch": { "o": { "name": "o" } } },
            "controls": { "logic": { "avg": {
                "name": "avg", "operation": "runningaverage", "window": 3,
                "inputs": "probe", "references": "reset", "triggers": "tick",
                "outputs": "o"
            } } }
        }"#,
    );
    assert!(automation.build_errors().is_empty());

    let probe = automation.device("probe").unwrap();
    let reset = automation.device("reset").unwrap();
    let tick = automation.device("tick").unwrap();
    let avg = automation.device("avg").unwrap();

    reset.push_value(0.0);
    tick.push_value(0.0);

    // samples 2, 4, 6, 8 through a window of 3 give means 2, 3, 4, 6
    let mut means = Vec::new();
    for sample in [2.0, 4.0, 6.0, 8.0] {
        probe.push_value(sample);
        tick.push_value(1.0);
        means.push(avg.get_value());
        tick.push_value(0.0);
    }
    assert_eq!(means, vec![2.0, 3.0, 4.0, 6.0]);

    // a reference rising edge clears the history; the next sample then
    // stands alone
    probe.push_value(10.0);
    tick.push_value(1.0);
    assert_eq!(avg.get_value(), 8.0); // mean of the window [6, 8, 10]
    reset.push_value(1.0);
    assert_eq!(avg.get_value(), 0.0);
    tick.push_value(0.0);
    tick.push_value(1.0);
    assert_eq!(avg.get_value(), 10.0);
}

#[test]
fn comparison_against_reference_device() {
    let automation = build(
        r#"{
            "sensors": {
                "temperature": {
                    "probe": { "name": "probe" },
                    "limit": { "name": "limit" }
                }
            },
            "outputs": { "switch": { "alarm": { "name": "alarm" } } },
            "controls": { "logic": { "hot": {
                "name": "hot", "operation": "greaterthan",
                "inputs": "probe", "references": "limit",
                "outputs": "alarm"
            } } }
        }"#,
    );
    assert!(automation.build_errors().is_empty());

    let probe = automation.device("probe").unwrap();
    let limit = automation.device("limit").unwrap();
    let alarm = automation.device("alarm").unwrap();

    limit.push_value(30.0);
    probe.push_value(25.0);
    assert_eq!(alarm.get_value(), 0.0);
    probe.push_value(31.5);
    assert_eq!(alarm.get_value(), 1.0);
    // lowering the limit re-evaluates too
    probe.push_value(28.0);
    assert_eq!(alarm.get_value(), 0.0);
    limit.push_value(27.0);
    assert_eq!(alarm.get_value(), 1.0);
}

// ── Build failures ────────────────────────────────────────────

#[test]
fn cycle_is_reported_and_removed() {
    let automation = build(
        r#"{
            "sensors": { "switch": { "s": { "name": "s" } } },
            "outputs": { "switch": { "o": { "name": "o" } } },
            "controls": { "logic": {
                "a": { "name": "a", "operation": "passthrough", "inputs": "b", "outputs": "b" },
                "b": { "name": "b", "operation": "invert", "inputs": "a", "outputs": "a" },
                "ok": { "name": "ok", "operation": "passthrough", "inputs": "s", "outputs": "o" }
            } }
        }"#,
    );

    // both cycle members are gone, the rest of the graph builds
    assert!(automation.device("a").is_none());
    assert!(automation.device("b").is_none());
    assert!(automation.device("ok").is_some());

    let cycle = automation.build_errors().iter().find_map(|e| match e {
        Error::Wiring(WiringError::Cycle(path)) => Some(path.clone()),
        _ => None,
    });
    let cycle = cycle.expect("cycle reported");
    assert_eq!(cycle.first(), cycle.last());
    assert!(cycle.len() >= 3);

    // the survivor still works
    let s = automation.device("s").unwrap();
    s.push_value(1.0);
    assert_eq!(automation.device("o").unwrap().get_value(), 1.0);
}

#[test]
fn output_has_at_most_one_owner() {
    let automation = build(
        r#"{
            "sensors": { "switch": { "s": { "name": "s" } } },
            "outputs": { "switch": { "o": { "name": "o" } } },
            "controls": { "logic": {
                "first": { "name": "first", "operation": "passthrough", "inputs": "s", "outputs": "o" },
                "second": { "name": "second", "operation": "invert", "inputs": "s", "outputs": "o" }
            } }
        }"#,
    );

    // BTreeMap order finishes 'first' first; 'second' loses the claim
    assert!(automation.device("first").is_some());
    assert!(automation.device("second").is_none());
    assert!(
        automation
            .build_errors()
            .iter()
            .any(|e| matches!(e, Error::Wiring(WiringError::OutputOwned { .. })))
    );
}

#[test]
fn bad_entries_are_skipped_not_fatal() {
    let automation = build(
        r#"{
            "sensors": { "switch": { "s": { "name": "s" } } },
            "outputs": { "switch": { "o": { "name": "o" } } },
            "controls": {
                "logic": {
                    "nop": { "name": "nop", "operation": "frobnicate", "inputs": "s", "outputs": "o" },
                    "ghost": { "name": "ghost", "operation": "passthrough", "inputs": "missing", "outputs": "o" },
                    "selfie": { "name": "selfie", "operation": "passthrough", "inputs": "selfie", "outputs": "o" },
                    "ok": { "name": "ok", "operation": "passthrough", "inputs": "s", "outputs": "o" }
                },
                "timer": {
                    "t": { "name": "t", "type": "singleshot", "start": "10", "duration": "5", "outputs": "o" }
                }
            }
        }"#,
    );

    assert!(automation.device("nop").is_none());
    assert!(automation.device("ghost").is_none());
    assert!(automation.device("selfie").is_none());
    assert!(automation.device("t").is_none());
    assert!(automation.device("ok").is_some());
    assert_eq!(automation.build_errors().len(), 4);

    let s = automation.device("s").unwrap();
    s.push_value(1.0);
    assert_eq!(automation.device("o").unwrap().get_value(), 1.0);
}

// ── Timed devices ─────────────────────────────────────────────

#[test]
fn custom_timer_toggles() {
    let automation = build(
        r#"{
            "outputs": { "switch": { "pump": { "name": "pump" } } },
            "controls": { "timer": { "cycle": {
                "name": "cycle", "type": "custom",
                "start": "00:00.01", "duration": "00:00.01",
                "outputs": "pump"
            } } }
        }"#,
    );
    assert!(automation.build_errors().is_empty());
    automation.start();

    let cycle = automation.device("cycle").unwrap();
    let pump = automation.device("pump").unwrap();

    // custom timers begin their off phase
    assert!(cycle.get_valid());
    assert_eq!(cycle.get_value(), 0.0);
    assert_eq!(pump.get_value(), 0.0);

    // after the 1 s off phase the on phase begins
    std::thread::sleep(Duration::from_millis(1400));
    assert_eq!(cycle.get_value(), 1.0);
    assert_eq!(pump.get_value(), 1.0);

    automation.stop();
}

#[test]
fn transition_animates_towards_target() {
    let automation = build(
        r#"{
            "sensors": { "switch": { "s": { "name": "s" } } },
            "outputs": { "pwm": { "lamp": { "name": "lamp" } } },
            "controls": { "transition": { "fade": {
                "name": "fade", "curve": "linear", "duration": "00:00.01",
                "inputs": "s", "outputs": "lamp"
            } } }
        }"#,
    );
    assert!(automation.build_errors().is_empty());
    automation.start();

    let s = automation.device("s").unwrap();
    let lamp = automation.device("lamp").unwrap();

    s.push_value(1.0);
    std::thread::sleep(Duration::from_millis(300));
    let mid = lamp.get_value();
    assert!(mid > 0.0 && mid < 1.0, "mid-flight value was {mid}");

    std::thread::sleep(Duration::from_millis(1200));
    assert_eq!(lamp.get_value(), 1.0);

    // reversal glides back down without a jump
    s.push_value(0.0);
    std::thread::sleep(Duration::from_millis(300));
    let falling = lamp.get_value();
    assert!(falling < 1.0 && falling > 0.0, "falling value was {falling}");

    std::thread::sleep(Duration::from_millis(1200));
    assert_eq!(lamp.get_value(), 0.0);

    automation.stop();
}

// ── Notifications ─────────────────────────────────────────────

#[test]
fn trigger_notification_fires_once_per_rising_edge() {
    let mut transports = TestTransports::new();
    let config = Config::from_json(
        r#"{
            "applicationname": "testrig",
            "sensors": { "pwm": {
                "level": { "name": "level" },
                "threshold": { "name": "threshold" }
            } },
            "controls": { "logic": { "high": {
                "name": "high", "operation": "greaterthanorequal",
                "inputs": "level", "references": "threshold",
                "outputs": "alert"
            } } },
            "notify": {
                "notifiers": { "mem": { "name": "mem", "type": "memory" } },
                "notifications": { "alert": {
                    "name": "alert", "type": "trigger",
                    "inputs": "high", "outputs": "mem",
                    "references": "level",
                    "message": { "title": "%applicationname%", "body": "level hit %level%" }
                } }
            }
        }"#,
    )
    .unwrap();
    let automation = Automation::build_with(&config, &mut NoSinks, &mut transports);
    assert!(automation.build_errors().is_empty());

    let level = automation.device("level").unwrap();
    let threshold = automation.device("threshold").unwrap();

    threshold.push_value(1.0);
    for value in [0.2, 0.4, 0.9, 1.1, 0.8] {
        level.push_value(value);
    }

    // exactly one rising edge (0.9 → 1.1), so exactly one message
    let messages = transports.memory.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].get("title").unwrap(), "testrig");
    assert_eq!(messages[0].get("body").unwrap(), "level hit 1.1");
    assert_eq!(messages[0].get("inputname").unwrap(), "high");
}

#[test]
fn trigger_low_fires_on_falling_edge() {
    let mut transports = TestTransports::new();
    let config = Config::from_json(
        r#"{
            "sensors": { "switch": { "door": { "name": "door" } } },
            "notify": {
                "notifiers": { "mem": { "name": "mem", "type": "memory" } },
                "notifications": { "closed": {
                    "name": "closed", "type": "trigger", "triggerlow": "yes",
                    "inputs": "door", "outputs": "mem",
                    "message": { "body": "door closed" }
                } }
            }
        }"#,
    )
    .unwrap();
    let automation = Automation::build_with(&config, &mut NoSinks, &mut transports);

    let door = automation.device("door").unwrap();
    door.push_value(1.0);
    assert!(transports.memory.messages().is_empty());
    door.push_value(0.0);
    assert_eq!(transports.memory.messages().len(), 1);
    // staying low fires nothing further
    door.push_value(0.0);
    assert_eq!(transports.memory.messages().len(), 1);
}

#[test]
fn system_notification_observes_bus_events() {
    let mut transports = TestTransports::new();
    let config = Config::from_json(
        r#"{
            "notify": {
                "notifiers": { "mem": { "name": "mem", "type": "memory" } },
                "notifications": { "boot": {
                    "name": "boot", "type": "system",
                    "inputs": ["start", "stop"], "outputs": "mem",
                    "message": { "body": "system event %event%" }
                } }
            }
        }"#,
    )
    .unwrap();
    let automation = Automation::build_with(&config, &mut NoSinks, &mut transports);

    automation.start();
    let messages = wait_for_messages(&transports.memory, 1);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].get("body").unwrap(), "system event start");
    assert_eq!(messages[0].get("event").unwrap(), "start");

    automation.stop();
    let messages = wait_for_messages(&transports.memory, 2);
    assert_eq!(messages[1].get("body").unwrap(), "system event stop");
}

// ── Graph export ──────────────────────────────────────────────

#[test]
fn dot_export_matches_wiring_and_elides_passthrough() {
    let automation = build(
        r#"{
            "sensors": { "switch": {
                "s1": { "name": "s1" },
                "s2": { "name": "s2" }
            } },
            "outputs": { "switch": {
                "o1": { "name": "o1" },
                "o2": { "name": "o2" }
            } },
            "controls": { "logic": {
                "pass": { "name": "pass", "operation": "passthrough", "inputs": "s1", "outputs": "o1" },
                "inv": { "name": "inv", "operation": "invert", "inputs": "s2", "outputs": "o2" }
            } }
        }"#,
    );
    let dot = automation.dot_graph();

    let edges: Vec<(&str, &str)> = dot
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.contains("->") && !line.contains("dashed") {
                let (from, to) = line.split_once("->")?;
                Some((from.trim().trim_matches('"'), to.trim().trim_matches('"')))
            } else {
                None
            }
        })
        .collect();

    // the passthrough is elided: its input feeds the output directly
    assert!(edges.contains(&("s1", "o1")));
    assert!(!dot.contains("\"pass\" [shape=record"));

    // the invert control is drawn in full
    assert!(edges.contains(&("s2", "inv")));
    assert!(edges.contains(&("inv", "o2")));
    assert!(dot.contains("\"inv\" [shape=record"));
}

#[test]
fn passthrough_feeding_a_control_is_not_elided() {
    let automation = build(
        r#"{
            "sensors": { "switch": { "s": { "name": "s" } } },
            "outputs": { "switch": { "o": { "name": "o" } } },
            "controls": { "logic": {
                "pass": { "name": "pass", "operation": "passthrough", "inputs": "s", "outputs": "inv" },
                "inv": { "name": "inv", "operation": "invert", "inputs": "pass", "outputs": "o" }
            } }
        }"#,
    );
    assert!(automation.build_errors().is_empty());
    let dot = automation.dot_graph();
    assert!(dot.contains("\"pass\" [shape=record"));
    assert!(dot.contains("\"pass\"->\"inv\""));
}

// ── Hardware sinks ────────────────────────────────────────────

#[test]
fn switch_output_drives_its_sink() {
    use hearth::builder::SinkFactory;
    use hearth::config::OutputEntry;
    use hearth::output::SwitchSink;
    use hearth::platform::MemorySwitchSink;

    struct TestSinks {
        relay: MemorySwitchSink,
    }

    impl SinkFactory for TestSinks {
        fn switch_sink(&mut self, entry: &OutputEntry) -> Option<Box<dyn SwitchSink>> {
            (entry.name == "relay").then(|| Box::new(self.relay.clone()) as Box<dyn SwitchSink>)
        }
    }

    let mut sinks = TestSinks { relay: MemorySwitchSink::new() };
    let config = Config::from_json(
        r#"{
            "sensors": { "switch": { "s": { "name": "s" } } },
            "outputs": { "switch": { "relay": { "name": "relay" } } },
            "controls": { "logic": { "follow": {
                "name": "follow", "operation": "passthrough",
                "inputs": "s", "outputs": "relay"
            } } }
        }"#,
    )
    .unwrap();
    let automation =
        Automation::build_with(&config, &mut sinks, &mut hearth::builder::DefaultTransports);

    let s = automation.device("s").unwrap();
    s.push_value(1.0);
    assert_eq!(sinks.relay.last(), Some(true));
    s.push_value(0.0);
    assert_eq!(sinks.relay.last(), Some(false));
}
