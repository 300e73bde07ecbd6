//! Property tests for the graph invariants and the statistics kernels.

use proptest::prelude::*;

use hearth::maths::RunningAverage;
use hearth::{Automation, Config};

fn switch_graph(input_names: &[&str], operation: &str) -> Automation {
    let sensors: Vec<String> =
        input_names.iter().map(|n| format!(r#""{n}": {{ "name": "{n}" }}"#)).collect();
    let inputs: Vec<String> = input_names.iter().map(|n| format!(r#""{n}""#)).collect();
    let json = format!(
        r#"{{
            "sensors": {{ "switch": {{ {} }} }},
            "outputs": {{ "switch": {{ "out": {{ "name": "out" }} }} }},
            "controls": {{ "logic": {{ "ctl": {{
                "name": "ctl", "operation": "{operation}",
                "inputs": [{}], "outputs": "out"
            }} }} }}
        }}"#,
        sensors.join(", "),
        inputs.join(", ")
    );
    Automation::build(&Config::from_json(&json).unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The windowed running average always equals the naive mean of the
    /// last N samples.
    #[test]
    fn windowed_average_matches_naive_model(
        window in 1usize..8,
        samples in proptest::collection::vec(-1000.0f64..1000.0, 1..40),
    ) {
        let mut avg = RunningAverage::new(window);
        for (i, sample) in samples.iter().enumerate() {
            let got = avg.add_value(*sample);
            let tail_start = (i + 1).saturating_sub(window);
            let tail = &samples[tail_start..=i];
            let expected: f64 = tail.iter().sum::<f64>() / tail.len() as f64;
            prop_assert!((got - expected).abs() < 1e-6, "window {window}: {got} vs {expected}");
        }
    }

    /// The unbounded running average equals the mean of everything seen.
    #[test]
    fn unbounded_average_matches_naive_model(
        samples in proptest::collection::vec(-1000.0f64..1000.0, 1..40),
    ) {
        let mut avg = RunningAverage::new(0);
        for sample in &samples {
            avg.add_value(*sample);
        }
        let expected: f64 = samples.iter().sum::<f64>() / samples.len() as f64;
        prop_assert!((avg.mean() - expected).abs() < 1e-6);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Invariant: a control is valid iff every input has delivered at least
    /// one value, and while invalid it reports its default.
    #[test]
    fn control_valid_iff_all_inputs_seen(pushed in proptest::collection::vec(any::<bool>(), 2..5)) {
        let names: Vec<String> = (0..pushed.len()).map(|i| format!("in{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let automation = switch_graph(&refs, "any");

        for (name, push) in names.iter().zip(&pushed) {
            if *push {
                automation.device(name).unwrap().push_value(1.0);
            }
        }

        let ctl = automation.device("ctl").unwrap();
        let all_pushed = pushed.iter().all(|p| *p);
        prop_assert_eq!(ctl.get_valid(), all_pushed);
        if !all_pushed {
            prop_assert_eq!(ctl.get_value(), ctl.default_value());
        }
    }

    /// Invariant: invalidating any input makes the control report its
    /// default again.
    #[test]
    fn invalid_input_forces_default(values in proptest::collection::vec(0.0f64..2.0, 2..5)) {
        let names: Vec<String> = (0..values.len()).map(|i| format!("in{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let automation = switch_graph(&refs, "maximum");

        for (name, value) in names.iter().zip(&values) {
            automation.device(name).unwrap().push_value(*value);
        }
        let ctl = automation.device("ctl").unwrap();
        prop_assert!(ctl.get_valid());

        automation.device(&names[0]).unwrap().push_invalid();
        prop_assert!(!ctl.get_valid());
        prop_assert_eq!(ctl.get_value(), ctl.default_value());
        prop_assert_eq!(automation.device("out").unwrap().get_value(), 0.0);
    }

    /// Passthrough: with one input and one physical output, the output
    /// equals the input at all times.
    #[test]
    fn passthrough_is_identity(values in proptest::collection::vec(0.0f64..1.0, 1..20)) {
        let json = r#"{
            "sensors": { "pwm": { "src": { "name": "src" } } },
            "outputs": { "pwm": { "dst": { "name": "dst", "resolution": 16777215 } } },
            "controls": { "logic": { "ctl": {
                "name": "ctl", "operation": "passthrough",
                "inputs": "src", "outputs": "dst"
            } } }
        }"#;
        let automation = Automation::build(&Config::from_json(json).unwrap());
        let src = automation.device("src").unwrap();
        let dst = automation.device("dst").unwrap();

        for value in &values {
            src.push_value(*value);
            prop_assert!((dst.get_value() - *value).abs() < 1e-6);
        }
    }

    /// Toggle flips exactly on rising edges; repeated identical updates are
    /// no-ops (idempotence under steady input).
    #[test]
    fn toggle_follows_rising_edge_model(
        values in proptest::collection::vec(prop_oneof![Just(0.0f64), Just(0.5), Just(1.0), Just(1.5)], 1..30),
    ) {
        let automation = switch_graph(&["btn"], "toggle");
        let btn = automation.device("btn").unwrap();
        let ctl = automation.device("ctl").unwrap();

        let mut expected = 0.0f64;
        let mut last_recorded: Option<f64> = None;
        for value in &values {
            btn.push_value(*value);
            match last_recorded {
                // duplicate pushes are suppressed before edge detection
                Some(prev) if (prev - *value).abs() < 1e-9 => {}
                Some(prev) => {
                    if prev < 1.0 && *value >= 1.0 {
                        expected = if expected >= 1.0 { 0.0 } else { 1.0 };
                    }
                    last_recorded = Some(*value);
                }
                // the first sample seeds edge detection without flipping
                None => last_recorded = Some(*value),
            }
            prop_assert_eq!(ctl.get_value(), expected);
        }
    }
}

/// Rings of any length are detected and fully removed; the producer to
/// consumer graph that survives a build is acyclic.
#[test]
fn control_rings_are_removed() {
    for ring in 2..6 {
        let mut entries = Vec::new();
        for i in 0..ring {
            let next = (i + 1) % ring;
            let prev = (i + ring - 1) % ring;
            entries.push(format!(
                r#""c{i}": {{ "name": "c{i}", "operation": "passthrough",
                    "inputs": "c{prev}", "outputs": "c{next}" }}"#
            ));
        }
        let json = format!(r#"{{ "controls": {{ "logic": {{ {} }} }} }}"#, entries.join(", "));
        let automation = Automation::build(&Config::from_json(&json).unwrap());

        for i in 0..ring {
            assert!(
                automation.device(&format!("c{i}")).is_none(),
                "ring of {ring}: c{i} survived"
            );
        }
    }
}
