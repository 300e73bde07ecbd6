//! DOT export of the device graph.
//!
//! One record node per device, edges producer→consumer, dashed edges for
//! notification references. A logic control in pure passthrough mode — one
//! physical input, every consumer a physical output — is elided and its
//! input is connected straight to its outputs; the control still exists at
//! runtime (outputs have no notion of invalid inputs), it is only hidden
//! from the picture.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::builder::Automation;
use crate::control::logic::Operation;
use crate::device::{Device, DeviceKind};

pub(crate) fn export(automation: &Automation) -> String {
    let mut dot = String::new();
    dot.push_str("digraph stategraph {\r\n");
    dot.push_str("    rankdir=\"LR\";\r\n");
    dot.push_str("    node [fontname=\"sans-serif\"];\r\n");

    for device in automation
        .inputs
        .iter()
        .chain(&automation.controls)
        .chain(&automation.outputs)
    {
        if is_elided_passthrough(device) {
            continue;
        }
        node(&mut dot, device, false);
    }
    for device in automation.notifications.iter().chain(&automation.notifiers) {
        node(&mut dot, device, true);
    }

    for control in &automation.controls {
        control_edges(&mut dot, control);
    }
    for notification in &automation.notifications {
        notification_edges(&mut dot, notification);
    }

    dot.push_str("}\r\n");
    dot
}

fn node(dot: &mut String, device: &Arc<Device>, rounded: bool) {
    let mut label = format!("<B>{}</B>", device.display_name());
    for line in device.description() {
        if !line.is_empty() {
            let _ = write!(label, "<BR/>{line}");
        }
    }
    if device.is_control() {
        let _ = write!(label, "<BR/>Default {}", device.default_value());
        let _ = write!(label, "<BR/>Valid {}", device.get_valid());
        let _ = write!(label, "<BR/>Value {}", device.get_value());
    }
    let style = if rounded { " style=rounded" } else { "" };
    let _ = writeln!(
        dot,
        "    \"{id}\" [shape=record{style} id=\"{id}\" label=<{label}>];\r",
        id = device.id()
    );
}

/// True when the control is hidden from the picture: a Passthrough logic
/// control fed by a single physical input whose consumers are all physical
/// outputs.
fn is_elided_passthrough(device: &Arc<Device>) -> bool {
    let DeviceKind::Logic(logic) = device.kind() else {
        return false;
    };
    if logic.operation() != Operation::Passthrough {
        return false;
    }
    let st = logic.core().lock();
    if st.inputs.len() != 1 {
        return false;
    }
    let input_is_physical = st
        .inputs
        .values()
        .filter_map(std::sync::Weak::upgrade)
        .all(|d| matches!(d.kind(), DeviceKind::Input(_)));
    let outputs_are_physical = !st.outputs.is_empty()
        && st
            .outputs
            .values()
            .filter_map(std::sync::Weak::upgrade)
            .all(|d| matches!(d.kind(), DeviceKind::Output(_)));
    input_is_physical && outputs_are_physical
}

fn control_edges(dot: &mut String, control: &Arc<Device>) {
    let Some(core) = control.control_core() else {
        return;
    };
    let elided = is_elided_passthrough(control);
    let st = core.lock();

    let passthrough_source = st
        .inputs
        .keys()
        .next()
        .cloned()
        .unwrap_or_else(|| control.id().to_owned());

    for (output_id, weak) in &st.outputs {
        let Some(output) = weak.upgrade() else {
            continue;
        };
        match output.kind() {
            DeviceKind::Output(_) => {
                let source = if elided { passthrough_source.as_str() } else { control.id() };
                let _ = writeln!(dot, "    \"{source}\"->\"{output_id}\"\r");
            }
            DeviceKind::Logic(_) | DeviceKind::Timer(_) | DeviceKind::Transition(_) => {
                let _ = writeln!(dot, "    \"{}\"->\"{output_id}\"\r", control.id());
            }
            // drawn by the notification itself
            _ => {}
        }
    }

    if !elided {
        for input_id in st.inputs.keys() {
            let _ = writeln!(dot, "    \"{input_id}\"->\"{}\"\r", control.id());
        }
    }
}

fn notification_edges(dot: &mut String, notification: &Arc<Device>) {
    let DeviceKind::Notification(payload) = notification.kind() else {
        return;
    };
    if let Some(input_id) = payload.input_id() {
        let _ = writeln!(dot, "    \"{input_id}\"->\"{}\"\r", notification.id());
    }
    for reference_id in payload.reference_ids() {
        let _ = writeln!(dot, "    \"{reference_id}\"->\"{}\" [style=dashed]\r", notification.id());
    }
    for notifier_id in payload.notifier_ids() {
        let _ = writeln!(dot, "    \"{}\"->\"{notifier_id}\"\r", notification.id());
    }
}
