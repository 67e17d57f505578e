//! Wrapper functions for the structured events the crate emits.
//!
//! Each function logs one kind of event under its own target so a subscriber
//! can filter them, for example `RUST_LOG=SESSION=info,NODE_LOG=debug`.

use crate::{
    id::NodeId,
    orchestrator::{Phase, SessionError},
    pdu::{ErrorCode, LogValue, Pdu, Severity},
    state::NodeState,
    transport::Endpoint,
};
use tracing::{event, Level};

const PLACEHOLDERS: [&str; 4] = ["%float64", "%int64", "%uint64", "%string"];

/// Substitutes `values` into the placeholders of a log template, in order.
/// Placeholders without a value are left as they are and surplus values are
/// dropped.
pub fn format_template(template: &str, values: &[LogValue]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut values = values.iter();
    let mut rest = template;
    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match PLACEHOLDERS.iter().find(|p| tail.starts_with(*p)) {
            Some(placeholder) => {
                match values.next() {
                    Some(value) => out.push_str(&value.to_string()),
                    None => out.push_str(placeholder),
                }
                rest = &tail[placeholder.len()..];
            }
            None => {
                out.push('%');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// A session moved on to a new phase.
pub fn phase_event(phase: Phase, nodes: usize) {
    event!(target: "SESSION", Level::INFO, phase = %phase, nodes = nodes);
}

/// A node reported a new settled state.
pub fn state_event(node: NodeId, state: NodeState) {
    event!(target: "STATE", Level::DEBUG, node = node.into_inner(), state = %state);
}

/// The session clock advanced.
pub fn step_event(steps: u64, time: f64) {
    event!(target: "STEP", Level::DEBUG, steps = steps, time = time);
}

/// A node rejected a command.
pub fn nack_event(node: NodeId, phase: Phase, code: ErrorCode) {
    event!(target: "SESSION", Level::WARN, node = node.into_inner(), phase = %phase, code = %code);
}

/// The session is being torn down because of `error`.
pub fn abort_event(error: &SessionError) {
    let node = error.node().map(NodeId::into_inner);
    let phase = error.phase().map(|phase| phase.to_string());
    event!(target: "SESSION", Level::ERROR, node = ?node, phase = ?phase, error = %error);
}

/// A node never confirmed teardown within the abort window.
pub fn unreachable_event(node: NodeId, phase: Phase) {
    event!(target: "SESSION", Level::ERROR, node = node.into_inner(), phase = %phase, "unreachable");
}

/// A PDU was sent or received.
pub fn pdu_event(sent: bool, peer: Endpoint, pdu: &Pdu) {
    let direction = if sent { "sent" } else { "received" };
    event!(target: "PDU", Level::TRACE, direction = direction, peer = %peer, kind = pdu.kind(), node = ?pdu.node().map(NodeId::into_inner));
}

/// A record produced by a node's log templates.
pub fn node_log(node: NodeId, name: &str, category: &str, severity: Severity, message: &str) {
    let node = node.into_inner();
    match severity {
        Severity::Fatal | Severity::Error => {
            event!(target: "NODE_LOG", Level::ERROR, node = node, name = name, category = category, message = message)
        }
        Severity::Warning => {
            event!(target: "NODE_LOG", Level::WARN, node = node, name = name, category = category, message = message)
        }
        Severity::Information => {
            event!(target: "NODE_LOG", Level::INFO, node = node, name = name, category = category, message = message)
        }
        Severity::Debug => {
            event!(target: "NODE_LOG", Level::DEBUG, node = node, name = name, category = category, message = message)
        }
    }
}

/// A node applied a value older than the step it was meant for.
pub fn stale_input_event(node: NodeId, data_id: u16, step: u64) {
    event!(target: "NODE", Level::WARN, node = node.into_inner(), data_id = data_id, step = step, "stale input");
}

/// A real-time node fell behind its wall-clock schedule.
pub fn overrun_event(node: NodeId, due: u64, done: u64) {
    event!(target: "NODE", Level::WARN, node = node.into_inner(), due_steps = due, done_steps = done, "deadline overrun");
}
