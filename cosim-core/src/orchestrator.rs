//! The orchestrator: drives every node of a session through its lifecycle.
//!
//! [`Orchestrator`] is a synchronous state machine. It performs no I/O: the
//! caller feeds it received PDUs and wake-ups and carries out the [`Action`]s
//! it returns. [`run_session`] is the async driver that does this over a real
//! [`Network`](crate::transport::Network).
//!
//! There is no global phase field. Each `STATE_CHANGED` updates one node's
//! record and then checks whether every node now sits in the same settled
//! state; only then is the next command broadcast. Configuration is the one
//! per-node gate: a node is told to `prepare` as soon as it has acknowledged
//! every configuration item it was sent.

use crate::{
    clock::SessionClock,
    config::{ConfigError, SessionConfig},
    descriptor::{Descriptor, PROTOCOL_VERSION},
    id::NodeId,
    logging,
    pdu::{ErrorCode, LogValue, Pdu, Severity, StateCommand, FAILURE_TEMPLATE},
    state::{CommandKind, NodeState},
    transport::{Endpoint, TransportError},
    wiring::{Connection, Wiring, WiringError},
};
use std::{
    fmt::{self, Display, Formatter},
    time::Duration,
};
use thiserror::Error as ThisError;

mod node_record;
use node_record::{Acked, NodeRecord};

mod driver;
pub use driver::run_session;

/// Something the caller must do on the orchestrator's behalf.
#[derive(Debug)]
pub enum Action {
    /// Send a PDU to a node's control endpoint.
    Send { to: Endpoint, pdu: Pdu },
    /// Every node deregistered after a normal run.
    Finished(SessionReport),
    /// The session was aborted. Every reachable node has been stopped and
    /// deregistered, or the abort window ran out.
    Failed(SessionError),
}

/// The part of a session a command belongs to, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Registration,
    Configuration,
    Initialization,
    Synchronization,
    Stepping,
    Stopping,
    Deregistration,
}

impl Phase {
    pub fn of(command: CommandKind) -> Self {
        match command {
            CommandKind::Register => Phase::Registration,
            CommandKind::ConfigItem | CommandKind::Prepare | CommandKind::Configure => {
                Phase::Configuration
            }
            CommandKind::Initialize => Phase::Initialization,
            CommandKind::Run => Phase::Synchronization,
            CommandKind::DoStep => Phase::Stepping,
            CommandKind::Stop => Phase::Stopping,
            CommandKind::Deregister => Phase::Deregistration,
        }
    }

    fn of_state(state: Option<NodeState>) -> Self {
        use NodeState::*;
        match state {
            None | Some(Idle) => Phase::Registration,
            Some(Registering | Preparing | Prepared | Configuring) => Phase::Configuration,
            Some(Configured | Initializing) => Phase::Initialization,
            Some(Synchronizing | Synchronized) => Phase::Synchronization,
            Some(Running | Stepping | Computed) => Phase::Stepping,
            Some(Stopping | Stopped) => Phase::Stopping,
            Some(Deregistered) => Phase::Deregistration,
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Registration => "registration",
            Phase::Configuration => "configuration",
            Phase::Initialization => "initialization",
            Phase::Synchronization => "synchronization",
            Phase::Stepping => "stepping",
            Phase::Stopping => "stopping",
            Phase::Deregistration => "deregistration",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeSummary {
    pub node: NodeId,
    pub name: String,
    pub nacks: u32,
}

/// The outcome of a completed session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub steps: u64,
    /// Simulated time in seconds when the session stopped.
    pub final_time: f64,
    /// Offset from session start at which the `run` that put nodes into
    /// `RUNNING` was issued.
    pub running_at: Option<Duration>,
    /// Offset from session start at which teardown began.
    pub stopped_at: Option<Duration>,
    pub nodes: Vec<NodeSummary>,
}

impl SessionReport {
    /// Wall-clock time between the start of the run and the start of
    /// teardown.
    pub fn run_duration(&self) -> Option<Duration> {
        Some(self.stopped_at?.saturating_sub(self.running_at?))
    }
}

#[derive(Debug, ThisError)]
pub enum SessionError {
    #[error("Node {node} rejected registration: {code}")]
    Registration { node: NodeId, code: ErrorCode },
    #[error("Node {node} rejected {command:?} during {phase}: {code}")]
    Rejected {
        node: NodeId,
        phase: Phase,
        command: CommandKind,
        code: ErrorCode,
    },
    #[error("Node {node} stalled during {phase}: {detail}")]
    Stalled {
        node: NodeId,
        phase: Phase,
        detail: String,
    },
    #[error("Node {node} stopped on its own during {phase}")]
    UnexpectedStop { node: NodeId, phase: Phase },
    #[error("Node {node} failed during {phase}: {message}")]
    NodeFailed {
        node: NodeId,
        phase: Phase,
        message: String,
    },
    #[error("The session was aborted")]
    Aborted,
    #[error("A session needs at least one node")]
    NoNodes,
    #[error("Invalid session configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Invalid wiring: {0}")]
    Wiring(#[from] WiringError),
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// The node the failure is attributed to, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            SessionError::Registration { node, .. }
            | SessionError::Rejected { node, .. }
            | SessionError::Stalled { node, .. }
            | SessionError::UnexpectedStop { node, .. }
            | SessionError::NodeFailed { node, .. } => Some(*node),
            _ => None,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            SessionError::Registration { .. } => Some(Phase::Registration),
            SessionError::Rejected { phase, .. }
            | SessionError::Stalled { phase, .. }
            | SessionError::UnexpectedStop { phase, .. }
            | SessionError::NodeFailed { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

struct Teardown {
    error: Option<SessionError>,
    /// Set for aborts only. A normal teardown is bounded by the phase timeout.
    deadline: Option<Duration>,
}

/// The orchestrator's state machine.
pub struct Orchestrator {
    config: SessionConfig,
    wiring: Wiring,
    nodes: Vec<NodeRecord>,
    clock: SessionClock,
    now: Duration,
    epoch_unix_ms: u64,
    progress_deadline: Duration,
    config_sent: bool,
    passes_done: u32,
    running_at: Option<Duration>,
    stopped_at: Option<Duration>,
    step_due: Option<Duration>,
    stop_due: Option<Duration>,
    teardown: Option<Teardown>,
    done: bool,
}

impl Orchestrator {
    /// Validates the configuration and wiring of a session. Node `i` of
    /// `descriptors` gets node id `i + 1`.
    pub fn new(
        descriptors: Vec<Descriptor>,
        connections: Vec<Connection>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        if descriptors.is_empty() {
            return Err(SessionError::NoNodes);
        }
        let wiring = Wiring::new(&descriptors, connections)?;
        let mut nodes = Vec::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors.into_iter().enumerate() {
            let id = NodeId::from_index(index).ok_or(WiringError::TooManyNodes(index + 1))?;
            nodes.push(NodeRecord::new(id, descriptor));
        }
        let clock = SessionClock::new(
            config.step_numerator,
            config.step_denominator,
            config.stop_time,
        );
        Ok(Self {
            progress_deadline: config.phase_timeout,
            config,
            wiring,
            nodes,
            clock,
            now: Duration::ZERO,
            epoch_unix_ms: 0,
            config_sent: false,
            passes_done: 0,
            running_at: None,
            stopped_at: None,
            step_due: None,
            stop_due: None,
            teardown: None,
            done: false,
        })
    }

    /// Sets the time elapsed since the session started. Called before every
    /// other method.
    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn clock(&self) -> &SessionClock {
        &self.clock
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The descriptors of the session, indexed by node position.
    pub fn descriptors(&self) -> impl Iterator<Item = &Descriptor> {
        self.nodes.iter().map(|record| &record.descriptor)
    }

    /// Registers every node. `epoch_unix_ms` is the wall-clock time of
    /// session start, used to place real-time deadlines.
    pub fn start(&mut self, epoch_unix_ms: u64) -> Vec<Action> {
        self.epoch_unix_ms = epoch_unix_ms;
        self.progress();
        logging::phase_event(Phase::Registration, self.nodes.len());
        let mode = self.config.op_mode;
        self.nodes
            .iter_mut()
            .map(|record| {
                let uuid = record.descriptor.uuid;
                let pdu = record.register(|node, seq| Pdu::Register {
                    node,
                    seq,
                    state: NodeState::Idle,
                    uuid,
                    mode,
                    major: PROTOCOL_VERSION.0,
                    minor: PROTOCOL_VERSION.1,
                });
                Action::Send {
                    to: record.control(),
                    pdu,
                }
            })
            .collect()
    }

    /// Reacts to one PDU received on the orchestrator's control endpoint.
    pub fn handle(&mut self, pdu: Pdu) -> Vec<Action> {
        let mut actions = vec![];
        if self.done {
            return actions;
        }
        let Some(node) = pdu.node() else {
            tracing::debug!("Ignoring a {} PDU without a node id", pdu.kind());
            return actions;
        };
        if self.nodes.get(node.index()).is_none() {
            tracing::warn!("Ignoring a {} PDU from unknown node {}", pdu.kind(), node);
            return actions;
        }
        match pdu {
            Pdu::Ack { seq, .. } => self.on_ack(node, seq, &mut actions),
            Pdu::Nack { seq, code, .. } => self.on_nack(node, seq, code, &mut actions),
            Pdu::StateChanged { state, .. } => self.on_state_changed(node, state, &mut actions),
            Pdu::Log {
                category,
                severity,
                template,
                values,
                ..
            } => self.on_log(node, category, severity, template, &values, &mut actions),
            other => tracing::debug!("Ignoring a {} PDU from node {}", other.kind(), node),
        }
        actions
    }

    /// Asks every node to stop and deregister, then fails with
    /// [`SessionError::Aborted`].
    pub fn abort(&mut self) -> Vec<Action> {
        let mut actions = vec![];
        if !self.done {
            self.begin_teardown(Some(SessionError::Aborted), &mut actions);
        }
        actions
    }

    /// The next instant at which [`Orchestrator::on_wake`] has something to
    /// do.
    pub fn next_wake(&self) -> Option<Duration> {
        if self.done {
            return None;
        }
        let teardown_deadline = self.teardown.as_ref().and_then(|t| t.deadline);
        [
            Some(self.progress_deadline),
            self.step_due,
            self.stop_due,
            teardown_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Handles everything that has come due: real-time steps and stops, the
    /// abort window and the stall check.
    pub fn on_wake(&mut self) -> Vec<Action> {
        let mut actions = vec![];
        if self.done {
            return actions;
        }
        if self.step_due.map_or(false, |due| self.now >= due) {
            self.step_due = None;
            self.broadcast_step(&mut actions);
        }
        if self.stop_due.map_or(false, |due| self.now >= due) {
            self.stop_due = None;
            self.begin_teardown(None, &mut actions);
        }
        if let Some(deadline) = self.teardown.as_ref().and_then(|t| t.deadline) {
            if self.now >= deadline {
                for record in self.nodes.iter().filter(|r| r.registered && !r.is_deregistered()) {
                    logging::unreachable_event(record.id, Phase::of_state(record.last_reported));
                }
                self.fail(&mut actions);
                return actions;
            }
        }
        if self.now >= self.progress_deadline {
            self.check_stall(&mut actions);
        }
        actions
    }

    fn progress(&mut self) {
        self.progress_deadline = self.now + self.config.phase_timeout;
    }

    fn aborting(&self) -> bool {
        self.teardown.as_ref().map_or(false, |t| t.error.is_some())
    }

    fn check_stall(&mut self, actions: &mut Vec<Action>) {
        if self.aborting() {
            self.progress();
            return;
        }
        let stalled = self
            .nodes
            .iter()
            .find_map(|record| record.outstanding().map(|(phase, detail)| (record.id, phase, detail)));
        self.progress();
        if let Some((node, phase, detail)) = stalled {
            self.begin_teardown(Some(SessionError::Stalled { node, phase, detail }), actions);
        }
    }

    fn on_ack(&mut self, node: NodeId, seq: u16, actions: &mut Vec<Action>) {
        let record = &mut self.nodes[node.index()];
        match record.on_ack(seq) {
            Acked::ConfigComplete => {
                self.progress();
                if self.teardown.is_none() {
                    tracing::debug!("Node {} acknowledged its configuration", node);
                    self.send_command(node, StateCommand::Prepare, None, actions);
                }
            }
            Acked::ConfigItem | Acked::Command(_) => self.progress(),
            Acked::Unknown => tracing::debug!("Ignoring a stale ACK {} from node {}", seq, node),
        }
    }

    fn on_nack(&mut self, node: NodeId, seq: u16, code: ErrorCode, actions: &mut Vec<Action>) {
        let real_time = self.config.real_time();
        let tearing_down = self.teardown.is_some();
        let record = &mut self.nodes[node.index()];
        record.nacks += 1;
        let command = record.command_kind(seq);
        let phase = command.map_or_else(|| Phase::of_state(record.last_reported), Phase::of);
        logging::nack_event(node, phase, code);
        let race = code == ErrorCode::IllegalState
            && matches!(command, Some(CommandKind::DoStep | CommandKind::Stop))
            && (record.is_stopped() || tearing_down || (real_time && record.may_stop_itself()));
        if race || self.aborting() {
            tracing::debug!("Ignoring NACK {} from node {} ({:?})", seq, node, command);
            return;
        }
        let error = match command {
            Some(CommandKind::Register) => SessionError::Registration { node, code },
            Some(command) => SessionError::Rejected {
                node,
                phase,
                command,
                code,
            },
            None => {
                tracing::debug!("Ignoring NACK {} for an unknown command from node {}", seq, node);
                return;
            }
        };
        self.begin_teardown(Some(error), actions);
    }

    fn on_state_changed(&mut self, node: NodeId, state: NodeState, actions: &mut Vec<Action>) {
        logging::state_event(node, state);
        let previous = self.nodes[node.index()].last_reported;
        self.nodes[node.index()].on_state(state);
        self.progress();

        if self.teardown.is_some() {
            self.continue_teardown(actions);
            return;
        }

        match state {
            NodeState::Registering => {
                if self.all_in(NodeState::Registering) && !self.config_sent {
                    self.send_configuration(actions);
                }
            }
            NodeState::Prepared => {
                if self.all_in(NodeState::Prepared) {
                    logging::phase_event(Phase::Configuration, self.nodes.len());
                    self.broadcast(StateCommand::Configure, None, actions);
                }
            }
            NodeState::Configured => {
                if self.all_in(NodeState::Configured) {
                    if self.passes_done < self.config.initialization_passes {
                        self.passes_done += 1;
                        logging::phase_event(Phase::Initialization, self.nodes.len());
                        self.broadcast(StateCommand::Initialize, None, actions);
                    } else if self.config.real_time() {
                        let deadline = self.epoch_unix_ms
                            + (self.now + self.config.sync_lead).as_millis() as u64;
                        logging::phase_event(Phase::Synchronization, self.nodes.len());
                        self.broadcast(StateCommand::Run, Some(deadline), actions);
                    } else {
                        self.running_at = Some(self.now);
                        logging::phase_event(Phase::Stepping, self.nodes.len());
                        self.broadcast(StateCommand::Run, None, actions);
                    }
                }
            }
            NodeState::Synchronized => {
                if self.all_in(NodeState::Synchronized) {
                    self.running_at = Some(self.now);
                    logging::phase_event(Phase::Stepping, self.nodes.len());
                    self.broadcast(StateCommand::Run, None, actions);
                }
            }
            NodeState::Running => {
                if self.all_in(NodeState::Running) {
                    if self.clock.is_done() {
                        self.request_stop(actions);
                    } else {
                        self.next_step(actions);
                    }
                }
            }
            NodeState::Computed => {
                if self.all_in(NodeState::Computed) {
                    self.clock.advance(1);
                    logging::step_event(self.clock.steps(), self.clock.time());
                    if self.clock.is_done() {
                        self.request_stop(actions);
                    } else {
                        self.next_step(actions);
                    }
                }
            }
            NodeState::Stopped => {
                if self.config.real_time() {
                    tracing::info!("Node {} stopped itself, tearing down", node);
                    self.begin_teardown(None, actions);
                } else {
                    let phase = Phase::of_state(previous);
                    self.begin_teardown(Some(SessionError::UnexpectedStop { node, phase }), actions);
                }
            }
            other => tracing::warn!("Node {} reported unexpected state {}", node, other),
        }
    }

    fn on_log(
        &mut self,
        node: NodeId,
        category: u8,
        severity: Severity,
        template: u8,
        values: &[LogValue],
        actions: &mut Vec<Action>,
    ) {
        let record = &self.nodes[node.index()];
        let descriptor = &record.descriptor;
        let category = descriptor
            .log_categories
            .iter()
            .find(|c| c.id == category)
            .map_or("?", |c| c.name.as_str());
        let message = match descriptor.template(template) {
            Some(template) => logging::format_template(&template.message, values),
            None if template == FAILURE_TEMPLATE => logging::format_template("%string", values),
            None => format!("template {} {:?}", template, values),
        };
        logging::node_log(node, &descriptor.name, category, severity, &message);

        if severity == Severity::Fatal && !self.aborting() {
            let phase = record
                .in_flight()
                .map_or_else(|| Phase::of_state(record.last_reported), Phase::of);
            self.begin_teardown(Some(SessionError::NodeFailed { node, phase, message }), actions);
        }
    }

    fn all_in(&self, state: NodeState) -> bool {
        self.nodes.iter().all(|record| record.state == Some(state))
    }

    fn send_configuration(&mut self, actions: &mut Vec<Action>) {
        self.config_sent = true;
        let step = self.config.step();
        let descriptors: Vec<Descriptor> = self.descriptors().cloned().collect();
        for record in self.nodes.iter_mut() {
            let plan = self.wiring.config_plan(record.id, &descriptors, step);
            let to = record.control();
            actions.extend(
                record
                    .configure(plan)
                    .into_iter()
                    .map(|pdu| Action::Send { to, pdu }),
            );
        }
    }

    fn send_command(
        &mut self,
        node: NodeId,
        command: StateCommand,
        deadline: Option<u64>,
        actions: &mut Vec<Action>,
    ) {
        let record = &mut self.nodes[node.index()];
        let pdu = record.command(command, deadline);
        actions.push(Action::Send {
            to: record.control(),
            pdu,
        });
    }

    fn broadcast(&mut self, command: StateCommand, deadline: Option<u64>, actions: &mut Vec<Action>) {
        for record in self.nodes.iter_mut() {
            let pdu = record.command(command, deadline);
            actions.push(Action::Send {
                to: record.control(),
                pdu,
            });
        }
    }

    /// Issues the next step now or, in real-time mode, once it is due.
    fn next_step(&mut self, actions: &mut Vec<Action>) {
        if self.config.real_time() {
            let due = self.running_at.unwrap_or(self.now) + self.clock.due(self.clock.steps());
            if self.now < due {
                self.step_due = Some(due);
                return;
            }
        }
        self.broadcast_step(actions);
    }

    fn broadcast_step(&mut self, actions: &mut Vec<Action>) {
        self.broadcast(StateCommand::DoStep { steps: 1 }, None, actions);
    }

    fn request_stop(&mut self, actions: &mut Vec<Action>) {
        if self.config.real_time() {
            let due = self.running_at.unwrap_or(self.now) + self.clock.due(self.clock.final_step());
            if self.now < due {
                self.stop_due = Some(due);
                return;
            }
        }
        self.begin_teardown(None, actions);
    }

    fn begin_teardown(&mut self, error: Option<SessionError>, actions: &mut Vec<Action>) {
        if let Some(error) = &error {
            logging::abort_event(error);
        }
        if let Some(teardown) = self.teardown.as_mut() {
            // An abort can overtake a normal teardown, never the other way round
            if teardown.error.is_none() && error.is_some() {
                teardown.error = error;
                teardown.deadline = Some(self.now + self.config.abort_window);
                self.continue_teardown(actions);
            }
            return;
        }
        let deadline = error.as_ref().map(|_| self.now + self.config.abort_window);
        self.teardown = Some(Teardown { error, deadline });
        self.stopped_at = Some(self.now);
        self.step_due = None;
        self.stop_due = None;
        logging::phase_event(Phase::Stopping, self.nodes.len());
        for record in self.nodes.iter_mut() {
            let stoppable = record.registered
                && !record.is_stopped()
                && record.in_flight() != Some(CommandKind::Stop);
            if stoppable {
                let pdu = record.command(StateCommand::Stop, None);
                actions.push(Action::Send {
                    to: record.control(),
                    pdu,
                });
            }
        }
        self.continue_teardown(actions);
    }

    fn continue_teardown(&mut self, actions: &mut Vec<Action>) {
        let aborting = self.aborting();
        let all_stopped = self
            .nodes
            .iter()
            .all(|record| record.is_stopped() || (aborting && !record.registered));
        for record in self.nodes.iter_mut() {
            let ready = record.state == Some(NodeState::Stopped) && !record.deregister_sent();
            // An abort releases each node as soon as it stops
            if ready && (all_stopped || aborting) {
                let pdu = record.command(StateCommand::Deregister, None);
                actions.push(Action::Send {
                    to: record.control(),
                    pdu,
                });
            }
        }

        let finished = self
            .nodes
            .iter()
            .filter(|record| record.is_deregistered())
            .count();
        if !aborting && finished == self.nodes.len() {
            self.done = true;
            logging::phase_event(Phase::Deregistration, finished);
            actions.push(Action::Finished(self.report()));
        } else if aborting
            && self
                .nodes
                .iter()
                .all(|record| record.is_deregistered() || !record.registered)
        {
            self.fail(actions);
        }
    }

    fn fail(&mut self, actions: &mut Vec<Action>) {
        self.done = true;
        let error = self
            .teardown
            .as_mut()
            .and_then(|teardown| teardown.error.take())
            .unwrap_or(SessionError::Aborted);
        actions.push(Action::Failed(error));
    }

    /// A summary of the session so far.
    pub fn report(&self) -> SessionReport {
        SessionReport {
            steps: self.clock.steps(),
            final_time: self.clock.time(),
            running_at: self.running_at,
            stopped_at: self.stopped_at,
            nodes: self
                .nodes
                .iter()
                .map(|record| NodeSummary {
                    node: record.id,
                    name: record.descriptor.name.clone(),
                    nacks: record.nacks,
                })
                .collect(),
        }
    }
}
