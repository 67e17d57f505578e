//! The node runtime: serves one session on behalf of an [`Engine`].
//!
//! Everything a node does happens in one reactive loop. Control PDUs, coupling
//! data, pacer ticks and the deadlines of pending work are all awaited from the
//! same `select!`, so the lifecycle state, the bindings and the step counter
//! are only ever touched from one place.

use crate::{
    clock::SessionClock,
    config::NodeConfig,
    descriptor::{Descriptor, Direction, OpMode, PROTOCOL_VERSION},
    id::{CommandSeq, DataId, NodeId, SessionUuid, ValueReference},
    logging,
    pdu::{ConfigItem, ErrorCode, LogValue, Pdu, Severity, StateCommand, FAILURE_TEMPLATE},
    shutdown::Shutdown,
    state::{transition, CommandKind, NodeState, NodeStateMachine, Transition},
    transport::{Endpoint, Network, SharedTransport, Transport, TransportError},
    value::{DataType, Value},
};
use std::{
    collections::VecDeque,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use thiserror::Error as ThisError;
use tokio::{
    sync::mpsc,
    time::{self, Instant},
};

mod bindings;
use bindings::Bindings;

mod pacer;
use pacer::Pacer;

/// The log template a node reports each step through.
pub const STEP_TEMPLATE: u8 = 1;

/// The simulation a node runtime drives.
///
/// The runtime never looks inside the engine. Before a step it writes the
/// coupling inputs, then asks the engine to advance and reads the outputs
/// back afterwards.
pub trait Engine: Send + Sync {
    /// Called once per initialization pass, before the run starts.
    fn initialize(&mut self, time: f64) -> Result<(), EngineError>;

    /// Advances the engine from `time` by `step` seconds.
    fn do_step(&mut self, time: f64, step: f64) -> Result<(), EngineError>;

    fn read(&self, value_reference: ValueReference) -> Result<Value, EngineError>;

    fn write(&mut self, value_reference: ValueReference, value: Value) -> Result<(), EngineError>;
}

impl<E: Engine + ?Sized> Engine for Box<E> {
    fn initialize(&mut self, time: f64) -> Result<(), EngineError> {
        (**self).initialize(time)
    }

    fn do_step(&mut self, time: f64, step: f64) -> Result<(), EngineError> {
        (**self).do_step(time, step)
    }

    fn read(&self, value_reference: ValueReference) -> Result<Value, EngineError> {
        (**self).read(value_reference)
    }

    fn write(&mut self, value_reference: ValueReference, value: Value) -> Result<(), EngineError> {
        (**self).write(value_reference, value)
    }
}

#[derive(Debug, ThisError, Clone, PartialEq)]
pub enum EngineError {
    #[error("Unknown value reference {0}")]
    UnknownValueReference(ValueReference),
    #[error("Value reference {value_reference} holds {expected:?}, not {actual:?}")]
    Type {
        value_reference: ValueReference,
        expected: DataType,
        actual: DataType,
    },
    #[error("{0}")]
    Failed(String),
}

/// What a node did during a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeReport {
    pub node: Option<NodeId>,
    pub steps: u64,
    /// Steps that had to reuse an older coupling value.
    pub stale_inputs: u64,
    /// Pacer ticks at which the node was more than a step behind.
    pub overruns: u64,
    /// Why the node stopped itself, if it failed.
    pub failure: Option<String>,
}

#[derive(Debug, ThisError)]
pub enum NodeError {
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("Heard nothing from the orchestrator for {0:?}")]
    Idle(Duration),
    #[error("The node was shut down")]
    Interrupted,
}

/// Serves sessions for one engine on the endpoints of its descriptor.
pub struct NodeRuntime<E> {
    descriptor: Descriptor,
    engine: E,
    config: NodeConfig,
}

impl<E: Engine> NodeRuntime<E> {
    pub fn new(descriptor: Descriptor, engine: E, config: NodeConfig) -> Self {
        Self {
            descriptor,
            engine,
            config,
        }
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Opens the control endpoint and serves one session until the node is
    /// deregistered.
    ///
    /// A node that hears nothing on its control endpoint for the configured
    /// idle timeout gives up with [`NodeError::Idle`].
    pub async fn run(self, network: &dyn Network, shutdown: Shutdown) -> Result<NodeReport, NodeError> {
        let control = network.open(self.descriptor.control_endpoint()).await?;
        tracing::info!(
            "Node {} listening on {}",
            self.descriptor.name,
            control.local_endpoint()
        );
        let (ticks_send, mut ticks) = mpsc::unbounded_channel();
        let mut node = Node::new(self, control.clone(), ticks_send);

        loop {
            let data = node.data.clone();
            let step_deadline = node.pending.as_ref().map(|pending| pending.deadline);
            let sync_at = node.sync.as_ref().map(|sync| sync.at);
            let idle_at = node.last_heard + node.config.idle_timeout;

            tokio::select! {
                received = control.recv() => {
                    let (from, bytes) = received?;
                    match Pdu::from_bytes(bytes.into_iter()) {
                        Ok(pdu) => {
                            logging::pdu_event(false, from, &pdu);
                            node.on_control(from, pdu, network).await;
                        }
                        Err(e) => tracing::warn!("Discarding a malformed PDU from {}: {}", from, e),
                    }
                }
                received = recv_from(data.as_deref()) => {
                    let (from, bytes) = received?;
                    match Pdu::from_bytes(bytes.into_iter()) {
                        Ok(Pdu::Data { data_id, step, payload }) => {
                            node.on_data(data_id, step, &payload).await;
                        }
                        Ok(other) => tracing::debug!("Ignoring a {} PDU on the data endpoint", other.kind()),
                        Err(e) => tracing::warn!("Discarding malformed data from {}: {}", from, e),
                    }
                }
                Some(due) = ticks.recv() => node.on_tick(due).await,
                _ = sleep_until(step_deadline) => node.finish_step().await,
                _ = sleep_until(sync_at) => node.synchronized().await,
                _ = time::sleep_until(idle_at) => {
                    tracing::warn!("Node {} heard nothing from the orchestrator, giving up", node.descriptor.name);
                    return Err(NodeError::Idle(node.config.idle_timeout));
                }
                _ = shutdown.wait_for_shutdown() => {
                    tracing::info!("Node {} shutting down", node.descriptor.name);
                    return Err(NodeError::Interrupted);
                }
            }

            // Commands that arrived mid-step run once the step is done
            while node.pending.is_none() {
                let Some((from, pdu)) = node.deferred.pop_front() else {
                    break;
                };
                node.on_control(from, pdu, network).await;
            }

            if node.machine.state() == NodeState::Deregistered {
                tracing::info!(
                    "Node {} deregistered after {} steps",
                    node.descriptor.name,
                    node.report.steps
                );
                return Ok(node.report);
            }
        }
    }
}

async fn recv_from(transport: Option<&dyn Transport>) -> Result<(Endpoint, Vec<u8>), TransportError> {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// The wall-clock instant of a Unix timestamp in milliseconds. Timestamps in
/// the past map to now.
fn instant_at_unix_ms(unix_ms: u64) -> Instant {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since| since.as_millis() as u64)
        .unwrap_or_default();
    Instant::now() + Duration::from_millis(unix_ms.saturating_sub(now_ms))
}

/// A `doStep` waiting for coupling data.
struct PendingStep {
    transition: Transition,
    steps: u32,
    deadline: Instant,
}

/// A real-time `run` waiting for its start deadline.
struct PendingSync {
    transition: Transition,
    at: Instant,
}

struct Node<E> {
    descriptor: Descriptor,
    engine: E,
    config: NodeConfig,
    machine: NodeStateMachine,
    id: Option<NodeId>,
    master: Option<Endpoint>,
    control: SharedTransport,
    data: Option<SharedTransport>,
    bindings: Bindings,
    clock: Option<SessionClock>,
    /// The pacer tick at which a real-time node stops itself.
    stop_step: Option<u64>,
    initialized: bool,
    pending: Option<PendingStep>,
    deferred: VecDeque<(Endpoint, Pdu)>,
    sync: Option<PendingSync>,
    pacer: Option<Pacer>,
    ticks: mpsc::UnboundedSender<u64>,
    stop_requested: bool,
    last_heard: Instant,
    report: NodeReport,
}

impl<E: Engine> Node<E> {
    fn new(runtime: NodeRuntime<E>, control: SharedTransport, ticks: mpsc::UnboundedSender<u64>) -> Self {
        Self {
            descriptor: runtime.descriptor,
            engine: runtime.engine,
            config: runtime.config,
            machine: NodeStateMachine::new(),
            id: None,
            master: None,
            control,
            data: None,
            bindings: Bindings::default(),
            clock: None,
            stop_step: None,
            initialized: false,
            pending: None,
            deferred: VecDeque::new(),
            sync: None,
            pacer: None,
            ticks,
            stop_requested: false,
            last_heard: Instant::now(),
            report: NodeReport::default(),
        }
    }

    async fn on_control(&mut self, from: Endpoint, pdu: Pdu, network: &dyn Network) {
        self.last_heard = Instant::now();
        if self.pending.is_some() {
            self.deferred.push_back((from, pdu));
            return;
        }
        match pdu {
            Pdu::Register {
                node,
                seq,
                state,
                uuid,
                mode,
                major,
                ..
            } => self.on_register(from, node, seq, state, uuid, mode, major).await,
            Pdu::StateTransition {
                node,
                seq,
                command,
                deadline,
            } => {
                if self.addressed(node) {
                    self.on_command(seq, command, deadline, network).await;
                }
            }
            Pdu::ConfigItem {
                node,
                seq,
                data_id,
                item,
            } => {
                if self.addressed(node) {
                    self.on_config_item(seq, data_id, item).await;
                }
            }
            other => tracing::debug!("Ignoring a {} PDU from {}", other.kind(), from),
        }
    }

    fn addressed(&self, node: NodeId) -> bool {
        if self.id == Some(node) {
            true
        } else {
            tracing::warn!(
                "Node {} ignoring a command for node {}",
                self.descriptor.name,
                node
            );
            false
        }
    }

    fn check_registration(
        &self,
        state: NodeState,
        uuid: SessionUuid,
        mode: OpMode,
        major: u8,
    ) -> Result<(), ErrorCode> {
        let current = self.machine.state();
        if state != current || transition(current, CommandKind::Register, false).is_none() {
            return Err(ErrorCode::IllegalState);
        }
        if major != PROTOCOL_VERSION.0 {
            return Err(ErrorCode::VersionMismatch);
        }
        if uuid != self.descriptor.uuid {
            return Err(ErrorCode::UuidMismatch);
        }
        if !self.descriptor.supports_mode(mode) {
            return Err(ErrorCode::UnsupportedOpMode);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_register(
        &mut self,
        from: Endpoint,
        node: NodeId,
        seq: CommandSeq,
        state: NodeState,
        uuid: SessionUuid,
        mode: OpMode,
        major: u8,
    ) {
        if let Err(code) = self.check_registration(state, uuid, mode, major) {
            tracing::warn!(
                "Node {} rejecting registration from {}: {}",
                self.descriptor.name,
                from,
                code
            );
            self.send(from, Pdu::Nack { node, seq, code }).await;
            return;
        }
        self.machine.set_mode(mode);
        let Ok(accepted) = self.machine.accept(CommandKind::Register) else {
            return;
        };
        self.id = Some(node);
        self.master = Some(from);
        self.report.node = Some(node);
        tracing::info!(
            "Node {} registered as {} with {}",
            self.descriptor.name,
            node,
            from
        );
        self.ack(seq).await;
        self.settle(accepted).await;
    }

    async fn on_config_item(&mut self, seq: CommandSeq, data_id: DataId, item: ConfigItem) {
        let Ok(accepted) = self.machine.accept(CommandKind::ConfigItem) else {
            self.nack(seq, ErrorCode::IllegalState).await;
            return;
        };
        let applied = self.apply_item(data_id, item);
        self.machine.complete(accepted);
        match applied {
            Ok(()) => self.ack(seq).await,
            Err(code) => self.nack(seq, code).await,
        }
    }

    fn apply_item(&mut self, data_id: DataId, item: ConfigItem) -> Result<(), ErrorCode> {
        match item {
            ConfigItem::TimeResolution {
                numerator,
                denominator,
            } => {
                if numerator == 0
                    || denominator == 0
                    || !self.descriptor.supports_resolution(numerator, denominator)
                {
                    return Err(ErrorCode::UnsupportedResolution);
                }
                let clock = SessionClock::new(
                    numerator,
                    denominator,
                    self.config.stop_time.unwrap_or_default(),
                );
                self.stop_step = self.config.stop_time.map(|_| clock.final_step());
                self.clock = Some(clock);
            }
            ConfigItem::Scope(scope) => self.bindings.set_scope(data_id, scope),
            ConfigItem::BindOutput { value_reference } => {
                let variable = self
                    .descriptor
                    .variable(value_reference)
                    .ok_or(ErrorCode::UnknownValueReference)?;
                if variable.direction != Direction::Output {
                    return Err(ErrorCode::InvalidDirection);
                }
                self.bindings.bind_output(data_id, value_reference);
            }
            ConfigItem::BindInput {
                value_reference,
                data_type,
            } => {
                let variable = self
                    .descriptor
                    .variable(value_reference)
                    .ok_or(ErrorCode::UnknownValueReference)?;
                if variable.direction != Direction::Input {
                    return Err(ErrorCode::InvalidDirection);
                }
                if variable.data_type != data_type {
                    return Err(ErrorCode::IncompatibleDataType);
                }
                self.bindings.bind_input(data_id, value_reference, data_type);
            }
            ConfigItem::StepCount(0) => return Err(ErrorCode::IncompleteConfiguration),
            ConfigItem::StepCount(steps) => self.bindings.set_step_count(data_id, steps),
            ConfigItem::SourceAddress(endpoint) => self.bindings.set_source(data_id, endpoint),
            ConfigItem::TargetAddress(endpoint) => self.bindings.add_target(data_id, endpoint),
        }
        Ok(())
    }

    /// Checks a command before it is accepted, so that a rejection leaves
    /// the state unchanged.
    fn validate(&self, command: StateCommand) -> Result<(), ErrorCode> {
        if command == StateCommand::Prepare {
            if self.clock.is_none() {
                return Err(ErrorCode::IncompleteConfiguration);
            }
            self.bindings.check_complete()?;
        }
        Ok(())
    }

    async fn on_command(
        &mut self,
        seq: CommandSeq,
        command: StateCommand,
        deadline: Option<u64>,
        network: &dyn Network,
    ) {
        let real_time = self.machine.mode().is_real_time();
        if transition(self.machine.state(), command.kind(), real_time).is_none() {
            tracing::debug!(
                "Node {} cannot {} while {}",
                self.descriptor.name,
                command,
                self.machine.state()
            );
            self.nack(seq, ErrorCode::IllegalState).await;
            return;
        }
        if let Err(code) = self.validate(command) {
            self.nack(seq, code).await;
            return;
        }
        let Ok(accepted) = self.machine.accept(command.kind()) else {
            self.nack(seq, ErrorCode::IllegalState).await;
            return;
        };
        self.ack(seq).await;

        match command {
            StateCommand::Prepare | StateCommand::Deregister => self.settle(accepted).await,
            StateCommand::Configure => self.configure(accepted, network).await,
            StateCommand::Initialize => self.initialize(accepted).await,
            StateCommand::Run => self.run(accepted, deadline).await,
            StateCommand::DoStep { steps } => {
                self.pending = Some(PendingStep {
                    transition: accepted,
                    steps,
                    deadline: Instant::now() + self.config.input_wait,
                });
                self.try_step().await;
            }
            StateCommand::Stop => {
                self.release();
                self.settle(accepted).await;
            }
        }
    }

    async fn configure(&mut self, accepted: Transition, network: &dyn Network) {
        let endpoint = self.descriptor.data_endpoint();
        match network.open(endpoint).await {
            Ok(data) => self.data = Some(data),
            Err(e) => {
                let message = format!("Could not open data endpoint {}: {}", endpoint, e);
                self.fail(message).await;
                return;
            }
        }
        let starts: Vec<(ValueReference, Value)> = self
            .bindings
            .input_references()
            .filter_map(|vr| self.descriptor.variable(vr))
            .map(|variable| (variable.value_reference, variable.start_value()))
            .collect();
        if let Err(e) = self.apply(starts) {
            self.fail(format!("Could not apply start values: {}", e)).await;
            return;
        }
        self.settle(accepted).await;
    }

    async fn initialize(&mut self, accepted: Transition) {
        let inputs = self.bindings.take(0, false);
        let time = self.clock.map_or(0.0, |clock| clock.time());
        let result = self
            .apply(inputs.values)
            .and_then(|()| self.engine.initialize(time));
        if let Err(e) = result {
            self.fail(format!("Initialization failed: {}", e)).await;
            return;
        }
        if let Err(e) = self.send_outputs(0, true).await {
            self.fail(format!("Could not read outputs: {}", e)).await;
            return;
        }
        self.initialized = true;
        self.settle(accepted).await;
    }

    async fn run(&mut self, accepted: Transition, deadline: Option<u64>) {
        if accepted.settled == NodeState::Synchronized {
            let at = deadline.map_or_else(Instant::now, instant_at_unix_ms);
            self.sync = Some(PendingSync {
                transition: accepted,
                at,
            });
            return;
        }
        if self.machine.mode().is_real_time() {
            if let Some(clock) = self.clock {
                self.pacer = Some(Pacer::start(
                    Instant::now(),
                    clock.step_duration(),
                    self.ticks.clone(),
                ));
            }
        }
        self.settle(accepted).await;
    }

    async fn synchronized(&mut self) {
        if let Some(sync) = self.sync.take() {
            self.settle(sync.transition).await;
        }
    }

    async fn on_data(&mut self, data_id: DataId, step: u64, payload: &[u8]) {
        match self.bindings.receive(data_id, step, payload) {
            Ok(true) => self.try_step().await,
            Ok(false) => tracing::debug!("Node {} ignoring data id {}", self.descriptor.name, data_id),
            Err(e) => tracing::warn!("Node {} discarding data id {}: {}", self.descriptor.name, data_id, e),
        }
    }

    /// Runs the pending step once its inputs are complete.
    async fn try_step(&mut self) {
        let Some(clock) = self.clock else {
            return;
        };
        if self.pending.is_some() && self.bindings.ready(clock.steps(), self.initialized) {
            self.finish_step().await;
        }
    }

    /// Runs the pending step with whatever inputs have arrived.
    async fn finish_step(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let Some(mut clock) = self.clock else {
            self.fail("Stepping without a time resolution".into()).await;
            return;
        };

        let current = clock.steps();
        let inputs = self.bindings.take(current, self.initialized);
        for data_id in inputs.stale.iter() {
            self.report.stale_inputs += 1;
            if let Some(id) = self.id {
                logging::stale_input_event(id, *data_id, current);
            }
        }
        if let Err(e) = self.apply(inputs.values) {
            self.fail(format!("Could not apply inputs: {}", e)).await;
            return;
        }
        for _ in 0..pending.steps {
            if let Err(e) = self.engine.do_step(clock.time(), clock.step_seconds()) {
                self.fail(format!("Step {} failed: {}", clock.steps() + 1, e)).await;
                return;
            }
            clock.advance(1);
        }
        self.clock = Some(clock);
        self.report.steps = clock.steps();

        if let Err(e) = self.send_outputs(clock.steps(), false).await {
            self.fail(format!("Could not read outputs: {}", e)).await;
            return;
        }
        self.log_step(clock.time()).await;
        self.settle(pending.transition).await;

        if self.stop_requested {
            self.stop_itself().await;
        }
    }

    fn apply(&mut self, values: Vec<(ValueReference, Value)>) -> Result<(), EngineError> {
        for (value_reference, value) in values {
            self.engine.write(value_reference, value)?;
        }
        Ok(())
    }

    /// Sends every output due at `step` to each of its targets.
    async fn send_outputs(&self, step: u64, initializing: bool) -> Result<(), EngineError> {
        let Some(data) = self.data.as_ref() else {
            return Ok(());
        };
        let mut outgoing = vec![];
        for due in self.bindings.outputs_due(step, initializing) {
            let value = self.engine.read(due.value_reference)?;
            for target in due.targets {
                outgoing.push((
                    *target,
                    Pdu::Data {
                        data_id: due.data_id,
                        step,
                        payload: value.to_bytes(),
                    },
                ));
            }
        }
        for (to, pdu) in outgoing {
            logging::pdu_event(true, to, &pdu);
            if let Err(e) = data.send_pdu(to, &pdu).await {
                tracing::warn!("Node {} failed to send data to {}: {}", self.descriptor.name, to, e);
            }
        }
        Ok(())
    }

    /// Reports the time and each output through the step template.
    async fn log_step(&self, time: f64) {
        let (Some(id), Some(template)) = (self.id, self.descriptor.template(STEP_TEMPLATE)) else {
            return;
        };
        let severity = Severity::from_u8(template.level).unwrap_or(Severity::Information);
        let category = self
            .descriptor
            .log_categories
            .iter()
            .find(|category| category.id == template.category)
            .map_or("?", |category| category.name.as_str());
        let outputs = self
            .descriptor
            .variables
            .iter()
            .filter(|variable| variable.direction == Direction::Output);
        for variable in outputs {
            let Ok(value) = self.engine.read(variable.value_reference) else {
                continue;
            };
            let values = vec![LogValue::Float64(time), LogValue::from(value)];
            let message = logging::format_template(&template.message, &values);
            logging::node_log(id, &self.descriptor.name, category, severity, &message);
            if self.config.log_to_orchestrator {
                let pdu = Pdu::Log {
                    node: id,
                    category: template.category,
                    severity,
                    template: template.id,
                    values,
                };
                self.reply(pdu).await;
            }
        }
    }

    async fn on_tick(&mut self, due: u64) {
        if !matches!(
            self.machine.state(),
            NodeState::Running | NodeState::Stepping | NodeState::Computed
        ) {
            return;
        }
        let done = self.clock.map_or(0, |clock| clock.steps());
        if due > done + 1 {
            self.report.overruns += 1;
            if let Some(id) = self.id {
                logging::overrun_event(id, due, done);
                if self.config.log_to_orchestrator {
                    let message = format!("deadline overrun: {} of {} steps done", done, due);
                    self.report_failure(id, Severity::Warning, message).await;
                }
            }
        }
        if self.stop_step.map_or(false, |stop| due >= stop) {
            if self.pending.is_some() {
                self.stop_requested = true;
            } else {
                self.stop_itself().await;
            }
        }
    }

    /// Stops without being asked once the real-time stop time has passed.
    async fn stop_itself(&mut self) {
        self.stop_requested = false;
        let Ok(accepted) = self.machine.accept(CommandKind::Stop) else {
            return;
        };
        tracing::info!("Node {} reached its stop time", self.descriptor.name);
        self.release();
        self.settle(accepted).await;
    }

    /// Drops the data endpoint, the pacer and any pending work.
    fn release(&mut self) {
        self.pacer = None;
        self.data = None;
        self.sync = None;
        self.pending = None;
        self.stop_requested = false;
        self.bindings.clear_received();
    }

    /// Reports a failed side effect and settles in `STOPPED`.
    async fn fail(&mut self, message: String) {
        tracing::error!("Node {} failed: {}", self.descriptor.name, message);
        self.release();
        if let Some(id) = self.id {
            self.report_failure(id, Severity::Fatal, message.clone()).await;
        }
        self.report.failure = Some(message);
        if let Some(state) = self.machine.fail() {
            self.announce(state).await;
        }
    }

    async fn report_failure(&self, id: NodeId, severity: Severity, message: String) {
        let category = self
            .descriptor
            .log_categories
            .first()
            .map_or(0, |category| category.id);
        let pdu = Pdu::Log {
            node: id,
            category,
            severity,
            template: FAILURE_TEMPLATE,
            values: vec![LogValue::String(message)],
        };
        self.reply(pdu).await;
    }

    async fn settle(&mut self, accepted: Transition) {
        let state = self.machine.complete(accepted);
        if accepted.reports {
            self.announce(state).await;
        }
    }

    async fn send(&self, to: Endpoint, pdu: Pdu) {
        logging::pdu_event(true, to, &pdu);
        if let Err(e) = self.control.send_pdu(to, &pdu).await {
            tracing::warn!(
                "Node {} failed to send {} to {}: {}",
                self.descriptor.name,
                pdu.kind(),
                to,
                e
            );
        }
    }

    async fn reply(&self, pdu: Pdu) {
        if let Some(master) = self.master {
            self.send(master, pdu).await;
        }
    }

    async fn ack(&self, seq: CommandSeq) {
        if let Some(node) = self.id {
            self.reply(Pdu::Ack { node, seq }).await;
        }
    }

    async fn nack(&self, seq: CommandSeq, code: ErrorCode) {
        if let Some(node) = self.id {
            self.reply(Pdu::Nack { node, seq, code }).await;
        }
    }

    async fn announce(&self, state: NodeState) {
        if let Some(node) = self.id {
            self.reply(Pdu::StateChanged { node, state }).await;
        }
    }
}

#[cfg(test)]
mod tests;
