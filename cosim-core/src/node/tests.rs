use super::*;
use crate::{
    descriptor::tests::{descriptor, float},
    pdu::Scope,
    transports::MemoryNetwork,
};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

const NODE_CONTROL: Endpoint = Endpoint::localhost(6000);
const NODE_DATA: Endpoint = Endpoint::localhost(6001);

/// Doubles simulated time into `x` and records every `u` it stepped with.
#[derive(Clone, Default)]
struct Probe {
    x: f64,
    u: f64,
    steps: u64,
    fail_at: Option<u64>,
    seen: Arc<Mutex<Vec<f64>>>,
}

impl Engine for Probe {
    fn initialize(&mut self, _time: f64) -> Result<(), EngineError> {
        Ok(())
    }

    fn do_step(&mut self, time: f64, step: f64) -> Result<(), EngineError> {
        self.steps += 1;
        if self.fail_at == Some(self.steps) {
            return Err(EngineError::Failed("diverged".into()));
        }
        self.seen.lock().unwrap().push(self.u);
        self.x = 2.0 * (time + step);
        Ok(())
    }

    fn read(&self, value_reference: ValueReference) -> Result<Value, EngineError> {
        match value_reference {
            0 => Ok(Value::Float64(self.x)),
            1 => Ok(Value::Float64(self.u)),
            other => Err(EngineError::UnknownValueReference(other)),
        }
    }

    fn write(&mut self, value_reference: ValueReference, value: Value) -> Result<(), EngineError> {
        match (value_reference, value) {
            (1, Value::Float64(v)) => {
                self.u = v;
                Ok(())
            }
            (1, other) => Err(EngineError::Type {
                value_reference,
                expected: DataType::Float64,
                actual: other.data_type(),
            }),
            (other, _) => Err(EngineError::UnknownValueReference(other)),
        }
    }
}

fn probe_descriptor() -> Descriptor {
    descriptor(
        "probe",
        NODE_CONTROL.port,
        vec![
            float("x", 0, Direction::Output),
            float("u", 1, Direction::Input),
        ],
    )
}

async fn spawn(
    network: &MemoryNetwork,
    engine: Probe,
    config: NodeConfig,
) -> (JoinHandle<Result<NodeReport, NodeError>>, Shutdown) {
    let runtime = NodeRuntime::new(probe_descriptor(), engine, config);
    let network = network.clone();
    let shutdown = Shutdown::new();
    let handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { runtime.run(&network, shutdown).await })
    };
    // Let the node open its control endpoint
    time::sleep(Duration::from_millis(20)).await;
    (handle, shutdown)
}

/// A scripted stand-in for the orchestrator.
struct Master {
    transport: SharedTransport,
    node: NodeId,
    seq: CommandSeq,
}

impl Master {
    async fn open(network: &MemoryNetwork) -> Self {
        Self {
            transport: network.open(Endpoint::localhost(7000)).await.unwrap(),
            node: NodeId::new(1).unwrap(),
            seq: 0,
        }
    }

    async fn send(&mut self, pdu: impl FnOnce(NodeId, CommandSeq) -> Pdu) -> CommandSeq {
        let seq = self.seq;
        self.seq += 1;
        self.transport
            .send_pdu(NODE_CONTROL, &pdu(self.node, seq))
            .await
            .unwrap();
        seq
    }

    async fn recv(&self) -> Pdu {
        let (_, bytes) = time::timeout(Duration::from_secs(2), self.transport.recv())
            .await
            .expect("the node went quiet")
            .unwrap();
        Pdu::from_bytes(bytes.into_iter()).unwrap()
    }

    async fn register_as(&mut self, uuid: SessionUuid, mode: OpMode, major: u8) -> CommandSeq {
        self.send(|node, seq| Pdu::Register {
            node,
            seq,
            state: NodeState::Idle,
            uuid,
            mode,
            major,
            minor: 0,
        })
        .await
    }

    async fn register(&mut self) {
        let seq = self
            .register_as(probe_descriptor().uuid, OpMode::NonRealTime, PROTOCOL_VERSION.0)
            .await;
        self.expect_ack(seq).await;
        self.expect_changed(NodeState::Registering).await;
    }

    async fn command(&mut self, command: StateCommand) -> CommandSeq {
        self.send(|node, seq| Pdu::StateTransition {
            node,
            seq,
            command,
            deadline: None,
        })
        .await
    }

    async fn item(&mut self, data_id: DataId, item: ConfigItem) -> CommandSeq {
        self.send(|node, seq| Pdu::ConfigItem {
            node,
            seq,
            data_id,
            item,
        })
        .await
    }

    async fn configure(&mut self, items: Vec<(DataId, ConfigItem)>) {
        for (data_id, item) in items {
            let seq = self.item(data_id, item).await;
            self.expect_ack(seq).await;
        }
    }

    /// Sends `command` and expects it to be acknowledged and to settle in
    /// `state`.
    async fn step_to(&mut self, command: StateCommand, state: NodeState) {
        let seq = self.command(command).await;
        self.expect_ack(seq).await;
        self.expect_changed(state).await;
    }

    async fn expect_ack(&self, seq: CommandSeq) {
        assert_eq!(self.recv().await, Pdu::Ack { node: self.node, seq });
    }

    async fn expect_nack(&self, seq: CommandSeq, code: ErrorCode) {
        assert_eq!(
            self.recv().await,
            Pdu::Nack {
                node: self.node,
                seq,
                code
            }
        );
    }

    async fn expect_changed(&self, state: NodeState) {
        assert_eq!(
            self.recv().await,
            Pdu::StateChanged {
                node: self.node,
                state
            }
        );
    }
}

fn resolution() -> (DataId, ConfigItem) {
    (
        0,
        ConfigItem::TimeResolution {
            numerator: 1,
            denominator: 10,
        },
    )
}

/// The probe's output wired back into its own input.
fn loopback() -> Vec<(DataId, ConfigItem)> {
    vec![
        resolution(),
        (1, ConfigItem::Scope(Scope::InitializationRun)),
        (1, ConfigItem::BindOutput { value_reference: 0 }),
        (1, ConfigItem::TargetAddress(NODE_DATA)),
        (
            1,
            ConfigItem::BindInput {
                value_reference: 1,
                data_type: DataType::Float64,
            },
        ),
        (1, ConfigItem::SourceAddress(NODE_DATA)),
    ]
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn rejects_foreign_registrations_and_stays_idle() {
    let network = MemoryNetwork::new();
    let (handle, shutdown) = spawn(&network, Probe::default(), NodeConfig::default()).await;
    let mut master = Master::open(&network).await;
    let uuid = probe_descriptor().uuid;

    let seq = master
        .register_as(SessionUuid([9; 16]), OpMode::NonRealTime, PROTOCOL_VERSION.0)
        .await;
    master.expect_nack(seq, ErrorCode::UuidMismatch).await;
    let seq = master.register_as(uuid, OpMode::NonRealTime, 2).await;
    master.expect_nack(seq, ErrorCode::VersionMismatch).await;
    let seq = master
        .register_as(uuid, OpMode::RealTime, PROTOCOL_VERSION.0)
        .await;
    master.expect_nack(seq, ErrorCode::UnsupportedOpMode).await;

    master.register().await;
    let seq = master
        .register_as(uuid, OpMode::NonRealTime, PROTOCOL_VERSION.0)
        .await;
    master.expect_nack(seq, ErrorCode::IllegalState).await;

    shutdown.shut_down();
    assert!(matches!(handle.await.unwrap(), Err(NodeError::Interrupted)));
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn configuration_items_are_validated() {
    let network = MemoryNetwork::new();
    let (handle, shutdown) = spawn(&network, Probe::default(), NodeConfig::default()).await;
    let mut master = Master::open(&network).await;
    master.register().await;

    let seq = master
        .item(
            0,
            ConfigItem::TimeResolution {
                numerator: 1,
                denominator: 100,
            },
        )
        .await;
    master.expect_nack(seq, ErrorCode::UnsupportedResolution).await;
    let seq = master
        .item(1, ConfigItem::BindOutput { value_reference: 1 })
        .await;
    master.expect_nack(seq, ErrorCode::InvalidDirection).await;
    let bind = |value_reference, data_type| ConfigItem::BindInput {
        value_reference,
        data_type,
    };
    let seq = master.item(1, bind(7, DataType::Float64)).await;
    master.expect_nack(seq, ErrorCode::UnknownValueReference).await;
    let seq = master.item(1, bind(1, DataType::Int64)).await;
    master.expect_nack(seq, ErrorCode::IncompatibleDataType).await;
    let seq = master.item(1, ConfigItem::StepCount(0)).await;
    master.expect_nack(seq, ErrorCode::IncompleteConfiguration).await;

    let seq = master.command(StateCommand::Prepare).await;
    master.expect_nack(seq, ErrorCode::IncompleteConfiguration).await;
    let seq = master.command(StateCommand::DoStep { steps: 1 }).await;
    master.expect_nack(seq, ErrorCode::IllegalState).await;

    master.configure(vec![resolution()]).await;
    master
        .step_to(StateCommand::Prepare, NodeState::Prepared)
        .await;
    let seq = master.item(1, ConfigItem::StepCount(2)).await;
    master.expect_nack(seq, ErrorCode::IllegalState).await;

    shutdown.shut_down();
    assert!(handle.await.unwrap().is_err());
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn loopback_reads_the_previous_step() {
    let network = MemoryNetwork::new();
    let probe = Probe::default();
    let seen = probe.seen.clone();
    let (handle, _shutdown) = spawn(&network, probe, NodeConfig::default()).await;
    let mut master = Master::open(&network).await;

    master.register().await;
    master.configure(loopback()).await;
    master
        .step_to(StateCommand::Prepare, NodeState::Prepared)
        .await;
    master
        .step_to(StateCommand::Configure, NodeState::Configured)
        .await;
    master.step_to(StateCommand::Run, NodeState::Running).await;
    for _ in 0..3 {
        master
            .step_to(StateCommand::DoStep { steps: 1 }, NodeState::Computed)
            .await;
    }
    master.step_to(StateCommand::Stop, NodeState::Stopped).await;
    master
        .step_to(StateCommand::Deregister, NodeState::Deregistered)
        .await;

    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.node, NodeId::new(1));
    assert_eq!(report.steps, 3);
    assert_eq!(report.stale_inputs, 0);
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0], 0.0);
    assert!((seen[1] - 0.2).abs() < 1e-12);
    assert!((seen[2] - 0.4).abs() < 1e-12);
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn missing_input_is_reused_and_counted() {
    let network = MemoryNetwork::new();
    let config = NodeConfig::new().with_input_wait(Duration::from_millis(50));
    let (handle, _shutdown) = spawn(&network, Probe::default(), config).await;
    let mut master = Master::open(&network).await;

    master.register().await;
    master
        .configure(vec![
            resolution(),
            (
                2,
                ConfigItem::BindInput {
                    value_reference: 1,
                    data_type: DataType::Float64,
                },
            ),
            // Nobody sends from here
            (2, ConfigItem::SourceAddress(Endpoint::localhost(6101))),
        ])
        .await;
    master
        .step_to(StateCommand::Prepare, NodeState::Prepared)
        .await;
    master
        .step_to(StateCommand::Configure, NodeState::Configured)
        .await;
    master.step_to(StateCommand::Run, NodeState::Running).await;
    for _ in 0..2 {
        master
            .step_to(StateCommand::DoStep { steps: 1 }, NodeState::Computed)
            .await;
    }
    master.step_to(StateCommand::Stop, NodeState::Stopped).await;
    master
        .step_to(StateCommand::Deregister, NodeState::Deregistered)
        .await;

    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.steps, 2);
    // The first step runs on start values, only the second one waits
    assert_eq!(report.stale_inputs, 1);
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn commands_arriving_mid_step_wait_for_it() {
    let network = MemoryNetwork::new();
    let config = NodeConfig::new().with_input_wait(Duration::from_millis(100));
    let (handle, _shutdown) = spawn(&network, Probe::default(), config).await;
    let mut master = Master::open(&network).await;

    master.register().await;
    master
        .configure(vec![
            resolution(),
            (
                2,
                ConfigItem::BindInput {
                    value_reference: 1,
                    data_type: DataType::Float64,
                },
            ),
            (2, ConfigItem::SourceAddress(Endpoint::localhost(6101))),
        ])
        .await;
    master
        .step_to(StateCommand::Prepare, NodeState::Prepared)
        .await;
    master
        .step_to(StateCommand::Configure, NodeState::Configured)
        .await;
    master.step_to(StateCommand::Run, NodeState::Running).await;
    master
        .step_to(StateCommand::DoStep { steps: 1 }, NodeState::Computed)
        .await;

    // The second step waits for data that never comes
    let step = master.command(StateCommand::DoStep { steps: 1 }).await;
    let stop = master.command(StateCommand::Stop).await;
    master.expect_ack(step).await;
    master.expect_changed(NodeState::Computed).await;
    master.expect_ack(stop).await;
    master.expect_changed(NodeState::Stopped).await;
    master
        .step_to(StateCommand::Deregister, NodeState::Deregistered)
        .await;
    assert_eq!(handle.await.unwrap().unwrap().steps, 2);
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn engine_failure_is_reported_and_stops_the_node() {
    let network = MemoryNetwork::new();
    let probe = Probe {
        fail_at: Some(2),
        ..Probe::default()
    };
    let (handle, _shutdown) = spawn(&network, probe, NodeConfig::default()).await;
    let mut master = Master::open(&network).await;

    master.register().await;
    master.configure(loopback()).await;
    master
        .step_to(StateCommand::Prepare, NodeState::Prepared)
        .await;
    master
        .step_to(StateCommand::Configure, NodeState::Configured)
        .await;
    master.step_to(StateCommand::Run, NodeState::Running).await;
    master
        .step_to(StateCommand::DoStep { steps: 1 }, NodeState::Computed)
        .await;

    let seq = master.command(StateCommand::DoStep { steps: 1 }).await;
    master.expect_ack(seq).await;
    match master.recv().await {
        Pdu::Log {
            severity,
            template,
            values,
            ..
        } => {
            assert_eq!(severity, Severity::Fatal);
            assert_eq!(template, FAILURE_TEMPLATE);
            assert!(matches!(&values[..], [LogValue::String(message)] if message.contains("diverged")));
        }
        other => panic!("expected a LOG, got {:?}", other),
    }
    master.expect_changed(NodeState::Stopped).await;
    master
        .step_to(StateCommand::Deregister, NodeState::Deregistered)
        .await;

    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.steps, 1);
    assert!(report.failure.is_some());
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn step_logs_reach_the_orchestrator_when_enabled() {
    let network = MemoryNetwork::new();
    let config = NodeConfig::new().with_log_to_orchestrator(true);
    let (_handle, _shutdown) = spawn(&network, Probe::default(), config).await;
    let mut master = Master::open(&network).await;

    master.register().await;
    master.configure(vec![resolution()]).await;
    master
        .step_to(StateCommand::Prepare, NodeState::Prepared)
        .await;
    master
        .step_to(StateCommand::Configure, NodeState::Configured)
        .await;
    master.step_to(StateCommand::Run, NodeState::Running).await;
    let seq = master.command(StateCommand::DoStep { steps: 1 }).await;
    master.expect_ack(seq).await;
    match master.recv().await {
        Pdu::Log {
            template, values, ..
        } => {
            assert_eq!(template, STEP_TEMPLATE);
            assert_eq!(values.len(), 2);
        }
        other => panic!("expected a LOG, got {:?}", other),
    }
    master.expect_changed(NodeState::Computed).await;
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn silent_orchestrator_ends_the_node() {
    let network = MemoryNetwork::new();
    let config = NodeConfig::new().with_idle_timeout(Duration::from_millis(100));
    let (handle, _shutdown) = spawn(&network, Probe::default(), config).await;
    assert!(matches!(handle.await.unwrap(), Err(NodeError::Idle(_))));
}
