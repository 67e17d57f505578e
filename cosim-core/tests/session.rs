//! Whole sessions: an orchestrator and real node runtimes over an in-memory
//! network.

use cosim_core::{
    config::{NodeConfig, SessionConfig},
    descriptor::{ControlEndpoint, Descriptor, Direction, OpMode, Resolution, Variable, PROTOCOL_VERSION},
    id::{NodeId, SessionUuid, ValueReference},
    orchestrator::Phase,
    run_session,
    transports::MemoryNetwork,
    wiring::{Connection, Terminal},
    DataType, Endpoint, Engine, EngineError, NodeReport, NodeRuntime, Orchestrator, Pdu,
    SessionError, Shutdown, Value,
};
use std::{
    net::Ipv4Addr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::task::JoinHandle;

const ORCHESTRATOR: Endpoint = Endpoint::localhost(4000);

/// Outputs `2 * t` on vr 0.
struct Ramp {
    x: f64,
}

impl Engine for Ramp {
    fn initialize(&mut self, time: f64) -> Result<(), EngineError> {
        self.x = 2.0 * time;
        Ok(())
    }

    fn do_step(&mut self, time: f64, step: f64) -> Result<(), EngineError> {
        self.x = 2.0 * (time + step);
        Ok(())
    }

    fn read(&self, value_reference: ValueReference) -> Result<Value, EngineError> {
        match value_reference {
            0 => Ok(Value::Float64(self.x)),
            other => Err(EngineError::UnknownValueReference(other)),
        }
    }

    fn write(&mut self, value_reference: ValueReference, _value: Value) -> Result<(), EngineError> {
        Err(EngineError::UnknownValueReference(value_reference))
    }
}

/// Records the value of input vr 0 at every step.
#[derive(Default)]
struct Recorder {
    y: f64,
    seen: Arc<Mutex<Vec<f64>>>,
}

impl Engine for Recorder {
    fn initialize(&mut self, _time: f64) -> Result<(), EngineError> {
        Ok(())
    }

    fn do_step(&mut self, _time: f64, _step: f64) -> Result<(), EngineError> {
        self.seen.lock().unwrap().push(self.y);
        Ok(())
    }

    fn read(&self, value_reference: ValueReference) -> Result<Value, EngineError> {
        match value_reference {
            0 => Ok(Value::Float64(self.y)),
            other => Err(EngineError::UnknownValueReference(other)),
        }
    }

    fn write(&mut self, value_reference: ValueReference, value: Value) -> Result<(), EngineError> {
        match (value_reference, value) {
            (0, Value::Float64(y)) => {
                self.y = y;
                Ok(())
            }
            (0, other) => Err(EngineError::Type {
                value_reference,
                expected: DataType::Float64,
                actual: other.data_type(),
            }),
            (other, _) => Err(EngineError::UnknownValueReference(other)),
        }
    }
}

fn descriptor(name: &str, port: u16, variable: &str, direction: Direction) -> Descriptor {
    Descriptor {
        name: name.into(),
        uuid: SessionUuid([port as u8; 16]),
        version: PROTOCOL_VERSION,
        control: ControlEndpoint {
            host: Ipv4Addr::LOCALHOST,
            port,
            data_port: None,
        },
        op_modes: vec![OpMode::NonRealTime, OpMode::SoftRealTime],
        resolutions: vec![Resolution {
            numerator: 1,
            denominator: 10,
            fixed: true,
        }],
        variables: vec![Variable {
            name: variable.into(),
            value_reference: 0,
            direction,
            data_type: DataType::Float64,
            start: (direction == Direction::Input).then_some(Value::Float64(0.0)),
        }],
        log_categories: vec![],
        log_templates: vec![],
    }
}

fn node(id: u8) -> NodeId {
    NodeId::new(id).unwrap()
}

/// A ramp on port 5000 feeding a recorder on port 5010.
struct Session {
    descriptors: Vec<Descriptor>,
    nodes: Vec<JoinHandle<Result<NodeReport, cosim_core::node::NodeError>>>,
    seen: Arc<Mutex<Vec<f64>>>,
    shutdown: Shutdown,
}

impl Session {
    async fn spawn(network: &MemoryNetwork) -> Self {
        let a = descriptor("a", 5000, "x", Direction::Output);
        let b = descriptor("b", 5010, "y", Direction::Input);
        let recorder = Recorder::default();
        let seen = recorder.seen.clone();
        let shutdown = Shutdown::new();
        let config = NodeConfig::new().with_input_wait(Duration::from_millis(500));

        let mut nodes = vec![];
        let engines: Vec<Box<dyn Engine>> = vec![Box::new(Ramp { x: 0.0 }), Box::new(recorder)];
        for (descriptor, engine) in [a.clone(), b.clone()].into_iter().zip(engines) {
            let runtime = NodeRuntime::new(descriptor, engine, config.clone());
            let network = network.clone();
            let shutdown = shutdown.clone();
            nodes.push(tokio::spawn(async move { runtime.run(&network, shutdown).await }));
        }
        // Give the nodes time to open their endpoints
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            descriptors: vec![a, b],
            nodes,
            seen,
            shutdown,
        }
    }

    fn orchestrator(&self, config: SessionConfig) -> Orchestrator {
        let connection = Connection::new(Terminal::new(node(1), 0), vec![Terminal::new(node(2), 0)]);
        Orchestrator::new(self.descriptors.clone(), vec![connection], config).unwrap()
    }

    async fn reports(self) -> Vec<NodeReport> {
        let mut reports = vec![];
        for handle in self.nodes {
            reports.push(handle.await.unwrap().unwrap());
        }
        reports
    }
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(10000)]
async fn ramp_reaches_the_recorder_one_step_late() {
    let network = MemoryNetwork::new();
    let session = Session::spawn(&network).await;
    let config = SessionConfig::new().with_step(1, 10).with_stop_time(0.5);

    let report = run_session(
        &network,
        ORCHESTRATOR,
        session.orchestrator(config),
        Shutdown::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.steps, 5);
    assert!((report.final_time - 0.5).abs() < 1e-9);
    assert!(report.nodes.iter().all(|summary| summary.nacks == 0));

    let seen = session.seen.clone();
    let reports = session.reports().await;
    assert!(reports.iter().all(|report| report.steps == 5));
    assert!(reports.iter().all(|report| report.stale_inputs == 0));

    let seen = seen.lock().unwrap().clone();
    let expected = [0.0, 0.2, 0.4, 0.6, 0.8];
    assert_eq!(seen.len(), expected.len());
    for (seen, expected) in seen.iter().zip(expected) {
        assert!((seen - expected).abs() < 1e-9, "{:?}", seen);
    }
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(10000)]
async fn initialization_delivers_values_before_the_first_step() {
    let network = MemoryNetwork::new();
    let session = Session::spawn(&network).await;
    let config = SessionConfig::new()
        .with_step(1, 10)
        .with_stop_time(0.2)
        .with_initialization_passes(1);

    let report = run_session(
        &network,
        ORCHESTRATOR,
        session.orchestrator(config),
        Shutdown::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.steps, 2);
    let seen = session.seen.clone();
    session.reports().await;
    // The ramp's initial output is 2 * 0, then the first step's 0.2
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert!((seen[1] - 0.2).abs() < 1e-9);
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(10000)]
async fn lost_config_ack_stalls_the_session() {
    // Drop the second ACK node b sends, the one for its first config item
    let acks = AtomicUsize::new(0);
    let network = MemoryNetwork::with_drop_filter(move |from, to, bytes| {
        from == Endpoint::localhost(5010)
            && to == ORCHESTRATOR
            && matches!(Pdu::from_bytes(bytes.iter().copied()), Ok(Pdu::Ack { .. }))
            && acks.fetch_add(1, Ordering::SeqCst) == 1
    });
    let session = Session::spawn(&network).await;
    let config = SessionConfig::new()
        .with_phase_timeout(Duration::from_millis(300))
        .with_abort_window(Duration::from_millis(300));

    let error = run_session(
        &network,
        ORCHESTRATOR,
        session.orchestrator(config),
        Shutdown::new(),
    )
    .await
    .unwrap_err();
    assert!(
        matches!(
            error,
            SessionError::Stalled {
                phase: Phase::Configuration,
                ..
            }
        ),
        "{}",
        error
    );
    assert_eq!(error.node(), Some(node(2)));
    session.shutdown.shut_down();
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(10000)]
async fn real_time_session_keeps_to_the_wall_clock() {
    let network = MemoryNetwork::new();
    let session = Session::spawn(&network).await;
    let config = SessionConfig::new()
        .with_step(1, 10)
        .with_stop_time(1.0)
        .with_op_mode(OpMode::SoftRealTime)
        .with_sync_lead(Duration::from_millis(200));

    let report = run_session(
        &network,
        ORCHESTRATOR,
        session.orchestrator(config),
        Shutdown::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.steps, 10);
    let elapsed = report.run_duration().unwrap();
    assert!(elapsed >= Duration::from_secs(1), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "{:?}", elapsed);
    session.reports().await;
}

#[tokio::test(flavor = "multi_thread")]
#[ntest::timeout(10000)]
async fn shutdown_aborts_a_running_session() {
    let network = MemoryNetwork::new();
    let session = Session::spawn(&network).await;
    let config = SessionConfig::new()
        .with_step(1, 10)
        .with_stop_time(100.0)
        .with_op_mode(OpMode::SoftRealTime);
    let shutdown = Shutdown::new();

    let stop = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(800)).await;
        stop.shut_down();
    });
    let error = run_session(&network, ORCHESTRATOR, session.orchestrator(config), shutdown)
        .await
        .unwrap_err();
    assert!(matches!(error, SessionError::Aborted));
    // Every node was stopped and deregistered
    session.reports().await;
}
