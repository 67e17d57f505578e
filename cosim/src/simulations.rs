//! Prebuilt sessions that run every node in this process over an in-memory
//! network.

use crate::{
    models::{Model, ModelError},
    session_file::ConnectionSpec,
};
use cosim_core::{
    descriptor::OpMode,
    node::NodeError,
    transports::MemoryNetwork,
    wiring::WiringError,
    Descriptor, Endpoint, NodeConfig, NodeReport, NodeRuntime, Orchestrator, SessionConfig,
    SessionError, SessionReport, Shutdown,
};
use std::{net::Ipv4Addr, time::Duration};
use thiserror::Error as ThisError;

const ORCHESTRATOR: Endpoint = Endpoint::localhost(4000);
const FIRST_NODE_PORT: u16 = 5000;

/// Everything a finished in-process session reports.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub session: SessionReport,
    pub nodes: Vec<NodeReport>,
}

#[derive(Debug, ThisError)]
pub enum SimulationError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Wiring(#[from] WiringError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Node {name} failed: {error}")]
    Node { name: String, error: NodeError },
    #[error("A node task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A ramp feeding a gain of 2, stepped as fast as the nodes allow.
pub async fn ramp_gain() -> Result<Outcome, SimulationError> {
    run_in_process(
        MemoryNetwork::new(),
        &[
            ("ramp", Model::Ramp { slope: 1.0 }),
            ("gain", Model::Gain { gain: 2.0 }),
        ],
        &[("ramp.y", "gain.u")],
        SessionConfig::new().with_step(1, 10).with_stop_time(1.0),
    )
    .await
}

/// A sine integrated in soft real time, one step every 100 ms.
pub async fn sine_integrator_real_time() -> Result<Outcome, SimulationError> {
    run_in_process(
        MemoryNetwork::new(),
        &[
            (
                "sine",
                Model::Sine {
                    amplitude: 1.0,
                    frequency: 0.5,
                },
            ),
            ("sum", Model::Integrator),
        ],
        &[("sine.y", "sum.u")],
        SessionConfig::new()
            .with_step(1, 10)
            .with_stop_time(1.0)
            .with_op_mode(OpMode::SoftRealTime)
            .with_sync_lead(Duration::from_millis(200)),
    )
    .await
}

/// A three-node chain over a network that loses some datagrams. Lost coupling
/// data shows up as stale input reads; a lost control PDU stalls the session.
pub async fn lossy_chain(loss_rate: f64) -> Result<Outcome, SimulationError> {
    run_in_process(
        MemoryNetwork::lossy(loss_rate),
        &[
            ("ramp", Model::Ramp { slope: 1.0 }),
            ("gain", Model::Gain { gain: 0.5 }),
            ("sum", Model::Integrator),
        ],
        &[("ramp.y", "gain.u"), ("gain.y", "sum.u")],
        SessionConfig::new()
            .with_step(1, 10)
            .with_stop_time(2.0)
            .with_phase_timeout(Duration::from_secs(1)),
    )
    .await
}

/// Runs a session of built-in models. Node `i` listens on port
/// `5000 + 10 * i`. Each connection feeds one `node.variable` output into one
/// `node.variable` input.
pub async fn run_in_process(
    network: MemoryNetwork,
    nodes: &[(&str, Model)],
    connections: &[(&str, &str)],
    config: SessionConfig,
) -> Result<Outcome, SimulationError> {
    let (numerator, denominator) = config.step();
    let step = f64::from(numerator) / f64::from(denominator);
    let descriptors = nodes
        .iter()
        .zip((FIRST_NODE_PORT..).step_by(10))
        .map(|((name, model), port)| model.descriptor(name, Ipv4Addr::LOCALHOST, port, step))
        .collect::<Result<Vec<Descriptor>, _>>()?;
    let connections = connections
        .iter()
        .map(|(source, target)| {
            ConnectionSpec {
                source: (*source).into(),
                targets: vec![(*target).into()],
                scope: None,
                step_count: None,
            }
            .resolve(&descriptors)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let orchestrator = Orchestrator::new(descriptors.clone(), connections, config)?;
    let shutdown = Shutdown::new();
    let node_config = NodeConfig::new().with_input_wait(Duration::from_millis(100));
    let handles: Vec<_> = nodes
        .iter()
        .zip(descriptors)
        .map(|((_, model), descriptor)| {
            let runtime = NodeRuntime::new(descriptor, model.engine(), node_config.clone());
            let network = network.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { runtime.run(&network, shutdown).await })
        })
        .collect();
    // Let every node open its endpoints before registration
    tokio::time::sleep(Duration::from_millis(20)).await;

    let session = cosim_core::run_session(&network, ORCHESTRATOR, orchestrator, Shutdown::new()).await;
    if session.is_err() {
        shutdown.shut_down();
    }
    let results = futures::future::join_all(handles).await;
    let session = session?;

    let mut reports = vec![];
    for ((name, _), result) in nodes.iter().zip(results) {
        let report = result?.map_err(|error| SimulationError::Node {
            name: (*name).into(),
            error,
        })?;
        reports.push(report);
    }
    Ok(Outcome {
        session,
        nodes: reports,
    })
}
