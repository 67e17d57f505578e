//! Core of a co-simulation platform: an orchestrator that drives a set of
//! independent simulation nodes through a common lifecycle, and the runtime
//! that serves one node.
//!
//! Nodes exchange coupled variable values directly with each other over a
//! datagram transport. The orchestrator never sees those values; it only
//! moves every node through the same sequence of states and keeps their
//! communication steps in lock-step.
//!
//! # Organization
//! - [`Pdu`] is the wire format shared by both sides
//! - [`Orchestrator`] and [`run_session`] drive a session
//! - [`NodeRuntime`] serves one node on behalf of an [`Engine`]
//! - [`Network`] abstracts the transport; [`transports`] has UDP and
//!   in-memory implementations
//! - [`Descriptor`] is the static description of a node and [`Wiring`] the
//!   list of connections between nodes

pub(crate) mod bytes;
pub mod logging;

pub mod clock;
pub use clock::SessionClock;

pub mod config;
pub use config::{NodeConfig, SessionConfig};

pub mod descriptor;
pub use descriptor::Descriptor;

pub mod id;
pub use id::{DataId, NodeId, SessionUuid, ValueReference};

pub mod node;
pub use node::{Engine, EngineError, NodeReport, NodeRuntime};

pub mod orchestrator;
pub use orchestrator::{run_session, Orchestrator, SessionError, SessionReport};

pub mod pdu;
pub use pdu::Pdu;

pub mod shutdown;
pub use shutdown::{ExitStatus, Shutdown};

pub mod state;
pub use state::NodeState;

pub mod transport;
pub use transport::{Endpoint, Network, Transport};

pub mod transports;

pub mod value;
pub use value::{DataType, Value};

pub mod wiring;
pub use wiring::Wiring;
