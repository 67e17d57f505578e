//! The protocol's message catalog.
//!
//! Every PDU is self-describing: a one-byte type tag followed by big-endian
//! fields. See [`pdu_parsing`] for the exact layout.

use crate::{
    descriptor::OpMode,
    id::{CommandSeq, DataId, NodeId, SessionUuid, ValueReference},
    state::{CommandKind, NodeState},
    transport::Endpoint,
    value::{DataType, Value},
};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

pub mod pdu_parsing;
pub use pdu_parsing::{BuildError, ParseError};

/// One discrete protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Pdu {
    Register {
        node: NodeId,
        seq: CommandSeq,
        state: NodeState,
        uuid: SessionUuid,
        mode: OpMode,
        major: u8,
        minor: u8,
    },
    StateTransition {
        node: NodeId,
        seq: CommandSeq,
        command: StateCommand,
        /// Milliseconds since the Unix epoch.
        deadline: Option<u64>,
    },
    ConfigItem {
        node: NodeId,
        seq: CommandSeq,
        data_id: DataId,
        item: ConfigItem,
    },
    Ack {
        node: NodeId,
        seq: CommandSeq,
    },
    Nack {
        node: NodeId,
        seq: CommandSeq,
        code: ErrorCode,
    },
    StateChanged {
        node: NodeId,
        state: NodeState,
    },
    Data {
        data_id: DataId,
        /// The communication step that produced the value. Zero for values
        /// sent during initialization.
        step: u64,
        payload: Vec<u8>,
    },
    Log {
        node: NodeId,
        category: u8,
        severity: Severity,
        template: u8,
        values: Vec<LogValue>,
    },
}

impl Pdu {
    /// The node a control PDU concerns. `DATA` is addressed by data id only.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Pdu::Register { node, .. }
            | Pdu::StateTransition { node, .. }
            | Pdu::ConfigItem { node, .. }
            | Pdu::Ack { node, .. }
            | Pdu::Nack { node, .. }
            | Pdu::StateChanged { node, .. }
            | Pdu::Log { node, .. } => Some(*node),
            Pdu::Data { .. } => None,
        }
    }

    /// A short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Pdu::Register { .. } => "REGISTER",
            Pdu::StateTransition { .. } => "STATE_TRANSITION",
            Pdu::ConfigItem { .. } => "CONFIG_ITEM",
            Pdu::Ack { .. } => "ACK",
            Pdu::Nack { .. } => "NACK",
            Pdu::StateChanged { .. } => "STATE_CHANGED",
            Pdu::Data { .. } => "DATA",
            Pdu::Log { .. } => "LOG",
        }
    }
}

/// The lifecycle command carried by a `STATE_TRANSITION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateCommand {
    Prepare,
    Configure,
    Initialize,
    Run,
    DoStep { steps: u32 },
    Stop,
    Deregister,
}

impl StateCommand {
    pub fn kind(self) -> CommandKind {
        match self {
            StateCommand::Prepare => CommandKind::Prepare,
            StateCommand::Configure => CommandKind::Configure,
            StateCommand::Initialize => CommandKind::Initialize,
            StateCommand::Run => CommandKind::Run,
            StateCommand::DoStep { .. } => CommandKind::DoStep,
            StateCommand::Stop => CommandKind::Stop,
            StateCommand::Deregister => CommandKind::Deregister,
        }
    }
}

impl Display for StateCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StateCommand::Prepare => write!(f, "prepare"),
            StateCommand::Configure => write!(f, "configure"),
            StateCommand::Initialize => write!(f, "initialize"),
            StateCommand::Run => write!(f, "run"),
            StateCommand::DoStep { steps } => write!(f, "doStep({})", steps),
            StateCommand::Stop => write!(f, "stop"),
            StateCommand::Deregister => write!(f, "deregister"),
        }
    }
}

/// When a binding is active.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    Initialization = 0,
    Run = 1,
    InitializationRun = 2,
}

impl Scope {
    pub fn includes_initialization(self) -> bool {
        matches!(self, Scope::Initialization | Scope::InitializationRun)
    }

    pub fn includes_run(self) -> bool {
        matches!(self, Scope::Run | Scope::InitializationRun)
    }
}

/// One piece of wiring or timing configuration sent to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigItem {
    Scope(Scope),
    BindOutput {
        value_reference: ValueReference,
    },
    BindInput {
        value_reference: ValueReference,
        data_type: DataType,
    },
    StepCount(u32),
    /// The data endpoint coupling values for this data id come from.
    SourceAddress(Endpoint),
    /// A data endpoint coupling values for this data id must be sent to.
    TargetAddress(Endpoint),
    TimeResolution {
        numerator: u32,
        denominator: u32,
    },
}

/// Why a node rejected a command.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorCode {
    #[error("command is illegal in the current state")]
    IllegalState = 1,
    #[error("protocol version mismatch")]
    VersionMismatch = 2,
    #[error("session UUID does not match the descriptor")]
    UuidMismatch = 3,
    #[error("operating mode not supported")]
    UnsupportedOpMode = 4,
    #[error("unknown value reference")]
    UnknownValueReference = 5,
    #[error("variable direction does not fit the binding")]
    InvalidDirection = 6,
    #[error("data type does not match the variable")]
    IncompatibleDataType = 7,
    #[error("communication step resolution not supported")]
    UnsupportedResolution = 8,
    #[error("configuration is incomplete")]
    IncompleteConfiguration = 9,
    #[error("the data endpoint could not be opened")]
    DataEndpoint = 10,
    #[error("the engine failed")]
    EngineFailure = 11,
}

impl TryFrom<u8> for ErrorCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use ErrorCode::*;
        [
            IllegalState,
            VersionMismatch,
            UuidMismatch,
            UnsupportedOpMode,
            UnknownValueReference,
            InvalidDirection,
            IncompatibleDataType,
            UnsupportedResolution,
            IncompleteConfiguration,
            DataEndpoint,
            EngineFailure,
        ]
        .into_iter()
        .find(|code| *code as u8 == value)
        .ok_or(value)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Fatal = 0,
    Error = 1,
    Warning = 2,
    Information = 3,
    Debug = 4,
}

impl Severity {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Severity::Fatal),
            1 => Some(Severity::Error),
            2 => Some(Severity::Warning),
            3 => Some(Severity::Information),
            4 => Some(Severity::Debug),
            _ => None,
        }
    }
}

/// The template id a node uses to report its own failure. The record carries
/// a single string and needs no descriptor template.
pub const FAILURE_TEMPLATE: u8 = 0;

/// A value substituted into a log template placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum LogValue {
    Float64(f64),
    Int64(i64),
    UInt64(u64),
    String(String),
}

impl From<Value> for LogValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Float64(v) => LogValue::Float64(v),
            Value::Int64(v) => LogValue::Int64(v),
            Value::Boolean(v) => LogValue::UInt64(v as u64),
        }
    }
}

impl Display for LogValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LogValue::Float64(v) => write!(f, "{}", v),
            LogValue::Int64(v) => write!(f, "{}", v),
            LogValue::UInt64(v) => write!(f, "{}", v),
            LogValue::String(v) => f.write_str(v),
        }
    }
}
