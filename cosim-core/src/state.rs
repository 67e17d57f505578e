//! The per-node lifecycle state machine.

use crate::{descriptor::OpMode, pdu::ErrorCode};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// The lifecycle state of a node. The legal moves between states are
/// described by the diagram below; a command not shown for a state is
/// rejected and leaves the state unchanged.
///
/// ```text
///   IDLE --register--> REGISTERING (accepts CONFIG_ITEMs)
///   REGISTERING --prepare--> [PREPARING] --> PREPARED
///   PREPARED --configure--> [CONFIGURING] --> CONFIGURED
///   CONFIGURED --initialize--> [INITIALIZING] --> CONFIGURED
///   CONFIGURED --run--> RUNNING                       (non-real-time)
///   CONFIGURED --run--> [SYNCHRONIZING] --> SYNCHRONIZED --run--> RUNNING
///   RUNNING | COMPUTED --doStep--> [STEPPING] --> COMPUTED
///   any registered, not yet stopping --stop--> [STOPPING] --> STOPPED
///   STOPPED --deregister--> DEREGISTERED
/// ```
///
/// States in brackets are transient: the node sits in them only while the
/// side effect of a command runs, and never reports them.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Alive but not part of a session.
    Idle = 0,
    /// Registered and collecting configuration items.
    Registering = 1,
    /// Validating the collected configuration.
    Preparing = 2,
    /// Configuration validated, waiting for `configure`.
    Prepared = 3,
    /// Binding variables and opening the data endpoint.
    Configuring = 4,
    /// Bindings live; initialization passes or `run` may follow.
    Configured = 5,
    /// Running one initialization pass.
    Initializing = 6,
    /// Waiting for the real-time start deadline.
    Synchronizing = 7,
    /// Real-time start deadline reached, waiting for the final `run`.
    Synchronized = 8,
    /// Ready to step.
    Running = 9,
    /// Advancing the engine and transmitting outputs.
    Stepping = 10,
    /// Finished a step and transmitted its outputs.
    Computed = 11,
    /// Releasing the data endpoint.
    Stopping = 12,
    /// Stopped, waiting for `deregister`.
    Stopped = 13,
    /// Left the session. Terminal.
    Deregistered = 14,
}

impl NodeState {
    pub const ALL: [NodeState; 15] = [
        NodeState::Idle,
        NodeState::Registering,
        NodeState::Preparing,
        NodeState::Prepared,
        NodeState::Configuring,
        NodeState::Configured,
        NodeState::Initializing,
        NodeState::Synchronizing,
        NodeState::Synchronized,
        NodeState::Running,
        NodeState::Stepping,
        NodeState::Computed,
        NodeState::Stopping,
        NodeState::Stopped,
        NodeState::Deregistered,
    ];

    /// Whether the node can sit in this state between commands.
    pub fn is_settled(self) -> bool {
        !matches!(
            self,
            NodeState::Preparing
                | NodeState::Configuring
                | NodeState::Initializing
                | NodeState::Synchronizing
                | NodeState::Stepping
                | NodeState::Stopping
        )
    }
}

impl TryFrom<u8> for NodeState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        NodeState::ALL
            .get(value as usize)
            .copied()
            .ok_or(value)
    }
}

impl Display for NodeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Idle => "IDLE",
            NodeState::Registering => "REGISTERING",
            NodeState::Preparing => "PREPARING",
            NodeState::Prepared => "PREPARED",
            NodeState::Configuring => "CONFIGURING",
            NodeState::Configured => "CONFIGURED",
            NodeState::Initializing => "INITIALIZING",
            NodeState::Synchronizing => "SYNCHRONIZING",
            NodeState::Synchronized => "SYNCHRONIZED",
            NodeState::Running => "RUNNING",
            NodeState::Stepping => "STEPPING",
            NodeState::Computed => "COMPUTED",
            NodeState::Stopping => "STOPPING",
            NodeState::Stopped => "STOPPED",
            NodeState::Deregistered => "DEREGISTERED",
        };
        f.write_str(name)
    }
}

/// The command families a node can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Register,
    ConfigItem,
    Prepare,
    Configure,
    Initialize,
    Run,
    DoStep,
    Stop,
    Deregister,
}

impl CommandKind {
    pub const ALL: [CommandKind; 9] = [
        CommandKind::Register,
        CommandKind::ConfigItem,
        CommandKind::Prepare,
        CommandKind::Configure,
        CommandKind::Initialize,
        CommandKind::Run,
        CommandKind::DoStep,
        CommandKind::Stop,
        CommandKind::Deregister,
    ];
}

/// An accepted command: the state the node holds while the side effect runs
/// and the state it settles in afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub during: NodeState,
    pub settled: NodeState,
    /// Whether settling is announced with a `STATE_CHANGED`.
    pub reports: bool,
}

impl Transition {
    const fn to(during: NodeState, settled: NodeState) -> Self {
        Self {
            during,
            settled,
            reports: true,
        }
    }
}

/// The legal command table. Returns `None` for every pair the node must
/// reject.
pub fn transition(state: NodeState, command: CommandKind, real_time: bool) -> Option<Transition> {
    use CommandKind as C;
    use NodeState as S;
    let transition = match (state, command) {
        (S::Idle, C::Register) => Transition::to(S::Registering, S::Registering),
        (S::Registering, C::ConfigItem) => Transition {
            during: S::Registering,
            settled: S::Registering,
            reports: false,
        },
        (S::Registering, C::Prepare) => Transition::to(S::Preparing, S::Prepared),
        (S::Prepared, C::Configure) => Transition::to(S::Configuring, S::Configured),
        (S::Configured, C::Initialize) => Transition::to(S::Initializing, S::Configured),
        (S::Configured, C::Run) if real_time => Transition::to(S::Synchronizing, S::Synchronized),
        (S::Configured, C::Run) => Transition::to(S::Running, S::Running),
        (S::Synchronized, C::Run) => Transition::to(S::Running, S::Running),
        (S::Running | S::Computed, C::DoStep) => Transition::to(S::Stepping, S::Computed),
        (
            S::Registering
            | S::Prepared
            | S::Configured
            | S::Synchronizing
            | S::Synchronized
            | S::Running
            | S::Computed,
            C::Stop,
        ) => Transition::to(S::Stopping, S::Stopped),
        (S::Stopped, C::Deregister) => Transition::to(S::Deregistered, S::Deregistered),
        _ => return None,
    };
    Some(transition)
}

/// Holds one node's lifecycle state and enforces the command table.
#[derive(Debug, Clone)]
pub struct NodeStateMachine {
    state: NodeState,
    mode: OpMode,
}

impl NodeStateMachine {
    pub fn new() -> Self {
        Self {
            state: NodeState::Idle,
            mode: OpMode::NonRealTime,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn mode(&self) -> OpMode {
        self.mode
    }

    /// Sets the operating mode negotiated at registration.
    pub fn set_mode(&mut self, mode: OpMode) {
        self.mode = mode;
    }

    /// Checks `command` against the table and, when legal, moves into the
    /// transient state for its side effect. An illegal command leaves the
    /// state untouched.
    pub fn accept(&mut self, command: CommandKind) -> Result<Transition, ErrorCode> {
        let transition =
            transition(self.state, command, self.mode.is_real_time()).ok_or(ErrorCode::IllegalState)?;
        self.state = transition.during;
        Ok(transition)
    }

    /// Settles after the side effect of an accepted command completed.
    pub fn complete(&mut self, transition: Transition) -> NodeState {
        self.state = transition.settled;
        self.state
    }

    /// Settles in `STOPPED` after a side effect failed. Returns `None` when the
    /// node was not in a state a failure can occur in.
    pub fn fail(&mut self) -> Option<NodeState> {
        if matches!(self.state, NodeState::Idle | NodeState::Deregistered) {
            return None;
        }
        self.state = NodeState::Stopped;
        Some(self.state)
    }
}

impl Default for NodeStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
