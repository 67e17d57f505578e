use super::Phase;
use crate::{
    descriptor::Descriptor,
    id::{CommandSeq, DataId, NodeId},
    pdu::{ConfigItem, Pdu, StateCommand},
    state::{CommandKind, NodeState},
    transport::Endpoint,
};
use rustc_hash::{FxHashMap, FxHashSet};

/// What the orchestrator knows about one node.
pub(super) struct NodeRecord {
    pub id: NodeId,
    pub descriptor: Descriptor,
    /// The last settled state the node reported, cleared whenever a new
    /// lifecycle command is sent so that a gate never fires twice.
    pub state: Option<NodeState>,
    /// The last state the node reported, never cleared.
    pub last_reported: Option<NodeState>,
    pub registered: bool,
    pub nacks: u32,
    next_seq: CommandSeq,
    commands: FxHashMap<CommandSeq, CommandKind>,
    in_flight: Option<CommandKind>,
    config_expected: usize,
    config_acked: FxHashSet<CommandSeq>,
    prepare_sent: bool,
    deregister_sent: bool,
}

/// What an `ACK` meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Acked {
    /// The last outstanding configuration item. Returned once per node.
    ConfigComplete,
    ConfigItem,
    Command(CommandKind),
    /// A duplicate or an `ACK` for nothing this record sent.
    Unknown,
}

impl NodeRecord {
    pub fn new(id: NodeId, descriptor: Descriptor) -> Self {
        Self {
            id,
            descriptor,
            state: None,
            last_reported: None,
            registered: false,
            nacks: 0,
            next_seq: 0,
            commands: FxHashMap::default(),
            in_flight: None,
            config_expected: 0,
            config_acked: FxHashSet::default(),
            prepare_sent: false,
            deregister_sent: false,
        }
    }

    pub fn control(&self) -> Endpoint {
        self.descriptor.control_endpoint()
    }

    fn take_seq(&mut self, kind: CommandKind) -> CommandSeq {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.commands.insert(seq, kind);
        seq
    }

    /// Builds a lifecycle command and marks it in flight.
    pub fn command(&mut self, command: StateCommand, deadline: Option<u64>) -> Pdu {
        let kind = command.kind();
        let seq = self.take_seq(kind);
        self.state = None;
        self.in_flight = Some(kind);
        if kind == CommandKind::Prepare {
            self.prepare_sent = true;
        }
        if kind == CommandKind::Deregister {
            self.deregister_sent = true;
        }
        Pdu::StateTransition {
            node: self.id,
            seq,
            command,
            deadline,
        }
    }

    pub fn register(&mut self, pdu: impl FnOnce(NodeId, CommandSeq) -> Pdu) -> Pdu {
        let seq = self.take_seq(CommandKind::Register);
        self.state = None;
        self.in_flight = Some(CommandKind::Register);
        pdu(self.id, seq)
    }

    /// Builds one `CONFIG_ITEM` per planned item and sets the number of
    /// acknowledgments the node owes before it may prepare.
    pub fn configure(&mut self, plan: Vec<(DataId, ConfigItem)>) -> Vec<Pdu> {
        self.config_expected = plan.len();
        self.config_acked.clear();
        plan.into_iter()
            .map(|(data_id, item)| Pdu::ConfigItem {
                node: self.id,
                seq: self.take_seq(CommandKind::ConfigItem),
                data_id,
                item,
            })
            .collect()
    }

    pub fn on_ack(&mut self, seq: CommandSeq) -> Acked {
        match self.commands.get(&seq).copied() {
            Some(CommandKind::ConfigItem) => {
                if !self.config_acked.insert(seq) {
                    return Acked::Unknown;
                }
                if self.config_acked.len() == self.config_expected && !self.prepare_sent {
                    Acked::ConfigComplete
                } else {
                    Acked::ConfigItem
                }
            }
            Some(kind) => {
                if kind == CommandKind::Register {
                    self.registered = true;
                }
                Acked::Command(kind)
            }
            None => Acked::Unknown,
        }
    }

    pub fn command_kind(&self, seq: CommandSeq) -> Option<CommandKind> {
        self.commands.get(&seq).copied()
    }

    pub fn on_state(&mut self, state: NodeState) {
        if state != NodeState::Idle {
            self.registered = true;
        }
        self.state = Some(state);
        self.last_reported = Some(state);
        self.in_flight = None;
    }

    pub fn in_flight(&self) -> Option<CommandKind> {
        self.in_flight
    }

    pub fn is_stopped(&self) -> bool {
        matches!(
            self.last_reported,
            Some(NodeState::Stopped | NodeState::Deregistered)
        )
    }

    /// A real-time node past its run command may stop on its own before its
    /// `STATE_CHANGED(STOPPED)` arrives.
    pub fn may_stop_itself(&self) -> bool {
        matches!(
            self.last_reported,
            Some(NodeState::Running | NodeState::Computed)
        )
    }

    pub fn is_deregistered(&self) -> bool {
        self.last_reported == Some(NodeState::Deregistered)
    }

    pub fn deregister_sent(&self) -> bool {
        self.deregister_sent
    }

    /// Whether the node owes the orchestrator an answer, and if so in which
    /// phase and for what.
    pub fn outstanding(&self) -> Option<(Phase, String)> {
        if self.config_expected > 0 && !self.prepare_sent {
            return Some((
                Phase::Configuration,
                format!(
                    "acknowledged {} of {} configuration items",
                    self.config_acked.len(),
                    self.config_expected
                ),
            ));
        }
        self.in_flight
            .map(|kind| (Phase::of(kind), format!("no answer to {:?}", kind)))
    }
}
