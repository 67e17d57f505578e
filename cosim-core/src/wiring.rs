//! The static wiring list of a session and the configuration each node
//! receives from it.

use crate::{
    descriptor::{Descriptor, Direction},
    id::{DataId, NodeId, ValueReference},
    pdu::{ConfigItem, Scope},
    value::DataType,
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use thiserror::Error as ThisError;

/// One variable of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Terminal {
    pub node: NodeId,
    pub value_reference: ValueReference,
}

impl Terminal {
    pub fn new(node: NodeId, value_reference: ValueReference) -> Self {
        Self {
            node,
            value_reference,
        }
    }

    /// Looks up a `node.variable` path against the descriptors of a session.
    /// Node names are matched against [`Descriptor::name`].
    pub fn by_name(descriptors: &[Descriptor], path: &str) -> Result<Self, WiringError> {
        let (node_name, variable_name) = path
            .split_once('.')
            .ok_or_else(|| WiringError::MalformedPath(path.into()))?;
        let index = descriptors
            .iter()
            .position(|descriptor| descriptor.name == node_name)
            .ok_or_else(|| WiringError::UnknownNodeName(node_name.into()))?;
        let variable = descriptors[index]
            .variable_by_name(variable_name)
            .ok_or_else(|| WiringError::UnknownVariableName(path.into()))?;
        let node = NodeId::from_index(index).ok_or(WiringError::TooManyNodes(descriptors.len()))?;
        Ok(Self::new(node, variable.value_reference))
    }
}

impl Display for Terminal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "node {} vr {}", self.node, self.value_reference)
    }
}

/// An output of one node feeding inputs of one or more nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub source: Terminal,
    pub targets: Vec<Terminal>,
    #[serde(default = "default_scope")]
    pub scope: Scope,
    /// The source transmits every `step_count` communication steps.
    #[serde(default = "default_step_count")]
    pub step_count: u32,
}

fn default_scope() -> Scope {
    Scope::InitializationRun
}

fn default_step_count() -> u32 {
    1
}

impl Connection {
    pub fn new(source: Terminal, targets: Vec<Terminal>) -> Self {
        Self {
            source,
            targets,
            scope: default_scope(),
            step_count: default_step_count(),
        }
    }
}

/// A validated wiring list. Each connection owns the data id `position + 1`.
#[derive(Debug, Clone, Default)]
pub struct Wiring {
    connections: Vec<(DataId, Connection, DataType)>,
}

impl Wiring {
    /// Checks every connection against the node descriptors: terminals must
    /// exist, sources must be outputs, targets inputs of the same data type,
    /// and no input may be fed by two connections.
    pub fn new(descriptors: &[Descriptor], connections: Vec<Connection>) -> Result<Self, WiringError> {
        if descriptors.len() > NodeId::MAX.into_inner() as usize {
            return Err(WiringError::TooManyNodes(descriptors.len()));
        }
        let mut fed_inputs = FxHashMap::default();
        let mut validated = Vec::with_capacity(connections.len());
        for (index, connection) in connections.into_iter().enumerate() {
            let data_id = DataId::try_from(index + 1)
                .map_err(|_| WiringError::TooManyConnections(index + 1))?;
            if connection.targets.is_empty() {
                return Err(WiringError::NoTargets(connection.source));
            }
            if connection.step_count == 0 {
                return Err(WiringError::ZeroStepCount(connection.source));
            }
            let data_type = check(descriptors, connection.source, Direction::Output)?;
            for target in connection.targets.iter() {
                let target_type = check(descriptors, *target, Direction::Input)?;
                if target_type != data_type {
                    return Err(WiringError::DataType {
                        output: connection.source,
                        input: *target,
                    });
                }
                if let Some(previous) = fed_inputs.insert(*target, data_id) {
                    return Err(WiringError::InputFedTwice {
                        target: *target,
                        first: previous,
                        second: data_id,
                    });
                }
            }
            validated.push((data_id, connection, data_type));
        }
        Ok(Self {
            connections: validated,
        })
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn connections(&self) -> impl Iterator<Item = (DataId, &Connection)> {
        self.connections
            .iter()
            .map(|(data_id, connection, _)| (*data_id, connection))
    }

    /// The configuration items `node` must acknowledge before it may prepare,
    /// in the order they are sent. The first item is always the time
    /// resolution. The source of a connection learns the data endpoint of
    /// every target and each target learns the data endpoint of the source.
    pub fn config_plan(
        &self,
        node: NodeId,
        descriptors: &[Descriptor],
        step: (u32, u32),
    ) -> Vec<(DataId, ConfigItem)> {
        let mut plan = vec![(
            0,
            ConfigItem::TimeResolution {
                numerator: step.0,
                denominator: step.1,
            },
        )];
        let data_endpoint = |node: NodeId| {
            descriptors
                .get(node.index())
                .map(|descriptor| descriptor.data_endpoint())
        };
        for (data_id, connection, data_type) in self.connections.iter() {
            let data_id = *data_id;
            if connection.source.node == node {
                plan.push((data_id, ConfigItem::Scope(connection.scope)));
                plan.push((
                    data_id,
                    ConfigItem::BindOutput {
                        value_reference: connection.source.value_reference,
                    },
                ));
                plan.push((data_id, ConfigItem::StepCount(connection.step_count)));
                for target in connection.targets.iter() {
                    if let Some(endpoint) = data_endpoint(target.node) {
                        plan.push((data_id, ConfigItem::TargetAddress(endpoint)));
                    }
                }
            }
            for target in connection.targets.iter().filter(|t| t.node == node) {
                plan.push((data_id, ConfigItem::Scope(connection.scope)));
                plan.push((
                    data_id,
                    ConfigItem::BindInput {
                        value_reference: target.value_reference,
                        data_type: *data_type,
                    },
                ));
                plan.push((data_id, ConfigItem::StepCount(connection.step_count)));
                if let Some(endpoint) = data_endpoint(connection.source.node) {
                    plan.push((data_id, ConfigItem::SourceAddress(endpoint)));
                }
            }
        }
        plan
    }
}

fn check(
    descriptors: &[Descriptor],
    terminal: Terminal,
    direction: Direction,
) -> Result<DataType, WiringError> {
    let descriptor = descriptors
        .get(terminal.node.index())
        .ok_or(WiringError::UnknownNode(terminal.node))?;
    let variable = descriptor
        .variable(terminal.value_reference)
        .ok_or(WiringError::UnknownVariable(terminal))?;
    if variable.direction != direction {
        return Err(WiringError::Direction {
            terminal,
            expected: direction,
            actual: variable.direction,
        });
    }
    Ok(variable.data_type)
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum WiringError {
    #[error("Node {0} is not part of the session")]
    UnknownNode(NodeId),
    #[error("No node is named {0:?}")]
    UnknownNodeName(String),
    #[error("{0} does not name a declared variable")]
    UnknownVariable(Terminal),
    #[error("No variable matches {0:?}")]
    UnknownVariableName(String),
    #[error("Expected a `node.variable` path, got {0:?}")]
    MalformedPath(String),
    #[error("{terminal} is an {actual:?} but the connection needs an {expected:?}")]
    Direction {
        terminal: Terminal,
        expected: Direction,
        actual: Direction,
    },
    #[error("{output} and {input} have different data types")]
    DataType { output: Terminal, input: Terminal },
    #[error("{target} is fed by both data id {first} and data id {second}")]
    InputFedTwice {
        target: Terminal,
        first: DataId,
        second: DataId,
    },
    #[error("The connection from {0} has no targets")]
    NoTargets(Terminal),
    #[error("The connection from {0} has a step count of zero")]
    ZeroStepCount(Terminal),
    #[error("{0} connections do not fit the data id range")]
    TooManyConnections(usize),
    #[error("{0} nodes do not fit the node id range")]
    TooManyNodes(usize),
}
