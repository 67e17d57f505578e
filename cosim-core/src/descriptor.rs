//! The static per-node catalog: variables, operating modes, step
//! resolutions, log templates and the control endpoint.

use crate::{
    id::{SessionUuid, ValueReference},
    transport::Endpoint,
    value::{DataType, Value},
};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::{fs, net::Ipv4Addr, path::Path};
use thiserror::Error as ThisError;

/// The protocol version a node and orchestrator must agree on.
pub const PROTOCOL_VERSION: (u8, u8) = (1, 0);

/// How a node paces its steps.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpMode {
    RealTime = 0,
    SoftRealTime = 1,
    NonRealTime = 2,
}

impl OpMode {
    pub fn is_real_time(self) -> bool {
        !matches!(self, OpMode::NonRealTime)
    }
}

impl TryFrom<u8> for OpMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::RealTime),
            1 => Ok(Self::SoftRealTime),
            2 => Ok(Self::NonRealTime),
            other => Err(other),
        }
    }
}

/// Whether a variable is read by the node, written by it, or fixed before
/// the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
    Parameter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value_reference: ValueReference,
    pub direction: Direction,
    pub data_type: DataType,
    /// Only meaningful for inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<Value>,
}

impl Variable {
    /// The value an input holds before any coupling data arrived.
    pub fn start_value(&self) -> Value {
        self.start
            .and_then(|start| start.coerce(self.data_type))
            .unwrap_or_else(|| self.data_type.zero())
    }
}

/// A supported communication step, `numerator / denominator` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub numerator: u32,
    pub denominator: u32,
    /// A resolution that is not fixed lets the orchestrator pick any step.
    #[serde(default = "fixed_default")]
    pub fixed: bool,
}

fn fixed_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCategory {
    pub id: u8,
    pub name: String,
}

/// A printf-style message with typed placeholders such as `%float64`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogTemplate {
    pub id: u8,
    pub category: u8,
    pub level: u8,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEndpoint {
    pub host: Ipv4Addr,
    pub port: u16,
    /// Defaults to `port + 1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_port: Option<u16>,
}

/// Everything the orchestrator and the node runtime need to know about a
/// node before a session starts. Read-only once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub name: String,
    pub uuid: SessionUuid,
    pub version: (u8, u8),
    pub control: ControlEndpoint,
    pub op_modes: Vec<OpMode>,
    pub resolutions: Vec<Resolution>,
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub log_categories: Vec<LogCategory>,
    #[serde(default)]
    pub log_templates: Vec<LogTemplate>,
}

impl Descriptor {
    /// Reads a descriptor from a JSON file and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DescriptorError> {
        let text = fs::read_to_string(path)?;
        let descriptor: Descriptor = serde_json::from_str(&text)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Writes the descriptor to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), DescriptorError> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Checks that names and value references are unique and that start
    /// values fit their variable's type.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        let mut names = FxHashSet::default();
        let mut references = FxHashSet::default();
        for variable in self.variables.iter() {
            if !names.insert(variable.name.as_str()) {
                return Err(DescriptorError::DuplicateName(variable.name.clone()));
            }
            if !references.insert(variable.value_reference) {
                return Err(DescriptorError::DuplicateValueReference(
                    variable.value_reference,
                ));
            }
            if let Some(start) = variable.start {
                if start.coerce(variable.data_type).is_none() {
                    return Err(DescriptorError::StartValueType(variable.name.clone()));
                }
            }
        }
        if self.op_modes.is_empty() {
            return Err(DescriptorError::NoOpModes);
        }
        if self.control.data_port.is_none() && self.control.port == u16::MAX {
            return Err(DescriptorError::NoDataPort);
        }
        Ok(())
    }

    pub fn variable(&self, value_reference: ValueReference) -> Option<&Variable> {
        self.variables
            .iter()
            .find(|variable| variable.value_reference == value_reference)
    }

    pub fn variable_by_name(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|variable| variable.name == name)
    }

    pub fn control_endpoint(&self) -> Endpoint {
        Endpoint::new(self.control.host, self.control.port)
    }

    /// The endpoint coupling data for this node is sent to.
    pub fn data_endpoint(&self) -> Endpoint {
        let port = self
            .control
            .data_port
            .unwrap_or_else(|| self.control.port.wrapping_add(1));
        Endpoint::new(self.control.host, port)
    }

    pub fn supports_mode(&self, mode: OpMode) -> bool {
        self.op_modes.contains(&mode)
    }

    /// Whether the node can step at `numerator / denominator` seconds.
    pub fn supports_resolution(&self, numerator: u32, denominator: u32) -> bool {
        self.resolutions.iter().any(|resolution| {
            !resolution.fixed
                || u64::from(resolution.numerator) * u64::from(denominator)
                    == u64::from(numerator) * u64::from(resolution.denominator)
        })
    }

    pub fn template(&self, id: u8) -> Option<&LogTemplate> {
        self.log_templates.iter().find(|template| template.id == id)
    }
}

#[derive(Debug, ThisError)]
pub enum DescriptorError {
    #[error("Could not access the descriptor file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed descriptor: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Variable name {0:?} is declared twice")]
    DuplicateName(String),
    #[error("Value reference {0} is declared twice")]
    DuplicateValueReference(ValueReference),
    #[error("The start value of {0:?} does not match its data type")]
    StartValueType(String),
    #[error("The descriptor declares no operating mode")]
    NoOpModes,
    #[error("Control port 65535 leaves no port for coupling data; set data_port")]
    NoDataPort,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn descriptor(name: &str, port: u16, variables: Vec<Variable>) -> Descriptor {
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
            variables,
            log_categories: vec![LogCategory {
                id: 1,
                name: "NODE".into(),
            }],
            log_templates: vec![LogTemplate {
                id: 1,
                category: 1,
                level: 3,
                message: "[Time = %float64]: output = %float64".into(),
            }],
        }
    }

    pub(crate) fn float(name: &str, vr: ValueReference, direction: Direction) -> Variable {
        Variable {
            name: name.into(),
            value_reference: vr,
            direction,
            data_type: DataType::Float64,
            start: (direction == Direction::Input).then_some(Value::Float64(0.0)),
        }
    }

    #[test]
    fn rejects_duplicate_references() {
        let d = descriptor(
            "a",
            5000,
            vec![
                float("x", 0, Direction::Output),
                float("y", 0, Direction::Input),
            ],
        );
        assert!(matches!(
            d.validate(),
            Err(DescriptorError::DuplicateValueReference(0))
        ));
    }

    #[test]
    fn data_port_defaults_to_control_plus_one() {
        let mut d = descriptor("a", 5000, vec![]);
        assert_eq!(d.data_endpoint().port, 5001);
        d.control.data_port = Some(7000);
        assert_eq!(d.data_endpoint().port, 7000);
    }

    #[test]
    fn last_control_port_needs_an_explicit_data_port() {
        let mut d = descriptor("a", u16::MAX, vec![]);
        assert!(matches!(d.validate(), Err(DescriptorError::NoDataPort)));
        d.control.data_port = Some(6000);
        assert!(d.validate().is_ok());
        assert_eq!(d.data_endpoint().port, 6000);
    }

    #[test]
    fn resolution_support() {
        let mut d = descriptor("a", 5000, vec![]);
        assert!(d.supports_resolution(1, 10));
        assert!(d.supports_resolution(2, 20));
        assert!(!d.supports_resolution(1, 100));
        d.resolutions[0].fixed = false;
        assert!(d.supports_resolution(1, 100));
    }

    #[test]
    fn json_round_trip() -> anyhow::Result<()> {
        let d = descriptor("a", 5000, vec![float("y", 3, Direction::Input)]);
        let text = serde_json::to_string(&d)?;
        let back: Descriptor = serde_json::from_str(&text)?;
        assert_eq!(back, d);
        assert_eq!(back.variable(3).map(|v| v.start_value()), Some(Value::Float64(0.0)));
        Ok(())
    }
}
