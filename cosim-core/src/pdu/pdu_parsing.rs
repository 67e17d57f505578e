//! Byte layout of every PDU.
//!
//! All multi-byte fields are big-endian. Each PDU starts with a type tag:
//!
//! ```text
//! 0x01 REGISTER          node u8, seq u16, state u8, uuid [u8; 16], mode u8,
//!                        major u8, minor u8
//! 0x02 STATE_TRANSITION  node u8, seq u16, command u8, [steps u32 for doStep],
//!                        has_deadline u8, [deadline u64]
//! 0x03 CONFIG_ITEM       node u8, seq u16, data_id u16, kind u8, body
//! 0x10 ACK               node u8, seq u16
//! 0x11 NACK              node u8, seq u16, code u8
//! 0x20 STATE_CHANGED     node u8, state u8
//! 0x30 DATA              data_id u16, step u64, length u16, payload
//! 0x40 LOG               node u8, category u8, severity u8, template u8,
//!                        count u8, count * (tag u8, value)
//! ```

use super::{ConfigItem, ErrorCode, LogValue, Pdu, Scope, Severity, StateCommand};
use crate::{bytes::BytesExt, id::NodeId, transport::Endpoint, value::DataType};
use thiserror::Error as ThisError;

const REGISTER: u8 = 0x01;
const STATE_TRANSITION: u8 = 0x02;
const CONFIG_ITEM: u8 = 0x03;
const ACK: u8 = 0x10;
const NACK: u8 = 0x11;
const STATE_CHANGED: u8 = 0x20;
const DATA: u8 = 0x30;
const LOG: u8 = 0x40;

const LOG_FLOAT64: u8 = 1;
const LOG_INT64: u8 = 2;
const LOG_UINT64: u8 = 3;
const LOG_STRING: u8 = 4;

impl Pdu {
    /// Parses one PDU. The iterator must yield exactly one message; leftover
    /// bytes are an error.
    pub fn from_bytes(mut bytes: impl Iterator<Item = u8>) -> Result<Self, ParseError> {
        use ParseError::TooShort;
        let tag = bytes.next_u8().ok_or(TooShort)?;
        let pdu = match tag {
            REGISTER => Pdu::Register {
                node: next_node(&mut bytes)?,
                seq: bytes.next_u16_be().ok_or(TooShort)?,
                state: bytes
                    .next_u8()
                    .ok_or(TooShort)?
                    .try_into()
                    .map_err(ParseError::State)?,
                uuid: crate::id::SessionUuid(bytes.next_n().ok_or(TooShort)?),
                mode: bytes
                    .next_u8()
                    .ok_or(TooShort)?
                    .try_into()
                    .map_err(ParseError::OpMode)?,
                major: bytes.next_u8().ok_or(TooShort)?,
                minor: bytes.next_u8().ok_or(TooShort)?,
            },
            STATE_TRANSITION => {
                let node = next_node(&mut bytes)?;
                let seq = bytes.next_u16_be().ok_or(TooShort)?;
                let command = match bytes.next_u8().ok_or(TooShort)? {
                    1 => StateCommand::Prepare,
                    2 => StateCommand::Configure,
                    3 => StateCommand::Initialize,
                    4 => StateCommand::Run,
                    5 => StateCommand::DoStep {
                        steps: bytes.next_u32_be().ok_or(TooShort)?,
                    },
                    6 => StateCommand::Stop,
                    7 => StateCommand::Deregister,
                    other => Err(ParseError::Command(other))?,
                };
                let deadline = match bytes.next_u8().ok_or(TooShort)? {
                    0 => None,
                    1 => Some(bytes.next_u64_be().ok_or(TooShort)?),
                    other => Err(ParseError::Flag(other))?,
                };
                Pdu::StateTransition {
                    node,
                    seq,
                    command,
                    deadline,
                }
            }
            CONFIG_ITEM => {
                let node = next_node(&mut bytes)?;
                let seq = bytes.next_u16_be().ok_or(TooShort)?;
                let data_id = bytes.next_u16_be().ok_or(TooShort)?;
                let item = match bytes.next_u8().ok_or(TooShort)? {
                    1 => ConfigItem::Scope(match bytes.next_u8().ok_or(TooShort)? {
                        0 => Scope::Initialization,
                        1 => Scope::Run,
                        2 => Scope::InitializationRun,
                        other => Err(ParseError::Scope(other))?,
                    }),
                    2 => ConfigItem::BindOutput {
                        value_reference: bytes.next_u32_be().ok_or(TooShort)?,
                    },
                    3 => ConfigItem::BindInput {
                        value_reference: bytes.next_u32_be().ok_or(TooShort)?,
                        data_type: DataType::try_from(bytes.next_u8().ok_or(TooShort)?)
                            .map_err(|e| ParseError::DataType(e.0))?,
                    },
                    4 => ConfigItem::StepCount(bytes.next_u32_be().ok_or(TooShort)?),
                    5 => ConfigItem::SourceAddress(next_endpoint(&mut bytes)?),
                    6 => ConfigItem::TargetAddress(next_endpoint(&mut bytes)?),
                    7 => ConfigItem::TimeResolution {
                        numerator: bytes.next_u32_be().ok_or(TooShort)?,
                        denominator: bytes.next_u32_be().ok_or(TooShort)?,
                    },
                    other => Err(ParseError::ConfigKind(other))?,
                };
                Pdu::ConfigItem {
                    node,
                    seq,
                    data_id,
                    item,
                }
            }
            ACK => Pdu::Ack {
                node: next_node(&mut bytes)?,
                seq: bytes.next_u16_be().ok_or(TooShort)?,
            },
            NACK => Pdu::Nack {
                node: next_node(&mut bytes)?,
                seq: bytes.next_u16_be().ok_or(TooShort)?,
                code: ErrorCode::try_from(bytes.next_u8().ok_or(TooShort)?)
                    .map_err(ParseError::ErrorCode)?,
            },
            STATE_CHANGED => Pdu::StateChanged {
                node: next_node(&mut bytes)?,
                state: bytes
                    .next_u8()
                    .ok_or(TooShort)?
                    .try_into()
                    .map_err(ParseError::State)?,
            },
            DATA => {
                let data_id = bytes.next_u16_be().ok_or(TooShort)?;
                let step = bytes.next_u64_be().ok_or(TooShort)?;
                let length = bytes.next_u16_be().ok_or(TooShort)?;
                let payload = bytes.next_vec(length as usize).ok_or(TooShort)?;
                Pdu::Data {
                    data_id,
                    step,
                    payload,
                }
            }
            LOG => {
                let node = next_node(&mut bytes)?;
                let category = bytes.next_u8().ok_or(TooShort)?;
                let raw = bytes.next_u8().ok_or(TooShort)?;
                let severity = Severity::from_u8(raw).ok_or(ParseError::Severity(raw))?;
                let template = bytes.next_u8().ok_or(TooShort)?;
                let count = bytes.next_u8().ok_or(TooShort)?;
                let mut values = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    values.push(next_log_value(&mut bytes)?);
                }
                Pdu::Log {
                    node,
                    category,
                    severity,
                    template,
                    values,
                }
            }
            other => Err(ParseError::UnknownType(other))?,
        };

        if bytes.next().is_some() {
            Err(ParseError::TrailingBytes)?
        }
        Ok(pdu)
    }

    /// Serializes the PDU.
    pub fn build(&self) -> Result<Vec<u8>, BuildError> {
        let mut out = Vec::with_capacity(32);
        match self {
            Pdu::Register {
                node,
                seq,
                state,
                uuid,
                mode,
                major,
                minor,
            } => {
                out.push(REGISTER);
                out.push(node.into_inner());
                out.extend_from_slice(&seq.to_be_bytes());
                out.push(*state as u8);
                out.extend_from_slice(uuid.as_bytes());
                out.extend_from_slice(&[*mode as u8, *major, *minor]);
            }
            Pdu::StateTransition {
                node,
                seq,
                command,
                deadline,
            } => {
                out.push(STATE_TRANSITION);
                out.push(node.into_inner());
                out.extend_from_slice(&seq.to_be_bytes());
                match command {
                    StateCommand::Prepare => out.push(1),
                    StateCommand::Configure => out.push(2),
                    StateCommand::Initialize => out.push(3),
                    StateCommand::Run => out.push(4),
                    StateCommand::DoStep { steps } => {
                        out.push(5);
                        out.extend_from_slice(&steps.to_be_bytes());
                    }
                    StateCommand::Stop => out.push(6),
                    StateCommand::Deregister => out.push(7),
                }
                match deadline {
                    Some(deadline) => {
                        out.push(1);
                        out.extend_from_slice(&deadline.to_be_bytes());
                    }
                    None => out.push(0),
                }
            }
            Pdu::ConfigItem {
                node,
                seq,
                data_id,
                item,
            } => {
                out.push(CONFIG_ITEM);
                out.push(node.into_inner());
                out.extend_from_slice(&seq.to_be_bytes());
                out.extend_from_slice(&data_id.to_be_bytes());
                match item {
                    ConfigItem::Scope(scope) => out.extend_from_slice(&[1, *scope as u8]),
                    ConfigItem::BindOutput { value_reference } => {
                        out.push(2);
                        out.extend_from_slice(&value_reference.to_be_bytes());
                    }
                    ConfigItem::BindInput {
                        value_reference,
                        data_type,
                    } => {
                        out.push(3);
                        out.extend_from_slice(&value_reference.to_be_bytes());
                        out.push(*data_type as u8);
                    }
                    ConfigItem::StepCount(steps) => {
                        out.push(4);
                        out.extend_from_slice(&steps.to_be_bytes());
                    }
                    ConfigItem::SourceAddress(endpoint) => {
                        out.push(5);
                        push_endpoint(&mut out, *endpoint);
                    }
                    ConfigItem::TargetAddress(endpoint) => {
                        out.push(6);
                        push_endpoint(&mut out, *endpoint);
                    }
                    ConfigItem::TimeResolution {
                        numerator,
                        denominator,
                    } => {
                        out.push(7);
                        out.extend_from_slice(&numerator.to_be_bytes());
                        out.extend_from_slice(&denominator.to_be_bytes());
                    }
                }
            }
            Pdu::Ack { node, seq } => {
                out.push(ACK);
                out.push(node.into_inner());
                out.extend_from_slice(&seq.to_be_bytes());
            }
            Pdu::Nack { node, seq, code } => {
                out.push(NACK);
                out.push(node.into_inner());
                out.extend_from_slice(&seq.to_be_bytes());
                out.push(*code as u8);
            }
            Pdu::StateChanged { node, state } => {
                out.extend_from_slice(&[STATE_CHANGED, node.into_inner(), *state as u8]);
            }
            Pdu::Data {
                data_id,
                step,
                payload,
            } => {
                let length: u16 = payload
                    .len()
                    .try_into()
                    .map_err(|_| BuildError::PayloadTooLong(payload.len()))?;
                out.push(DATA);
                out.extend_from_slice(&data_id.to_be_bytes());
                out.extend_from_slice(&step.to_be_bytes());
                out.extend_from_slice(&length.to_be_bytes());
                out.extend_from_slice(payload);
            }
            Pdu::Log {
                node,
                category,
                severity,
                template,
                values,
            } => {
                let count: u8 = values
                    .len()
                    .try_into()
                    .map_err(|_| BuildError::TooManyLogValues(values.len()))?;
                out.extend_from_slice(&[
                    LOG,
                    node.into_inner(),
                    *category,
                    *severity as u8,
                    *template,
                    count,
                ]);
                for value in values {
                    push_log_value(&mut out, value)?;
                }
            }
        }
        Ok(out)
    }
}

fn next_node(bytes: &mut impl Iterator<Item = u8>) -> Result<NodeId, ParseError> {
    let raw = bytes.next_u8().ok_or(ParseError::TooShort)?;
    NodeId::new(raw).ok_or(ParseError::NodeId)
}

fn next_endpoint(bytes: &mut impl Iterator<Item = u8>) -> Result<Endpoint, ParseError> {
    let address = bytes.next_ipv4addr().ok_or(ParseError::TooShort)?;
    let port = bytes.next_u16_be().ok_or(ParseError::TooShort)?;
    Ok(Endpoint::new(address, port))
}

fn push_endpoint(out: &mut Vec<u8>, endpoint: Endpoint) {
    out.extend_from_slice(&endpoint.address.octets());
    out.extend_from_slice(&endpoint.port.to_be_bytes());
}

fn next_log_value(bytes: &mut impl Iterator<Item = u8>) -> Result<LogValue, ParseError> {
    use ParseError::TooShort;
    let value = match bytes.next_u8().ok_or(TooShort)? {
        LOG_FLOAT64 => LogValue::Float64(bytes.next_f64_be().ok_or(TooShort)?),
        LOG_INT64 => LogValue::Int64(bytes.next_i64_be().ok_or(TooShort)?),
        LOG_UINT64 => LogValue::UInt64(bytes.next_u64_be().ok_or(TooShort)?),
        LOG_STRING => {
            let length = bytes.next_u16_be().ok_or(TooShort)?;
            let raw = bytes.next_vec(length as usize).ok_or(TooShort)?;
            LogValue::String(String::from_utf8(raw).map_err(|_| ParseError::Utf8)?)
        }
        other => Err(ParseError::LogValue(other))?,
    };
    Ok(value)
}

fn push_log_value(out: &mut Vec<u8>, value: &LogValue) -> Result<(), BuildError> {
    match value {
        LogValue::Float64(v) => {
            out.push(LOG_FLOAT64);
            out.extend_from_slice(&v.to_be_bytes());
        }
        LogValue::Int64(v) => {
            out.push(LOG_INT64);
            out.extend_from_slice(&v.to_be_bytes());
        }
        LogValue::UInt64(v) => {
            out.push(LOG_UINT64);
            out.extend_from_slice(&v.to_be_bytes());
        }
        LogValue::String(v) => {
            let length: u16 = v
                .len()
                .try_into()
                .map_err(|_| BuildError::StringTooLong(v.len()))?;
            out.push(LOG_STRING);
            out.extend_from_slice(&length.to_be_bytes());
            out.extend_from_slice(v.as_bytes());
        }
    }
    Ok(())
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("The PDU is incomplete")]
    TooShort,
    #[error("The PDU continues past its last field")]
    TrailingBytes,
    #[error("Unknown PDU type {0:#04x}")]
    UnknownType(u8),
    #[error("Node id 0 is reserved")]
    NodeId,
    #[error("Unknown node state {0}")]
    State(u8),
    #[error("Unknown operating mode {0}")]
    OpMode(u8),
    #[error("Unknown lifecycle command {0}")]
    Command(u8),
    #[error("Expected a 0 or 1 flag, got {0}")]
    Flag(u8),
    #[error("Unknown configuration item kind {0}")]
    ConfigKind(u8),
    #[error("Unknown scope {0}")]
    Scope(u8),
    #[error("Unknown data type {0}")]
    DataType(u8),
    #[error("Unknown error code {0}")]
    ErrorCode(u8),
    #[error("Unknown severity {0}")]
    Severity(u8),
    #[error("Unknown log value tag {0}")]
    LogValue(u8),
    #[error("A log string is not valid UTF-8")]
    Utf8,
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    #[error("A DATA payload of {0} bytes does not fit the length field")]
    PayloadTooLong(usize),
    #[error("A LOG message carries {0} values, at most 255 fit")]
    TooManyLogValues(usize),
    #[error("A log string of {0} bytes does not fit the length field")]
    StringTooLong(usize),
}
