//! Identifiers used on the wire and in the registries.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};
use thiserror::Error as ThisError;

/// The identifier of a node within a session, assigned at registration.
///
/// Zero is reserved and never names a node, so the valid range is `1..=255`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct NodeId(u8);

impl NodeId {
    /// The largest node id a session can hold.
    pub const MAX: NodeId = NodeId(u8::MAX);

    /// Creates a node id, rejecting the reserved value zero.
    pub const fn new(id: u8) -> Option<Self> {
        if id == 0 {
            None
        } else {
            Some(Self(id))
        }
    }

    /// Creates the node id for the node at the given zero-based position in a
    /// session's node list.
    pub fn from_index(index: usize) -> Option<Self> {
        u8::try_from(index + 1).ok().and_then(Self::new)
    }

    /// The zero-based position of the node in the session's node list.
    pub fn index(self) -> usize {
        self.0 as usize - 1
    }

    /// Gets the underlying id number.
    pub fn into_inner(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for NodeId {
    type Error = InvalidNodeId;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidNodeId)
    }
}

impl From<NodeId> for u8 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
#[error("Node id 0 is reserved")]
pub struct InvalidNodeId;

/// Addresses the coupling traffic of one connection on the wire.
pub type DataId = u16;

/// Identifies one variable within a node.
pub type ValueReference = u32;

/// Sequence number of a command sent by the orchestrator, echoed in `ACK`/`NACK`.
pub type CommandSeq = u16;

/// The identity of a node's descriptor, checked at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionUuid(pub [u8; 16]);

impl SessionUuid {
    /// Generates a random (version 4 layout) UUID.
    pub fn random() -> Self {
        let mut bytes = [0; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl Display for SessionUuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                write!(f, "-")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for SessionUuid {
    type Err = UuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: Vec<u8> = s
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_digit(16).map(|d| d as u8).ok_or(UuidParseError))
            .collect::<Result<_, _>>()?;
        if digits.len() != 32 {
            return Err(UuidParseError);
        }
        let mut bytes = [0; 16];
        for (byte, pair) in bytes.iter_mut().zip(digits.chunks(2)) {
            *byte = pair[0] << 4 | pair[1];
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for SessionUuid {
    type Error = UuidParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionUuid> for String {
    fn from(uuid: SessionUuid) -> Self {
        uuid.to_string()
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
#[error("Expected 32 hexadecimal digits for a UUID")]
pub struct UuidParseError;
