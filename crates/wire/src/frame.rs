//! The frame envelope shared by both transport bindings.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::opcode::Opcode;
use crate::PROTOCOL_VERSION;

/// Direction flag carried in the `cmd` field of every frame.
///
/// `0` is a client request, `1` the matching server response, `2` a
/// server-initiated push. Any other byte on the wire is a decode error
/// for that frame alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    Request = 0,
    Response = 1,
    Push = 2,
}

impl TryFrom<u8> for Direction {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(Direction::Request),
            1 => Ok(Direction::Response),
            2 => Ok(Direction::Push),
            other => Err(other),
        }
    }
}

impl Serialize for Direction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for Direction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(deserializer)?;
        Direction::try_from(raw)
            .map_err(|b| serde::de::Error::custom(format!("unknown cmd byte {b}")))
    }
}

/// One wire frame.
///
/// `seq` correlates a response to the request that carried the same value;
/// pushes carry a server-side sequence that matches nothing on our side.
/// The payload is opaque structured data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub ver: u8,
    pub cmd: Direction,
    pub seq: u64,
    pub opcode: u16,
    pub payload: Value,
}

impl Frame {
    /// Build an outgoing request frame.
    pub fn request(opcode: Opcode, seq: u64, payload: Value) -> Self {
        Self {
            ver: PROTOCOL_VERSION,
            cmd: Direction::Request,
            seq,
            opcode: opcode.raw(),
            payload,
        }
    }

    /// Build a response frame (used by in-process test servers).
    pub fn response(opcode: u16, seq: u64, payload: Value) -> Self {
        Self {
            ver: PROTOCOL_VERSION,
            cmd: Direction::Response,
            seq,
            opcode,
            payload,
        }
    }

    /// Build a push frame (used by in-process test servers).
    pub fn push(opcode: u16, seq: u64, payload: Value) -> Self {
        Self {
            ver: PROTOCOL_VERSION,
            cmd: Direction::Push,
            seq,
            opcode,
            payload,
        }
    }

    /// The opcode resolved against the known vocabulary.
    pub fn opcode(&self) -> Opcode {
        Opcode::from_raw(self.opcode)
    }
}
