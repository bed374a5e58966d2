//! Wire protocol vocabulary for the Max messenger service.
//!
//! Everything that describes bytes and frames, independent of any live
//! connection: the frame envelope shared by both transports, the opcode
//! table, the binary packet codec used over raw TCP, and the server
//! error-code classification.
//!
//! The service speaks one frame shape over two carriers:
//!
//! - WebSocket: one JSON text message per frame,
//!   `{"ver":11,"cmd":0,"seq":5,"opcode":64,"payload":{…}}`
//! - raw TCP: a 16-byte big-endian header followed by the JSON payload
//!   bytes (see [`packet`])
//!
//! Payloads stay opaque [`serde_json::Value`]s here; giving them domain
//! meaning is the caller's business.

pub mod error_code;
pub mod frame;
pub mod opcode;
pub mod packet;

pub use error_code::{classify, ErrorClass, ErrorPayload};
pub use frame::{Direction, Frame};
pub use opcode::Opcode;
pub use packet::{PacketCodec, PacketError, HEADER_LEN, MAX_PAYLOAD_LEN};

/// Protocol version stamped into every outgoing frame.
pub const PROTOCOL_VERSION: u8 = 11;
