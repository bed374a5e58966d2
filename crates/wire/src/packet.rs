//! Binary packet framing for the raw TCP binding.
//!
//! A TCP stream gives us no message boundaries, so each frame travels as a
//! fixed big-endian header followed by the payload bytes:
//!
//! ```text
//! ver:u8 | cmd:u8 | seq:u64 | opcode:u16 | len:u32 | payload (len bytes, JSON)
//! ```
//!
//! The length field is capped at 24 bits, matching the service's own
//! framing. The WebSocket binding never touches this module; its carrier
//! already preserves message boundaries.

use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{Direction, Frame};

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 16;

/// Maximum payload size (24-bit length field).
pub const MAX_PAYLOAD_LEN: usize = 0xFF_FFFF;

/// Faults raised by the packet codec.
///
/// Any of these on a live stream means framing is lost and the connection
/// cannot be resynchronized.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload length {0} exceeds {MAX_PAYLOAD_LEN} bytes")]
    PayloadTooLarge(usize),
    #[error("unknown cmd byte {0} in packet header")]
    BadDirection(u8),
}

/// Stateless [`Decoder`]/[`Encoder`] pair for the binary framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Frame;
    type Error = PacketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, PacketError> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }

        // Peek the header without consuming so a partial body keeps the
        // buffer intact for the next read.
        let mut header = &src[..HEADER_LEN];
        let ver = header.get_u8();
        let cmd = header.get_u8();
        let seq = header.get_u64();
        let opcode = header.get_u16();
        let len = header.get_u32() as usize;

        if len > MAX_PAYLOAD_LEN {
            return Err(PacketError::PayloadTooLarge(len));
        }
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(len);

        let cmd = Direction::try_from(cmd).map_err(PacketError::BadDirection)?;
        let payload: Value = serde_json::from_slice(&body)?;

        Ok(Some(Frame {
            ver,
            cmd,
            seq,
            opcode,
            payload,
        }))
    }
}

impl Encoder<Frame> for PacketCodec {
    type Error = PacketError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), PacketError> {
        let body = serde_json::to_vec(&frame.payload)?;
        if body.len() > MAX_PAYLOAD_LEN {
            return Err(PacketError::PayloadTooLarge(body.len()));
        }

        dst.reserve(HEADER_LEN + body.len());
        dst.put_u8(frame.ver);
        dst.put_u8(frame.cmd as u8);
        dst.put_u64(frame.seq);
        dst.put_u16(frame.opcode);
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}
