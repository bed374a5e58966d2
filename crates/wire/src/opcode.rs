//! The opcode vocabulary.
//!
//! The service uses a closed numeric opcode space; this table names the
//! operations the engine itself speaks plus the push notifications it
//! dispatches. Anything else survives as [`Opcode::Other`] so an
//! unrecognized frame can still flow to a generic handler instead of
//! failing the read loop.

use std::fmt;

/// Known opcodes, with a raw passthrough for the rest of the space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Interactive keep-alive request.
    Ping,
    /// Device handshake, the first frame on every connection.
    SessionInit,
    /// Start-auth: phone number in, temporary token out.
    AuthRequest,
    /// Check-code / register: temporary token in, login token out.
    Auth,
    /// Login/sync with a resumption token.
    Login,
    /// Own profile.
    Profile,
    /// Contact lookup.
    ContactInfo,
    /// Contact update.
    ContactUpdate,
    /// Chat history page.
    FetchHistory,
    /// Send a chat message.
    SendMessage,
    /// Edit a message.
    EditMessage,
    /// Delete messages.
    DeleteMessage,
    /// Push: message created, edited or removed.
    NotifMessage,
    /// Push: reaction changed.
    NotifReaction,
    /// Push: chat metadata updated.
    NotifChat,
    /// Any opcode outside the known vocabulary.
    Other(u16),
}

impl Opcode {
    /// Resolve a raw wire value against the vocabulary.
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            1 => Opcode::Ping,
            6 => Opcode::SessionInit,
            17 => Opcode::AuthRequest,
            18 => Opcode::Auth,
            19 => Opcode::Login,
            21 => Opcode::Profile,
            32 => Opcode::ContactInfo,
            34 => Opcode::ContactUpdate,
            49 => Opcode::FetchHistory,
            64 => Opcode::SendMessage,
            66 => Opcode::EditMessage,
            67 => Opcode::DeleteMessage,
            128 => Opcode::NotifMessage,
            131 => Opcode::NotifReaction,
            132 => Opcode::NotifChat,
            other => Opcode::Other(other),
        }
    }

    /// The raw wire value.
    pub const fn raw(self) -> u16 {
        match self {
            Opcode::Ping => 1,
            Opcode::SessionInit => 6,
            Opcode::AuthRequest => 17,
            Opcode::Auth => 18,
            Opcode::Login => 19,
            Opcode::Profile => 21,
            Opcode::ContactInfo => 32,
            Opcode::ContactUpdate => 34,
            Opcode::FetchHistory => 49,
            Opcode::SendMessage => 64,
            Opcode::EditMessage => 66,
            Opcode::DeleteMessage => 67,
            Opcode::NotifMessage => 128,
            Opcode::NotifReaction => 131,
            Opcode::NotifChat => 132,
            Opcode::Other(raw) => raw,
        }
    }
}

impl From<Opcode> for u16 {
    fn from(op: Opcode) -> u16 {
        op.raw()
    }
}

impl From<u16> for Opcode {
    fn from(raw: u16) -> Opcode {
        Opcode::from_raw(raw)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Other(raw) => write!(f, "opcode {raw}"),
            known => write!(f, "{known:?} ({})", known.raw()),
        }
    }
}
