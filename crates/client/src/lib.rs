//! `oneme-client` — Connection engine and typed client for the oneme
//! messaging service.
//!
//! One spawned task owns the physical connection (WebSocket or raw TCP);
//! application code holds a cheap cloneable [`Client`] handle. Concurrent
//! requests multiplex over the single connection by sequence number,
//! server pushes fan out to subscribed handlers off the read path, and a
//! dropped connection redials with jittered exponential back-off, resuming
//! the session from the stored token.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Your app                                                │
//! │                                                          │
//! │   let client = Client::builder()                         │
//! │       .phone("+79991234567")                             │
//! │       .session_store(Arc::new(store))                    │
//! │       .build()?;                                         │
//! │   client.connect().await?;                               │
//! │   client.subscribe(EventKind::Message, None, handler);   │
//! │   client.send_request(Opcode::SendMessage, payload);     │
//! └──────────────┬───────────────────────────────────────────┘
//!                │ outbound queue / oneshot replies
//! ┌──────────────▼───────────────────────────────────────────┐
//! │  connection task: dial → handshake → login → frame pump  │
//! │    PendingTable (seq→waiter)   HandlerRegistry (queues)  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Connection flow (hard-coded by the engine)
//!
//! 1. Dial the endpoint (`wss://` WebSocket or `host:port` packet framing)
//! 2. Send `SESSION_INIT` with the device identity
//! 3. With a stored token: `LOGIN` resumes the session and `Ready` fires
//! 4. Without one: stay in `Authenticating` until the interactive
//!    `request_code` / `sign_in` flow earns a token and completes login
//! 5. On connection loss: fail every in-flight request fast, redial with
//!    back-off, resume the session on success

mod auth;
pub mod builder;
pub mod client;
pub mod error;
pub mod event;
mod pending;
pub mod reconnect;
pub mod registry;
pub mod session;
pub mod transport;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use builder::ClientBuilder;
pub use client::{Client, ConnectionState};
pub use error::{Error, Result};
pub use event::{ChatEvent, Event, EventKind, Message, MessageEvent, RawPush, ReactionEvent};
pub use reconnect::ReconnectBackoff;
pub use registry::{handler_fn, EventFilter, EventHandler, Subscription};
pub use session::{
    DeviceInfo, FileSessionStore, MemorySessionStore, Profile, ProfileName, SessionStore,
    StoredSession,
};
pub use transport::{Endpoint, Transport, TransportError};

// Re-export the wire vocabulary so applications never need to import
// oneme-wire directly.
pub use oneme_wire::{Frame, Opcode};
