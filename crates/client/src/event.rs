//! Events pushed by the service and their typed decoding.
//!
//! Pushes arrive as `cmd = 2` frames. [`decode`] turns a push into an
//! [`Event`]; anything it cannot interpret becomes [`Event::RawPush`] so
//! callers can still observe traffic the engine does not model.

use serde::Deserialize;
use serde_json::Value;

use oneme_wire::Opcode;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single delivery to subscribed handlers.
#[derive(Debug, Clone)]
pub enum Event {
    /// The connection is authenticated and requests may flow. Fires again
    /// after every successful reconnect.
    Ready,
    /// The connection dropped. Fires once per lost connection, before any
    /// reconnect attempt.
    Disconnected,
    /// A new message arrived in some chat.
    Message(MessageEvent),
    /// An existing message was edited.
    MessageEdited(MessageEvent),
    /// A message was removed.
    MessageRemoved(MessageEvent),
    /// Reactions on a message changed.
    ReactionChanged(ReactionEvent),
    /// Chat metadata changed (title, membership, mute state).
    ChatUpdated(ChatEvent),
    /// A push the engine has no typed decoding for.
    RawPush(RawPush),
}

/// Fieldless mirror of [`Event`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ready,
    Disconnected,
    Message,
    MessageEdited,
    MessageRemoved,
    ReactionChanged,
    ChatUpdated,
    RawPush,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Ready => EventKind::Ready,
            Event::Disconnected => EventKind::Disconnected,
            Event::Message(_) => EventKind::Message,
            Event::MessageEdited(_) => EventKind::MessageEdited,
            Event::MessageRemoved(_) => EventKind::MessageRemoved,
            Event::ReactionChanged(_) => EventKind::ReactionChanged,
            Event::ChatUpdated(_) => EventKind::ChatUpdated,
            Event::RawPush(_) => EventKind::RawPush,
        }
    }

    /// Chat the event belongs to, when it carries one.
    pub fn chat_id(&self) -> Option<i64> {
        match self {
            Event::Message(m) | Event::MessageEdited(m) | Event::MessageRemoved(m) => {
                Some(m.chat_id)
            }
            Event::ReactionChanged(r) => Some(r.chat_id),
            Event::ChatUpdated(c) => c.chat_id,
            _ => None,
        }
    }

    /// Sender of the message, for message events that know it.
    pub fn sender_id(&self) -> Option<i64> {
        match self {
            Event::Message(m) | Event::MessageEdited(m) | Event::MessageRemoved(m) => {
                m.message.sender
            }
            _ => None,
        }
    }
}

/// A message push: which chat, and the message itself.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub chat_id: i64,
    pub message: Message,
}

/// The parts of a message the engine understands. Unmodeled fields stay in
/// the raw payload, reachable through a [`EventKind::RawPush`] subscription.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub sender: Option<i64>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

/// A reaction change on one message.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionEvent {
    pub chat_id: i64,
    pub message_id: String,
    #[serde(default)]
    pub reaction_info: Value,
}

/// A chat metadata change. Only the routing fields are typed.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatEvent {
    #[serde(default, rename = "id")]
    pub chat_id: Option<i64>,
    #[serde(default, rename = "type")]
    pub chat_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// An undecoded push, verbatim.
#[derive(Debug, Clone)]
pub struct RawPush {
    pub opcode: u16,
    pub payload: Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decode a push frame into an event. Never fails: undecodable payloads
/// degrade to [`Event::RawPush`].
pub(crate) fn decode(opcode: Opcode, payload: Value) -> Event {
    match opcode {
        Opcode::NotifMessage => match MessageEvent::deserialize(&payload) {
            // Edits and removals reuse the message push with a status marker.
            Ok(ev) => match ev.message.status.as_deref() {
                Some("EDITED") => Event::MessageEdited(ev),
                Some("REMOVED") => Event::MessageRemoved(ev),
                _ => Event::Message(ev),
            },
            Err(e) => raw_fallback(opcode, payload, e),
        },
        Opcode::NotifReaction => match ReactionEvent::deserialize(&payload) {
            Ok(ev) => Event::ReactionChanged(ev),
            Err(e) => raw_fallback(opcode, payload, e),
        },
        Opcode::NotifChat => {
            // The chat object arrives nested under "chat".
            let chat = payload.get("chat").unwrap_or(&payload);
            match ChatEvent::deserialize(chat) {
                Ok(ev) => Event::ChatUpdated(ev),
                Err(e) => raw_fallback(opcode, payload, e),
            }
        }
        other => Event::RawPush(RawPush {
            opcode: other.raw(),
            payload,
        }),
    }
}

fn raw_fallback(opcode: Opcode, payload: Value, err: serde_json::Error) -> Event {
    tracing::debug!(opcode = %opcode, error = %err, "push payload did not decode, passing through raw");
    Event::RawPush(RawPush {
        opcode: opcode.raw(),
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_message_decodes() {
        let event = decode(
            Opcode::NotifMessage,
            json!({"chatId": 42, "message": {"id": 1, "sender": 7, "text": "hi", "time": 1700000000000_i64}}),
        );
        match event {
            Event::Message(ev) => {
                assert_eq!(ev.chat_id, 42);
                assert_eq!(ev.message.text.as_deref(), Some("hi"));
                assert_eq!(ev.message.sender, Some(7));
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn edited_status_routes_to_edit_event() {
        let event = decode(
            Opcode::NotifMessage,
            json!({"chatId": 42, "message": {"id": 1, "text": "fixed", "status": "EDITED"}}),
        );
        assert!(matches!(event, Event::MessageEdited(_)));
        assert_eq!(event.kind(), EventKind::MessageEdited);
    }

    #[test]
    fn removed_status_routes_to_removal_event() {
        let event = decode(
            Opcode::NotifMessage,
            json!({"chatId": 42, "message": {"id": 1, "status": "REMOVED"}}),
        );
        assert!(matches!(event, Event::MessageRemoved(_)));
    }

    #[test]
    fn reaction_push_decodes() {
        let event = decode(
            Opcode::NotifReaction,
            json!({"chatId": 9, "messageId": "m-3", "reactionInfo": {"counters": []}}),
        );
        match event {
            Event::ReactionChanged(ev) => {
                assert_eq!(ev.chat_id, 9);
                assert_eq!(ev.message_id, "m-3");
            }
            other => panic!("expected ReactionChanged, got {other:?}"),
        }
    }

    #[test]
    fn chat_push_unwraps_nested_chat() {
        let event = decode(
            Opcode::NotifChat,
            json!({"chat": {"id": 5, "type": "DIALOG", "title": "Pair"}}),
        );
        match event {
            Event::ChatUpdated(ev) => {
                assert_eq!(ev.chat_id, Some(5));
                assert_eq!(ev.title.as_deref(), Some("Pair"));
            }
            other => panic!("expected ChatUpdated, got {other:?}"),
        }
    }

    #[test]
    fn unknown_opcode_passes_through_raw() {
        let event = decode(Opcode::Other(999), json!({"anything": true}));
        match event {
            Event::RawPush(raw) => {
                assert_eq!(raw.opcode, 999);
                assert_eq!(raw.payload["anything"], true);
            }
            other => panic!("expected RawPush, got {other:?}"),
        }
    }

    #[test]
    fn malformed_message_payload_degrades_to_raw() {
        // chatId missing entirely.
        let event = decode(Opcode::NotifMessage, json!({"message": {"id": 1}}));
        assert!(matches!(event, Event::RawPush(_)));
    }

    #[test]
    fn accessors_pull_routing_fields() {
        let event = decode(
            Opcode::NotifMessage,
            json!({"chatId": 11, "message": {"sender": 3}}),
        );
        assert_eq!(event.chat_id(), Some(11));
        assert_eq!(event.sender_id(), Some(3));
        assert_eq!(Event::Ready.chat_id(), None);
    }
}
