//! Handler subscriptions and event dispatch.
//!
//! Each subscription owns an unbounded queue drained by its own worker
//! task, so a slow or panicking handler never stalls the connection task
//! or its sibling handlers. Within one subscription, events keep arrival
//! order.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::FutureExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::event::{Event, EventKind};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Receives events for one subscription.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn on_event(&self, event: Event);
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    async fn on_event(&self, event: Event) {
        (self.0)(event).await;
    }
}

/// Wrap an async closure as an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Filters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Predicate applied before an event is queued for a subscription.
#[derive(Clone)]
pub struct EventFilter(Arc<dyn Fn(&Event) -> bool + Send + Sync>);

impl EventFilter {
    /// Only events belonging to `chat_id`.
    pub fn chat(chat_id: i64) -> Self {
        Self(Arc::new(move |event| event.chat_id() == Some(chat_id)))
    }

    /// Only message events sent by `sender_id`.
    pub fn sender(sender_id: i64) -> Self {
        Self(Arc::new(move |event| event.sender_id() == Some(sender_id)))
    }

    /// Arbitrary predicate.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub(crate) fn matches(&self, event: &Event) -> bool {
        (self.0)(event)
    }
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventFilter(..)")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ticket returned by `subscribe`, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub(crate) id: u64,
    pub(crate) kind: EventKind,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

struct SubscriptionEntry {
    id: u64,
    filter: Option<EventFilter>,
    queue: mpsc::UnboundedSender<Event>,
}

/// All active subscriptions, keyed by event kind.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    entries: RwLock<HashMap<EventKind, Vec<SubscriptionEntry>>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a handler and spawn its worker. Must run inside a tokio
    /// runtime.
    pub(crate) fn subscribe(
        &self,
        kind: EventKind,
        filter: Option<EventFilter>,
        handler: Arc<dyn EventHandler>,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<Event>();

        tokio::spawn(async move {
            while let Some(event) = queue_rx.recv().await {
                let fut = handler.on_event(event);
                if std::panic::AssertUnwindSafe(fut).catch_unwind().await.is_err() {
                    tracing::warn!(subscription = id, "event handler panicked");
                }
            }
        });

        self.entries
            .write()
            .entry(kind)
            .or_default()
            .push(SubscriptionEntry {
                id,
                filter,
                queue: queue_tx,
            });

        Subscription { id, kind }
    }

    /// Queue `event` for every matching subscription, in registration
    /// order. Returns how many subscriptions matched.
    pub(crate) fn dispatch(&self, event: &Event) -> usize {
        let entries = self.entries.read();
        let Some(subs) = entries.get(&event.kind()) else {
            return 0;
        };

        let mut delivered = 0;
        for entry in subs {
            if let Some(filter) = &entry.filter {
                if !filter.matches(event) {
                    continue;
                }
            }
            // Send only fails when the worker is gone; the entry gets
            // cleaned up on the next unsubscribe or clear.
            if entry.queue.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Drop one subscription. Returns false when it was already gone.
    pub(crate) fn unsubscribe(&self, sub: Subscription) -> bool {
        let mut entries = self.entries.write();
        let Some(subs) = entries.get_mut(&sub.kind) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|entry| entry.id != sub.id);
        subs.len() != before
    }

    /// Drop every subscription. Workers finish their queued events and
    /// exit when the queue senders drop.
    pub(crate) fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Message, MessageEvent};
    use std::sync::Mutex;
    use std::time::Duration;

    fn message_event(chat_id: i64, sender: i64, text: &str) -> Event {
        Event::Message(MessageEvent {
            chat_id,
            message: Message {
                sender: Some(sender),
                text: Some(text.to_string()),
                ..Message::default()
            },
        })
    }

    fn recording_handler() -> (Arc<dyn EventHandler>, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = handler_fn(move |event: Event| {
            let sink = sink.clone();
            async move {
                if let Event::Message(ev) = event {
                    sink.lock().unwrap().push(ev.message.text.unwrap_or_default());
                }
            }
        });
        (handler, seen)
    }

    async fn settle() {
        // Give worker tasks a chance to drain their queues.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let registry = HandlerRegistry::new();
        let (handler, seen) = recording_handler();
        registry.subscribe(EventKind::Message, None, handler);

        for i in 0..5 {
            registry.dispatch(&message_event(1, 1, &format!("m{i}")));
        }
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn filter_gates_delivery() {
        let registry = HandlerRegistry::new();
        let (handler, seen) = recording_handler();
        registry.subscribe(EventKind::Message, Some(EventFilter::chat(42)), handler);

        assert_eq!(registry.dispatch(&message_event(42, 1, "wanted")), 1);
        assert_eq!(registry.dispatch(&message_event(7, 1, "other chat")), 0);
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec!["wanted"]);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_others() {
        let registry = HandlerRegistry::new();
        let bomb = handler_fn(|_event: Event| async { panic!("boom") });
        registry.subscribe(EventKind::Message, None, bomb);

        let (handler, seen) = recording_handler();
        registry.subscribe(EventKind::Message, None, handler);

        registry.dispatch(&message_event(1, 1, "first"));
        registry.dispatch(&message_event(1, 1, "second"));
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let registry = HandlerRegistry::new();
        let (handler, seen) = recording_handler();
        let sub = registry.subscribe(EventKind::Message, None, handler);

        assert!(registry.unsubscribe(sub));
        assert!(!registry.unsubscribe(sub));

        registry.dispatch(&message_event(1, 1, "after"));
        settle().await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sender_filter_matches_sender() {
        let registry = HandlerRegistry::new();
        let (handler, seen) = recording_handler();
        registry.subscribe(EventKind::Message, Some(EventFilter::sender(3)), handler);

        registry.dispatch(&message_event(1, 3, "mine"));
        registry.dispatch(&message_event(1, 4, "theirs"));
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec!["mine"]);
    }

    #[tokio::test]
    async fn custom_filter_gets_the_full_event() {
        let registry = HandlerRegistry::new();
        let (handler, seen) = recording_handler();
        // A bot-style predicate: only bang-prefixed commands.
        let commands = EventFilter::custom(|event| {
            matches!(event, Event::Message(ev)
                if ev.message.text.as_deref().is_some_and(|t| t.starts_with('!')))
        });
        registry.subscribe(EventKind::Message, Some(commands), handler);

        assert_eq!(registry.dispatch(&message_event(1, 2, "!roll 2d6")), 1);
        assert_eq!(registry.dispatch(&message_event(1, 2, "chatter")), 0);
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec!["!roll 2d6"]);
    }
}
