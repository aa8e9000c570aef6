//! Push-event fan-out with scoped subscriptions.
//!
//! A [`Subscription`] is registered for a set of [`EventKind`]s and stays
//! registered until it is dropped or [`Subscription::unsubscribe`] is called.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::messages::{EventKind, PushEvent};

struct Subscriber {
    kinds: Vec<EventKind>,
    tx: mpsc::UnboundedSender<PushEvent>,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    closed: bool,
    subscribers: HashMap<u64, Subscriber>,
}

/// Shared registry of event subscribers. Clones refer to the same hub.
#[derive(Clone, Default)]
pub struct EventHub {
    inner: Arc<Mutex<HubInner>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register for `kinds`. On a closed hub the returned subscription
    /// yields `None` immediately.
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        if !inner.closed {
            inner.subscribers.insert(
                id,
                Subscriber {
                    kinds: kinds.to_vec(),
                    tx,
                },
            );
        }
        Subscription {
            id,
            hub: Arc::downgrade(&self.inner),
            events: rx,
        }
    }

    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(&EventKind::ALL)
    }

    /// Deliver `event` to every matching subscriber; returns how many got it.
    pub fn emit(&self, event: PushEvent) -> usize {
        let kind = event.kind();
        let mut inner = self.inner.lock();
        let mut delivered = 0;
        inner.subscribers.retain(|_, sub| {
            if !sub.kinds.contains(&kind) {
                return !sub.tx.is_closed();
            }
            match sub.tx.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        trace!(event = kind.name(), delivered, "event emitted");
        delivered
    }

    /// End every subscription; later subscriptions start closed.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

/// Handle for one registration on an [`EventHub`].
pub struct Subscription {
    id: u64,
    hub: Weak<Mutex<HubInner>>,
    events: mpsc::UnboundedReceiver<PushEvent>,
}

impl Subscription {
    /// Next event, or `None` once the hub is closed or gone.
    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PushEvent> {
        self.events.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.lock().subscribers.remove(&self.id);
        }
    }
}
