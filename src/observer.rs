//! State-change notifications for controllers.
//!
//! Consumers call [`EventHub::subscribe`] and hold the returned
//! [`Subscription`]; dropping it unsubscribes. Delivery uses tokio unbounded
//! channels so emitting never blocks the controller.

use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

struct HubInner<E> {
    next_id: u64,
    subscribers: Vec<(u64, UnboundedSender<E>)>,
}

pub struct EventHub<E> {
    inner: Arc<Mutex<HubInner<E>>>,
}

impl<E> Clone for EventHub<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Clone> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone> EventHub<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self) -> Subscription<E> {
        let (tx, rx) = unbounded_channel();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, tx));
        Subscription {
            id,
            hub: Arc::downgrade(&self.inner),
            rx,
        }
    }

    pub fn emit(&self, event: E) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        // receivers closed without dropping the guard are pruned here
        inner
            .subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .subscribers
            .len()
    }
}

/// Receiving end of a subscription; unsubscribes on drop
pub struct Subscription<E> {
    id: u64,
    hub: Weak<Mutex<HubInner<E>>>,
    rx: UnboundedReceiver<E>,
}

impl<E> Subscription<E> {
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    /// Everything delivered so far, without waiting
    pub fn drain(&mut self) -> Vec<E> {
        let mut out = Vec::new();
        while let Ok(e) = self.rx.try_recv() {
            out.push(e);
        }
        out
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            let mut inner = hub.lock().unwrap_or_else(|e| e.into_inner());
            inner.subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}
