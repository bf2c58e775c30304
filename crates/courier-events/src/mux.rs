//! Stream multiplexer: hands live events to long-polling listeners.
//!
//! A listener registers a wait slot for one recipient and then awaits it.
//! Each slot is a single-use [`oneshot`] sender, so it resolves at most once:
//! either with the next event sent to its recipient or with `None` when its
//! [`CancelSignal`] fires.

use courier_types::{IndexedEvent, UserId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, watch};

use crate::error::EventError;

/// Broadcast cancellation shared by any number of listeners.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fires the signal. Every listener created with it resolves to `None`.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Completes once the signal has fired.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once fired.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

type Slots = Mutex<HashMap<UserId, VecDeque<Slot>>>;

#[derive(Debug)]
struct Slot {
    tx: oneshot::Sender<IndexedEvent>,
    cancel: CancelSignal,
}

impl Slot {
    fn is_live(&self) -> bool {
        !self.tx.is_closed() && !self.cancel.is_cancelled()
    }
}

/// Drops every slot of `recipient` that can no longer be delivered to.
fn prune(slots: &mut HashMap<UserId, VecDeque<Slot>>, recipient: &UserId) {
    if let Some(queue) = slots.get_mut(recipient) {
        queue.retain(Slot::is_live);
        if queue.is_empty() {
            slots.remove(recipient);
        }
    }
}

/// A registered wait slot.
///
/// Dropping a listener removes its slot from the multiplexer.
#[derive(Debug)]
pub struct Listener {
    rx: oneshot::Receiver<IndexedEvent>,
    cancel: CancelSignal,
    recipient: UserId,
    slots: Weak<Slots>,
}

impl Listener {
    /// Waits for the next event delivered to this slot.
    ///
    /// Returns `None` once the cancel signal fires. A slot is never handed an
    /// event after its signal has fired, so an event returned here was
    /// delivered before cancellation.
    pub async fn wait(mut self) -> Option<IndexedEvent> {
        tokio::select! {
            biased;
            delivered = &mut self.rx => delivered.ok(),
            _ = self.cancel.cancelled() => None,
        }
    }

    /// Like [`Listener::wait`], treating an elapsed timeout as cancellation.
    pub async fn wait_timeout(self, timeout: Duration) -> Option<IndexedEvent> {
        tokio::time::timeout(timeout, self.wait()).await.ok().flatten()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.rx.close();
        let Some(slots) = self.slots.upgrade() else {
            return;
        };
        // A poisoned map is cleaned up by the next send instead.
        if let Ok(mut slots) = slots.lock() {
            prune(&mut slots, &self.recipient);
        };
    }
}

#[derive(Debug, Default)]
pub struct StreamMux {
    slots: Arc<Slots>,
}

impl StreamMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a wait slot for `recipient`. The slot is live as soon as this
    /// returns, before the returned listener is first polled.
    pub fn listen(&self, recipient: &UserId, cancel: &CancelSignal) -> Result<Listener, EventError> {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots.lock().map_err(|_| EventError::LockPoisoned)?;
        prune(&mut slots, recipient);
        slots.entry(recipient.clone()).or_default().push_back(Slot {
            tx,
            cancel: cancel.clone(),
        });
        Ok(Listener {
            rx,
            cancel: cancel.clone(),
            recipient: recipient.clone(),
            slots: Arc::downgrade(&self.slots),
        })
    }

    /// Delivers `event` to the oldest live slot of every recipient.
    ///
    /// Slots whose listener has gone away or whose cancel signal has fired
    /// are discarded along the way. Recipients without a live slot miss the
    /// event; they pick it up from the logs on their next read.
    pub fn send(&self, recipients: &[UserId], event: &IndexedEvent) -> Result<(), EventError> {
        let mut slots = self.slots.lock().map_err(|_| EventError::LockPoisoned)?;
        let mut delivered = 0usize;
        for recipient in recipients {
            let Some(queue) = slots.get_mut(recipient) else {
                continue;
            };
            let mut pending = event.clone();
            while let Some(Slot { tx, cancel }) = queue.pop_front() {
                if cancel.is_cancelled() {
                    continue;
                }
                match tx.send(pending) {
                    Ok(()) => {
                        delivered += 1;
                        break;
                    }
                    Err(returned) => pending = returned,
                }
            }
            if queue.is_empty() {
                slots.remove(recipient);
            }
        }
        tracing::trace!(
            index = event.index,
            recipients = recipients.len(),
            delivered,
            "live event multiplexed"
        );
        Ok(())
    }

    /// Number of slots registered for `recipient` and not yet pruned.
    pub fn pending(&self, recipient: &UserId) -> usize {
        self.slots
            .lock()
            .map(|slots| slots.get(recipient).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }
}
