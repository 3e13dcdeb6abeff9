//! Per-target FIFO ordering of remote calls.
//!
//! A ticket is taken synchronously when an operation is issued, so issuance
//! order is fixed before any task runs. The ticket's turn comes once every
//! earlier ticket on a related key (see [`TargetKey::must_follow`]) has been
//! dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::cache::TargetKey;

/// Resolves when the ticket that owns it is dropped
type Tail = Shared<BoxFuture<'static, ()>>;

struct Slot {
    ticket: u64,
    tail: Tail,
}

type Slots = Arc<Mutex<HashMap<TargetKey, Slot>>>;

#[derive(Clone, Default)]
pub struct Sequencer {
    slots: Slots,
    next_ticket: Arc<AtomicU64>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues behind every outstanding ticket the key must follow
    pub fn enqueue(&self, key: TargetKey) -> Ticket {
        let id = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (done, released) = oneshot::channel::<()>();
        let tail: Tail = released.map(|_| ()).boxed().shared();

        let mut slots = self.slots.lock();
        let waits = slots
            .iter()
            .filter(|(other, _)| key.must_follow(other))
            .map(|(_, slot)| slot.tail.clone())
            .collect();
        slots.insert(key.clone(), Slot { ticket: id, tail });

        Ticket {
            id,
            key,
            waits,
            _done: done,
            slots: Arc::clone(&self.slots),
        }
    }

    /// Keys with at least one outstanding ticket
    pub fn busy_keys(&self) -> usize {
        self.slots.lock().len()
    }
}

/// A place in the queue; dropping it lets followers proceed
pub struct Ticket {
    id: u64,
    key: TargetKey,
    waits: Vec<Tail>,
    _done: oneshot::Sender<()>,
    slots: Slots,
}

impl Ticket {
    pub fn key(&self) -> &TargetKey {
        &self.key
    }

    /// Waits until every earlier related ticket is released
    ///
    /// Cancel safe: a waiter given up on is waited for again on the next call.
    pub async fn turn(&mut self) {
        join_all(self.waits.iter().cloned()).await;
        self.waits.clear();
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        if slots.get(&self.key).map(|slot| slot.ticket) == Some(self.id) {
            slots.remove(&self.key);
        }
    }
}
