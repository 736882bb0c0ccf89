//! Pending-reply inbox.
//!
//! A waiter registers a key before sending its request; the router appends
//! every matching frame to the waiter's queue. Dropping the [`Waiter`]
//! removes the entry, so a request that fails or is abandoned never leaks
//! its slot. Frames for keys nobody waits on are discarded.

use dashmap::DashMap;
use parking_lot::Mutex;
use sharefs_wire::Direction;
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Most frames held per waiter; older ones are dropped first
const MAX_QUEUED: usize = 64;

/// `(peer, correlation id, direction)`
pub type InboxKey = (Ipv4Addr, u32, Direction);

#[derive(Debug, Default)]
struct Slot {
    frames: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    // Live waiters; only touched under the map's shard lock
    waiters: AtomicUsize,
}

/// Frames awaiting collection, keyed by peer, id and direction
#[derive(Debug, Default)]
pub struct Inbox {
    slots: DashMap<InboxKey, Arc<Slot>>,
}

impl Inbox {
    /// Empty inbox
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start collecting frames for `key`. A second registration for a live
    /// key shares the first one's queue.
    pub fn register(self: &Arc<Self>, key: InboxKey) -> Waiter {
        let slot = {
            let entry = self.slots.entry(key).or_default();
            entry.waiters.fetch_add(1, Ordering::AcqRel);
            entry.clone()
        };
        Waiter {
            inbox: self.clone(),
            key,
            slot,
        }
    }

    /// Append a frame for `key`. Returns false if nobody is waiting.
    pub fn deliver(&self, key: InboxKey, frame: Vec<u8>) -> bool {
        let Some(slot) = self.slots.get(&key).map(|s| s.clone()) else {
            return false;
        };
        {
            let mut frames = slot.frames.lock();
            if frames.len() == MAX_QUEUED {
                frames.pop_front();
            }
            frames.push_back(frame);
        }
        slot.notify.notify_one();
        true
    }

    /// Whether anybody waits on `key`
    pub fn is_waiting(&self, key: &InboxKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Number of live waiters
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nobody waits
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Scoped registration in the [`Inbox`]
#[derive(Debug)]
pub struct Waiter {
    inbox: Arc<Inbox>,
    key: InboxKey,
    slot: Arc<Slot>,
}

impl Waiter {
    /// The key this waiter collects
    pub fn key(&self) -> InboxKey {
        self.key
    }

    /// Take the oldest queued frame without waiting
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        self.slot.frames.lock().pop_front()
    }

    /// Wait for the next frame
    pub async fn recv(&self) -> Vec<u8> {
        loop {
            if let Some(frame) = self.try_recv() {
                return frame;
            }
            self.slot.notify.notified().await;
        }
    }

    /// Wait up to `timeout` for the next frame
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        tokio::time::timeout(timeout, self.recv()).await.ok()
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        // Last waiter out removes the entry, whoever else holds the slot
        self.inbox.slots.remove_if(&self.key, |_, slot| {
            Arc::ptr_eq(slot, &self.slot) && slot.waiters.fetch_sub(1, Ordering::AcqRel) == 1
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn key(id: u32) -> InboxKey {
        (PEER, id, Direction::ToRequester)
    }

    #[tokio::test]
    async fn test_deliver_in_order() {
        let inbox = Inbox::new();
        let waiter = inbox.register(key(1));
        assert!(inbox.deliver(key(1), vec![1]));
        assert!(inbox.deliver(key(1), vec![2]));
        assert_eq!(waiter.recv().await, vec![1]);
        assert_eq!(waiter.recv().await, vec![2]);
        assert!(waiter.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unregistered_dropped() {
        let inbox = Inbox::new();
        assert!(!inbox.deliver(key(9), vec![1]));
        assert!(inbox.is_empty());
    }

    #[tokio::test]
    async fn test_guard_removes_entry() {
        let inbox = Inbox::new();
        {
            let _waiter = inbox.register(key(3));
            assert!(inbox.is_waiting(&key(3)));
        }
        assert!(!inbox.is_waiting(&key(3)));
    }

    #[tokio::test]
    async fn test_entry_removed_while_delivery_holds_slot() {
        let inbox = Inbox::new();
        let waiter = inbox.register(key(2));
        // A delivery in flight keeps its own reference to the slot
        let in_flight = inbox.slots.get(&key(2)).map(|s| s.clone()).unwrap();
        drop(waiter);
        assert!(!inbox.is_waiting(&key(2)));
        assert!(inbox.is_empty());
        drop(in_flight);
        assert!(!inbox.deliver(key(2), vec![1]));
    }

    #[tokio::test]
    async fn test_shared_registration_outlives_first_waiter() {
        let inbox = Inbox::new();
        let first = inbox.register(key(4));
        let second = inbox.register(key(4));
        drop(first);
        assert!(inbox.is_waiting(&key(4)));
        assert!(inbox.deliver(key(4), vec![3]));
        assert_eq!(second.try_recv(), Some(vec![3]));
        drop(second);
        assert!(inbox.is_empty());
    }

    #[tokio::test]
    async fn test_directions_do_not_cross() {
        let inbox = Inbox::new();
        let requester = inbox.register((PEER, 1, Direction::ToRequester));
        let responder = inbox.register((PEER, 1, Direction::ToResponder));
        inbox.deliver((PEER, 1, Direction::ToResponder), vec![7]);
        assert!(requester.try_recv().is_none());
        assert_eq!(responder.try_recv(), Some(vec![7]));
    }

    #[tokio::test]
    async fn test_recv_wakes_on_delivery() {
        let inbox = Inbox::new();
        let waiter = inbox.register(key(5));
        let sender = inbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sender.deliver(key(5), vec![42]);
        });
        let got = waiter.recv_timeout(Duration::from_secs(2)).await;
        assert_eq!(got, Some(vec![42]));
    }

    #[tokio::test]
    async fn test_recv_timeout_expires() {
        let inbox = Inbox::new();
        let waiter = inbox.register(key(6));
        assert!(waiter.recv_timeout(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn test_queue_is_bounded() {
        let inbox = Inbox::new();
        let waiter = inbox.register(key(8));
        for i in 0..(MAX_QUEUED + 10) {
            inbox.deliver(key(8), vec![i as u8]);
        }
        assert_eq!(waiter.try_recv(), Some(vec![10]));
    }
}
