//! A bounded, coalescing notification channel.
//!
//! Informer callbacks must never block on a slow sync loop, so the channel
//! is a ring: when it is full the oldest pending trigger is dropped. Every
//! sync rebuilds the desired state from scratch, which is what makes
//! dropping safe.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::Notify;

/// What changed, for logging only; the sync loop treats every trigger the
/// same way.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trigger {
    pub kind: &'static str,
    pub namespace: String,
    pub name: String,
}

impl Trigger {
    pub fn new(kind: &'static str, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<VecDeque<Trigger>>,
    notify: Notify,
    capacity: usize,
    senders: AtomicUsize,
}

pub fn channel(capacity: usize) -> (Sender, Receiver) {
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::with_capacity(capacity)),
        notify: Notify::new(),
        capacity,
        senders: AtomicUsize::new(1),
    });
    (Sender(shared.clone()), Receiver(shared))
}

#[derive(Debug)]
pub struct Sender(Arc<Shared>);

impl Sender {
    /// Never blocks; overwrites the oldest pending trigger on overflow.
    pub fn send(&self, trigger: Trigger) {
        {
            let mut queue = self.0.queue.lock();
            if queue.len() == self.0.capacity {
                if let Some(dropped) = queue.pop_front() {
                    tracing::debug!(?dropped, "change channel full, dropping oldest trigger");
                }
            }
            queue.push_back(trigger);
        }
        self.0.notify.notify_one();
    }
}

impl Clone for Sender {
    fn clone(&self) -> Self {
        self.0.senders.fetch_add(1, Ordering::Relaxed);
        Self(self.0.clone())
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        if self.0.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.notify.notify_one();
        }
    }
}

#[derive(Debug)]
pub struct Receiver(Arc<Shared>);

impl Receiver {
    /// Returns `None` once every sender is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<Trigger> {
        loop {
            if let Some(trigger) = self.0.queue.lock().pop_front() {
                return Some(trigger);
            }
            if self.0.senders.load(Ordering::Acquire) == 0 {
                return None;
            }
            self.0.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order() {
        let (tx, mut rx) = channel(4);
        tx.send(Trigger::new("service", "default", "a"));
        tx.send(Trigger::new("service", "default", "b"));
        assert_eq!(rx.recv().await.unwrap().name, "a");
        assert_eq!(rx.recv().await.unwrap().name, "b");
    }

    #[tokio::test]
    async fn overflow_drops_the_oldest() {
        let (tx, mut rx) = channel(2);
        for name in ["a", "b", "c"] {
            tx.send(Trigger::new("service", "default", name));
        }
        assert_eq!(rx.recv().await.unwrap().name, "b");
        assert_eq!(rx.recv().await.unwrap().name, "c");
    }

    #[tokio::test]
    async fn recv_ends_when_senders_are_gone() {
        let (tx, mut rx) = channel(2);
        tx.send(Trigger::new("service", "default", "a"));
        drop(tx);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_wakes_on_send() {
        let (tx, mut rx) = channel(2);
        let recv = tokio::spawn(async move { rx.recv().await });
        tokio::task::yield_now().await;
        tx.send(Trigger::new("endpoints", "default", "late"));
        assert_eq!(recv.await.unwrap().unwrap().name, "late");
    }
}
