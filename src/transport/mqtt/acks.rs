//! Broker acknowledgement tracking
//!
//! rumqttc assigns packet ids inside its event loop, after a request has left
//! the client handle. Requests of each kind are queued in the order they were
//! handed to the client and bound to a packet id when the matching outgoing
//! event is polled. The acknowledgement carrying that id settles the waiter.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;

/// Request types the broker acknowledges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Publish,
    Subscribe,
    Unsubscribe,
}

/// Outcome of one acknowledged request; `Err` carries the broker's reason
pub type AckResult = Result<(), String>;

type Waiter = oneshot::Sender<AckResult>;

#[derive(Default)]
struct Inner {
    queued: HashMap<RequestKind, VecDeque<Waiter>>,
    in_flight: HashMap<(RequestKind, u16), Waiter>,
}

/// Requests of one session still waiting for the broker
#[derive(Default)]
pub struct PendingAcks {
    inner: Mutex<Inner>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a waiter for the next request of `kind` handed to the client
    pub fn enqueue(&self, kind: RequestKind) -> oneshot::Receiver<AckResult> {
        let (tx, rx) = oneshot::channel();
        self.lock().queued.entry(kind).or_default().push_back(tx);
        rx
    }

    /// Drop the most recent waiter of `kind` after the client refused the request
    pub fn cancel_last(&self, kind: RequestKind) {
        if let Some(queue) = self.lock().queued.get_mut(&kind) {
            queue.pop_back();
        }
    }

    /// Bind the oldest queued request of `kind` to the packet id it went out with
    ///
    /// QoS 0 publishes carry packet id 0 and are never acknowledged, so they
    /// complete as soon as they are written.
    pub fn bind(&self, kind: RequestKind, pkid: u16) {
        let mut inner = self.lock();
        let Some(waiter) = inner.queued.get_mut(&kind).and_then(VecDeque::pop_front) else {
            return;
        };
        if pkid == 0 {
            let _ = waiter.send(Ok(()));
        } else {
            inner.in_flight.insert((kind, pkid), waiter);
        }
    }

    /// Settle the request the broker acknowledged
    pub fn settle(&self, kind: RequestKind, pkid: u16, result: AckResult) {
        if let Some(waiter) = self.lock().in_flight.remove(&(kind, pkid)) {
            let _ = waiter.send(result);
        }
    }

    /// Fail every outstanding request; the session is gone
    pub fn fail_all(&self, reason: &str) {
        let waiters: Vec<Waiter> = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            inner
                .queued
                .drain()
                .flat_map(|(_, queue)| queue)
                .chain(inner.in_flight.drain().map(|(_, waiter)| waiter))
                .collect()
        };
        for waiter in waiters {
            let _ = waiter.send(Err(reason.to_string()));
        }
    }

    /// Number of requests not yet settled
    pub fn outstanding(&self) -> usize {
        let inner = self.lock();
        inner.queued.values().map(VecDeque::len).sum::<usize>() + inner.in_flight.len()
    }
}
