//! Correlation store
//!
//! Owns every pending request and pending response, keyed by request id.
//! Each id has one slot that moves `Queued -> InFlight -> Responded` and is
//! removed when the response is consumed or the waiting caller gives up, so a
//! slot never holds a request and a response at the same time. Slots live in a
//! `DashMap` (per-shard locking); a mutex-guarded queue keeps delivery FIFO.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use burrow_shared::protocol::{RequestId, TunnelRequest, TunnelResponse};
use burrow_shared::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::time::{timeout, timeout_at, Instant};

enum SlotState {
    Queued(TunnelRequest),
    InFlight,
    Responded(TunnelResponse),
}

struct Slot {
    state: SlotState,
    /// Wakes the relay handler waiting on this id
    ready: Arc<Notify>,
}

struct Inner {
    slots: DashMap<RequestId, Slot>,
    /// Delivery order; may hold ids retired while still queued
    queue: Mutex<VecDeque<RequestId>>,
    request_ready: Notify,
    max_pending: usize,
}

/// Counts of outstanding ids per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub queued: usize,
    pub in_flight: usize,
    pub responded: usize,
}

/// Shared handle to the pending request/response tables
#[derive(Clone)]
pub struct CorrelationStore {
    inner: Arc<Inner>,
}

impl CorrelationStore {
    /// Create an empty store holding at most `max_pending` outstanding ids.
    pub fn new(max_pending: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: DashMap::new(),
                queue: Mutex::new(VecDeque::new()),
                request_ready: Notify::new(),
                max_pending,
            }),
        }
    }

    /// Queue a request captured at the external listener.
    pub async fn enqueue_request(&self, request: TunnelRequest) -> Result<()> {
        let mut queue = self.inner.queue.lock().await;

        // Ids retired while queued linger until polled; drop them before the
        // queue outgrows the live slots.
        if queue.len() >= 2 * self.inner.max_pending {
            queue.retain(|id| self.inner.slots.contains_key(id));
        }

        if self.inner.slots.len() >= self.inner.max_pending {
            return Err(Error::QueueFull(self.inner.max_pending));
        }

        let id = request.id.clone();
        match self.inner.slots.entry(id.clone()) {
            Entry::Occupied(_) => return Err(Error::DuplicateId(id)),
            Entry::Vacant(slot) => {
                slot.insert(Slot {
                    state: SlotState::Queued(request),
                    ready: Arc::new(Notify::new()),
                });
            }
        }
        queue.push_back(id);
        drop(queue);

        self.inner.request_ready.notify_one();
        Ok(())
    }

    /// Hand the oldest queued request to a client, marking it in flight.
    /// `None` means nothing is queued.
    pub async fn take_next_request(&self) -> Option<TunnelRequest> {
        let mut queue = self.inner.queue.lock().await;

        while let Some(id) = queue.pop_front() {
            let Some(mut slot) = self.inner.slots.get_mut(&id) else {
                continue;
            };
            match std::mem::replace(&mut slot.state, SlotState::InFlight) {
                SlotState::Queued(request) => return Some(request),
                other => slot.state = other,
            }
        }
        None
    }

    /// Like [`take_next_request`](Self::take_next_request), but waits up to
    /// `wait` for a request to be queued.
    pub async fn next_request(&self, wait: Duration) -> Option<TunnelRequest> {
        if wait.is_zero() {
            return self.take_next_request().await;
        }

        let deadline = Instant::now() + wait;
        loop {
            let notified = self.inner.request_ready.notified();
            if let Some(request) = self.take_next_request().await {
                return Some(request);
            }
            if timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Store the response for an in-flight request and wake its caller.
    ///
    /// Only ids that were polled and not yet answered or retired are accepted;
    /// anything else is rejected without touching the tables.
    pub fn submit_response(&self, response: TunnelResponse) -> Result<()> {
        let Some(mut slot) = self.inner.slots.get_mut(&response.id) else {
            return Err(Error::UnknownId(response.id));
        };
        match slot.state {
            SlotState::InFlight => {}
            SlotState::Queued(_) => return Err(Error::UnknownId(response.id.clone())),
            SlotState::Responded(_) => return Err(Error::DuplicateId(response.id.clone())),
        }
        slot.state = SlotState::Responded(response);
        slot.ready.notify_one();
        Ok(())
    }

    /// Remove and return the response for `id`, retiring the id.
    /// `None` means the response is not ready yet.
    pub fn take_response(&self, id: &str) -> Option<TunnelResponse> {
        let (_, slot) = self
            .inner
            .slots
            .remove_if(id, |_, slot| matches!(slot.state, SlotState::Responded(_)))?;
        match slot.state {
            SlotState::Responded(response) => Some(response),
            _ => None,
        }
    }

    /// Wait up to `limit` for the response to `id`.
    ///
    /// Fails with `Timeout` on expiry and `UnknownId` if the id is retired
    /// while waiting. The id is not retired on timeout; callers do that.
    pub async fn wait_response(&self, id: &str, limit: Duration) -> Result<TunnelResponse> {
        let ready = self
            .inner
            .slots
            .get(id)
            .map(|slot| slot.ready.clone())
            .ok_or_else(|| Error::UnknownId(id.to_string()))?;

        let wait = async {
            loop {
                if let Some(response) = self.take_response(id) {
                    return Ok(response);
                }
                if !self.inner.slots.contains_key(id) {
                    return Err(Error::UnknownId(id.to_string()));
                }
                ready.notified().await;
            }
        };

        timeout(limit, wait).await.map_err(|_| Error::Timeout)?
    }

    /// Drop every trace of `id`. Returns whether anything was removed.
    pub fn retire(&self, id: &str) -> bool {
        match self.inner.slots.remove(id) {
            Some((_, slot)) => {
                slot.ready.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        for slot in self.inner.slots.iter() {
            match slot.state {
                SlotState::Queued(_) => stats.queued += 1,
                SlotState::InFlight => stats.in_flight += 1,
                SlotState::Responded(_) => stats.responded += 1,
            }
        }
        stats
    }
}
