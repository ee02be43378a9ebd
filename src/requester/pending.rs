use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::{RequestId, Result, RpcError};

/// Completion invoked exactly once with the terminal outcome of a request.
pub type Completion = Box<dyn FnOnce(Result<Option<Value>>) + Send + 'static>;

/// A request waiting for its reply or its deadline.
pub(super) struct PendingRequest {
    // ---
    seq: u64,
    started: Instant,
    ttl: Duration,
    completion: Completion,
    timer: Option<AbortHandle>,
}

impl PendingRequest {
    // ---

    /// Cancel the deadline timer and deliver the outcome.
    ///
    /// Must be called after the entry has left the table and outside the
    /// table lock, so that the completion may itself issue requests.
    pub fn complete(self, outcome: Result<Option<Value>>) {
        // ---
        if let Some(timer) = self.timer {
            timer.abort();
        }
        (self.completion)(outcome);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Tracks in-flight requests by id.
///
/// Presence of an entry is the only notion of "still waiting": whichever of
/// reply or timer removes the entry first decides the outcome, and the other
/// finds nothing. Each entry gets a sequence number so that a timer only ever
/// removes the entry it was armed for, even if the id is reused after the
/// first request completed.
pub(super) struct PendingRequests {
    // ---
    requests: HashMap<RequestId, PendingRequest>,
    next_seq: u64,
}

impl PendingRequests {
    // ---

    /// Create a new empty pending requests tracker
    pub fn new() -> Self {
        // ---
        Self {
            requests: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Register a new pending request and return its sequence number.
    ///
    /// `arm` starts the deadline timer for the given sequence number; it
    /// runs while the table is locked, so the timer cannot observe the table
    /// before the entry exists.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DuplicateRequest`] if `id` is already pending.
    pub fn insert<A>(
        &mut self,
        id: RequestId,
        ttl: Duration,
        completion: Completion,
        arm: A,
    ) -> Result<u64>
    where
        A: FnOnce(u64) -> AbortHandle,
    {
        // ---
        if self.requests.contains_key(&id) {
            return Err(RpcError::DuplicateRequest(id.to_string()));
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let timer = arm(seq);
        self.requests.insert(
            id,
            PendingRequest {
                seq,
                started: Instant::now(),
                ttl,
                completion,
                timer: Some(timer),
            },
        );
        Ok(seq)
    }

    /// Remove the entry for `id`, whatever armed it.
    ///
    /// Used when a reply arrives.
    pub fn take(&mut self, id: &RequestId) -> Option<PendingRequest> {
        // ---
        self.requests.remove(id)
    }

    /// Remove the entry for `id` only if it is the one armed with `seq`.
    ///
    /// Used when a timer fires.
    pub fn take_armed(&mut self, id: &RequestId, seq: u64) -> Option<PendingRequest> {
        // ---
        match self.requests.get(id) {
            Some(entry) if entry.seq == seq => {
                let mut entry = self.requests.remove(id)?;
                // The firing timer is the caller; nothing left to abort.
                entry.timer = None;
                Some(entry)
            }
            _ => None,
        }
    }

    /// Remove every entry.
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        // ---
        self.requests.drain().map(|(_, entry)| entry).collect()
    }

    /// Get the number of pending requests
    pub fn len(&self) -> usize {
        // ---
        self.requests.len()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::{Arc, Mutex};

    type Outcomes = Arc<Mutex<Vec<Result<Option<Value>>>>>;

    fn recorder() -> (Outcomes, Completion) {
        // ---
        let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = outcomes.clone();
        let completion: Completion = Box::new(move |outcome| sink.lock().unwrap().push(outcome));
        (outcomes, completion)
    }

    fn idle_timer() -> AbortHandle {
        tokio::spawn(std::future::pending::<()>()).abort_handle()
    }

    #[tokio::test]
    async fn test_insert_and_take() {
        // ---
        let mut pending = PendingRequests::new();
        let (outcomes, completion) = recorder();
        let id = RequestId::from("r1");

        pending
            .insert(id.clone(), Duration::from_millis(100), completion, |_| idle_timer())
            .unwrap();
        assert_eq!(pending.len(), 1);

        let entry = pending.take(&id).unwrap();
        assert_eq!(pending.len(), 0);
        assert_eq!(entry.ttl(), Duration::from_millis(100));

        entry.complete(Ok(Some(Value::Bool(true))));
        assert_eq!(outcomes.lock().unwrap().len(), 1);

        // Second take finds nothing
        assert!(pending.take(&id).is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        // ---
        let mut pending = PendingRequests::new();
        let (_, first) = recorder();
        let (_, second) = recorder();
        let id = RequestId::from("r1");

        pending
            .insert(id.clone(), Duration::from_secs(1), first, |_| idle_timer())
            .unwrap();
        let err = pending
            .insert(id, Duration::from_secs(1), second, |_| idle_timer())
            .unwrap_err();
        assert!(matches!(err, RpcError::DuplicateRequest(_)));
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_timer_does_not_remove_reused_id() {
        // ---
        let mut pending = PendingRequests::new();
        let id = RequestId::from("r1");

        let (_, first) = recorder();
        let stale = pending
            .insert(id.clone(), Duration::from_secs(1), first, |_| idle_timer())
            .unwrap();
        pending.take(&id).unwrap().complete(Ok(None));

        let (_, second) = recorder();
        let live = pending
            .insert(id.clone(), Duration::from_secs(1), second, |_| idle_timer())
            .unwrap();

        assert!(pending.take_armed(&id, stale).is_none());
        assert_eq!(pending.len(), 1);
        assert!(pending.take_armed(&id, live).is_some());
        assert_eq!(pending.len(), 0);
    }
}
