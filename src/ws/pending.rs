use std::collections::HashMap;

use tokio::sync::oneshot;

/// Requests written to the socket that are still waiting for their reply.
///
/// Owned by the connection task; dropping the table (or calling
/// [`clear`](Self::clear)) drops every reply sender, which the waiting callers
/// observe as a closed connection.
#[derive(Debug)]
pub struct PendingRequests<T> {
    waiting: HashMap<u64, oneshot::Sender<T>>,
}

impl<T> Default for PendingRequests<T> {
    fn default() -> Self {
        Self {
            waiting: HashMap::new(),
        }
    }
}

impl<T> PendingRequests<T> {
    /// Track a request. Returns `false` and leaves the table untouched if the
    /// id is already pending.
    pub fn insert(&mut self, id: u64, reply: oneshot::Sender<T>) -> bool {
        if self.waiting.contains_key(&id) {
            return false;
        }
        self.waiting.insert(id, reply);
        true
    }

    /// Resolve and remove a pending request.
    ///
    /// Unknown ids (already resolved or never issued) are a no-op and return
    /// `false`. A caller that stopped waiting is not an error.
    pub fn resolve(&mut self, id: u64, reply: T) -> bool {
        let Some(waiter) = self.waiting.remove(&id) else {
            return false;
        };
        _ = waiter.send(reply);
        true
    }

    /// Stop tracking a request without answering it.
    pub fn remove(&mut self, id: u64) -> bool {
        self.waiting.remove(&id).is_some()
    }

    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.waiting.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Abandon every pending request, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let abandoned = self.waiting.len();
        self.waiting.clear();
        abandoned
    }
}
