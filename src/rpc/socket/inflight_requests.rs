use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct InflightRequest {
    pub transaction_id: u32,
    pub to: String,
    pub sent_at: Instant,
}

#[derive(Debug, Default)]
pub struct InflightRequests {
    // Insertion order, which is also `sent_at` order.
    requests: Vec<InflightRequest>,
    // transaction_id => index into `requests`.
    index: HashMap<u32, usize>,
}

impl InflightRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn add(&mut self, transaction_id: u32, to: &str, sent_at: Instant) {
        // A wrapped around transaction id replaces the old request, whose
        // entry is left behind for `cleanup`.
        let pos = self.requests.len();
        self.requests.push(InflightRequest {
            transaction_id,
            to: to.to_string(),
            sent_at,
        });
        self.index.insert(transaction_id, pos);
    }

    pub fn contains(&self, transaction_id: u32) -> bool {
        self.index.contains_key(&transaction_id)
    }

    /// Remove the inflight request if it was sent to `from`.
    pub fn remove(&mut self, transaction_id: u32, from: &str) -> Option<InflightRequest> {
        let &pos = self.index.get(&transaction_id)?;
        let request = self.requests.get(pos)?;

        if request.to != from {
            return None;
        }

        let request = request.clone();
        self.index.remove(&transaction_id);

        Some(request)
    }

    /// Drop requests sent at or before `now - timeout`, returning their ids.
    pub fn cleanup(&mut self, now: Instant, timeout: Duration) -> Vec<u32> {
        let mut expired = Vec::new();
        let mut requests = Vec::with_capacity(self.index.len());
        let mut index = HashMap::with_capacity(self.index.len());

        for (pos, request) in self.requests.drain(..).enumerate() {
            // Removed or replaced.
            if self.index.get(&request.transaction_id) != Some(&pos) {
                continue;
            }

            if now.saturating_duration_since(request.sent_at) >= timeout {
                expired.push(request.transaction_id);
            } else {
                index.insert(request.transaction_id, requests.len());
                requests.push(request);
            }
        }

        self.requests = requests;
        self.index = index;

        expired
    }
}
