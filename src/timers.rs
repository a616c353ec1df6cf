use std::collections::{BTreeMap, HashMap};

use crate::models::PinId;

/// Scheduled expiry actions, one per pin, ordered by absolute deadline.
///
/// Entries are never cancelled explicitly: the manager re-checks that the
/// pin still exists when an entry fires. Re-scheduling a pin replaces its
/// previous entry.
#[derive(Debug, Default)]
pub struct ExpiryTimers {
    queue: BTreeMap<(i64, u64), PinId>,
    by_pin: HashMap<PinId, (i64, u64)>,
    seq: u64,
}

impl ExpiryTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, pin_id: PinId, deadline_ms: i64) {
        if let Some(old) = self.by_pin.remove(&pin_id) {
            self.queue.remove(&old);
        }
        self.seq += 1;
        let key = (deadline_ms, self.seq);
        self.queue.insert(key, pin_id.clone());
        self.by_pin.insert(pin_id, key);
    }

    /// Move a pending entry onto a new id, keeping its deadline.
    pub fn retag(&mut self, from: &PinId, to: &PinId) -> bool {
        let Some(key) = self.by_pin.remove(from) else { return false };
        if let Some(old) = self.by_pin.remove(to) {
            self.queue.remove(&old);
        }
        self.queue.insert(key, to.clone());
        self.by_pin.insert(to.clone(), key);
        true
    }

    pub fn deadline_of(&self, pin_id: &PinId) -> Option<i64> {
        self.by_pin.get(pin_id).map(|(deadline, _)| *deadline)
    }

    pub fn next_deadline(&self) -> Option<i64> {
        self.queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove and return every entry due at `now_ms`, earliest first.
    pub fn pop_due(&mut self, now_ms: i64) -> Vec<PinId> {
        let mut due = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > now_ms {
                break;
            }
            let pin_id = entry.remove();
            self.by_pin.remove(&pin_id);
            due.push(pin_id);
        }
        due
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
