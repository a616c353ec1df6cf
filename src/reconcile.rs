use std::collections::HashSet;

use tracing::{debug, info};

use crate::lifecycle::{PinLifecycleManager, ReconcileOutcome};
use crate::models::{PinId, PinRecord};
use crate::store::{StoreEvent, StoreResult};

/// Result of a fire-and-forget backend call, delivered back to the board task.
#[derive(Debug)]
pub enum SyncMessage {
    Created { temp_id: PinId, record: PinRecord, result: StoreResult<PinId> },
    Deleted { id: PinId, result: StoreResult<()> },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub confirmed: u64,
    pub inserted: u64,
    pub duplicates: u64,
    pub discarded: u64,
    pub removed: u64,
}

/// Merges backend state into the manager's optimistic state.
///
/// An `Added` event for a known id is dropped. One whose creation time
/// matches a temporary pin confirms that pin in place. Anything else is a
/// pin from another client or an earlier session and is inserted fresh.
#[derive(Debug, Default)]
pub struct SyncReconciler {
    stats: ReconcileStats,
}

impl SyncReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ReconcileStats {
        self.stats
    }

    pub fn apply_event(&mut self, manager: &mut PinLifecycleManager, event: StoreEvent) {
        match event {
            StoreEvent::Added { id, record } => {
                let temp_id = if manager.contains(&id) { None } else { manager.pending_match(&record) };
                let outcome = manager.reconcile(temp_id.as_ref(), id, &record);
                self.count(outcome);
            }
            StoreEvent::Removed { id } => {
                if manager.on_remote_removed(&id) {
                    self.stats.removed += 1;
                }
            }
        }
    }

    /// Catch up from a full snapshot after events were lost. Pins whose
    /// records are gone are removed; records not yet shown are merged like
    /// `Added` events.
    pub fn resync(&mut self, manager: &mut PinLifecycleManager, snapshot: Vec<(PinId, PinRecord)>) {
        let live: HashSet<PinId> = snapshot.iter().map(|(id, _)| id.clone()).collect();
        let removed = manager.retain_live(&live);
        self.stats.removed += removed as u64;
        for (id, record) in snapshot {
            self.apply_event(manager, StoreEvent::Added { id, record });
        }
        info!(removed, live = live.len(), "resynced with pin store");
    }

    pub fn apply_message(&mut self, manager: &mut PinLifecycleManager, message: SyncMessage) {
        match message {
            SyncMessage::Created { temp_id, record, result: Ok(id) } => {
                let outcome = manager.reconcile(Some(&temp_id), id, &record);
                self.count(outcome);
            }
            SyncMessage::Created { temp_id, result: Err(e), .. } => {
                manager.persistence_failed(&temp_id, &e);
            }
            SyncMessage::Deleted { id, result: Ok(()) } => {
                debug!(pin_id = %id, "pin record deleted");
            }
            SyncMessage::Deleted { id, result: Err(e) } => {
                manager.delete_failed(&id, &e);
            }
        }
    }

    fn count(&mut self, outcome: ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Confirmed => self.stats.confirmed += 1,
            ReconcileOutcome::Inserted => self.stats.inserted += 1,
            ReconcileOutcome::Duplicate => self.stats.duplicates += 1,
            ReconcileOutcome::Discarded => self.stats.discarded += 1,
        }
    }
}
