//! Ownership of the active pin set: creation rules, reconciliation with the
//! backend, deletion and timed expiry.
//!
//! The manager never talks to the backend or the view directly. Every
//! mutation appends [`PinChange`]s for the view adapter and
//! [`StoreCommand`]s for the sync boundary; the owner drains both after each
//! step. That keeps every operation synchronous and safe to interleave with
//! timer and backend callbacks on a single task.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use metrics::increment_counter;
use tracing::{debug, error, info, warn};

use crate::clock::{datetime_from_ms, Clock};
use crate::error::PinError;
use crate::identity::IdentityProvider;
use crate::models::{Pin, PinColor, PinId, PinRecord, Position, UserId};
use crate::store::StoreError;
use crate::timers::ExpiryTimers;

pub const FADE_DURATION_MS: i64 = 60_000;
pub const MAX_PINS_PER_USER: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifecycleConfig {
    pub fade_ms: i64,
    pub max_pins_per_user: usize,
    /// Whether a backend is connected. Without one, pins stay local-only.
    pub persistent: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self { fade_ms: FADE_DURATION_MS, max_pins_per_user: MAX_PINS_PER_USER, persistent: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    /// Optimistic, still carrying its temporary id.
    Pending,
    /// Backed by an authoritative backend record.
    Confirmed,
    /// Never persisted; expires client-side.
    LocalOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PinChange {
    Inserted(Pin),
    /// Temporary id replaced in place by the authoritative one.
    Confirmed { temp_id: PinId, pin: Pin },
    /// Fade window elapsed; the pin may linger until its record is removed.
    Expired(PinId),
    Removed(PinId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
    Create { temp_id: PinId, record: PinRecord },
    Delete { id: PinId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Id already known; nothing changed.
    Duplicate,
    Confirmed,
    Inserted,
    /// The pin was deleted locally before its confirmation arrived.
    Discarded,
}

#[derive(Debug)]
struct ActivePin {
    pin: Pin,
    state: PinState,
    expired: bool,
}

pub struct PinLifecycleManager {
    config: LifecycleConfig,
    clock: Arc<dyn Clock>,
    identity: Arc<dyn IdentityProvider>,
    pins: HashMap<PinId, ActivePin>,
    timers: ExpiryTimers,
    // pending pins deleted by their owner, keyed by temporary id
    retired_pending: HashMap<PinId, Pin>,
    // authoritative ids this client deleted, until the backend echoes the removal
    awaiting_removal: HashSet<PinId>,
    changes: Vec<PinChange>,
    commands: Vec<StoreCommand>,
}

impl PinLifecycleManager {
    pub fn new(
        config: LifecycleConfig,
        clock: Arc<dyn Clock>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            config,
            clock,
            identity,
            pins: HashMap::new(),
            timers: ExpiryTimers::new(),
            retired_pending: HashMap::new(),
            awaiting_removal: HashSet::new(),
            changes: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Validate the actor's quota and color, then place an optimistic pin.
    pub fn create_pin(
        &mut self,
        position: Position,
        color: PinColor,
        actor: &UserId,
    ) -> Result<Pin, PinError> {
        let owned = self.owned_count(actor);
        if owned >= self.config.max_pins_per_user {
            increment_counter!("pinmap_pin_rejections_total", "reason" => "quota");
            debug!(user = %actor, owned, "pin rejected: quota exceeded");
            return Err(PinError::QuotaExceeded { limit: self.config.max_pins_per_user });
        }
        if self.owned(actor).any(|p| p.color == color) {
            increment_counter!("pinmap_pin_rejections_total", "reason" => "duplicate_color");
            debug!(user = %actor, %color, "pin rejected: color already placed");
            return Err(PinError::DuplicateColor(color));
        }

        let now = self.clock.now_ms();
        let created_at = datetime_from_ms(now);
        let id = self.unique_temp_id(PinId::temporary(&created_at));
        let pin = Pin {
            id: id.clone(),
            position,
            color,
            created_at,
            created_at_ms: now,
            created_by: actor.clone(),
        };
        let state = if self.config.persistent { PinState::Pending } else { PinState::LocalOnly };
        self.insert(pin.clone(), state);
        if self.config.persistent {
            self.commands.push(StoreCommand::Create { temp_id: id.clone(), record: pin.to_record() });
        }
        increment_counter!("pinmap_pins_created_total");
        info!(pin_id = %id, user = %actor, %color, "pin placed");
        Ok(pin)
    }

    // Two creations in the same millisecond would share a timestamp.
    fn unique_temp_id(&self, base: PinId) -> PinId {
        let taken = |id: &PinId| self.pins.contains_key(id) || self.retired_pending.contains_key(id);
        if !taken(&base) {
            return base;
        }
        let mut n = 1u32;
        loop {
            let candidate = PinId::new(format!("{base}-{n}"));
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn insert(&mut self, pin: Pin, state: PinState) {
        // timestamps come from other clients; keep the math in range
        let deadline = pin.created_at_ms.saturating_add(self.config.fade_ms);
        self.timers.schedule(pin.id.clone(), deadline);
        self.pins.insert(pin.id.clone(), ActivePin { pin: pin.clone(), state, expired: false });
        self.changes.push(PinChange::Inserted(pin));
    }

    /// Temporary pin (active or retired) that a backend record confirms.
    /// Creation time alone is ambiguous for pins placed in the same
    /// millisecond; an owner holds each color at most once. Records without
    /// an owner never confirm anything: this client always writes one.
    pub fn pending_match(&self, record: &PinRecord) -> Option<PinId> {
        let created_at_ms = record.effective_created_at_ms()?;
        let owner = record.created_by.as_deref()?;
        let is_match = |pin: &Pin| {
            pin.created_at_ms == created_at_ms && pin.color == record.color && pin.created_by == owner
        };
        self.pins
            .values()
            .filter(|e| e.state == PinState::Pending)
            .map(|e| &e.pin)
            .chain(self.retired_pending.values())
            .find(|p| is_match(*p))
            .map(|p| p.id.clone())
    }

    /// Merge a backend-confirmed record into the active set.
    pub fn reconcile(
        &mut self,
        temp_id: Option<&PinId>,
        id: PinId,
        record: &PinRecord,
    ) -> ReconcileOutcome {
        if self.pins.contains_key(&id) || self.awaiting_removal.contains(&id) {
            debug!(pin_id = %id, "duplicate added event ignored");
            return ReconcileOutcome::Duplicate;
        }

        if let Some(temp_id) = temp_id {
            if let Some(mut entry) = self.pins.remove(temp_id) {
                entry.pin.id = id.clone();
                entry.state = PinState::Confirmed;
                self.timers.retag(temp_id, &id);
                let pin = entry.pin.clone();
                let expired = entry.expired;
                self.pins.insert(id.clone(), entry);
                self.changes.push(PinChange::Confirmed { temp_id: temp_id.clone(), pin });
                increment_counter!("pinmap_pins_confirmed_total");
                info!(temp_id = %temp_id, pin_id = %id, "pin confirmed");
                if expired {
                    // its timer fired while the id was still temporary
                    self.expire(&id);
                }
                return ReconcileOutcome::Confirmed;
            }
            if self.retired_pending.remove(temp_id).is_some() {
                info!(temp_id = %temp_id, pin_id = %id, "pin deleted before confirmation, removing record");
                self.awaiting_removal.insert(id.clone());
                self.commands.push(StoreCommand::Delete { id });
                return ReconcileOutcome::Discarded;
            }
            // already confirmed through the other path, and possibly removed since
            debug!(temp_id = %temp_id, pin_id = %id, "stale confirmation ignored");
            return ReconcileOutcome::Duplicate;
        }

        let pin = Pin::from_record(id, record, self.clock.now_ms());
        debug!(pin_id = %pin.id, user = %pin.created_by, created_at_ms = pin.created_at_ms, "remote pin inserted");
        self.insert(pin, PinState::Confirmed);
        ReconcileOutcome::Inserted
    }

    /// Owner-initiated delete.
    pub fn request_delete(&mut self, pin_id: &PinId, actor: &UserId) -> Result<(), PinError> {
        match self.pins.get(pin_id) {
            None => return Err(PinError::NotFound),
            Some(entry) if entry.pin.created_by != *actor => {
                warn!(pin_id = %pin_id, user = %actor, owner = %entry.pin.created_by, "delete refused: not owner");
                return Err(PinError::NotOwner);
            }
            Some(_) => {}
        }
        let Some(entry) = self.pins.remove(pin_id) else { return Err(PinError::NotFound) };
        match entry.state {
            PinState::Confirmed => {
                self.awaiting_removal.insert(pin_id.clone());
                self.commands.push(StoreCommand::Delete { id: pin_id.clone() });
            }
            PinState::Pending => {
                self.retired_pending.insert(pin_id.clone(), entry.pin);
            }
            PinState::LocalOnly => {}
        }
        self.changes.push(PinChange::Removed(pin_id.clone()));
        increment_counter!("pinmap_pin_deletes_total", "trigger" => "manual");
        info!(pin_id = %pin_id, user = %actor, "pin deleted by owner");
        Ok(())
    }

    /// Backend removal observed, whoever triggered it.
    pub fn on_remote_removed(&mut self, pin_id: &PinId) -> bool {
        self.awaiting_removal.remove(pin_id);
        if self.pins.remove(pin_id).is_some() {
            self.changes.push(PinChange::Removed(pin_id.clone()));
            debug!(pin_id = %pin_id, "pin removed remotely");
            true
        } else {
            debug!(pin_id = %pin_id, "remote removal for absent pin ignored");
            false
        }
    }

    /// Drop confirmed pins whose records are missing from a fresh backend
    /// snapshot, as after an event stream that skipped removals. Returns how
    /// many pins were removed.
    pub fn retain_live(&mut self, live: &HashSet<PinId>) -> usize {
        self.awaiting_removal.retain(|id| live.contains(id));
        let gone: Vec<PinId> = self
            .pins
            .iter()
            .filter(|(id, e)| e.state == PinState::Confirmed && !live.contains(*id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &gone {
            self.on_remote_removed(id);
        }
        gone.len()
    }

    /// Run every expiry action due now. Returns how many fired.
    pub fn fire_due(&mut self) -> usize {
        let due = self.timers.pop_due(self.clock.now_ms());
        let fired = due.len();
        for pin_id in due {
            self.expire(&pin_id);
        }
        fired
    }

    fn expire(&mut self, pin_id: &PinId) {
        let current = self.identity.current_user_id();
        let Some(entry) = self.pins.get_mut(pin_id) else {
            debug!(pin_id = %pin_id, "expiry skipped: pin already removed");
            return;
        };
        entry.expired = true;
        let owned = current.as_deref() == Some(entry.pin.created_by.as_str());
        let state = entry.state;
        match state {
            PinState::LocalOnly => {
                self.pins.remove(pin_id);
                self.changes.push(PinChange::Removed(pin_id.clone()));
                increment_counter!("pinmap_pins_expired_total");
                info!(pin_id = %pin_id, "local pin expired");
            }
            PinState::Confirmed if owned => {
                self.changes.push(PinChange::Expired(pin_id.clone()));
                self.commands.push(StoreCommand::Delete { id: pin_id.clone() });
                increment_counter!("pinmap_pins_expired_total");
                info!(pin_id = %pin_id, "pin expired, deleting record");
            }
            PinState::Confirmed => {
                self.changes.push(PinChange::Expired(pin_id.clone()));
                debug!(pin_id = %pin_id, "pin expired, owner client deletes it");
            }
            PinState::Pending => {
                self.changes.push(PinChange::Expired(pin_id.clone()));
                debug!(pin_id = %pin_id, "pin expired before confirmation, delete deferred");
            }
        }
    }

    /// The backend rejected a create. The optimistic pin stays visible and
    /// falls back to client-side expiry.
    pub fn persistence_failed(&mut self, temp_id: &PinId, err: &StoreError) {
        error!(pin_id = %temp_id, error = %err, "failed to save pin");
        if self.retired_pending.remove(temp_id).is_some() {
            return;
        }
        let Some(entry) = self.pins.get_mut(temp_id) else { return };
        if entry.state != PinState::Pending {
            return;
        }
        entry.state = PinState::LocalOnly;
        if entry.expired {
            self.pins.remove(temp_id);
            self.changes.push(PinChange::Removed(temp_id.clone()));
        }
    }

    /// A delete call failed. Only worth reporting while the pin is still
    /// shown; otherwise someone else already removed it. Returns whether the
    /// failure was reported.
    pub fn delete_failed(&mut self, pin_id: &PinId, err: &StoreError) -> bool {
        if self.pins.contains_key(pin_id) {
            error!(pin_id = %pin_id, error = %err, "failed to delete pin");
            true
        } else {
            debug!(pin_id = %pin_id, error = %err, "delete failed for absent pin, ignoring");
            false
        }
    }

    pub fn get(&self, pin_id: &PinId) -> Option<&Pin> {
        self.pins.get(pin_id).map(|e| &e.pin)
    }

    pub fn state(&self, pin_id: &PinId) -> Option<PinState> {
        self.pins.get(pin_id).map(|e| e.state)
    }

    pub fn is_expired(&self, pin_id: &PinId) -> bool {
        self.pins.get(pin_id).map_or(false, |e| e.expired)
    }

    pub fn contains(&self, pin_id: &PinId) -> bool {
        self.pins.contains_key(pin_id)
    }

    /// Snapshot of the active set, oldest first.
    pub fn pins(&self) -> Vec<Pin> {
        let mut v: Vec<Pin> = self.pins.values().map(|e| e.pin.clone()).collect();
        v.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms).then_with(|| a.id.cmp(&b.id)));
        v
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    fn owned<'a>(&'a self, actor: &'a str) -> impl Iterator<Item = &'a Pin> + 'a {
        self.pins.values().map(|e| &e.pin).filter(move |p| p.created_by == actor)
    }

    pub fn owned_count(&self, actor: &str) -> usize {
        self.owned(actor).count()
    }

    pub fn next_deadline(&self) -> Option<i64> {
        self.timers.next_deadline()
    }

    /// Milliseconds until the pin's expiry action fires.
    pub fn expiry_delay_ms(&self, pin_id: &PinId) -> Option<i64> {
        self.timers
            .deadline_of(pin_id)
            .map(|deadline| deadline.saturating_sub(self.clock.now_ms()).max(0))
    }

    pub fn drain_changes(&mut self) -> Vec<PinChange> {
        std::mem::take(&mut self.changes)
    }

    pub fn drain_commands(&mut self) -> Vec<StoreCommand> {
        std::mem::take(&mut self.commands)
    }
}
