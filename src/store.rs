use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::broadcast;

use crate::models::{PinId, PinRecord};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("not found")] NotFound,
    #[error("backend unavailable: {0}")] Unavailable(String),
    #[error("internal error: {0}")] Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Change notification for the `pins` collection.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Added { id: PinId, record: PinRecord },
    Removed { id: PinId },
}

/// Records present at subscription time plus the live stream after them.
/// The two never overlap and never leave a gap.
pub struct Subscription {
    pub initial: Vec<(PinId, PinRecord)>,
    pub events: broadcast::Receiver<StoreEvent>,
}

#[async_trait]
pub trait PinStore: Send + Sync {
    /// Push a new record; the backend assigns its key.
    async fn create(&self, record: PinRecord) -> StoreResult<PinId>;
    async fn delete(&self, id: &PinId) -> StoreResult<()>;
    async fn subscribe(&self) -> StoreResult<Subscription>;
}

/// Append-only mirror of every created pin, filed by UTC creation day.
#[async_trait]
pub trait PinLogStore: Send + Sync {
    async fn append_log(&self, day: NaiveDate, id: &PinId, record: &PinRecord) -> StoreResult<()>;
    async fn list_log(&self, day: NaiveDate) -> StoreResult<Vec<(PinId, PinRecord)>>;
}

pub trait Backend: PinStore + PinLogStore {}

impl<T> Backend for T where T: PinStore + PinLogStore {}

pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, PoisonError, RwLock};
    use tracing::{debug, info, warn};

    const SNAPSHOT_FILE: &str = "pins.json";
    const EVENT_CAPACITY: usize = 1024;

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        pins: BTreeMap<PinId, PinRecord>,
        logs: BTreeMap<String, BTreeMap<PinId, PinRecord>>,
        next_id: u64,
    }

    /// Realtime backend held in process memory. Every clone shares the same
    /// collections and event stream, so several boards can sync through it.
    #[derive(Clone)]
    pub struct InMemPinStore {
        state: Arc<RwLock<State>>,
        events: broadcast::Sender<StoreEvent>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemPinStore {
        pub fn new() -> Self {
            Self::from_state(State::default(), None, EVENT_CAPACITY)
        }

        /// Store whose subscribers fall behind after `capacity` unread events.
        pub fn with_event_capacity(capacity: usize) -> Self {
            Self::from_state(State::default(), None, capacity.max(1))
        }

        /// Store that loads from and writes back to `<dir>/pins.json`.
        pub fn with_snapshot(dir: &Path) -> Self {
            let path = dir.join(SNAPSHOT_FILE);
            let state = Self::load_state_from(&path);
            Self::from_state(state, Some(path), EVENT_CAPACITY)
        }

        fn from_state(state: State, snapshot_path: Option<PathBuf>, capacity: usize) -> Self {
            let (events, _) = broadcast::channel(capacity);
            Self {
                state: Arc::new(RwLock::new(state)),
                events,
                snapshot_path: snapshot_path.map(Arc::new),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        info!(path = %path.display(), pins = s.pins.len(), "loaded pin snapshot");
                        s
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to parse pin snapshot, starting empty");
                        State::default()
                    }
                },
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "no pin snapshot, starting empty");
                    State::default()
                }
            }
        }

        fn persist(&self) {
            let Some(path) = self.snapshot_path.as_deref() else { return };
            let bytes = {
                let s = self.state.read().unwrap_or_else(PoisonError::into_inner);
                serde_json::to_vec_pretty(&*s)
            };
            match bytes {
                Ok(bytes) => {
                    if let Some(dir) = path.parent() {
                        let _ = std::fs::create_dir_all(dir);
                    }
                    if let Err(e) = std::fs::write(path, bytes) {
                        warn!(path = %path.display(), error = %e, "failed to write pin snapshot");
                    }
                }
                Err(e) => warn!(error = %e, "failed to serialize pin snapshot"),
            }
        }

        // Zero padded so key order is creation order, like push keys.
        fn next_key(state: &mut State) -> PinId {
            state.next_id += 1;
            PinId::new(format!("pin-{:010}", state.next_id))
        }

        pub fn len(&self) -> usize {
            self.state.read().unwrap_or_else(PoisonError::into_inner).pins.len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        pub fn contains(&self, id: &PinId) -> bool {
            self.state.read().unwrap_or_else(PoisonError::into_inner).pins.contains_key(id)
        }
    }

    impl Default for InMemPinStore {
        fn default() -> Self { Self::new() }
    }

    #[async_trait]
    impl PinStore for InMemPinStore {
        async fn create(&self, record: PinRecord) -> StoreResult<PinId> {
            let mut s = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let id = Self::next_key(&mut s);
            s.pins.insert(id.clone(), record.clone());
            // publish under the lock so subscribe() snapshots stay gap free
            let _ = self.events.send(StoreEvent::Added { id: id.clone(), record });
            drop(s);
            self.persist();
            debug!(pin_id = %id, "pin record created");
            Ok(id)
        }

        async fn delete(&self, id: &PinId) -> StoreResult<()> {
            let mut s = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if s.pins.remove(id).is_none() {
                return Err(StoreError::NotFound);
            }
            let _ = self.events.send(StoreEvent::Removed { id: id.clone() });
            drop(s);
            self.persist();
            debug!(pin_id = %id, "pin record removed");
            Ok(())
        }

        async fn subscribe(&self) -> StoreResult<Subscription> {
            let s = self.state.read().unwrap_or_else(PoisonError::into_inner);
            let initial = s.pins.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            let events = self.events.subscribe();
            Ok(Subscription { initial, events })
        }
    }

    #[async_trait]
    impl PinLogStore for InMemPinStore {
        async fn append_log(&self, day: NaiveDate, id: &PinId, record: &PinRecord) -> StoreResult<()> {
            let mut s = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let entries = s.logs.entry(day_key(day)).or_default();
            if entries.contains_key(id) {
                return Ok(());
            }
            entries.insert(id.clone(), record.clone());
            drop(s);
            self.persist();
            Ok(())
        }

        async fn list_log(&self, day: NaiveDate) -> StoreResult<Vec<(PinId, PinRecord)>> {
            let s = self.state.read().unwrap_or_else(PoisonError::into_inner);
            Ok(s.logs
                .get(&day_key(day))
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default())
        }
    }
}
