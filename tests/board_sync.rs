#![cfg(feature = "inmem-store")]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use pinmap::clock::SystemClock;
use pinmap::error::PinError;
use pinmap::identity::IdentityProvider;
use pinmap::models::{Pin, PinColor, PinId, PinRecord};
use pinmap::store::inmem::InMemPinStore;
use pinmap::store::{Backend, PinLogStore, PinStore, StoreError, StoreResult, Subscription};
use pinmap::view::{ImageClick, PinView, Selection};
use pinmap::{BoardConfig, PinBoard, UiEvent};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

struct User(&'static str);

impl IdentityProvider for User {
    fn current_user_id(&self) -> Option<String> {
        Some(self.0.to_string())
    }
    fn ready(&self) -> bool {
        true
    }
}

/// Keeps only what the assertions need.
#[derive(Default)]
struct NoteView {
    notes: Vec<PinError>,
    removed: Vec<PinId>,
}

impl PinView for NoteView {
    fn render_pin(&mut self, _pin: &Pin, _opacity: f64) {}
    fn rekey_pin(&mut self, _old_id: &PinId, _pin: &Pin) {}
    fn remove_pin_view(&mut self, id: &PinId) {
        self.removed.push(id.clone());
    }
    fn update_opacity(&mut self, _id: &PinId, _value: f64) {}
    fn show_selection(&mut self, _selection: &Selection) {}
    fn hide_selection(&mut self) {}
    fn notify(&mut self, error: &PinError) {
        self.notes.push(error.clone());
    }
}

fn config(fade_ms: u64) -> BoardConfig {
    BoardConfig {
        fade_duration: Duration::from_millis(fade_ms),
        opacity_tick: Duration::from_millis(20),
        ..BoardConfig::default()
    }
}

fn start(
    cfg: &BoardConfig,
    backend: Option<Arc<dyn Backend>>,
    user: &'static str,
) -> (mpsc::Sender<UiEvent>, JoinHandle<Result<NoteView, PinError>>) {
    let (tx, rx) = mpsc::channel(16);
    let board = PinBoard::new(cfg, backend, Arc::new(User(user)), Arc::new(SystemClock), NoteView::default());
    (tx, tokio::spawn(board.run(rx)))
}

async fn pins_of(tx: &mpsc::Sender<UiEvent>) -> Vec<Pin> {
    let (reply, rx) = oneshot::channel();
    tx.send(UiEvent::ListPins(reply)).await.unwrap();
    rx.await.unwrap()
}

async fn wait_for(tx: &mpsc::Sender<UiEvent>, cond: impl Fn(&[Pin]) -> bool) -> Vec<Pin> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let pins = pins_of(tx).await;
            if cond(&pins) {
                return pins;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("board never reached the expected state")
}

async fn stop(tx: mpsc::Sender<UiEvent>, handle: JoinHandle<Result<NoteView, PinError>>) -> NoteView {
    tx.send(UiEvent::Shutdown).await.unwrap();
    handle.await.unwrap().unwrap()
}

fn click() -> UiEvent {
    UiEvent::ImageClick(ImageClick::at(400.0, 300.0, 800.0, 600.0))
}

fn confirmed(pins: &[Pin]) -> bool {
    pins.len() == 1 && !pins[0].id.is_temporary()
}

#[tokio::test]
async fn pin_syncs_to_late_joiner_and_owner_delete_clears_everyone() {
    let store = InMemPinStore::new();
    let backend: Arc<dyn Backend> = Arc::new(store.clone());
    let cfg = config(60_000);

    let (alice, alice_task) = start(&cfg, Some(backend.clone()), "alice");
    alice.send(UiEvent::SetColor(PinColor::Blue)).await.unwrap();
    alice.send(click()).await.unwrap();
    let pins = wait_for(&alice, confirmed).await;
    let id = pins[0].id.clone();
    assert_eq!(pins[0].color, PinColor::Blue);
    assert!(store.contains(&id));

    // joins after the pin exists and gets it from the initial snapshot
    let (bob, bob_task) = start(&cfg, Some(backend.clone()), "bob");
    let seen = wait_for(&bob, |p| p.len() == 1).await;
    assert_eq!(seen[0].id, id);
    assert_eq!(seen[0].created_by, "alice");

    // bob cannot delete it
    bob.send(UiEvent::SelectPin(id.clone())).await.unwrap();
    bob.send(UiEvent::DeleteSelected).await.unwrap();
    assert_eq!(pins_of(&bob).await.len(), 1);
    assert!(store.contains(&id));

    alice.send(UiEvent::SelectPin(id.clone())).await.unwrap();
    alice.send(UiEvent::DeleteSelected).await.unwrap();
    wait_for(&alice, |p| p.is_empty()).await;
    wait_for(&bob, |p| p.is_empty()).await;
    assert!(store.is_empty());

    let bob_view = stop(bob, bob_task).await;
    assert_eq!(bob_view.notes, vec![PinError::NotOwner]);
    assert_eq!(bob_view.removed, vec![id.clone()]);
    let alice_view = stop(alice, alice_task).await;
    assert!(alice_view.notes.is_empty());

    // the log keeps the pin after deletion
    let day = pins[0].created_at.date_naive();
    assert_eq!(store.list_log(day).await.unwrap().len(), 1);
}

#[tokio::test]
async fn owner_board_deletes_expired_pin_for_everyone() {
    let store = InMemPinStore::new();
    let backend: Arc<dyn Backend> = Arc::new(store.clone());
    let cfg = config(400);

    let (alice, alice_task) = start(&cfg, Some(backend.clone()), "alice");
    let (bob, bob_task) = start(&cfg, Some(backend.clone()), "bob");
    wait_for(&bob, |p| p.is_empty()).await;

    alice.send(click()).await.unwrap();
    wait_for(&bob, |p| p.len() == 1).await;

    wait_for(&alice, |p| p.is_empty()).await;
    wait_for(&bob, |p| p.is_empty()).await;
    assert!(store.is_empty());

    stop(alice, alice_task).await;
    let bob_view = stop(bob, bob_task).await;
    assert_eq!(bob_view.removed.len(), 1);
}

#[tokio::test]
async fn quota_and_color_rules_apply_through_the_board() {
    let store = InMemPinStore::new();
    let backend: Arc<dyn Backend> = Arc::new(store.clone());
    let (alice, task) = start(&config(60_000), Some(backend), "alice");

    alice.send(click()).await.unwrap();
    alice.send(click()).await.unwrap();
    for color in [PinColor::Blue, PinColor::Green, PinColor::Yellow, PinColor::Purple, PinColor::Orange] {
        alice.send(UiEvent::SetColor(color)).await.unwrap();
        alice.send(click()).await.unwrap();
    }
    let pins = wait_for(&alice, |p| p.len() == 5 && p.iter().all(|pin| !pin.id.is_temporary())).await;
    assert!(pins.iter().all(|p| p.color != PinColor::Orange));
    assert_eq!(store.len(), 5);

    let view = stop(alice, task).await;
    assert_eq!(
        view.notes,
        vec![PinError::DuplicateColor(PinColor::Red), PinError::QuotaExceeded { limit: 5 }]
    );
}

#[tokio::test]
async fn board_without_store_keeps_pins_local() {
    let (tx, task) = start(&config(300), None, "alice");
    tx.send(click()).await.unwrap();
    let pins = wait_for(&tx, |p| p.len() == 1).await;
    assert!(pins[0].id.is_temporary());
    wait_for(&tx, |p| p.is_empty()).await;
    let view = stop(tx, task).await;
    assert_eq!(view.removed, vec![pins[0].id.clone()]);
}

/// Store that accepts subscriptions but rejects every write.
struct OfflineStore {
    events: broadcast::Sender<pinmap::store::StoreEvent>,
    attempts: Mutex<usize>,
}

impl OfflineStore {
    fn new() -> Self {
        Self { events: broadcast::channel(8).0, attempts: Mutex::new(0) }
    }
}

#[async_trait::async_trait]
impl PinStore for OfflineStore {
    async fn create(&self, _record: PinRecord) -> StoreResult<PinId> {
        *self.attempts.lock().unwrap() += 1;
        Err(StoreError::Unavailable("offline".into()))
    }
    async fn delete(&self, _id: &PinId) -> StoreResult<()> {
        Err(StoreError::Unavailable("offline".into()))
    }
    async fn subscribe(&self) -> StoreResult<Subscription> {
        Ok(Subscription { initial: Vec::new(), events: self.events.subscribe() })
    }
}

#[async_trait::async_trait]
impl PinLogStore for OfflineStore {
    async fn append_log(&self, _day: NaiveDate, _id: &PinId, _record: &PinRecord) -> StoreResult<()> {
        Err(StoreError::Unavailable("offline".into()))
    }
    async fn list_log(&self, _day: NaiveDate) -> StoreResult<Vec<(PinId, PinRecord)>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn failed_save_leaves_pin_visible_until_it_fades() {
    let offline = Arc::new(OfflineStore::new());
    let (tx, task) = start(&config(300), Some(offline.clone()), "alice");
    tx.send(click()).await.unwrap();
    let pins = wait_for(&tx, |p| p.len() == 1).await;
    assert!(pins[0].id.is_temporary());

    wait_for(&tx, |p| p.is_empty()).await;
    let view = stop(tx, task).await;
    // persistence failures are logged, not shown
    assert!(view.notes.is_empty());
    assert_eq!(*offline.attempts.lock().unwrap(), 1);
}

fn carol_record(color: PinColor) -> PinRecord {
    PinRecord {
        x_pct: Some(0.5),
        y_pct: Some(0.5),
        x: 400.0,
        y: 300.0,
        color,
        created_at: None,
        created_at_ms: Some(chrono::Utc::now().timestamp_millis()),
        created_by: Some("carol".to_string()),
    }
}

#[tokio::test]
async fn lagging_board_resubscribes_and_catches_up() {
    // two unread events and the subscriber falls behind
    let store = InMemPinStore::with_event_capacity(2);
    let backend: Arc<dyn Backend> = Arc::new(store.clone());
    let (bob, task) = start(&config(60_000), Some(backend), "bob");

    let first = store.create(carol_record(PinColor::Red)).await.unwrap();
    wait_for(&bob, |p| p.len() == 1).await;

    // the in-memory store never yields, so the board sees none of these until the burst is over
    store.delete(&first).await.unwrap();
    let mut expected = Vec::new();
    for color in [PinColor::Blue, PinColor::Green, PinColor::Yellow, PinColor::Purple] {
        expected.push(store.create(carol_record(color)).await.unwrap());
    }

    let pins = wait_for(&bob, |p| p.len() == 4 && p.iter().all(|pin| pin.id != first)).await;
    let mut ids: Vec<PinId> = pins.into_iter().map(|p| p.id).collect();
    ids.sort();
    assert_eq!(ids, expected);

    let view = stop(bob, task).await;
    assert_eq!(view.removed, vec![first]);
}
