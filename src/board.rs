//! The running board: one task that owns all pin state and multiplexes UI
//! input, backend events, backend call results and expiry deadlines.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::BoardConfig;
use crate::error::PinError;
use crate::identity::IdentityProvider;
use crate::lifecycle::{PinLifecycleManager, StoreCommand};
use crate::models::{Pin, PinColor, PinId};
use crate::reconcile::{SyncMessage, SyncReconciler};
use crate::store::{Backend, StoreEvent};
use crate::view::{ImageClick, PinView, PinViewAdapter};

pub enum UiEvent {
    ImageClick(ImageClick),
    SelectPin(PinId),
    Deselect,
    DeleteSelected,
    SetColor(PinColor),
    ListPins(oneshot::Sender<Vec<Pin>>),
    Shutdown,
}

pub struct PinBoard<V: PinView> {
    manager: PinLifecycleManager,
    adapter: PinViewAdapter,
    reconciler: SyncReconciler,
    view: V,
    backend: Option<Arc<dyn Backend>>,
    identity: Arc<dyn IdentityProvider>,
    opacity_tick: Duration,
}

impl<V: PinView> PinBoard<V> {
    /// Without a backend every pin is local-only.
    pub fn new(
        config: &BoardConfig,
        backend: Option<Arc<dyn Backend>>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        view: V,
    ) -> Self {
        let lifecycle = config.lifecycle(backend.is_some());
        Self {
            manager: PinLifecycleManager::new(lifecycle, clock, identity.clone()),
            adapter: PinViewAdapter::default(),
            reconciler: SyncReconciler::new(),
            view,
            backend,
            identity,
            opacity_tick: config.opacity_tick.max(Duration::from_millis(10)),
        }
    }

    /// Run until the UI channel closes or `Shutdown` arrives; hands the view
    /// back so callers can inspect what was rendered.
    pub async fn run(mut self, mut ui: mpsc::Receiver<UiEvent>) -> Result<V, PinError> {
        let (sync_tx, mut sync_rx) = mpsc::unbounded_channel::<SyncMessage>();

        let mut events = match &self.backend {
            Some(backend) => {
                let sub = backend.subscribe().await?;
                info!(existing = sub.initial.len(), "subscribed to pin store");
                for (id, record) in sub.initial {
                    self.reconciler.apply_event(&mut self.manager, StoreEvent::Added { id, record });
                }
                Some(sub.events)
            }
            None => {
                info!("no pin store configured, pins stay local");
                None
            }
        };
        self.flush(&sync_tx);

        let mut opacity = tokio::time::interval(self.opacity_tick);
        opacity.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let wake = self
                .manager
                .next_deadline()
                .map(|d| Duration::from_millis(d.saturating_sub(self.manager.now_ms()).max(0) as u64));
            let mut events_closed = false;
            let mut lagged = false;
            tokio::select! {
                ui_event = ui.recv() => match ui_event {
                    Some(UiEvent::Shutdown) | None => break,
                    Some(ev) => self.handle_ui(ev),
                },
                event = next_event(&mut events) => match event {
                    Ok(ev) => self.reconciler.apply_event(&mut self.manager, ev),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "pin event stream lagged, resubscribing");
                        lagged = true;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("pin store closed its event stream");
                        events_closed = true;
                    }
                },
                Some(message) = sync_rx.recv() => self.reconciler.apply_message(&mut self.manager, message),
                _ = sleep_or_pending(wake) => {
                    self.manager.fire_due();
                }
                _ = opacity.tick() => self.adapter.refresh_opacity(&self.manager, &mut self.view),
            }
            if events_closed {
                events = None;
            }
            if lagged {
                // on failure keep reading the old stream from where it resumed
                if let Some(rx) = self.resubscribe().await {
                    events = Some(rx);
                }
            }
            self.flush(&sync_tx);
        }

        let stats = self.reconciler.stats();
        info!(
            confirmed = stats.confirmed,
            inserted = stats.inserted,
            duplicates = stats.duplicates,
            "board stopped"
        );
        Ok(self.view)
    }

    /// Fresh subscription whose snapshot replaces the events that were missed.
    async fn resubscribe(&mut self) -> Option<broadcast::Receiver<StoreEvent>> {
        let backend = self.backend.clone()?;
        match backend.subscribe().await {
            Ok(sub) => {
                self.reconciler.resync(&mut self.manager, sub.initial);
                Some(sub.events)
            }
            Err(e) => {
                error!(error = %e, "failed to resubscribe to pin store");
                None
            }
        }
    }

    fn handle_ui(&mut self, event: UiEvent) {
        let identity = self.identity.as_ref();
        match event {
            UiEvent::ImageClick(click) => {
                let _ = self.adapter.handle_image_click(&mut self.manager, identity, click, &mut self.view);
            }
            UiEvent::SelectPin(id) => {
                if self.adapter.select_pin(&self.manager, identity, &id, &mut self.view).is_none() {
                    self.view.notify(&PinError::NotFound);
                }
            }
            UiEvent::Deselect => self.adapter.deselect(&mut self.view),
            UiEvent::DeleteSelected => {
                let _ = self.adapter.delete_selected(&mut self.manager, identity, &mut self.view);
            }
            UiEvent::SetColor(color) => self.adapter.set_color(color),
            UiEvent::ListPins(reply) => {
                let _ = reply.send(self.manager.pins());
            }
            UiEvent::Shutdown => {}
        }
    }

    /// Push pending changes to the view and pending commands to the backend.
    fn flush(&mut self, sync_tx: &mpsc::UnboundedSender<SyncMessage>) {
        let changes = self.manager.drain_changes();
        self.adapter.apply_changes(changes, &self.manager, &mut self.view);
        for command in self.manager.drain_commands() {
            match &self.backend {
                Some(backend) => dispatch(backend.clone(), command, sync_tx.clone()),
                None => warn!(?command, "no pin store, command dropped"),
            }
        }
    }
}

fn dispatch(backend: Arc<dyn Backend>, command: StoreCommand, tx: mpsc::UnboundedSender<SyncMessage>) {
    match command {
        StoreCommand::Create { temp_id, record } => {
            tokio::spawn(async move {
                let result = backend.create(record.clone()).await;
                if let (Ok(id), Some(day)) = (&result, record.log_day()) {
                    if let Err(e) = backend.append_log(day, id, &record).await {
                        warn!(pin_id = %id, error = %e, "failed to mirror pin into log");
                    }
                }
                let _ = tx.send(SyncMessage::Created { temp_id, record, result });
            });
        }
        StoreCommand::Delete { id } => {
            tokio::spawn(async move {
                let result = backend.delete(&id).await;
                let _ = tx.send(SyncMessage::Deleted { id, result });
            });
        }
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<StoreEvent>>,
) -> Result<StoreEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_or_pending(wake: Option<Duration>) {
    match wake {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}
