use chrono::Local;
use tracing::debug;

use crate::error::PinError;
use crate::identity::{current_actor, IdentityProvider};
use crate::lifecycle::{PinChange, PinLifecycleManager};
use crate::models::{Pin, PinColor, PinId, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickTarget {
    Image,
    Outside,
}

/// Raw click as the presentation layer reports it, in image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageClick {
    pub target: ClickTarget,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ImageClick {
    /// Click at `(x, y)` over an image of `width` x `height`; anything
    /// beyond the image bounds counts as outside.
    pub fn at(x: f64, y: f64, width: f64, height: f64) -> Self {
        let inside = (0.0..=width).contains(&x) && (0.0..=height).contains(&y);
        let target = if inside { ClickTarget::Image } else { ClickTarget::Outside };
        Self { target, x, y, width, height }
    }

    pub fn outside() -> Self {
        Self { target: ClickTarget::Outside, x: 0.0, y: 0.0, width: 0.0, height: 0.0 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub pin: Pin,
    pub created_at_label: String,
    pub can_delete: bool,
}

/// Presentation layer. Receives snapshots only and never feeds state back.
pub trait PinView: Send {
    fn render_pin(&mut self, pin: &Pin, opacity: f64);
    /// Same element, new id.
    fn rekey_pin(&mut self, old_id: &PinId, pin: &Pin);
    fn remove_pin_view(&mut self, id: &PinId);
    fn update_opacity(&mut self, id: &PinId, value: f64);
    fn show_selection(&mut self, selection: &Selection);
    fn hide_selection(&mut self);
    /// Blocking notification for a rejected user action.
    fn notify(&mut self, error: &PinError);
}

/// Linear fade from 1 at creation to 0 at `created_at_ms + fade_ms`.
pub fn opacity_at(created_at_ms: i64, now_ms: i64, fade_ms: i64) -> f64 {
    if fade_ms <= 0 {
        return 0.0;
    }
    let elapsed = now_ms.saturating_sub(created_at_ms) as f64;
    (1.0 - elapsed / fade_ms as f64).clamp(0.0, 1.0)
}

pub fn format_created_at(pin: &Pin) -> String {
    pin.created_at
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Routes interactions into the manager and manager changes into the view.
/// Owns the transient UI state: current selection and color choice.
#[derive(Debug, Default)]
pub struct PinViewAdapter {
    selected: Option<PinId>,
    color: PinColor,
}

impl PinViewAdapter {
    pub fn new(color: PinColor) -> Self {
        Self { selected: None, color }
    }

    pub fn current_color(&self) -> PinColor {
        self.color
    }

    pub fn set_color(&mut self, color: PinColor) {
        self.color = color;
    }

    pub fn selected(&self) -> Option<&PinId> {
        self.selected.as_ref()
    }

    /// `None` when the click missed the image.
    pub fn handle_image_click(
        &mut self,
        manager: &mut PinLifecycleManager,
        identity: &dyn IdentityProvider,
        click: ImageClick,
        view: &mut dyn PinView,
    ) -> Option<Result<Pin, PinError>> {
        if click.target != ClickTarget::Image {
            return None;
        }
        let result = match current_actor(identity) {
            None => Err(PinError::IdentityNotReady),
            Some(actor) => {
                let position = Position::from_click(click.x, click.y, click.width, click.height);
                manager.create_pin(position, self.color, &actor)
            }
        };
        if let Err(e) = &result {
            view.notify(e);
        }
        Some(result)
    }

    pub fn select_pin(
        &mut self,
        manager: &PinLifecycleManager,
        identity: &dyn IdentityProvider,
        id: &PinId,
        view: &mut dyn PinView,
    ) -> Option<Selection> {
        let pin = manager.get(id)?.clone();
        let can_delete = current_actor(identity).map_or(false, |actor| actor == pin.created_by);
        let selection = Selection { created_at_label: format_created_at(&pin), can_delete, pin };
        self.selected = Some(id.clone());
        view.show_selection(&selection);
        Some(selection)
    }

    pub fn deselect(&mut self, view: &mut dyn PinView) {
        if self.selected.take().is_some() {
            view.hide_selection();
        }
    }

    /// Delete the selected pin. Without a selection this does nothing.
    pub fn delete_selected(
        &mut self,
        manager: &mut PinLifecycleManager,
        identity: &dyn IdentityProvider,
        view: &mut dyn PinView,
    ) -> Result<(), PinError> {
        let Some(id) = self.selected.clone() else { return Ok(()) };
        let result = match current_actor(identity) {
            None => Err(PinError::IdentityNotReady),
            Some(actor) => manager.request_delete(&id, &actor),
        };
        match &result {
            Ok(()) => {
                self.selected = None;
                view.hide_selection();
            }
            Err(e) => view.notify(e),
        }
        result
    }

    pub fn apply_changes(
        &mut self,
        changes: Vec<PinChange>,
        manager: &PinLifecycleManager,
        view: &mut dyn PinView,
    ) {
        let now = manager.now_ms();
        let fade = manager.config().fade_ms;
        for change in changes {
            match change {
                PinChange::Inserted(pin) => {
                    view.render_pin(&pin, opacity_at(pin.created_at_ms, now, fade));
                }
                PinChange::Confirmed { temp_id, pin } => {
                    view.rekey_pin(&temp_id, &pin);
                    if self.selected.as_ref() == Some(&temp_id) {
                        self.selected = Some(pin.id.clone());
                    }
                }
                PinChange::Expired(id) => view.update_opacity(&id, 0.0),
                PinChange::Removed(id) => {
                    view.remove_pin_view(&id);
                    if self.selected.as_ref() == Some(&id) {
                        debug!(pin_id = %id, "selected pin removed");
                        self.selected = None;
                        view.hide_selection();
                    }
                }
            }
        }
    }

    pub fn refresh_opacity(&self, manager: &PinLifecycleManager, view: &mut dyn PinView) {
        let now = manager.now_ms();
        let fade = manager.config().fade_ms;
        for pin in manager.pins() {
            view.update_opacity(&pin.id, opacity_at(pin.created_at_ms, now, fade));
        }
    }
}
