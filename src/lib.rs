pub mod board;
pub mod clock;
pub mod config;
pub mod console;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod models;
pub mod reconcile;
pub mod store;
pub mod timers;
pub mod view;

// Re-export commonly used items for tests / external users
pub use board::{PinBoard, UiEvent};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::BoardConfig;
pub use error::PinError;
pub use lifecycle::{PinChange, PinLifecycleManager, PinState, StoreCommand};
pub use models::{Pin, PinColor, PinId, PinRecord, Position};
pub use view::{PinView, PinViewAdapter};
