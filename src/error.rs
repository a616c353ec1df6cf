use crate::models::PinColor;
use crate::store::StoreError;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PinError {
    #[error("pin limit reached: at most {limit} pins per user")]
    QuotaExceeded { limit: usize },
    #[error("a {0} pin is already placed; one pin per color")]
    DuplicateColor(PinColor),
    #[error("this pin was created by another user and cannot be deleted")]
    NotOwner,
    #[error("identity is not ready yet; try again shortly")]
    IdentityNotReady,
    #[error("pin not found")]
    NotFound,
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl PinError {
    /// Validation errors abort the user's action and are shown to them;
    /// persistence failures are only logged.
    pub fn is_validation(&self) -> bool {
        !matches!(self, PinError::PersistenceFailure(_))
    }
}

impl From<StoreError> for PinError {
    fn from(e: StoreError) -> Self {
        PinError::PersistenceFailure(e.to_string())
    }
}
