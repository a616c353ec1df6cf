use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::UserId;

/// Shortest secret accepted for signing anonymous tokens.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(thiserror::Error, Debug)]
pub enum IdentityError {
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("session file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("secret must be at least {MIN_SECRET_LEN} characters long")]
    WeakSecret,
}

/// Source of the current user's stable identifier.
pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> Option<UserId>;
    fn ready(&self) -> bool;
}

/// Browser-style session id used when no authenticated backend is configured.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    id: UserId,
}

impl SessionIdentity {
    pub fn generate() -> Self {
        Self { id: new_session_id() }
    }

    /// Reuse the id stored at `path`, or create and store a new one. When the
    /// file cannot be written the id lives in memory for this run only.
    pub fn load_or_create(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) if !s.trim().is_empty() => {
                let id = s.trim().to_string();
                info!(session_id = %id, "reusing stored session id");
                return Self { id };
            }
            _ => {}
        }
        let identity = Self::generate();
        if let Err(e) = identity.store(path) {
            warn!(path = %path.display(), error = %e, "could not persist session id, keeping it in memory");
        }
        info!(session_id = %identity.id, "created session id");
        identity
    }

    fn store(&self, path: &Path) -> Result<(), IdentityError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, &self.id)?;
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_user_id(&self) -> Option<UserId> {
        Some(self.id.clone())
    }

    fn ready(&self) -> bool {
        true
    }
}

/// `user-<9 base36 chars>-<epoch ms>`
fn new_session_id() -> UserId {
    let mut rng = rand::thread_rng();
    let tail: String = (0..9)
        .map(|_| char::from_digit(rng.gen_range(0..36), 36).unwrap_or('0'))
        .collect();
    format!("user-{}-{}", tail, Utc::now().timestamp_millis())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Issues and validates HS256 tokens for anonymous users.
pub struct AnonymousAuthority {
    secret: String,
    ttl: chrono::Duration,
}

impl AnonymousAuthority {
    pub fn new(secret: impl Into<String>) -> Result<Self, IdentityError> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LEN {
            return Err(IdentityError::WeakSecret);
        }
        Ok(Self { secret, ttl: chrono::Duration::hours(24) })
    }

    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sign in a brand-new anonymous user and return its token.
    pub fn issue(&self) -> Result<String, IdentityError> {
        let exp = (Utc::now() + self.ttl).timestamp().max(0) as usize;
        let claims = Claims { sub: uuid::Uuid::new_v4().to_string(), exp };
        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, IdentityError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )?;
        Ok(data.claims)
    }
}

#[derive(Debug, Default)]
struct AuthState {
    settled: bool,
    claims: Option<Claims>,
}

/// Identity backed by anonymous authentication. Not ready until a sign-in
/// attempt has completed; the user id is the token subject.
pub struct AnonymousIdentity {
    authority: Arc<AnonymousAuthority>,
    state: RwLock<AuthState>,
}

impl AnonymousIdentity {
    pub fn new(authority: Arc<AnonymousAuthority>) -> Self {
        Self { authority, state: RwLock::new(AuthState::default()) }
    }

    pub fn sign_in_anonymously(&self) -> Result<UserId, IdentityError> {
        let token = match self.authority.issue() {
            Ok(token) => token,
            Err(e) => {
                self.settle(None);
                return Err(e);
            }
        };
        self.sign_in_with_token(&token)
    }

    /// Adopt an existing token, e.g. one restored from a previous run.
    pub fn sign_in_with_token(&self, token: &str) -> Result<UserId, IdentityError> {
        match self.authority.verify(token) {
            Ok(claims) => {
                let uid = claims.sub.clone();
                self.settle(Some(claims));
                info!(user_id = %uid, "anonymous sign-in complete");
                Ok(uid)
            }
            Err(e) => {
                warn!(error = %e, "anonymous sign-in failed");
                self.settle(None);
                Err(e)
            }
        }
    }

    pub fn sign_out(&self) {
        self.settle(None);
    }

    fn settle(&self, claims: Option<Claims>) {
        let mut s = self.state.write().unwrap_or_else(PoisonError::into_inner);
        s.settled = true;
        s.claims = claims;
    }
}

impl IdentityProvider for AnonymousIdentity {
    fn current_user_id(&self) -> Option<UserId> {
        let s = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now().timestamp().max(0) as usize;
        s.claims
            .as_ref()
            .filter(|c| c.exp > now)
            .map(|c| c.sub.clone())
    }

    fn ready(&self) -> bool {
        self.state.read().unwrap_or_else(PoisonError::into_inner).settled
    }
}

/// The acting user, or `None` while identity is still being established.
pub fn current_actor(identity: &dyn IdentityProvider) -> Option<UserId> {
    if identity.ready() {
        identity.current_user_id()
    } else {
        None
    }
}
