use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::{LifecycleConfig, FADE_DURATION_MS, MAX_PINS_PER_USER};

/// Board settings derived from env.
#[derive(Clone, Debug)]
pub struct BoardConfig {
    pub fade_duration: Duration,
    pub max_pins_per_user: usize,
    pub opacity_tick: Duration,
    pub data_dir: Option<PathBuf>,
    pub jwt_secret: Option<String>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            fade_duration: Duration::from_millis(FADE_DURATION_MS as u64),
            max_pins_per_user: MAX_PINS_PER_USER,
            opacity_tick: Duration::from_secs(1),
            data_dir: None,
            jwt_secret: None,
        }
    }
}

impl BoardConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn ms_env(name: &str, default: u64) -> Duration { Duration::from_millis(std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)) }
        fn opt_env(name: &str) -> Option<String> { std::env::var(name).ok().filter(|v| !v.trim().is_empty()) }
        Self {
            fade_duration: ms_env("PINMAP_FADE_MS", FADE_DURATION_MS as u64),
            max_pins_per_user: usize_env("PINMAP_MAX_PINS", MAX_PINS_PER_USER),
            opacity_tick: ms_env("PINMAP_OPACITY_TICK_MS", 1000),
            data_dir: opt_env("PINMAP_DATA_DIR").map(PathBuf::from),
            jwt_secret: opt_env("PINMAP_JWT_SECRET"),
        }
    }

    pub fn lifecycle(&self, persistent: bool) -> LifecycleConfig {
        LifecycleConfig {
            fade_ms: i64::try_from(self.fade_duration.as_millis()).unwrap_or(i64::MAX),
            max_pins_per_user: self.max_pins_per_user,
            persistent,
        }
    }
}
