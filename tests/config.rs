use std::path::PathBuf;
use std::time::Duration;

use pinmap::config::BoardConfig;
use serial_test::serial;

const VARS: [&str; 5] = [
    "PINMAP_FADE_MS",
    "PINMAP_MAX_PINS",
    "PINMAP_OPACITY_TICK_MS",
    "PINMAP_DATA_DIR",
    "PINMAP_JWT_SECRET",
];

fn clear() {
    for v in VARS {
        std::env::remove_var(v);
    }
}

#[test]
#[serial]
fn defaults_without_env() {
    clear();
    let cfg = BoardConfig::from_env();
    assert_eq!(cfg.fade_duration, Duration::from_secs(60));
    assert_eq!(cfg.max_pins_per_user, 5);
    assert_eq!(cfg.opacity_tick, Duration::from_secs(1));
    assert_eq!(cfg.data_dir, None);
    assert_eq!(cfg.jwt_secret, None);
}

#[test]
#[serial]
fn env_overrides_are_applied() {
    clear();
    std::env::set_var("PINMAP_FADE_MS", "1500");
    std::env::set_var("PINMAP_MAX_PINS", "3");
    std::env::set_var("PINMAP_OPACITY_TICK_MS", "250");
    std::env::set_var("PINMAP_DATA_DIR", "/tmp/pinmap-test");
    std::env::set_var("PINMAP_JWT_SECRET", "   ");
    let cfg = BoardConfig::from_env();
    clear();

    assert_eq!(cfg.fade_duration, Duration::from_millis(1500));
    assert_eq!(cfg.max_pins_per_user, 3);
    assert_eq!(cfg.opacity_tick, Duration::from_millis(250));
    assert_eq!(cfg.data_dir, Some(PathBuf::from("/tmp/pinmap-test")));
    // blank values count as unset
    assert_eq!(cfg.jwt_secret, None);

    let lifecycle = cfg.lifecycle(false);
    assert_eq!(lifecycle.fade_ms, 1500);
    assert!(!lifecycle.persistent);
}

#[test]
#[serial]
fn unparsable_values_fall_back_to_defaults() {
    clear();
    std::env::set_var("PINMAP_FADE_MS", "soon");
    std::env::set_var("PINMAP_MAX_PINS", "-1");
    let cfg = BoardConfig::from_env();
    clear();
    assert_eq!(cfg.fade_duration, Duration::from_secs(60));
    assert_eq!(cfg.max_pins_per_user, 5);
}
