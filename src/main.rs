use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use pinmap::console::{describe_pin, parse_command, ConsoleCommand, ConsoleView, ParseError, HELP};
use pinmap::identity::{AnonymousAuthority, AnonymousIdentity, IdentityProvider, SessionIdentity};
use pinmap::store::inmem::InMemPinStore;
use pinmap::store::{Backend, PinLogStore};
use pinmap::view::ImageClick;
use pinmap::{BoardConfig, PinBoard, SystemClock, UiEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    // stdout belongs to the board view
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let config = BoardConfig::from_env();
    info!(
        fade_ms = config.fade_duration.as_millis() as u64,
        max_pins = config.max_pins_per_user,
        data_dir = ?config.data_dir,
        "starting pin board"
    );

    let store = match &config.data_dir {
        Some(dir) => InMemPinStore::with_snapshot(dir),
        None => InMemPinStore::new(),
    };
    let backend: Arc<dyn Backend> = Arc::new(store.clone());
    let identity = build_identity(&config)?;

    let (ui_tx, ui_rx) = mpsc::channel::<UiEvent>(64);
    let board = PinBoard::new(
        &config,
        Some(backend),
        identity,
        Arc::new(SystemClock),
        ConsoleView::stdout(),
    );
    let board = tokio::spawn(board.run(ui_rx));

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(ParseError::Empty) => continue,
            Err(e) => {
                println!("? {e}");
                continue;
            }
        };
        let event = match command {
            ConsoleCommand::Color(color) => UiEvent::SetColor(color),
            ConsoleCommand::Click { x, y, width, height } => {
                UiEvent::ImageClick(ImageClick::at(x, y, width, height))
            }
            ConsoleCommand::Select(id) => UiEvent::SelectPin(id),
            ConsoleCommand::Deselect => UiEvent::Deselect,
            ConsoleCommand::Delete => UiEvent::DeleteSelected,
            ConsoleCommand::List => {
                let (tx, rx) = oneshot::channel();
                if ui_tx.send(UiEvent::ListPins(tx)).await.is_err() {
                    break;
                }
                let pins = rx.await.unwrap_or_default();
                println!("{} active pin(s)", pins.len());
                for pin in pins {
                    println!("  {}", describe_pin(&pin));
                }
                continue;
            }
            ConsoleCommand::Logs(day) => {
                print_log(&store, day.unwrap_or_else(|| Utc::now().date_naive())).await;
                continue;
            }
            ConsoleCommand::Help => {
                println!("{HELP}");
                continue;
            }
            ConsoleCommand::Quit => break,
        };
        if ui_tx.send(event).await.is_err() {
            warn!("board stopped, ignoring further input");
            break;
        }
    }

    let _ = ui_tx.send(UiEvent::Shutdown).await;
    drop(ui_tx);
    board.await.context("board task failed")??;
    info!("bye");
    Ok(())
}

/// Anonymous token auth when a signing secret is configured, otherwise a
/// session id kept in the data dir (or only in memory).
fn build_identity(config: &BoardConfig) -> anyhow::Result<Arc<dyn IdentityProvider>> {
    if let Some(secret) = &config.jwt_secret {
        let authority = AnonymousAuthority::new(secret.clone()).context("invalid PINMAP_JWT_SECRET")?;
        let identity = AnonymousIdentity::new(Arc::new(authority));
        if let Err(e) = identity.sign_in_anonymously() {
            warn!(error = %e, "anonymous sign-in failed, pins cannot be placed");
        }
        return Ok(Arc::new(identity));
    }
    let session = match &config.data_dir {
        Some(dir) => SessionIdentity::load_or_create(&dir.join("session_id")),
        None => SessionIdentity::generate(),
    };
    info!(user_id = session.id(), "using session identity");
    Ok(Arc::new(session))
}

async fn print_log(store: &InMemPinStore, day: NaiveDate) {
    match store.list_log(day).await {
        Ok(entries) => {
            let entries: BTreeMap<_, _> = entries.into_iter().collect();
            match serde_json::to_string_pretty(&entries) {
                Ok(json) => println!("{json}"),
                Err(e) => println!("? {e}"),
            }
        }
        Err(e) => println!("? {e}"),
    }
}
