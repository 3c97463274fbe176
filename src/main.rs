//! ringwm
//!
//! A minimal reactive X11 window manager: every window fills the screen,
//! windows form a single focus ring, and key chords spawn, close, cycle
//! or quit.

mod config;
mod wm;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wm::display::X11Display;
use wm::events::Dispatcher;
use wm::spawn::{self, DetachedLauncher};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ringwm=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ringwm");

    // Anything failing before the loop starts is fatal
    let display = X11Display::connect(None)?;
    let bindings = config::Config::load().key_bindings();
    let _reaper = spawn::spawn_reaper()?;
    let mut dispatcher = Dispatcher::setup(display, DetachedLauncher, bindings)?;

    // The loop blocks on the X socket; keep it off the async workers so the
    // reaper stays responsive
    tokio::task::spawn_blocking(move || dispatcher.run())
        .await
        .context("Event loop panicked")??;

    info!("ringwm stopped");
    Ok(())
}
