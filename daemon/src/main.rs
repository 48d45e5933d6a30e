mod compositor;
mod config;
mod deck;
mod handler;
mod ipc_server;
mod macros;
mod modules;
mod source;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;

#[tokio::main]
async fn main() -> Result<()> {
    let loaded = config::Config::load();
    let log_level = match &loaded {
        Ok(cfg) => cfg.general.log_level.clone(),
        Err(_) => "info".to_string(),
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::info!("Starting deckhand v{}", env!("CARGO_PKG_VERSION"));

    let config = match loaded {
        Ok(cfg) => {
            log::info!("✓ Configuration loaded successfully");
            log::info!("  General settings:");
            log::info!("    - Log level: {}", cfg.general.log_level);
            log::info!(
                "    - Key icons: {}px, LCD segments: {}x{}",
                cfg.general.icon_size,
                cfg.general.lcd_width,
                cfg.general.lcd_height
            );
            match cfg.general.output_dir() {
                Some(dir) => log::info!("    - Frames written to: {}", dir.display()),
                None => log::info!("    - Frames written to: nowhere"),
            }
            log::info!("  Controls: {} key(s), {} knob(s)", cfg.key.len(), cfg.knob.len());
            cfg
        }
        Err(e) => {
            log::error!("Failed to load config: {:#}. Using defaults.", e);
            config::Config::default()
        }
    };

    let compositor = compositor::Compositor::new(config.general.font_path().as_deref());
    let modules = modules::ModuleContext::new(compositor)?;

    let mut deck = deck::Deck::build(&config, &modules).await;
    deck.start();

    let state = Arc::new(Mutex::new(DaemonState::new(deck)));

    // Start IPC server
    let ipc_state = state.clone();
    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server::start(ipc_state).await {
            log::error!("IPC server error: {}", e);
        }
    });

    // Set up signal handlers
    let signal_state = state.clone();
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                log::info!("Received SIGTERM, shutting down...");
            }
            _ = sigint.recv() => {
                log::info!("Received SIGINT, shutting down...");
            }
        }

        signal_state.lock().await.should_exit = true;
    });

    if let Err(e) = ipc_handle.await {
        log::error!("IPC server task failed: {}", e);
    }

    log::info!("Daemon shutting down");
    let tasks = state.lock().await.deck.stop_all();
    deck::join_stopped(tasks).await;

    Ok(())
}

/// Shared daemon state
pub struct DaemonState {
    pub should_exit: bool,
    pub start_time: std::time::Instant,
    pub deck: deck::Deck,
}

impl DaemonState {
    fn new(deck: deck::Deck) -> Self {
        Self {
            should_exit: false,
            start_time: std::time::Instant::now(),
            deck,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
