#![forbid(unsafe_code)]

pub mod config;
pub mod infra;

pub mod features {
    pub mod trade;
}

pub mod identity {
    pub mod wallet;
}

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

use crate::config::Settings;
use crate::features::trade::TradeCtx;
use crate::features::trade::domain::pricing::FixedRates;
use crate::features::trade::history::{HistoryApi, HttpHistoryApi, NoRemoteHistory};
use crate::features::trade::message::GLOBAL_ROOM;
use crate::features::trade::orders::{MemoryOrderStore, RoomBook};
use crate::features::trade::phase::PhaseCache;
use crate::features::trade::router::NotificationRouter;
use crate::features::trade::store::MessageStore;
use crate::features::trade::subscriber::{DEFAULT_POLL_INTERVAL_MS, start_room};
use crate::features::trade::transport::ChannelTransport;
use crate::identity::wallet::ConfigWallet;

#[derive(Parser, Debug, Clone)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Args {
    #[arg(
        long,
        value_name = "PATH",
        value_parser = clap::value_parser!(PathBuf),
        help = "(Optional) Path to config file; default is 'config.toml'"
    )]
    pub config: Option<PathBuf>,
}

/// Wires the trade components from settings. The in-process transport serves
/// embedded and observer deployments; a relay- or websocket-backed
/// `Transport` swaps in at the same seam.
pub fn build_ctx(settings: &Settings) -> TradeCtx {
    let history: Arc<dyn HistoryApi> = match &settings.config.history_url {
        Some(url) => Arc::new(HttpHistoryApi::new(url.clone())),
        None => Arc::new(NoRemoteHistory),
    };

    let rates: HashMap<String, f64> = settings.config.rates.clone();

    TradeCtx {
        wallet: Arc::new(ConfigWallet::new(settings.config.wallet_address.clone())),
        store: Arc::new(MessageStore::new(
            settings.config.data_dir.as_ref().map(PathBuf::from),
        )),
        transport: Arc::new(ChannelTransport::new()),
        history,
        orders: Arc::new(MemoryOrderStore::new()),
        rates: Arc::new(FixedRates::new(rates)),
        rooms: Arc::new(RoomBook::new()),
        router: Arc::new(NotificationRouter::new()),
        phases: Arc::new(PhaseCache::new()),
    }
}

pub async fn run(settings: Settings) -> Result<()> {
    let ctx = build_ctx(&settings);
    let poll = Duration::from_millis(
        settings
            .config
            .poll_interval_ms
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
    );

    let mut handles = vec![start_room(ctx.clone(), GLOBAL_ROOM, poll).await];
    for room in &settings.config.rooms {
        handles.push(start_room(ctx.clone(), room.clone(), poll).await);
    }
    info!("joined {} room(s)", handles.len());

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM. Shutting down...");
        },
        _ = sigint.recv() => {
            info!("Received SIGINT. Shutting down...");
        }
    }

    for handle in &handles {
        handle.stop();
    }
    futures::future::join_all(handles.into_iter().map(|handle| handle.stopped())).await;

    Ok(())
}
