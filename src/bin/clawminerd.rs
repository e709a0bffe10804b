//! The ClawMiner daemon entry point: loads configuration, opens the
//! persistent stores, restores `PoIService` state, and runs the mandatory
//! relay-mesh HTTP surface alongside the heartbeat and header-sync tasks
//! until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use clawminer::config::Config;
use clawminer::relay::RelayCache;
use clawminer::relay_http::{self, RelayHttpState};
use clawminer::service::{run_heartbeat, PoIService, PoIServiceConfig};
use clawminer::store::{BhsClient, BlockStore, HeaderStore, HeaderSync};

fn print_banner(cfg: &Config) {
    println!(
        "{}",
        r#"
   ____ _                 __  __ _
  / ___| | __ ___      __|  \/  (_)_ __   ___ _ __
 | |   | |/ _` \ \ /\ / /| |\/| | | '_ \ / _ \ '__|
 | |___| | (_| |\ V  V / | |  | | | | | |  __/ |
  \____|_|\__,_| \_/\_/  |_|  |_|_|_| |_|\___|_|
"#
        .cyan()
        .bold()
    );
    println!("  Proof-of-Indexing mining daemon".dimmed());
    println!("  miner address : {}", cfg.miner_address.yellow());
    println!("  data dir      : {}", cfg.data_dir);
    println!("  relay http    : {}:{}", cfg.relay_http_bind, cfg.relay_http_port);
    println!();
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config::from_env();
    print_banner(&cfg);

    let data_dir = PathBuf::from(&cfg.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        error!(error = %e, "failed to create data directory");
        std::process::exit(1);
    }

    let block_store = match BlockStore::open(&data_dir.join("blocks")) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to open block store");
            std::process::exit(1);
        }
    };
    let relay_cache = match RelayCache::open(&data_dir.join("relay"), cfg.relay_cache_max, cfg.relay_cache_ttl_s) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "failed to open relay cache");
            std::process::exit(1);
        }
    };

    let svc_cfg = PoIServiceConfig {
        miner_address: cfg.miner_address.clone(),
        adjustment_period: cfg.adjustment_period,
        target_block_time_ms: cfg.target_block_time_ms,
        initial_difficulty: cfg.initial_difficulty,
        min_items_to_mine: cfg.min_items_to_mine,
        batch_size: cfg.batch_size,
        chunk_size: cfg.chunk_size,
        max_chunks_per_header: cfg.max_chunks_per_header,
        mint_max_retries: cfg.mint_max_retries,
        mint_retry_min_ms: cfg.mint_retry_min_ms,
        mint_retry_max_ms: cfg.mint_retry_max_ms,
    };
    // No MintBroadcaster is wired here: the settlement layer is an external
    // collaborator this crate does not implement (see broadcaster.rs).
    let service = Arc::new(PoIService::new(svc_cfg, Arc::clone(&block_store), Arc::clone(&relay_cache), None));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let heartbeat_handle = tokio::spawn(run_heartbeat(
        Arc::clone(&service),
        cfg.heartbeat_interval_ms,
        shutdown_rx.clone(),
    ));

    let relay_state = Arc::new(RelayHttpState::new(Arc::clone(&relay_cache), Vec::new()));
    let relay_state_for_serve = Arc::clone(&relay_state);
    let relay_bind = cfg.relay_http_bind.clone();
    let relay_port = cfg.relay_http_port;
    let relay_handle = tokio::spawn(async move {
        if let Err(e) = relay_http::serve(relay_state_for_serve, &relay_bind, relay_port).await {
            error!(error = %e, "relay HTTP surface exited with error");
        }
    });

    let mut prune_shutdown = shutdown_rx.clone();
    let prune_cache = Arc::clone(&relay_cache);
    let prune_interval_ms = cfg.relay_prune_interval_ms;
    let prune_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(prune_interval_ms));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .map(|d| d.as_secs())
                        .unwrap_or(0);
                    match prune_cache.prune(now) {
                        Ok(n) if n > 0 => info!(pruned = n, "relay cache prune cycle"),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "relay cache prune failed"),
                    }
                }
                _ = prune_shutdown.changed() => {
                    if *prune_shutdown.borrow() { break; }
                }
            }
        }
    });

    let header_sync_handle = match cfg.bhs_url.clone() {
        Some(bhs_url) => match HeaderStore::open(&data_dir.join("headers")) {
            Ok(store) => {
                let client = BhsClient::new(bhs_url, cfg.bhs_api_key.clone(), Duration::from_secs(10));
                let sync = Arc::new(HeaderSync::new(Arc::new(store), client, cfg.bhs_batch_size, cfg.bhs_max_retries));
                let mut hs_shutdown = shutdown_rx.clone();
                let poll_interval_ms = cfg.bhs_poll_interval_ms;
                Some(tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(Duration::from_millis(poll_interval_ms));
                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                let progress = sync.sync_once().await;
                                info!(
                                    chain_tip_height = progress.chain_tip_height,
                                    total_headers = progress.total_headers,
                                    "header sync tick"
                                );
                            }
                            _ = hs_shutdown.changed() => {
                                if *hs_shutdown.borrow() { break; }
                            }
                        }
                    }
                }))
            }
            Err(e) => {
                error!(error = %e, "failed to open header store, header sync disabled");
                None
            }
        },
        None => None,
    };

    info!("clawminerd ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received, winding down background tasks");

    relay_state.shutdown.store(true, Ordering::SeqCst);
    let _ = shutdown_tx.send(true);

    let _ = heartbeat_handle.await;
    let _ = prune_handle.await;
    if let Some(handle) = header_sync_handle {
        let _ = handle.await;
    }
    // relay_handle observes state.shutdown via its own accept-loop poll;
    // give it a moment to notice before the process exits.
    tokio::time::sleep(Duration::from_millis(300)).await;
    relay_handle.abort();

    info!("clawminerd stopped");
}
