#![forbid(unsafe_code)]

//! The anchor node binary: configuration and genesis loading, store opening,
//! state bootstrap, the coordinated-start sleep, and the spawning of every
//! background task plus the HTTP and websocket servers.

use anchor_consensus::context::NodeContext;
use anchor_consensus::{aarp_delivery, bootstrap, epoch_rotation, generation, grabber, health,
    now_ms, rotation};
use anchor_storage::Stores;
use anchor_types::config::NodeConfig;
use anchor_types::genesis::Genesis;
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const POD_OUTBOX_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const POD_OUTBOX_FLUSH_LIMIT: usize = 50;

#[derive(Parser, Debug)]
#[command(name = "anchor-node", about = "A committee anchor node")]
struct Opts {
    /// Path to the node configuration TOML file.
    #[arg(long)]
    config: PathBuf,
    /// Path to the genesis JSON file.
    #[arg(long)]
    genesis: PathBuf,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn load_config(path: &Path) -> Result<NodeConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parse config file {}", path.display()))
}

fn load_genesis(path: &Path) -> Result<Genesis> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read genesis file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse genesis file {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let opts = Opts::parse();

    let config = load_config(&opts.config)?;
    let genesis = load_genesis(&opts.genesis)?;

    let stores =
        Stores::open_all(Path::new(&config.chaindata_path)).context("open chaindata stores")?;
    let state =
        bootstrap::load_or_seed_state(&stores, &genesis).context("prepare approvement state")?;
    let generation_pointers = bootstrap::load_generation_pointers(&stores, &state)
        .context("load generation pointers")?;

    let ctx = NodeContext::new(config, genesis, stores, state)
        .map_err(|e| anyhow!("decode configured keypair: {e}"))?;
    *ctx.generation.lock() = generation_pointers;

    // Coordinated launch: nothing runs before the first epoch opens.
    let epoch_start = ctx
        .approvement
        .read()
        .await
        .current_epoch()
        .map(|epoch| epoch.start_timestamp)
        .unwrap_or_default();
    let now = now_ms();
    if epoch_start > now {
        tracing::info!(target: "node", "waiting {} ms for coordinated start", epoch_start - now);
        tokio::time::sleep(Duration::from_millis(epoch_start - now)).await;
    }

    ctx.set_flood_gate(true);
    spawn_tasks(&ctx);
    serve(&ctx).await?;

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    tracing::info!(target: "node", "stop signal received, shutting down");
    // Stores and connections close on drop; tasks die with the runtime.
    Ok(())
}

fn spawn_tasks(ctx: &Arc<NodeContext>) {
    tokio::spawn(epoch_rotation::run(ctx.clone()));
    tokio::spawn(grabber::run(ctx.clone()));
    tokio::spawn(generation::run(ctx.clone()));
    tokio::spawn(health::run(ctx.clone()));
    tokio::spawn(rotation::run(ctx.clone()));
    tokio::spawn(aarp_delivery::run(ctx.clone()));

    let outbox_ctx = ctx.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(POD_OUTBOX_FLUSH_INTERVAL).await;
            outbox_ctx
                .pod
                .flush_outbox_once(
                    &outbox_ctx.stores.finalization_voting_stats,
                    POD_OUTBOX_FLUSH_LIMIT,
                )
                .await;
        }
    });
}

async fn serve(ctx: &Arc<NodeContext>) -> Result<()> {
    let http_addr = ctx.config.http_addr();
    let ws_addr = ctx.config.ws_addr();

    let http_listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("bind http listener on {http_addr}"))?;
    let ws_listener = tokio::net::TcpListener::bind(&ws_addr)
        .await
        .with_context(|| format!("bind websocket listener on {ws_addr}"))?;

    tracing::info!(target: "node", "http server is starting at http://{http_addr}");
    tracing::info!(target: "node", "websocket server is starting at ws://{ws_addr}");

    let http_router = anchor_gateway::http_router(ctx.clone());
    let ws_router = anchor_gateway::ws_router(ctx.clone());

    tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, http_router).await {
            tracing::error!(target: "node", "http server error: {e}");
        }
    });
    tokio::spawn(async move {
        if let Err(e) = axum::serve(ws_listener, ws_router).await {
            tracing::error!(target: "node", "websocket server error: {e}");
        }
    });

    Ok(())
}
