use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use settlement_server::config::ServerConfig;
use settlement_server::connection_manager::handle_listen_server;
use settlement_server::deposit::DepositDesk;
use settlement_server::engine::SystemClock;
use settlement_server::{EngineHandle, Seed, SettlementEngine};
use tokio::join;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::parse();
    let seed = match &config.seed {
        Some(path) => Seed::load(path)?,
        None if config.empty => Seed::default(),
        None => Seed::demo(Utc::now()),
    };
    info!(
        users = seed.users.len(),
        polls = seed.polls.len(),
        bets = seed.bets.len(),
        "seeding engine"
    );

    let engine = SettlementEngine::from_seed(seed, config.engine(), SystemClock)?;
    let (engine_handle, mut engine_manager) = EngineHandle::channel(engine, config.queue_depth);

    let engine_task = tokio::spawn(async move {
        engine_manager.manage().await;
    });

    let listener = TcpListener::bind(config.bind).await?;
    let deposits = DepositDesk::new(config.deposit_delay());
    let listen_server_task = tokio::spawn(async move {
        handle_listen_server(listener, engine_handle, deposits).await
    });

    let (res1, res2) = join!(engine_task, listen_server_task);
    res1?;
    res2??;
    Ok(())
}
