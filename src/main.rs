use anyhow::Result;
use ethers::providers::{Http, Provider};
use pool_listener::{
    arbitrage::{ArbitrageConfig, TwoPoolStrategy},
    config::AppConfig,
    dex::DexRegistry,
    execution::LoggingExecutor,
    monitor::{Monitor, NodeGasOracle, WindowDeps, WindowProcessor},
    multicall::{CallEngine, MulticallTransport},
    onboarding::{Blacklist, Onboarding},
    store::{MemoryStore, Store},
    utils,
};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cfg = AppConfig::load()?;
    utils::init_logging(cfg.debug);

    tracing::info!(
        net = %cfg.net_name,
        dexs = cfg.dexs.len(),
        base_tokens = cfg.strategies.base_tokens.len(),
        min_profit_usd = cfg.min_profit_usd,
        "[INIT] pool-listener starting"
    );

    let http = Arc::new(Provider::<Http>::try_from(cfg.rpcs.http.as_str())?);
    let transport = Arc::new(MulticallTransport::new(http.clone(), cfg.multicall_address));
    let engine = CallEngine::new(transport, cfg.chunk_length, cfg.max_concurrent);
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let registry = DexRegistry::from_config(&cfg.dexs)?;
    let onboarding = Onboarding::new(engine.clone(), store.clone(), registry.factories().copied())?;
    let strategy = Arc::new(TwoPoolStrategy::new(
        ArbitrageConfig::from_app(&cfg),
        store.clone(),
        &cfg,
    ));
    let blacklist = Blacklist::load(&cfg.blacklist_dir)?;

    let processor = WindowProcessor::new(
        WindowDeps {
            engine,
            store,
            registry,
            onboarding,
            strategy,
            executor: Arc::new(LoggingExecutor),
            gas: Arc::new(NodeGasOracle::new(http)),
            blacklist,
        },
        cfg.trader_contract,
        cfg.gas_price,
        cfg.gas_times,
    )?;
    tracing::info!(
        chunk_length = cfg.chunk_length,
        max_concurrent = cfg.max_concurrent,
        event_waiting_time_ms = cfg.event_waiting_time,
        "[INIT] pipeline ready"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("[INIT] ctrl-c received, shutting down");
        }
        let _ = shutdown_tx.send(true);
    });

    Monitor::new(&cfg, processor).run(shutdown_rx).await?;
    Ok(())
}
