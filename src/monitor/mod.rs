//! Live log subscription, windowing and the per-window pipeline.

pub mod coalescer;
pub mod window;

pub use coalescer::{Coalescer, Debounce, Observation};
pub use window::{GasOracle, NodeGasOracle, WindowDeps, WindowProcessor, WindowSummary};

use crate::config::AppConfig;
use crate::errors::Result;
use ethers::providers::{Middleware, Provider, Ws};
use ethers::types::{Filter, H256, Log};
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

enum Exit {
    Shutdown,
    StreamEnded,
}

/// Drives the pipeline from a websocket log subscription until shutdown.
pub struct Monitor {
    ws_url: String,
    topics: Vec<H256>,
    coalescer: Coalescer,
    debounce: Debounce,
    processor: WindowProcessor,
}

impl Monitor {
    pub fn new(cfg: &AppConfig, processor: WindowProcessor) -> Self {
        Self {
            ws_url: cfg.rpcs.ws.clone(),
            topics: cfg.topics(),
            coalescer: Coalescer::new(),
            debounce: Debounce::new(Duration::from_millis(cfg.event_waiting_time)),
            processor,
        }
    }

    /// Subscribe, process windows, and reconnect after a delay whenever the
    /// subscription fails or ends. Returns once `shutdown` flips or its
    /// sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.subscribe(&mut shutdown).await {
                Ok(Exit::Shutdown) => break,
                Ok(Exit::StreamEnded) => warn!("[MONITOR] log subscription ended"),
                Err(e) => error!(error = %e, "[MONITOR] log subscription failed"),
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {
                    info!(delay_s = RECONNECT_DELAY.as_secs(), "[MONITOR] reconnecting");
                }
            }
        }
        info!(pending = self.coalescer.len(), "[MONITOR] stopped");
        Ok(())
    }

    async fn subscribe(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<Exit> {
        let provider = Provider::<Ws>::connect(self.ws_url.as_str()).await?;
        let filter = Filter::new().topic0(self.topics.clone());
        let mut stream = provider.subscribe_logs(&filter).await?;
        info!(topics = self.topics.len(), "[MONITOR] subscribed to logs");

        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(Exit::Shutdown),
                next = stream.next() => match next {
                    Some(log) => self.observe(log).await,
                    None => return Ok(Exit::StreamEnded),
                },
                _ = self.debounce.fired() => self.flush().await,
            }
        }
    }

    async fn observe(&mut self, log: Log) {
        match self.coalescer.observe(log) {
            Observation::Ignored => debug!("[MONITOR] removed log ignored"),
            Observation::NewBlock { previous, window } => {
                debug!(previous, block = self.coalescer.block_number(), "[MONITOR] new block");
                self.process(previous, window).await;
                self.debounce.arm();
            }
            Observation::Cached => self.debounce.arm(),
        }
    }

    async fn flush(&mut self) {
        self.debounce.disarm();
        let block = self.coalescer.block_number();
        let logs = self.coalescer.drain();
        self.process(block, logs).await;
    }

    async fn process(&mut self, block: u64, logs: Vec<Log>) {
        if logs.is_empty() {
            return;
        }
        let started = Instant::now();
        match self.processor.process(logs).await {
            Ok(summary) => info!(
                block,
                events = summary.events,
                dropped = summary.dropped,
                markets = summary.markets,
                priced = summary.priced,
                candidates = summary.candidates,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "[MONITOR] window done"
            ),
            Err(e) => error!(block, error = %e, "[MONITOR] window failed"),
        }
    }
}
