// =============================================================================
// Symbol Router: one evaluation lane per symbol
// =============================================================================
//
// Feature rows arrive on a single stream. The router fans them out to one
// Tokio task per symbol over a bounded channel, so rows of the same symbol
// are evaluated strictly in arrival order while different symbols progress
// independently. Every verdict (confirmed or rejected) goes to the output
// channel.
//
//   rows ──► SymbolRouter ──► lane[BTC] ──► GatingPipeline ──► output
//                         └─► lane[ETH] ──► GatingPipeline ──┘
//
// Lanes are spawned lazily on the first row for a symbol and stop when the
// router shuts down or the output channel is closed.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::gating::GatingPipeline;
use crate::types::{FeatureRow, Signal};

/// Default per-symbol lane depth.
pub const DEFAULT_LANE_CAPACITY: usize = 1024;

pub struct SymbolRouter {
    pipeline: Arc<GatingPipeline>,
    output: mpsc::Sender<Signal>,
    lane_capacity: usize,
    lanes: HashMap<String, mpsc::Sender<FeatureRow>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SymbolRouter {
    pub fn new(pipeline: Arc<GatingPipeline>, output: mpsc::Sender<Signal>) -> Self {
        Self::with_lane_capacity(pipeline, output, DEFAULT_LANE_CAPACITY)
    }

    pub fn with_lane_capacity(
        pipeline: Arc<GatingPipeline>,
        output: mpsc::Sender<Signal>,
        lane_capacity: usize,
    ) -> Self {
        Self {
            pipeline,
            output,
            lane_capacity: lane_capacity.max(1),
            lanes: HashMap::new(),
            tasks: Vec::new(),
        }
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Send `row` to its symbol lane, spawning the lane on first use. Waits
    /// while the lane is full.
    pub async fn route(&mut self, row: FeatureRow) -> Result<()> {
        let symbol = row.symbol.clone();
        let lane = match self.lanes.get(&symbol) {
            Some(lane) => lane.clone(),
            None => self.spawn_lane(&symbol),
        };
        lane.send(row)
            .await
            .map_err(|_| anyhow!("evaluation lane for {symbol} is closed"))
    }

    fn spawn_lane(&mut self, symbol: &str) -> mpsc::Sender<FeatureRow> {
        let (tx, mut rx) = mpsc::channel::<FeatureRow>(self.lane_capacity);
        let pipeline = self.pipeline.clone();
        let output = self.output.clone();
        let sym = symbol.to_string();

        self.tasks.push(tokio::spawn(async move {
            let mut evaluated = 0u64;
            while let Some(row) = rx.recv().await {
                let signal = pipeline.evaluate(&row);
                evaluated += 1;
                if output.send(signal).await.is_err() {
                    warn!(symbol = %sym, "signal output closed, stopping lane");
                    break;
                }
            }
            debug!(symbol = %sym, evaluated, "evaluation lane stopped");
        }));

        info!(symbol, lanes = self.lanes.len() + 1, "evaluation lane started");
        self.lanes.insert(symbol.to_string(), tx.clone());
        tx
    }

    /// Close every lane and wait for queued rows to drain.
    pub async fn shutdown(self) {
        drop(self.lanes);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "evaluation lane panicked");
            }
        }
    }
}

/// Drive `rows` through the pipeline until the input closes. Returns the
/// number of rows routed.
pub async fn run(
    pipeline: Arc<GatingPipeline>,
    mut rows: mpsc::Receiver<FeatureRow>,
    output: mpsc::Sender<Signal>,
) -> Result<u64> {
    let mut router = SymbolRouter::new(pipeline, output);
    let mut routed = 0u64;

    while let Some(row) = rows.recv().await {
        if let Err(e) = router.route(row).await {
            error!(error = %e, "routing failed, stopping");
            router.shutdown().await;
            return Err(e);
        }
        routed += 1;
    }

    info!(routed, lanes = router.lane_count(), "feature stream closed");
    router.shutdown().await;
    Ok(routed)
}
