//! Fee estimation scenario
//!
//! Seeds and grows the puzzle output population on the splitting node, then
//! runs each throughput regime in turn and checks the estimates after every
//! one. The run finishes by draining the estimate node's mempool and
//! checking once more.

use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

use crate::config::{HarnessConfig, PhaseConfig};
use crate::estimate::{fetch_and_check, EstimateVector};
use crate::fee::FeeSamples;
use crate::ledger::{UtxoLedger, Worklist};
use crate::rpc::{mine_until_empty, wait_for_block_sync, BitcoinRpcClient, NodeRpc};
use crate::splitter::OutputSplitter;
use crate::transaction::PuzzleTxBuilder;
use crate::workload::{WorkloadDriver, WorkloadReport};
use crate::{HarnessError, Result};

/// What one regime produced
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub phase: PhaseConfig,
    pub workload: WorkloadReport,
    pub estimates: EstimateVector,
}

#[derive(Debug, Clone)]
pub struct ScenarioReport {
    /// Confirmed puzzle outputs once splitting finished
    pub split_outputs: usize,
    pub phases: Vec<PhaseOutcome>,
    pub final_estimates: EstimateVector,
    pub fee_samples: usize,
}

pub struct SmartFeeScenario {
    config: HarnessConfig,
    nodes: Vec<Arc<dyn NodeRpc>>,
}

impl SmartFeeScenario {
    /// `nodes[i]` plays the role of configured node `i`
    pub fn new(config: HarnessConfig, nodes: Vec<Arc<dyn NodeRpc>>) -> Result<Self> {
        let roles = [config.splitter_node, config.estimate_node]
            .into_iter()
            .chain(config.source_nodes.iter().copied())
            .chain(config.phases.iter().map(|phase| phase.miner));
        for index in roles {
            if index >= nodes.len() {
                return Err(HarnessError::Config(format!(
                    "node index {} out of range ({} nodes connected)",
                    index,
                    nodes.len()
                )));
            }
        }
        Ok(Self { config, nodes })
    }

    /// Connect an RPC client to every configured endpoint
    pub fn connect(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        let mut nodes: Vec<Arc<dyn NodeRpc>> = Vec::with_capacity(config.nodes.len());
        for rpc in config.rpc_configs()? {
            nodes.push(Arc::new(BitcoinRpcClient::new(rpc)?));
        }
        Self::new(config, nodes)
    }

    pub async fn run(&self) -> Result<ScenarioReport> {
        let config = &self.config;
        let workload = config.workload_config();
        let builder = PuzzleTxBuilder::new(config.network()?);
        let mut ledger = UtxoLedger::new();
        let mut samples = FeeSamples::new();
        let mut rng = StdRng::seed_from_u64(config.seed);

        let splitter_node = self.nodes[config.splitter_node].as_ref();
        info!("Splitting inputs on {} for {} passes", splitter_node.name(), config.split_passes);
        let splitter = OutputSplitter::new(&builder);
        splitter.seed(splitter_node, &mut ledger, Worklist::Unconfirmed).await?;
        let mined = mine_until_empty(splitter_node).await?;
        ledger.reconcile(&mined);
        splitter.grow(splitter_node, &mut ledger, config.split_passes).await?;
        let split_outputs = ledger.len(Worklist::Confirmed);
        info!("Finished splitting: {} confirmed puzzle outputs", split_outputs);

        wait_for_block_sync(&self.nodes, workload.poll_interval, workload.sync_timeout).await?;

        let sources = config
            .source_nodes
            .iter()
            .map(|index| Arc::clone(&self.nodes[*index]))
            .collect();
        let driver = WorkloadDriver::new(&builder, workload, sources, self.nodes.clone())?;
        let estimate_node = self.nodes[config.estimate_node].as_ref();

        let mut phases = Vec::with_capacity(config.phases.len());
        for phase in &config.phases {
            let miner = self.nodes[phase.miner].as_ref();
            info!("Creating transactions and mining {} blocks with {}", phase.blocks, miner.name());
            let report = driver
                .run(phase.blocks, miner, &mut ledger, &mut samples, &mut rng)
                .await?;
            let estimates = fetch_and_check(estimate_node, samples.as_slice(), phase.max_invalid).await?;
            phases.push(PhaseOutcome {
                phase: phase.clone(),
                workload: report,
                estimates,
            });
        }

        let drained = mine_until_empty(estimate_node).await?;
        ledger.reconcile(&drained);
        let workload = driver.config();
        wait_for_block_sync(&self.nodes, workload.poll_interval, workload.sync_timeout).await?;
        info!("Final estimates after emptying mempools");
        let final_estimates = fetch_and_check(estimate_node, samples.as_slice(), config.final_max_invalid).await?;

        Ok(ScenarioReport {
            split_outputs,
            phases,
            final_estimates,
            fee_samples: samples.len(),
        })
    }
}
