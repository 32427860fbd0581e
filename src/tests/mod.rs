//! Test utilities and mock implementations for feeprobe testing
//!
//! This module provides:
//! - An in-memory node set sharing one mempool and chain
//! - End-to-end runs of the splitter, workload and scenario against it



use bitcoin::{Amount, Network};
use std::sync::Arc;
use std::time::Duration;

use crate::config::HarnessConfig;
use crate::rpc::NodeRpc;
use crate::workload::WorkloadConfig;
use mock_node::MockChain;

/// Test configuration for the mock node set
#[derive(Clone, Debug)]
pub struct TestConfig {
    /// Coin the mock wallet starts with
    pub wallet_funds: Amount,
    /// Per-node block capacity in transactions; node 0 splits
    pub block_capacities: Vec<usize>,
    pub network: Network,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            wallet_funds: Amount::from_int_btc(50),
            block_capacities: vec![1_000, 10, 6],
            network: Network::Regtest,
        }
    }
}

/// Mock chain plus the nodes attached to it
pub struct TestNetwork {
    pub chain: MockChain,
    pub nodes: Vec<Arc<dyn NodeRpc>>,
}

impl TestNetwork {
    /// Node 0 is excluded from the estimator feed, as splitting happens
    /// before the estimating nodes would see any traffic
    pub fn new(config: &TestConfig) -> Self {
        init_logging();
        let chain = MockChain::new();
        chain.fund_wallet(config.wallet_funds);
        let nodes = config
            .block_capacities
            .iter()
            .enumerate()
            .map(|(index, capacity)| {
                let node = chain.node(&format!("node{}", index), *capacity);
                let node = if index == 0 { node.excluded_from_estimates() } else { node };
                Arc::new(node) as Arc<dyn NodeRpc>
            })
            .collect();
        Self { chain, nodes }
    }
}

/// Small workload with fast sync polling
pub fn quick_workload() -> WorkloadConfig {
    WorkloadConfig {
        nominal_batch: 10,
        batch_jitter: 5,
        poll_interval: Duration::from_millis(1),
        sync_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

pub fn quick_harness_config() -> HarnessConfig {
    HarnessConfig {
        split_passes: 3,
        nominal_batch: 8,
        batch_jitter: 4,
        phases: vec![
            crate::config::PhaseConfig { miner: 0, blocks: 3, max_invalid: 1 },
            crate::config::PhaseConfig { miner: 2, blocks: 2, max_invalid: 3 },
            crate::config::PhaseConfig { miner: 1, blocks: 3, max_invalid: 2 },
        ],
        poll_interval_ms: 1,
        sync_timeout_secs: 1,
        seed: 11,
        ..Default::default()
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
