//! Workload driver
//!
//! Alternates randomized transaction batches with single blocks on a chosen
//! miner, recording the fee rate of every transaction it submits.

use bitcoin::{Amount, Txid};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::fee::{sample_fee, FeeSamples};
use crate::ledger::{UtxoLedger, Worklist};
use crate::rpc::{mine_block, wait_for_block_sync, wait_for_mempool_sync, NodeRpc};
use crate::transaction::PuzzleTxBuilder;
use crate::{HarnessError, Result};

#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Amount paid to puzzle B by every transaction
    pub payee_amount: Amount,
    pub min_fee: Amount,
    pub fee_increment: Amount,
    /// Mean transactions per block
    pub nominal_batch: usize,
    /// Batch sizes are drawn from `nominal_batch ± batch_jitter`
    pub batch_jitter: usize,
    pub poll_interval: Duration,
    pub sync_timeout: Duration,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            payee_amount: Amount::from_sat(500_000),
            min_fee: Amount::from_sat(1_000),
            fee_increment: Amount::from_sat(1_000),
            nominal_batch: 100,
            batch_jitter: 50,
            poll_interval: Duration::from_millis(100),
            sync_timeout: Duration::from_secs(60),
        }
    }
}

impl WorkloadConfig {
    pub fn batch_bounds(&self) -> (usize, usize) {
        (
            self.nominal_batch.saturating_sub(self.batch_jitter),
            self.nominal_batch + self.batch_jitter,
        )
    }
}

/// Totals for one `run`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadReport {
    pub blocks: usize,
    pub transactions: usize,
    /// Harness transactions included in the mined blocks
    pub confirmed: usize,
}

pub struct WorkloadDriver<'a> {
    builder: &'a PuzzleTxBuilder,
    config: WorkloadConfig,
    /// Nodes transactions are submitted through
    sources: Vec<Arc<dyn NodeRpc>>,
    /// Nodes that must agree on mempool and tip between rounds
    observers: Vec<Arc<dyn NodeRpc>>,
}

impl<'a> WorkloadDriver<'a> {
    pub fn new(
        builder: &'a PuzzleTxBuilder,
        config: WorkloadConfig,
        sources: Vec<Arc<dyn NodeRpc>>,
        observers: Vec<Arc<dyn NodeRpc>>,
    ) -> Result<Self> {
        if sources.is_empty() {
            return Err(HarnessError::Config("workload needs at least one source node".to_string()));
        }
        Ok(Self {
            builder,
            config,
            sources,
            observers,
        })
    }

    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    /// Run `num_blocks` rounds of batch, mine, reconcile
    pub async fn run<R: Rng + Send>(
        &self,
        num_blocks: usize,
        miner: &dyn NodeRpc,
        ledger: &mut UtxoLedger,
        samples: &mut FeeSamples,
        rng: &mut R,
    ) -> Result<WorkloadReport> {
        let (lower, upper) = self.config.batch_bounds();
        let mut report = WorkloadReport::default();
        let mut pending: HashSet<Txid> = HashSet::new();

        for round in 0..num_blocks {
            ledger.shuffle_confirmed(rng);
            let batch = rng.gen_range(lower..=upper);

            for _ in 0..batch {
                let source = self
                    .sources
                    .choose(rng)
                    .ok_or_else(|| HarnessError::Config("no source nodes".to_string()))?;
                let fee = sample_fee(rng, self.config.min_fee, self.config.fee_increment);
                let built = self
                    .builder
                    .build(source.as_ref(), ledger, self.config.payee_amount, fee)
                    .await?;
                samples.record(built.fee, built.size());
                pending.insert(built.txid);
            }

            wait_for_mempool_sync(&self.observers, self.config.poll_interval, self.config.sync_timeout).await?;
            let mined: HashSet<Txid> = mine_block(miner).await?.into_iter().collect();
            wait_for_block_sync(&self.observers, self.config.poll_interval, self.config.sync_timeout).await?;

            ledger.reconcile(&mined);
            let before = pending.len();
            pending.retain(|txid| !mined.contains(txid));
            report.blocks += 1;
            report.transactions += batch;
            report.confirmed += before - pending.len();

            debug!(
                "Round {}/{} on {}: {} submitted, {} block txs, {} confirmed / {} pending outputs",
                round + 1,
                num_blocks,
                miner.name(),
                batch,
                mined.len(),
                ledger.len(Worklist::Confirmed),
                ledger.len(Worklist::Unconfirmed)
            );
        }

        info!(
            "Mined {} blocks on {} over {} transactions ({} confirmed)",
            report.blocks,
            miner.name(),
            report.transactions,
            report.confirmed
        );
        Ok(report)
    }
}
