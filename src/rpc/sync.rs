//! Synchronization points across nodes
//!
//! Blocking waits until every node agrees on its mempool or tip, plus the
//! mining helpers built on them.

use bitcoin::Txid;
use log::{debug, info};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use super::NodeRpc;
use crate::{HarnessError, Result};

/// Upper bound on blocks mined while draining a mempool
pub const MAX_DRAIN_BLOCKS: usize = 1_000;

/// Wait until every node reports the same mempool contents
pub async fn wait_for_mempool_sync(
    nodes: &[Arc<dyn NodeRpc>],
    poll_interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let started = Instant::now();
    loop {
        let mut pools = Vec::with_capacity(nodes.len());
        for node in nodes {
            let pool: HashSet<Txid> = node.get_raw_mempool().await?.into_iter().collect();
            pools.push(pool);
        }
        if pools.windows(2).all(|pair| pair[0] == pair[1]) {
            return Ok(());
        }
        if started.elapsed() >= timeout {
            return Err(HarnessError::SyncTimeout {
                what: "mempool",
                secs: timeout.as_secs(),
            });
        }
        debug!("Mempools not yet in sync, polling again");
        sleep(poll_interval).await;
    }
}

/// Wait until every node reports the same best block
pub async fn wait_for_block_sync(
    nodes: &[Arc<dyn NodeRpc>],
    poll_interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let started = Instant::now();
    loop {
        let mut tips = Vec::with_capacity(nodes.len());
        for node in nodes {
            tips.push(node.get_best_block_hash().await?);
        }
        if tips.windows(2).all(|pair| pair[0] == pair[1]) {
            return Ok(());
        }
        if started.elapsed() >= timeout {
            return Err(HarnessError::SyncTimeout {
                what: "block",
                secs: timeout.as_secs(),
            });
        }
        debug!("Tips not yet in sync, polling again");
        sleep(poll_interval).await;
    }
}

/// Mine one block on `miner` and return the txids it contains
pub async fn mine_block(miner: &dyn NodeRpc) -> Result<Vec<Txid>> {
    let hashes = miner.generate(1).await?;
    let hash = hashes
        .first()
        .ok_or_else(|| HarnessError::Rpc(format!("{} generated no block", miner.name())))?;
    miner.get_block_txids(hash).await
}

/// Mine on `miner` until its mempool is empty; returns every mined txid
pub async fn mine_until_empty(miner: &dyn NodeRpc) -> Result<HashSet<Txid>> {
    let mut mined = HashSet::new();
    let mut blocks = 0usize;
    while !miner.get_raw_mempool().await?.is_empty() {
        if blocks == MAX_DRAIN_BLOCKS {
            return Err(HarnessError::Rpc(format!(
                "{} mempool still not empty after {} blocks",
                miner.name(),
                blocks
            )));
        }
        mined.extend(mine_block(miner).await?);
        blocks += 1;
    }
    if blocks > 0 {
        info!("Mined {} blocks on {} to empty its mempool", blocks, miner.name());
    }
    Ok(mined)
}
