//! Node RPC abstraction
//!
//! This module handles:
//! - The `NodeRpc` trait every node collaborator implements
//! - Dialect selection between legacy and modern Bitcoin Core RPC names
//! - Mempool and block synchronization helpers over a set of nodes

pub mod bitcoin;
pub mod sync;

use ::bitcoin::{Address, Amount, BlockHash, OutPoint, Txid};
use async_trait::async_trait;
use serde::Deserialize;

use crate::blockstats::{BlockStat, BlockStatsReport};
use crate::ledger::SpendableOutput;
use crate::Result;

pub use self::bitcoin::{BitcoinRpcClient, BitcoinRpcConfig};
pub use sync::{mine_block, mine_until_empty, wait_for_block_sync, wait_for_mempool_sync};

/// A payment requested from `createrawtransaction`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub address: Address,
    pub amount: Amount,
}

/// Which generation of RPC method names the node speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcDialect {
    /// `estimatefee`, `signrawtransaction`, `generate`
    #[default]
    Legacy,
    /// `estimatesmartfee`, `signrawtransactionwithwallet`, `generatetoaddress`
    Modern,
}

impl std::str::FromStr for RpcDialect {
    type Err = crate::HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "legacy" => Ok(RpcDialect::Legacy),
            "modern" => Ok(RpcDialect::Modern),
            other => Err(crate::HarnessError::Config(format!("unknown RPC dialect {}", other))),
        }
    }
}

/// Request/response interface of one node
///
/// Implemented over HTTP JSON-RPC by [`BitcoinRpcClient`] and in memory by
/// the test mock. Transient transport errors are handled below this trait.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Short label used in log lines
    fn name(&self) -> &str;

    /// Unsigned transaction spending `inputs` and paying `outputs` in order
    async fn create_raw_transaction(&self, inputs: &[OutPoint], outputs: &[Payment]) -> Result<Vec<u8>>;

    /// Sign with the node wallet
    async fn sign_raw_transaction(&self, raw_tx: &[u8]) -> Result<Vec<u8>>;

    async fn send_raw_transaction(&self, raw_tx: &[u8], allow_high_fees: bool) -> Result<Txid>;

    /// Wallet outputs with at least `min_conf` confirmations
    async fn list_unspent(&self, min_conf: u32) -> Result<Vec<SpendableOutput>>;

    async fn generate(&self, count: u32) -> Result<Vec<BlockHash>>;

    async fn get_block_txids(&self, hash: &BlockHash) -> Result<Vec<Txid>>;

    async fn get_raw_mempool(&self) -> Result<Vec<Txid>>;

    async fn get_best_block_hash(&self) -> Result<BlockHash>;

    /// Fee rate in BTC/kB for confirmation within `target` blocks, `None`
    /// while the estimator has no answer
    async fn estimate_fee(&self, target: u16) -> Result<Option<f64>>;

    async fn get_block_stats(
        &self,
        start: i64,
        end: i64,
        stats: Option<&[BlockStat]>,
    ) -> Result<BlockStatsReport>;
}
