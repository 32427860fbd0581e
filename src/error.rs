//! Error types for the feeprobe harness
//!
//! Funding exhaustion and estimate validation failures are fatal: the
//! scenario only reports pass or fail, so nothing here is retried.

use bitcoin::{Amount, OutPoint};
use thiserror::Error;

use crate::ledger::Worklist;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("insufficient funds: need {need}, have {have}")]
    InsufficientFunds { need: Amount, have: Amount },

    #[error("{0} worklist is empty")]
    EmptyLedger(Worklist),

    #[error("output {0} is already tracked by the ledger")]
    DuplicateOutput(OutPoint),

    #[error("estimated fee ({estimate:.8}) for target {target} out of range ({min:.8}, {max:.8})")]
    EstimateOutOfBounds {
        target: u16,
        estimate: f64,
        min: f64,
        max: f64,
    },

    #[error("estimated fee ({estimate:.8}) for target {target} larger than last fee ({previous:.8}) for lower number of confirms")]
    EstimateNotMonotonic {
        target: u16,
        estimate: f64,
        previous: f64,
    },

    #[error("invalid estimate at target {target} appears at higher confirm count than valid estimate")]
    EstimateAppearsAfterGap { target: u16 },

    #[error("more than ({max_invalid}) invalid estimates: got {count}")]
    TooManyInvalidEstimates { count: usize, max_invalid: usize },

    #[error("no fee samples recorded to bound estimates against")]
    NoFeeSamples,

    #[error("unsupported raw transaction encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("nodes did not reach {what} sync within {secs}s")]
    SyncTimeout { what: &'static str, secs: u64 },

    #[error("Invalid selected statistic {0}")]
    InvalidSelectedStatistic(String),

    #[error("block stats missing statistic {0}")]
    BlockStatsMissing(String),

    #[error("block stats contain unselected statistic {0}")]
    BlockStatsUnexpected(String),

    #[error("block stats inconsistent at height {height}: {detail}")]
    BlockStatsInconsistent { height: i64, detail: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<anyhow::Error> for HarnessError {
    fn from(err: anyhow::Error) -> Self {
        HarnessError::Rpc(format!("{:#}", err))
    }
}

impl From<bitcoin::consensus::encode::Error> for HarnessError {
    fn from(err: bitcoin::consensus::encode::Error) -> Self {
        HarnessError::UnsupportedEncoding(err.to_string())
    }
}

pub type Result<T> = core::result::Result<T, HarnessError>;
