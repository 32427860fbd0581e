//! feeprobe library
//!
//! A workload and validation harness for a node's fee estimator. The
//! harness funds a population of trivially spendable puzzle outputs, drives
//! fee-paying transactions through external nodes under several block
//! capacity regimes, and checks the node's estimates against the fees it
//! actually paid.

pub mod blockstats;
pub mod config;
pub mod error;
pub mod estimate;
pub mod fee;
pub mod ledger;
pub mod rpc;
pub mod scenario;
pub mod splitter;
pub mod transaction;
pub mod workload;

pub use error::{HarnessError, Result};
pub use estimate::{check_estimates, EstimateVector};
pub use fee::{sample_fee, FeeSamples};
pub use ledger::{SpendableOutput, UtxoLedger, Worklist};
pub use scenario::{ScenarioReport, SmartFeeScenario};

#[cfg(test)]
pub mod tests;
