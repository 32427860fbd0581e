//! Fee estimate validation
//!
//! Checks the estimator's answers for targets 1..=25 against each other and
//! against the fee rates the harness actually paid. Absent estimates may
//! only occur as a prefix of the lowest targets.

use log::info;

use crate::rpc::NodeRpc;
use crate::{HarnessError, Result};

/// Highest confirmation target queried
pub const MAX_TARGET: u16 = 25;

/// Absorbs rounding between the node's decimal amounts and f64 rates
pub const ESTIMATE_TOLERANCE: f64 = 1.0e-6;

/// Targets printed when narrating a check
pub const REPORTED_TARGETS: [u16; 6] = [1, 2, 3, 6, 15, 25];

/// One estimate per target, index 0 holding target 1
#[derive(Debug, Clone, PartialEq)]
pub struct EstimateVector(Vec<Option<f64>>);

impl EstimateVector {
    pub fn new(estimates: Vec<Option<f64>>) -> Self {
        Self(estimates)
    }

    /// Build from raw node values where a negative number means absent
    pub fn from_raw(values: &[f64]) -> Self {
        Self(values.iter().map(|v| if *v < 0.0 { None } else { Some(*v) }).collect())
    }

    /// Query `node` for every target in `1..=MAX_TARGET`
    pub async fn fetch(node: &dyn NodeRpc) -> Result<Self> {
        let mut estimates = Vec::with_capacity(MAX_TARGET as usize);
        for target in 1..=MAX_TARGET {
            estimates.push(node.estimate_fee(target).await?);
        }
        Ok(Self(estimates))
    }

    pub fn get(&self, target: u16) -> Option<f64> {
        target
            .checked_sub(1)
            .and_then(|index| self.0.get(index as usize).copied().flatten())
    }

    pub fn as_slice(&self) -> &[Option<f64>] {
        &self.0
    }

    /// `[t1, t2, t3, t6, t15, t25]` with `-1` for absent entries
    pub fn summary(&self) -> String {
        let parts: Vec<String> = REPORTED_TARGETS
            .iter()
            .map(|target| match self.get(*target) {
                Some(rate) => format!("{:.8}", rate),
                None => "-1".to_string(),
            })
            .collect();
        format!("[{}]", parts.join(", "))
    }
}

/// Validate `estimates` against the observed `fee_samples`.
///
/// Present estimates must lie within the sample range and never rise as
/// the target grows; absent estimates may only precede the first present
/// one, and at most `max_invalid` may be absent.
pub fn check_estimates(estimates: &[Option<f64>], fee_samples: &[f64], max_invalid: usize) -> Result<()> {
    let delta = ESTIMATE_TOLERANCE;
    let present = estimates
        .iter()
        .enumerate()
        .filter_map(|(index, estimate)| estimate.map(|e| (index as u16 + 1, e)));

    if estimates.iter().any(Option::is_some) {
        let min = fee_samples.iter().copied().reduce(f64::min).ok_or(HarnessError::NoFeeSamples)?;
        let max = fee_samples.iter().copied().reduce(f64::max).ok_or(HarnessError::NoFeeSamples)?;

        let mut last = max;
        for (target, estimate) in present {
            if estimate + delta < min || estimate - delta > max {
                return Err(HarnessError::EstimateOutOfBounds {
                    target,
                    estimate,
                    min,
                    max,
                });
            }
            if estimate - delta > last {
                return Err(HarnessError::EstimateNotMonotonic {
                    target,
                    estimate,
                    previous: last,
                });
            }
            last = estimate;
        }
    }

    let mut seen_valid = false;
    let mut invalid = 0usize;
    for (index, estimate) in estimates.iter().enumerate() {
        match estimate {
            Some(_) => seen_valid = true,
            None if seen_valid => {
                return Err(HarnessError::EstimateAppearsAfterGap {
                    target: index as u16 + 1,
                })
            }
            None => invalid += 1,
        }
    }

    if invalid > max_invalid {
        return Err(HarnessError::TooManyInvalidEstimates {
            count: invalid,
            max_invalid,
        });
    }
    Ok(())
}

/// Fetch the current estimates from `node` and validate them
pub async fn fetch_and_check(node: &dyn NodeRpc, fee_samples: &[f64], max_invalid: usize) -> Result<EstimateVector> {
    let estimates = EstimateVector::fetch(node).await?;
    info!("Estimates from {} for 1/2/3/6/15/25: {}", node.name(), estimates.summary());
    check_estimates(estimates.as_slice(), fee_samples, max_invalid)?;
    Ok(estimates)
}
