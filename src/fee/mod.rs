//! Fee sampling and fee-rate bookkeeping
//!
//! This module handles:
//! - Drawing log-distributed fees anchored at a minimum fee
//! - Converting a paid fee into a BTC/kB fee rate
//! - Accumulating the fee rates of every submitted transaction

use bitcoin::Amount;
use rand::Rng;

/// Ratio between successive fee steps, roughly the fourth root of two
pub const FEE_STEP_RATIO: f64 = 1.1892;

/// Largest exponent drawn; 1.1892^28 is about 128x the increment
pub const MAX_FEE_EXPONENT: i32 = 28;

/// Draw a fee of `min_fee - fee_increment + fee_increment * 1.1892^k` for a
/// uniform `k` in `[0, 28]`, rounded down to the satoshi.
///
/// Most draws land close to `min_fee` while a long tail pays up to ~128
/// increments. Reproducible for a seeded `rng`.
pub fn sample_fee<R: Rng + ?Sized>(rng: &mut R, min_fee: Amount, fee_increment: Amount) -> Amount {
    let exponent = rng.gen_range(0..=MAX_FEE_EXPONENT);
    fee_for_exponent(exponent, min_fee, fee_increment)
}

/// Fee for a fixed exponent. Saturates at zero when the increment exceeds
/// the minimum fee.
pub fn fee_for_exponent(exponent: i32, min_fee: Amount, fee_increment: Amount) -> Amount {
    let scaled = (fee_increment.to_sat() as f64 * FEE_STEP_RATIO.powi(exponent)).floor() as u64;
    let base = min_fee.to_sat().saturating_sub(fee_increment.to_sat());
    Amount::from_sat(base + scaled)
}

/// Fee rate in BTC per 1000 bytes of serialized transaction
pub fn fee_rate_per_kb(fee: Amount, tx_size_bytes: usize) -> f64 {
    let kbytes = tx_size_bytes as f64 / 1000.0;
    fee.to_btc() / kbytes
}

/// Append-only record of the fee rates paid by synthesized transactions
#[derive(Debug, Clone, Default)]
pub struct FeeSamples {
    rates: Vec<f64>,
}

impl FeeSamples {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the fee rate of a submitted transaction
    pub fn record(&mut self, fee: Amount, tx_size_bytes: usize) -> f64 {
        let rate = fee_rate_per_kb(fee, tx_size_bytes);
        self.rates.push(rate);
        rate
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.rates
    }

    pub fn min(&self) -> Option<f64> {
        self.rates.iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.rates.iter().copied().reduce(f64::max)
    }
}
