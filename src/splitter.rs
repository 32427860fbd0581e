//! Output splitting
//!
//! Grows the puzzle output population before measurement starts. Each split
//! spends one output into two puzzle outputs of about half its value, so
//! each pass over the confirmed worklist doubles the number of independent
//! inputs the workload can draw from.

use bitcoin::{Amount, OutPoint, Txid};
use log::{debug, info};

use crate::ledger::{SpendableOutput, UtxoLedger, Worklist};
use crate::rpc::{mine_until_empty, NodeRpc};
use crate::transaction::PuzzleTxBuilder;
use crate::{HarnessError, Result};

/// Fee paid by every split transaction
pub const SPLIT_FEE: Amount = Amount::from_sat(1_000);

/// `(floor(amount / 2), amount - half - SPLIT_FEE)`
pub fn split_amounts(amount: Amount) -> Result<(Amount, Amount)> {
    let half = Amount::from_sat(amount.to_sat() / 2);
    let remainder = amount
        .checked_sub(half)
        .and_then(|rest| rest.checked_sub(SPLIT_FEE))
        .filter(|rest| *rest > Amount::ZERO)
        .ok_or(HarnessError::InsufficientFunds {
            need: SPLIT_FEE,
            have: amount,
        })?;
    Ok((half, remainder))
}

pub struct OutputSplitter<'a> {
    builder: &'a PuzzleTxBuilder,
}

impl<'a> OutputSplitter<'a> {
    pub fn new(builder: &'a PuzzleTxBuilder) -> Self {
        Self { builder }
    }

    /// Split the node wallet's most recently listed unspent output into two
    /// puzzle outputs filed under `dest`. The wallet signs this one.
    pub async fn seed(&self, node: &dyn NodeRpc, ledger: &mut UtxoLedger, dest: Worklist) -> Result<Txid> {
        let funding = node
            .list_unspent(0)
            .await?
            .pop()
            .ok_or(HarnessError::InsufficientFunds {
                need: SPLIT_FEE,
                have: Amount::ZERO,
            })?;
        let (half, remainder) = split_amounts(funding.amount)?;

        let payments = self.builder.puzzle_payments(half, remainder)?;
        let unsigned = self
            .builder
            .create_unsigned(node, &[funding.outpoint], &payments)
            .await?;
        let signed = node.sign_raw_transaction(&unsigned).await?;
        let txid = node.send_raw_transaction(&signed, true).await?;

        self.credit_split(ledger, dest, txid, half, remainder)?;
        info!("Seeded puzzle outputs from wallet coin {} ({})", funding.outpoint, funding.amount);
        Ok(txid)
    }

    /// Split the newest output of `source` into two puzzle outputs filed
    /// under `dest`
    pub async fn resplit(
        &self,
        node: &dyn NodeRpc,
        ledger: &mut UtxoLedger,
        source: Worklist,
        dest: Worklist,
    ) -> Result<Txid> {
        let input = ledger.take_last(source)?;
        let (half, remainder) = split_amounts(input.amount)?;

        let payments = self.builder.puzzle_payments(half, remainder)?;
        let unsigned = self
            .builder
            .create_unsigned(node, &[input.outpoint], &payments)
            .await?;
        let raw = self.builder.install_unlocking_scripts(&unsigned, &[input])?;
        let txid = node.send_raw_transaction(&raw, true).await?;

        self.credit_split(ledger, dest, txid, half, remainder)?;
        debug!("Split {} into {} and {}", input.outpoint, OutPoint::new(txid, 0), OutPoint::new(txid, 1));
        Ok(txid)
    }

    /// Run `passes` doubling passes: every confirmed output is split into
    /// the unconfirmed worklist, the mempool is mined empty, and the new
    /// outputs are reconciled back to confirmed.
    pub async fn grow(&self, node: &dyn NodeRpc, ledger: &mut UtxoLedger, passes: usize) -> Result<()> {
        for pass in 0..passes {
            while !ledger.is_empty(Worklist::Confirmed) {
                self.resplit(node, ledger, Worklist::Confirmed, Worklist::Unconfirmed)
                    .await?;
            }
            let mined = mine_until_empty(node).await?;
            ledger.reconcile(&mined);
            info!(
                "Split pass {}/{}: {} confirmed puzzle outputs",
                pass + 1,
                passes,
                ledger.len(Worklist::Confirmed)
            );
        }
        Ok(())
    }

    fn credit_split(
        &self,
        ledger: &mut UtxoLedger,
        dest: Worklist,
        txid: Txid,
        half: Amount,
        remainder: Amount,
    ) -> Result<()> {
        ledger.credit(dest, SpendableOutput::new(txid, 0, half))?;
        ledger.credit(dest, SpendableOutput::new(txid, 1, remainder))
    }
}
