//! Puzzle transaction construction
//!
//! This module handles:
//! - Funding a payment from the ledger's worklists
//! - Asking the node for the unsigned two-output transaction
//! - Installing puzzle unlocking scripts in place of signatures
//! - Submitting and crediting the new outputs back to the ledger

pub mod puzzle;
pub mod unlock;

use bitcoin::consensus::deserialize;
use bitcoin::{Amount, Network, OutPoint, Transaction, Txid};
use log::debug;

use crate::ledger::{SpendableOutput, UtxoLedger, Worklist};
use crate::rpc::{NodeRpc, Payment};
use crate::{HarnessError, Result};
use puzzle::PuzzleVariant;
use unlock::{LegacyLayoutPatcher, UnlockingScriptInstaller};

/// A transaction the harness has submitted
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    pub txid: Txid,
    /// Serialized bytes as submitted
    pub raw: Vec<u8>,
    pub fee: Amount,
}

impl BuiltTransaction {
    pub fn size(&self) -> usize {
        self.raw.len()
    }
}

/// Builds transactions whose inputs and outputs are all puzzle scripts
pub struct PuzzleTxBuilder {
    network: Network,
    installer: Box<dyn UnlockingScriptInstaller>,
}

impl PuzzleTxBuilder {
    /// Builder using the fixed-offset legacy layout patcher
    pub fn new(network: Network) -> Self {
        Self::with_installer(network, Box::new(LegacyLayoutPatcher))
    }

    pub fn with_installer(network: Network, installer: Box<dyn UnlockingScriptInstaller>) -> Self {
        Self { network, installer }
    }

    /// Output 0 pays puzzle A, output 1 pays puzzle B
    pub fn puzzle_payments(&self, first: Amount, second: Amount) -> Result<Vec<Payment>> {
        Ok(vec![
            Payment {
                address: PuzzleVariant::for_vout(0).address(self.network)?,
                amount: first,
            },
            Payment {
                address: PuzzleVariant::for_vout(1).address(self.network)?,
                amount: second,
            },
        ])
    }

    /// Unsigned transaction from the node, checked to pay `payments` in order
    pub async fn create_unsigned(
        &self,
        node: &dyn NodeRpc,
        inputs: &[OutPoint],
        payments: &[Payment],
    ) -> Result<Vec<u8>> {
        let raw = node.create_raw_transaction(inputs, payments).await?;
        verify_outputs(&raw, payments)?;
        Ok(raw)
    }

    /// Install the unlocking script matching each spent output's index
    pub fn install_unlocking_scripts(&self, raw_tx: &[u8], spent: &[SpendableOutput]) -> Result<Vec<u8>> {
        let variants: Vec<PuzzleVariant> = spent
            .iter()
            .map(|output| PuzzleVariant::for_vout(output.vout()))
            .collect();
        self.installer.install(raw_tx, &variants)
    }

    /// Pay `payee_amount` to puzzle B with `fee`, returning change to
    /// puzzle A. Inputs come from the ledger, confirmed outputs first; both
    /// new outputs are credited as unconfirmed.
    pub async fn build(
        &self,
        node: &dyn NodeRpc,
        ledger: &mut UtxoLedger,
        payee_amount: Amount,
        fee: Amount,
    ) -> Result<BuiltTransaction> {
        let required = payee_amount + fee;
        let (inputs, total_in) = ledger.take_funds(required)?;
        let change = total_in - required;

        let outpoints: Vec<OutPoint> = inputs.iter().map(|output| output.outpoint).collect();
        let payments = self.puzzle_payments(change, payee_amount)?;
        let unsigned = self.create_unsigned(node, &outpoints, &payments).await?;
        let raw = self.install_unlocking_scripts(&unsigned, &inputs)?;

        let txid = node.send_raw_transaction(&raw, true).await?;
        debug!(
            "Submitted {} via {}: {} inputs, fee {}, {} bytes",
            txid,
            node.name(),
            inputs.len(),
            fee,
            raw.len()
        );

        ledger.credit(Worklist::Unconfirmed, SpendableOutput::new(txid, 0, change))?;
        ledger.credit(Worklist::Unconfirmed, SpendableOutput::new(txid, 1, payee_amount))?;

        Ok(BuiltTransaction { txid, raw, fee })
    }
}

/// The node must keep the requested output order, since the puzzle
/// variant of an output is implied by its index.
fn verify_outputs(raw_tx: &[u8], payments: &[Payment]) -> Result<()> {
    let tx: Transaction = deserialize(raw_tx)?;
    let in_order = tx.output.len() == payments.len()
        && tx
            .output
            .iter()
            .zip(payments)
            .all(|(out, payment)| out.script_pubkey == payment.address.script_pubkey() && out.value == payment.amount);
    if !in_order {
        return Err(HarnessError::UnsupportedEncoding(
            "node did not preserve the requested output order".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::consensus::serialize;
    use bitcoin::transaction::Version;
    use bitcoin::TxOut;

    fn raw_with_outputs(outputs: Vec<TxOut>) -> Vec<u8> {
        serialize(&Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![Default::default()],
            output: outputs,
        })
    }

    #[test]
    fn test_puzzle_payments_follow_output_index() {
        let builder = PuzzleTxBuilder::new(Network::Regtest);
        let payments = builder
            .puzzle_payments(Amount::from_sat(7), Amount::from_sat(9))
            .unwrap();
        assert_eq!(payments[0].address.script_pubkey(), PuzzleVariant::A.script_pubkey());
        assert_eq!(payments[1].address.script_pubkey(), PuzzleVariant::B.script_pubkey());
        assert_eq!(payments[1].amount, Amount::from_sat(9));
    }

    #[test]
    fn test_verify_outputs_detects_swapped_order() {
        let builder = PuzzleTxBuilder::new(Network::Regtest);
        let payments = builder
            .puzzle_payments(Amount::from_sat(7_000), Amount::from_sat(9_000))
            .unwrap();
        let as_requested = raw_with_outputs(vec![
            TxOut { value: Amount::from_sat(7_000), script_pubkey: PuzzleVariant::A.script_pubkey() },
            TxOut { value: Amount::from_sat(9_000), script_pubkey: PuzzleVariant::B.script_pubkey() },
        ]);
        let swapped = raw_with_outputs(vec![
            TxOut { value: Amount::from_sat(9_000), script_pubkey: PuzzleVariant::B.script_pubkey() },
            TxOut { value: Amount::from_sat(7_000), script_pubkey: PuzzleVariant::A.script_pubkey() },
        ]);

        assert!(verify_outputs(&as_requested, &payments).is_ok());
        assert!(matches!(
            verify_outputs(&swapped, &payments),
            Err(HarnessError::UnsupportedEncoding(_))
        ));
    }
}
