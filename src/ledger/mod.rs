//! UTXO ledger for puzzle outputs
//!
//! The node wallet does not track puzzle outputs, so the harness keeps its
//! own record of them in two named worklists. An outpoint lives in at most
//! one worklist and leaves the ledger when it is taken as an input.

use bitcoin::{Amount, OutPoint, Txid};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashSet, VecDeque};
use std::fmt;

use crate::{HarnessError, Result};

/// An output the harness can spend without a wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpendableOutput {
    pub outpoint: OutPoint,
    pub amount: Amount,
}

impl SpendableOutput {
    pub fn new(txid: Txid, vout: u32, amount: Amount) -> Self {
        Self {
            outpoint: OutPoint::new(txid, vout),
            amount,
        }
    }

    pub fn txid(&self) -> Txid {
        self.outpoint.txid
    }

    pub fn vout(&self) -> u32 {
        self.outpoint.vout
    }
}

/// Which worklist an output is filed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Worklist {
    /// Created by a transaction already in a block
    Confirmed,
    /// Created by a transaction still in the mempool
    Unconfirmed,
}

impl fmt::Display for Worklist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Worklist::Confirmed => write!(f, "confirmed"),
            Worklist::Unconfirmed => write!(f, "unconfirmed"),
        }
    }
}

#[derive(Debug, Default)]
pub struct UtxoLedger {
    confirmed: VecDeque<SpendableOutput>,
    unconfirmed: VecDeque<SpendableOutput>,
    live: HashSet<OutPoint>,
}

impl UtxoLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn list(&self, worklist: Worklist) -> &VecDeque<SpendableOutput> {
        match worklist {
            Worklist::Confirmed => &self.confirmed,
            Worklist::Unconfirmed => &self.unconfirmed,
        }
    }

    fn list_mut(&mut self, worklist: Worklist) -> &mut VecDeque<SpendableOutput> {
        match worklist {
            Worklist::Confirmed => &mut self.confirmed,
            Worklist::Unconfirmed => &mut self.unconfirmed,
        }
    }

    /// Append an output to the back of a worklist
    pub fn credit(&mut self, worklist: Worklist, output: SpendableOutput) -> Result<()> {
        if !self.live.insert(output.outpoint) {
            return Err(HarnessError::DuplicateOutput(output.outpoint));
        }
        self.list_mut(worklist).push_back(output);
        Ok(())
    }

    /// Pop the oldest output of a worklist
    pub fn take_next(&mut self, worklist: Worklist) -> Result<SpendableOutput> {
        let output = self
            .list_mut(worklist)
            .pop_front()
            .ok_or(HarnessError::EmptyLedger(worklist))?;
        self.live.remove(&output.outpoint);
        Ok(output)
    }

    /// Pop the newest output of a worklist
    pub fn take_last(&mut self, worklist: Worklist) -> Result<SpendableOutput> {
        let output = self
            .list_mut(worklist)
            .pop_back()
            .ok_or(HarnessError::EmptyLedger(worklist))?;
        self.live.remove(&output.outpoint);
        Ok(output)
    }

    /// Take inputs until their total strictly exceeds `required`, confirmed
    /// outputs first and unconfirmed ones after.
    ///
    /// Outputs taken before a shortfall is detected are consumed regardless;
    /// the shortfall is fatal to the run.
    pub fn take_funds(&mut self, required: Amount) -> Result<(Vec<SpendableOutput>, Amount)> {
        let mut inputs = Vec::new();
        let mut total = Amount::ZERO;

        for worklist in [Worklist::Confirmed, Worklist::Unconfirmed] {
            while total <= required && !self.list(worklist).is_empty() {
                let output = self.take_next(worklist)?;
                total += output.amount;
                inputs.push(output);
            }
        }

        if total <= required {
            return Err(HarnessError::InsufficientFunds {
                need: required,
                have: total,
            });
        }
        Ok((inputs, total))
    }

    /// Move every unconfirmed output created by one of `mined` into the
    /// confirmed worklist, keeping relative order. Returns how many moved.
    pub fn reconcile(&mut self, mined: &HashSet<Txid>) -> usize {
        let (now_confirmed, still_pending): (VecDeque<_>, VecDeque<_>) = self
            .unconfirmed
            .drain(..)
            .partition(|output| mined.contains(&output.txid()));
        let moved = now_confirmed.len();
        self.confirmed.extend(now_confirmed);
        self.unconfirmed = still_pending;
        moved
    }

    /// Randomize the order confirmed outputs are taken in
    pub fn shuffle_confirmed<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.confirmed.make_contiguous().shuffle(rng);
    }

    pub fn len(&self, worklist: Worklist) -> usize {
        self.list(worklist).len()
    }

    pub fn is_empty(&self, worklist: Worklist) -> bool {
        self.list(worklist).is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.live.contains(outpoint)
    }

    pub fn total_value(&self, worklist: Worklist) -> Amount {
        self.list(worklist).iter().map(|output| output.amount).sum()
    }

    pub fn iter(&self, worklist: Worklist) -> impl Iterator<Item = &SpendableOutput> {
        self.list(worklist).iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn txid(n: u8) -> Txid {
        Txid::from_byte_array([n; 32])
    }

    fn output(n: u8, vout: u32, sats: u64) -> SpendableOutput {
        SpendableOutput::new(txid(n), vout, Amount::from_sat(sats))
    }

    fn in_both(ledger: &UtxoLedger) -> bool {
        ledger
            .iter(Worklist::Confirmed)
            .any(|c| ledger.iter(Worklist::Unconfirmed).any(|u| u.outpoint == c.outpoint))
    }

    #[test]
    fn test_take_next_is_fifo() {
        let mut ledger = UtxoLedger::new();
        ledger.credit(Worklist::Confirmed, output(1, 0, 10)).unwrap();
        ledger.credit(Worklist::Confirmed, output(2, 0, 20)).unwrap();

        assert_eq!(ledger.take_next(Worklist::Confirmed).unwrap().amount.to_sat(), 10);
        assert_eq!(ledger.take_next(Worklist::Confirmed).unwrap().amount.to_sat(), 20);
        assert!(matches!(
            ledger.take_next(Worklist::Confirmed),
            Err(HarnessError::EmptyLedger(Worklist::Confirmed))
        ));
    }

    #[test]
    fn test_take_last_pops_newest() {
        let mut ledger = UtxoLedger::new();
        ledger.credit(Worklist::Unconfirmed, output(1, 0, 10)).unwrap();
        ledger.credit(Worklist::Unconfirmed, output(1, 1, 20)).unwrap();
        assert_eq!(ledger.take_last(Worklist::Unconfirmed).unwrap().vout(), 1);
    }

    #[test]
    fn test_empty_worklist_is_named_while_other_holds_outputs() {
        let mut ledger = UtxoLedger::new();
        ledger.credit(Worklist::Unconfirmed, output(1, 0, 10)).unwrap();

        let err = ledger.take_last(Worklist::Confirmed).unwrap_err();
        assert!(matches!(err, HarnessError::EmptyLedger(Worklist::Confirmed)));
        assert_eq!(err.to_string(), "confirmed worklist is empty");
        assert_eq!(ledger.len(Worklist::Unconfirmed), 1);
    }

    #[test]
    fn test_credit_rejects_live_duplicate() {
        let mut ledger = UtxoLedger::new();
        ledger.credit(Worklist::Confirmed, output(1, 0, 10)).unwrap();
        let err = ledger.credit(Worklist::Unconfirmed, output(1, 0, 10)).unwrap_err();
        assert!(matches!(err, HarnessError::DuplicateOutput(_)));
        assert!(!in_both(&ledger));
    }

    #[test]
    fn test_take_funds_prefers_confirmed() {
        let mut ledger = UtxoLedger::new();
        ledger.credit(Worklist::Unconfirmed, output(9, 0, 1_000)).unwrap();
        ledger.credit(Worklist::Confirmed, output(1, 0, 300)).unwrap();
        ledger.credit(Worklist::Confirmed, output(2, 0, 300)).unwrap();

        let (inputs, total) = ledger.take_funds(Amount::from_sat(500)).unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(total, Amount::from_sat(600));
        assert_eq!(ledger.len(Worklist::Unconfirmed), 1);
    }

    #[test]
    fn test_take_funds_falls_back_to_unconfirmed() {
        let mut ledger = UtxoLedger::new();
        ledger.credit(Worklist::Confirmed, output(1, 0, 300)).unwrap();
        ledger.credit(Worklist::Unconfirmed, output(2, 1, 300)).unwrap();

        let (inputs, total) = ledger.take_funds(Amount::from_sat(500)).unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[1].txid(), txid(2));
        assert_eq!(total, Amount::from_sat(600));
        assert_eq!(ledger.live_count(), 0);
    }

    #[test]
    fn test_take_funds_requires_strict_excess() {
        let mut ledger = UtxoLedger::new();
        ledger.credit(Worklist::Confirmed, output(1, 0, 500)).unwrap();

        match ledger.take_funds(Amount::from_sat(500)) {
            Err(HarnessError::InsufficientFunds { need, have }) => {
                assert_eq!(need, Amount::from_sat(500));
                assert_eq!(have, Amount::from_sat(500));
            }
            other => panic!("expected insufficient funds, got {:?}", other),
        }
    }

    #[test]
    fn test_reconcile_moves_only_mined_outputs() {
        let mut ledger = UtxoLedger::new();
        ledger.credit(Worklist::Unconfirmed, output(1, 0, 10)).unwrap();
        ledger.credit(Worklist::Unconfirmed, output(2, 0, 20)).unwrap();
        ledger.credit(Worklist::Unconfirmed, output(1, 1, 30)).unwrap();

        let mined: HashSet<Txid> = [txid(1)].into_iter().collect();
        assert_eq!(ledger.reconcile(&mined), 2);

        let confirmed: Vec<u64> = ledger
            .iter(Worklist::Confirmed)
            .map(|o| o.amount.to_sat())
            .collect();
        assert_eq!(confirmed, vec![10, 30]);
        assert_eq!(ledger.len(Worklist::Unconfirmed), 1);
        assert!(!in_both(&ledger));
    }

    #[test]
    fn test_live_count_matches_created_minus_consumed() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut ledger = UtxoLedger::new();
        let mut created = 0usize;
        let mut consumed = 0usize;

        for n in 0..40u8 {
            let worklist = if rng.gen_bool(0.5) {
                Worklist::Confirmed
            } else {
                Worklist::Unconfirmed
            };
            ledger.credit(worklist, output(n, 0, 100)).unwrap();
            created += 1;
            if n % 3 == 0 && ledger.take_next(Worklist::Confirmed).is_ok() {
                consumed += 1;
            }
            if n % 5 == 0 {
                let mined: HashSet<Txid> = [txid(n)].into_iter().collect();
                ledger.reconcile(&mined);
            }
            ledger.shuffle_confirmed(&mut rng);
            assert!(!in_both(&ledger));
            assert_eq!(ledger.live_count(), created - consumed);
            assert_eq!(
                ledger.len(Worklist::Confirmed) + ledger.len(Worklist::Unconfirmed),
                created - consumed
            );
        }
    }
}
