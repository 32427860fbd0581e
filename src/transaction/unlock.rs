//! Unlocking script installation
//!
//! The node builds unsigned transactions with empty scriptSigs. Puzzle
//! inputs need no signature, only the fixed `OP_1 <redeem script>` unlock,
//! so the harness installs it into the raw bytes itself.

use bitcoin::consensus::{deserialize, serialize};
use bitcoin::Transaction;

use super::puzzle::PuzzleVariant;
use crate::{HarnessError, Result};

/// Installs one puzzle unlocking script per input of a raw transaction.
/// `spent[i]` is the variant of the output spent by input `i`.
pub trait UnlockingScriptInstaller: Send + Sync {
    fn install(&self, raw_tx: &[u8], spent: &[PuzzleVariant]) -> Result<Vec<u8>>;
}

/// Patches scriptSigs at fixed offsets of the legacy (non-witness) layout.
///
/// Layout assumed for an unsigned transaction with fewer than 0xfd inputs:
///
/// ```text
/// [0, 4)              version
/// [4, 5)              input count
/// per input i, base = 5 + 41*i:
///   [base, base+36)   previous txid and vout   (hex offsets [10+82i, 82+82i))
///   [base+36]         scriptSig length, 0x00
///   [base+37, base+41) sequence
/// [5 + 41*n, ..)      outputs and lock time
/// ```
///
/// Only this type knows these offsets; a layout change is fixed here.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyLayoutPatcher;

const VERSION_LEN: usize = 4;
const HEADER_LEN: usize = VERSION_LEN + 1;
const OUTPOINT_LEN: usize = 36;
const SEQUENCE_LEN: usize = 4;
const UNSIGNED_INPUT_LEN: usize = OUTPOINT_LEN + 1 + SEQUENCE_LEN;

impl UnlockingScriptInstaller for LegacyLayoutPatcher {
    fn install(&self, raw_tx: &[u8], spent: &[PuzzleVariant]) -> Result<Vec<u8>> {
        let inputs = spent.len();
        if inputs == 0 || inputs >= 0xfd {
            return Err(HarnessError::UnsupportedEncoding(format!(
                "cannot patch {} inputs with a one-byte count",
                inputs
            )));
        }
        let inputs_end = HEADER_LEN + UNSIGNED_INPUT_LEN * inputs;
        if raw_tx.len() < inputs_end {
            return Err(HarnessError::UnsupportedEncoding(format!(
                "raw transaction of {} bytes is too short for {} inputs",
                raw_tx.len(),
                inputs
            )));
        }
        if raw_tx[VERSION_LEN] as usize != inputs {
            return Err(HarnessError::UnsupportedEncoding(format!(
                "input count byte {:#04x} does not match {} inputs",
                raw_tx[VERSION_LEN], inputs
            )));
        }

        let mut patched = Vec::with_capacity(raw_tx.len() + 4 * inputs);
        patched.extend_from_slice(&raw_tx[..HEADER_LEN]);
        for (i, variant) in spent.iter().enumerate() {
            let base = HEADER_LEN + UNSIGNED_INPUT_LEN * i;
            let script_len_at = base + OUTPOINT_LEN;
            if raw_tx[script_len_at] != 0 {
                return Err(HarnessError::UnsupportedEncoding(format!(
                    "input {} already carries a scriptSig",
                    i
                )));
            }
            let unlock = variant.unlocking_script();
            patched.extend_from_slice(&raw_tx[base..script_len_at]);
            patched.push(unlock.len() as u8);
            patched.extend_from_slice(unlock.as_bytes());
            patched.extend_from_slice(&raw_tx[script_len_at + 1..base + UNSIGNED_INPUT_LEN]);
        }
        patched.extend_from_slice(&raw_tx[inputs_end..]);
        Ok(patched)
    }
}

/// Decodes the transaction and sets each `script_sig` directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsensusInstaller;

impl UnlockingScriptInstaller for ConsensusInstaller {
    fn install(&self, raw_tx: &[u8], spent: &[PuzzleVariant]) -> Result<Vec<u8>> {
        let mut tx: Transaction = deserialize(raw_tx)?;
        if tx.input.len() != spent.len() {
            return Err(HarnessError::UnsupportedEncoding(format!(
                "transaction has {} inputs, {} unlocking scripts given",
                tx.input.len(),
                spent.len()
            )));
        }
        for (input, variant) in tx.input.iter_mut().zip(spent) {
            input.script_sig = variant.unlocking_script();
        }
        Ok(serialize(&tx))
    }
}
