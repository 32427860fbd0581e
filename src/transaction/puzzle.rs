//! Puzzle scripts
//!
//! Every output the harness creates pays a P2SH of one of two trivial redeem
//! scripts. The variant is fixed by the output's own index, so any puzzle
//! output can be spent later from its outpoint alone.

use bitcoin::opcodes::all::{OP_DROP, OP_PUSHNUM_1, OP_PUSHNUM_2};
use bitcoin::script::Builder;
use bitcoin::{Address, Network, ScriptBuf};

use crate::{HarnessError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PuzzleVariant {
    /// `OP_1 OP_DROP`, paid to by output 0
    A,
    /// `OP_2 OP_DROP`, paid to by output 1
    B,
}

impl PuzzleVariant {
    /// Variant carried by the output at `vout`. Harness transactions only
    /// create outputs 0 and 1; anything else is treated as a change slot.
    pub fn for_vout(vout: u32) -> Self {
        if vout == 0 {
            PuzzleVariant::A
        } else {
            PuzzleVariant::B
        }
    }

    pub fn redeem_script(&self) -> ScriptBuf {
        let selector = match self {
            PuzzleVariant::A => OP_PUSHNUM_1,
            PuzzleVariant::B => OP_PUSHNUM_2,
        };
        Builder::new()
            .push_opcode(selector)
            .push_opcode(OP_DROP)
            .into_script()
    }

    /// `OP_1 <redeem script>`: leaves true on the stack once the redeem
    /// script drops its own selector.
    pub fn unlocking_script(&self) -> ScriptBuf {
        let redeem = self.redeem_script();
        let mut bytes = Vec::with_capacity(2 + redeem.len());
        bytes.push(OP_PUSHNUM_1.to_u8());
        bytes.push(redeem.len() as u8);
        bytes.extend_from_slice(redeem.as_bytes());
        ScriptBuf::from_bytes(bytes)
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2sh(&self.redeem_script().script_hash())
    }

    pub fn address(&self, network: Network) -> Result<Address> {
        Address::p2sh(&self.redeem_script(), network)
            .map_err(|e| HarnessError::Config(format!("puzzle address: {}", e)))
    }

    /// Recover the variant paid to by a script pubkey, if it is a puzzle
    pub fn from_script_pubkey(script: &ScriptBuf) -> Option<Self> {
        [PuzzleVariant::A, PuzzleVariant::B]
            .into_iter()
            .find(|variant| &variant.script_pubkey() == script)
    }
}
