//! Script outputs owned by safes.

use bon::Builder;
use chrono::{DateTime, Utc};
use dissolve_derive::Dissolve;
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::request::Chain;

/// Largest output index a deposit can reference, the range of a database integer.
pub const MAX_OUTPUT_INDEX: u32 = i32::MAX as u32;

/// Which script of a safe owns an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum UtxoKind {
    /// The multisig witness script of the safe.
    Main,
    /// The single key witness script of the accountant.
    Fee,
}

/// The spending state of an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum UtxoState {
    /// Not referenced by any live transaction.
    Unspent,
    /// Referenced by a proposed transaction.
    Pending,
    /// Spent by a finalized transaction.
    Spent,
}

/// A bitcoin output deposited into a safe or its accountant.
///
/// Keyed by `(transaction_hash, index)`.
#[derive(Debug, Clone, Builder, Dissolve)]
pub struct BitcoinOutput {
    /// The hash of the transaction holding the output, in display order.
    transaction_hash: String,

    /// The output index.
    index: u32,

    /// The address the output pays to.
    address: String,

    /// The value in satoshi.
    satoshi: u64,

    /// The witness script for main outputs, the script pubkey for fee outputs.
    script: Vec<u8>,

    /// The input sequence required to spend the output.
    sequence: u32,

    /// The owning script.
    kind: UtxoKind,

    /// The spending state.
    #[builder(default = UtxoState::Unspent)]
    state: UtxoState,

    /// The holder of the owning safe.
    holder: String,

    /// The chain.
    chain: Chain,

    /// The transaction referencing the output, if any.
    spent_by: Option<String>,

    /// The deposit request.
    request_id: Uuid,

    /// The timestamp of the deposit request.
    created_at: DateTime<Utc>,
}

impl BitcoinOutput {
    /// Returns the transaction hash.
    pub fn transaction_hash(&self) -> &str {
        &self.transaction_hash
    }

    /// Returns the output index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Returns the address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the value in satoshi.
    pub fn satoshi(&self) -> u64 {
        self.satoshi
    }

    /// Returns the spending script.
    pub fn script(&self) -> &[u8] {
        &self.script
    }

    /// Returns the required input sequence.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Returns the owning script kind.
    pub fn kind(&self) -> UtxoKind {
        self.kind
    }

    /// Returns the spending state.
    pub fn state(&self) -> UtxoState {
        self.state
    }

    /// Returns the holder.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Returns the chain.
    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Returns the referencing transaction hash.
    pub fn spent_by(&self) -> Option<&str> {
        self.spent_by.as_deref()
    }

    /// Returns the deposit request id.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Returns the deposit timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
