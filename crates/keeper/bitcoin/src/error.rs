use std::borrow::Cow;

use bitcoin::{address, psbt, secp256k1, sighash};

pub type Result<T, E = BitcoinError> = core::result::Result<T, E>;

/// Errors of the bitcoin functions.
#[derive(Debug, thiserror::Error)]
pub enum BitcoinError {
    /// A public key is not a compressed secp256k1 key.
    #[error("public key error: {0}")]
    PublicKey(Cow<'static, str>),

    /// An address does not parse or belongs to another network.
    #[error("address error: {0}")]
    Address(#[from] address::ParseError),

    /// The inputs do not cover the outputs.
    #[error("insufficient inputs error: {0}")]
    InsufficientInputs(Cow<'static, str>),

    /// The fee of a transaction exceeds the satoshi range.
    #[error("fee overflow error: {inputs} inputs at {fee_rate} sat/vB")]
    FeeOverflow {
        /// Number of inputs priced.
        inputs: usize,
        /// Fee rate after the floor, in sat/vB.
        fee_rate: u64,
    },

    /// A partially signed transaction does not decode or is inconsistent.
    #[error("psbt error: {0}")]
    Psbt(#[from] psbt::Error),

    /// A signature digest cannot be computed.
    #[error("sighash error: {0}")]
    Sighash(Cow<'static, str>),

    /// A signature does not parse.
    #[error("signature error: {0}")]
    Signature(#[from] secp256k1::Error),

    /// A catch-all error.
    #[error("other error: {0}")]
    Other(Cow<'static, str>),
}

impl BitcoinError {
    /// Creates an `Other` error from any type that can be converted to a string.
    pub fn other<E>(err: E) -> Self
    where
        Cow<'static, str>: From<E>,
    {
        Self::Other(err.into())
    }
}

impl From<sighash::P2wpkhError> for BitcoinError {
    fn from(err: sighash::P2wpkhError) -> Self {
        Self::Sighash(err.to_string().into())
    }
}

impl From<bitcoin::transaction::InputsIndexError> for BitcoinError {
    fn from(err: bitcoin::transaction::InputsIndexError) -> Self {
        Self::Sighash(err.to_string().into())
    }
}
