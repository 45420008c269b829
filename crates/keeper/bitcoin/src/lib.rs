//! Bitcoin functions of the safe keeper.
//!
//! Everything in this crate is a pure function of its inputs so that every keeper derives the
//! same scripts, addresses, transactions and digests from the same requests.

pub mod account;
pub mod error;
pub mod finality;
pub mod signature;
pub mod transaction;

pub use error::{BitcoinError, Result};

/// Outputs below this value in satoshi are never created or accepted.
pub const DUST_SATOSHI: u64 = 1000;

/// The fee rate floor in satoshi per virtual byte.
pub const MIN_FEE_RATE: u64 = 10;

/// Sequence of inputs spent without a relative timelock.
pub const MAX_SEQUENCE: u32 = 0xffff_ffff;
