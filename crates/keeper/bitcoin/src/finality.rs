//! Confirmation counting and deposit finality.

/// Confirmations of deposits from known safes and trusted domain addresses.
pub const CONFIRMATIONS_OVERRIDE: u64 = 1_000_000;

/// Confirmations a coinbase output needs before it is spendable.
pub const COINBASE_CONFIRMATIONS: u64 = 100;

/// Confirmations an ordinary output needs before it is credited.
pub const TRANSACTION_CONFIRMATIONS: u64 = 1;

/// Counts the confirmations of an output mined at `height` with the chain head at `head`.
///
/// Unconfirmed outputs and a head behind the output both count zero.
pub fn confirmations(head: u64, height: Option<u64>) -> u64 {
    match height {
        Some(height) if height > 0 && head >= height => head - height + 1,
        _ => 0,
    }
}

/// Returns whether an output with `confirmations` is final.
pub fn is_final(confirmations: u64, coinbase: bool) -> bool {
    let threshold = if coinbase { COINBASE_CONFIRMATIONS } else { TRANSACTION_CONFIRMATIONS };
    confirmations >= threshold
}
