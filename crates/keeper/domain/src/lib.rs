//! Domain types for the safe keeper.
//!
//! This crate provides the data model replayed by every keeper: the requests delivered by the
//! ordering layer, the safes they create, the outputs and transactions those safes own, and the
//! outbound messages the keeper emits in response. It also contains the byte codecs for the
//! action specific `extra` payloads carried by requests.

pub mod extra;
pub mod key;
pub mod network;
pub mod outbound;
pub mod request;
pub mod safe;
pub mod signature;
pub mod tx;
pub mod utxo;

use bon::Builder;
use chrono::{DateTime, Utc};
use dissolve_derive::Dissolve;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use uuid::Uuid;

/// Number of decimal places of the smallest bitcoin unit.
pub const VALUE_PRECISION: u32 = 8;

const KEEPER_NAMESPACE: Uuid = Uuid::from_u128(0x5afe_6b33_9e4c_4f0e_a1d2_7c3b_0b1e_5a11);

const BOND_NAMESPACE: Uuid = Uuid::from_u128(0x5afe_b04d_2c6f_4d7a_9e38_41f0_6a2d_c0de);

/// Timestamp metadata for tracking entity creation and modification times.
///
/// Both values are taken from the `created_at` of the requests that created and last touched
/// the entity, never from the wall clock.
#[derive(Debug, Clone, Builder, Dissolve)]
pub struct Timestamps {
    /// The timestamp when the entity was created.
    created_at: DateTime<Utc>,
    /// The timestamp when the entity was last updated.
    updated_at: DateTime<Utc>,
}

impl Timestamps {
    /// Returns the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the last update timestamp.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Derives a deterministic identifier from two labels.
///
/// Every keeper derives the same id for the same inputs, so outbound messages and signature
/// requests emitted twice collapse into one.
pub fn unique_id(a: &str, b: &str) -> Uuid {
    Uuid::new_v5(&KEEPER_NAMESPACE, format!("{a}:{b}").as_bytes())
}

/// Derives the bond asset paid out to the receivers of `holder` for deposits of `asset_id`.
pub fn bond_asset_id(asset_id: Uuid, holder: &str) -> Uuid {
    Uuid::new_v5(&BOND_NAMESPACE, format!("{asset_id}:{holder}").as_bytes())
}

/// Converts an integer amount of `precision` decimal units into a normalized decimal.
pub fn decimal_from_units(units: u64, precision: u32) -> Decimal {
    Decimal::from_i128_with_scale(i128::from(units), precision).normalize()
}

/// Converts a decimal into integer units of `precision` decimal places.
///
/// Returns `None` for negative values, values with more than `precision` fractional digits, or
/// values that do not fit a `u64`.
pub fn decimal_to_units(value: Decimal, precision: u32) -> Option<u64> {
    if value.is_sign_negative() && !value.is_zero() {
        return None;
    }

    let scaled = value.checked_mul(Decimal::from(10u64.checked_pow(precision)?))?;
    if !scaled.fract().is_zero() {
        return None;
    }

    scaled.to_u64()
}

#[cfg(test)]
mod tests {
    use core::str::FromStr;

    use super::*;

    #[test]
    fn units_convert_to_normalized_decimals() {
        assert_eq!(decimal_from_units(4220, VALUE_PRECISION).to_string(), "0.0000422");
        assert_eq!(decimal_from_units(100_000_000, VALUE_PRECISION).to_string(), "1");
        assert_eq!(decimal_from_units(10_000, VALUE_PRECISION).to_string(), "0.0001");
        assert_eq!(decimal_from_units(0, VALUE_PRECISION).to_string(), "0");
    }

    #[test]
    fn decimals_convert_to_units() {
        let amount = Decimal::from_str("0.000123").unwrap();
        assert_eq!(decimal_to_units(amount, VALUE_PRECISION), Some(12300));

        let amount = Decimal::from_str("0.000000001").unwrap();
        assert_eq!(decimal_to_units(amount, VALUE_PRECISION), None);

        let amount = Decimal::from_str("-1").unwrap();
        assert_eq!(decimal_to_units(amount, VALUE_PRECISION), None);
    }

    #[test]
    fn unique_ids_are_deterministic() {
        let a = unique_id("27c2c4276045678fa1f35d5506d4573d99cf1dcfe8552dae05bcb829006757c9", "0");
        let b = unique_id("27c2c4276045678fa1f35d5506d4573d99cf1dcfe8552dae05bcb829006757c9", "0");
        let c = unique_id("27c2c4276045678fa1f35d5506d4573d99cf1dcfe8552dae05bcb829006757c9", "1");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
