use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use safe_keeper_domain::request::{Action, Chain, Curve, Request, Role};
use uuid::Uuid;

/// The instant test feeds start at.
pub fn genesis() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 4, 1, 0, 0, 0).single().expect("valid genesis")
}

/// `genesis() + seconds`.
pub fn at(seconds: i64) -> DateTime<Utc> {
    genesis() + Duration::seconds(seconds)
}

/// Builds a pending request sent by the role `action` requires, without attached amount.
pub fn make_request(
    id: u128,
    action: Action,
    holder: &str,
    extra: Vec<u8>,
    created_at: DateTime<Utc>,
) -> Request {
    make_paid_request(id, action, holder, extra, Uuid::nil(), Decimal::ZERO, created_at)
}

/// Builds a pending request sent by the role `action` requires, carrying `amount` of `asset_id`.
pub fn make_paid_request(
    id: u128,
    action: Action,
    holder: &str,
    extra: Vec<u8>,
    asset_id: Uuid,
    amount: Decimal,
    created_at: DateTime<Utc>,
) -> Request {
    Request::builder()
        .id(Uuid::from_u128(id))
        .action(action)
        .role(action.sender_role())
        .curve(Curve::Secp256k1EcdsaBitcoin)
        .holder(holder.to_string())
        .asset_id(asset_id)
        .amount(amount)
        .extra(extra)
        .created_at(created_at)
        .build()
}

pub fn add_key_extra(role: Role) -> Vec<u8> {
    vec![role as u8]
}

pub fn network_status_extra(fee_rate: u64, height: u64, hash: &str) -> Vec<u8> {
    let mut bz = vec![Chain::Bitcoin as u8];
    bz.extend_from_slice(&fee_rate.to_be_bytes());
    bz.extend_from_slice(&height.to_be_bytes());
    bz.extend_from_slice(&hex::decode(hash).expect("block hash must be hex"));
    bz
}

pub fn account_plan_extra(price_asset: Uuid, price_units: u64, minimum_units: u64) -> Vec<u8> {
    let mut bz = vec![Chain::Bitcoin as u8];
    bz.extend_from_slice(price_asset.as_bytes());
    bz.extend_from_slice(&price_units.to_be_bytes());
    bz.extend_from_slice(&minimum_units.to_be_bytes());
    bz
}
