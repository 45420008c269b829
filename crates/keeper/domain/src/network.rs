//! Network status and account plans reported by the observer.

use bon::Builder;
use chrono::{DateTime, Utc};
use dissolve_derive::Dissolve;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::request::Chain;

/// Fee rate and chain head at the time of a network status request.
#[derive(Debug, Clone, Builder, Dissolve)]
pub struct NetworkInfo {
    /// The network status request.
    request_id: Uuid,

    /// The chain.
    chain: Chain,

    /// Fee rate in satoshi per virtual byte.
    fee_rate: u64,

    /// Height of the chain head.
    height: u64,

    /// Hash of the chain head, hex encoded.
    hash: String,

    /// The timestamp of the network status request.
    created_at: DateTime<Utc>,
}

/// The price of a safe and the smallest deposit accepted on a chain.
#[derive(Debug, Clone, Builder, Dissolve)]
pub struct AccountPlan {
    /// The chain.
    chain: Chain,

    /// The asset a holder pays to open a safe.
    price_asset: Uuid,

    /// The amount of `price_asset` a holder pays to open a safe.
    price_amount: Decimal,

    /// The smallest deposit accepted unless it is change.
    transaction_minimum: Decimal,

    /// The request that set the plan.
    request_id: Uuid,

    /// The timestamp of the request that set the plan.
    created_at: DateTime<Utc>,
}

impl NetworkInfo {
    /// Returns the network status request id.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Returns the chain.
    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Returns the fee rate in satoshi per virtual byte.
    pub fn fee_rate(&self) -> u64 {
        self.fee_rate
    }

    /// Returns the chain head height.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Returns the chain head hash.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Returns the report timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl AccountPlan {
    /// Returns the chain.
    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Returns the asset paid to open a safe.
    pub fn price_asset(&self) -> Uuid {
        self.price_asset
    }

    /// Returns the amount paid to open a safe.
    pub fn price_amount(&self) -> Decimal {
        self.price_amount
    }

    /// Returns the smallest accepted deposit.
    pub fn transaction_minimum(&self) -> Decimal {
        self.transaction_minimum
    }

    /// Returns the request id that set the plan.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Returns the timestamp the plan was set at.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
