//! Request types for keeper engine operations.

mod error;

pub use self::error::SubmitRequestError;

use bon::Builder;
use chrono::{DateTime, Utc};
use dissolve_derive::Dissolve;
use rust_decimal::Decimal;
use safe_keeper_domain::request::{Action, Chain, Curve, Request, Role};
use uuid::Uuid;

/// A request envelope delivered by the ordering layer, checked before it enters the feed.
#[derive(Debug, Dissolve)]
pub struct SubmitRequest {
    request: Request,
}

/// Look up the safe of a holder.
#[derive(Debug, Builder, Dissolve)]
pub struct GetSafeRequest {
    holder: String,
}

/// Look up a withdrawal and its signature requests.
#[derive(Debug, Builder, Dissolve)]
pub struct GetTransactionRequest {
    transaction_hash: String,
}

/// Read the accountant fee balance of a holder.
#[derive(Debug, Builder, Dissolve)]
pub struct GetAccountantBalanceRequest {
    holder: String,
}

/// Page through the outbound queue.
#[derive(Debug, Builder, Dissolve)]
pub struct ListOutboundRequest {
    /// Only messages with a larger sequence are returned.
    #[builder(default)]
    after_seq: i64,

    #[builder(default = 100)]
    limit: u32,
}

/// Compare the stored network status with the chain node.
#[derive(Debug, Builder, Dissolve)]
pub struct GetNetworkStatusRequest {
    #[builder(default = Chain::Bitcoin)]
    chain: Chain,
}

#[bon::bon]
impl SubmitRequest {
    /// Decodes the wire tags of an envelope and checks its sender and format.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown tags, a sender role the action does not allow, or a
    /// malformed holder key, amount or timestamp.
    #[builder]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        action: u8,
        role: u8,
        curve: u8,
        holder: String,
        asset_id: Uuid,
        amount: Decimal,
        extra: Vec<u8>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, SubmitRequestError> {
        let action = Action::from_repr(action).ok_or(SubmitRequestError::UnknownAction(action))?;
        let role = Role::from_repr(role).ok_or(SubmitRequestError::UnknownRole(role))?;
        let curve = Curve::from_repr(curve).ok_or(SubmitRequestError::UnknownCurve(curve))?;

        let request = Request::builder()
            .id(id)
            .action(action)
            .role(role)
            .curve(curve)
            .holder(holder)
            .asset_id(asset_id)
            .amount(amount)
            .extra(extra)
            .created_at(created_at)
            .build();

        if !request.is_authorized() {
            return Err(SubmitRequestError::Unauthorized { action, role });
        }
        request.verify_format()?;

        Ok(Self { request })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const HOLDER: &str = "023cd0e5c08c30ae0e059ca1e27d894e609860ff6e0846637282899921b4f9b0f8";

    fn submit(action: u8, role: u8) -> Result<SubmitRequest, SubmitRequestError> {
        SubmitRequest::builder()
            .id(Uuid::from_u128(1))
            .action(action)
            .role(role)
            .curve(1)
            .holder(HOLDER.to_string())
            .asset_id(Chain::Bitcoin.asset_id())
            .amount(Decimal::ZERO)
            .extra(vec![])
            .created_at(Utc.with_ymd_and_hms(2023, 4, 1, 0, 0, 0).unwrap())
            .build()
    }

    #[test]
    fn envelopes_are_checked_before_they_enter_the_feed() {
        assert!(submit(Action::SafeProposeAccount as u8, Role::Holder as u8).is_ok());

        assert!(matches!(
            submit(12, Role::Signer as u8),
            Err(SubmitRequestError::UnknownAction(12))
        ));
        assert!(matches!(
            submit(Action::SafeRevokeTransaction as u8, Role::Holder as u8),
            Err(SubmitRequestError::Unauthorized { role: Role::Holder, .. })
        ));
        assert!(matches!(
            submit(Action::ObserverAddKey as u8, 9),
            Err(SubmitRequestError::UnknownRole(9))
        ));
    }
}
