//! Withdrawal transactions and their lifecycle.

use bon::Builder;
use dissolve_derive::Dissolve;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::{Timestamps, request::Chain};

/// The lifecycle state of a withdrawal transaction.
///
/// `Initial -> Pending -> Done` on signatures, `Initial -> Failed` on revocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TransactionState {
    /// Proposed, no signature collected yet.
    Initial,
    /// Some signatures collected.
    Pending,
    /// Every signer signature collected.
    Done,
    /// Revoked by the holder.
    Failed,
}

/// A declared payment of a withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// The amount in whole coins.
    pub amount: Decimal,
    /// The receiver address.
    pub receiver: String,
}

/// A withdrawal proposed by a holder.
///
/// # Type Parameters
///
/// * `AUX` - Auxiliary data type, defaults to [`Timestamps`] for tracking metadata.
#[derive(Debug, Clone, Builder, Dissolve)]
pub struct Transaction<AUX = Timestamps> {
    /// The transaction id, in display order.
    transaction_hash: String,

    /// The serialized partially signed transaction.
    raw_transaction: Vec<u8>,

    /// The holder of the spending safe.
    holder: String,

    /// The chain.
    chain: Chain,

    /// The lifecycle state.
    #[builder(default = TransactionState::Initial)]
    state: TransactionState,

    /// The declared payments, in output order.
    data: Vec<Recipient>,

    /// The network fee in whole coins, debited from the accountant.
    fee: Decimal,

    /// The proposal request.
    request_id: Uuid,

    /// Auxiliary metadata associated with this transaction.
    aux: AUX,
}

impl<AUX1> Transaction<AUX1> {
    /// Replaces the auxiliary data, returning the transaction and the previous data.
    pub fn with_aux<AUX2>(self, aux: AUX2) -> (Transaction<AUX2>, AUX1) {
        let transaction = Transaction {
            transaction_hash: self.transaction_hash,
            raw_transaction: self.raw_transaction,
            holder: self.holder,
            chain: self.chain,
            state: self.state,
            data: self.data,
            fee: self.fee,
            request_id: self.request_id,
            aux,
        };

        (transaction, self.aux)
    }
}

impl<AUX> Transaction<AUX> {
    /// Returns the transaction id.
    pub fn transaction_hash(&self) -> &str {
        &self.transaction_hash
    }

    /// Returns the serialized partially signed transaction.
    pub fn raw_transaction(&self) -> &[u8] {
        &self.raw_transaction
    }

    /// Returns the holder.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Returns the chain.
    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns the declared payments.
    pub fn data(&self) -> &[Recipient] {
        &self.data
    }

    /// Returns the network fee.
    pub fn fee(&self) -> Decimal {
        self.fee
    }

    /// Returns the proposal request id.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Returns a reference to the auxiliary metadata.
    pub fn aux(&self) -> &AUX {
        &self.aux
    }
}

/// Encodes declared payments into their stored JSON form.
pub fn encode_recipients(recipients: &[Recipient]) -> Result<String, serde_json::Error> {
    serde_json::to_string(recipients)
}

/// Decodes declared payments from their stored JSON form.
pub fn decode_recipients(data: &str) -> Result<Vec<Recipient>, serde_json::Error> {
    serde_json::from_str(data)
}
