//! Signature requests sent to the signer quorum.

use bon::Builder;
use chrono::{DateTime, Utc};
use dissolve_derive::Dissolve;
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::unique_id;

/// The state of a signature request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SignatureState {
    /// Waiting for the signer quorum.
    Pending,
    /// Fulfilled, or closed by a revocation.
    Done,
}

/// A request for the signer quorum to sign one input of a withdrawal.
#[derive(Debug, Clone, Builder, Dissolve)]
pub struct SignatureRequest {
    /// Derived from the transaction hash and the input index, see [`signature_request_id`].
    id: Uuid,

    /// The withdrawal transaction id.
    transaction_hash: String,

    /// The input to sign.
    input_index: u32,

    /// The signer public key expected to sign, hex encoded.
    signer: String,

    /// The sighash digest to sign.
    message: Vec<u8>,

    /// The DER encoded signature, once fulfilled.
    signature: Option<Vec<u8>>,

    /// The request state.
    #[builder(default = SignatureState::Pending)]
    state: SignatureState,

    /// The timestamp of the proposal request.
    created_at: DateTime<Utc>,
}

impl SignatureRequest {
    /// Returns the request id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the transaction id.
    pub fn transaction_hash(&self) -> &str {
        &self.transaction_hash
    }

    /// Returns the input index.
    pub fn input_index(&self) -> u32 {
        self.input_index
    }

    /// Returns the expected signer public key.
    pub fn signer(&self) -> &str {
        &self.signer
    }

    /// Returns the digest to sign.
    pub fn message(&self) -> &[u8] {
        &self.message
    }

    /// Returns the signature, once fulfilled.
    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    /// Returns the request state.
    pub fn state(&self) -> SignatureState {
        self.state
    }

    /// Returns the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Derives the id of the signature request for an input of a transaction.
pub fn signature_request_id(transaction_hash: &str, input_index: u32) -> Uuid {
    unique_id(transaction_hash, &input_index.to_string())
}
