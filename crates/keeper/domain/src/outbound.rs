//! Outbound messages emitted in response to requests.
//!
//! Every outward effect of a request is queued as an [`OutboundMessage`] in the same database
//! transaction as the state change that caused it. The ordering layer picks the queue up in
//! sequence order; encrypting and delivering the payloads is its concern.

use bon::Builder;
use chrono::{DateTime, Utc};
use dissolve_derive::Dissolve;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, FromRepr, IntoStaticStr};
use uuid::Uuid;

use crate::{
    extra::ExtraError,
    request::{Curve, Role},
};

/// What an outbound message asks of its receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum OutboundKind {
    /// Generate a new signer key, payload is an [`Operation`].
    KeygenRequest,
    /// Sign a digest, payload is an [`Operation`].
    SignatureRequest,
    /// Observer facing update, payload is an [`Operation`].
    ObserverNotification,
    /// Bond payout, payload is a JSON [`Transfer`].
    Transfer,
}

/// A queued outward effect.
#[derive(Debug, Clone, Builder, Dissolve)]
pub struct OutboundMessage {
    /// Deterministic id, a second emission with the same id is ignored.
    id: Uuid,

    /// The request that caused the message.
    request_id: Uuid,

    /// The role the message is addressed to.
    receiver: Role,

    /// What the message asks for.
    kind: OutboundKind,

    /// The plaintext payload.
    payload: Vec<u8>,

    /// Queue position, assigned on insert.
    #[builder(default)]
    seq: i64,

    /// The timestamp of the causing request.
    created_at: DateTime<Utc>,
}

impl OutboundMessage {
    /// Returns the message id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the causing request id.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Returns the receiver role.
    pub fn receiver(&self) -> Role {
        self.receiver
    }

    /// Returns the message kind.
    pub fn kind(&self) -> OutboundKind {
        self.kind
    }

    /// Returns the payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the queue position.
    pub fn seq(&self) -> i64 {
        self.seq
    }

    /// Returns the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// The operation type of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
#[repr(u8)]
pub enum OperationKind {
    /// Signer quorum: generate a key.
    KeygenInput = 1,
    /// Signer quorum: sign the digest in `extra` with the key in `public`.
    SignInput = 2,
    /// Observer: a safe was proposed, `extra` is a [`SafeProposal`].
    SafeProposed = 110,
    /// Observer: a safe was approved, `extra` is the safe address.
    SafeApproved = 111,
    /// Observer: a withdrawal was proposed, `extra` is the PSBT.
    TransactionProposed = 112,
    /// Observer: every signer signature was collected, `extra` is the signed PSBT.
    TransactionSigned = 114,
}

/// A binary operation addressed to the signer quorum or the observer.
///
/// Layout: `id(16) || kind(1) || curve(1) || public_len(1) || public || extra_len(4) || extra`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// The operation id, also the id of the outbound message carrying it.
    pub id: Uuid,
    /// The operation type.
    pub kind: OperationKind,
    /// The curve of `public`.
    pub curve: Curve,
    /// The public key the operation is about, empty for key generation.
    pub public: Vec<u8>,
    /// The operation payload.
    pub extra: Vec<u8>,
}

impl Operation {
    /// Encodes the operation.
    pub fn encode(&self) -> Vec<u8> {
        let mut bz = Vec::with_capacity(16 + 3 + self.public.len() + 4 + self.extra.len());
        bz.extend_from_slice(self.id.as_bytes());
        bz.push(self.kind as u8);
        bz.push(self.curve as u8);
        bz.push(self.public.len() as u8);
        bz.extend_from_slice(&self.public);
        bz.extend_from_slice(&(self.extra.len() as u32).to_be_bytes());
        bz.extend_from_slice(&self.extra);
        bz
    }

    /// Decodes an operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is truncated, has trailing bytes, or carries unknown tags.
    pub fn decode(bz: &[u8]) -> Result<Self, ExtraError> {
        let (id, bz) = split(bz, 16)?;
        let id = Uuid::from_slice(id).map_err(|_| ExtraError::Invalid("operation id"))?;

        let (tags, bz) = split(bz, 3)?;
        let kind = OperationKind::from_repr(tags[0]).ok_or(ExtraError::Invalid("operation kind"))?;
        let curve = Curve::from_repr(tags[1]).ok_or(ExtraError::Invalid("operation curve"))?;
        let (public, bz) = split(bz, usize::from(tags[2]))?;

        let (len, bz) = split(bz, 4)?;
        let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
        let (extra, bz) = split(bz, len)?;

        if !bz.is_empty() {
            return Err(ExtraError::Trailing(bz.len()));
        }

        Ok(Self { id, kind, curve, public: public.to_vec(), extra: extra.to_vec() })
    }
}

fn split(bz: &[u8], n: usize) -> Result<(&[u8], &[u8]), ExtraError> {
    if bz.len() < n {
        return Err(ExtraError::Truncated { needed: n - bz.len() });
    }
    Ok(bz.split_at(n))
}

/// The observer facing description of a proposed safe.
///
/// Layout: `sequence(4) || address_len(2) || address || script_len(2) || script || accountant`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeProposal {
    /// The multisig address.
    pub address: String,
    /// The multisig witness script.
    pub script: Vec<u8>,
    /// The relative timelock sequence of the recovery path.
    pub sequence: u32,
    /// The accountant fee paying address.
    pub accountant_address: String,
}

impl SafeProposal {
    /// Encodes the proposal.
    pub fn encode(&self) -> Vec<u8> {
        let mut bz = self.sequence.to_be_bytes().to_vec();
        for field in [self.address.as_bytes(), &self.script] {
            bz.extend_from_slice(&(field.len() as u16).to_be_bytes());
            bz.extend_from_slice(field);
        }
        bz.extend_from_slice(self.accountant_address.as_bytes());
        bz
    }
}

/// A bond payout to the receivers of a safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// The bond asset, derived from the deposit asset and the holder.
    pub asset_id: Uuid,
    /// The bond receivers.
    pub receivers: Vec<Uuid>,
    /// How many receivers must sign to move the bond.
    pub threshold: u8,
    /// The payout amount in whole coins.
    pub amount: Decimal,
    /// Deterministic trace id derived from the deposit request.
    pub trace_id: Uuid,
}
