//! Requests delivered by the ordering layer and their wire tags.

use bitcoin::secp256k1::PublicKey;
use bon::Builder;
use chrono::{DateTime, Utc};
use dissolve_derive::Dissolve;
use rust_decimal::Decimal;
use strum::{Display, EnumString, FromRepr, IntoStaticStr};
use uuid::Uuid;

/// The curve of the key that signed a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[repr(u8)]
pub enum Curve {
    /// ECDSA over secp256k1 with bitcoin encodings.
    Secp256k1EcdsaBitcoin = 1,
}

/// A chain a safe can live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[repr(u8)]
pub enum Chain {
    /// Bitcoin mainnet or one of its test networks, as configured.
    Bitcoin = 1,
}

/// The four key-holding roles of a safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[repr(u8)]
pub enum Role {
    /// The owner of the safe.
    Holder = 1,
    /// The threshold signer quorum.
    Signer = 2,
    /// The observer, co-signer on the timelocked recovery path.
    Observer = 3,
    /// The accountant, owner of the fee paying key.
    Accountant = 4,
}

/// The action a request asks the keeper to perform.
///
/// Each action has exactly one sender role, see [`Action::sender_role`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, FromRepr)]
#[repr(u8)]
#[strum(serialize_all = "snake_case")]
pub enum Action {
    /// A new key produced by the signer quorum.
    SignerKeygenOutput = 11,
    /// A signature produced by the signer quorum.
    SignerSignOutput = 13,
    /// A new observer or accountant key.
    ObserverAddKey = 100,
    /// Ask the signer quorum for a batch of new keys.
    ObserverRequestSignerKeys = 101,
    /// Fee rate and chain head reported by the observer.
    ObserverUpdateNetworkStatus = 102,
    /// A deposit into the main multisig output of a safe.
    ObserverHolderDeposit = 103,
    /// A deposit into the fee paying output of a safe.
    ObserverAccountantDeposit = 104,
    /// Account price and minimum transaction amount.
    ObserverSetAccountPlan = 105,
    /// A holder asks for a new safe.
    SafeProposeAccount = 110,
    /// The holder approval of a proposed safe, relayed by the observer.
    SafeApproveAccount = 111,
    /// A holder asks to withdraw from its safe.
    SafeProposeTransaction = 112,
    /// The holder revocation of a proposed withdrawal, relayed by the observer.
    SafeRevokeTransaction = 113,
}

/// The processing state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RequestState {
    /// Not processed yet.
    Pending,
    /// Processed, with or without effect.
    Done,
    /// Rejected without effect.
    Failed,
}

/// A request replayed by the keeper.
///
/// Immutable once written, except for its state.
#[derive(Debug, Clone, Builder, Dissolve)]
pub struct Request {
    /// Unique id assigned by the ordering layer.
    id: Uuid,

    /// What the request asks for.
    action: Action,

    /// The role of the sender.
    role: Role,

    /// The curve of `holder`.
    curve: Curve,

    /// Compressed public key of the sender or subject of the request, hex encoded.
    holder: String,

    /// The asset attached to the request.
    asset_id: Uuid,

    /// The amount of `asset_id` attached to the request.
    amount: Decimal,

    /// Action specific payload.
    extra: Vec<u8>,

    /// Processing state.
    #[builder(default = RequestState::Pending)]
    state: RequestState,

    /// The timestamp assigned by the ordering layer.
    created_at: DateTime<Utc>,
}

/// A request that cannot have come from a healthy ordering layer.
#[derive(Debug, thiserror::Error)]
pub enum RequestFormatError {
    /// The holder is not a compressed secp256k1 public key.
    #[error("invalid holder public key: {0}")]
    InvalidHolder(String),

    /// The amount is negative.
    #[error("negative amount: {0}")]
    NegativeAmount(Decimal),

    /// The timestamp predates the epoch.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(DateTime<Utc>),
}

impl Chain {
    /// Returns the id of the native asset of the chain.
    pub fn asset_id(self) -> Uuid {
        match self {
            Chain::Bitcoin => Uuid::from_u128(0xc6d0c728_2624_429b_8e0d_d9d19b6592fa),
        }
    }
}

impl Action {
    /// Returns the only role allowed to send this action.
    pub fn sender_role(self) -> Role {
        match self {
            Action::SignerKeygenOutput | Action::SignerSignOutput => Role::Signer,
            Action::SafeProposeAccount | Action::SafeProposeTransaction => Role::Holder,
            Action::ObserverAddKey
            | Action::ObserverRequestSignerKeys
            | Action::ObserverUpdateNetworkStatus
            | Action::ObserverHolderDeposit
            | Action::ObserverAccountantDeposit
            | Action::ObserverSetAccountPlan
            | Action::SafeApproveAccount
            | Action::SafeRevokeTransaction => Role::Observer,
        }
    }
}

impl Request {
    /// Returns the request id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the action.
    pub fn action(&self) -> Action {
        self.action
    }

    /// Returns the sender role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the curve.
    pub fn curve(&self) -> Curve {
        self.curve
    }

    /// Returns the hex encoded holder public key.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Returns the attached asset.
    pub fn asset_id(&self) -> Uuid {
        self.asset_id
    }

    /// Returns the attached amount.
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Returns the action specific payload.
    pub fn extra(&self) -> &[u8] {
        &self.extra
    }

    /// Returns the processing state.
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Returns the timestamp assigned by the ordering layer.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns whether the sender role is the one `action` requires.
    pub fn is_authorized(&self) -> bool {
        self.action.sender_role() == self.role
    }

    /// Checks the structural format of the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the holder is not a valid compressed public key, the amount is
    /// negative, or the timestamp predates the epoch.
    pub fn verify_format(&self) -> Result<(), RequestFormatError> {
        if self.created_at.timestamp() <= 0 {
            return Err(RequestFormatError::InvalidTimestamp(self.created_at));
        }

        if self.amount < Decimal::ZERO {
            return Err(RequestFormatError::NegativeAmount(self.amount));
        }

        parse_public_key(&self.holder)
            .map(drop)
            .ok_or_else(|| RequestFormatError::InvalidHolder(self.holder.clone()))
    }
}

/// Parses a hex encoded compressed secp256k1 public key.
pub fn parse_public_key(public_key: &str) -> Option<PublicKey> {
    let bz = hex::decode(public_key).ok()?;
    if bz.len() != 33 {
        return None;
    }
    PublicKey::from_slice(&bz).ok()
}
