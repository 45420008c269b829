//! Keys registered with the keeper.

use bon::Builder;
use chrono::{DateTime, Utc};
use dissolve_derive::Dissolve;
use uuid::Uuid;

use crate::request::{Curve, Role};

/// A public key registered for one of the four roles.
///
/// A key without `holder` is spare: it has not been assigned to a safe yet. Holder keys are never
/// stored, a holder is identified by its public key alone.
#[derive(Debug, Clone, Builder, Dissolve)]
pub struct Key {
    /// The hex encoded compressed public key.
    public_key: String,

    /// The curve of the key.
    curve: Curve,

    /// The role the key plays in a safe.
    role: Role,

    /// The request that registered the key.
    request_id: Uuid,

    /// The holder of the safe this key has been assigned to, if any.
    holder: Option<String>,

    /// The timestamp of the registering request.
    created_at: DateTime<Utc>,
}

impl Key {
    /// Returns the hex encoded public key.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Returns the curve.
    pub fn curve(&self) -> Curve {
        self.curve
    }

    /// Returns the role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the registering request id.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Returns the holder the key is assigned to.
    pub fn holder(&self) -> Option<&str> {
        self.holder.as_deref()
    }

    /// Returns whether the key is still unassigned.
    pub fn is_spare(&self) -> bool {
        self.holder.is_none()
    }

    /// Returns the registration timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
