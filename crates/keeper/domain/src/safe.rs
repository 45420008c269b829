//! Safes and their lifecycle.

use core::time::Duration;

use bon::Builder;
use dissolve_derive::Dissolve;
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::{Timestamps, request::Chain};

/// The lifecycle state of a safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SafeState {
    /// Proposed by the holder, awaiting the holder approval relayed by the observer.
    Proposed,
    /// Approved, deposits and withdrawals are accepted.
    Approved,
}

/// A custody vault of one holder.
///
/// The address is a pure function of the holder, signer and observer keys and the timelock, so
/// every keeper derives the same one independently.
///
/// # Type Parameters
///
/// * `AUX` - Auxiliary data type, defaults to [`Timestamps`] for tracking metadata.
#[derive(Debug, Clone, Builder, Dissolve)]
pub struct Safe<AUX = Timestamps> {
    /// The holder public key, hex encoded. At most one safe exists per holder.
    holder: String,

    /// The chain of the safe.
    chain: Chain,

    /// The signer quorum public key, hex encoded.
    signer: String,

    /// The observer public key, hex encoded.
    observer: String,

    /// The accountant public key, hex encoded.
    accountant: String,

    /// The relative timelock after which the holder and the observer can spend.
    timelock: Duration,

    /// The multisig witness script address.
    address: String,

    /// The multisig witness script.
    script: Vec<u8>,

    /// The accountant fee paying address.
    accountant_address: String,

    /// How many bond receivers must sign a bond payout.
    threshold: u8,

    /// The bond payout receivers.
    receivers: Vec<Uuid>,

    /// The lifecycle state.
    state: SafeState,

    /// The proposal request.
    request_id: Uuid,

    /// Auxiliary metadata associated with this safe.
    aux: AUX,
}

impl<AUX1> Safe<AUX1> {
    /// Replaces the auxiliary data, returning the safe and the previous data.
    pub fn with_aux<AUX2>(self, aux: AUX2) -> (Safe<AUX2>, AUX1) {
        let safe = Safe {
            holder: self.holder,
            chain: self.chain,
            signer: self.signer,
            observer: self.observer,
            accountant: self.accountant,
            timelock: self.timelock,
            address: self.address,
            script: self.script,
            accountant_address: self.accountant_address,
            threshold: self.threshold,
            receivers: self.receivers,
            state: self.state,
            request_id: self.request_id,
            aux,
        };

        (safe, self.aux)
    }
}

impl<AUX> Safe<AUX> {
    /// Returns the holder public key.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Returns the chain.
    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Returns the signer public key.
    pub fn signer(&self) -> &str {
        &self.signer
    }

    /// Returns the observer public key.
    pub fn observer(&self) -> &str {
        &self.observer
    }

    /// Returns the accountant public key.
    pub fn accountant(&self) -> &str {
        &self.accountant
    }

    /// Returns the recovery timelock.
    pub fn timelock(&self) -> Duration {
        self.timelock
    }

    /// Returns the multisig address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the multisig witness script.
    pub fn script(&self) -> &[u8] {
        &self.script
    }

    /// Returns the accountant address.
    pub fn accountant_address(&self) -> &str {
        &self.accountant_address
    }

    /// Returns the bond receivers threshold.
    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Returns the bond receivers.
    pub fn receivers(&self) -> &[Uuid] {
        &self.receivers
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> SafeState {
        self.state
    }

    /// Returns whether the safe accepts deposits and withdrawals.
    pub fn is_approved(&self) -> bool {
        self.state == SafeState::Approved
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
