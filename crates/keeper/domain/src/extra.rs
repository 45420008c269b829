//! Codecs for the action specific `extra` payload of a request.
//!
//! All integers are big-endian. Amounts carried as integers are in units of
//! [`VALUE_PRECISION`](crate::VALUE_PRECISION) decimals.

use core::str;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    VALUE_PRECISION, decimal_from_units,
    request::{Chain, Role},
};

/// A malformed `extra` payload.
#[derive(Debug, thiserror::Error)]
pub enum ExtraError {
    /// The payload ended early.
    #[error("truncated extra: need {needed} more bytes")]
    Truncated {
        /// Missing byte count.
        needed: usize,
    },

    /// The payload has bytes left over.
    #[error("trailing extra bytes: {0}")]
    Trailing(usize),

    /// Unknown chain tag.
    #[error("unknown chain: {0}")]
    UnknownChain(u8),

    /// Unknown role tag.
    #[error("unknown role: {0}")]
    UnknownRole(u8),

    /// A field holds a value outside of its domain.
    #[error("invalid {0}")]
    Invalid(&'static str),
}

/// `[role]`: register the request holder as a spare key of `role`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddKeyExtra {
    /// The role of the new key.
    pub role: Role,
}

/// `[batch]`: ask the signer quorum for `batch` new keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSignerKeysExtra {
    /// Number of keys, between 1 and [`RequestSignerKeysExtra::MAX_BATCH`].
    pub batch: u8,
}

/// `chain(1) || fee_rate(8) || height(8) || block_hash(32)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkStatusExtra {
    /// The chain the status is about.
    pub chain: Chain,
    /// Fee rate in satoshi per virtual byte.
    pub fee_rate: u64,
    /// Height of the chain head.
    pub height: u64,
    /// Hash of the chain head, hex encoded.
    pub hash: String,
}

/// `chain(1) || price_asset(16) || price_amount(8) || transaction_minimum(8)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountPlanExtra {
    /// The chain the plan applies to.
    pub chain: Chain,
    /// Asset a holder pays to open a safe.
    pub price_asset: Uuid,
    /// Amount of `price_asset` a holder pays to open a safe.
    pub price_amount: Decimal,
    /// Smallest deposit accepted unless it is change.
    pub transaction_minimum: Decimal,
}

/// `threshold(1) || count(1) || receivers(16 * count)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposeAccountExtra {
    /// How many receivers must sign bond payouts.
    pub threshold: u8,
    /// Bond payout receivers.
    pub receivers: Vec<Uuid>,
}

/// `request_id(16) || der_signature`.
///
/// Used to approve a safe proposal and to revoke a transaction proposal: the id references the
/// proposal request and the signature is the holder signature over the proposal subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedReferenceExtra {
    /// The referenced proposal request.
    pub request_id: Uuid,
    /// DER encoded holder signature.
    pub signature: Vec<u8>,
}

/// `chain(1) || asset(16) || hash(32) || index(8) || amount(big-endian, variable)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositExtra {
    /// The chain of the deposit.
    pub chain: Chain,
    /// The deposited asset.
    pub asset_id: Uuid,
    /// The deposit transaction hash, hex encoded.
    pub hash: String,
    /// The output index.
    pub index: u64,
    /// The output value in satoshi.
    pub amount: u64,
}

/// `network_info_request_id(16) || receiver_address(utf-8)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposeTransactionExtra {
    /// The network status request whose fee rate prices the transaction.
    pub network_info_id: Uuid,
    /// The payment receiver address.
    pub receiver: String,
}

impl RequestSignerKeysExtra {
    /// Largest batch of keys one request can ask for.
    pub const MAX_BATCH: u8 = 128;
}

impl AddKeyExtra {
    /// Decodes the payload.
    pub fn decode(bz: &[u8]) -> Result<Self, ExtraError> {
        let mut reader = Reader::new(bz);
        let role = reader.role()?;
        reader.finish()?;
        Ok(Self { role })
    }
}

impl RequestSignerKeysExtra {
    /// Decodes the payload.
    pub fn decode(bz: &[u8]) -> Result<Self, ExtraError> {
        let mut reader = Reader::new(bz);
        let batch = reader.u8()?;
        reader.finish()?;

        if batch == 0 || batch > Self::MAX_BATCH {
            return Err(ExtraError::Invalid("key batch"));
        }

        Ok(Self { batch })
    }
}

impl NetworkStatusExtra {
    /// Largest fee rate or height a status can report, the range of a database bigint.
    pub const MAX_VALUE: u64 = i64::MAX as u64;

    /// Decodes the payload.
    pub fn decode(bz: &[u8]) -> Result<Self, ExtraError> {
        let mut reader = Reader::new(bz);
        let chain = reader.chain()?;
        let fee_rate = reader.u64()?;
        let height = reader.u64()?;
        let hash = hex::encode(reader.take(32)?);
        reader.finish()?;

        if fee_rate > Self::MAX_VALUE {
            return Err(ExtraError::Invalid("fee rate"));
        }
        if height > Self::MAX_VALUE {
            return Err(ExtraError::Invalid("height"));
        }

        Ok(Self { chain, fee_rate, height, hash })
    }
}

impl AccountPlanExtra {
    /// Decodes the payload.
    pub fn decode(bz: &[u8]) -> Result<Self, ExtraError> {
        let mut reader = Reader::new(bz);
        let chain = reader.chain()?;
        let price_asset = reader.uuid()?;
        let price_amount = decimal_from_units(reader.u64()?, VALUE_PRECISION);
        let transaction_minimum = decimal_from_units(reader.u64()?, VALUE_PRECISION);
        reader.finish()?;

        Ok(Self { chain, price_asset, price_amount, transaction_minimum })
    }
}

impl ProposeAccountExtra {
    /// Decodes the payload.
    pub fn decode(bz: &[u8]) -> Result<Self, ExtraError> {
        let mut reader = Reader::new(bz);
        let threshold = reader.u8()?;
        let count = reader.u8()?;

        let receivers = (0..count).map(|_| reader.uuid()).collect::<Result<Vec<_>, _>>()?;
        reader.finish()?;

        if threshold == 0 || threshold > count {
            return Err(ExtraError::Invalid("receivers threshold"));
        }

        Ok(Self { threshold, receivers })
    }

    /// Encodes the payload.
    ///
    /// # Errors
    ///
    /// Returns an error if there are more than 255 receivers.
    pub fn encode(&self) -> Result<Vec<u8>, ExtraError> {
        let count =
            u8::try_from(self.receivers.len()).map_err(|_| ExtraError::Invalid("receivers"))?;

        let mut bz = vec![self.threshold, count];
        for receiver in &self.receivers {
            bz.extend_from_slice(receiver.as_bytes());
        }
        Ok(bz)
    }
}

impl SignedReferenceExtra {
    /// Decodes the payload.
    pub fn decode(bz: &[u8]) -> Result<Self, ExtraError> {
        let mut reader = Reader::new(bz);
        let request_id = reader.uuid()?;
        let signature = reader.rest().to_vec();

        if signature.is_empty() {
            return Err(ExtraError::Invalid("signature"));
        }

        Ok(Self { request_id, signature })
    }

    /// Encodes the payload.
    pub fn encode(&self) -> Vec<u8> {
        [self.request_id.as_bytes().as_slice(), &self.signature].concat()
    }
}

impl DepositExtra {
    /// Decodes the payload.
    pub fn decode(bz: &[u8]) -> Result<Self, ExtraError> {
        let mut reader = Reader::new(bz);
        let chain = reader.chain()?;
        let asset_id = reader.uuid()?;
        let hash = hex::encode(reader.take(32)?);
        let index = reader.u64()?;

        let amount = reader.rest();
        if amount.len() > 8 {
            return Err(ExtraError::Invalid("deposit amount"));
        }
        let amount = amount.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        if i64::try_from(amount).is_err() {
            return Err(ExtraError::Invalid("deposit amount"));
        }

        Ok(Self { chain, asset_id, hash, index, amount })
    }

    /// Encodes the payload.
    pub fn encode(&self) -> Vec<u8> {
        let hash = hex::decode(&self.hash).unwrap_or_default();
        let amount = self.amount.to_be_bytes();
        let leading = amount.iter().take_while(|b| **b == 0).count();

        let mut bz = vec![self.chain as u8];
        bz.extend_from_slice(self.asset_id.as_bytes());
        bz.extend_from_slice(&hash);
        bz.extend_from_slice(&self.index.to_be_bytes());
        bz.extend_from_slice(&amount[leading..]);
        bz
    }
}

impl ProposeTransactionExtra {
    /// Decodes the payload.
    pub fn decode(bz: &[u8]) -> Result<Self, ExtraError> {
        let mut reader = Reader::new(bz);
        let network_info_id = reader.uuid()?;
        let receiver = str::from_utf8(reader.rest())
            .map_err(|_| ExtraError::Invalid("receiver address"))?
            .to_string();

        if receiver.is_empty() {
            return Err(ExtraError::Invalid("receiver address"));
        }

        Ok(Self { network_info_id, receiver })
    }

    /// Encodes the payload.
    pub fn encode(&self) -> Vec<u8> {
        [self.network_info_id.as_bytes().as_slice(), self.receiver.as_bytes()].concat()
    }
}

struct Reader<'a> {
    bz: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bz: &'a [u8]) -> Self {
        Self { bz }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ExtraError> {
        if self.bz.len() < n {
            return Err(ExtraError::Truncated { needed: n - self.bz.len() });
        }
        let (head, tail) = self.bz.split_at(n);
        self.bz = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, ExtraError> {
        self.take(1).map(|bz| bz[0])
    }

    fn u64(&mut self) -> Result<u64, ExtraError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(buf))
    }

    fn uuid(&mut self) -> Result<Uuid, ExtraError> {
        Uuid::from_slice(self.take(16)?).map_err(|_| ExtraError::Invalid("uuid"))
    }

    fn chain(&mut self) -> Result<Chain, ExtraError> {
        let tag = self.u8()?;
        Chain::from_repr(tag).ok_or(ExtraError::UnknownChain(tag))
    }

    fn role(&mut self) -> Result<Role, ExtraError> {
        let tag = self.u8()?;
        Role::from_repr(tag).ok_or(ExtraError::UnknownRole(tag))
    }

    fn rest(&mut self) -> &'a [u8] {
        core::mem::take(&mut self.bz)
    }

    fn finish(self) -> Result<(), ExtraError> {
        match self.bz.len() {
            0 => Ok(()),
            n => Err(ExtraError::Trailing(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_plan_amounts_are_scaled_to_coins() {
        let mut bz = vec![1];
        bz.extend_from_slice(Uuid::from_u128(7).as_bytes());
        bz.extend_from_slice(&100_000_000u64.to_be_bytes());
        bz.extend_from_slice(&10_000u64.to_be_bytes());

        let plan = AccountPlanExtra::decode(&bz).unwrap();
        assert_eq!(plan.chain, Chain::Bitcoin);
        assert_eq!(plan.price_asset, Uuid::from_u128(7));
        assert_eq!(plan.price_amount.to_string(), "1");
        assert_eq!(plan.transaction_minimum.to_string(), "0.0001");
    }

    #[test]
    fn deposit_amount_is_a_variable_length_integer() {
        let deposit = DepositExtra {
            chain: Chain::Bitcoin,
            asset_id: Uuid::from_u128(1),
            hash: "f04f905bb7d8e5ae1d7cd19eac8be5814380ff3fee0c4782ecb9f76dcad1e4a8".into(),
            index: 2,
            amount: 21720,
        };

        let bz = deposit.encode();
        assert_eq!(bz.len(), 1 + 16 + 32 + 8 + 2);
        assert_eq!(DepositExtra::decode(&bz).unwrap(), deposit);
    }

    #[test]
    fn deposit_rejects_short_payloads() {
        assert!(matches!(DepositExtra::decode(&[1; 20]), Err(ExtraError::Truncated { .. })));
        assert!(matches!(DepositExtra::decode(&[9; 57]), Err(ExtraError::UnknownChain(9))));
    }

    #[test]
    fn propose_account_checks_threshold_against_receivers() {
        let extra = ProposeAccountExtra { threshold: 1, receivers: vec![Uuid::from_u128(3)] };
        assert_eq!(ProposeAccountExtra::decode(&extra.encode().unwrap()).unwrap(), extra);

        let mut bz = extra.encode().unwrap();
        bz[0] = 2;
        assert!(matches!(ProposeAccountExtra::decode(&bz), Err(ExtraError::Invalid(_))));

        bz[0] = 0;
        assert!(matches!(ProposeAccountExtra::decode(&bz), Err(ExtraError::Invalid(_))));
    }

    #[test]
    fn propose_account_refuses_more_receivers_than_a_count_byte_holds() {
        let receivers = (0..256).map(Uuid::from_u128).collect::<Vec<_>>();
        let extra = ProposeAccountExtra { threshold: 1, receivers };

        assert!(matches!(extra.encode(), Err(ExtraError::Invalid("receivers"))));
    }

    #[test]
    fn network_status_values_fit_a_bigint() {
        let status = |fee_rate: u64, height: u64| {
            let mut bz = vec![1];
            bz.extend_from_slice(&fee_rate.to_be_bytes());
            bz.extend_from_slice(&height.to_be_bytes());
            bz.extend_from_slice(&[0xab; 32]);
            NetworkStatusExtra::decode(&bz)
        };

        let ok = status(10, 782705).unwrap();
        assert_eq!((ok.fee_rate, ok.height), (10, 782705));
        assert_eq!(ok.hash, "ab".repeat(32));

        assert!(status(NetworkStatusExtra::MAX_VALUE, NetworkStatusExtra::MAX_VALUE).is_ok());
        assert!(matches!(status(1 << 63, 782705), Err(ExtraError::Invalid("fee rate"))));
        assert!(matches!(status(10, u64::MAX), Err(ExtraError::Invalid("height"))));
    }

    #[test]
    fn key_batch_is_bounded() {
        assert_eq!(RequestSignerKeysExtra::decode(&[64]).unwrap().batch, 64);
        assert!(RequestSignerKeysExtra::decode(&[0]).is_err());
        assert!(RequestSignerKeysExtra::decode(&[129]).is_err());
        assert!(RequestSignerKeysExtra::decode(&[1, 1]).is_err());
    }

    #[test]
    fn add_key_requires_a_known_role() {
        assert_eq!(AddKeyExtra::decode(&[3]).unwrap().role, Role::Observer);
        assert!(matches!(AddKeyExtra::decode(&[7]), Err(ExtraError::UnknownRole(7))));
    }
}
