//! Holder and signer signature checks.

use bitcoin::{
    hashes::Hash,
    secp256k1::{Message, Secp256k1, ecdsa},
    sign_message::signed_msg_hash,
};

use crate::{BitcoinError, Result, account::parse_public_key};

/// Hashes a message the way bitcoin wallets sign messages.
///
/// Holders approve safes and revoke transactions by signing the safe address or the
/// transaction hash in this format.
pub fn message_digest(message: &str) -> [u8; 32] {
    signed_msg_hash(message).to_byte_array()
}

/// Verifies a DER encoded ECDSA signature of `digest` by `public_key`.
///
/// High S signatures are normalized first.
///
/// # Errors
///
/// Returns an error if the key, digest or signature are malformed, or the signature does not
/// verify.
pub fn verify_signature(public_key: &str, digest: &[u8], signature: &[u8]) -> Result<()> {
    let public_key = parse_public_key(public_key)?;
    let message = Message::from_digest_slice(digest)?;

    let mut signature = ecdsa::Signature::from_der(signature)?;
    signature.normalize_s();

    Secp256k1::verification_only()
        .verify_ecdsa(&message, &signature, &public_key.inner)
        .map_err(BitcoinError::from)
}

#[cfg(test)]
mod tests {
    use bitcoin::secp256k1::SecretKey;

    use super::*;

    const HOLDER_PRIVATE: &str = "04b1d2c7d2e9c630d840fc9ba452617d6d963ceba43b31d7f16403612d08353c";

    fn sign(private: &str, digest: [u8; 32]) -> (String, Vec<u8>) {
        let secp = Secp256k1::new();
        let key = SecretKey::from_slice(&hex::decode(private).unwrap()).unwrap();
        let signature = secp.sign_ecdsa(&Message::from_digest(digest), &key);
        let public = key.public_key(&secp).to_string();
        (public, signature.serialize_der().to_vec())
    }

    #[test]
    fn holder_signatures_over_messages_verify() {
        let address = "bc1q7erq8pvv665nuzmrqrn5vyc3kcd8v4vtafvdd8mkt9h05qz57l3qks2lsd";
        let digest = message_digest(address);
        let (public, signature) = sign(HOLDER_PRIVATE, digest);

        assert!(verify_signature(&public, &digest, &signature).is_ok());

        let other = message_digest("bc1qkczcrtknyhs228xg9nvujjvs96x56cf9l4q9za");
        assert!(verify_signature(&public, &other, &signature).is_err());
        assert!(verify_signature(&public, &digest, &signature[1..]).is_err());
    }
}
