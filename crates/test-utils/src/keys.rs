use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};

pub const HOLDER_SECRET: &str = "04b1d2c7d2e9c630d840fc9ba452617d6d963ceba43b31d7f16403612d08353c";

pub const SIGNER_SECRET: &str = "3d54b1b0a7c4e95a0f7cb0c5d2e48e2c13b7f0c6a98f1d5e2b4a60c7e9d8f112";

pub const OBSERVER_SECRET: &str =
    "5b7c0e3f2d94a1b8c6e0f7a2d3b5c8e9f1a0b2c4d6e8f0a1b3c5d7e9f0a2b4c6";

pub const ACCOUNTANT_SECRET: &str =
    "743602ca7e2723e7dd510e611957cfdcbb517dff0c5b1877472e35b0f19e0063";

/// A secp256k1 key pair with a fixed seed.
#[derive(Debug, Clone)]
pub struct TestKey {
    secret: SecretKey,
}

impl TestKey {
    pub fn from_hex(secret: &str) -> Self {
        let bz = hex::decode(secret).expect("secret key must be hex");
        let secret = SecretKey::from_slice(&bz).expect("secret key must be valid");
        Self { secret }
    }

    /// A key seeded with 32 copies of `n`, for tests needing many distinct keys.
    pub fn nth(n: u8) -> Self {
        assert!(n > 0 && n < 0x7f, "seed byte out of range");
        let secret = SecretKey::from_slice(&[n; 32]).expect("seed must be a valid secret key");
        Self { secret }
    }

    /// The hex encoded compressed public key.
    pub fn public(&self) -> String {
        self.secret.public_key(&Secp256k1::new()).to_string()
    }

    /// Signs a 32 byte digest and returns the DER encoded signature.
    pub fn sign(&self, digest: &[u8]) -> Vec<u8> {
        let message = Message::from_digest_slice(digest).expect("digest must be 32 bytes");
        Secp256k1::new().sign_ecdsa(&message, &self.secret).serialize_der().to_vec()
    }
}

pub fn holder() -> TestKey {
    TestKey::from_hex(HOLDER_SECRET)
}

pub fn signer() -> TestKey {
    TestKey::from_hex(SIGNER_SECRET)
}

pub fn observer() -> TestKey {
    TestKey::from_hex(OBSERVER_SECRET)
}

pub fn accountant() -> TestKey {
    TestKey::from_hex(ACCOUNTANT_SECRET)
}
