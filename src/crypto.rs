//! Node identity and protocol hashing.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use rand::rngs::OsRng;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

pub const PUBKEY_SIZE: usize = 32;
pub const SECRET_SIZE: usize = 32;

pub type PubKey = [u8; PUBKEY_SIZE];

type Blake2b256 = Blake2b<U32>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("secret key must be {SECRET_SIZE} bytes")]
    BadSecretLength,
}

/// Static Curve25519 keypair identifying this node on the wire.
#[derive(Clone)]
pub struct Keypair {
    pub public: PubKey,
    secret: StaticSecret,
}

impl Keypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret).to_bytes();
        Self { public, secret }
    }

    pub fn from_secret(secret: [u8; SECRET_SIZE]) -> Self {
        let secret = StaticSecret::from(secret);
        let public = PublicKey::from(&secret).to_bytes();
        Self { public, secret }
    }

    pub fn from_secret_slice(secret: &[u8]) -> Result<Self, CryptoError> {
        let secret: [u8; SECRET_SIZE] =
            secret.try_into().map_err(|_| CryptoError::BadSecretLength)?;
        Ok(Self::from_secret(secret))
    }

    pub fn secret_bytes(&self) -> [u8; SECRET_SIZE] {
        self.secret.to_bytes()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}

/// Blake2b-256, the protocol hash for block headers and transactions.
pub fn blake2b256(data: &[u8]) -> [u8; 32] {
    Blake2b256::digest(data).into()
}
