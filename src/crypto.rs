//! Hashing and owner signatures for WeaveChain
//!
//! Owners are compressed secp256k1 public keys. A signature is a compact
//! ECDSA signature over the SHA-256 of a transaction's signable message.

use crate::encoding::{Address, BlockHash};
use crate::error::ChainError;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, PUBLIC_KEY_SIZE},
    ecdsa::Signature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use sha2::{Digest, Sha256, Sha384};

static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Byte length of a serialized owner key.
pub const OWNER_SIZE: usize = PUBLIC_KEY_SIZE;
/// Byte length of a transaction signature.
pub const SIGNATURE_SIZE: usize = COMPACT_SIGNATURE_SIZE;

pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

pub fn sha384(bytes: &[u8]) -> BlockHash {
    let digest = Sha384::digest(bytes);
    let mut out = [0u8; BlockHash::LEN];
    out.copy_from_slice(&digest);
    BlockHash(out)
}

/// Wallet address of `owner`.
pub fn address_from_owner(owner: &[u8]) -> Address {
    Address(sha256(owner))
}

pub fn address_to_hex(addr: &Address) -> String {
    hex::encode(addr.0)
}

pub fn address_from_hex(hex_str: &str) -> Result<Address, ChainError> {
    let bytes = hex::decode(hex_str.trim())
        .map_err(|e| ChainError::CryptoError(format!("Invalid hex address: {}", e)))?;
    Address::from_slice(&bytes).ok_or_else(|| {
        ChainError::CryptoError(format!(
            "Address must be {} bytes, got {}",
            Address::LEN,
            bytes.len()
        ))
    })
}

fn message_digest(message: &[u8]) -> Result<Message, ChainError> {
    Message::from_digest_slice(&sha256(message))
        .map_err(|e| ChainError::CryptoError(format!("Failed to create message: {}", e)))
}

/// Signing key of a wallet.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Result<Self, ChainError> {
        Ok(Self::from_secret_key(SecretKey::new(&mut OsRng)))
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    /// The `owner` field of transactions signed with this key.
    pub fn owner(&self) -> [u8; OWNER_SIZE] {
        self.public_key.serialize()
    }

    pub fn address(&self) -> Address {
        address_from_owner(&self.owner())
    }

    pub fn sign(&self, message: &[u8]) -> Result<[u8; SIGNATURE_SIZE], ChainError> {
        let digest = message_digest(message)?;
        Ok(SECP256K1_CONTEXT
            .sign_ecdsa(&digest, &self.secret_key)
            .serialize_compact())
    }
}

/// Check that `signature` was made over `message` by the key `owner`.
pub fn verify_signature(owner: &[u8], message: &[u8], signature: &[u8]) -> Result<(), ChainError> {
    if owner.len() != OWNER_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Owner must be {} bytes, got {}",
            OWNER_SIZE,
            owner.len()
        )));
    }
    if signature.len() != SIGNATURE_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Signature must be {} bytes, got {}",
            SIGNATURE_SIZE,
            signature.len()
        )));
    }
    let public_key = PublicKey::from_slice(owner)
        .map_err(|e| ChainError::CryptoError(format!("Invalid owner key: {}", e)))?;
    let signature = Signature::from_compact(signature)
        .map_err(|e| ChainError::CryptoError(format!("Invalid signature: {}", e)))?;

    SECP256K1_CONTEXT
        .verify_ecdsa(&message_digest(message)?, &signature, &public_key)
        .map_err(|_| ChainError::CryptoError("Signature does not match owner".to_string()))
}
