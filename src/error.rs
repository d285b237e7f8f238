//! Error types for WeaveChain
//!
//! Rejected transactions are not errors: validation reports reason codes
//! (see `transaction::InvalidReason` and `mempool::RejectReason`).

use std::fmt;

#[derive(Debug, Clone)]
pub enum ChainError {
    InvalidBlock(String),
    CryptoError(String),
    DatabaseError(String),
    IoError(String),
    SerializationError(String),
    ConfigError(String),
    NotEnoughDiskSpace { needed: u64, available: u64 },
    MinerError(String),
    BlockNotFound(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChainError::InvalidBlock(msg) => write!(f, "Invalid block: {}", msg),
            ChainError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            ChainError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            ChainError::IoError(msg) => write!(f, "IO error: {}", msg),
            ChainError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            ChainError::ConfigError(msg) => write!(f, "Config error: {}", msg),
            ChainError::NotEnoughDiskSpace { needed, available } => write!(
                f,
                "Not enough disk space: need {} bytes, {} available",
                needed, available
            ),
            ChainError::MinerError(msg) => write!(f, "Miner error: {}", msg),
            ChainError::BlockNotFound(msg) => write!(f, "Block not found: {}", msg),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;
