//! Wire encodings shared by every persisted structure.
//!
//! Binary fields travel as unpadded base64url strings, amounts as decimal
//! strings. Fixed-width identifiers get their own newtypes so a block hash
//! can never be passed where a transaction id is expected.

use crate::error::ChainError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

pub fn b64_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn b64_decode(s: &str) -> Result<Vec<u8>, ChainError> {
    URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|e| ChainError::SerializationError(format!("Invalid base64url: {}", e)))
}

/// `#[serde(with = "crate::encoding::b64")]` for `Vec<u8>` fields.
pub mod b64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::b64_encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::b64_decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Amounts in winston, serialized as decimal strings.
pub mod winston {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &i128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&amount.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<i128>().map_err(serde::de::Error::custom)
    }
}

macro_rules! fixed_hash {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub fn zero() -> Self {
                Self([0u8; $len])
            }

            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                <[u8; $len]>::try_from(bytes).ok().map(Self)
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn to_b64(&self) -> String {
                $crate::encoding::b64_encode(&self.0)
            }

            pub fn from_b64(s: &str) -> Result<Self, $crate::error::ChainError> {
                let bytes = $crate::encoding::b64_decode(s)?;
                Self::from_slice(&bytes).ok_or_else(|| {
                    $crate::error::ChainError::SerializationError(format!(
                        "{} must be {} bytes, got {}",
                        stringify!($name),
                        $len,
                        bytes.len()
                    ))
                })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::zero()
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.to_b64())
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_b64())
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_b64())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                Self::from_b64(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_hash!(
    /// Wallet address: SHA-256 of the owner public key.
    Address,
    32
);
fixed_hash!(
    /// Transaction identifier: SHA-256 of the signature.
    TxId,
    32
);
fixed_hash!(
    /// SHA-384 digest used for block hashes and wallet-list content hashes.
    BlockHash,
    48
);
