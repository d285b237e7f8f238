//! Content scanning for transaction payloads.
//!
//! A scan runs in two stages. The quick stage checks the binary against
//! the unconstrained patterns and the set of known content hashes and only
//! says whether anything matched. When it finds nothing, every signature
//! is evaluated with its constraints and the names of the matching ones
//! are reported.

use crate::crypto;
use crate::encoding::b64;
use crate::error::ChainError;
use crate::persistence::TxFilter;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signature {
    /// Matches when `pattern` occurs in the binary, at `offset` if given.
    Binary {
        name: String,
        #[serde(with = "b64")]
        pattern: Vec<u8>,
        #[serde(default)]
        offset: Option<usize>,
    },
    /// Matches when the SHA-256 of the whole binary equals `sha256`. A
    /// binary of a different `size` is skipped without hashing.
    Hash {
        name: String,
        #[serde(with = "hex_digest")]
        sha256: [u8; 32],
        #[serde(default)]
        size: Option<usize>,
    },
}

impl Signature {
    pub fn name(&self) -> &str {
        match self {
            Signature::Binary { name, .. } | Signature::Hash { name, .. } => name,
        }
    }

    fn matches(&self, bin: &[u8], digest: &mut Option<[u8; 32]>) -> bool {
        match self {
            Signature::Binary {
                pattern,
                offset: Some(offset),
                ..
            } => bin
                .get(*offset..)
                .is_some_and(|rest| rest.starts_with(pattern)),
            Signature::Binary { pattern, .. } => contains(bin, pattern),
            Signature::Hash { sha256, size, .. } => {
                if size.is_some_and(|size| size != bin.len()) {
                    return false;
                }
                *digest.get_or_insert_with(|| crypto::sha256(bin)) == *sha256
            }
        }
    }
}

mod hex_digest {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(digest: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(digest))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("sha256 digest must be 32 bytes"))
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Signatures plus the pattern sets for the quick stage.
#[derive(Debug, Clone, Default)]
pub struct ScanPatterns {
    signatures: Vec<Signature>,
    quick_binary: Vec<Vec<u8>>,
    quick_hashes: HashSet<[u8; 32]>,
}

impl ScanPatterns {
    /// Offset-free binary patterns and all content hashes go into the
    /// quick stage; offset-constrained patterns are left to the full scan.
    pub fn compile(signatures: Vec<Signature>) -> Self {
        let mut quick_binary = Vec::new();
        let mut quick_hashes = HashSet::new();
        for sig in &signatures {
            match sig {
                Signature::Binary {
                    pattern,
                    offset: None,
                    ..
                } if !pattern.is_empty() => quick_binary.push(pattern.clone()),
                Signature::Binary { .. } => {}
                Signature::Hash { sha256, .. } => {
                    quick_hashes.insert(*sha256);
                }
            }
        }
        ScanPatterns {
            signatures,
            quick_binary,
            quick_hashes,
        }
    }

    /// Load a JSON array of signatures.
    pub fn load(path: &Path) -> Result<Self, ChainError> {
        let contents = fs::read(path)?;
        let signatures: Vec<Signature> = serde_json::from_slice(&contents)?;
        Ok(Self::compile(signatures))
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    fn quick_match(&self, bin: &[u8], digest: &mut Option<[u8; 32]>) -> bool {
        if self.quick_binary.iter().any(|pattern| contains(bin, pattern)) {
            return true;
        }
        if self.quick_hashes.is_empty() {
            return false;
        }
        let digest = *digest.get_or_insert_with(|| crypto::sha256(bin));
        self.quick_hashes.contains(&digest)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    Clean,
    /// Names of the matching signatures; empty after a quick-stage hit.
    Infected(Vec<String>),
}

impl ScanResult {
    pub fn is_clean(&self) -> bool {
        matches!(self, ScanResult::Clean)
    }
}

pub fn is_infected(bin: &[u8], patterns: &ScanPatterns) -> ScanResult {
    let mut digest = None;
    if patterns.quick_match(bin, &mut digest) {
        return ScanResult::Infected(Vec::new());
    }
    let names: Vec<String> = patterns
        .signatures
        .iter()
        .filter(|sig| sig.matches(bin, &mut digest))
        .map(|sig| sig.name().to_string())
        .collect();
    if names.is_empty() {
        ScanResult::Clean
    } else {
        ScanResult::Infected(names)
    }
}

/// Write-time filter keeping infected payloads off disk.
pub struct Firewall {
    patterns: ScanPatterns,
}

impl Firewall {
    pub fn new(patterns: ScanPatterns) -> Self {
        Firewall { patterns }
    }

    pub fn load(path: &Path) -> Result<Self, ChainError> {
        let patterns = ScanPatterns::load(path)?;
        info!(
            path = %path.display(),
            signatures = patterns.signatures().len(),
            "Loaded content signatures"
        );
        Ok(Self::new(patterns))
    }

    pub fn scan(&self, tx: &Transaction) -> ScanResult {
        is_infected(&tx.data, &self.patterns)
    }
}

impl TxFilter for Firewall {
    fn accept(&self, tx: &Transaction) -> bool {
        match self.scan(tx) {
            ScanResult::Clean => true,
            ScanResult::Infected(names) => {
                warn!(
                    tx = %tx.id,
                    signatures = ?names,
                    "Transaction data matches a content signature"
                );
                false
            }
        }
    }
}
