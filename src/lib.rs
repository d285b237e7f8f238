//! WeaveChain - consensus core of a proof-of-work weave
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Blockchain
//! - [`blockchain`] - Blocks, wallet lists and caller-side block checks
//! - [`transaction`] - Transaction types and the transaction validator
//! - [`mempool`] - Pending transactions and API reason codes
//!
//! ## Economics
//! - [`fees`] - Minimum transaction fees
//! - [`consensus`] - Protocol constants, retargeting and block rewards
//!
//! ## Mining
//! - [`miner`] - Proof-of-work coordinator and worker pool
//!
//! ## Cryptography & Security
//! - [`crypto`] - Hashing and signatures (secp256k1)
//! - [`security`] - Content signature scanning
//! - [`encoding`] - Base64url identifiers and amounts
//!
//! ## Storage
//! - [`persistence`] - Content-addressed file store and SQLite index
//! - [`cache`] - Caching utilities
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Blockchain
// ============================================================================
pub mod blockchain;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Economics
// ============================================================================
pub mod consensus;
pub mod fees;

// ============================================================================
// Mining
// ============================================================================
pub mod miner;

// ============================================================================
// Cryptography & Security
// ============================================================================
pub mod crypto;
pub mod encoding;
pub mod security;

// ============================================================================
// Storage
// ============================================================================
pub mod cache;
pub mod persistence;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
