// Thin re-export module: implementation is in `blockchain/core.rs`, split
// into the block model, the ledger model and caller-side block checks.

pub mod core;
pub use core::*;
