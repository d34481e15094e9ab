//! Data storage and persistence
//!
//! The chain itself lives in `core::blockchain`; this module holds the UTXO
//! index derived from it.

pub mod utxo_set;

pub use utxo_set::{UTXOSet, UnspentOutput};
pub(crate) use utxo_set::UTXO_TREE;
