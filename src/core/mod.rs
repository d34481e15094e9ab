//! Core ledger functionality
//!
//! Blocks, transactions, the chain store and proof-of-work consensus.

pub mod block;
pub mod blockchain;
pub mod merkle;
pub mod monetary;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::{Blockchain, BlockchainIterator};
pub use merkle::{MerkleProof, MerkleTree, ProofElement};
pub use monetary::{GENESIS_COINBASE_DATA, SUBSIDY};
pub use proof_of_work::ProofOfWork;
pub use transaction::{TXInput, TXOutput, Transaction, COINBASE_VOUT};
