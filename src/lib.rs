//! # proofledger
//!
//! A single-node proof-of-work ledger: blocks linked by hash, value moving
//! through unspent transaction outputs, and ECDSA P-256 signatures guarding
//! every spend.
//!
//! ## Layout
//! - `core/`: blocks, transactions, the chain store and mining
//! - `storage/`: the UTXO index kept next to the chain in sled
//! - `wallet/`: key pairs, addresses and the key store file
//! - `config/`: data directory, wallet file and difficulty settings
//! - `utils/`: hashing, signing, base58 and the bincode codec
//! - `cli/`: command-line arguments for the binary
//!
//! A block append and its UTXO changes commit in one sled transaction, so
//! the index never disagrees with the chain.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::{Config, GLOBAL_CONFIG};
pub use core::{
    Block, Blockchain, BlockchainIterator, MerkleProof, MerkleTree, ProofOfWork, TXInput,
    TXOutput, Transaction, GENESIS_COINBASE_DATA, SUBSIDY,
};
pub use error::{BlockchainError, Result};
pub use storage::{UTXOSet, UnspentOutput};
pub use utils::{
    base58_decode, base58_encode, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, new_key_pair, ripemd160_digest, sha256_digest,
};
pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};
