//! Wallet management and cryptographic operations
//!
//! Key pair generation, address derivation and validation, and the on-disk
//! key store mapping addresses to key pairs.

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Wallet,
    ADDRESS_CHECK_SUM_LEN, PUB_KEY_HASH_LEN, VERSION,
};
pub use wallets::{Wallets, WALLET_FILE};
