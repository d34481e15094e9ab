//! Test utilities for ledger testing

use crate::core::{Blockchain, ProofOfWork};
use crate::error::{BlockchainError, Result};
use crate::wallet::Wallets;
use tempfile::TempDir;

/// Low difficulty so tests mine in milliseconds
pub const TEST_TARGET_BITS: u32 = 8;

/// Well-known valid address nobody in the tests holds keys for
pub const TEST_ADDRESS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

/// Create a temporary directory for testing
pub fn create_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(|e| BlockchainError::Io(e.to_string()))
}

/// Create a test chain whose genesis reward goes to `TEST_ADDRESS`
pub fn create_test_blockchain() -> Result<(Blockchain, TempDir, String)> {
    let temp_dir = create_temp_dir()?;
    let db_path = temp_dir.path().join("test_blockchain");
    let blockchain =
        Blockchain::create_blockchain_with_path(TEST_ADDRESS, db_path, TEST_TARGET_BITS)?;
    Ok((blockchain, temp_dir, TEST_ADDRESS.to_string()))
}

/// Create a test chain whose genesis reward goes to a fresh local wallet
pub fn create_funded_chain() -> Result<(Blockchain, TempDir, Wallets, String)> {
    let temp_dir = create_temp_dir()?;
    let mut wallets = Wallets::load(temp_dir.path().join("wallet.dat"))?;
    let address = wallets.create_wallet()?;
    let blockchain = Blockchain::create_blockchain_with_path(
        &address,
        temp_dir.path().join("test_blockchain"),
        TEST_TARGET_BITS,
    )?;
    Ok((blockchain, temp_dir, wallets, address))
}

/// Create `count` wallets in a throwaway key store. The backing file goes away
/// when this returns; the store stays usable in memory.
pub fn create_test_wallets(count: usize) -> Result<(Wallets, Vec<String>)> {
    let temp_dir = create_temp_dir()?;
    let mut wallets = Wallets::load(temp_dir.path().join("wallet.dat"))?;
    let mut addresses = Vec::new();

    for _ in 0..count {
        addresses.push(wallets.create_wallet()?);
    }

    Ok((wallets, addresses))
}

/// Walks the chain from the tip and checks linkage, heights, proof-of-work and
/// Merkle roots of every block
pub fn validate_blockchain_integrity(blockchain: &Blockchain) -> Result<bool> {
    let mut expected_hash = blockchain.get_tip_hash();
    let mut expected_height = blockchain.get_best_height()?;
    let mut reached_genesis = false;

    for block in blockchain.iterator() {
        let block = block?;
        if reached_genesis
            || block.get_hash() != expected_hash.as_slice()
            || block.get_height() != expected_height
            || !ProofOfWork::validate(&block)
            || !block.verify_merkle_root()?
        {
            return Ok(false);
        }

        reached_genesis = block.is_genesis();
        if !reached_genesis {
            if expected_height == 0 {
                return Ok(false);
            }
            expected_height -= 1;
        }
        expected_hash = block.get_pre_block_hash().to_vec();
    }

    Ok(reached_genesis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;

    #[test]
    fn test_create_test_blockchain() {
        let (blockchain, _temp_dir, _) = create_test_blockchain().unwrap();
        assert_eq!(blockchain.get_best_height().unwrap(), 0);
        assert_eq!(blockchain.get_target_bits(), TEST_TARGET_BITS);
    }

    #[test]
    fn test_create_test_wallets() {
        let (_wallets, addresses) = create_test_wallets(5).unwrap();
        assert_eq!(addresses.len(), 5);

        // All addresses should be unique
        for i in 0..addresses.len() {
            for j in i + 1..addresses.len() {
                assert_ne!(addresses[i], addresses[j]);
            }
        }
    }

    #[test]
    fn test_validate_blockchain_integrity() {
        let (blockchain, _temp_dir, address) = create_test_blockchain().unwrap();
        for _ in 0..2 {
            let coinbase = Transaction::new_coinbase_tx(&address, "").unwrap();
            blockchain.mine_block(&[coinbase]).unwrap();
        }
        assert!(validate_blockchain_integrity(&blockchain).unwrap());
    }

    #[test]
    fn test_rewritten_height_breaks_integrity() {
        let (blockchain, _temp_dir, address) = create_test_blockchain().unwrap();
        let coinbase = Transaction::new_coinbase_tx(&address, "").unwrap();
        let block = blockchain.mine_block(&[coinbase]).unwrap();

        // Proof-of-work still holds, only the chain walk sees the bad height
        let tampered = block.with_height_for_test(5);
        assert!(ProofOfWork::validate(&tampered));
        blockchain
            .get_db()
            .open_tree("blocks")
            .unwrap()
            .insert(block.get_hash(), tampered.serialize().unwrap())
            .unwrap();

        assert!(!validate_blockchain_integrity(&blockchain).unwrap());
    }
}
