// This is the chain store - the append-only record of every mined block.
// Blocks live in a sled tree keyed by their hash, and the tip pointer sits in the
// same tree under a sentinel key. Every append also updates the UTXO index inside
// the same sled transaction, so a reader never sees one without the other.

use crate::config::Config;
use crate::core::{Block, Transaction, GENESIS_COINBASE_DATA};
use crate::error::{BlockchainError, Result};
use crate::storage::{UTXOSet, UnspentOutput, UTXO_TREE};
use data_encoding::HEXLOWER;
use log::{debug, info};
use sled::transaction::{ConflictableTransactionError, TransactionResult};
use sled::{Db, Transactional, Tree};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

const TIP_BLOCK_HASH_KEY: &str = "tip_block_hash"; // Key holding the hash of the latest block
const BLOCKS_TREE: &str = "blocks"; // Tree name for storing all blocks

#[derive(Clone)]
pub struct Blockchain {
    tip_hash: Arc<RwLock<Vec<u8>>>, // Hash of the most recent block in the chain
    db: Db,
    db_path: PathBuf,
    target_bits: u32, // Difficulty new blocks are mined at
}

impl Blockchain {
    /// Creates a chain in the configured data directory with a genesis reward to `genesis_address`.
    pub fn create_blockchain(genesis_address: &str, config: &Config) -> Result<Blockchain> {
        Self::create_blockchain_with_path(
            genesis_address,
            config.get_data_dir(),
            config.get_target_bits(),
        )
    }

    /// Opens the chain in the configured data directory.
    pub fn new_blockchain(config: &Config) -> Result<Blockchain> {
        Self::new_blockchain_with_path(config.get_data_dir(), config.get_target_bits())
    }

    pub fn create_blockchain_with_path(
        genesis_address: &str,
        db_path: impl AsRef<Path>,
        target_bits: u32,
    ) -> Result<Blockchain> {
        let path = db_path.as_ref().to_path_buf();
        let db = sled::open(&path)?;
        let blocks_tree = db.open_tree(BLOCKS_TREE)?;

        if blocks_tree.get(TIP_BLOCK_HASH_KEY)?.is_some() {
            return Err(BlockchainError::ChainAlreadyExists(
                path.display().to_string(),
            ));
        }

        info!("Creating genesis block for address: {genesis_address}");
        let coinbase_tx = Transaction::new_coinbase_tx(genesis_address, GENESIS_COINBASE_DATA)?;
        let genesis = Block::generate_genesis_block(&coinbase_tx, target_bits)?;

        let utxo_tree = db.open_tree(UTXO_TREE)?;
        Self::append_block(&blocks_tree, &utxo_tree, &genesis, None)?;
        db.flush()?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(genesis.get_hash().to_vec())),
            db,
            db_path: path,
            target_bits,
        })
    }

    pub fn new_blockchain_with_path(
        db_path: impl AsRef<Path>,
        target_bits: u32,
    ) -> Result<Blockchain> {
        let path = db_path.as_ref().to_path_buf();
        let db = sled::open(&path)?;
        let blocks_tree = db.open_tree(BLOCKS_TREE)?;

        let tip_hash = blocks_tree
            .get(TIP_BLOCK_HASH_KEY)?
            .ok_or_else(|| BlockchainError::ChainNotFound(path.display().to_string()))?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash.to_vec())),
            db,
            db_path: path,
            target_bits,
        })
    }

    // I write the block, the tip pointer and the UTXO changes as one unit.
    // When `expected_tip` is set the stored tip must still match it, otherwise
    // some other writer got in first and the block no longer extends the chain.
    fn append_block(
        blocks_tree: &Tree,
        utxo_tree: &Tree,
        block: &Block,
        expected_tip: Option<&[u8]>,
    ) -> Result<()> {
        let block_data = block.serialize()?;
        let block_hash = block.get_hash();

        let result: TransactionResult<(), BlockchainError> =
            (blocks_tree, utxo_tree).transaction(|(blocks, utxo)| {
                if let Some(expected) = expected_tip {
                    let stored_tip = blocks.get(TIP_BLOCK_HASH_KEY)?;
                    if stored_tip.as_deref() != Some(expected) {
                        return Err(ConflictableTransactionError::Abort(
                            BlockchainError::InvalidBlock(
                                "chain tip moved while the block was being mined".to_string(),
                            ),
                        ));
                    }
                }
                blocks.insert(block_hash, block_data.as_slice())?;
                blocks.insert(TIP_BLOCK_HASH_KEY, block_hash)?;
                UTXOSet::apply_block(utxo, block)?;
                Ok(())
            });
        result?;
        Ok(())
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub fn get_db_path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub fn get_target_bits(&self) -> u32 {
        self.target_bits
    }

    pub fn get_tip_hash(&self) -> Vec<u8> {
        self.tip_hash
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_tip_hash(&self, new_tip_hash: &[u8]) {
        let mut tip_hash = self
            .tip_hash
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *tip_hash = new_tip_hash.to_vec();
    }

    fn blocks_tree(&self) -> Result<Tree> {
        Ok(self.db.open_tree(BLOCKS_TREE)?)
    }

    /// Validates `transactions` against the current chain state, mines them into a
    /// block on top of the tip and appends it together with its UTXO changes.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        // Nothing gets mined until every transaction checks out
        let utxo_set = UTXOSet::new(self.clone());
        let mut claimed: HashSet<(Vec<u8>, i64)> = HashSet::new();
        let mut block_ids: HashSet<Vec<u8>> = HashSet::new();
        for transaction in transactions {
            let txid_hex = HEXLOWER.encode(transaction.get_id());
            // Signatures do not cover the id, so it has to be recomputed here
            if transaction.get_id() != transaction.hash()?.as_slice() {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "transaction {txid_hex} does not hash to its id"
                )));
            }

            if !transaction.is_coinbase() {
                if !self.verify_transaction(transaction)? {
                    return Err(BlockchainError::InvalidSignature(txid_hex));
                }
                self.check_value_balance(transaction)?;

                for vin in transaction.get_vin() {
                    let vout = vin.output_index()?;
                    let newly_claimed =
                        claimed.insert((vin.get_txid().to_vec(), vin.get_vout()));
                    if !newly_claimed || !utxo_set.is_unspent(vin.get_txid(), vout)? {
                        return Err(BlockchainError::OutputAlreadySpent {
                            txid: HEXLOWER.encode(vin.get_txid()),
                            vout,
                        });
                    }
                }
            }

            if !block_ids.insert(transaction.get_id().to_vec())
                || utxo_set.has_transaction(transaction.get_id())?
                || self.contains_transaction(transaction.get_id())?
            {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "transaction {txid_hex} is already on the chain or in this block"
                )));
            }
        }

        let tip_hash = self.get_tip_hash();
        let height = self.get_best_height()? + 1;
        let block = Block::new_block(tip_hash.clone(), transactions, height, self.target_bits)?;

        let utxo_tree = self.db.open_tree(UTXO_TREE)?;
        Self::append_block(
            &self.blocks_tree()?,
            &utxo_tree,
            &block,
            Some(tip_hash.as_slice()),
        )?;
        // The append is committed at this point; the tip follows it even if
        // the flush below fails
        self.set_tip_hash(block.get_hash());
        self.db.flush()?;

        info!(
            "Successfully mined block {} at height {height} with {} transactions",
            block.get_hash_hex(),
            transactions.len()
        );
        Ok(block)
    }

    // Outputs of a transfer may not exceed what its inputs unlock
    fn check_value_balance(&self, transaction: &Transaction) -> Result<()> {
        let prev_txs = self.prev_transactions(transaction)?;
        let mut input_total: u64 = 0;
        for vin in transaction.get_vin() {
            let prev_tx = prev_txs
                .get(&HEXLOWER.encode(vin.get_txid()))
                .ok_or_else(|| {
                    BlockchainError::TransactionNotFound(HEXLOWER.encode(vin.get_txid()))
                })?;
            let value = prev_tx
                .get_vout()
                .get(vin.output_index()?)
                .map(|out| out.get_value())
                .unwrap_or(0);
            input_total = input_total.saturating_add(value);
        }
        let output_total = transaction
            .get_vout()
            .iter()
            .fold(0u64, |acc, out| acc.saturating_add(out.get_value()));

        if output_total > input_total {
            return Err(BlockchainError::InvalidTransaction(format!(
                "transaction {} spends {output_total} but only unlocks {input_total}",
                HEXLOWER.encode(transaction.get_id())
            )));
        }
        Ok(())
    }

    /// Walks the chain from the tip back to genesis.
    pub fn iterator(&self) -> BlockchainIterator {
        BlockchainIterator::new(self.get_tip_hash(), self.db.clone())
    }

    /// Every unspent output on the chain, keyed by hex transaction id, from a full scan.
    pub fn find_utxo(&self) -> Result<HashMap<String, Vec<UnspentOutput>>> {
        let mut utxo: HashMap<String, Vec<UnspentOutput>> = HashMap::new();
        let mut spent_txos: HashMap<String, HashSet<usize>> = HashMap::new();

        for block in self.iterator() {
            let block = block?;

            // Spends inside this block are recorded before its outputs
            for tx in block.get_transactions() {
                if tx.is_coinbase() {
                    continue;
                }
                for txin in tx.get_vin() {
                    spent_txos
                        .entry(HEXLOWER.encode(txin.get_txid()))
                        .or_default()
                        .insert(txin.output_index()?);
                }
            }

            for tx in block.get_transactions() {
                let txid_hex = HEXLOWER.encode(tx.get_id());
                let spent = spent_txos.get(&txid_hex);
                let unspent: Vec<UnspentOutput> = tx
                    .get_vout()
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| !spent.is_some_and(|s| s.contains(idx)))
                    .map(|(idx, out)| UnspentOutput::new(idx, out.clone()))
                    .collect();
                if !unspent.is_empty() {
                    utxo.insert(txid_hex, unspent);
                }
            }
        }
        Ok(utxo)
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Result<Transaction> {
        for block in self.iterator() {
            let block = block?;
            for transaction in block.get_transactions() {
                if txid.eq(transaction.get_id()) {
                    return Ok(transaction.clone());
                }
            }
        }
        Err(BlockchainError::TransactionNotFound(HEXLOWER.encode(txid)))
    }

    pub fn contains_transaction(&self, txid: &[u8]) -> Result<bool> {
        match self.find_transaction(txid) {
            Ok(_) => Ok(true),
            Err(BlockchainError::TransactionNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The transactions referenced by `transaction`'s inputs, keyed by hex id.
    pub fn prev_transactions(
        &self,
        transaction: &Transaction,
    ) -> Result<HashMap<String, Transaction>> {
        let mut prev_txs = HashMap::new();
        for vin in transaction.get_vin() {
            let txid_hex = HEXLOWER.encode(vin.get_txid());
            if prev_txs.contains_key(&txid_hex) {
                continue;
            }
            let prev_tx = self.find_transaction(vin.get_txid())?;
            prev_txs.insert(txid_hex, prev_tx);
        }
        Ok(prev_txs)
    }

    pub fn sign_transaction(&self, transaction: &mut Transaction, pkcs8: &[u8]) -> Result<()> {
        let prev_txs = self.prev_transactions(transaction)?;
        transaction.sign(pkcs8, &prev_txs)
    }

    pub fn verify_transaction(&self, transaction: &Transaction) -> Result<bool> {
        if transaction.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.prev_transactions(transaction)?;
        let valid = transaction.verify(&prev_txs)?;
        debug!(
            "Transaction {} verified: {valid}",
            HEXLOWER.encode(transaction.get_id())
        );
        Ok(valid)
    }

    pub fn get_best_height(&self) -> Result<usize> {
        let tip_hash = self.get_tip_hash();
        let tip_block = self.get_block(&tip_hash)?.ok_or_else(|| {
            BlockchainError::Storage(format!("tip block {} missing", HEXLOWER.encode(&tip_hash)))
        })?;
        Ok(tip_block.get_height())
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Option<Block>> {
        match self.blocks_tree()?.get(block_hash)? {
            Some(block_bytes) => Ok(Some(Block::deserialize(block_bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Block hashes from the tip back to genesis
    pub fn get_block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        self.iterator()
            .map(|block| block.map(|b| b.get_hash().to_vec()))
            .collect()
    }
}

/// Backward cursor over the chain. Yields `Err` once and stops if a block is
/// missing or cannot be decoded.
pub struct BlockchainIterator {
    db: Db,
    current_hash: Vec<u8>,
}

impl BlockchainIterator {
    fn new(tip_hash: Vec<u8>, db: Db) -> BlockchainIterator {
        BlockchainIterator {
            current_hash: tip_hash,
            db,
        }
    }

    fn load_current(&self) -> Result<Block> {
        let block_tree = self.db.open_tree(BLOCKS_TREE)?;
        let data = block_tree.get(&self.current_hash)?.ok_or_else(|| {
            BlockchainError::Storage(format!(
                "block {} missing from store",
                HEXLOWER.encode(&self.current_hash)
            ))
        })?;
        Block::deserialize(data.as_ref())
    }
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        // An empty hash is the genesis block's parent
        if self.current_hash.is_empty() {
            return None;
        }
        match self.load_current() {
            Ok(block) => {
                self.current_hash = block.get_pre_block_hash().to_vec();
                Some(Ok(block))
            }
            Err(e) => {
                self.current_hash.clear();
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ProofOfWork;
    use crate::testnet::{create_test_blockchain, create_test_wallets, TEST_TARGET_BITS};

    #[test]
    fn test_genesis_chain() {
        let (blockchain, _dir, address) = create_test_blockchain().unwrap();
        assert_eq!(blockchain.get_best_height().unwrap(), 0);

        let blocks: Vec<Block> = blockchain.iterator().collect::<Result<_>>().unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].is_genesis());
        assert_eq!(blocks[0].get_difficulty(), TEST_TARGET_BITS);
        assert!(ProofOfWork::validate(&blocks[0]));

        let coinbase = &blocks[0].get_transactions()[0];
        assert!(coinbase.is_coinbase());
        assert_eq!(
            coinbase.get_vin()[0].get_pub_key(),
            GENESIS_COINBASE_DATA.as_bytes()
        );
        assert_eq!(
            crate::wallet::convert_address(coinbase.get_vout()[0].get_pub_key_hash()),
            address
        );
    }

    #[test]
    fn test_create_twice_fails() {
        let (blockchain, dir, address) = create_test_blockchain().unwrap();
        let path = blockchain.get_db_path().to_path_buf();
        drop(blockchain);

        let result = Blockchain::create_blockchain_with_path(&address, &path, TEST_TARGET_BITS);
        assert!(matches!(result, Err(BlockchainError::ChainAlreadyExists(_))));
        drop(dir);
    }

    #[test]
    fn test_open_missing_chain_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            Blockchain::new_blockchain_with_path(dir.path().join("empty"), TEST_TARGET_BITS);
        assert!(matches!(result, Err(BlockchainError::ChainNotFound(_))));
    }

    #[test]
    fn test_mine_block_advances_tip() {
        let (blockchain, _dir, address) = create_test_blockchain().unwrap();
        let genesis_hash = blockchain.get_tip_hash();

        let coinbase = Transaction::new_coinbase_tx(&address, "").unwrap();
        let block = blockchain.mine_block(&[coinbase]).unwrap();

        assert_eq!(block.get_height(), 1);
        assert_eq!(block.get_pre_block_hash(), genesis_hash.as_slice());
        assert_eq!(blockchain.get_tip_hash(), block.get_hash());
        assert_eq!(blockchain.get_best_height().unwrap(), 1);

        let hashes = blockchain.get_block_hashes().unwrap();
        assert_eq!(hashes, vec![block.get_hash().to_vec(), genesis_hash]);
    }

    #[test]
    fn test_mine_block_rejects_empty_list() {
        let (blockchain, _dir, _) = create_test_blockchain().unwrap();
        assert!(matches!(
            blockchain.mine_block(&[]),
            Err(BlockchainError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_find_transaction() {
        let (blockchain, _dir, address) = create_test_blockchain().unwrap();
        let coinbase = Transaction::new_coinbase_tx(&address, "").unwrap();
        blockchain.mine_block(&[coinbase.clone()]).unwrap();

        let found = blockchain.find_transaction(coinbase.get_id()).unwrap();
        assert_eq!(found, coinbase);
        assert!(matches!(
            blockchain.find_transaction(&[0u8; 32]),
            Err(BlockchainError::TransactionNotFound(_))
        ));
    }

    #[test]
    fn test_tampered_transaction_is_not_mined() {
        let (blockchain, _dir, _) = create_test_blockchain().unwrap();
        let (wallets, addresses) = create_test_wallets(1).unwrap();
        let wallet = wallets.get_wallet(&addresses[0]).unwrap();

        // The genesis output belongs to the chain's test address, not this wallet
        let genesis_block = blockchain.iterator().last().unwrap().unwrap();
        let genesis = &genesis_block.get_transactions()[0];
        let input = crate::core::TXInput::new(genesis.get_id(), 0, wallet.get_public_key());
        let output = crate::core::TXOutput::new(10, &addresses[0]).unwrap();
        let mut tx = Transaction::new(vec![input], vec![output]).unwrap();
        blockchain.sign_transaction(&mut tx, wallet.get_pkcs8()).unwrap();

        let height = blockchain.get_best_height().unwrap();
        assert!(matches!(
            blockchain.mine_block(&[tx]),
            Err(BlockchainError::InvalidSignature(_))
        ));
        assert_eq!(blockchain.get_best_height().unwrap(), height);
    }

    #[test]
    fn test_iterator_surfaces_missing_block() {
        let (blockchain, _dir, _) = create_test_blockchain().unwrap();
        let tip = blockchain.get_tip_hash();
        blockchain.blocks_tree().unwrap().remove(&tip).unwrap();

        let mut iter = blockchain.iterator();
        assert!(matches!(iter.next(), Some(Err(BlockchainError::Storage(_)))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_forged_id_cannot_replace_foreign_outputs() {
        let (blockchain, _dir, wallets, alice) = crate::testnet::create_funded_chain().unwrap();
        let (_, others) = create_test_wallets(2).unwrap();
        let (bob, carol) = (&others[0], &others[1]);
        let utxo_set = UTXOSet::new(blockchain.clone());

        let bob_reward = Transaction::new_coinbase_tx(bob, "").unwrap();
        blockchain.mine_block(&[bob_reward.clone()]).unwrap();
        let snapshot = utxo_set.snapshot().unwrap();

        let sender = wallets.get_wallet(&alice).unwrap();
        let mut transfer =
            Transaction::new_utxo_transaction(sender, carol, 3, &utxo_set).unwrap();
        transfer.set_id(bob_reward.get_id());
        assert!(blockchain.verify_transaction(&transfer).unwrap());

        assert!(matches!(
            blockchain.mine_block(&[transfer]),
            Err(BlockchainError::InvalidTransaction(_))
        ));
        assert_eq!(utxo_set.snapshot().unwrap(), snapshot);
        assert_eq!(utxo_set.get_address_balance(bob).unwrap(), 10);
        assert_eq!(blockchain.get_best_height().unwrap(), 1);
    }

    #[test]
    fn test_reward_reusing_genesis_id_is_rejected() {
        let (blockchain, _dir, address) = create_test_blockchain().unwrap();
        let duplicate = Transaction::new_coinbase_tx(&address, GENESIS_COINBASE_DATA).unwrap();
        assert!(matches!(
            blockchain.mine_block(&[duplicate]),
            Err(BlockchainError::InvalidTransaction(_))
        ));
        assert_eq!(blockchain.get_best_height().unwrap(), 0);
    }

    #[test]
    fn test_spent_transaction_id_stays_taken() {
        let (blockchain, _dir, wallets, alice) = crate::testnet::create_funded_chain().unwrap();
        let (_, others) = create_test_wallets(1).unwrap();
        let utxo_set = UTXOSet::new(blockchain.clone());
        let reward = Transaction::new_coinbase_tx(&alice, "fixed memo").unwrap();
        blockchain.mine_block(&[reward.clone()]).unwrap();

        // Spend everything so the reward leaves the index but stays on the chain
        let sender = wallets.get_wallet(&alice).unwrap();
        let transfer =
            Transaction::new_utxo_transaction(sender, &others[0], 20, &utxo_set).unwrap();
        blockchain.mine_block(&[transfer]).unwrap();
        assert!(!utxo_set.has_transaction(reward.get_id()).unwrap());

        let again = Transaction::new_coinbase_tx(&alice, "fixed memo").unwrap();
        assert!(matches!(
            blockchain.mine_block(&[again]),
            Err(BlockchainError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_repeated_id_within_block_is_rejected() {
        let (blockchain, _dir, address) = create_test_blockchain().unwrap();
        let reward = Transaction::new_coinbase_tx(&address, "twice").unwrap();
        assert!(matches!(
            blockchain.mine_block(&[reward.clone(), reward]),
            Err(BlockchainError::InvalidTransaction(_))
        ));
        assert_eq!(blockchain.get_best_height().unwrap(), 0);
    }

    #[test]
    fn test_append_on_stale_tip_is_aborted() {
        let (blockchain, _dir, address) = create_test_blockchain().unwrap();
        let stale_tip = blockchain.get_tip_hash();
        let other_writer = blockchain.clone();
        other_writer
            .mine_block(&[Transaction::new_coinbase_tx(&address, "").unwrap()])
            .unwrap();

        let utxo_set = UTXOSet::new(blockchain.clone());
        let tip = blockchain.get_tip_hash();
        let snapshot = utxo_set.snapshot().unwrap();

        let late = Block::new_block(
            stale_tip.clone(),
            &[Transaction::new_coinbase_tx(&address, "").unwrap()],
            1,
            TEST_TARGET_BITS,
        )
        .unwrap();
        let utxo_tree = blockchain.get_db().open_tree(UTXO_TREE).unwrap();
        let result = Blockchain::append_block(
            &blockchain.blocks_tree().unwrap(),
            &utxo_tree,
            &late,
            Some(stale_tip.as_slice()),
        );

        assert!(matches!(result, Err(BlockchainError::InvalidBlock(_))));
        assert_eq!(blockchain.get_best_height().unwrap(), 1);
        assert_eq!(blockchain.get_tip_hash(), tip);
        assert_eq!(utxo_set.snapshot().unwrap(), snapshot);
        assert!(blockchain.get_block(late.get_hash()).unwrap().is_none());
    }
}
