use crate::core::{MerkleProof, MerkleTree, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, deserialize, serialize};
use data_encoding::HEXLOWER;
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    timestamp: i64,
    pre_block_hash: Vec<u8>, // Empty for the genesis block
    hash: Vec<u8>,
    transactions: Vec<Transaction>,
    nonce: i64,
    height: usize, // Not part of the mined header; chain walks check it against linkage
    difficulty: u32,      // Target bits the block was mined at
    merkle_root: Vec<u8>, // Merkle root of all transaction ids
}

impl Block {
    /// Assembles a block on top of `pre_block_hash` and mines it.
    pub fn new_block(
        pre_block_hash: Vec<u8>,
        transactions: &[Transaction],
        height: usize,
        difficulty: u32,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let merkle_root = Self::calculate_merkle_root(transactions)?;

        let mut block = Block {
            timestamp: current_timestamp()?,
            pre_block_hash,
            hash: vec![],
            transactions: transactions.to_vec(),
            nonce: 0,
            height,
            difficulty,
            merkle_root,
        };

        info!("Starting proof-of-work for block at height {height} with difficulty {difficulty}");
        let (nonce, hash) = ProofOfWork::new_proof_of_work(&block).run()?;
        block.nonce = nonce;
        block.hash = hash;
        info!(
            "Proof-of-work completed for block: {} (nonce: {nonce})",
            block.get_hash_hex()
        );

        Ok(block)
    }

    pub fn generate_genesis_block(transaction: &Transaction, difficulty: u32) -> Result<Block> {
        Block::new_block(vec![], &[transaction.clone()], 0, difficulty)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> &[u8] {
        self.pre_block_hash.as_slice()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_hash_hex(&self) -> String {
        HEXLOWER.encode(&self.hash)
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_height(&self) -> usize {
        self.height
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_merkle_root(&self) -> &[u8] {
        &self.merkle_root
    }

    pub fn get_nonce(&self) -> i64 {
        self.nonce
    }

    pub fn is_genesis(&self) -> bool {
        self.pre_block_hash.is_empty()
    }

    fn calculate_merkle_root(transactions: &[Transaction]) -> Result<Vec<u8>> {
        let transaction_hashes: Vec<Vec<u8>> =
            transactions.iter().map(|tx| tx.get_id().to_vec()).collect();

        MerkleTree::calculate_merkle_root(&transaction_hashes)
    }

    /// Verify that the block's Merkle root matches its transactions
    pub fn verify_merkle_root(&self) -> Result<bool> {
        let calculated_root = Self::calculate_merkle_root(&self.transactions)?;
        Ok(calculated_root == self.merkle_root)
    }

    /// Generate a Merkle proof for a transaction in this block
    pub fn generate_merkle_proof(&self, transaction_index: usize) -> Result<MerkleProof> {
        if transaction_index >= self.transactions.len() {
            return Err(BlockchainError::InvalidBlock(format!(
                "Transaction index {} out of bounds for {} transactions",
                transaction_index,
                self.transactions.len()
            )));
        }

        let merkle_tree = MerkleTree::new(&self.transactions)?;
        merkle_tree.generate_proof(transaction_index)
    }

    /// Verify a Merkle proof against this block's Merkle root
    pub fn verify_merkle_proof(&self, proof: &MerkleProof) -> bool {
        if proof.merkle_root != self.merkle_root {
            return false;
        }

        MerkleTree::verify_proof(proof)
    }

    #[cfg(test)]
    pub(crate) fn with_height_for_test(&self, height: usize) -> Block {
        Block {
            height,
            ..self.clone()
        }
    }

    #[cfg(test)]
    pub(crate) fn with_nonce_for_test(&self, nonce: i64) -> Block {
        Block {
            nonce,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_ADDRESS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    fn coinbase(memo: &str) -> Transaction {
        Transaction::new_coinbase_tx(TEST_ADDRESS, memo).unwrap()
    }

    #[test]
    fn test_empty_block_is_rejected() {
        assert!(matches!(
            Block::new_block(vec![], &[], 0, 8),
            Err(BlockchainError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_genesis_block() {
        let block = Block::generate_genesis_block(&coinbase("genesis"), 8).unwrap();
        assert!(block.is_genesis());
        assert_eq!(block.get_height(), 0);
        assert_eq!(block.get_difficulty(), 8);
        assert_eq!(block.get_hash().len(), 32);
        assert!(ProofOfWork::validate(&block));
        assert!(block.verify_merkle_root().unwrap());
    }

    #[test]
    fn test_block_links_to_previous() {
        let genesis = Block::generate_genesis_block(&coinbase("genesis"), 8).unwrap();
        let next =
            Block::new_block(genesis.get_hash().to_vec(), &[coinbase("next")], 1, 8).unwrap();
        assert_eq!(next.get_pre_block_hash(), genesis.get_hash());
        assert!(!next.is_genesis());
        assert!(ProofOfWork::validate(&next));
    }

    #[test]
    fn test_height_is_outside_the_header() {
        let block = Block::new_block(vec![], &[coinbase("h")], 1, 8).unwrap();
        assert!(ProofOfWork::validate(&block.with_height_for_test(9)));
    }

    #[test]
    fn test_serialization_preserves_block() {
        let block = Block::new_block(vec![7; 32], &[coinbase("a"), coinbase("b")], 3, 8).unwrap();
        let decoded = Block::deserialize(&block.serialize().unwrap()).unwrap();
        assert_eq!(decoded, block);
        assert!(ProofOfWork::validate(&decoded));
    }

    #[test]
    fn test_deserialize_garbage_fails() {
        assert!(matches!(
            Block::deserialize(&[0xff, 0x01]),
            Err(BlockchainError::MalformedEncoding(_))
        ));
    }

    #[test]
    fn test_merkle_proofs_for_every_transaction() {
        let txs: Vec<Transaction> = (0..3).map(|i| coinbase(&format!("tx {i}"))).collect();
        let block = Block::new_block(vec![], &txs, 0, 4).unwrap();

        for index in 0..txs.len() {
            let proof = block.generate_merkle_proof(index).unwrap();
            assert!(block.verify_merkle_proof(&proof));
        }
        assert!(block.generate_merkle_proof(3).is_err());
    }

    #[test]
    fn test_proof_from_other_block_is_rejected() {
        let a = Block::new_block(vec![], &[coinbase("a")], 0, 4).unwrap();
        let b = Block::new_block(vec![], &[coinbase("b")], 0, 4).unwrap();
        let proof = a.generate_merkle_proof(0).unwrap();
        assert!(!b.verify_merkle_proof(&proof));
    }
}
