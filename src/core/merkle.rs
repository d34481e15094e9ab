use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use serde::{Deserialize, Serialize};

/// Merkle tree over a block's transaction ids.
///
/// Leaves are `sha256(txid)`, parents are `sha256(left || right)`, and any
/// level with an odd number of nodes duplicates its last node before pairing.
/// A single-transaction tree therefore has root `sha256(leaf || leaf)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleTree {
    // levels[0] holds the padded leaf digests, the last level holds the root
    levels: Vec<Vec<Vec<u8>>>,
    leaf_count: usize,
}

/// Merkle proof for transaction verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Leaf digest being proven
    pub transaction_hash: Vec<u8>,
    /// Merkle root hash
    pub merkle_root: Vec<u8>,
    /// Sibling hashes from leaf to root
    pub proof_path: Vec<ProofElement>,
    /// Index of the transaction in the block
    pub transaction_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofElement {
    /// Sibling hash
    pub hash: Vec<u8>,
    /// Direction: true if sibling is on the right, false if on the left
    pub is_right: bool,
}

impl MerkleTree {
    /// Create a new Merkle tree from a list of transactions
    pub fn new(transactions: &[Transaction]) -> Result<Self> {
        let data: Vec<Vec<u8>> = transactions.iter().map(|tx| tx.get_id().to_vec()).collect();
        Self::from_hashes(&data)
    }

    /// Create a Merkle tree from raw leaf data (transaction ids)
    pub fn from_hashes(data: &[Vec<u8>]) -> Result<Self> {
        if data.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Cannot create Merkle tree from empty transaction list".to_string(),
            ));
        }

        let mut level: Vec<Vec<u8>> = data.iter().map(|d| sha256_digest(d)).collect();
        let mut levels = Vec::new();
        loop {
            if level.len() % 2 != 0 {
                let last = level[level.len() - 1].clone();
                level.push(last);
            }
            let next: Vec<Vec<u8>> = level
                .chunks(2)
                .map(|pair| Self::hash_pair(&pair[0], &pair[1]))
                .collect();
            levels.push(level);
            level = next;
            if level.len() == 1 {
                break;
            }
        }
        levels.push(level);

        Ok(MerkleTree {
            levels,
            leaf_count: data.len(),
        })
    }

    pub fn get_root_hash(&self) -> Vec<u8> {
        // from_hashes always leaves a single-node root level
        self.levels
            .last()
            .and_then(|root| root.first())
            .cloned()
            .unwrap_or_default()
    }

    /// Generate a Merkle proof for the transaction at the given index
    pub fn generate_proof(&self, transaction_index: usize) -> Result<MerkleProof> {
        if transaction_index >= self.leaf_count {
            return Err(BlockchainError::InvalidBlock(format!(
                "Transaction index {} out of bounds (leaves: {})",
                transaction_index, self.leaf_count
            )));
        }

        let mut proof_path = Vec::new();
        let mut index = transaction_index;
        for level in &self.levels[..self.levels.len() - 1] {
            let is_right = index % 2 == 0;
            let sibling = if is_right { index + 1 } else { index - 1 };
            proof_path.push(ProofElement {
                hash: level[sibling].clone(),
                is_right,
            });
            index /= 2;
        }

        Ok(MerkleProof {
            transaction_hash: self.levels[0][transaction_index].clone(),
            merkle_root: self.get_root_hash(),
            proof_path,
            transaction_index,
        })
    }

    /// Verify a Merkle proof
    pub fn verify_proof(proof: &MerkleProof) -> bool {
        let mut current_hash = proof.transaction_hash.clone();

        for element in &proof.proof_path {
            current_hash = if element.is_right {
                Self::hash_pair(&current_hash, &element.hash)
            } else {
                Self::hash_pair(&element.hash, &current_hash)
            };
        }

        current_hash == proof.merkle_root
    }

    fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
        let mut combined = Vec::with_capacity(left.len() + right.len());
        combined.extend_from_slice(left);
        combined.extend_from_slice(right);
        sha256_digest(&combined)
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Root of the tree over `transaction_ids` without keeping the levels
    pub fn calculate_merkle_root(transaction_ids: &[Vec<u8>]) -> Result<Vec<u8>> {
        Ok(Self::from_hashes(transaction_ids)?.get_root_hash())
    }

    /// Verify that a list of transactions produces the expected Merkle root
    pub fn verify_transactions(transactions: &[Transaction], expected_root: &[u8]) -> Result<bool> {
        Ok(Self::new(transactions)?.get_root_hash() == expected_root)
    }
}
