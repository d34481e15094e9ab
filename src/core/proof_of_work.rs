use crate::core::Block;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::{debug, info};
use num_bigint::{BigInt, Sign};
use std::ops::ShlAssign;

const MAX_NONCE: i64 = i64::MAX;

// How often the nonce search reports progress
const PROGRESS_INTERVAL: i64 = 100_000;

/// Nonce search over a block header.
///
/// The header is `prev_hash || merkle_root || hex(timestamp) || hex(bits) || hex(nonce)`
/// and a nonce wins when `sha256(header) < 2^(256 - bits)`.
pub struct ProofOfWork<'a> {
    block: &'a Block,
    target: BigInt,
    difficulty: u32,
}

impl<'a> ProofOfWork<'a> {
    pub fn new_proof_of_work(block: &'a Block) -> ProofOfWork<'a> {
        let difficulty = block.get_difficulty();
        ProofOfWork {
            block,
            target: Self::target_for(difficulty),
            difficulty,
        }
    }

    pub fn target_for(difficulty: u32) -> BigInt {
        let mut target = BigInt::from(1);
        target.shl_assign(256 - difficulty.min(256));
        target
    }

    pub fn get_target(&self) -> &BigInt {
        &self.target
    }

    /// Recomputes the digest at the block's stored nonce; true iff it is under
    /// the target and matches the stored hash.
    pub fn validate(block: &Block) -> bool {
        let pow = ProofOfWork::new_proof_of_work(block);
        let hash = sha256_digest(pow.prepare_data(block.get_nonce()).as_slice());
        pow.meets_target(&hash) && hash.as_slice() == block.get_hash()
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigInt::from_bytes_be(Sign::Plus, hash) < self.target
    }

    fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        let mut data_bytes = vec![];
        data_bytes.extend(self.block.get_pre_block_hash());
        data_bytes.extend(self.block.get_merkle_root());
        data_bytes.extend(int_to_hex(self.block.get_timestamp()));
        data_bytes.extend(int_to_hex(i64::from(self.difficulty)));
        data_bytes.extend(int_to_hex(nonce));
        data_bytes
    }

    /// Searches nonces 0, 1, 2, ... and returns the first winning (nonce, hash).
    pub fn run(&self) -> Result<(i64, Vec<u8>)> {
        info!(
            "Mining block containing {} transactions",
            self.block.get_transactions().len()
        );
        let mut nonce = 0;
        while nonce < MAX_NONCE {
            let hash = sha256_digest(self.prepare_data(nonce).as_slice());
            if self.meets_target(&hash) {
                debug!("Found nonce {nonce}: {}", HEXLOWER.encode(&hash));
                return Ok((nonce, hash));
            }
            if nonce % PROGRESS_INTERVAL == PROGRESS_INTERVAL - 1 {
                debug!("Tried {} nonces, last {}", nonce + 1, HEXLOWER.encode(&hash));
            }
            nonce += 1;
        }
        Err(BlockchainError::Mining(format!(
            "nonce space exhausted at difficulty {}",
            self.difficulty
        )))
    }
}

/// Lowercase base-16 text of an integer, as used in block headers
fn int_to_hex(n: i64) -> Vec<u8> {
    format!("{n:x}").into_bytes()
}
