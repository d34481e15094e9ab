use crate::core::{Block, Blockchain, TXOutput, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::{hash_pub_key, Wallet};
use data_encoding::HEXLOWER;
use log::info;
use serde::{Deserialize, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionResult,
    TransactionalTree,
};
use sled::Tree;
use std::collections::BTreeMap;

pub(crate) const UTXO_TREE: &str = "chainstate";

/// An unspent output together with its position in the owning transaction.
/// Positions survive removals, so an input's `vout` always finds the right entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct UnspentOutput {
    index: usize,
    output: TXOutput,
}

impl UnspentOutput {
    pub fn new(index: usize, output: TXOutput) -> UnspentOutput {
        UnspentOutput { index, output }
    }

    pub fn get_index(&self) -> usize {
        self.index
    }

    pub fn get_output(&self) -> &TXOutput {
        &self.output
    }
}

/// The UTXO index: transaction id -> its outputs nobody has spent yet.
///
/// It is a cache over the chain. `reindex` rebuilds it from a full scan and
/// every mined block keeps it current through `apply_block`.
pub struct UTXOSet {
    blockchain: Blockchain,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet { blockchain }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    fn utxo_tree(&self) -> Result<Tree> {
        Ok(self.blockchain.get_db().open_tree(UTXO_TREE)?)
    }

    // Walks every index entry in key order
    fn for_each_entry<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], Vec<UnspentOutput>) -> bool,
    {
        for item in self.utxo_tree()?.iter() {
            let (k, v) = item?;
            let outs: Vec<UnspentOutput> = deserialize(v.as_ref())?;
            if !visit(k.as_ref(), outs) {
                break;
            }
        }
        Ok(())
    }

    /// Accumulates outputs locked to `pub_key_hash` until `amount` is covered.
    /// Returns the accumulated value and the chosen output indices per hex txid.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, BTreeMap<String, Vec<usize>>)> {
        let mut unspent_outputs: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut accumulated = 0u64;

        self.for_each_entry(|txid, outs| {
            let txid_hex = HEXLOWER.encode(txid);
            for unspent in outs {
                if accumulated >= amount {
                    break;
                }
                if unspent.output.is_locked_with_key(pub_key_hash) {
                    accumulated += unspent.output.get_value();
                    unspent_outputs
                        .entry(txid_hex.clone())
                        .or_default()
                        .push(unspent.index);
                }
            }
            accumulated < amount
        })?;

        Ok((accumulated, unspent_outputs))
    }

    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let mut utxos = vec![];
        self.for_each_entry(|_, outs| {
            utxos.extend(
                outs.into_iter()
                    .filter(|unspent| unspent.output.is_locked_with_key(pub_key_hash))
                    .map(|unspent| unspent.output),
            );
            true
        })?;
        Ok(utxos)
    }

    pub fn get_balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        Ok(self
            .find_utxo(pub_key_hash)?
            .iter()
            .map(TXOutput::get_value)
            .sum())
    }

    /// Number of transactions that still have unspent outputs
    pub fn count_transactions(&self) -> Result<usize> {
        let mut counter = 0;
        for item in self.utxo_tree()?.iter() {
            item?;
            counter += 1;
        }
        Ok(counter)
    }

    pub fn is_unspent(&self, txid: &[u8], vout: usize) -> Result<bool> {
        match self.utxo_tree()?.get(txid)? {
            Some(bytes) => {
                let outs: Vec<UnspentOutput> = deserialize(bytes.as_ref())?;
                Ok(outs.iter().any(|unspent| unspent.index == vout))
            }
            None => Ok(false),
        }
    }

    pub fn has_transaction(&self, txid: &[u8]) -> Result<bool> {
        Ok(self.utxo_tree()?.contains_key(txid)?)
    }

    /// The whole index keyed by hex txid
    pub fn snapshot(&self) -> Result<BTreeMap<String, Vec<UnspentOutput>>> {
        let mut entries = BTreeMap::new();
        self.for_each_entry(|txid, outs| {
            entries.insert(HEXLOWER.encode(txid), outs);
            true
        })?;
        Ok(entries)
    }

    /// Drops every entry from the index.
    pub fn clear(&self) -> Result<()> {
        self.utxo_tree()?.clear()?;
        Ok(())
    }

    /// Rebuilds the index from a full chain scan, replacing the old entries in
    /// one transaction.
    pub fn reindex(&self) -> Result<()> {
        let utxo_tree = self.utxo_tree()?;
        let utxo_map = self.blockchain.find_utxo()?;

        let mut entries = Vec::with_capacity(utxo_map.len());
        for (txid_hex, outs) in &utxo_map {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::MalformedEncoding(format!("Invalid transaction ID: {e}"))
            })?;
            entries.push((txid, serialize(outs)?));
        }
        let stale_keys = utxo_tree
            .iter()
            .keys()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let result: TransactionResult<(), BlockchainError> = utxo_tree.transaction(|utxo| {
            for key in &stale_keys {
                utxo.remove(key.clone())?;
            }
            for (txid, outs) in &entries {
                utxo.insert(txid.as_slice(), outs.as_slice())?;
            }
            Ok(())
        });
        result?;

        info!(
            "Reindexed UTXO set: {} transactions with unspent outputs",
            entries.len()
        );
        Ok(())
    }

    /// Applies `block` to the index on its own. Mined blocks already go through
    /// `apply_block` as part of the chain append.
    pub fn update(&self, block: &Block) -> Result<()> {
        let result: TransactionResult<(), BlockchainError> = self
            .utxo_tree()?
            .transaction(|utxo| Self::apply_block(utxo, block));
        result?;
        info!(
            "Applied block {} to UTXO set",
            block.get_hash_hex()
        );
        Ok(())
    }

    /// Index changes for one block, per transaction: remove the outputs its inputs
    /// spend, then add its own outputs. An input pointing at an output that is not
    /// in the index, or a transaction id that already has an entry, aborts the
    /// whole transaction.
    pub(crate) fn apply_block(
        utxo: &TransactionalTree,
        block: &Block,
    ) -> ConflictableTransactionResult<(), BlockchainError> {
        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                for vin in tx.get_vin() {
                    Self::spend_output(utxo, vin.get_txid(), vin.get_vout())?;
                }
            }

            let new_outputs: Vec<UnspentOutput> = tx
                .get_vout()
                .iter()
                .enumerate()
                .map(|(idx, out)| UnspentOutput::new(idx, out.clone()))
                .collect();
            if utxo.get(tx.get_id())?.is_some() {
                return Err(ConflictableTransactionError::Abort(
                    BlockchainError::InvalidTransaction(format!(
                        "transaction {} already has unspent outputs",
                        HEXLOWER.encode(tx.get_id())
                    )),
                ));
            }
            let outs_bytes = serialize(&new_outputs).map_err(ConflictableTransactionError::Abort)?;
            utxo.insert(tx.get_id(), outs_bytes)?;
        }
        Ok(())
    }

    fn spend_output(
        utxo: &TransactionalTree,
        txid: &[u8],
        vout: i64,
    ) -> ConflictableTransactionResult<(), BlockchainError> {
        let already_spent = || {
            ConflictableTransactionError::Abort(BlockchainError::OutputAlreadySpent {
                txid: HEXLOWER.encode(txid),
                vout: usize::try_from(vout).unwrap_or_default(),
            })
        };

        let outs_bytes = utxo.get(txid)?.ok_or_else(already_spent)?;
        let mut outs: Vec<UnspentOutput> =
            deserialize(outs_bytes.as_ref()).map_err(ConflictableTransactionError::Abort)?;

        let before = outs.len();
        outs.retain(|unspent| i64::try_from(unspent.index).ok() != Some(vout));
        if outs.len() == before {
            return Err(already_spent());
        }

        if outs.is_empty() {
            utxo.remove(txid)?;
        } else {
            let outs_bytes = serialize(&outs).map_err(ConflictableTransactionError::Abort)?;
            utxo.insert(txid, outs_bytes)?;
        }
        Ok(())
    }

    /// Sends `amount` from `wallet` to `to`: mines a block holding a reward to the
    /// sender followed by the signed transfer.
    pub fn send(&self, wallet: &Wallet, to: &str, amount: u64) -> Result<Block> {
        let transfer = Transaction::new_utxo_transaction(wallet, to, amount, self)?;
        let coinbase = Transaction::new_coinbase_tx(&wallet.get_address(), "")?;
        let block = self.blockchain.mine_block(&[coinbase, transfer])?;
        info!(
            "Sent {amount} from {} to {to} in block {}",
            wallet.get_address(),
            block.get_hash_hex()
        );
        Ok(block)
    }

    /// Balance of an address, validating it first.
    pub fn get_address_balance(&self, address: &str) -> Result<u64> {
        let pub_key_hash = crate::wallet::address_to_pub_key_hash(address)?;
        self.get_balance(&pub_key_hash)
    }

    pub fn get_wallet_balance(&self, wallet: &Wallet) -> Result<u64> {
        self.get_balance(&hash_pub_key(wallet.get_public_key()))
    }
}
