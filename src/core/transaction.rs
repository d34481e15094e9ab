// This file implements the transaction system - how value moves through the ledger.
// Inputs spend earlier outputs, outputs lock value to a public key hash, and every
// non-coinbase input carries an ECDSA signature over a per-input digest.

use crate::core::SUBSIDY;
use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::utils::{
    deserialize, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, serialize,
    sha256_digest, split_halves,
};
use crate::wallet::{address_to_pub_key_hash, hash_pub_key, validate_address, Wallet};
use data_encoding::HEXLOWER;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Output index carried by the placeholder input of a coinbase transaction
pub const COINBASE_VOUT: i64 = -1;

// A transaction input references an output of an earlier transaction:
// "I want to spend output #2 from transaction ABC123"
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXInput {
    txid: Vec<u8>,      // The ID of the transaction containing the output being spent
    vout: i64,          // Index of the output in that transaction, -1 for coinbase
    signature: Vec<u8>, // r || s over this input's signing digest
    pub_key: Vec<u8>,   // Spender's raw X || Y public key; reward memo on coinbase
}

impl TXInput {
    pub fn new(txid: &[u8], vout: usize, pub_key: &[u8]) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout: vout as i64,
            signature: vec![],
            pub_key: pub_key.to_vec(),
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i64 {
        self.vout
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    /// The referenced output index; negative indices only exist on coinbase inputs.
    pub fn output_index(&self) -> Result<usize> {
        usize::try_from(self.vout).map_err(|_| {
            BlockchainError::InvalidTransaction(format!(
                "input references negative output index {}",
                self.vout
            ))
        })
    }

    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        let locking_hash = hash_pub_key(self.pub_key.as_slice());
        locking_hash.eq(pub_key_hash)
    }
}

// A transaction output locks value to the hash of a public key:
// "Pay 10 coins to whoever can sign for pub key hash XYZ"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        let mut output = TXOutput {
            value,
            pub_key_hash: vec![],
        };
        output.lock(address)?;
        Ok(output)
    }

    pub fn with_pub_key_hash(value: u64, pub_key_hash: &[u8]) -> TXOutput {
        TXOutput {
            value,
            pub_key_hash: pub_key_hash.to_vec(),
        }
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    fn lock(&mut self, address: &str) -> Result<()> {
        self.pub_key_hash = address_to_pub_key_hash(address)?;
        Ok(())
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: Vec<u8>,         // sha256 of the encoding with this field emptied
    vin: Vec<TXInput>,   // What is being spent
    vout: Vec<TXOutput>, // Where the value goes
}

impl Transaction {
    /// Builds a transaction from its inputs and outputs and computes its id.
    pub fn new(vin: Vec<TXInput>, vout: Vec<TXOutput>) -> Result<Transaction> {
        let mut tx = Transaction {
            id: vec![],
            vin,
            vout,
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Reward transaction paying `SUBSIDY` to `to`.
    ///
    /// An empty `data` becomes a "Reward to" memo with a random suffix so two
    /// rewards to the same address never share an id.
    pub fn new_coinbase_tx(to: &str, data: &str) -> Result<Transaction> {
        let memo = if data.is_empty() {
            format!("Reward to '{to}' {}", Uuid::new_v4())
        } else {
            data.to_string()
        };

        let txout = TXOutput::new(SUBSIDY, to)?;
        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: vec![],
            pub_key: memo.into_bytes(),
        };

        Transaction::new(vec![tx_input], vec![txout])
    }

    /// Builds and signs a transfer of `amount` from `wallet` to `to`, spending
    /// outputs found in the UTXO index and returning any change to the sender.
    pub fn new_utxo_transaction(
        wallet: &Wallet,
        to: &str,
        amount: u64,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::InvalidTransaction(
                "Amount must be positive".to_string(),
            ));
        }

        if !validate_address(to) {
            return Err(BlockchainError::InvalidAddress(to.to_string()));
        }

        let public_key_hash = hash_pub_key(wallet.get_public_key());
        let (accumulated, valid_outputs) =
            utxo_set.find_spendable_outputs(public_key_hash.as_slice(), amount)?;

        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = vec![];
        for (txid_hex, outs) in valid_outputs {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::MalformedEncoding(format!("Invalid transaction ID: {e}"))
            })?;
            for out in outs {
                inputs.push(TXInput::new(&txid, out, wallet.get_public_key()));
            }
        }

        let mut outputs = vec![TXOutput::new(amount, to)?];
        if accumulated > amount {
            outputs.push(TXOutput::with_pub_key_hash(
                accumulated - amount,
                &public_key_hash,
            ));
        }

        let mut tx = Transaction::new(inputs, outputs)?;
        utxo_set
            .get_blockchain()
            .sign_transaction(&mut tx, wallet.get_pkcs8())?;
        Ok(tx)
    }

    /// Copy with every input's signature and public key cleared: the common
    /// basis for signing and verification digests.
    pub fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .vin
            .iter()
            .map(|input| TXInput {
                txid: input.txid.clone(),
                vout: input.vout,
                signature: vec![],
                pub_key: vec![],
            })
            .collect();
        Transaction {
            id: self.id.clone(),
            vin: inputs,
            vout: self.vout.clone(),
        }
    }

    // The output referenced by `vin`, looked up in the prior-transaction context
    fn referenced_output<'a>(
        vin: &TXInput,
        prev_txs: &'a HashMap<String, Transaction>,
    ) -> Result<&'a TXOutput> {
        let txid_hex = HEXLOWER.encode(vin.get_txid());
        let prev_tx = prev_txs
            .get(&txid_hex)
            .ok_or(BlockchainError::TransactionNotFound(txid_hex.clone()))?;
        let index = vin.output_index()?;
        prev_tx.vout.get(index).ok_or_else(|| {
            BlockchainError::InvalidTransaction(format!(
                "output index {index} out of range for transaction {txid_hex}"
            ))
        })
    }

    // Digest signed by input `idx`: the trimmed copy's id with that input's
    // public key slot holding the referenced output's pub key hash
    fn signing_digest(
        tx_copy: &mut Transaction,
        idx: usize,
        prev_output: &TXOutput,
    ) -> Result<Vec<u8>> {
        tx_copy.vin[idx].signature = vec![];
        tx_copy.vin[idx].pub_key = prev_output.pub_key_hash.clone();
        let digest = tx_copy.hash();
        tx_copy.vin[idx].pub_key = vec![];
        tx_copy.id = digest?;
        Ok(tx_copy.id.clone())
    }

    /// Signs every input with `pkcs8`. Coinbase transactions are left unsigned.
    pub fn sign(&mut self, pkcs8: &[u8], prev_txs: &HashMap<String, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let mut tx_copy = self.trimmed_copy();
        for idx in 0..self.vin.len() {
            let prev_output = Self::referenced_output(&self.vin[idx], prev_txs)?;
            let digest = Self::signing_digest(&mut tx_copy, idx, prev_output)?;
            self.vin[idx].signature = ecdsa_p256_sha256_sign_digest(pkcs8, &digest)?;
        }
        Ok(())
    }

    /// Checks every input's signature against the digest the signer would have
    /// produced. A missing prior transaction or an unsplittable signature/key is
    /// an error; a signature that does not check out is `Ok(false)`.
    pub fn verify(&self, prev_txs: &HashMap<String, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        let mut tx_copy = self.trimmed_copy();
        for (idx, vin) in self.vin.iter().enumerate() {
            let prev_output = Self::referenced_output(vin, prev_txs)?;
            let digest = Self::signing_digest(&mut tx_copy, idx, prev_output)?;

            let (r, s) = split_halves(vin.get_signature(), "signature")?;
            let (x, y) = split_halves(vin.get_pub_key(), "public key")?;

            if !vin.uses_key(prev_output.get_pub_key_hash()) {
                debug!("Input {idx} public key does not own the referenced output");
                return Ok(false);
            }
            if !ecdsa_p256_sha256_sign_verify(x, y, r, s, &digest) {
                debug!("Input {idx} signature does not match");
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    /// Canonical encoding of everything except the id field
    pub fn canonical_bytes_excluding_id(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        tx_copy.serialize()
    }

    pub fn hash(&self) -> Result<Vec<u8>> {
        Ok(sha256_digest(&self.canonical_bytes_excluding_id()?))
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }

    #[cfg(test)]
    pub(crate) fn set_id(&mut self, id: &[u8]) {
        self.id = id.to_vec();
    }

    #[cfg(test)]
    pub(crate) fn vout_mut(&mut self) -> &mut Vec<TXOutput> {
        &mut self.vout
    }

    #[cfg(test)]
    pub(crate) fn vin_mut(&mut self) -> &mut Vec<TXInput> {
        &mut self.vin
    }
}

#[cfg(test)]
impl TXOutput {
    pub(crate) fn set_value(&mut self, value: u64) {
        self.value = value;
    }

    pub(crate) fn set_pub_key_hash(&mut self, pub_key_hash: &[u8]) {
        self.pub_key_hash = pub_key_hash.to_vec();
    }
}

#[cfg(test)]
impl TXInput {
    pub(crate) fn set_signature(&mut self, signature: Vec<u8>) {
        self.signature = signature;
    }

    pub(crate) fn set_pub_key(&mut self, pub_key: Vec<u8>) {
        self.pub_key = pub_key;
    }
}
