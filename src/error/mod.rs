//! Error handling for the ledger
//!
//! Validation failures (bad signature, missing funds, bad address) are kept
//! apart from storage and encoding failures so callers can tell a rejected
//! request from a broken node.

use sled::transaction::TransactionError;
use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    /// A chain already exists at the configured location
    ChainAlreadyExists(String),
    /// No chain exists at the configured location
    ChainNotFound(String),
    /// A referenced transaction id is not in the chain
    TransactionNotFound(String),
    /// The sender's spendable outputs do not cover the amount
    InsufficientFunds { required: u64, available: u64 },
    /// A transaction failed signature verification
    InvalidSignature(String),
    /// Address failed base58 or checksum validation
    InvalidAddress(String),
    /// The persistent store failed
    Storage(String),
    /// Stored or supplied bytes could not be decoded
    MalformedEncoding(String),
    /// Structurally invalid transaction (bad index, zero amount, ...)
    InvalidTransaction(String),
    /// An input references an output that is not currently unspent
    OutputAlreadySpent { txid: String, vout: usize },
    /// Block construction or validation errors
    InvalidBlock(String),
    /// No key pair stored for the address
    WalletNotFound(String),
    /// Key generation or signing failed
    Crypto(String),
    /// Nonce space exhausted without meeting the target
    Mining(String),
    /// Invalid configuration value
    Config(String),
    /// File I/O errors
    Io(String),
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::ChainAlreadyExists(path) => {
                write!(f, "Blockchain already exists at {path}")
            }
            BlockchainError::ChainNotFound(path) => {
                write!(f, "No existing blockchain found at {path}. Create one first.")
            }
            BlockchainError::TransactionNotFound(txid) => {
                write!(f, "Transaction not found: {txid}")
            }
            BlockchainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            BlockchainError::InvalidSignature(msg) => write!(f, "Invalid signature: {msg}"),
            BlockchainError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            BlockchainError::Storage(msg) => write!(f, "Storage error: {msg}"),
            BlockchainError::MalformedEncoding(msg) => write!(f, "Malformed encoding: {msg}"),
            BlockchainError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {msg}"),
            BlockchainError::OutputAlreadySpent { txid, vout } => {
                write!(f, "Output {txid}:{vout} is not spendable")
            }
            BlockchainError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            BlockchainError::WalletNotFound(addr) => {
                write!(f, "Wallet not found for address: {addr}")
            }
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::Mining(msg) => write!(f, "Mining error: {msg}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl BlockchainError {
    /// True for rejections caused by the request rather than by the node
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BlockchainError::InsufficientFunds { .. }
                | BlockchainError::InvalidSignature(_)
                | BlockchainError::InvalidAddress(_)
                | BlockchainError::InvalidTransaction(_)
                | BlockchainError::OutputAlreadySpent { .. }
                | BlockchainError::TransactionNotFound(_)
                | BlockchainError::WalletNotFound(_)
        )
    }
}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Storage(err.to_string())
    }
}

impl From<TransactionError<BlockchainError>> for BlockchainError {
    fn from(err: TransactionError<BlockchainError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => BlockchainError::Storage(e.to_string()),
        }
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::MalformedEncoding(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::MalformedEncoding(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_distinct_from_storage() {
        let funds = BlockchainError::InsufficientFunds {
            required: 100,
            available: 4,
        };
        assert!(funds.is_validation());
        assert!(BlockchainError::InvalidSignature("tx".to_string()).is_validation());
        assert!(!BlockchainError::Storage("disk".to_string()).is_validation());
        assert!(!BlockchainError::MalformedEncoding("bytes".to_string()).is_validation());
    }

    #[test]
    fn test_transaction_abort_unwraps_inner_error() {
        let err: BlockchainError =
            TransactionError::Abort(BlockchainError::ChainNotFound("data".to_string())).into();
        assert_eq!(err, BlockchainError::ChainNotFound("data".to_string()));
    }

    #[test]
    fn test_display_messages() {
        let err = BlockchainError::InsufficientFunds {
            required: 100,
            available: 4,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: required 100, available 4"
        );
    }
}
