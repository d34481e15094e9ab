//! Monetary constants
//!
//! Every coinbase pays a flat subsidy; there is no halving schedule and no
//! transaction fee.

/// Reward paid by every coinbase transaction
pub const SUBSIDY: u64 = 10;

/// Memo carried by the genesis coinbase input
pub const GENESIS_COINBASE_DATA: &str = "Genesis block of the proofledger chain";
