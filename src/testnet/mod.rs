//! Helpers for tests: throwaway chains and key stores at low difficulty.

pub mod test_utils;

pub use test_utils::*;
