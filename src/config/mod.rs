//! Configuration management
//!
//! Where the chain database and the key store live, and how hard blocks are
//! to mine.

pub mod settings;

pub use settings::{Config, DEFAULT_TARGET_BITS, GLOBAL_CONFIG};
