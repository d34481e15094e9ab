use crate::error::{BlockchainError, Result};
use log::warn;
use once_cell::sync::Lazy;
use std::env;
use std::path::{Path, PathBuf};

pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::new);

pub const DEFAULT_TARGET_BITS: u32 = 16;

static DEFAULT_DATA_DIR: &str = "data";
static DEFAULT_WALLET_FILE: &str = "wallet.dat";

const DATA_DIR_KEY: &str = "LEDGER_DATA_DIR";
const WALLET_FILE_KEY: &str = "LEDGER_WALLET_FILE";
const TARGET_BITS_KEY: &str = "LEDGER_TARGET_BITS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    data_dir: PathBuf,
    wallet_file: PathBuf,
    target_bits: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            wallet_file: PathBuf::from(DEFAULT_WALLET_FILE),
            target_bits: DEFAULT_TARGET_BITS,
        }
    }
}

impl Config {
    /// Loads the configuration from the environment, falling back to the
    /// defaults when a value is unusable.
    pub fn new() -> Config {
        Self::from_env().unwrap_or_else(|e| {
            warn!("{e}; using default configuration");
            Config::default()
        })
    }

    pub fn from_env() -> Result<Config> {
        let mut config = Config::default();
        if let Ok(dir) = env::var(DATA_DIR_KEY) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(file) = env::var(WALLET_FILE_KEY) {
            config.wallet_file = PathBuf::from(file);
        }
        if let Ok(bits) = env::var(TARGET_BITS_KEY) {
            let bits = bits.trim().parse::<u32>().map_err(|e| {
                BlockchainError::Config(format!("{TARGET_BITS_KEY}={bits} is not a number: {e}"))
            })?;
            config = config.with_target_bits(bits)?;
        }
        Ok(config)
    }

    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Config {
        self.data_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_wallet_file(mut self, file: impl AsRef<Path>) -> Config {
        self.wallet_file = file.as_ref().to_path_buf();
        self
    }

    /// Sets the number of leading zero bits a block hash must have.
    pub fn with_target_bits(mut self, bits: u32) -> Result<Config> {
        if !(1..256).contains(&bits) {
            return Err(BlockchainError::Config(format!(
                "target bits must be between 1 and 255, got {bits}"
            )));
        }
        self.target_bits = bits;
        Ok(self)
    }

    pub fn get_data_dir(&self) -> &Path {
        self.data_dir.as_path()
    }

    pub fn get_wallet_file(&self) -> &Path {
        self.wallet_file.as_path()
    }

    pub fn get_target_bits(&self) -> u32 {
        self.target_bits
    }
}
