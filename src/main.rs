// Entry point for the ledger CLI. Every command opens what it needs (key store,
// chain) from the global configuration, does one thing and exits.
use clap::Parser;
use data_encoding::HEXLOWER;
use log::{error, LevelFilter};
use proofledger::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Blockchain,
    BlockchainError, Command, Opt, ProofOfWork, Result, UTXOSet, Wallets, GLOBAL_CONFIG,
};
use std::process;

fn main() {
    // Info by default, RUST_LOG still wins
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    // Help and version go to stdout and exit 0; real usage errors exit 1
    let opt = match Opt::try_parse() {
        Ok(opt) => opt,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            process::exit(code);
        }
    };

    if let Err(e) = run_command(opt.command) {
        if e.is_validation() {
            error!("Rejected: {e}");
        } else {
            error!("Error: {e}");
        }
        process::exit(1);
    }
}

fn run_command(command: Command) -> Result<()> {
    match command {
        Command::Createchain { address } => {
            if !validate_address(&address) {
                return Err(BlockchainError::InvalidAddress(address));
            }
            // Genesis writes its own UTXO entries, no reindex needed
            Blockchain::create_blockchain(&address, &GLOBAL_CONFIG)?;
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::load(GLOBAL_CONFIG.get_wallet_file())?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            let pub_key_hash = address_to_pub_key_hash(&address)?;
            let blockchain = Blockchain::new_blockchain(&GLOBAL_CONFIG)?;
            let balance = UTXOSet::new(blockchain).get_balance(&pub_key_hash)?;
            println!("Balance of '{address}': {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::load(GLOBAL_CONFIG.get_wallet_file())?;
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::Send { from, to, amount } => {
            if !validate_address(&from) {
                return Err(BlockchainError::InvalidAddress(from));
            }
            if !validate_address(&to) {
                return Err(BlockchainError::InvalidAddress(to));
            }

            let wallets = Wallets::load(GLOBAL_CONFIG.get_wallet_file())?;
            let wallet = wallets.get_wallet(&from)?;
            let blockchain = Blockchain::new_blockchain(&GLOBAL_CONFIG)?;
            UTXOSet::new(blockchain).send(wallet, &to, amount)?;
            println!("Success!")
        }
        Command::Printchain => print_chain()?,
        Command::Reindexutxo => {
            let blockchain = Blockchain::new_blockchain(&GLOBAL_CONFIG)?;
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
    }
    Ok(())
}

fn print_chain() -> Result<()> {
    let blockchain = Blockchain::new_blockchain(&GLOBAL_CONFIG)?;
    for block in blockchain.iterator() {
        let block = block?;
        println!("============ Block {} ============", block.get_hash_hex());
        println!("Height: {}", block.get_height());
        println!("Prev. block: {}", HEXLOWER.encode(block.get_pre_block_hash()));
        println!("Timestamp: {}", block.get_timestamp());
        println!("Nonce: {}", block.get_nonce());
        println!("PoW: {}", ProofOfWork::validate(&block));

        for tx in block.get_transactions() {
            println!("- Transaction {}", HEXLOWER.encode(tx.get_id()));
            if tx.is_coinbase() {
                let memo = String::from_utf8_lossy(tx.get_vin()[0].get_pub_key());
                println!("-- Coinbase: {memo}");
            } else {
                for input in tx.get_vin() {
                    let pub_key_hash = hash_pub_key(input.get_pub_key());
                    println!(
                        "-- Input txid = {}, vout = {}, from = {}",
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout(),
                        convert_address(&pub_key_hash),
                    )
                }
            }
            for output in tx.get_vout() {
                println!(
                    "-- Output value = {}, to = {}",
                    output.get_value(),
                    convert_address(output.get_pub_key_hash()),
                )
            }
        }
        println!()
    }
    Ok(())
}
