use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use namereg_core::*;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "namereg-cli")]
#[command(about = "Namereg CLI - commit-reveal name claims on an append-only ledger")]
#[command(version = "1.0.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the reservation commitment hash160(nonce ++ name)
    Commitment {
        /// Name to reserve
        #[arg(short, long)]
        name: String,

        /// Nonce in hex
        #[arg(long)]
        nonce: String,
    },

    /// Show the anti-squat fee charged at a height
    Fee {
        #[arg(long)]
        height: u64,
    },

    /// Decode a claim output script
    DecodeScript {
        /// Script in hex
        script: String,
    },

    /// Draw a fresh reservation nonce
    NewNonce,

    /// Run reserve, activate, update on the in-memory ledger and print the views
    Simulate {
        /// Registry configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Name to claim
        #[arg(short, long, default_value = "bob")]
        name: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Commitment { name, nonce } => handle_commitment(name, nonce),
        Commands::Fee { height } => handle_fee(height),
        Commands::DecodeScript { script } => handle_decode_script(script),
        Commands::NewNonce => handle_new_nonce(),
        Commands::Simulate { config, name } => handle_simulate(config, name),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn handle_commitment(name: String, nonce: String) -> anyhow::Result<()> {
    let name = Name::new(name)?;
    let nonce = Nonce::from_hex(&nonce)?;

    println!("Commitment: {}", commit(&nonce, &name));

    Ok(())
}

fn handle_fee(height: u64) -> anyhow::Result<()> {
    let schedule = LinearFeeSchedule::default();
    let raw = schedule.raw_fee(height);

    println!("Raw fee: {}", raw);
    println!("Fee: {}", round_up_to_cent(raw));
    println!("Expiration depth: {}", default_expiration_depth(height));

    Ok(())
}

fn handle_decode_script(script: String) -> anyhow::Result<()> {
    let bytes = hex::decode(script.trim()).context("Invalid hex script")?;
    let (op, destination) = decode_claim_script(&bytes).ok_or_else(|| anyhow!("Not a claim script"))?;

    println!("Operation: {:?}", op.opcode());
    match &op {
        ClaimOp::Reserve { commitment } => println!("Commitment: {}", commitment),
        ClaimOp::Activate { name, nonce, value } => {
            println!("Name: {}", name);
            println!("Nonce: {}", nonce.to_hex());
            println!("Value: {}", String::from_utf8_lossy(value));
        }
        ClaimOp::Update { name, value } => {
            println!("Name: {}", name);
            println!("Value: {}", String::from_utf8_lossy(value));
        }
    }
    println!("Destination: {}", destination);

    Ok(())
}

fn handle_new_nonce() -> anyhow::Result<()> {
    println!("Nonce: {}", Nonce::random().to_hex());
    Ok(())
}

fn handle_simulate(config: Option<PathBuf>, name: String) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => RegistryConfig::from_json_file(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RegistryConfig::default(),
    };
    let name = Name::new(name)?;

    let ledger = Arc::new(MemoryLedger::new(1));
    let wallet = Arc::new(MemoryWallet::generate(ledger.clone(), Amount::new(100 * COIN))?);
    let registry = Registry::new(config, ledger.clone(), wallet, Arc::new(MemoryHistoryStore::new()));

    let (reservation, nonce) = registry.reserve(&name)?;
    println!("Reserved: {} (nonce {})", reservation, nonce.to_hex());
    registry.handle_event(ledger.mine_block())?;

    let activation = registry.activate(ActivateRequest::new(name.clone(), "hello").with_nonce(nonce.clone()))?;
    println!("Activation: {}", activation);
    if let Err(e) = registry.activate(ActivateRequest::new(name.clone(), "other").with_nonce(nonce)) {
        println!("Second activation refused: {}", e);
    }
    registry.handle_event(ledger.mine_block())?;
    println!("{}", serde_json::to_string_pretty(&registry.show(&name)?)?);

    let update = registry.update(UpdateRequest::new(name.clone(), "world"))?;
    println!("Update: {}", update);
    registry.handle_event(ledger.mine_block())?;
    println!("{}", serde_json::to_string_pretty(&registry.history(&name)?)?);
    println!("{}", serde_json::to_string_pretty(&registry.list_mine()?)?);

    Ok(())
}
