//! Operator tool: key generation, asset sealing, catalog registration and
//! ledger diagnostics.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use delivery_server::catalog::{AssetRecord, DeliveryMode, JsonFileVault};
use delivery_server::content::ContentId;
use delivery_server::crypto::{decrypt_file, encrypt_file, generate_key, AssetKey};
use delivery_server::ledger::{event_topic, JsonRpcLedger, LogFilter, DEFAULT_EVENT_SIGNATURE};

#[derive(Parser)]
#[command(name = "seal", version, about = "Seal assets and manage the delivery catalog")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a fresh AES-256 key (URL-safe base64)
    Keygen,
    /// Encrypt a file to <path>.enc
    Encrypt {
        path: PathBuf,
        #[arg(long, env = "SEAL_KEY")]
        key: String,
    },
    /// Decrypt <path>.enc back to <path>
    Decrypt {
        path: PathBuf,
        #[arg(long, env = "SEAL_KEY")]
        key: String,
    },
    /// Print the log topic hash of an event signature
    Topic {
        #[arg(default_value = DEFAULT_EVENT_SIGNATURE)]
        signature: String,
    },
    /// Add or replace an asset in the catalog file
    Register {
        /// Content identifier (Qm...)
        cid: String,
        #[arg(long, env = "SEAL_KEY")]
        key: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_enum, default_value_t = Mode::Standard)]
        mode: Mode,
        /// Algorithm for compute-only purchases
        #[arg(long)]
        algorithm: Option<String>,
        #[arg(long, env = "DELIVERY_CATALOG_PATH", default_value = "./data/catalog.json")]
        catalog: PathBuf,
    },
    /// Check ledger connectivity and look for purchase events
    Diagnose {
        #[arg(long, env = "DELIVERY_LEDGER__RPC_URL", default_value = "http://127.0.0.1:8545")]
        rpc_url: String,
        #[arg(long, env = "DELIVERY_LEDGER__CONTRACT_ADDRESS")]
        contract: String,
        #[arg(long, default_value = DEFAULT_EVENT_SIGNATURE)]
        signature: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Standard,
    ComputePrivacy,
}

impl From<Mode> for DeliveryMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Standard => DeliveryMode::Standard,
            Mode::ComputePrivacy => DeliveryMode::ComputePrivacy,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen => println!("{}", generate_key()),
        Commands::Encrypt { path, key } => {
            let out = encrypt_file(&path, &AssetKey::parse(&key)?)?;
            println!("{}", out.display());
        }
        Commands::Decrypt { path, key } => {
            let out = decrypt_file(&path, &AssetKey::parse(&key)?)?;
            println!("{}", out.display());
        }
        Commands::Topic { signature } => println!("{}", event_topic(&signature)),
        Commands::Register {
            cid,
            key,
            name,
            mode,
            algorithm,
            catalog,
        } => {
            let content_id = ContentId::parse(&cid)?;
            // Reject unusable keys before they reach the catalog
            AssetKey::parse(&key)?;
            let vault = JsonFileVault::open(&catalog)?;
            vault.insert(AssetRecord {
                display_name: name.unwrap_or_else(|| content_id.to_string()),
                content_id,
                delivery_mode: mode.into(),
                decryption_key: key,
                algorithm_id: algorithm,
            })?;
            vault.save()?;
            println!("registered {} in {}", cid.trim(), catalog.display());
        }
        Commands::Diagnose {
            rpc_url,
            contract,
            signature,
        } => {
            let ledger = JsonRpcLedger::new(&rpc_url, Duration::from_secs(10))?;
            let filter = LogFilter::for_signature(&contract, &signature);
            println!("rpc:      {}", rpc_url);
            println!("contract: {}", contract);
            println!("topic:    {} ({})", filter.topic, signature);

            let report = ledger.diagnose(&filter).await;
            println!("connected: {}", report.connected);
            if let Some(height) = report.block_height {
                println!("block height: {}", height);
            }
            match report.contract_has_code {
                Some(true) => println!("contract code: present"),
                Some(false) => println!("contract code: MISSING (wrong address or chain?)"),
                None => {}
            }
            if let Some(count) = report.matching_logs {
                println!("purchase events found: {}", count);
            }
            if let Some(count) = report.contract_logs {
                println!("contract events (any topic): {}", count);
            }
            if let Some(sample) = &report.sample_topic {
                println!("sample topic: {}", sample);
                if report.matching_logs == Some(0) && *sample != filter.topic {
                    println!("  no purchase events but the contract emits others: check --signature");
                }
            }
        }
    }

    Ok(())
}
