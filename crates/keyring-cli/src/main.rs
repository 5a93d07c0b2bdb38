//! Keyring CLI
//!
//! Command-line front end for a file-backed keyring vault.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use keyring_core::vault::FileVaultStore;
use keyring_core::{
    AccountFilter, KeyringConfig, KeyringOptions, KeyringService, KeyringType,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "keyring")]
#[command(about = "Password-gated keyring vault", version)]
struct Cli {
    /// Vault file
    #[arg(long, global = true, env = "KEYRING_VAULT", default_value = "keyring-vault.json")]
    vault: PathBuf,

    /// Vault password
    #[arg(long, global = true, env = "KEYRING_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty vault
    Init,

    /// Import a raw private key
    ImportKey {
        /// Hex private key, with or without 0x
        key: String,
    },

    /// Import (or generate) an HD mnemonic
    ImportMnemonic {
        /// Mnemonic phrase; a new 12-word phrase is generated when omitted
        #[arg(long)]
        phrase: Option<String>,

        /// Optional BIP-39 passphrase
        #[arg(long)]
        passphrase: Option<String>,

        /// Accounts to derive
        #[arg(short, long, default_value_t = 1)]
        accounts: usize,
    },

    /// List keyrings and their accounts
    Accounts {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Add an account to a keyring
    AddAccount {
        /// Keyring position as listed by `accounts`
        #[arg(short, long)]
        keyring: usize,
    },

    /// Remove an account
    RemoveAccount {
        address: String,

        /// Keyring type holding the account
        #[arg(long = "type", default_value = "Simple Key Pair")]
        keyring_type: String,

        /// Brand, for hardware and WalletConnect accounts
        #[arg(long)]
        brand: Option<String>,
    },

    /// Sign a personal message (EIP-191)
    SignMessage { address: String, message: String },

    /// Print the private key of an account
    ExportKey { address: String },
}

fn load_config(path: Option<&Path>) -> Result<KeyringConfig> {
    let Some(path) = path else {
        return Ok(KeyringConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { LevelFilter::DEBUG } else { LevelFilter::WARN };
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;
    let store = Arc::new(FileVaultStore::new(&cli.vault)?);
    let service = KeyringService::new(store, config);
    debug!(vault = %cli.vault.display(), "Using vault");

    let password = Zeroizing::new(
        cli.password
            .ok_or_else(|| anyhow!("a password is required: pass --password or set KEYRING_PASSWORD"))?,
    );

    if let Commands::Init = cli.command {
        service.boot(&password).await?;
        println!("Vault created at {}", cli.vault.display());
        return Ok(());
    }

    service.submit_password(&password).await?;
    let outcome = run(&service, cli.command, &password).await;
    service.set_locked().await?;
    outcome
}

async fn run(service: &KeyringService, command: Commands, password: &str) -> Result<()> {
    match command {
        Commands::Init => service.boot(password).await?,

        Commands::ImportKey { key } => {
            let info = service
                .add_new_keyring(
                    KeyringType::SimpleKeyPair,
                    KeyringOptions::PrivateKeys(vec![Zeroizing::new(key)]),
                )
                .await?;
            for account in info.accounts {
                println!("{}", account.address);
            }
        }

        Commands::ImportMnemonic {
            phrase,
            passphrase,
            accounts,
        } => {
            let generated = phrase.is_none();
            let info = service
                .add_new_keyring(
                    KeyringType::HdKeyTree,
                    KeyringOptions::Mnemonic {
                        phrase: phrase.map(Zeroizing::new),
                        passphrase: passphrase.map(Zeroizing::new),
                        accounts,
                    },
                )
                .await?;
            for account in &info.accounts {
                println!("{}", account.address);
            }
            if generated {
                let first = info
                    .accounts
                    .first()
                    .ok_or_else(|| anyhow!("generated keyring has no accounts"))?;
                let phrase = service.export_mnemonic(&first.address, password).await?;
                println!("\nWrite down your recovery phrase:\n{}", phrase.as_str());
            }
        }

        Commands::Accounts { json } => {
            let keyrings = service.get_keyrings().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&keyrings)?);
                return Ok(());
            }
            for (position, keyring) in keyrings.iter().enumerate() {
                println!("[{}] {}", position, keyring.keyring_type);
                for account in &keyring.accounts {
                    match &account.brand_name {
                        Some(brand) => println!("    {} ({})", account.address, brand),
                        None => println!("    {}", account.address),
                    }
                }
            }
        }

        Commands::AddAccount { keyring } => {
            let keyrings = service.get_keyrings().await;
            let target = keyrings
                .get(keyring)
                .ok_or_else(|| anyhow!("no keyring at position {}", keyring))?;
            for address in service.add_new_account(&target.id).await? {
                println!("{}", address);
            }
        }

        Commands::RemoveAccount {
            address,
            keyring_type,
            brand,
        } => {
            let keyring_type: KeyringType = keyring_type.parse()?;
            service
                .remove_account(&address, keyring_type, brand.as_deref())
                .await?;
            println!("Removed {}", address);
        }

        Commands::SignMessage { address, message } => {
            let signature = service
                .sign_personal_message(&address, message.as_bytes(), &AccountFilter::any())
                .await?;
            println!("{}", signature.to_hex());
        }

        Commands::ExportKey { address } => {
            let key = service.export_private_key(&address, password).await?;
            println!("{}", key.as_str());
        }
    }

    Ok(())
}
