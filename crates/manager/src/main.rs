//! Warden - administrative CLI for the certificate store
//!
//! Issuance commands (`generate`, `renew`) run against the self-signed
//! development provider; production deployments drive the library with a
//! real ACME provider instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use warden_manager::{
    CertificateManager, ManagerConfig, SelfSignedProvider, Storage,
};

/// Warden - explicit-lifecycle TLS certificate manager
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Certificate store directory
    #[arg(short = 's', long = "store", env = "WARDEN_STORE")]
    store: PathBuf,

    /// Account contact email (required for issuance commands)
    #[arg(short = 'e', long = "email", env = "WARDEN_EMAIL")]
    email: Option<String>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List stored domains
    List {
        /// Emit the domain list as JSON
        #[arg(long = "json")]
        json: bool,
    },
    /// Check whether a certificate is stored for a domain
    Exists {
        /// Domain to check
        domain: String,
    },
    /// Issue a certificate (self-signed development provider)
    Generate {
        /// Domain to issue for
        domain: String,
    },
    /// Delete and re-issue a certificate (self-signed development provider)
    Renew {
        /// Domain to renew
        domain: String,
    },
    /// Delete a stored certificate
    Delete {
        /// Domain to delete
        domain: String,
    },
    /// Alias one domain's certificate under another name
    Alias {
        /// Source domain
        src: String,
        /// Destination domain
        dst: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        store,
        email,
        verbose,
        command,
    } = Cli::parse();

    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    match command {
        Commands::List { json } => {
            let storage = Storage::new(&store).context("Failed to open certificate store")?;
            let mut domains = storage.list().context("Failed to list stored domains")?;
            domains.sort();

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&domains)
                        .context("Failed to serialize domain list")?
                );
            } else {
                for domain in &domains {
                    println!("{domain}");
                }
            }
        }
        Commands::Exists { domain } => {
            let storage = Storage::new(&store).context("Failed to open certificate store")?;
            if storage.exists(&domain) {
                println!("{domain}: stored");
            } else {
                println!("{domain}: not stored");
                std::process::exit(1);
            }
        }
        Commands::Generate { domain } => {
            let manager = build_manager(&store, email.clone())?;
            manager
                .generate(&domain, &CancellationToken::new())
                .await
                .context("Certificate issuance failed")?;
            println!("issued certificate for {domain}");
        }
        Commands::Renew { domain } => {
            let manager = build_manager(&store, email.clone())?;
            manager
                .renew(&domain)
                .await
                .context("Certificate renewal failed")?;
            println!("renewed certificate for {domain}");
        }
        Commands::Delete { domain } => {
            let manager = build_manager(&store, email.clone())?;
            manager
                .delete(&domain)
                .await
                .context("Certificate deletion failed")?;
            println!("deleted certificate for {domain}");
        }
        Commands::Alias { src, dst } => {
            let storage = Storage::new(&store).context("Failed to open certificate store")?;
            storage
                .copy(&src, &dst)
                .context("Failed to alias certificate")?;
            println!("aliased {src} as {dst}");
        }
    }

    Ok(())
}

/// Build a manager over the store with the self-signed development provider.
fn build_manager(store: &Path, email: Option<String>) -> Result<CertificateManager> {
    let email = email.context("An account email is required (--email or WARDEN_EMAIL)")?;

    info!(store = %store.display(), "Using self-signed development provider");

    let provider = Arc::new(SelfSignedProvider::new());
    CertificateManager::builder(ManagerConfig::new(email, store), provider)
        .build()
        .context("Failed to initialize certificate manager")
}
