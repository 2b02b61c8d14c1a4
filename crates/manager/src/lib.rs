//! Warden Certificate Manager
//!
//! An explicit-lifecycle TLS certificate manager with a crash-safe on-disk
//! store. Certificates are issued, renewed, and deleted only on demand —
//! there are no background timers and no automatic renewal — while the
//! serving path stays fast: certificate resolution for a TLS handshake is a
//! cache read plus PEM parsing, never network I/O.
//!
//! Core pieces:
//!
//! - **Storage**: one file per domain with atomic stage-then-rename writes,
//!   idempotent deletes, and streamed aliasing
//! - **Cache**: a pluggable get/put/delete layer that distinguishes a miss
//!   from a broken backend
//! - **Provider**: the ACME seam — fetch-certificate-by-server-name plus
//!   HTTP-01 challenge answers, swappable for staging or tests
//! - **Manager**: write-path-serialized orchestration with retry and
//!   exponential backoff against a transient-failure-prone CA
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use warden_manager::{CertificateManager, ManagerConfig, SelfSignedProvider};
//!
//! let provider = Arc::new(SelfSignedProvider::new());
//! let manager = CertificateManager::builder(
//!     ManagerConfig::new("ops@example.com", "/var/lib/warden/certs"),
//!     provider,
//! )
//! .build()?;
//!
//! // Explicit, long-running administrative call
//! manager.generate("example.com", &CancellationToken::new()).await?;
//!
//! // Hot path: synchronous, no network
//! let key = manager.get_certificate("example.com")?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod cache;
pub mod config;
pub mod error;
pub mod manager;
pub mod provider;
pub mod storage;
pub mod tls;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Orchestration core
pub use manager::{CertificateManager, ManagerBuilder};

// Configuration
pub use config::{ManagerConfig, RetryPolicy};

// Errors
pub use error::{
    CacheError, CertOperation, FetchError, KeyPairError, ManagerError, StorageError,
};

// Storage
pub use storage::{is_reserved_name, Storage, ACCOUNT_KEY_FILE};

// Cache backends
pub use cache::{Cache, DirCache, MemoryCache};

// Provider seam
pub use provider::{
    extract_token, AcmeProvider, PendingChallenges, SelfSignedProvider, ACME_CHALLENGE_PREFIX,
};

// TLS materialization
pub use tls::{load_key_pair, SniResolver};
