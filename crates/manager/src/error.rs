//! Error types for the certificate manager.
//!
//! Each layer has its own `thiserror` enum: [`StorageError`] for the on-disk
//! store, [`CacheError`] for cache backends, [`FetchError`] for the ACME
//! provider boundary, [`KeyPairError`] for TLS key-pair materialization, and
//! [`ManagerError`] as the surface callers match on.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Substrings that mark an untyped upstream failure as transient.
///
/// Matched case-insensitively against the error text when a provider returns
/// [`FetchError::Other`]; providers that classify their own failures bypass
/// this list entirely.
pub const TRANSIENT_SIGNATURES: &[&str] = &[
    "connection refused",
    "network unreachable",
    "no such host",
    "dns",
    "timeout",
    "timed out",
    "rate limit",
    "too many requests",
    "429",
    "503",
    "service unavailable",
    "temporary failure",
];

/// Check an error message against the transient-failure signature set.
pub fn matches_transient_signature(message: &str) -> bool {
    let lowered = message.to_lowercase();
    TRANSIENT_SIGNATURES.iter().any(|sig| lowered.contains(sig))
}

/// Errors from the on-disk certificate store
#[derive(Error, Debug)]
pub enum StorageError {
    /// No stored certificate for the domain. Distinct from I/O failure so
    /// callers can tell "never issued" apart from "storage is broken".
    #[error("no stored certificate for {domain}")]
    NotFound { domain: String },

    #[error("storage I/O failure for {domain}: {source}")]
    Io {
        domain: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to initialize certificate directory {path}: {source}")]
    Init {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to enumerate certificate directory: {source}")]
    List {
        #[source]
        source: std::io::Error,
    },
}

/// Errors from a cache backend
///
/// A cache miss is **not** an error: `Cache::get` returns `Ok(None)` for
/// absent entries and reserves `Err` for backend failures.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("cache backend failure for {domain}: {message}")]
    Backend { domain: String, message: String },
}

/// Errors from the ACME provider's fetch operation
///
/// Providers classify their own failures where they can; `Other` is the
/// untyped boundary (wrapped OS-level network errors and the like) where
/// retryability falls back to the substring heuristic.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Upstream failure expected to clear on its own (network blips, rate
    /// limits, CA maintenance). Retried with backoff.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// Upstream rejected the request for good (authorization failure, bad
    /// domain). Never retried.
    #[error("permanent upstream failure: {0}")]
    Permanent(String),

    /// Issuance was abandoned before completion.
    #[error("certificate issuance cancelled")]
    Cancelled,

    /// Unclassified failure from an untyped boundary.
    #[error("upstream failure: {0}")]
    Other(String),
}

impl FetchError {
    /// Whether the generate loop should retry after this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transient(_) => true,
            FetchError::Permanent(_) | FetchError::Cancelled => false,
            FetchError::Other(message) => matches_transient_signature(message),
        }
    }
}

/// Errors materializing a stored PEM bundle into a TLS key pair
#[derive(Error, Debug)]
pub enum KeyPairError {
    #[error("malformed PEM in certificate bundle: {0}")]
    MalformedPem(String),

    #[error("certificate bundle contains no certificates")]
    NoCertificates,

    #[error("certificate bundle contains no private key")]
    NoPrivateKey,

    #[error("unsupported private key material: {0}")]
    UnsupportedKey(String),
}

/// Which write-path operation produced a [`ManagerError::GenerationFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertOperation {
    Issuance,
    Renewal,
}

impl fmt::Display for CertOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertOperation::Issuance => write!(f, "issuance"),
            CertOperation::Renewal => write!(f, "renewal"),
        }
    }
}

/// Top-level certificate manager errors
#[derive(Error, Debug)]
pub enum ManagerError {
    /// Construction requires an account email.
    #[error("account email is required")]
    EmailRequired,

    /// Construction requires a certificate directory.
    #[error("certificate directory is required")]
    CertDirRequired,

    /// The TLS server name was empty.
    #[error("invalid domain: server name is empty")]
    InvalidDomain,

    /// No cached certificate for the domain; it was never generated or has
    /// been deleted.
    #[error("no certificate found for {domain}")]
    CertificateNotFound { domain: String },

    /// Reserved. No operation currently inspects certificate validity dates,
    /// so nothing constructs this variant.
    #[error("certificate for {domain} has expired")]
    CertificateExpired { domain: String },

    /// Issuance or renewal failed after the recorded number of provider
    /// calls. The source carries the last upstream cause.
    #[error("certificate {operation} for {domain} failed after {attempts} attempt(s): {source}")]
    GenerationFailed {
        domain: String,
        operation: CertOperation,
        attempts: u32,
        #[source]
        source: FetchError,
    },

    /// Cached bytes for the domain could not be parsed into a TLS key pair.
    #[error("stored certificate for {domain} is not a usable key pair: {source}")]
    InvalidKeyPair {
        domain: String,
        #[source]
        source: KeyPairError,
    },

    /// The cache backend failed (distinct from a miss).
    #[error("certificate cache failure for {domain}: {source}")]
    Cache {
        domain: String,
        #[source]
        source: CacheError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}
