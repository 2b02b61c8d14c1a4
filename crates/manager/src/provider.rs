//! ACME provider abstraction and HTTP-01 challenge state.
//!
//! The manager depends on two provider capabilities: fetch-or-issue a
//! certificate bundle for a server name (the only operation that performs
//! network I/O, commonly 30-60s against a real CA), and answering HTTP-01
//! challenge tokens served under [`ACME_CHALLENGE_PREFIX`]. Implementations
//! are swappable: staging vs production endpoints, or the in-repo
//! [`SelfSignedProvider`] for development and tests.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::error::FetchError;

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Certificate provider capability
///
/// Returned bundles are opaque to the manager: a PEM certificate chain
/// concatenated with a PEM private key.
#[async_trait]
pub trait AcmeProvider: Send + Sync {
    /// Fetch or issue a certificate bundle for the given server name.
    ///
    /// May block for the full issuance round-trip. Implementations classify
    /// their failures via [`FetchError`] where they can; unclassified
    /// failures go through [`FetchError::Other`].
    async fn fetch_certificate(&self, server_name: &str) -> Result<Vec<u8>, FetchError>;

    /// Key authorization for a pending HTTP-01 challenge token, if known.
    fn challenge_response(&self, token: &str) -> Option<String>;
}

/// Extract the challenge token from a request path.
///
/// Returns `Some(token)` if the path is under the well-known challenge
/// prefix, `None` otherwise.
pub fn extract_token(path: &str) -> Option<&str> {
    path.strip_prefix(ACME_CHALLENGE_PREFIX)
}

/// Pending HTTP-01 challenges
///
/// Provider implementations register token -> key-authorization pairs while
/// an order is being validated and remove them afterwards. Uses `DashMap`
/// for lock-free access from request-serving threads; clones share state.
#[derive(Debug, Clone, Default)]
pub struct PendingChallenges {
    challenges: Arc<DashMap<String, String>>,
}

impl PendingChallenges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending challenge.
    pub fn add(&self, token: &str, key_authorization: &str) {
        debug!(token = %token, "Registering ACME HTTP-01 challenge");
        self.challenges
            .insert(token.to_string(), key_authorization.to_string());
    }

    /// Remove a validated or expired challenge.
    pub fn remove(&self, token: &str) {
        if self.challenges.remove(token).is_some() {
            debug!(token = %token, "Removed ACME challenge");
        }
    }

    /// Key authorization for a token, if registered.
    pub fn response(&self, token: &str) -> Option<String> {
        let result = self.challenges.get(token).map(|entry| entry.clone());
        trace!(token = %token, found = result.is_some(), "ACME challenge lookup");
        result
    }

    /// Number of pending challenges
    pub fn pending_count(&self) -> usize {
        self.challenges.len()
    }
}

/// Development provider issuing locally generated self-signed certificates
///
/// Performs no ACME wire traffic and completes in milliseconds, so issuance
/// commands and tests can run without a reachable CA. The bundle layout
/// matches what a real provider returns: PEM chain followed by the PEM key.
#[derive(Debug, Clone, Default)]
pub struct SelfSignedProvider {
    challenges: PendingChallenges,
}

impl SelfSignedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Access the challenge map, e.g. to seed tokens in tests.
    pub fn challenges(&self) -> &PendingChallenges {
        &self.challenges
    }
}

#[async_trait]
impl AcmeProvider for SelfSignedProvider {
    async fn fetch_certificate(&self, server_name: &str) -> Result<Vec<u8>, FetchError> {
        if server_name.is_empty() {
            return Err(FetchError::Permanent(
                "cannot issue a certificate for an empty server name".to_string(),
            ));
        }

        let key_pair = rcgen::KeyPair::generate()
            .map_err(|err| FetchError::Permanent(format!("key generation failed: {err}")))?;

        let mut params = rcgen::CertificateParams::new(vec![server_name.to_string()])
            .map_err(|err| FetchError::Permanent(format!("invalid subject name: {err}")))?;
        params.distinguished_name = rcgen::DistinguishedName::new();

        let cert = params
            .self_signed(&key_pair)
            .map_err(|err| FetchError::Permanent(format!("self-signing failed: {err}")))?;

        debug!(server_name = %server_name, "Issued self-signed development certificate");

        let mut bundle = cert.pem().into_bytes();
        bundle.extend_from_slice(key_pair.serialize_pem().as_bytes());
        Ok(bundle)
    }

    fn challenge_response(&self, token: &str) -> Option<String> {
        self.challenges.response(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_token() {
        assert_eq!(
            extract_token("/.well-known/acme-challenge/abc123"),
            Some("abc123")
        );
        assert_eq!(extract_token("/.well-known/acme-challenge/"), Some(""));
        assert_eq!(extract_token("/other/path"), None);
        assert_eq!(extract_token("/.well-known/acme-challenge"), None);
    }

    #[test]
    fn test_pending_challenges() {
        let challenges = PendingChallenges::new();

        challenges.add("token", "token.thumbprint");
        assert_eq!(challenges.pending_count(), 1);
        assert_eq!(
            challenges.response("token"),
            Some("token.thumbprint".to_string())
        );
        assert_eq!(challenges.response("unknown"), None);

        challenges.remove("token");
        assert_eq!(challenges.pending_count(), 0);
        assert_eq!(challenges.response("token"), None);
    }

    #[test]
    fn test_clone_shares_state() {
        let challenges1 = PendingChallenges::new();
        let challenges2 = challenges1.clone();

        challenges1.add("token", "auth");
        assert_eq!(challenges2.response("token"), Some("auth".to_string()));
    }

    #[tokio::test]
    async fn test_self_signed_bundle_is_loadable() {
        let provider = SelfSignedProvider::new();
        let bundle = provider.fetch_certificate("dev.example.com").await.unwrap();

        // The bundle must parse as a usable TLS key pair.
        crate::tls::load_key_pair(&bundle).unwrap();
    }

    #[tokio::test]
    async fn test_self_signed_rejects_empty_name() {
        let provider = SelfSignedProvider::new();
        let err = provider.fetch_certificate("").await.unwrap_err();
        assert!(matches!(err, FetchError::Permanent(_)));
        assert!(!err.is_retryable());
    }
}
