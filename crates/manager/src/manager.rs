//! Certificate lifecycle orchestration.
//!
//! [`CertificateManager`] owns the cache, the ACME provider, and the retry
//! policy, all immutable after construction. The write path (generate, renew,
//! delete) is serialized by a single async mutex; the read path (exists,
//! get_certificate) touches only the cache and never waits on an in-flight
//! issuance.
//!
//! Per-domain lifecycle: `Absent -> generate -> Present`;
//! `Present -> renew (delete + refetch) -> Present | Absent on failure`;
//! `Present -> delete -> Absent`. There is no materialized state object;
//! state is simply whether a cache entry exists for the domain.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use http::{HeaderValue, Request, Response, StatusCode};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::cache::{Cache, DirCache};
use crate::config::{ManagerConfig, RetryPolicy};
use crate::error::{CertOperation, FetchError, ManagerError};
use crate::provider::{extract_token, AcmeProvider};
use crate::storage::Storage;
use crate::tls;

/// Explicit-lifecycle certificate manager
///
/// A single instance is shared across handshake threads and administrative
/// tooling. Generate and renew block for the full issuance round-trip
/// (commonly 30-60s against a real CA) and must never be called from a
/// request-serving hot path.
pub struct CertificateManager {
    config: ManagerConfig,
    provider: Arc<dyn AcmeProvider>,
    cache: Arc<dyn Cache>,
    retry: RetryPolicy,
    /// Serializes generate, renew, and delete. No fairness guarantees among
    /// blocked callers.
    write_gate: Mutex<()>,
}

impl CertificateManager {
    /// Start building a manager; collaborators default to a [`DirCache`]
    /// over the configured directory and [`RetryPolicy::default`].
    pub fn builder(config: ManagerConfig, provider: Arc<dyn AcmeProvider>) -> ManagerBuilder {
        ManagerBuilder {
            config,
            provider,
            cache: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Get the manager configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Issue a certificate for a domain, retrying transient failures.
    ///
    /// Holds the write gate for the whole call. A cached certificate
    /// short-circuits the provider entirely. Transient provider failures are
    /// retried up to `max_attempts` total calls with exponential backoff;
    /// permanent failures fail immediately. Cancellation is observed only
    /// during the inter-retry wait — a fetch already in flight runs to
    /// completion under the provider's own handling.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::GenerationFailed`] wrapping the attempt count
    /// and the last upstream cause, with [`FetchError::Cancelled`] as the
    /// cause when the backoff wait was interrupted.
    pub async fn generate(
        &self,
        domain: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ManagerError> {
        if domain.is_empty() {
            return Err(ManagerError::InvalidDomain);
        }
        let _gate = self.write_gate.lock().await;

        match self.cache.get(domain) {
            Ok(Some(_)) => {
                debug!(domain = %domain, "Certificate already cached, skipping issuance");
                return Ok(());
            }
            Ok(None) => {}
            Err(source) => {
                return Err(ManagerError::Cache {
                    domain: domain.to_string(),
                    source,
                })
            }
        }

        let started = Instant::now();
        let mut attempt = 1u32;
        loop {
            info!(
                domain = %domain,
                attempt,
                max_attempts = self.retry.max_attempts,
                "Requesting certificate from provider"
            );

            match self.provider.fetch_certificate(domain).await {
                Ok(bundle) => {
                    self.store(domain, &bundle)?;
                    info!(
                        domain = %domain,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Certificate issued"
                    );
                    return Ok(());
                }
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let backoff = self.retry.backoff_for(attempt);
                    warn!(
                        domain = %domain,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Transient issuance failure, backing off"
                    );

                    tokio::select! {
                        () = cancel.cancelled() => {
                            info!(domain = %domain, attempt, "Issuance cancelled during backoff");
                            return Err(ManagerError::GenerationFailed {
                                domain: domain.to_string(),
                                operation: CertOperation::Issuance,
                                attempts: attempt,
                                source: FetchError::Cancelled,
                            });
                        }
                        () = tokio::time::sleep(backoff) => {}
                    }
                    attempt += 1;
                }
                Err(err) => {
                    error!(domain = %domain, attempt, error = %err, "Certificate issuance failed");
                    return Err(ManagerError::GenerationFailed {
                        domain: domain.to_string(),
                        operation: CertOperation::Issuance,
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }

    /// Replace a domain's certificate wholesale.
    ///
    /// Holds the write gate. Deletes the cached entry first (an absent entry
    /// is fine; any other deletion failure is fatal), then performs exactly
    /// one provider fetch — no retry loop on this path. A failed fetch
    /// leaves the domain absent.
    pub async fn renew(&self, domain: &str) -> Result<(), ManagerError> {
        if domain.is_empty() {
            return Err(ManagerError::InvalidDomain);
        }
        let _gate = self.write_gate.lock().await;

        self.cache.delete(domain).map_err(|source| ManagerError::Cache {
            domain: domain.to_string(),
            source,
        })?;
        info!(domain = %domain, "Removed cached certificate for renewal");

        match self.provider.fetch_certificate(domain).await {
            Ok(bundle) => {
                self.store(domain, &bundle)?;
                info!(domain = %domain, "Certificate renewed");
                Ok(())
            }
            Err(source) => {
                error!(domain = %domain, error = %source, "Certificate renewal failed");
                Err(ManagerError::GenerationFailed {
                    domain: domain.to_string(),
                    operation: CertOperation::Renewal,
                    attempts: 1,
                    source,
                })
            }
        }
    }

    /// Remove a domain's certificate. Holds the write gate; an absent entry
    /// is not an error.
    pub async fn delete(&self, domain: &str) -> Result<(), ManagerError> {
        let _gate = self.write_gate.lock().await;

        self.cache.delete(domain).map_err(|source| ManagerError::Cache {
            domain: domain.to_string(),
            source,
        })?;
        info!(domain = %domain, "Deleted certificate");
        Ok(())
    }

    /// Whether a certificate is cached for the domain. No network call; a
    /// failing cache backend reads as absent.
    pub fn exists(&self, domain: &str) -> bool {
        match self.cache.get(domain) {
            Ok(entry) => entry.is_some(),
            Err(err) => {
                warn!(domain = %domain, error = %err, "Cache lookup failed during exists check");
                false
            }
        }
    }

    /// Resolve handshake material for a TLS server name.
    ///
    /// The hot path, called on every handshake: a cache read plus PEM
    /// parsing, never network I/O and never blocked by an in-flight write.
    /// The server name is used verbatim as the cache key — no port
    /// stripping, no case folding.
    ///
    /// # Errors
    ///
    /// [`ManagerError::InvalidDomain`] for an empty name,
    /// [`ManagerError::CertificateNotFound`] on a miss, and
    /// [`ManagerError::InvalidKeyPair`] when the cached bytes do not parse
    /// as a TLS key pair.
    pub fn get_certificate(
        &self,
        server_name: &str,
    ) -> Result<Arc<rustls::sign::CertifiedKey>, ManagerError> {
        if server_name.is_empty() {
            return Err(ManagerError::InvalidDomain);
        }

        let bytes = self
            .cache
            .get(server_name)
            .map_err(|source| ManagerError::Cache {
                domain: server_name.to_string(),
                source,
            })?
            .ok_or_else(|| ManagerError::CertificateNotFound {
                domain: server_name.to_string(),
            })?;

        let key = tls::load_key_pair(&bytes).map_err(|source| ManagerError::InvalidKeyPair {
            domain: server_name.to_string(),
            source,
        })?;

        trace!(server_name = %server_name, "Resolved certificate for handshake");
        Ok(Arc::new(key))
    }

    /// Answer an ACME HTTP-01 challenge request, if it is one.
    ///
    /// Returns `Some(response)` when the request path is under the
    /// well-known challenge prefix: 200 with the key authorization for a
    /// token the provider recognizes, 404 otherwise. Returns `None` for any
    /// other path so the caller continues routing.
    pub fn handle_challenge<B>(&self, request: &Request<B>) -> Option<Response<String>> {
        let token = extract_token(request.uri().path())?;

        match self.provider.challenge_response(token) {
            Some(key_authorization) => {
                debug!(token = %token, "Serving ACME challenge response");
                let mut response = Response::new(key_authorization);
                response.headers_mut().insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain"),
                );
                Some(response)
            }
            None => {
                debug!(token = %token, "Unknown ACME challenge token");
                let mut response = Response::new(String::new());
                *response.status_mut() = StatusCode::NOT_FOUND;
                Some(response)
            }
        }
    }

    fn store(&self, domain: &str, bundle: &[u8]) -> Result<(), ManagerError> {
        self.cache
            .put(domain, bundle)
            .map_err(|source| ManagerError::Cache {
                domain: domain.to_string(),
                source,
            })
    }
}

impl fmt::Debug for CertificateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateManager")
            .field("email", &self.config.email)
            .field("cert_dir", &self.config.cert_dir)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Builder for [`CertificateManager`]
///
/// The translation of the functional-option pattern: required collaborators
/// go through [`CertificateManager::builder`], optional ones through the
/// `with_*` methods, and [`build`](ManagerBuilder::build) validates the
/// configuration and fills in defaults.
pub struct ManagerBuilder {
    config: ManagerConfig,
    provider: Arc<dyn AcmeProvider>,
    cache: Option<Arc<dyn Cache>>,
    retry: RetryPolicy,
}

impl ManagerBuilder {
    /// Swap in a cache backend (defaults to a [`DirCache`] over
    /// `config.cert_dir`).
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Override the retry policy for the generate path.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate the configuration and build the manager.
    ///
    /// # Errors
    ///
    /// Fails fast on a missing email or certificate directory, or when the
    /// default store directory cannot be initialized.
    pub fn build(self) -> Result<CertificateManager, ManagerError> {
        self.config.validate()?;

        let cache = match self.cache {
            Some(cache) => cache,
            None => Arc::new(DirCache::new(Storage::new(&self.config.cert_dir)?)),
        };

        Ok(CertificateManager {
            config: self.config,
            provider: self.provider,
            cache,
            retry: self.retry,
            write_gate: Mutex::new(()),
        })
    }
}
