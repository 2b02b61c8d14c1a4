//! Manager configuration and retry policy.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ManagerError;

/// Default number of provider calls per generate
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base backoff between generate attempts
const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(5);

/// Certificate manager configuration
///
/// Both fields are required; [`validate`](ManagerConfig::validate) runs at
/// construction time and fails fast with a dedicated error for each.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Account contact email registered with the certificate authority
    pub email: String,
    /// Root directory of the on-disk certificate store
    pub cert_dir: PathBuf,
}

impl ManagerConfig {
    pub fn new(email: impl Into<String>, cert_dir: impl AsRef<Path>) -> Self {
        Self {
            email: email.into(),
            cert_dir: cert_dir.as_ref().to_path_buf(),
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::EmailRequired`] if the email is empty and
    /// [`ManagerError::CertDirRequired`] if the directory is empty.
    pub fn validate(&self) -> Result<(), ManagerError> {
        if self.email.trim().is_empty() {
            return Err(ManagerError::EmailRequired);
        }
        if self.cert_dir.as_os_str().is_empty() {
            return Err(ManagerError::CertDirRequired);
        }
        Ok(())
    }
}

/// Retry policy for the generate path
///
/// `max_attempts` is the total number of provider calls, so a policy of 3
/// performs one initial call and at most two retries. Backoff doubles each
/// attempt: the wait after attempt `n` is `base_backoff * 2^(n-1)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff")]
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts,
            base_backoff,
        }
    }

    /// Backoff to wait after the given (1-based) failed attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_backoff.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: DEFAULT_BASE_BACKOFF,
        }
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_backoff() -> Duration {
    DEFAULT_BASE_BACKOFF
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = ManagerConfig::new("ops@example.com", "/var/lib/warden/certs");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_email() {
        let config = ManagerConfig::new("", "/var/lib/warden/certs");
        assert!(matches!(
            config.validate(),
            Err(ManagerError::EmailRequired)
        ));

        // Whitespace-only is still missing.
        let config = ManagerConfig::new("   ", "/var/lib/warden/certs");
        assert!(matches!(
            config.validate(),
            Err(ManagerError::EmailRequired)
        ));
    }

    #[test]
    fn test_missing_cert_dir() {
        let config = ManagerConfig::new("ops@example.com", "");
        assert!(matches!(
            config.validate(),
            Err(ManagerError::CertDirRequired)
        ));
    }

    #[test]
    fn test_retry_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_backoff, Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::new(64, Duration::from_secs(5));
        // A shift past the factor width must not wrap back to a short wait.
        assert!(policy.backoff_for(40) > policy.backoff_for(3));
    }
}
