//! Crash-safe on-disk certificate store.
//!
//! One file per domain under the store directory, holding the PEM certificate
//! chain concatenated with the PEM private key. Filenames containing `+` or
//! `_` are reserved for account and metadata files (e.g.
//! [`ACCOUNT_KEY_FILE`]) and are excluded from domain enumeration.
//!
//! # Directory Structure
//!
//! ```text
//! certs/
//! ├── acme_account+key      # ACME account key (reserved, never listed)
//! ├── example.com           # PEM chain + PEM private key
//! └── api.example.com
//! ```
//!
//! Every write stages into a `<path>.tmp` file and atomically renames over
//! the target, so a reader racing a writer sees either the fully-old or the
//! fully-new content, never a torn file. Concurrent writers to the *same*
//! domain are not coordinated here: the last rename wins.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace};

use crate::error::StorageError;

/// Conventional reserved filename for the ACME account key
pub const ACCOUNT_KEY_FILE: &str = "acme_account+key";

/// Suffix of staging files used for atomic writes
const STAGING_SUFFIX: &str = ".tmp";

/// Whether a filename is reserved for account or metadata storage.
pub fn is_reserved_name(name: &str) -> bool {
    name.contains('+') || name.contains('_')
}

/// Filesystem-backed byte-blob store keyed by domain name
///
/// Operations on distinct domains are safe to run concurrently; per-domain
/// atomicity comes from the stage-then-rename write path.
#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    /// Open the store, creating the directory (0700 on Unix) if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Init`] if the directory cannot be created or
    /// its permissions cannot be set.
    pub fn new(dir: &Path) -> Result<Self, StorageError> {
        let init_err = |source| StorageError::Init {
            path: dir.to_path_buf(),
            source,
        };

        fs::create_dir_all(dir).map_err(init_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(init_err)?;
        }

        info!(cert_dir = %dir.display(), "Initialized certificate storage");

        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Get the store directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn domain_path(&self, domain: &str) -> PathBuf {
        self.dir.join(domain)
    }

    /// List stored domains
    ///
    /// Skips reserved account/metadata names and staging files left behind
    /// by a crashed writer.
    pub fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut domains = Vec::new();

        let entries = fs::read_dir(&self.dir).map_err(|source| StorageError::List { source })?;
        for entry in entries {
            let entry = entry.map_err(|source| StorageError::List { source })?;
            if !entry
                .file_type()
                .map_err(|source| StorageError::List { source })?
                .is_file()
            {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if is_reserved_name(name) || name.ends_with(STAGING_SUFFIX) {
                    trace!(file = %name, "Skipping reserved or staging file");
                    continue;
                }
                domains.push(name.to_string());
            }
        }

        Ok(domains)
    }

    /// Check whether a certificate is stored for the domain.
    pub fn exists(&self, domain: &str) -> bool {
        self.domain_path(domain).is_file()
    }

    /// Read the stored bytes for a domain.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if nothing is stored for the
    /// domain, or [`StorageError::Io`] for any other failure.
    pub fn read(&self, domain: &str) -> Result<Vec<u8>, StorageError> {
        fs::read(self.domain_path(domain)).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                StorageError::NotFound {
                    domain: domain.to_string(),
                }
            } else {
                StorageError::Io {
                    domain: domain.to_string(),
                    source,
                }
            }
        })
    }

    /// Atomically store bytes for a domain.
    ///
    /// Stages into `<path>.tmp` (0600 on Unix), flushes to disk, then renames
    /// over the target. On any failure the staging file is removed
    /// best-effort so no orphans accumulate.
    pub fn write(&self, domain: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let target = self.domain_path(domain);
        let staging = staging_path(&target);

        let result = stage_bytes(&staging, bytes).and_then(|()| fs::rename(&staging, &target));

        if let Err(source) = result {
            let _ = fs::remove_file(&staging);
            return Err(StorageError::Io {
                domain: domain.to_string(),
                source,
            });
        }

        debug!(domain = %domain, bytes = bytes.len(), "Stored certificate");
        Ok(())
    }

    /// Delete the stored bytes for a domain.
    ///
    /// Removing a non-existent file is not an error; any other OS failure is
    /// propagated.
    pub fn delete(&self, domain: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.domain_path(domain)) {
            Ok(()) => {
                info!(domain = %domain, "Deleted stored certificate");
                Ok(())
            }
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                trace!(domain = %domain, "Certificate to delete was already absent");
                Ok(())
            }
            Err(source) => Err(StorageError::Io {
                domain: domain.to_string(),
                source,
            }),
        }
    }

    /// Alias one domain's certificate under another name.
    ///
    /// Streams the source into a staging file without holding the whole blob
    /// in memory, fsyncs, then atomically renames over the destination. The
    /// staging file is removed best-effort on any failure.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the source domain has no stored
    /// certificate.
    pub fn copy(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        let mut reader = fs::File::open(self.domain_path(src)).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                StorageError::NotFound {
                    domain: src.to_string(),
                }
            } else {
                StorageError::Io {
                    domain: src.to_string(),
                    source,
                }
            }
        })?;

        let target = self.domain_path(dst);
        let staging = staging_path(&target);

        let result =
            stage_stream(&staging, &mut reader).and_then(|()| fs::rename(&staging, &target));

        if let Err(source) = result {
            let _ = fs::remove_file(&staging);
            return Err(StorageError::Io {
                domain: dst.to_string(),
                source,
            });
        }

        info!(src = %src, dst = %dst, "Aliased certificate");
        Ok(())
    }
}

fn staging_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

/// Open a fresh staging file, owner read/write only from the moment it
/// exists. Key material is never on disk with wider permissions.
fn create_staging(staging: &Path) -> io::Result<fs::File> {
    // A crashed writer may have left a stale staging file behind.
    let _ = fs::remove_file(staging);

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(staging)
}

fn stage_bytes(staging: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = create_staging(staging)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn stage_stream(staging: &Path, reader: &mut impl Read) -> io::Result<()> {
    let mut file = create_staging(staging)?;
    io::copy(reader, &mut file)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn setup_storage() -> (TempDir, Storage) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path()).unwrap();
        (temp_dir, storage)
    }

    #[test]
    fn test_storage_creation() {
        let (temp_dir, storage) = setup_storage();
        assert!(storage.dir().exists());
        assert_eq!(storage.dir(), temp_dir.path());
    }

    #[test]
    fn test_write_read_round_trip() {
        let (_temp_dir, storage) = setup_storage();

        let bytes = b"-----BEGIN CERTIFICATE-----\ncert\n-----END CERTIFICATE-----\n";
        storage.write("example.com", bytes).unwrap();

        let loaded = storage.read("example.com").unwrap();
        assert_eq!(loaded, bytes);
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let (_temp_dir, storage) = setup_storage();

        let err = storage.read("missing.example.com").unwrap_err();
        assert!(matches!(err, StorageError::NotFound { ref domain } if domain == "missing.example.com"));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_temp_dir, storage) = setup_storage();

        storage.write("example.com", b"cert").unwrap();
        storage.delete("example.com").unwrap();

        // Deleting twice more succeeds without error.
        storage.delete("example.com").unwrap();
        storage.delete("example.com").unwrap();

        assert!(!storage.exists("example.com"));
    }

    #[test]
    fn test_exists() {
        let (_temp_dir, storage) = setup_storage();

        assert!(!storage.exists("example.com"));
        storage.write("example.com", b"cert").unwrap();
        assert!(storage.exists("example.com"));
    }

    #[test]
    fn test_list_skips_reserved_and_staging_files() {
        let (temp_dir, storage) = setup_storage();

        storage.write("a.example.com", b"cert").unwrap();
        storage.write("b.example.com", b"cert").unwrap();
        std::fs::write(temp_dir.path().join(ACCOUNT_KEY_FILE), b"account").unwrap();
        std::fs::write(temp_dir.path().join("backup_meta"), b"meta").unwrap();
        std::fs::write(temp_dir.path().join("crashed.example.com.tmp"), b"torn").unwrap();

        let mut domains = storage.list().unwrap();
        domains.sort();
        assert_eq!(domains, vec!["a.example.com", "b.example.com"]);
    }

    #[test]
    fn test_write_replaces_whole_file() {
        let (_temp_dir, storage) = setup_storage();

        storage.write("example.com", b"a longer initial payload").unwrap();
        storage.write("example.com", b"short").unwrap();

        assert_eq!(storage.read("example.com").unwrap(), b"short");
    }

    #[test]
    fn test_reader_never_observes_partial_write() {
        let (_temp_dir, storage) = setup_storage();

        // Two distinguishable full payloads, large enough that a torn write
        // would be visible as a mixed or truncated read.
        let old = vec![b'a'; 8192];
        let new = vec![b'b'; 8192];
        storage.write("example.com", &old).unwrap();

        let writer = {
            let storage = storage.clone();
            let (old, new) = (old.clone(), new.clone());
            std::thread::spawn(move || {
                for i in 0..50 {
                    let payload = if i % 2 == 0 { &new } else { &old };
                    storage.write("example.com", payload).unwrap();
                }
            })
        };

        while !writer.is_finished() {
            let bytes = storage.read("example.com").unwrap();
            assert!(
                bytes == old || bytes == new,
                "torn read of {} bytes",
                bytes.len()
            );
        }
        writer.join().unwrap();

        let last = storage.read("example.com").unwrap();
        assert!(last == old || last == new);
    }

    #[cfg(unix)]
    #[test]
    fn test_written_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (temp_dir, storage) = setup_storage();
        storage.write("example.com", b"key material").unwrap();

        let mode = std::fs::metadata(temp_dir.path().join("example.com"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_write_over_stale_staging_file() {
        let (temp_dir, storage) = setup_storage();

        // A crashed writer's leftover must not block the next write.
        std::fs::write(temp_dir.path().join("example.com.tmp"), b"stale").unwrap();

        storage.write("example.com", b"cert").unwrap();
        assert_eq!(storage.read("example.com").unwrap(), b"cert");
    }

    #[test]
    fn test_write_leaves_no_staging_file() {
        let (temp_dir, storage) = setup_storage();

        storage.write("example.com", b"cert").unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.unwrap().file_name().into_string().ok())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "staging files left behind: {leftovers:?}");
    }

    #[test]
    fn test_copy_aliases_certificate() {
        let (_temp_dir, storage) = setup_storage();

        storage.write("example.com", b"shared cert").unwrap();
        storage.copy("example.com", "www.example.com").unwrap();

        assert_eq!(storage.read("www.example.com").unwrap(), b"shared cert");
        // The source is untouched.
        assert_eq!(storage.read("example.com").unwrap(), b"shared cert");
    }

    #[test]
    fn test_copy_missing_source_is_not_found() {
        let (_temp_dir, storage) = setup_storage();

        let err = storage.copy("missing.example.com", "dst.example.com").unwrap_err();
        assert!(matches!(err, StorageError::NotFound { ref domain } if domain == "missing.example.com"));
        assert!(!storage.exists("dst.example.com"));
    }

    #[test]
    fn test_is_reserved_name() {
        assert!(is_reserved_name(ACCOUNT_KEY_FILE));
        assert!(is_reserved_name("backup_meta"));
        assert!(!is_reserved_name("example.com"));
    }

    #[test]
    fn test_concurrent_writers_distinct_domains() {
        let (_temp_dir, storage) = setup_storage();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let storage = storage.clone();
                std::thread::spawn(move || {
                    let domain = format!("host{i}.example.com");
                    storage.write(&domain, domain.as_bytes()).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(storage.list().unwrap().len(), 8);
    }

    proptest! {
        #[test]
        fn prop_round_trip_preserves_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let (_temp_dir, storage) = setup_storage();
            storage.write("prop.example.com", &bytes).unwrap();
            prop_assert_eq!(storage.read("prop.example.com").unwrap(), bytes);
        }
    }
}
