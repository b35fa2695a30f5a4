// A counting semaphore identified by a human-readable key (§4.1).
//
// The in-kernel name is derived deterministically so two processes that
// agree on a key always open the same kernel object:
//
//     prefix || letters_only(key) || sha1_hex(key)
//
// `prefix` has a minimum length of 3; two prefixes are reserved for
// legacy-compatible naming (selected by `AppSettings::sem_prefix`).
// A thin public wrapper delegating to `platform::PlatformSem`; the exact
// contract is pinned down by tests/test_named_sem.rs.

use std::time::Duration;

use sha1::{Digest, Sha1};

use crate::error::{ids, IslError, IslResult};
use crate::platform::PlatformSem;

pub const DEFAULT_PREFIX: &str = "isl_sem_";
pub const LEGACY_PREFIX: &str = "qipc_systemsem_";

fn letters_only(key: &str) -> String {
    key.chars().filter(|c| c.is_ascii_alphabetic()).collect()
}

fn sha1_hex(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Derive the in-kernel semaphore name for `key` under `prefix`.
///
/// # Panics
/// Panics if `prefix` is shorter than 3 characters — a programming error,
/// not a runtime condition callers need to recover from.
pub fn derive_name(prefix: &str, key: &str) -> String {
    assert!(prefix.len() >= 3, "semaphore name prefix must be at least 3 characters");
    format!("{prefix}{}{}", letters_only(key), sha1_hex(key))
}

/// A named, inter-process counting semaphore.
pub struct NamedSem {
    inner: PlatformSem,
    name: String,
}

impl NamedSem {
    /// Open (or create) a named semaphore using the default prefix.
    pub fn open(key: &str, initial: u32) -> IslResult<Self> {
        Self::open_with_prefix(DEFAULT_PREFIX, key, initial)
    }

    /// Open (or create) a named semaphore with an explicit prefix (e.g. the
    /// legacy `qipc_systemsem_` prefix selected by `ISLCompatible = true`).
    pub fn open_with_prefix(prefix: &str, key: &str, initial: u32) -> IslResult<Self> {
        let name = derive_name(prefix, key);
        let inner = PlatformSem::open(&name, initial)
            .map_err(|e| IslError::ipc(ids::SEM_CREATE_FAILED, e.to_string()))?;
        Ok(Self { inner, name })
    }

    /// Wait up to `timeout`; `None` waits forever. Returns `true` if
    /// acquired, `false` on timeout.
    pub fn acquire(&self, timeout: Option<Duration>) -> IslResult<bool> {
        let ms = timeout.map(|d| d.as_millis() as u64);
        self.inner
            .wait(ms)
            .map_err(|e| IslError::protocol(ids::WAIT_TIMEOUT, e.to_string()))
    }

    /// Release the semaphore `n` times.
    pub fn release(&self, n: u32) -> IslResult<()> {
        if n == 0 {
            return Ok(());
        }
        self.inner
            .post(n)
            .map_err(|e| IslError::ipc(ids::SEM_CREATE_FAILED, e.to_string()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the backing storage for a named semaphore (static helper).
    pub fn clear_storage(key: &str) {
        Self::clear_storage_with_prefix(DEFAULT_PREFIX, key);
    }

    pub fn clear_storage_with_prefix(prefix: &str, key: &str) {
        let name = derive_name(prefix, key);
        PlatformSem::clear_storage(&name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_name_rejects_short_prefix() {
        let result = std::panic::catch_unwind(|| derive_name("ab", "key"));
        assert!(result.is_err());
    }

    #[test]
    fn derive_name_is_deterministic() {
        assert_eq!(derive_name(DEFAULT_PREFIX, "demo"), derive_name(DEFAULT_PREFIX, "demo"));
        assert_ne!(derive_name(DEFAULT_PREFIX, "demo"), derive_name(DEFAULT_PREFIX, "other"));
    }
}
