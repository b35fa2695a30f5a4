// A shared memory region paired with a `NamedSem`-backed mutex (§4.2).
//
// The region is a plain `ShmHandle`; the mutex is a paired `NamedSem(key)`
// rather than a `pthread_mutex_t` living inside the region itself.
// Re-entrant locking is tracked with a depth counter so a thread that
// already holds the lock can call into a function that locks again without
// deadlocking itself.

use std::cell::Cell;
use std::time::Duration;

use crate::error::{ids, IslError, IslResult};
use crate::named_sem::NamedSem;
use crate::shm::{ShmHandle, ShmOpenMode};

/// A named shared memory region with its own mutual-exclusion semaphore.
pub struct NamedShm {
    shm: ShmHandle,
    mutex: NamedSem,
    depth: Cell<u32>,
}

impl NamedShm {
    /// Create a new region of `size` bytes, failing if it already exists.
    pub fn create(key: &str, size: usize) -> IslResult<Self> {
        Self::open(key, size, ShmOpenMode::Create)
    }

    /// Attach to an existing region, failing if it does not exist.
    pub fn attach(key: &str, size: usize) -> IslResult<Self> {
        Self::open(key, size, ShmOpenMode::Open)
    }

    /// Create the region if missing, otherwise attach to it.
    pub fn create_or_attach(key: &str, size: usize) -> IslResult<Self> {
        Self::open(key, size, ShmOpenMode::CreateOrOpen)
    }

    fn open(key: &str, size: usize, mode: ShmOpenMode) -> IslResult<Self> {
        let shm = ShmHandle::acquire(key, size, mode)
            .map_err(|e| IslError::ipc(ids::SHM_CREATE_FAILED, e.to_string()))?;
        let mutex = NamedSem::open(key, 1)?;
        Ok(Self { shm, mutex, depth: Cell::new(0) })
    }

    pub fn is_attached(&self) -> bool {
        self.shm.ref_count() > 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.shm.as_ptr()
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.shm.as_mut_ptr()
    }

    pub fn user_size(&self) -> usize {
        self.shm.user_size()
    }

    /// Acquire the region's mutex. Re-entrant: a thread already holding the
    /// lock may call `lock` again; the matching number of `unlock` calls is
    /// required to actually release it.
    pub fn lock(&self) -> IslResult<()> {
        let depth = self.depth.get();
        if depth > 0 {
            self.depth.set(depth + 1);
            return Ok(());
        }
        let acquired = self.mutex.acquire(None)?;
        if !acquired {
            return Err(IslError::protocol(ids::WAIT_TIMEOUT, "named shm lock wait failed"));
        }
        self.depth.set(1);
        Ok(())
    }

    /// Acquire the region's mutex with a timeout. Returns `false` on timeout.
    pub fn lock_timeout(&self, timeout: Duration) -> IslResult<bool> {
        let depth = self.depth.get();
        if depth > 0 {
            self.depth.set(depth + 1);
            return Ok(true);
        }
        let acquired = self.mutex.acquire(Some(timeout))?;
        if acquired {
            self.depth.set(1);
        }
        Ok(acquired)
    }

    /// Release the region's mutex. A no-op once the re-entrant depth counter
    /// reaches zero.
    pub fn unlock(&self) -> IslResult<()> {
        let depth = self.depth.get();
        if depth == 0 {
            return Ok(());
        }
        if depth > 1 {
            self.depth.set(depth - 1);
            return Ok(());
        }
        self.depth.set(0);
        self.mutex.release(1)
    }

    /// Detach from the region without removing the backing storage.
    pub fn detach(self) {
        drop(self);
    }

    /// Remove the backing storage for both the shm region and its mutex.
    pub fn clear_storage(key: &str) {
        ShmHandle::clear_storage(key);
        NamedSem::clear_storage(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique_key(prefix: &str) -> String {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}_named_shm_{n}")
    }

    #[test]
    fn create_then_lock_unlock() {
        let key = unique_key("lock");
        NamedShm::clear_storage(&key);
        let shm = NamedShm::create(&key, 64).expect("create");
        shm.lock().expect("lock");
        shm.unlock().expect("unlock");
    }

    #[test]
    fn reentrant_lock_requires_matching_unlocks() {
        let key = unique_key("reentrant");
        NamedShm::clear_storage(&key);
        let shm = NamedShm::create(&key, 64).expect("create");

        shm.lock().expect("lock 1");
        shm.lock().expect("lock 2 (reentrant)");
        shm.unlock().expect("unlock 1");
        // still held once more; a second lock attempt (in real use, from
        // another thread) should only proceed after this final unlock.
        shm.unlock().expect("unlock 2");
    }

    #[test]
    fn attach_sees_writes_from_creator() {
        let key = unique_key("attach");
        NamedShm::clear_storage(&key);
        let creator = NamedShm::create(&key, 16).expect("create");
        unsafe {
            *creator.as_mut_ptr() = 0xAB;
        }
        let attacher = NamedShm::attach(&key, 16).expect("attach");
        let value = unsafe { *attacher.as_ptr() };
        assert_eq!(value, 0xAB);
    }
}
