// Cooperative stop signalling across processes (§4.6).
//
// Two well-known semaphores per session: a single global one-shot stop and
// a per-session stop. `StopListener` is the "listen-to-exit" task of §9,
// modeled as an OS thread that owns its semaphore handle and is joined on
// drop, per the design note's guidance for the coroutine/thread surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::{ids, IslResult};
use crate::log;
use crate::named_sem::NamedSem;
use crate::names::{global_stop_key, session_stop_key};

fn spawn_listener(key: String, mode: StopMode, terminated: Arc<AtomicBool>) -> IslResult<StopListener> {
    let sem = NamedSem::open(&key, 0)?;
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();

    let handle = std::thread::spawn(move || loop {
        if shutdown_flag.load(Ordering::Acquire) {
            return;
        }
        match sem.acquire(Some(std::time::Duration::from_millis(500))) {
            Ok(true) => {
                log::info(ids::INFO_STOP_RECEIVED, "stop signal received");
                match mode {
                    StopMode::Exit => std::process::exit(0),
                    StopMode::Stop => {
                        terminated.store(true, Ordering::Release);
                        return;
                    }
                }
            }
            Ok(false) => continue,
            Err(_) => return,
        }
    });

    Ok(StopListener { handle: Some(handle), shutdown })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Terminate the process outright.
    Exit,
    /// Set the connector's `terminated` flag; channels fail fast on it.
    Stop,
}

/// Release the global stop semaphore once, waking every global listener.
pub fn send_stop_request() -> IslResult<()> {
    let sem = NamedSem::open(&global_stop_key(), 0)?;
    sem.release(1)
}

/// Release session `session`'s stop semaphore once.
pub fn send_stop_session(session: &str) -> IslResult<()> {
    let sem = NamedSem::open(&session_stop_key(session), 0)?;
    sem.release(1)
}

/// A background listener blocked on one stop semaphore. Dropping it joins
/// the thread; callers normally drop it as part of connector teardown.
pub struct StopListener {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl StopListener {
    /// Spawn a thread blocked on the session's stop semaphore. On release,
    /// `Exit` terminates the process; `Stop` sets `terminated`.
    pub fn listen_to_exit_session(session: &str, mode: StopMode, terminated: Arc<AtomicBool>) -> IslResult<Self> {
        spawn_listener(session_stop_key(session), mode, terminated)
    }

    /// Spawn a thread blocked on the single global stop semaphore (§4.6),
    /// the one every connector in every session can be woken by.
    pub fn listen_to_stop_request(mode: StopMode, terminated: Arc<AtomicBool>) -> IslResult<Self> {
        spawn_listener(global_stop_key(), mode, terminated)
    }
}

impl Drop for StopListener {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique_session() -> String {
        let n = COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
        format!("stopbus_test_{n}")
    }

    #[test]
    fn send_stop_session_sets_terminated_flag() {
        let session = unique_session();
        NamedSem::clear_storage(&crate::names::session_stop_key(&session));

        let terminated = Arc::new(AtomicBool::new(false));
        let listener = StopListener::listen_to_exit_session(&session, StopMode::Stop, terminated.clone()).expect("listen");

        send_stop_session(&session).expect("send stop");
        std::thread::sleep(Duration::from_millis(200));
        assert!(terminated.load(Ordering::Acquire));
        drop(listener);
    }

    #[test]
    fn global_stop_request_wakes_the_global_listener() {
        NamedSem::clear_storage(&global_stop_key());

        let terminated = Arc::new(AtomicBool::new(false));
        let listener = StopListener::listen_to_stop_request(StopMode::Stop, terminated.clone()).expect("listen");

        send_stop_request().expect("send stop");
        std::thread::sleep(Duration::from_millis(200));
        assert!(terminated.load(Ordering::Acquire));
        drop(listener);
    }
}
