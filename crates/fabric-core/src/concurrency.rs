//! Per-identity reentrant read/write locks with a bounded wait.
//!
//! Every acquisition is also recorded on a thread-local stack so code deeper
//! in a call chain can check that its caller holds the right access
//! ([`assert_read_lock`], [`assert_write_lock`]). Handles are RAII guards and
//! can be passed down as explicit proof of the lock ([`LockHandle::covers`]).

use crate::{poisoned, CoreError};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

thread_local! {
    static READ_LOCKS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    static WRITE_LOCKS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Whether the calling thread holds read (or write) access to `key`.
pub fn assert_read_lock(key: &str) -> bool {
    assert_write_lock(key) || READ_LOCKS.with(|s| s.borrow().iter().any(|k| k == key))
}

/// Whether the calling thread holds write access to `key`.
pub fn assert_write_lock(key: &str) -> bool {
    WRITE_LOCKS.with(|s| s.borrow().iter().any(|k| k == key))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

impl LockMode {
    fn as_str(self) -> &'static str {
        match self {
            LockMode::Read => "read",
            LockMode::Write => "write",
        }
    }

    fn stack(self) -> &'static std::thread::LocalKey<RefCell<Vec<String>>> {
        match self {
            LockMode::Read => &READ_LOCKS,
            LockMode::Write => &WRITE_LOCKS,
        }
    }
}

#[derive(Debug, Default)]
struct LockState {
    writer: Option<ThreadId>,
    write_holds: usize,
    readers: HashMap<ThreadId, usize>,
}

impl LockState {
    fn can_acquire(&self, me: ThreadId, mode: LockMode) -> bool {
        let own_write = self.writer == Some(me);
        match mode {
            LockMode::Write => {
                own_write || (self.writer.is_none() && self.readers.is_empty())
            }
            LockMode::Read => own_write || self.writer.is_none(),
        }
    }
}

/// Reentrant read/write lock keyed by owning thread.
///
/// A read holder asking for write access waits for all readers to leave,
/// itself included, so an upgrade always runs into the timeout.
#[derive(Debug, Default)]
struct TimedRwLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl TimedRwLock {
    fn acquire(&self, mode: LockMode, timeout: Duration) -> Result<bool, CoreError> {
        let me = thread::current().id();
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().map_err(|e| poisoned(&e))?;

        while !state.can_acquire(me, mode) {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let (guard, _) = self
                .released
                .wait_timeout(state, deadline - now)
                .map_err(|e| poisoned(&e))?;
            state = guard;
        }

        match mode {
            LockMode::Write => {
                state.writer = Some(me);
                state.write_holds += 1;
            }
            LockMode::Read => *state.readers.entry(me).or_insert(0) += 1,
        }
        Ok(true)
    }

    fn release(&self, mode: LockMode) {
        let me = thread::current().id();
        let mut state = lock_ignoring_poison(&self.state);
        match mode {
            LockMode::Write => {
                if state.writer == Some(me) {
                    state.write_holds -= 1;
                    if state.write_holds == 0 {
                        state.writer = None;
                    }
                }
            }
            LockMode::Read => {
                if let Some(count) = state.readers.get_mut(&me) {
                    *count -= 1;
                    if *count == 0 {
                        state.readers.remove(&me);
                    }
                }
            }
        }
        drop(state);
        self.released.notify_all();
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Held read or write access to one identity. Released on drop.
///
/// Not `Send`: the lock and the thread-local stack entry belong to the
/// acquiring thread.
#[must_use = "the lock is released as soon as the handle is dropped"]
pub struct LockHandle {
    lock: Arc<TimedRwLock>,
    key: String,
    mode: LockMode,
    _not_send: PhantomData<*const ()>,
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn is_write(&self) -> bool {
        self.mode == LockMode::Write
    }

    /// Whether this handle grants `mode` access to `key`. Write covers read.
    pub fn covers(&self, key: &str, mode: LockMode) -> bool {
        self.key == key && (self.mode == LockMode::Write || mode == LockMode::Read)
    }

    pub fn unlock(self) {
        drop(self);
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.mode.stack().with(|s| {
            let mut stack = s.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|k| *k == self.key) {
                stack.remove(pos);
            }
        });
        self.lock.release(self.mode);
    }
}

/// Registry of lazily created locks, one per identity, within a scope.
pub struct LockManager<K> {
    scope: &'static str,
    timeout: Duration,
    locks: Mutex<HashMap<K, Arc<TimedRwLock>>>,
}

impl<K> LockManager<K>
where
    K: Clone + Eq + Hash + fmt::Display,
{
    pub fn new(scope: &'static str, timeout: Duration) -> Self {
        Self {
            scope,
            timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn scope(&self) -> &'static str {
        self.scope
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Thread-local stack key for `id`, `scope/id`.
    pub fn key(&self, id: &K) -> String {
        format!("{}/{id}", self.scope)
    }

    pub fn acquire_write_lock(&self, id: &K) -> Result<LockHandle, CoreError> {
        self.acquire(id, LockMode::Write)
    }

    pub fn acquire_read_lock(&self, id: &K) -> Result<LockHandle, CoreError> {
        self.acquire(id, LockMode::Read)
    }

    pub fn acquire_lock(&self, id: &K, write: bool) -> Result<LockHandle, CoreError> {
        if write {
            self.acquire_write_lock(id)
        } else {
            self.acquire_read_lock(id)
        }
    }

    pub fn assert_read_lock(&self, id: &K) -> Result<(), CoreError> {
        let key = self.key(id);
        if assert_read_lock(&key) {
            Ok(())
        } else {
            Err(CoreError::IllegalState(format!(
                "read lock on {key} not held by current thread"
            )))
        }
    }

    pub fn assert_write_lock(&self, id: &K) -> Result<(), CoreError> {
        let key = self.key(id);
        if assert_write_lock(&key) {
            Ok(())
        } else {
            Err(CoreError::IllegalState(format!(
                "write lock on {key} not held by current thread"
            )))
        }
    }

    /// Check that `handle` grants `mode` access to `id`.
    pub fn check_handle(&self, handle: &LockHandle, id: &K, mode: LockMode) -> Result<(), CoreError> {
        let key = self.key(id);
        if handle.covers(&key, mode) {
            Ok(())
        } else {
            Err(CoreError::IllegalState(format!(
                "{} lock on {key} required, got {} lock on {}",
                mode.as_str(),
                handle.mode.as_str(),
                handle.key
            )))
        }
    }

    fn lock_for(&self, id: &K) -> Result<Arc<TimedRwLock>, CoreError> {
        let mut locks = self.locks.lock().map_err(|e| poisoned(&e))?;
        Ok(Arc::clone(locks.entry(id.clone()).or_default()))
    }

    fn acquire(&self, id: &K, mode: LockMode) -> Result<LockHandle, CoreError> {
        let lock = self.lock_for(id)?;
        let key = self.key(id);
        if !lock.acquire(mode, self.timeout)? {
            debug!("{} lock on {key} timed out", mode.as_str());
            return Err(CoreError::LockTimeout {
                key,
                mode: mode.as_str(),
                timeout_ms: self.timeout.as_millis(),
            });
        }
        mode.stack().with(|s| s.borrow_mut().push(key.clone()));
        Ok(LockHandle {
            lock,
            key,
            mode,
            _not_send: PhantomData,
        })
    }
}

impl<K> fmt::Debug for LockManager<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("scope", &self.scope)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager(timeout_ms: u64) -> Arc<LockManager<String>> {
        Arc::new(LockManager::new("test", Duration::from_millis(timeout_ms)))
    }

    #[test]
    fn write_lock_is_reentrant() {
        let m = manager(100);
        let id = "a".to_owned();
        let outer = m.acquire_write_lock(&id).unwrap();
        let inner = m.acquire_write_lock(&id).unwrap();
        let read = m.acquire_read_lock(&id).unwrap();
        assert!(m.assert_write_lock(&id).is_ok());
        drop(read);
        drop(inner);
        assert!(m.assert_write_lock(&id).is_ok());
        drop(outer);
        assert!(m.assert_write_lock(&id).is_err());
        assert!(m.assert_read_lock(&id).is_err());
    }

    #[test]
    fn read_lock_is_reentrant_and_shared() {
        let m = manager(200);
        let id = "a".to_owned();
        let _first = m.acquire_read_lock(&id).unwrap();
        let _second = m.acquire_read_lock(&id).unwrap();
        assert!(m.assert_read_lock(&id).is_ok());
        assert!(m.assert_write_lock(&id).is_err());

        let m2 = Arc::clone(&m);
        let other = thread::spawn(move || m2.acquire_read_lock(&"a".to_owned()).map(|h| h.is_write()))
            .join()
            .unwrap();
        assert!(!other.unwrap());
    }

    #[test]
    fn upgrade_times_out() {
        let m = manager(50);
        let id = "a".to_owned();
        let _read = m.acquire_read_lock(&id).unwrap();
        let err = m.acquire_write_lock(&id).unwrap_err();
        assert!(matches!(err, CoreError::LockTimeout { mode: "write", .. }));
    }

    #[test]
    fn writer_blocks_other_threads_until_timeout() {
        let m = manager(50);
        let _write = m.acquire_write_lock(&"a".to_owned()).unwrap();
        let m2 = Arc::clone(&m);
        let result = thread::spawn(move || m2.acquire_read_lock(&"a".to_owned()).map(|_| ()))
            .join()
            .unwrap();
        assert!(matches!(result, Err(CoreError::LockTimeout { .. })));

        let m3 = Arc::clone(&m);
        let unrelated = thread::spawn(move || m3.acquire_write_lock(&"b".to_owned()).map(|_| ()))
            .join()
            .unwrap();
        assert!(unrelated.is_ok());
    }

    #[test]
    fn writes_are_serialized() {
        let m = manager(5_000);
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&m);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    for _ in 0..20 {
                        let _h = m.acquire_write_lock(&"x".to_owned()).unwrap();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handle_covers_and_check() {
        let m = manager(100);
        let id = "a".to_owned();
        let write = m.acquire_write_lock(&id).unwrap();
        assert!(write.covers("test/a", LockMode::Read));
        assert!(write.covers("test/a", LockMode::Write));
        assert!(!write.covers("test/b", LockMode::Read));
        assert!(m.check_handle(&write, &id, LockMode::Write).is_ok());
        assert!(m.check_handle(&write, &"b".to_owned(), LockMode::Read).is_err());
        write.unlock();

        let read = m.acquire_read_lock(&id).unwrap();
        assert!(!read.covers("test/a", LockMode::Write));
        assert!(m.check_handle(&read, &id, LockMode::Write).is_err());
    }

    #[test]
    fn lock_released_after_unlock() {
        let m = manager(100);
        let id = "a".to_owned();
        m.acquire_write_lock(&id).unwrap().unlock();
        let m2 = Arc::clone(&m);
        let result = thread::spawn(move || m2.acquire_write_lock(&"a".to_owned()).map(|_| ()))
            .join()
            .unwrap();
        assert!(result.is_ok());
    }
}
