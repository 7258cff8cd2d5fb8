use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, PoisonError,
    },
    time::{Duration, Instant},
};

use log::{debug, warn};

use crate::{
    error::Result,
    platform::{WakeLockId, WakeLockProvider},
};

/// Holds a wake lock until dropped.
pub struct WakeGuard<'a> {
    provider: &'a dyn WakeLockProvider,
    id: WakeLockId,
}

impl<'a> WakeGuard<'a> {
    /// # Errors
    /// if the provider refuses the lock
    pub fn acquire(
        provider: &'a dyn WakeLockProvider,
        tag: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let id = provider.acquire(tag, timeout)?;
        Ok(Self { provider, id })
    }
}

impl Drop for WakeGuard<'_> {
    fn drop(&mut self) {
        self.provider.release(self.id);
    }
}

#[derive(Debug)]
struct Held {
    tag: String,
    expires: Instant,
}

/// Wake locks for a process that owns the machine it's on. Locks lapse on
/// their own once their timeout passes.
#[derive(Debug, Default)]
pub struct ProcessWakeLocks {
    next: AtomicU64,
    held: Mutex<BTreeMap<WakeLockId, Held>>,
}

impl ProcessWakeLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// number of locks that are held and haven't lapsed
    #[must_use]
    pub fn held(&self) -> usize {
        let now = Instant::now();
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.retain(|id, lock| {
            let live = lock.expires > now;
            if !live {
                warn!(target: "wake", "wake lock {} ({}) lapsed without release", id.0, lock.tag);
            }
            live
        });
        held.len()
    }
}

impl WakeLockProvider for ProcessWakeLocks {
    fn acquire(&self, tag: &str, timeout: Duration) -> Result<WakeLockId> {
        let id = WakeLockId(self.next.fetch_add(1, Ordering::Relaxed));
        let expires = Instant::now() + timeout;
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Held {
                    tag: tag.to_string(),
                    expires,
                },
            );
        debug!(target: "wake", "acquired wake lock {} ({tag}) for {timeout:?}", id.0);
        Ok(id)
    }

    fn release(&self, id: WakeLockId) {
        if self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
        {
            debug!(target: "wake", "released wake lock {}", id.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_releases_on_drop() {
        let locks = ProcessWakeLocks::new();
        {
            let _first = WakeGuard::acquire(&locks, "test", Duration::from_secs(60)).unwrap();
            let _second = WakeGuard::acquire(&locks, "test", Duration::from_secs(60)).unwrap();
            assert_eq!(locks.held(), 2);
        }
        assert_eq!(locks.held(), 0);
    }

    #[test]
    fn guard_releases_on_panic() {
        let locks = ProcessWakeLocks::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = WakeGuard::acquire(&locks, "test", Duration::from_secs(60)).unwrap();
            panic!("step blew up");
        }));
        assert!(result.is_err());
        assert_eq!(locks.held(), 0);
    }

    #[test]
    fn locks_lapse() {
        let locks = ProcessWakeLocks::new();
        let id = locks.acquire("test", Duration::ZERO).unwrap();
        assert_eq!(locks.held(), 0);
        // releasing a lapsed lock is fine
        locks.release(id);
    }
}
