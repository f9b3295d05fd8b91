use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::info;

/// Process-wide flag held while the daily refresh rewrites the cache.
/// Forecast reads are rejected for as long as a [`MaintenanceGuard`] lives.
///
/// Every acquisition bumps a generation counter. Request-path writes take a
/// [`persist_permit`](Self::persist_permit) tied to the generation seen at
/// entry, so a request that started before a refresh never writes after it.
#[derive(Clone, Debug, Default)]
pub struct MaintenanceLock {
    locked: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    writers: Arc<RwLock<()>>,
}

impl MaintenanceLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Number of maintenance runs started so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Takes the lock, or returns `None` if another run already holds it.
    pub fn try_acquire(&self) -> Option<MaintenanceGuard> {
        self.locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| {
                let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                info!(generation, "Maintenance lock acquired");
                MaintenanceGuard { locked: self.locked.clone() }
            })
    }

    /// Permit for a request-path cache write. `None` when a refresh is running
    /// or has started since `since` was read. Hold it until the write is done.
    pub async fn persist_permit(&self, since: u64) -> Option<RwLockReadGuard<'_, ()>> {
        let permit = self.writers.read().await;
        if self.is_locked() || self.generation() != since {
            return None;
        }
        Some(permit)
    }

    /// Waits for request-path writes that were permitted before the lock was
    /// taken. Call after `try_acquire` and before touching the cache.
    pub async fn drain_writers(&self) {
        let _exclusive = self.writers.write().await;
    }
}

/// Releases the maintenance lock when dropped, including during unwinding.
#[derive(Debug)]
pub struct MaintenanceGuard {
    locked: Arc<AtomicBool>,
}

impl MaintenanceGuard {
    pub fn release(self) {}
}

impl Drop for MaintenanceGuard {
    fn drop(&mut self) {
        self.locked.store(false, Ordering::Release);
        info!("Maintenance lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_acquire_release() {
        let lock = MaintenanceLock::new();
        assert!(!lock.is_locked());
        assert_eq!(lock.generation(), 0);

        let guard = lock.try_acquire().unwrap();
        assert!(lock.is_locked());
        assert!(lock.try_acquire().is_none());
        assert_eq!(lock.generation(), 1);

        guard.release();
        assert!(!lock.is_locked());
        assert!(lock.try_acquire().is_some());
        assert_eq!(lock.generation(), 2);
    }

    #[test]
    fn test_released_on_panic() {
        let lock = MaintenanceLock::new();
        let cloned = lock.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = cloned.try_acquire().unwrap();
            panic!("refresh failed");
        }));
        assert!(result.is_err());
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn test_persist_permit_follows_generation() {
        let lock = MaintenanceLock::new();
        let seen = lock.generation();
        assert!(lock.persist_permit(seen).await.is_some());

        let guard = lock.try_acquire().unwrap();
        assert!(lock.persist_permit(seen).await.is_none());
        assert!(lock.persist_permit(lock.generation()).await.is_none());

        guard.release();
        // A run started after `seen`, even though it has finished
        assert!(lock.persist_permit(seen).await.is_none());
        assert!(lock.persist_permit(lock.generation()).await.is_some());
    }

    #[tokio::test]
    async fn test_drain_waits_for_permitted_writer() {
        let lock = MaintenanceLock::new();
        let permit = lock.persist_permit(lock.generation()).await.unwrap();
        let _guard = lock.try_acquire().unwrap();

        let draining = lock.drain_writers();
        tokio::pin!(draining);
        assert!(tokio::time::timeout(Duration::from_millis(50), &mut draining).await.is_err());

        drop(permit);
        tokio::time::timeout(Duration::from_secs(1), draining).await.unwrap();
    }
}
