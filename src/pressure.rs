//! Request-count driven memory reclamation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counts served requests and signals when a reclamation pass is due.
///
/// The count is a heuristic, so it uses relaxed atomics.
/// Once the count exceeds the limit, exactly one caller observes the crossing and resets the count to zero.
#[derive(Debug)]
pub struct ResourcePressureMonitor {
    limit: u64,
    count: AtomicU64,
    passes: AtomicU64,
}

impl ResourcePressureMonitor {
    /// Create a new [`ResourcePressureMonitor`] firing after `limit` requests.
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            count: AtomicU64::new(0),
            passes: AtomicU64::new(0),
        }
    }

    /// Return the request limit.
    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Record a served request.
    ///
    /// Returns true if the caller should run a reclamation pass.
    pub fn record(&self) -> bool {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if count <= self.limit {
            return false;
        }
        let fire = self
            .count
            .compare_exchange(count, 0, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok();
        if fire {
            self.passes.fetch_add(1, Ordering::Relaxed);
        }
        fire
    }

    /// Return the number of requests recorded since the last reclamation pass.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Return the number of reclamation passes signalled.
    #[must_use]
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }
}

/// Return freed heap memory to the operating system.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub fn release_free_memory() {
    // SAFETY: malloc_trim only releases memory which is not in use.
    unsafe {
        libc::malloc_trim(0);
    }
}

/// Return freed heap memory to the operating system.
///
/// This is a no-op on platforms other than Linux with glibc.
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
pub fn release_free_memory() {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn pressure_monitor_fires_once() {
        let limit = 500;
        let monitor = ResourcePressureMonitor::new(limit);
        let fired = (0..=limit).filter(|_| monitor.record()).count();
        assert_eq!(fired, 1);
        assert_eq!(monitor.passes(), 1);
        assert!(monitor.count() < limit);

        let fired = (0..limit).filter(|_| monitor.record()).count();
        assert_eq!(fired, 0);
        assert_eq!(monitor.count(), limit);
    }

    #[test]
    fn pressure_monitor_concurrent() {
        let monitor = Arc::new(ResourcePressureMonitor::new(100));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let monitor = monitor.clone();
                std::thread::spawn(move || (0..101).filter(|_| monitor.record()).count())
            })
            .collect();
        let fired: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(fired as u64, monitor.passes());
        assert!(fired >= 1);
        assert!(monitor.count() <= 404);
        release_free_memory();
    }
}
