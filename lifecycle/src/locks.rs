//! Per-report mutual exclusion
//!
//! Operations on the same report are serialized in-process; operations on
//! different reports run in parallel. Store preconditions still guard against
//! writers outside this process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::LifecycleResult;
use crate::state::{ReportId, StoreError};

/// Registry of one lock per report
#[derive(Debug, Default)]
pub struct ReportLocks {
    locks: Mutex<HashMap<ReportId, Arc<Mutex<()>>>>,
}

impl ReportLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, report_id: &str) -> LifecycleResult<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(locks
            .entry(report_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Run `f` while holding the report's lock
    pub fn with_report<T>(
        &self,
        report_id: &str,
        f: impl FnOnce() -> LifecycleResult<T>,
    ) -> LifecycleResult<T> {
        let lock = self.handle(report_id)?;
        // The guarded value is (), so a panic elsewhere leaves nothing torn
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f()
    }

    /// Number of reports that have been locked at least once
    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_same_report_is_serialized() {
        let locks = Arc::new(ReportLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_seen = max_seen.clone();
                thread::spawn(move || {
                    locks
                        .with_report("r1", || {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            thread::sleep(std::time::Duration::from_millis(2));
                            inside.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .unwrap();
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn test_result_passes_through() {
        let locks = ReportLocks::new();
        let value = locks.with_report("r1", || Ok(42)).unwrap();
        assert_eq!(value, 42);
        assert!(locks
            .with_report("r2", || -> LifecycleResult<()> {
                Err(crate::error::LifecycleError::not_found("report", "r2"))
            })
            .is_err());
    }
}
