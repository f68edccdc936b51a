use std::sync::atomic::{AtomicBool, Ordering};

/// Re-entrancy guard for periodic jobs.
///
/// A tick that finds the guard already held is skipped rather than queued, so
/// a slow flush or fold never overlaps its own next tick.
#[derive(Debug, Default)]
pub struct TickGuard {
    running: AtomicBool,
}

impl TickGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the guard, or `None` if another run holds it.
    pub fn try_enter(&self) -> Option<TickPermit<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TickPermit { guard: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Releases the guard on drop, including when the job errors or panics.
#[derive(Debug)]
pub struct TickPermit<'a> {
    guard: &'a TickGuard,
}

impl Drop for TickPermit<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_enter_is_refused_until_permit_dropped() {
        let guard = TickGuard::new();

        let permit = guard.try_enter().expect("first enter succeeds");
        assert!(guard.is_running());
        assert!(guard.try_enter().is_none());

        drop(permit);
        assert!(!guard.is_running());
        assert!(guard.try_enter().is_some());
    }
}
