//! Single-holder fetch permit — at most one downloader in flight per
//! resource. A boolean guard rather than a counting semaphore, so the
//! "at most one fetcher" invariant is visible at the type level.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct FetchPermit {
    held: AtomicBool,
}

impl FetchPermit {
    pub fn new() -> Self {
        Self { held: AtomicBool::new(false) }
    }

    /// Attempt to take the permit. Returns `true` if this caller now owns
    /// the one outstanding fetch slot.
    pub fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_held() {
        let permit = FetchPermit::new();
        assert!(permit.try_acquire());
        assert!(!permit.try_acquire());
    }

    #[test]
    fn release_allows_reacquire() {
        let permit = FetchPermit::new();
        assert!(permit.try_acquire());
        permit.release();
        assert!(permit.try_acquire());
    }
}
