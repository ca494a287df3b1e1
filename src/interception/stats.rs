//! Restricted-domain diagnostics
//!
//! Hooks cannot log. They bump these counters instead and the blocking domain
//! drains them into `tracing` (scheduler heartbeat).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Counters bumped by the interception hooks
#[derive(Debug, Default)]
pub struct RewriteStats {
    glink_seen: AtomicU64,
    glink_rewritten: AtomicU64,
    /// Last value the Glink hook replaced
    glink_last_original: AtomicU32,
    show_rewritten: AtomicU64,
    show_no_room: AtomicU64,
    pd_forced: AtomicU64,
}

/// Plain copy of the counters since the last drain
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RewriteCounts {
    pub glink_seen: u64,
    pub glink_rewritten: u64,
    pub glink_last_original: u32,
    pub show_rewritten: u64,
    pub show_no_room: u64,
    pub pd_forced: u64,
}

impl RewriteCounts {
    pub fn is_empty(&self) -> bool {
        self.glink_seen == 0
            && self.glink_rewritten == 0
            && self.show_rewritten == 0
            && self.show_no_room == 0
            && self.pd_forced == 0
    }
}

impl RewriteStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn glink_seen(&self) {
        self.glink_seen.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn glink_rewritten(&self, original: u32) {
        self.glink_last_original.store(original, Ordering::Relaxed);
        self.glink_rewritten.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn show_rewritten(&self) {
        self.show_rewritten.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn show_no_room(&self) {
        self.show_no_room.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn pd_forced(&self) {
        self.pd_forced.fetch_add(1, Ordering::Relaxed);
    }

    /// Read and reset
    pub fn drain(&self) -> RewriteCounts {
        RewriteCounts {
            glink_seen: self.glink_seen.swap(0, Ordering::Relaxed),
            glink_rewritten: self.glink_rewritten.swap(0, Ordering::Relaxed),
            glink_last_original: self.glink_last_original.load(Ordering::Relaxed),
            show_rewritten: self.show_rewritten.swap(0, Ordering::Relaxed),
            show_no_room: self.show_no_room.swap(0, Ordering::Relaxed),
            pd_forced: self.pd_forced.swap(0, Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_resets() {
        let stats = RewriteStats::new();
        stats.glink_seen();
        stats.glink_rewritten(3_000_000);
        stats.pd_forced();

        let counts = stats.drain();
        assert_eq!(counts.glink_seen, 1);
        assert_eq!(counts.glink_rewritten, 1);
        assert_eq!(counts.glink_last_original, 3_000_000);
        assert_eq!(counts.pd_forced, 1);
        assert!(stats.drain().is_empty());
    }
}
