//! Render backend that draws nothing and counts everything.
//!
//! Used by the `--headless` viewer mode and by the simulation harness to
//! check that every spawned visual is eventually released.

use crate::agent::AgentId;
use crate::scene::{Pose, RenderBackend, RenderObject};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Counters shared between a `HeadlessBackend` and its observers.
#[derive(Debug, Default)]
pub struct HeadlessStats {
    spawned: AtomicU64,
    updated: AtomicU64,
    released: AtomicU64,
    frames: AtomicU64,
    live: AtomicUsize,
    last_frame_objects: AtomicUsize,
}

impl HeadlessStats {
    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    pub fn updated(&self) -> u64 {
        self.updated.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    /// Frames presented so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Handles spawned and not yet released.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Object count of the most recent frame.
    pub fn last_frame_objects(&self) -> usize {
        self.last_frame_objects.load(Ordering::Relaxed)
    }
}

/// A backend whose handles are serial numbers.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_handle: u64,
    stats: Arc<HeadlessStats>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared counters. They stay readable after the backend
    /// has been moved into a reconciler or dropped.
    pub fn stats(&self) -> Arc<HeadlessStats> {
        Arc::clone(&self.stats)
    }
}

impl RenderBackend for HeadlessBackend {
    type Handle = u64;

    fn spawn(&mut self, _id: &AgentId, _pose: &Pose) -> u64 {
        self.next_handle += 1;
        self.stats.spawned.fetch_add(1, Ordering::Relaxed);
        self.stats.live.fetch_add(1, Ordering::Relaxed);
        self.next_handle
    }

    fn update(&mut self, _handle: &mut u64, _pose: &Pose) {
        self.stats.updated.fetch_add(1, Ordering::Relaxed);
    }

    fn release(&mut self, _handle: u64) {
        self.stats.released.fetch_add(1, Ordering::Relaxed);
        self.stats.live.fetch_sub(1, Ordering::Relaxed);
    }

    fn present<'a, I>(&mut self, objects: I)
    where
        I: Iterator<Item = &'a RenderObject<u64>>,
    {
        self.stats
            .last_frame_objects
            .store(objects.count(), Ordering::Relaxed);
        self.stats.frames.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let mut backend = HeadlessBackend::new();
        let a = backend.spawn(&AgentId::from("a"), &Pose::default());
        let b = backend.spawn(&AgentId::from("b"), &Pose::default());
        assert_ne!(a, b);
        assert_eq!(backend.stats().live(), 2);

        backend.release(a);
        let stats = backend.stats();
        assert_eq!(stats.live(), 1);
        assert_eq!(stats.spawned(), 2);
        assert_eq!(stats.released(), 1);
    }
}
