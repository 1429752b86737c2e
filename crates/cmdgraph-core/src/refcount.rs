//! External/internal reference counts and lifecycle instrumentation.
//!
//! External counts track the application's handles. Internal counts track
//! who keeps an object alive; an object is torn down when its internal count
//! reaches zero. The cascade between buffers and commands is driven
//! explicitly by the owners of these counters, not by `Drop`.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Pair of atomic counters, both starting at one.
#[derive(Debug)]
pub struct RefCounts {
    external: AtomicU32,
    internal: AtomicU32,
}

impl Default for RefCounts {
    fn default() -> Self {
        Self::new()
    }
}

impl RefCounts {
    #[must_use]
    pub const fn new() -> Self {
        Self { external: AtomicU32::new(1), internal: AtomicU32::new(1) }
    }

    #[must_use]
    pub fn external(&self) -> u32 {
        self.external.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn internal(&self) -> u32 {
        self.internal.load(Ordering::Acquire)
    }

    /// Returns the new external count.
    pub fn increment_external(&self) -> u32 {
        self.external.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the new internal count.
    pub fn increment_internal(&self) -> u32 {
        self.internal.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the new external count; saturates at zero.
    pub fn decrement_external(&self) -> u32 {
        saturating_decrement(&self.external)
    }

    /// Returns the new internal count; saturates at zero.
    pub fn decrement_internal(&self) -> u32 {
        saturating_decrement(&self.internal)
    }
}

fn saturating_decrement(counter: &AtomicU32) -> u32 {
    match counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1)) {
        Ok(prev) => prev - 1,
        Err(_) => 0,
    }
}

// ── Lifecycle hook ──────────────────────────────────────────────────────────

/// Kind of engine object a lifecycle event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    CommandBuffer,
    Command,
}

/// Receives create/destroy notifications for engine objects.
pub trait LifecycleObserver: Send + Sync {
    fn created(&self, kind: ObjectKind, handle: u64);
    fn destroyed(&self, kind: ObjectKind, handle: u64);
}

/// Observer that counts constructions and destructions per kind.
#[derive(Debug, Default)]
pub struct LifecycleCounter {
    buffers_created: AtomicUsize,
    buffers_destroyed: AtomicUsize,
    commands_created: AtomicUsize,
    commands_destroyed: AtomicUsize,
}

impl LifecycleCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn created_count(&self, kind: ObjectKind) -> usize {
        match kind {
            ObjectKind::CommandBuffer => self.buffers_created.load(Ordering::Acquire),
            ObjectKind::Command => self.commands_created.load(Ordering::Acquire),
        }
    }

    #[must_use]
    pub fn destroyed_count(&self, kind: ObjectKind) -> usize {
        match kind {
            ObjectKind::CommandBuffer => self.buffers_destroyed.load(Ordering::Acquire),
            ObjectKind::Command => self.commands_destroyed.load(Ordering::Acquire),
        }
    }

    /// Objects of `kind` created but not yet destroyed.
    #[must_use]
    pub fn live(&self, kind: ObjectKind) -> usize {
        self.created_count(kind) - self.destroyed_count(kind)
    }
}

impl LifecycleObserver for LifecycleCounter {
    fn created(&self, kind: ObjectKind, _handle: u64) {
        match kind {
            ObjectKind::CommandBuffer => self.buffers_created.fetch_add(1, Ordering::AcqRel),
            ObjectKind::Command => self.commands_created.fetch_add(1, Ordering::AcqRel),
        };
    }

    fn destroyed(&self, kind: ObjectKind, _handle: u64) {
        match kind {
            ObjectKind::CommandBuffer => self.buffers_destroyed.fetch_add(1, Ordering::AcqRel),
            ObjectKind::Command => self.commands_destroyed.fetch_add(1, Ordering::AcqRel),
        };
    }
}
