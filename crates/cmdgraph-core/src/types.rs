//! Small value types shared by the engine and its backends.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// ── Handle generation ───────────────────────────────────────────────────────

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_handle() -> u64 {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

/// Execution context that kernels and command buffers belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(u64);

impl ContextHandle {
    /// Allocate a fresh context identity.
    #[must_use]
    pub fn create() -> Self {
        Self(next_handle())
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Device a command buffer targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(u64);

impl DeviceHandle {
    #[must_use]
    pub fn create() -> Self {
        Self(next_handle())
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

// ── Sync points ─────────────────────────────────────────────────────────────

/// Dependency handle returned by every append.
///
/// The id is dense per command buffer and starts at zero. The owning buffer
/// is carried along so a sync point from another buffer never resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncPoint {
    buffer: u64,
    id: u32,
}

impl SyncPoint {
    pub(crate) const fn new(buffer: u64, id: u32) -> Self {
        Self { buffer, id }
    }

    #[must_use]
    pub const fn id(self) -> u32 {
        self.id
    }

    pub(crate) const fn buffer(self) -> u64 {
        self.buffer
    }
}

impl fmt::Display for SyncPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sync-point {}", self.id)
    }
}

// ── Memory addressing ───────────────────────────────────────────────────────

/// Address in the backend's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    pub const NULL: Self = Self(0);

    #[must_use]
    pub const fn offset(self, bytes: usize) -> Self {
        Self(self.0 + bytes as u64)
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Where an allocation lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    Device,
    Host,
    Shared,
}

/// One end of a copy: an address plus the memory it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub ptr: DevicePtr,
    pub kind: MemoryKind,
}

impl Location {
    #[must_use]
    pub const fn device(ptr: DevicePtr) -> Self {
        Self { ptr, kind: MemoryKind::Device }
    }

    #[must_use]
    pub const fn host(ptr: DevicePtr) -> Self {
        Self { ptr, kind: MemoryKind::Host }
    }

    #[must_use]
    pub const fn shared(ptr: DevicePtr) -> Self {
        Self { ptr, kind: MemoryKind::Shared }
    }
}

// ── Rectangular regions ─────────────────────────────────────────────────────

/// Origin of a rectangular copy, in bytes / rows / slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RectOffset {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl RectOffset {
    #[must_use]
    pub const fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }
}

/// Extent of a rectangular copy. `width` is in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RectRegion {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl RectRegion {
    #[must_use]
    pub const fn new(width: usize, height: usize, depth: usize) -> Self {
        Self { width, height, depth }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.depth == 0
    }
}

/// Row and slice pitch of one side of a rectangular copy.
///
/// A zero pitch means tightly packed for the copied region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RectPitch {
    pub row: usize,
    pub slice: usize,
}

impl RectPitch {
    #[must_use]
    pub const fn new(row: usize, slice: usize) -> Self {
        Self { row, slice }
    }

    /// Replace zero pitches with the packed pitch of `region`.
    ///
    /// `None` when the packed slice pitch overflows.
    #[must_use]
    pub fn resolve(self, region: &RectRegion) -> Option<Self> {
        let row = if self.row == 0 { region.width } else { self.row };
        let slice = if self.slice == 0 { row.checked_mul(region.height)? } else { self.slice };
        Some(Self { row, slice })
    }

    /// Linear byte offset of `origin` under this pitch; `None` on overflow.
    #[must_use]
    pub fn linear(&self, origin: &RectOffset) -> Option<usize> {
        origin
            .z
            .checked_mul(self.slice)?
            .checked_add(origin.y.checked_mul(self.row)?)?
            .checked_add(origin.x)
    }

    /// Bytes spanned by `region` placed at `origin`, i.e. one past the last
    /// byte touched. `None` on overflow.
    #[must_use]
    pub fn extent(&self, origin: &RectOffset, region: &RectRegion) -> Option<usize> {
        if region.is_empty() {
            return self.linear(origin);
        }
        let last = RectOffset {
            x: origin.x.checked_add(region.width - 1)?,
            y: origin.y.checked_add(region.height - 1)?,
            z: origin.z.checked_add(region.depth - 1)?,
        };
        self.linear(&last)?.checked_add(1)
    }
}

// ── Hint flags ──────────────────────────────────────────────────────────────

/// Direction of a USM prefetch hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MigrationFlags {
    #[default]
    HostToDevice,
    DeviceToHost,
}

/// Advice attached to a USM range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAdvice {
    SetReadMostly,
    ClearReadMostly,
    SetPreferredLocation,
    ClearPreferredLocation,
    SetAccessedBy,
    ClearAccessedBy,
}
