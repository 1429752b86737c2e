//! Recording: every `append_*` operation of a command buffer.
//!
//! Each append resolves its dependency list, asks the emitter for the native
//! node(s), and only then registers a new sync point. A failed append leaves
//! the sync-point table untouched.

use std::sync::Arc;

use tracing::debug;

use crate::command::{Command, CommandInner};
use crate::command_buffer::{CommandBuffer, Recording};
use crate::diagnostics::warn_once;
use crate::emitter::{
    AdviseNode, KernelLaunch, MemcpyNode, MemcpyRectNode, NodeEmitter, PrefetchNode,
};
use crate::error::{GraphError, GraphResult};
use crate::fill::{FillStep, plan_fill, validate_fill};
use crate::geometry::{NdRange, resolve_launch_dims};
use crate::kernel::{Kernel, MemoryObject};
use crate::types::{
    DevicePtr, Location, MemoryAdvice, MigrationFlags, RectOffset, RectPitch, RectRegion,
    SyncPoint,
};

/// Whether an append did exactly what was asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendStatus {
    Complete,
    /// The backend has no native node for this hint; an empty node that
    /// keeps the dependencies was recorded instead.
    Substituted,
}

/// Result of a hint append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    pub sync_point: SyncPoint,
    pub status: AppendStatus,
}

impl Appended {
    #[must_use]
    pub fn is_substituted(&self) -> bool {
        self.status == AppendStatus::Substituted
    }
}

/// Result of a kernel-launch append.
#[derive(Debug)]
pub struct KernelLaunchAppend<E: NodeEmitter> {
    pub sync_point: SyncPoint,
    /// `None` when the launch had an empty global size.
    pub command: Option<Command<E>>,
}

/// Geometry of a rectangular copy.
///
/// For buffer reads the buffer is the source; for writes it is the
/// destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RectCopy {
    pub src_origin: RectOffset,
    pub dst_origin: RectOffset,
    pub region: RectRegion,
    pub src_pitch: RectPitch,
    pub dst_pitch: RectPitch,
}

fn check_range(what: &str, offset: usize, size: usize, limit: usize) -> GraphResult<()> {
    match offset.checked_add(size) {
        Some(end) if end <= limit => Ok(()),
        _ => Err(GraphError::invalid_size(format!(
            "{what}: offset {offset} + size {size} exceeds {limit} bytes"
        ))),
    }
}

fn resolve_pitch(what: &str, pitch: RectPitch, region: &RectRegion) -> GraphResult<RectPitch> {
    pitch.resolve(region).ok_or_else(|| {
        GraphError::invalid_size(format!("{what}: packed pitch of {region:?} overflows"))
    })
}

/// Bytes from the base address touched by one side of a rect copy.
fn rect_extent(
    what: &str,
    pitch: RectPitch,
    origin: &RectOffset,
    region: &RectRegion,
) -> GraphResult<usize> {
    resolve_pitch(what, pitch, region)?.extent(origin, region).ok_or_else(|| {
        GraphError::invalid_size(format!("{what}: origin {origin:?} with {pitch:?} overflows"))
    })
}

fn located(obj: &dyn MemoryObject, offset: usize) -> Location {
    Location { ptr: obj.device_address().offset(offset), kind: obj.kind() }
}

impl<E: NodeEmitter> CommandBuffer<E> {
    /// Resolve `deps`, emit one node, register it.
    fn append_node<F>(&self, op: &'static str, deps: &[SyncPoint], emit: F) -> GraphResult<SyncPoint>
    where
        F: FnOnce(&E, &mut E::Graph, &[E::Node]) -> GraphResult<E::Node>,
    {
        let mut guard = self.lock_for_append()?;
        let rec = &mut *guard;
        let deps = rec.sync_points.resolve(deps)?;
        let node = emit(&self.inner.emitter, rec.graph_mut()?, &deps)?;
        let sp = rec.sync_points.register(node);
        debug!(buffer = self.inner.handle, sync_point = sp.id(), deps = deps.len(), op, "appended");
        Ok(sp)
    }

    fn lock_for_append(&self) -> GraphResult<std::sync::MutexGuard<'_, Recording<E>>> {
        let guard = self.inner.lock_recording()?;
        if self.inner.is_finalized()? {
            return Err(GraphError::invalid_operation(
                "command buffer is finalized; no further commands can be appended",
            ));
        }
        Ok(guard)
    }

    // ── Kernel launch ───────────────────────────────────────────────

    /// Record a launch of `kernel` over `range`.
    ///
    /// The kernel's arguments are captured as they are now. A range with an
    /// empty global size records a no-op node and yields no [`Command`].
    pub fn append_kernel_launch(
        &self,
        kernel: &Arc<Kernel>,
        range: &NdRange,
        deps: &[SyncPoint],
    ) -> GraphResult<KernelLaunchAppend<E>> {
        if kernel.context() != self.inner.context {
            return Err(GraphError::InvalidKernel(format!(
                "kernel '{}' belongs to a different context",
                kernel.name()
            )));
        }

        let mut guard = self.lock_for_append()?;
        let rec = &mut *guard;
        let dep_nodes = rec.sync_points.resolve(deps)?;
        let emitter = &self.inner.emitter;

        if range.is_empty() {
            let node = emitter.emit_empty(rec.graph_mut()?, &dep_nodes)?;
            let sync_point = rec.sync_points.register(node);
            debug!(
                buffer = self.inner.handle,
                sync_point = sync_point.id(),
                kernel = kernel.name(),
                "empty launch recorded as no-op"
            );
            return Ok(KernelLaunchAppend { sync_point, command: None });
        }

        let dims = resolve_launch_dims(range, &emitter.capabilities().limits)?;
        let launch = KernelLaunch {
            kernel: Arc::clone(kernel),
            args: kernel.snapshot_args()?,
            range: *range,
            dims,
            local_mem_size: kernel.local_mem_size(),
        };
        let node = emitter.emit_kernel_launch(rec.graph_mut()?, &launch, &dep_nodes)?;
        let sync_point = rec.sync_points.register(node.clone());

        let inner = CommandInner::new(&self.inner, Arc::clone(kernel), node, *range);
        rec.commands.push(Arc::clone(&inner));
        debug!(
            buffer = self.inner.handle,
            sync_point = sync_point.id(),
            command = inner.handle,
            kernel = kernel.name(),
            blocks = ?dims.blocks_per_grid,
            threads = ?dims.threads_per_block,
            "kernel launch appended"
        );
        Ok(KernelLaunchAppend { sync_point, command: Some(Command { inner }) })
    }

    // ── Copies ──────────────────────────────────────────────────────

    /// Linear copy between two USM locations.
    pub fn append_memcpy(
        &self,
        dst: Location,
        src: Location,
        size: usize,
        deps: &[SyncPoint],
    ) -> GraphResult<SyncPoint> {
        let copy = MemcpyNode { src, dst, size };
        self.append_node("memcpy", deps, |e, g, d| e.emit_memcpy(g, &copy, d))
    }

    /// Device-to-device copy between two memory objects.
    pub fn append_buffer_copy(
        &self,
        src: &dyn MemoryObject,
        dst: &dyn MemoryObject,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
        deps: &[SyncPoint],
    ) -> GraphResult<SyncPoint> {
        check_range("destination buffer", dst_offset, size, dst.size())?;
        check_range("source buffer", src_offset, size, src.size())?;
        let copy = MemcpyNode { src: located(src, src_offset), dst: located(dst, dst_offset), size };
        self.append_node("buffer_copy", deps, |e, g, d| e.emit_memcpy(g, &copy, d))
    }

    /// Host memory at `src` into `buffer` at `offset`.
    pub fn append_buffer_write(
        &self,
        buffer: &dyn MemoryObject,
        offset: usize,
        src: DevicePtr,
        size: usize,
        deps: &[SyncPoint],
    ) -> GraphResult<SyncPoint> {
        check_range("buffer write", offset, size, buffer.size())?;
        let copy = MemcpyNode { src: Location::host(src), dst: located(buffer, offset), size };
        self.append_node("buffer_write", deps, |e, g, d| e.emit_memcpy(g, &copy, d))
    }

    /// `buffer` at `offset` into host memory at `dst`.
    pub fn append_buffer_read(
        &self,
        buffer: &dyn MemoryObject,
        offset: usize,
        dst: DevicePtr,
        size: usize,
        deps: &[SyncPoint],
    ) -> GraphResult<SyncPoint> {
        check_range("buffer read", offset, size, buffer.size())?;
        let copy = MemcpyNode { src: located(buffer, offset), dst: Location::host(dst), size };
        self.append_node("buffer_read", deps, |e, g, d| e.emit_memcpy(g, &copy, d))
    }

    fn append_rect(
        &self,
        op: &'static str,
        src: Location,
        dst: Location,
        rect: &RectCopy,
        deps: &[SyncPoint],
    ) -> GraphResult<SyncPoint> {
        if !self.inner.emitter.capabilities().supports_rect_copy {
            return Err(GraphError::UnsupportedFeature(format!("{op} on this backend")));
        }
        let copy = MemcpyRectNode {
            src,
            dst,
            src_origin: rect.src_origin,
            dst_origin: rect.dst_origin,
            region: rect.region,
            src_pitch: resolve_pitch(op, rect.src_pitch, &rect.region)?,
            dst_pitch: resolve_pitch(op, rect.dst_pitch, &rect.region)?,
        };
        self.append_node(op, deps, |e, g, d| e.emit_memcpy_rect(g, &copy, d))
    }

    /// Rectangular copy between two memory objects.
    pub fn append_buffer_copy_rect(
        &self,
        src: &dyn MemoryObject,
        dst: &dyn MemoryObject,
        rect: &RectCopy,
        deps: &[SyncPoint],
    ) -> GraphResult<SyncPoint> {
        let src_end = rect_extent("source rect", rect.src_pitch, &rect.src_origin, &rect.region)?;
        let dst_end = rect_extent("destination rect", rect.dst_pitch, &rect.dst_origin, &rect.region)?;
        check_range("source rect", 0, src_end, src.size())?;
        check_range("destination rect", 0, dst_end, dst.size())?;
        self.append_rect("buffer_copy_rect", located(src, 0), located(dst, 0), rect, deps)
    }

    /// Rectangular host-to-buffer copy; the buffer is the destination side of `rect`.
    pub fn append_buffer_write_rect(
        &self,
        buffer: &dyn MemoryObject,
        src: DevicePtr,
        rect: &RectCopy,
        deps: &[SyncPoint],
    ) -> GraphResult<SyncPoint> {
        let end = rect_extent("buffer write rect", rect.dst_pitch, &rect.dst_origin, &rect.region)?;
        check_range("buffer write rect", 0, end, buffer.size())?;
        self.append_rect("buffer_write_rect", Location::host(src), located(buffer, 0), rect, deps)
    }

    /// Rectangular buffer-to-host copy; the buffer is the source side of `rect`.
    pub fn append_buffer_read_rect(
        &self,
        buffer: &dyn MemoryObject,
        dst: DevicePtr,
        rect: &RectCopy,
        deps: &[SyncPoint],
    ) -> GraphResult<SyncPoint> {
        let end = rect_extent("buffer read rect", rect.src_pitch, &rect.src_origin, &rect.region)?;
        check_range("buffer read rect", 0, end, buffer.size())?;
        self.append_rect("buffer_read_rect", located(buffer, 0), Location::host(dst), rect, deps)
    }

    // ── Fills ───────────────────────────────────────────────────────

    /// Fill `size` bytes at `ptr` with repetitions of `pattern`.
    pub fn append_usm_fill(
        &self,
        ptr: DevicePtr,
        pattern: &[u8],
        size: usize,
        deps: &[SyncPoint],
    ) -> GraphResult<SyncPoint> {
        validate_fill(pattern, 0, size)?;
        self.append_fill_chain(ptr, pattern, size, deps)
    }

    /// Fill `size` bytes of `buffer` from `offset` with repetitions of `pattern`.
    pub fn append_buffer_fill(
        &self,
        buffer: &dyn MemoryObject,
        pattern: &[u8],
        offset: usize,
        size: usize,
        deps: &[SyncPoint],
    ) -> GraphResult<SyncPoint> {
        validate_fill(pattern, offset, size)?;
        check_range("buffer fill", offset, size, buffer.size())?;
        self.append_fill_chain(buffer.device_address().offset(offset), pattern, size, deps)
    }

    /// Emit a fill as a chain of nodes; only the last one gets a sync point.
    fn append_fill_chain(
        &self,
        dst: DevicePtr,
        pattern: &[u8],
        size: usize,
        deps: &[SyncPoint],
    ) -> GraphResult<SyncPoint> {
        let emitter = &self.inner.emitter;
        let steps = plan_fill(dst, pattern, size, emitter.capabilities().max_native_pattern);

        let mut guard = self.lock_for_append()?;
        let rec = &mut *guard;
        let mut prev = rec.sync_points.resolve(deps)?;
        let graph = rec.graph_mut()?;
        for step in &steps {
            let node = match step {
                FillStep::Memset(m) => emitter.emit_memset(graph, m, &prev)?,
                FillStep::Pattern(p) => emitter.emit_pattern_fill(graph, p, &prev)?,
            };
            prev = vec![node];
        }
        let Some(last) = prev.pop() else {
            return Err(GraphError::unknown("fill produced no nodes"));
        };
        let sp = rec.sync_points.register(last);
        debug!(
            buffer = self.inner.handle,
            sync_point = sp.id(),
            pattern_size = pattern.len(),
            nodes = steps.len(),
            "fill appended"
        );
        Ok(sp)
    }

    // ── Hints ───────────────────────────────────────────────────────

    /// Prefetch hint. Recorded as an empty node when the backend has no
    /// native prefetch, with [`AppendStatus::Substituted`].
    pub fn append_usm_prefetch(
        &self,
        ptr: DevicePtr,
        size: usize,
        flags: MigrationFlags,
        deps: &[SyncPoint],
    ) -> GraphResult<Appended> {
        if self.inner.emitter.capabilities().supports_prefetch {
            let hint = PrefetchNode { ptr, size, flags };
            let sync_point =
                self.append_node("prefetch", deps, |e, g, d| e.emit_prefetch(g, &hint, d))?;
            return Ok(Appended { sync_point, status: AppendStatus::Complete });
        }
        let sync_point = self.append_node("prefetch", deps, |e, g, d| e.emit_empty(g, d))?;
        warn_once(
            "cmdgraph_prefetch_substituted",
            "prefetch hint replaced with an empty node; backend graphs cannot prefetch",
        );
        Ok(Appended { sync_point, status: AppendStatus::Substituted })
    }

    /// Memory advice hint, substituted the same way as prefetch.
    pub fn append_usm_advise(
        &self,
        ptr: DevicePtr,
        size: usize,
        advice: MemoryAdvice,
        deps: &[SyncPoint],
    ) -> GraphResult<Appended> {
        if self.inner.emitter.capabilities().supports_advise {
            let hint = AdviseNode { ptr, size, advice };
            let sync_point =
                self.append_node("advise", deps, |e, g, d| e.emit_advise(g, &hint, d))?;
            return Ok(Appended { sync_point, status: AppendStatus::Complete });
        }
        let sync_point = self.append_node("advise", deps, |e, g, d| e.emit_empty(g, d))?;
        warn_once(
            "cmdgraph_advise_substituted",
            "memory advice replaced with an empty node; backend graphs cannot take advice",
        );
        Ok(Appended { sync_point, status: AppendStatus::Substituted })
    }
}
