//! Backend interfaces: node emission, graph instantiation and submission.
//!
//! The engine is written once against [`NodeEmitter`] and
//! [`SubmissionQueue`]. A backend only translates the node descriptions in
//! this module into its native graph facility.

use std::fmt;
use std::sync::Arc;

use crate::error::{GraphError, GraphResult};
use crate::geometry::{DeviceLimits, LaunchDims, NdRange};
use crate::kernel::{Kernel, KernelArgs};
use crate::types::{
    DeviceHandle, DevicePtr, Location, MemoryAdvice, MigrationFlags, RectOffset, RectPitch,
    RectRegion,
};

// ── Capabilities ────────────────────────────────────────────────────────────

/// What the native graph facility can express directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitterCapabilities {
    /// Largest fill pattern (bytes) one native node can write.
    /// Anything up to 4 bytes always maps onto a single memset node.
    pub max_native_pattern: usize,
    pub supports_prefetch: bool,
    pub supports_advise: bool,
    pub supports_rect_copy: bool,
    pub supports_update: bool,
    pub limits: DeviceLimits,
}

impl Default for EmitterCapabilities {
    fn default() -> Self {
        Self {
            max_native_pattern: 4,
            supports_prefetch: false,
            supports_advise: false,
            supports_rect_copy: true,
            supports_update: true,
            limits: DeviceLimits::default(),
        }
    }
}

// ── Node descriptions ───────────────────────────────────────────────────────

/// A fully resolved kernel launch.
#[derive(Debug, Clone)]
pub struct KernelLaunch {
    pub kernel: Arc<Kernel>,
    pub args: KernelArgs,
    pub range: NdRange,
    pub dims: LaunchDims,
    pub local_mem_size: u32,
}

/// Linear copy of `size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemcpyNode {
    pub src: Location,
    pub dst: Location,
    pub size: usize,
}

/// Three-dimensional strided copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemcpyRectNode {
    pub src: Location,
    pub dst: Location,
    pub src_origin: RectOffset,
    pub dst_origin: RectOffset,
    pub region: RectRegion,
    /// Already resolved; never zero.
    pub src_pitch: RectPitch,
    pub dst_pitch: RectPitch,
}

/// Strided fill of 1, 2 or 4-byte elements.
///
/// Writes `count` elements of `element_size` bytes holding `value`, the
/// first at `dst` and each next one `pitch` bytes further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemsetNode {
    pub dst: DevicePtr,
    pub element_size: usize,
    pub value: u32,
    pub count: usize,
    pub pitch: usize,
}

/// Native fill with an arbitrary pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternFillNode {
    pub dst: DevicePtr,
    pub pattern: Vec<u8>,
    pub size: usize,
}

/// Prefetch hint over a USM range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchNode {
    pub ptr: DevicePtr,
    pub size: usize,
    pub flags: MigrationFlags,
}

/// Advice hint over a USM range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdviseNode {
    pub ptr: DevicePtr,
    pub size: usize,
    pub advice: MemoryAdvice,
}

// ── Emitter ─────────────────────────────────────────────────────────────────

/// Translates engine node descriptions into a native graph.
///
/// Every `emit_*` call receives the native tokens of the nodes the new node
/// must wait for and returns the token of the node it created. A failed call
/// must not leave a node behind in `graph`.
pub trait NodeEmitter: Send + Sync + 'static {
    /// Recording-time graph.
    type Graph: Send;
    /// Dependency token of one node.
    type Node: Clone + fmt::Debug + Send + Sync;
    /// Compiled, submittable form of a graph.
    type Executable: Send + Sync;

    fn device(&self) -> DeviceHandle;

    fn capabilities(&self) -> EmitterCapabilities;

    fn create_graph(&self) -> GraphResult<Self::Graph>;

    fn emit_kernel_launch(
        &self,
        graph: &mut Self::Graph,
        launch: &KernelLaunch,
        deps: &[Self::Node],
    ) -> GraphResult<Self::Node>;

    fn emit_memcpy(
        &self,
        graph: &mut Self::Graph,
        copy: &MemcpyNode,
        deps: &[Self::Node],
    ) -> GraphResult<Self::Node>;

    fn emit_memcpy_rect(
        &self,
        _graph: &mut Self::Graph,
        _copy: &MemcpyRectNode,
        _deps: &[Self::Node],
    ) -> GraphResult<Self::Node> {
        Err(GraphError::UnsupportedFeature("rectangular copy nodes".into()))
    }

    fn emit_memset(
        &self,
        graph: &mut Self::Graph,
        fill: &MemsetNode,
        deps: &[Self::Node],
    ) -> GraphResult<Self::Node>;

    /// Only called for patterns up to `max_native_pattern`.
    fn emit_pattern_fill(
        &self,
        _graph: &mut Self::Graph,
        _fill: &PatternFillNode,
        _deps: &[Self::Node],
    ) -> GraphResult<Self::Node> {
        Err(GraphError::UnsupportedFeature("native pattern fill nodes".into()))
    }

    /// A node that does nothing but join its dependencies.
    fn emit_empty(&self, graph: &mut Self::Graph, deps: &[Self::Node]) -> GraphResult<Self::Node>;

    /// Only called when `supports_prefetch` is set.
    fn emit_prefetch(
        &self,
        _graph: &mut Self::Graph,
        _hint: &PrefetchNode,
        _deps: &[Self::Node],
    ) -> GraphResult<Self::Node> {
        Err(GraphError::UnsupportedFeature("prefetch nodes".into()))
    }

    /// Only called when `supports_advise` is set.
    fn emit_advise(
        &self,
        _graph: &mut Self::Graph,
        _hint: &AdviseNode,
        _deps: &[Self::Node],
    ) -> GraphResult<Self::Node> {
        Err(GraphError::UnsupportedFeature("advise nodes".into()))
    }

    /// Compile a recorded graph. May be expensive.
    fn instantiate(&self, graph: &Self::Graph) -> GraphResult<Self::Executable>;

    /// Rewrite the parameters of one kernel node inside `exec`.
    ///
    /// Submissions made before this call keep the parameters they were
    /// submitted with.
    fn patch_kernel_node(
        &self,
        exec: &Self::Executable,
        node: &Self::Node,
        launch: &KernelLaunch,
    ) -> GraphResult<()>;
}

// ── Submission ──────────────────────────────────────────────────────────────

/// A queue that accepts compiled graphs of emitter `E`.
pub trait SubmissionQueue<E: NodeEmitter> {
    /// Completion signal of one submission.
    type Signal: Clone + Send + Sync;

    /// Make subsequent work on this queue wait for `signals`.
    fn wait_on(&self, signals: &[Self::Signal]) -> GraphResult<()>;

    /// Submit `exec`; return a signal when `want_signal` is set.
    fn submit(&self, exec: &E::Executable, want_signal: bool) -> GraphResult<Option<Self::Signal>>;
}
