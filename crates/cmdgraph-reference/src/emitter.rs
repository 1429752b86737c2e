//! [`NodeEmitter`] implementation that records into [`HostGraph`]s.
//!
//! Every emit validates its memory ranges against the device address space
//! at recording time, so a bad pointer fails the append instead of the run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use cmdgraph_core::{
    AdviseNode, DeviceHandle, DevicePtr, EmitterCapabilities, GraphConfig, GraphError,
    GraphResult, KernelLaunch, MemcpyNode, MemcpyRectNode, MemsetNode, NodeEmitter,
    PatternFillNode, PrefetchNode,
};
use tracing::{debug, trace};

use crate::graph::{HostExecutable, HostGraph, HostKernel, HostOp, NodeId};
use crate::kernels::KernelRegistry;
use crate::memory::ReferenceDevice;

// ── Failure injection ───────────────────────────────────────────────────────

const UNLIMITED: usize = usize::MAX;

/// Scripted backend failures.
#[derive(Debug)]
pub struct FaultPlan {
    emit_budget: AtomicUsize,
    instantiate: AtomicBool,
    patch: AtomicBool,
}

impl Default for FaultPlan {
    fn default() -> Self {
        Self {
            emit_budget: AtomicUsize::new(UNLIMITED),
            instantiate: AtomicBool::new(false),
            patch: AtomicBool::new(false),
        }
    }
}

impl FaultPlan {
    /// Let `n` more nodes be created, then fail every node creation with
    /// `OutOfResources`.
    pub fn fail_emit_after(&self, n: usize) {
        self.emit_budget.store(n, Ordering::SeqCst);
    }

    pub fn fail_instantiate(&self, fail: bool) {
        self.instantiate.store(fail, Ordering::SeqCst);
    }

    pub fn fail_patch(&self, fail: bool) {
        self.patch.store(fail, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.emit_budget.store(UNLIMITED, Ordering::SeqCst);
        self.instantiate.store(false, Ordering::SeqCst);
        self.patch.store(false, Ordering::SeqCst);
    }

    fn take_emit(&self) -> GraphResult<()> {
        let taken = self.emit_budget.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
            match left {
                UNLIMITED => Some(UNLIMITED),
                0 => None,
                n => Some(n - 1),
            }
        });
        taken
            .map(|_| ())
            .map_err(|_| GraphError::OutOfResources("injected node creation failure".into()))
    }
}

// ── Emitter ─────────────────────────────────────────────────────────────────

/// CPU backend: host graphs over a [`ReferenceDevice`].
#[derive(Debug)]
pub struct ReferenceEmitter {
    device: ReferenceDevice,
    kernels: KernelRegistry,
    caps: EmitterCapabilities,
    faults: FaultPlan,
}

impl ReferenceEmitter {
    /// Emitter with default capabilities: native memsets only, no hint
    /// nodes, rectangular copies and updates supported.
    #[must_use]
    pub fn new(device: ReferenceDevice, kernels: KernelRegistry) -> Self {
        Self { device, kernels, caps: EmitterCapabilities::default(), faults: FaultPlan::default() }
    }

    /// Take device limits from `config`.
    #[must_use]
    pub fn from_config(device: ReferenceDevice, kernels: KernelRegistry, config: &GraphConfig) -> Self {
        let mut emitter = Self::new(device, kernels);
        emitter.caps.limits = config.device_limits();
        emitter
    }

    #[must_use]
    pub fn with_capabilities(mut self, caps: EmitterCapabilities) -> Self {
        self.caps = caps;
        self
    }

    /// Largest pattern written by one native pattern-fill node.
    #[must_use]
    pub fn with_max_native_pattern(mut self, bytes: usize) -> Self {
        self.caps.max_native_pattern = bytes;
        self
    }

    /// Record prefetch and advise as real nodes.
    #[must_use]
    pub fn with_hint_nodes(mut self, enabled: bool) -> Self {
        self.caps.supports_prefetch = enabled;
        self.caps.supports_advise = enabled;
        self
    }

    /// Handle to the emitter, ready to hand to a command buffer.
    #[must_use]
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    #[must_use]
    pub const fn memory(&self) -> &ReferenceDevice {
        &self.device
    }

    #[must_use]
    pub const fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }

    #[must_use]
    pub const fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    fn check_span(&self, what: &str, ptr: DevicePtr, len: usize) -> GraphResult<()> {
        if len == 0 {
            return Ok(());
        }
        self.device
            .lock()?
            .slice(ptr, len)
            .map(|_| ())
            .map_err(|e| GraphError::InvalidValue(format!("{what}: {e}")))
    }

    fn add(&self, graph: &mut HostGraph, op: HostOp, deps: &[NodeId]) -> GraphResult<NodeId> {
        self.faults.take_emit()?;
        let label = op.label();
        let node = graph.add(op, deps)?;
        trace!(node = node.index(), deps = deps.len(), op = label, "host node added");
        Ok(node)
    }
}

impl NodeEmitter for ReferenceEmitter {
    type Graph = HostGraph;
    type Node = NodeId;
    type Executable = HostExecutable;

    fn device(&self) -> DeviceHandle {
        self.device.handle()
    }

    fn capabilities(&self) -> EmitterCapabilities {
        self.caps
    }

    fn create_graph(&self) -> GraphResult<HostGraph> {
        Ok(HostGraph::new())
    }

    fn emit_kernel_launch(
        &self,
        graph: &mut HostGraph,
        launch: &KernelLaunch,
        deps: &[NodeId],
    ) -> GraphResult<NodeId> {
        let name = launch.kernel.name();
        let Some(body) = self.kernels.get(name)? else {
            return Err(GraphError::InvalidKernel(format!(
                "no host body registered for kernel '{name}'"
            )));
        };
        let op = HostOp::Kernel { kernel: HostKernel::new(name, body), launch: launch.clone() };
        self.add(graph, op, deps)
    }

    fn emit_memcpy(
        &self,
        graph: &mut HostGraph,
        copy: &MemcpyNode,
        deps: &[NodeId],
    ) -> GraphResult<NodeId> {
        self.check_span("copy source", copy.src.ptr, copy.size)?;
        self.check_span("copy destination", copy.dst.ptr, copy.size)?;
        self.add(graph, HostOp::Memcpy(*copy), deps)
    }

    fn emit_memcpy_rect(
        &self,
        graph: &mut HostGraph,
        copy: &MemcpyRectNode,
        deps: &[NodeId],
    ) -> GraphResult<NodeId> {
        let overflow = || GraphError::invalid_size("rect copy extent overflows");
        let src = copy.src_pitch.extent(&copy.src_origin, &copy.region).ok_or_else(overflow)?;
        let dst = copy.dst_pitch.extent(&copy.dst_origin, &copy.region).ok_or_else(overflow)?;
        if !copy.region.is_empty() {
            self.check_span("rect source", copy.src.ptr, src)?;
            self.check_span("rect destination", copy.dst.ptr, dst)?;
        }
        self.add(graph, HostOp::MemcpyRect(*copy), deps)
    }

    fn emit_memset(
        &self,
        graph: &mut HostGraph,
        fill: &MemsetNode,
        deps: &[NodeId],
    ) -> GraphResult<NodeId> {
        if !matches!(fill.element_size, 1 | 2 | 4) {
            return Err(GraphError::InvalidValue(format!(
                "memset element size {} is not 1, 2 or 4",
                fill.element_size
            )));
        }
        if fill.count > 0 {
            let span = (fill.count - 1) * fill.pitch + fill.element_size;
            self.check_span("memset", fill.dst, span)?;
        }
        self.add(graph, HostOp::Memset(*fill), deps)
    }

    fn emit_pattern_fill(
        &self,
        graph: &mut HostGraph,
        fill: &PatternFillNode,
        deps: &[NodeId],
    ) -> GraphResult<NodeId> {
        if fill.pattern.is_empty() || fill.pattern.len() > self.caps.max_native_pattern {
            return Err(GraphError::UnsupportedFeature(format!(
                "{}-byte native pattern fill",
                fill.pattern.len()
            )));
        }
        self.check_span("pattern fill", fill.dst, fill.size)?;
        self.add(graph, HostOp::PatternFill(fill.clone()), deps)
    }

    fn emit_empty(&self, graph: &mut HostGraph, deps: &[NodeId]) -> GraphResult<NodeId> {
        self.add(graph, HostOp::Empty, deps)
    }

    fn emit_prefetch(
        &self,
        graph: &mut HostGraph,
        hint: &PrefetchNode,
        deps: &[NodeId],
    ) -> GraphResult<NodeId> {
        if !self.caps.supports_prefetch {
            return Err(GraphError::UnsupportedFeature("prefetch nodes".into()));
        }
        self.check_span("prefetch", hint.ptr, hint.size)?;
        self.add(graph, HostOp::Prefetch(*hint), deps)
    }

    fn emit_advise(
        &self,
        graph: &mut HostGraph,
        hint: &AdviseNode,
        deps: &[NodeId],
    ) -> GraphResult<NodeId> {
        if !self.caps.supports_advise {
            return Err(GraphError::UnsupportedFeature("advise nodes".into()));
        }
        self.check_span("advise", hint.ptr, hint.size)?;
        self.add(graph, HostOp::Advise(*hint), deps)
    }

    fn instantiate(&self, graph: &HostGraph) -> GraphResult<HostExecutable> {
        if self.faults.instantiate.load(Ordering::SeqCst) {
            return Err(GraphError::OutOfResources("injected instantiate failure".into()));
        }
        let exec = HostExecutable::compile(graph)?;
        debug!(nodes = exec.len(), "host graph instantiated");
        Ok(exec)
    }

    fn patch_kernel_node(
        &self,
        exec: &HostExecutable,
        node: &NodeId,
        launch: &KernelLaunch,
    ) -> GraphResult<()> {
        if self.faults.patch.load(Ordering::SeqCst) {
            return Err(GraphError::unknown("injected kernel node patch failure"));
        }
        exec.patch(*node, launch)
    }
}
