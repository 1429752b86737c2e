//! Host graphs: the recording-time DAG and its compiled executable.
//!
//! Nodes are stored in emission order together with the indices of the
//! nodes they wait for. Instantiation fixes a topological order once;
//! every run walks that order over a snapshot of the node parameters.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use cmdgraph_core::{
    AdviseNode, GraphError, GraphResult, KernelLaunch, MemcpyNode, MemcpyRectNode, MemsetNode,
    PatternFillNode, PrefetchNode, RectOffset,
};

use crate::kernels::{KernelFn, KernelInvocation};
use crate::memory::{AddressSpace, ReferenceDevice};

static NEXT_GRAPH: AtomicU64 = AtomicU64::new(1);

/// Native token of one node: which graph, which slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    graph: u64,
    index: usize,
}

impl NodeId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }
}

/// A kernel body bound at emission time.
#[derive(Clone)]
pub struct HostKernel {
    name: String,
    body: KernelFn,
}

impl HostKernel {
    pub(crate) fn new(name: impl Into<String>, body: KernelFn) -> Self {
        Self { name: name.into(), body }
    }
}

impl fmt::Debug for HostKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostKernel").field("name", &self.name).finish_non_exhaustive()
    }
}

// ── Operations ──────────────────────────────────────────────────────────────

/// What one node does when the graph runs.
#[derive(Debug, Clone)]
pub enum HostOp {
    Kernel { kernel: HostKernel, launch: KernelLaunch },
    Memcpy(MemcpyNode),
    MemcpyRect(MemcpyRectNode),
    Memset(MemsetNode),
    PatternFill(PatternFillNode),
    Prefetch(PrefetchNode),
    Advise(AdviseNode),
    Empty,
}

impl HostOp {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Kernel { .. } => "kernel",
            Self::Memcpy(_) => "memcpy",
            Self::MemcpyRect(_) => "memcpy_rect",
            Self::Memset(_) => "memset",
            Self::PatternFill(_) => "pattern_fill",
            Self::Prefetch(_) => "prefetch",
            Self::Advise(_) => "advise",
            Self::Empty => "empty",
        }
    }

    /// Launch parameters, for kernel nodes.
    #[must_use]
    pub const fn kernel_launch(&self) -> Option<&KernelLaunch> {
        match self {
            Self::Kernel { launch, .. } => Some(launch),
            _ => None,
        }
    }

    fn run(&self, space: &mut AddressSpace) -> GraphResult<()> {
        match self {
            Self::Kernel { kernel, launch } => {
                let mut inv = KernelInvocation::new(launch, space);
                (kernel.body)(&mut inv)
            }
            Self::Memcpy(copy) => Ok(space.copy(copy.dst.ptr, copy.src.ptr, copy.size)?),
            Self::MemcpyRect(copy) => run_rect(space, copy),
            Self::Memset(fill) => {
                let bytes = fill.value.to_le_bytes();
                let element = &bytes[..fill.element_size];
                for i in 0..fill.count {
                    space.write(fill.dst.offset(i * fill.pitch), element)?;
                }
                Ok(())
            }
            Self::PatternFill(fill) => {
                let p = fill.pattern.len();
                for start in (0..fill.size).step_by(p) {
                    let n = p.min(fill.size - start);
                    space.write(fill.dst.offset(start), &fill.pattern[..n])?;
                }
                Ok(())
            }
            // Residency hints have no observable effect on host memory.
            Self::Prefetch(_) | Self::Advise(_) | Self::Empty => Ok(()),
        }
    }
}

fn run_rect(space: &mut AddressSpace, copy: &MemcpyRectNode) -> GraphResult<()> {
    let (so, d_o) = (copy.src_origin, copy.dst_origin);
    for z in 0..copy.region.depth {
        for y in 0..copy.region.height {
            let src = copy.src_pitch.linear(&RectOffset::new(so.x, so.y + y, so.z + z));
            let dst = copy.dst_pitch.linear(&RectOffset::new(d_o.x, d_o.y + y, d_o.z + z));
            let (Some(src), Some(dst)) = (src, dst) else {
                return Err(GraphError::invalid_size("rect copy row offset overflows"));
            };
            space.copy(copy.dst.ptr.offset(dst), copy.src.ptr.offset(src), copy.region.width)?;
        }
    }
    Ok(())
}

// ── Recording graph ─────────────────────────────────────────────────────────

#[derive(Debug)]
struct HostNode {
    op: HostOp,
    deps: Vec<usize>,
}

/// A DAG under construction.
#[derive(Debug)]
pub struct HostGraph {
    id: u64,
    nodes: Vec<HostNode>,
}

impl HostGraph {
    pub(crate) fn new() -> Self {
        Self { id: NEXT_GRAPH.fetch_add(1, Ordering::Relaxed), nodes: Vec::new() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn op(&self, node: NodeId) -> Option<&HostOp> {
        self.nodes.get(node.index).filter(|_| node.graph == self.id).map(|n| &n.op)
    }

    /// Indices of the nodes `node` waits for.
    #[must_use]
    pub fn deps(&self, node: NodeId) -> Option<&[usize]> {
        self.nodes.get(node.index).filter(|_| node.graph == self.id).map(|n| n.deps.as_slice())
    }

    /// Append `op` after `deps`; nothing is added if a dependency is foreign.
    pub(crate) fn add(&mut self, op: HostOp, deps: &[NodeId]) -> GraphResult<NodeId> {
        let mut edges = Vec::with_capacity(deps.len());
        for dep in deps {
            if dep.graph != self.id || dep.index >= self.nodes.len() {
                return Err(GraphError::InvalidValue(format!(
                    "node {} does not belong to this graph",
                    dep.index
                )));
            }
            edges.push(dep.index);
        }
        edges.sort_unstable();
        edges.dedup();
        let index = self.nodes.len();
        self.nodes.push(HostNode { op, deps: edges });
        Ok(NodeId { graph: self.id, index })
    }

    /// Kahn's algorithm, lowest ready index first.
    fn topological_order(&self) -> Vec<usize> {
        let n = self.nodes.len();
        let mut in_degree = vec![0usize; n];
        let mut dependents = vec![Vec::new(); n];
        for (to, node) in self.nodes.iter().enumerate() {
            for &from in &node.deps {
                in_degree[to] += 1;
                dependents[from].push(to);
            }
        }

        let mut ready: BTreeSet<usize> =
            in_degree.iter().enumerate().filter(|(_, d)| **d == 0).map(|(i, _)| i).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &next in &dependents[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }
        order
    }
}

// ── Executable ──────────────────────────────────────────────────────────────

/// Compiled graph. Kernel parameters can be patched in place.
#[derive(Debug)]
pub struct HostExecutable {
    graph: u64,
    ops: Mutex<Vec<HostOp>>,
    order: Vec<usize>,
}

impl HostExecutable {
    pub(crate) fn compile(graph: &HostGraph) -> GraphResult<Self> {
        let order = graph.topological_order();
        if order.len() != graph.len() {
            return Err(GraphError::unknown("host graph contains a cycle"));
        }
        Ok(Self {
            graph: graph.id,
            ops: Mutex::new(graph.nodes.iter().map(|n| n.op.clone()).collect()),
            order,
        })
    }

    /// Execution order fixed at instantiation.
    #[must_use]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn lock(&self) -> GraphResult<std::sync::MutexGuard<'_, Vec<HostOp>>> {
        self.ops.lock().map_err(|_| GraphError::unknown("host executable poisoned"))
    }

    /// Copy of every node's current parameters.
    pub fn snapshot(&self) -> GraphResult<ExecSnapshot> {
        Ok(ExecSnapshot { ops: self.lock()?.clone(), order: self.order.clone() })
    }

    /// Current launch parameters of a kernel node.
    pub fn kernel_launch(&self, node: NodeId) -> GraphResult<Option<KernelLaunch>> {
        self.check_owner(node)?;
        Ok(self.lock()?.get(node.index).and_then(HostOp::kernel_launch).cloned())
    }

    pub(crate) fn patch(&self, node: NodeId, launch: &KernelLaunch) -> GraphResult<()> {
        self.check_owner(node)?;
        let mut ops = self.lock()?;
        match ops.get_mut(node.index) {
            Some(HostOp::Kernel { launch: current, .. }) => {
                *current = launch.clone();
                Ok(())
            }
            Some(other) => Err(GraphError::InvalidValue(format!(
                "node {} is a {} node, not a kernel launch",
                node.index,
                other.label()
            ))),
            None => Err(GraphError::InvalidValue(format!("node {} does not exist", node.index))),
        }
    }

    fn check_owner(&self, node: NodeId) -> GraphResult<()> {
        if node.graph == self.graph {
            Ok(())
        } else {
            Err(GraphError::InvalidValue(format!(
                "node {} belongs to a different graph",
                node.index
            )))
        }
    }
}

/// Node parameters frozen at submission.
#[derive(Debug, Clone)]
pub struct ExecSnapshot {
    ops: Vec<HostOp>,
    order: Vec<usize>,
}

impl ExecSnapshot {
    /// Run every node in order against `device` memory.
    pub fn run(&self, device: &ReferenceDevice) -> GraphResult<()> {
        let mut space = device.lock()?;
        for &index in &self.order {
            self.ops[index].run(&mut space)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cmdgraph_core::geometry::resolve_launch_dims;
    use cmdgraph_core::{ContextHandle, DeviceLimits, DevicePtr, Kernel, KernelArgs, Location, NdRange};

    fn memset(dst: DevicePtr, value: u32, count: usize) -> HostOp {
        HostOp::Memset(MemsetNode { dst, element_size: 4, value, count, pitch: 4 })
    }

    #[test]
    fn order_respects_dependencies() {
        let mut g = HostGraph::new();
        let a = g.add(HostOp::Empty, &[]).unwrap();
        let b = g.add(HostOp::Empty, &[a]).unwrap();
        let c = g.add(HostOp::Empty, &[]).unwrap();
        let d = g.add(HostOp::Empty, &[b, c, b]).unwrap();
        assert_eq!(g.deps(d).unwrap(), &[1, 2]);
        assert_eq!(g.topological_order(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn foreign_dependency_is_rejected() {
        let mut g1 = HostGraph::new();
        let mut g2 = HostGraph::new();
        let a = g1.add(HostOp::Empty, &[]).unwrap();
        assert!(g2.add(HostOp::Empty, &[a]).is_err());
        assert!(g2.is_empty());
        assert!(g2.op(a).is_none());
    }

    #[test]
    fn snapshot_runs_copy_after_memset() {
        let dev = ReferenceDevice::new(4096);
        let a = dev.alloc_device(16).unwrap();
        let b = dev.alloc_host(16).unwrap();
        let mut g = HostGraph::new();
        let set = g.add(memset(a, 0xDEAD_BEEF, 4), &[]).unwrap();
        let copy = MemcpyNode { src: Location::device(a), dst: Location::host(b), size: 16 };
        g.add(HostOp::Memcpy(copy), &[set]).unwrap();

        let exec = HostExecutable::compile(&g).unwrap();
        assert_eq!(exec.order(), &[0, 1]);
        exec.snapshot().unwrap().run(&dev).unwrap();
        assert_eq!(dev.read_u32s(b, 4).unwrap(), vec![0xDEAD_BEEF; 4]);
    }

    #[test]
    fn pattern_fill_repeats_pattern() {
        let dev = ReferenceDevice::new(4096);
        let a = dev.alloc_device(16).unwrap();
        let mut g = HostGraph::new();
        let pattern = vec![1, 2, 3, 4, 5, 6, 7, 8];
        g.add(HostOp::PatternFill(PatternFillNode { dst: a, pattern, size: 16 }), &[]).unwrap();
        HostExecutable::compile(&g).unwrap().snapshot().unwrap().run(&dev).unwrap();
        assert_eq!(dev.read(a, 16).unwrap(), [1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn patching_a_non_kernel_node_fails() {
        let kernel = Arc::new(Kernel::new(ContextHandle::create(), "noop"));
        let range = NdRange::linear(4);
        let launch = KernelLaunch {
            kernel,
            args: KernelArgs::new(),
            range,
            dims: resolve_launch_dims(&range, &DeviceLimits::default()).unwrap(),
            local_mem_size: 0,
        };
        let mut g = HostGraph::new();
        let n = g.add(HostOp::Empty, &[]).unwrap();
        let exec = HostExecutable::compile(&g).unwrap();
        assert!(exec.kernel_launch(n).unwrap().is_none());
        assert!(matches!(exec.patch(n, &launch), Err(GraphError::InvalidValue(_))));
        assert_eq!(exec.snapshot().unwrap().len(), 1);
    }
}
