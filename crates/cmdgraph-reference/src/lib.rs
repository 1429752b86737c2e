//! `cmdgraph-reference`: a CPU backend for `cmdgraph-core`.
//!
//! Device memory is a bounds-checked simulated address space, graphs are
//! host DAGs, and kernels are Rust closures registered by name. Useful for
//! testing engine semantics without a GPU.
//!
//! ```no_run
//! use cmdgraph_core::{CommandBuffer, CommandBufferDesc, ContextHandle, Kernel, NdRange};
//! use cmdgraph_reference::{HostQueue, KernelRegistry, ReferenceDevice, ReferenceEmitter};
//! use std::sync::Arc;
//!
//! # fn main() -> cmdgraph_core::GraphResult<()> {
//! let device = ReferenceDevice::default();
//! let emitter = ReferenceEmitter::new(device.clone(), KernelRegistry::with_builtins()?).shared();
//! let ctx = ContextHandle::create();
//! let out = device.alloc_device(64)?;
//!
//! let kernel = Arc::new(Kernel::new(ctx, "iota_u32"));
//! kernel.set_pointer_arg(0, out)?;
//!
//! let cb = CommandBuffer::create(emitter, ctx, CommandBufferDesc::default())?;
//! cb.append_kernel_launch(&kernel, &NdRange::linear(16), &[])?;
//! cb.finalize()?;
//! cb.enqueue(&HostQueue::immediate(device.clone()), &[])?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod emitter;
pub mod error;
pub mod graph;
pub mod kernels;
pub mod memory;
pub mod queue;

pub use buffer::ReferenceBuffer;
pub use emitter::{FaultPlan, ReferenceEmitter};
pub use error::MemoryError;
pub use graph::{ExecSnapshot, HostExecutable, HostGraph, HostOp, NodeId};
pub use kernels::{KernelFn, KernelInvocation, KernelRegistry};
pub use memory::{AddressSpace, DEFAULT_CAPACITY, ReferenceDevice};
pub use queue::{HostEvent, HostQueue, QueueMode};

/// Command buffer on the reference backend.
pub type ReferenceCommandBuffer = cmdgraph_core::CommandBuffer<ReferenceEmitter>;

/// Kernel-launch command on the reference backend.
pub type ReferenceCommand = cmdgraph_core::Command<ReferenceEmitter>;
