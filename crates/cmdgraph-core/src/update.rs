//! In-place updates of kernel-launch commands in a finalized graph.
//!
//! Callers must not update a command while a submission of its buffer is
//! executing the node, and must not update the same command from two
//! threads at once.

use std::sync::Arc;

use tracing::debug;

use crate::command::Command;
use crate::emitter::{KernelLaunch, NodeEmitter};
use crate::error::{GraphError, GraphResult, poisoned};
use crate::geometry::resolve_launch_dims;
use crate::kernel::MemoryObject;
use crate::types::DevicePtr;

/// Sparse set of new values for one kernel-launch command.
///
/// Argument updates are applied in list order: pointers, then memory
/// objects, then plain values. Absent geometry fields keep their current
/// value; in particular an absent local size keeps the stored one.
#[derive(Debug, Clone, Default)]
pub struct KernelLaunchUpdate<'a> {
    pub pointer_args: Vec<(u32, DevicePtr)>,
    pub mem_obj_args: Vec<(u32, Option<&'a dyn MemoryObject>)>,
    pub value_args: Vec<(u32, Vec<u8>)>,
    pub work_dim: Option<u32>,
    pub global_offset: Option<Vec<usize>>,
    pub global_size: Option<Vec<usize>>,
    pub local_size: Option<Vec<usize>>,
}

impl<'a> KernelLaunchUpdate<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pointer_arg(mut self, index: u32, ptr: DevicePtr) -> Self {
        self.pointer_args.push((index, ptr));
        self
    }

    #[must_use]
    pub fn mem_obj_arg(mut self, index: u32, obj: Option<&'a dyn MemoryObject>) -> Self {
        self.mem_obj_args.push((index, obj));
        self
    }

    #[must_use]
    pub fn value_arg(mut self, index: u32, bytes: &[u8]) -> Self {
        self.value_args.push((index, bytes.to_vec()));
        self
    }

    #[must_use]
    pub const fn work_dim(mut self, work_dim: u32) -> Self {
        self.work_dim = Some(work_dim);
        self
    }

    #[must_use]
    pub fn global_offset(mut self, offset: &[usize]) -> Self {
        self.global_offset = Some(offset.to_vec());
        self
    }

    #[must_use]
    pub fn global_size(mut self, size: &[usize]) -> Self {
        self.global_size = Some(size.to_vec());
        self
    }

    #[must_use]
    pub fn local_size(mut self, size: &[usize]) -> Self {
        self.local_size = Some(size.to_vec());
        self
    }

    fn changes_geometry(&self) -> bool {
        self.work_dim.is_some()
            || self.global_offset.is_some()
            || self.global_size.is_some()
            || self.local_size.is_some()
    }
}

impl<E: NodeEmitter> Command<E> {
    /// Patch this command inside its buffer's compiled graph.
    ///
    /// The buffer must be finalized and created updatable. If an argument
    /// update fails the call returns at once; arguments already written by
    /// this call stay written. Geometry is only stored once the backend has
    /// accepted the patched node.
    pub fn update(&self, update: &KernelLaunchUpdate<'_>) -> GraphResult<()> {
        let inner = &self.inner;
        inner.ensure_alive()?;
        let buffer = &inner.buffer;
        buffer.ensure_alive()?;
        if !buffer.desc.updatable {
            return Err(GraphError::invalid_operation(
                "command buffer was not created updatable",
            ));
        }
        let Some(exec) = buffer.executable()? else {
            return Err(GraphError::invalid_operation(
                "command buffer must be finalized before its commands are updated",
            ));
        };

        let kernel = &inner.kernel;
        for (index, ptr) in &update.pointer_args {
            kernel.set_pointer_arg(*index, *ptr)?;
        }
        for (index, obj) in &update.mem_obj_args {
            kernel.set_mem_obj_arg(*index, *obj)?;
        }
        for (index, bytes) in &update.value_args {
            kernel.set_value_arg(*index, bytes)?;
        }

        let mut stored = inner.range.lock().map_err(poisoned)?;
        let mut range = *stored;
        if let Some(work_dim) = update.work_dim {
            range.set_work_dim(work_dim)?;
        }
        if let Some(offset) = &update.global_offset {
            range.set_global_offset(offset)?;
        }
        if let Some(size) = &update.global_size {
            range.set_global_size(size)?;
        }
        if let Some(size) = &update.local_size {
            range.set_local_size(size)?;
        }
        if range.is_empty() {
            return Err(GraphError::InvalidValue(
                "updated launch has an empty global size".into(),
            ));
        }

        let dims = resolve_launch_dims(&range, &buffer.emitter.capabilities().limits)?;
        let launch = KernelLaunch {
            kernel: Arc::clone(kernel),
            args: kernel.snapshot_args()?,
            range,
            dims,
            local_mem_size: kernel.local_mem_size(),
        };
        buffer.emitter.patch_kernel_node(&exec, &inner.node, &launch)?;
        *stored = range;

        debug!(
            command = inner.handle,
            buffer = buffer.handle,
            args = update.pointer_args.len() + update.mem_obj_args.len() + update.value_args.len(),
            geometry = update.changes_geometry(),
            "kernel launch updated"
        );
        Ok(())
    }
}
