//! Updatable kernel-launch commands and their per-buffer registry.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::command_buffer::{BufferInner, CommandBuffer};
use crate::emitter::NodeEmitter;
use crate::error::{GraphError, GraphResult, poisoned};
use crate::geometry::NdRange;
use crate::kernel::Kernel;
use crate::refcount::{ObjectKind, RefCounts};
use crate::types::next_handle;

pub(crate) struct CommandInner<E: NodeEmitter> {
    pub(crate) handle: u64,
    pub(crate) buffer: Arc<BufferInner<E>>,
    pub(crate) kernel: Arc<Kernel>,
    pub(crate) node: E::Node,
    pub(crate) range: Mutex<NdRange>,
    pub(crate) refs: RefCounts,
    destroyed: AtomicBool,
}

impl<E: NodeEmitter> CommandInner<E> {
    /// New command holding one external and two internal references (the
    /// caller's and the registry's), plus one internal hold on `buffer`.
    pub(crate) fn new(
        buffer: &Arc<BufferInner<E>>,
        kernel: Arc<Kernel>,
        node: E::Node,
        range: NdRange,
    ) -> Arc<Self> {
        let refs = RefCounts::new();
        refs.increment_internal();
        buffer.refs.increment_internal();
        let handle = next_handle();
        if let Some(obs) = &buffer.observer {
            obs.created(ObjectKind::Command, handle);
        }
        Arc::new(Self {
            handle,
            buffer: Arc::clone(buffer),
            kernel,
            node,
            range: Mutex::new(range),
            refs,
            destroyed: AtomicBool::new(false),
        })
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_alive(&self) -> GraphResult<()> {
        if self.is_destroyed() {
            return Err(GraphError::invalid_operation("command has been destroyed"));
        }
        Ok(())
    }

    /// Drop one internal hold; on the last one release the parent buffer.
    pub(crate) fn release_internal(this: &Arc<Self>) -> GraphResult<()> {
        if this.is_destroyed() || this.refs.decrement_internal() != 0 {
            return Ok(());
        }
        this.destroyed.store(true, Ordering::Release);
        if let Some(obs) = &this.buffer.observer {
            obs.destroyed(ObjectKind::Command, this.handle);
        }
        debug!(command = this.handle, buffer = this.buffer.handle, "command destroyed");
        this.buffer.release_internal()
    }
}

/// Commands recorded into one buffer, in append order.
pub(crate) struct CommandRegistry<E: NodeEmitter> {
    commands: Vec<Arc<CommandInner<E>>>,
}

impl<E: NodeEmitter> CommandRegistry<E> {
    pub(crate) const fn new() -> Self {
        Self { commands: Vec::new() }
    }

    pub(crate) fn push(&mut self, command: Arc<CommandInner<E>>) {
        self.commands.push(command);
    }

    pub(crate) fn len(&self) -> usize {
        self.commands.len()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<CommandInner<E>>> {
        self.commands.clone()
    }

    /// Drops the registry's back-references; breaks the buffer/command cycle.
    pub(crate) fn clear(&mut self) {
        self.commands.clear();
    }
}

/// Handle to one updatable kernel launch inside a command buffer.
///
/// Cloning the handle does not change reference counts.
pub struct Command<E: NodeEmitter> {
    pub(crate) inner: Arc<CommandInner<E>>,
}

impl<E: NodeEmitter> Clone for Command<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E: NodeEmitter> fmt::Debug for Command<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("handle", &self.inner.handle)
            .field("buffer", &self.inner.buffer.handle)
            .field("kernel", &self.inner.kernel.name())
            .field("node", &self.inner.node)
            .field("external", &self.inner.refs.external())
            .field("internal", &self.inner.refs.internal())
            .finish()
    }
}

impl<E: NodeEmitter> Command<E> {
    #[must_use]
    pub fn handle(&self) -> u64 {
        self.inner.handle
    }

    /// Kernel descriptor this command launches.
    #[must_use]
    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.inner.kernel
    }

    /// Native node token in the owning buffer's graph.
    #[must_use]
    pub fn node(&self) -> &E::Node {
        &self.inner.node
    }

    /// Currently captured launch geometry.
    pub fn geometry(&self) -> GraphResult<NdRange> {
        Ok(*self.inner.range.lock().map_err(poisoned)?)
    }

    /// Handle to the owning command buffer.
    #[must_use]
    pub fn command_buffer(&self) -> CommandBuffer<E> {
        CommandBuffer { inner: Arc::clone(&self.inner.buffer) }
    }

    /// External reference count.
    #[must_use]
    pub fn reference_count(&self) -> u32 {
        self.inner.refs.external()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    pub fn retain(&self) -> GraphResult<()> {
        self.inner.ensure_alive()?;
        self.inner.refs.increment_external();
        self.inner.refs.increment_internal();
        Ok(())
    }

    /// Drop one external reference together with one internal hold.
    pub fn release(&self) -> GraphResult<()> {
        self.inner.ensure_alive()?;
        if self.inner.refs.external() == 0 {
            return Err(GraphError::invalid_operation("command already released"));
        }
        self.inner.refs.decrement_external();
        CommandInner::release_internal(&self.inner)
    }
}
