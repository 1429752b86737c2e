//! Command buffer object: recording state, compiled executable and lifetime.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::debug;

use crate::command::{CommandInner, CommandRegistry};
use crate::config::GraphConfig;
use crate::emitter::NodeEmitter;
use crate::error::{GraphError, GraphResult, poisoned};
use crate::refcount::{LifecycleObserver, ObjectKind, RefCounts};
use crate::sync_point::SyncPointRegistry;
use crate::types::{ContextHandle, DeviceHandle, next_handle};

/// Properties fixed when a command buffer is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBufferDesc {
    /// Allow in-place kernel-launch updates after finalize.
    pub updatable: bool,
    pub in_order: bool,
    pub profiling: bool,
}

impl Default for CommandBufferDesc {
    fn default() -> Self {
        Self { updatable: false, in_order: true, profiling: false }
    }
}

impl CommandBufferDesc {
    #[must_use]
    pub const fn updatable() -> Self {
        Self { updatable: true, in_order: true, profiling: false }
    }

    #[must_use]
    pub const fn from_config(config: &GraphConfig) -> Self {
        Self {
            updatable: config.default_updatable,
            in_order: config.in_order,
            profiling: config.enable_profiling,
        }
    }
}

/// Snapshot of a command buffer's introspectable properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBufferInfo {
    /// External reference count.
    pub reference_count: u32,
    pub updatable: bool,
    pub in_order: bool,
    pub profiling: bool,
    pub finalized: bool,
    pub sync_points: usize,
    pub commands: usize,
}

/// Everything an append or finalize touches.
pub(crate) struct Recording<E: NodeEmitter> {
    pub(crate) graph: Option<E::Graph>,
    pub(crate) sync_points: SyncPointRegistry<E::Node>,
    pub(crate) commands: CommandRegistry<E>,
    pub(crate) finalize_attempted: bool,
}

impl<E: NodeEmitter> Recording<E> {
    pub(crate) fn graph_mut(&mut self) -> GraphResult<&mut E::Graph> {
        self.graph.as_mut().ok_or_else(|| GraphError::invalid_operation("command buffer destroyed"))
    }
}

pub(crate) struct BufferInner<E: NodeEmitter> {
    pub(crate) handle: u64,
    pub(crate) emitter: Arc<E>,
    pub(crate) context: ContextHandle,
    pub(crate) device: DeviceHandle,
    pub(crate) desc: CommandBufferDesc,
    pub(crate) refs: RefCounts,
    destroyed: AtomicBool,
    pub(crate) recording: Mutex<Recording<E>>,
    pub(crate) executable: RwLock<Option<Arc<E::Executable>>>,
    pub(crate) observer: Option<Arc<dyn LifecycleObserver>>,
}

impl<E: NodeEmitter> BufferInner<E> {
    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_alive(&self) -> GraphResult<()> {
        if self.is_destroyed() {
            return Err(GraphError::invalid_operation("command buffer has been destroyed"));
        }
        Ok(())
    }

    pub(crate) fn lock_recording(&self) -> GraphResult<MutexGuard<'_, Recording<E>>> {
        self.ensure_alive()?;
        self.recording.lock().map_err(poisoned)
    }

    /// Compiled graph, if finalize has succeeded.
    pub(crate) fn executable(&self) -> GraphResult<Option<Arc<E::Executable>>> {
        Ok(self.executable.read().map_err(poisoned)?.clone())
    }

    pub(crate) fn is_finalized(&self) -> GraphResult<bool> {
        Ok(self.executable.read().map_err(poisoned)?.is_some())
    }

    /// Drop one internal hold; tear down on the last one.
    pub(crate) fn release_internal(&self) -> GraphResult<()> {
        if self.refs.decrement_internal() != 0 {
            return Ok(());
        }
        self.destroy()
    }

    fn destroy(&self) -> GraphResult<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        {
            let mut rec = self.recording.lock().map_err(poisoned)?;
            rec.graph = None;
            rec.sync_points.clear();
            rec.commands.clear();
        }
        *self.executable.write().map_err(poisoned)? = None;
        if let Some(obs) = &self.observer {
            obs.destroyed(ObjectKind::CommandBuffer, self.handle);
        }
        debug!(buffer = self.handle, "command buffer destroyed");
        Ok(())
    }
}

/// Handle to a command buffer.
///
/// Cloning the handle does not change reference counts; use
/// [`retain`](Self::retain) and [`release`](Self::release) for that.
pub struct CommandBuffer<E: NodeEmitter> {
    pub(crate) inner: Arc<BufferInner<E>>,
}

impl<E: NodeEmitter> Clone for CommandBuffer<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E: NodeEmitter> fmt::Debug for CommandBuffer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("handle", &self.inner.handle)
            .field("updatable", &self.inner.desc.updatable)
            .field("external", &self.inner.refs.external())
            .field("internal", &self.inner.refs.internal())
            .field("destroyed", &self.inner.is_destroyed())
            .finish()
    }
}

impl<E: NodeEmitter> CommandBuffer<E> {
    /// Create an empty command buffer in the recording state.
    pub fn create(
        emitter: Arc<E>,
        context: ContextHandle,
        desc: CommandBufferDesc,
    ) -> GraphResult<Self> {
        Self::create_observed(emitter, context, desc, None)
    }

    /// Like [`create`](Self::create), reporting lifecycle events to `observer`.
    pub fn create_observed(
        emitter: Arc<E>,
        context: ContextHandle,
        desc: CommandBufferDesc,
        observer: Option<Arc<dyn LifecycleObserver>>,
    ) -> GraphResult<Self> {
        if desc.updatable && !emitter.capabilities().supports_update {
            return Err(GraphError::UnsupportedFeature(
                "backend cannot update kernel nodes of a compiled graph".into(),
            ));
        }
        let graph = emitter.create_graph().map_err(|e| match e {
            GraphError::OutOfHostMemory => e,
            other => GraphError::OutOfResources(format!("native graph creation failed: {other}")),
        })?;
        let handle = next_handle();
        let device = emitter.device();
        let inner = BufferInner {
            handle,
            emitter,
            context,
            device,
            desc,
            refs: RefCounts::new(),
            destroyed: AtomicBool::new(false),
            recording: Mutex::new(Recording {
                graph: Some(graph),
                sync_points: SyncPointRegistry::new(handle),
                commands: CommandRegistry::new(),
                finalize_attempted: false,
            }),
            executable: RwLock::new(None),
            observer,
        };
        if let Some(obs) = &inner.observer {
            obs.created(ObjectKind::CommandBuffer, handle);
        }
        debug!(buffer = handle, updatable = desc.updatable, "command buffer created");
        Ok(Self { inner: Arc::new(inner) })
    }

    #[must_use]
    pub fn handle(&self) -> u64 {
        self.inner.handle
    }

    #[must_use]
    pub fn context(&self) -> ContextHandle {
        self.inner.context
    }

    #[must_use]
    pub fn device(&self) -> DeviceHandle {
        self.inner.device
    }

    #[must_use]
    pub fn is_updatable(&self) -> bool {
        self.inner.desc.updatable
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    pub fn is_finalized(&self) -> GraphResult<bool> {
        self.inner.is_finalized()
    }

    /// External reference count.
    #[must_use]
    pub fn reference_count(&self) -> u32 {
        self.inner.refs.external()
    }

    pub fn info(&self) -> GraphResult<CommandBufferInfo> {
        let rec = self.inner.lock_recording()?;
        Ok(CommandBufferInfo {
            reference_count: self.inner.refs.external(),
            updatable: self.inner.desc.updatable,
            in_order: self.inner.desc.in_order,
            profiling: self.inner.desc.profiling,
            finalized: self.inner.is_finalized()?,
            sync_points: rec.sync_points.len(),
            commands: rec.commands.len(),
        })
    }

    /// Take one more external reference.
    pub fn retain(&self) -> GraphResult<()> {
        self.inner.ensure_alive()?;
        self.inner.refs.increment_internal();
        self.inner.refs.increment_external();
        Ok(())
    }

    /// Drop one external reference.
    ///
    /// When the external count reaches zero every command of this buffer
    /// loses its internal hold first, then the buffer drops its own.
    pub fn release(&self) -> GraphResult<()> {
        self.inner.ensure_alive()?;
        if self.inner.refs.external() == 0 {
            return Err(GraphError::invalid_operation("command buffer already released"));
        }
        if self.inner.refs.decrement_external() == 0 {
            let commands = self.inner.lock_recording()?.commands.snapshot();
            for command in commands {
                CommandInner::release_internal(&command)?;
            }
        }
        self.inner.release_internal()
    }
}
