//! `cmdgraph-core`: record GPU work once, replay it many times.
//!
//! A [`CommandBuffer`] records kernel launches, copies, fills and memory
//! hints into a backend graph through a [`NodeEmitter`]. Every append
//! returns a [`SyncPoint`] that later appends may depend on. After
//! [`CommandBuffer::finalize`] the graph can be submitted any number of
//! times, and kernel launches recorded into an updatable buffer can be
//! patched in place with [`Command::update`].
//!
//! | Stage      | Entry point                                   |
//! |------------|-----------------------------------------------|
//! | Record     | `append_*` methods on [`CommandBuffer`]       |
//! | Compile    | [`CommandBuffer::finalize`]                   |
//! | Execute    | [`CommandBuffer::enqueue`]                    |
//! | Update     | [`Command::update`] with [`KernelLaunchUpdate`] |
//!
//! Recording, finalize and update are serialized per buffer by the caller.
//! Submission may run concurrently with itself and with updates of other
//! commands.

pub mod builder;
pub mod command;
pub mod command_buffer;
pub mod config;
pub mod diagnostics;
pub mod emitter;
pub mod error;
pub mod executor;
pub mod fill;
pub mod finalize;
pub mod geometry;
pub mod kernel;
pub mod refcount;
pub mod sync_point;
pub mod types;
pub mod update;

pub use builder::{AppendStatus, Appended, KernelLaunchAppend, RectCopy};
pub use command::Command;
pub use command_buffer::{CommandBuffer, CommandBufferDesc, CommandBufferInfo};
pub use config::{ConfigError, GraphConfig, LogLevel};
pub use emitter::{
    AdviseNode, EmitterCapabilities, KernelLaunch, MemcpyNode, MemcpyRectNode, MemsetNode,
    NodeEmitter, PatternFillNode, PrefetchNode, SubmissionQueue,
};
pub use error::{ErrorKind, GraphError, GraphResult};
pub use geometry::{DeviceLimits, LaunchDims, NdRange};
pub use kernel::{Kernel, KernelArg, KernelArgs, MemoryObject};
pub use refcount::{LifecycleCounter, LifecycleObserver, ObjectKind};
pub use sync_point::SyncPointRegistry;
pub use types::{
    ContextHandle, DeviceHandle, DevicePtr, Location, MemoryAdvice, MemoryKind, MigrationFlags,
    RectOffset, RectPitch, RectRegion, SyncPoint,
};
pub use update::KernelLaunchUpdate;
