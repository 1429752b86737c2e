//! Kernel descriptors and the memory-object interface they resolve against.
//!
//! A [`Kernel`] is shared between the caller, every command recorded from it,
//! and in-place updates. Its argument table sits behind a mutex so an update
//! can rewrite it through a shared reference.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::GraphConfig;
use crate::error::{GraphError, GraphResult, poisoned};
use crate::types::{ContextHandle, DevicePtr, MemoryKind, next_handle};

/// Default upper bound on the number of kernel arguments.
pub const DEFAULT_MAX_ARGUMENTS: u32 = 16;

/// A buffer-like allocation owned by the memory-object layer.
pub trait MemoryObject: fmt::Debug + Send + Sync {
    /// Current base address of the allocation.
    fn device_address(&self) -> DevicePtr;

    /// Size in bytes.
    fn size(&self) -> usize;

    fn kind(&self) -> MemoryKind {
        MemoryKind::Device
    }
}

/// Type-erased kernel argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelArg {
    /// A pointer (USM or resolved memory object).
    Pointer(DevicePtr),
    /// Plain bytes copied by value.
    Value(Vec<u8>),
    /// A memory-object slot explicitly bound to nothing.
    Null,
}

impl KernelArg {
    #[must_use]
    pub fn u32(v: u32) -> Self {
        Self::Value(v.to_le_bytes().to_vec())
    }

    #[must_use]
    pub fn u64(v: u64) -> Self {
        Self::Value(v.to_le_bytes().to_vec())
    }

    #[must_use]
    pub fn f32(v: f32) -> Self {
        Self::Value(v.to_le_bytes().to_vec())
    }

    /// Pointer payload, if this argument is one.
    #[must_use]
    pub const fn as_pointer(&self) -> Option<DevicePtr> {
        match self {
            Self::Pointer(p) => Some(*p),
            _ => None,
        }
    }

    /// Interpret a value argument as a little-endian `u32`.
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::Value(bytes) => bytes.get(..4)?.try_into().ok().map(u32::from_le_bytes),
            _ => None,
        }
    }
}

/// Argument table captured at the moment a node is emitted or patched.
pub type KernelArgs = BTreeMap<u32, KernelArg>;

/// A compiled kernel entry point bound to a context.
#[derive(Debug)]
pub struct Kernel {
    handle: u64,
    name: String,
    context: ContextHandle,
    max_arguments: u32,
    args: Mutex<KernelArgs>,
    local_mem_size: AtomicU32,
}

impl Kernel {
    pub fn new(context: ContextHandle, name: impl Into<String>) -> Self {
        Self {
            handle: next_handle(),
            name: name.into(),
            context,
            max_arguments: DEFAULT_MAX_ARGUMENTS,
            args: Mutex::new(BTreeMap::new()),
            local_mem_size: AtomicU32::new(0),
        }
    }

    /// Kernel whose argument table is bounded by `config.max_kernel_arguments`.
    #[must_use]
    pub fn from_config(context: ContextHandle, name: impl Into<String>, config: &GraphConfig) -> Self {
        Self::new(context, name).with_max_arguments(config.max_kernel_arguments)
    }

    #[must_use]
    pub fn with_max_arguments(mut self, max: u32) -> Self {
        self.max_arguments = max;
        self
    }

    #[must_use]
    pub const fn handle(&self) -> u64 {
        self.handle
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn context(&self) -> ContextHandle {
        self.context
    }

    #[must_use]
    pub const fn max_arguments(&self) -> u32 {
        self.max_arguments
    }

    /// Set the argument at `index`.
    pub fn set_arg(&self, index: u32, arg: KernelArg) -> GraphResult<()> {
        if index >= self.max_arguments {
            return Err(GraphError::InvalidArgumentIndex {
                index,
                max: self.max_arguments.saturating_sub(1),
            });
        }
        self.args.lock().map_err(poisoned)?.insert(index, arg);
        Ok(())
    }

    pub fn set_pointer_arg(&self, index: u32, ptr: DevicePtr) -> GraphResult<()> {
        self.set_arg(index, KernelArg::Pointer(ptr))
    }

    pub fn set_value_arg(&self, index: u32, bytes: &[u8]) -> GraphResult<()> {
        self.set_arg(index, KernelArg::Value(bytes.to_vec()))
    }

    /// Bind a memory object, resolved to its current device address.
    pub fn set_mem_obj_arg(&self, index: u32, obj: Option<&dyn MemoryObject>) -> GraphResult<()> {
        let arg = obj.map_or(KernelArg::Null, |m| KernelArg::Pointer(m.device_address()));
        self.set_arg(index, arg)
    }

    /// Current value of the argument at `index`.
    pub fn arg(&self, index: u32) -> GraphResult<Option<KernelArg>> {
        Ok(self.args.lock().map_err(poisoned)?.get(&index).cloned())
    }

    /// Copy of the whole argument table.
    pub fn snapshot_args(&self) -> GraphResult<KernelArgs> {
        Ok(self.args.lock().map_err(poisoned)?.clone())
    }

    /// Dynamic local (shared) memory requested per work-group, in bytes.
    #[must_use]
    pub fn local_mem_size(&self) -> u32 {
        self.local_mem_size.load(Ordering::Acquire)
    }

    pub fn set_local_mem_size(&self, bytes: u32) {
        self.local_mem_size.store(bytes, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FakeBuffer(DevicePtr);

    impl MemoryObject for FakeBuffer {
        fn device_address(&self) -> DevicePtr {
            self.0
        }

        fn size(&self) -> usize {
            64
        }
    }

    #[test]
    fn argument_index_is_bounded() {
        let k = Kernel::new(ContextHandle::create(), "saxpy").with_max_arguments(2);
        assert!(k.set_arg(1, KernelArg::u32(3)).is_ok());
        assert_eq!(
            k.set_arg(2, KernelArg::u32(3)),
            Err(GraphError::InvalidArgumentIndex { index: 2, max: 1 })
        );
    }

    #[test]
    fn configured_argument_bound_applies() {
        let config = GraphConfig { max_kernel_arguments: 3, ..GraphConfig::default() };
        let k = Kernel::from_config(ContextHandle::create(), "axpy", &config);
        assert_eq!(k.max_arguments(), 3);
        assert!(k.set_arg(2, KernelArg::u32(0)).is_ok());
        assert_eq!(
            k.set_arg(3, KernelArg::u32(0)),
            Err(GraphError::InvalidArgumentIndex { index: 3, max: 2 })
        );
    }

    #[test]
    fn mem_obj_resolves_to_address() {
        let k = Kernel::new(ContextHandle::create(), "copy");
        let buf = FakeBuffer(DevicePtr(0x4000));
        k.set_mem_obj_arg(0, Some(&buf)).unwrap();
        k.set_mem_obj_arg(1, None).unwrap();
        assert_eq!(k.arg(0).unwrap(), Some(KernelArg::Pointer(DevicePtr(0x4000))));
        assert_eq!(k.arg(1).unwrap(), Some(KernelArg::Null));
    }

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let k = Kernel::new(ContextHandle::create(), "fill");
        k.set_arg(0, KernelArg::u32(1)).unwrap();
        let snap = k.snapshot_args().unwrap();
        k.set_arg(0, KernelArg::u32(2)).unwrap();
        assert_eq!(snap[&0].as_u32(), Some(1));
        assert_eq!(k.arg(0).unwrap().and_then(|a| a.as_u32()), Some(2));
    }
}
