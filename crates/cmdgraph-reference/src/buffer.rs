//! Memory objects backed by reference-device allocations.

use cmdgraph_core::{DevicePtr, GraphResult, MemoryKind, MemoryObject};

use crate::memory::ReferenceDevice;

/// A fixed-size allocation usable wherever the engine takes a memory object.
///
/// The allocation is not freed on drop; call [`ReferenceBuffer::free`].
#[derive(Debug, Clone)]
pub struct ReferenceBuffer {
    ptr: DevicePtr,
    size: usize,
    kind: MemoryKind,
}

impl ReferenceBuffer {
    pub fn new(device: &ReferenceDevice, size: usize) -> GraphResult<Self> {
        Self::with_kind(device, MemoryKind::Device, size)
    }

    pub fn with_kind(device: &ReferenceDevice, kind: MemoryKind, size: usize) -> GraphResult<Self> {
        let ptr = device.alloc(kind, size)?;
        Ok(Self { ptr, size, kind })
    }

    #[must_use]
    pub const fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn free(self, device: &ReferenceDevice) -> GraphResult<()> {
        device.free(self.ptr)
    }
}

impl MemoryObject for ReferenceBuffer {
    fn device_address(&self) -> DevicePtr {
        self.ptr
    }

    fn size(&self) -> usize {
        self.size
    }

    fn kind(&self) -> MemoryKind {
        self.kind
    }
}
