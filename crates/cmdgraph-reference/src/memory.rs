//! Simulated device address space.
//!
//! Device, host and shared allocations all live in one flat address space
//! so copies between them are plain byte moves. Addresses are never zero.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use cmdgraph_core::{DeviceHandle, DevicePtr, GraphError, GraphResult, MemoryKind};
use tracing::debug;

use crate::error::{MemoryError, Result};

const BASE_ADDRESS: u64 = 0x1_0000;
const ALIGNMENT: u64 = 256;

/// Default capacity of a reference device: 64 MiB.
pub const DEFAULT_CAPACITY: usize = 64 * 1024 * 1024;

#[derive(Debug)]
struct Allocation {
    kind: MemoryKind,
    bytes: Vec<u8>,
}

/// Allocation table plus backing bytes.
#[derive(Debug)]
pub struct AddressSpace {
    allocations: BTreeMap<u64, Allocation>,
    next_base: u64,
    capacity: usize,
    used: usize,
}

impl AddressSpace {
    fn new(capacity: usize) -> Self {
        Self { allocations: BTreeMap::new(), next_base: BASE_ADDRESS, capacity, used: 0 }
    }

    fn allocate(&mut self, kind: MemoryKind, size: usize) -> Result<DevicePtr> {
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        let available = self.capacity - self.used;
        if size > available {
            return Err(MemoryError::OutOfCapacity { requested: size, available });
        }
        let base = self.next_base;
        self.next_base = (base + size as u64).next_multiple_of(ALIGNMENT);
        self.used += size;
        self.allocations.insert(base, Allocation { kind, bytes: vec![0; size] });
        Ok(DevicePtr(base))
    }

    fn free(&mut self, ptr: DevicePtr) -> Result<()> {
        let alloc = self.allocations.remove(&ptr.0).ok_or(MemoryError::InvalidAddress(ptr))?;
        self.used -= alloc.bytes.len();
        Ok(())
    }

    /// Allocation containing `ptr`, with the offset of `ptr` inside it.
    fn locate(&self, ptr: DevicePtr) -> Result<(u64, usize)> {
        let (&base, alloc) = self
            .allocations
            .range(..=ptr.0)
            .next_back()
            .ok_or(MemoryError::InvalidAddress(ptr))?;
        let offset = (ptr.0 - base) as usize;
        if offset >= alloc.bytes.len() {
            return Err(MemoryError::InvalidAddress(ptr));
        }
        Ok((base, offset))
    }

    /// Bytes `ptr..ptr+len`, which must lie in one allocation.
    pub fn slice(&self, ptr: DevicePtr, len: usize) -> Result<&[u8]> {
        if len == 0 {
            return Ok(&[]);
        }
        let (base, offset) = self.locate(ptr)?;
        let end = offset.checked_add(len).ok_or(MemoryError::OutOfBounds { ptr, len })?;
        let bytes = &self.allocations[&base].bytes;
        bytes.get(offset..end).ok_or(MemoryError::OutOfBounds { ptr, len })
    }

    pub fn slice_mut(&mut self, ptr: DevicePtr, len: usize) -> Result<&mut [u8]> {
        if len == 0 {
            return Ok(&mut []);
        }
        let (base, offset) = self.locate(ptr)?;
        let end = offset.checked_add(len).ok_or(MemoryError::OutOfBounds { ptr, len })?;
        let alloc = self.allocations.get_mut(&base).ok_or(MemoryError::InvalidAddress(ptr))?;
        alloc.bytes.get_mut(offset..end).ok_or(MemoryError::OutOfBounds { ptr, len })
    }

    pub fn read(&self, ptr: DevicePtr, len: usize) -> Result<Vec<u8>> {
        self.slice(ptr, len).map(<[u8]>::to_vec)
    }

    pub fn write(&mut self, ptr: DevicePtr, data: &[u8]) -> Result<()> {
        self.slice_mut(ptr, data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// Copy `len` bytes; source and destination may be the same allocation.
    pub fn copy(&mut self, dst: DevicePtr, src: DevicePtr, len: usize) -> Result<()> {
        let data = self.read(src, len)?;
        self.write(dst, &data)
    }

    pub fn read_u32(&self, ptr: DevicePtr, index: usize) -> Result<u32> {
        let at = ptr.offset(index * 4);
        let bytes = self.slice(at, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn write_u32(&mut self, ptr: DevicePtr, index: usize, value: u32) -> Result<()> {
        self.write(ptr.offset(index * 4), &value.to_le_bytes())
    }

    /// Kind of the allocation containing `ptr`.
    pub fn kind_of(&self, ptr: DevicePtr) -> Result<MemoryKind> {
        let (base, _) = self.locate(ptr)?;
        Ok(self.allocations[&base].kind)
    }

    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }
}

// ── Device ──────────────────────────────────────────────────────────────────

/// A CPU-backed device. Clones share the same address space.
#[derive(Debug, Clone)]
pub struct ReferenceDevice {
    handle: DeviceHandle,
    space: Arc<Mutex<AddressSpace>>,
}

impl Default for ReferenceDevice {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ReferenceDevice {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { handle: DeviceHandle::create(), space: Arc::new(Mutex::new(AddressSpace::new(capacity))) }
    }

    #[must_use]
    pub const fn handle(&self) -> DeviceHandle {
        self.handle
    }

    /// Lock the address space.
    pub fn lock(&self) -> GraphResult<MutexGuard<'_, AddressSpace>> {
        self.space.lock().map_err(|_| GraphError::unknown("reference address space poisoned"))
    }

    pub fn alloc(&self, kind: MemoryKind, size: usize) -> GraphResult<DevicePtr> {
        let ptr = self.lock()?.allocate(kind, size)?;
        debug!(ptr = %ptr, size, ?kind, "reference allocation");
        Ok(ptr)
    }

    pub fn alloc_device(&self, size: usize) -> GraphResult<DevicePtr> {
        self.alloc(MemoryKind::Device, size)
    }

    pub fn alloc_host(&self, size: usize) -> GraphResult<DevicePtr> {
        self.alloc(MemoryKind::Host, size)
    }

    pub fn alloc_shared(&self, size: usize) -> GraphResult<DevicePtr> {
        self.alloc(MemoryKind::Shared, size)
    }

    pub fn free(&self, ptr: DevicePtr) -> GraphResult<()> {
        Ok(self.lock()?.free(ptr)?)
    }

    pub fn read(&self, ptr: DevicePtr, len: usize) -> GraphResult<Vec<u8>> {
        Ok(self.lock()?.read(ptr, len)?)
    }

    pub fn write(&self, ptr: DevicePtr, data: &[u8]) -> GraphResult<()> {
        Ok(self.lock()?.write(ptr, data)?)
    }

    /// Read `count` little-endian `u32`s starting at `ptr`.
    pub fn read_u32s(&self, ptr: DevicePtr, count: usize) -> GraphResult<Vec<u32>> {
        let bytes = self.read(ptr, count * 4)?;
        Ok(bytes.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect())
    }

    pub fn write_u32s(&self, ptr: DevicePtr, values: &[u32]) -> GraphResult<()> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.write(ptr, &bytes)
    }
}
