//! Host-side kernel bodies, looked up by kernel name.
//!
//! A kernel body runs once per launch, not once per work-item; it walks
//! [`KernelInvocation::global_ids`] itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use cmdgraph_core::{DevicePtr, GraphError, GraphResult, KernelArg, KernelLaunch, LaunchDims, NdRange};

use crate::memory::AddressSpace;

/// Host body of a kernel.
pub type KernelFn = Arc<dyn Fn(&mut KernelInvocation<'_>) -> GraphResult<()> + Send + Sync>;

// ── Invocation ──────────────────────────────────────────────────────────────

/// Everything a kernel body sees during one launch.
pub struct KernelInvocation<'a> {
    launch: &'a KernelLaunch,
    memory: &'a mut AddressSpace,
}

impl<'a> KernelInvocation<'a> {
    pub(crate) fn new(launch: &'a KernelLaunch, memory: &'a mut AddressSpace) -> Self {
        Self { launch, memory }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.launch.kernel.name()
    }

    #[must_use]
    pub const fn range(&self) -> &NdRange {
        &self.launch.range
    }

    #[must_use]
    pub const fn dims(&self) -> &LaunchDims {
        &self.launch.dims
    }

    pub fn arg(&self, index: u32) -> GraphResult<&KernelArg> {
        self.launch.args.get(&index).ok_or_else(|| {
            GraphError::InvalidValue(format!("kernel '{}' argument {index} is not set", self.name()))
        })
    }

    pub fn arg_ptr(&self, index: u32) -> GraphResult<DevicePtr> {
        self.arg(index)?.as_pointer().ok_or_else(|| {
            GraphError::InvalidValue(format!("kernel '{}' argument {index} is not a pointer", self.name()))
        })
    }

    pub fn arg_u32(&self, index: u32) -> GraphResult<u32> {
        self.arg(index)?.as_u32().ok_or_else(|| {
            GraphError::InvalidValue(format!("kernel '{}' argument {index} is not a u32", self.name()))
        })
    }

    /// Every global id of the launch, offset applied. Inactive dimensions
    /// contribute a single zero.
    #[must_use]
    pub fn global_ids(&self) -> Vec<[usize; 3]> {
        let range = &self.launch.range;
        let dims = range.work_dim() as usize;
        let offset = range.global_offset();
        let size = range.global_size();
        let span = |d: usize| if d < dims { offset[d]..offset[d] + size[d] } else { 0..1 };
        let mut ids = Vec::with_capacity(range.work_items());
        for z in span(2) {
            for y in span(1) {
                for x in span(0) {
                    ids.push([x, y, z]);
                }
            }
        }
        ids
    }

    pub fn read_u32(&self, ptr: DevicePtr, index: usize) -> GraphResult<u32> {
        Ok(self.memory.read_u32(ptr, index)?)
    }

    pub fn write_u32(&mut self, ptr: DevicePtr, index: usize, value: u32) -> GraphResult<()> {
        Ok(self.memory.write_u32(ptr, index, value)?)
    }

    pub fn memory(&mut self) -> &mut AddressSpace {
        &mut *self.memory
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Kernel bodies by name. Clones share one table.
#[derive(Clone, Default)]
pub struct KernelRegistry {
    kernels: Arc<RwLock<HashMap<String, KernelFn>>>,
}

impl fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = match self.kernels.read() {
            Ok(map) => map.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        f.debug_struct("KernelRegistry").field("kernels", &names).finish()
    }
}

impl KernelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the one-dimensional `u32` kernels below.
    ///
    /// | name       | arguments            | effect                     |
    /// |------------|----------------------|----------------------------|
    /// | `iota_u32` | `out`                | `out[i] = i`               |
    /// | `fill_u32` | `out`, `value`       | `out[i] = value`           |
    /// | `add_u32`  | `a`, `b`, `out`      | `out[i] = a[i] + b[i]`     |
    /// | `axpy_u32` | `alpha`, `x`, `y`    | `y[i] = alpha * x[i] + y[i]` |
    ///
    /// Arithmetic wraps.
    pub fn with_builtins() -> GraphResult<Self> {
        let registry = Self::new();
        registry.register("iota_u32", |inv| {
            let out = inv.arg_ptr(0)?;
            for [i, ..] in inv.global_ids() {
                inv.write_u32(out, i, i as u32)?;
            }
            Ok(())
        })?;
        registry.register("fill_u32", |inv| {
            let out = inv.arg_ptr(0)?;
            let value = inv.arg_u32(1)?;
            for [i, ..] in inv.global_ids() {
                inv.write_u32(out, i, value)?;
            }
            Ok(())
        })?;
        registry.register("add_u32", |inv| {
            let (a, b, out) = (inv.arg_ptr(0)?, inv.arg_ptr(1)?, inv.arg_ptr(2)?);
            for [i, ..] in inv.global_ids() {
                let sum = inv.read_u32(a, i)?.wrapping_add(inv.read_u32(b, i)?);
                inv.write_u32(out, i, sum)?;
            }
            Ok(())
        })?;
        registry.register("axpy_u32", |inv| {
            let alpha = inv.arg_u32(0)?;
            let (x, y) = (inv.arg_ptr(1)?, inv.arg_ptr(2)?);
            for [i, ..] in inv.global_ids() {
                let v = alpha.wrapping_mul(inv.read_u32(x, i)?).wrapping_add(inv.read_u32(y, i)?);
                inv.write_u32(y, i, v)?;
            }
            Ok(())
        })?;
        Ok(registry)
    }

    /// Register (or replace) the body of `name`.
    pub fn register<F>(&self, name: impl Into<String>, body: F) -> GraphResult<()>
    where
        F: Fn(&mut KernelInvocation<'_>) -> GraphResult<()> + Send + Sync + 'static,
    {
        let mut map =
            self.kernels.write().map_err(|_| GraphError::unknown("kernel registry poisoned"))?;
        map.insert(name.into(), Arc::new(body));
        Ok(())
    }

    pub fn get(&self, name: &str) -> GraphResult<Option<KernelFn>> {
        let map = self.kernels.read().map_err(|_| GraphError::unknown("kernel registry poisoned"))?;
        Ok(map.get(name).cloned())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.kernels.read().is_ok_and(|map| map.contains_key(name))
    }
}
