//! Launch geometry and the mapping from an ND-range onto blocks and threads.

use crate::error::{GraphError, GraphResult};

/// Per-device limits consulted when resolving launch dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Hardware SIMD width; the default threads-per-block in x.
    pub warp_size: usize,
    /// Maximum threads in one block.
    pub max_group_size: usize,
    /// Maximum threads per block along each axis.
    pub max_block_dims: [usize; 3],
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self { warp_size: 32, max_group_size: 1024, max_block_dims: [1024, 1024, 64] }
    }
}

/// Captured ND-range of a kernel launch.
///
/// Every vector is three long; entries past `work_dim` are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange {
    work_dim: u32,
    global_offset: [usize; 3],
    global_size: [usize; 3],
    local_size: [usize; 3],
}

fn check_work_dim(work_dim: u32) -> GraphResult<()> {
    if (1..=3).contains(&work_dim) {
        Ok(())
    } else {
        Err(GraphError::InvalidWorkDimension(work_dim))
    }
}

fn pad(values: &[usize], work_dim: u32, what: &str) -> GraphResult<[usize; 3]> {
    let n = work_dim as usize;
    let Some(active) = values.get(..n) else {
        return Err(GraphError::InvalidValue(format!(
            "{what} has {} entries, work dimension is {work_dim}",
            values.len()
        )));
    };
    let mut out = [0usize; 3];
    out[..n].copy_from_slice(active);
    Ok(out)
}

impl NdRange {
    /// Build a range, padding each vector with zeros past `work_dim`.
    pub fn new(
        work_dim: u32,
        global_offset: Option<&[usize]>,
        global_size: &[usize],
        local_size: Option<&[usize]>,
    ) -> GraphResult<Self> {
        check_work_dim(work_dim)?;
        Ok(Self {
            work_dim,
            global_offset: match global_offset {
                Some(o) => pad(o, work_dim, "global offset")?,
                None => [0; 3],
            },
            global_size: pad(global_size, work_dim, "global size")?,
            local_size: match local_size {
                Some(l) => pad(l, work_dim, "local size")?,
                None => [0; 3],
            },
        })
    }

    /// One-dimensional range with no offset and a runtime-chosen local size.
    #[must_use]
    pub const fn linear(global: usize) -> Self {
        Self { work_dim: 1, global_offset: [0; 3], global_size: [global, 0, 0], local_size: [0; 3] }
    }

    #[must_use]
    pub const fn work_dim(&self) -> u32 {
        self.work_dim
    }

    #[must_use]
    pub const fn global_offset(&self) -> [usize; 3] {
        self.global_offset
    }

    #[must_use]
    pub const fn global_size(&self) -> [usize; 3] {
        self.global_size
    }

    #[must_use]
    pub const fn local_size(&self) -> [usize; 3] {
        self.local_size
    }

    /// An all-zero local size means the runtime picks one.
    #[must_use]
    pub fn has_local_size(&self) -> bool {
        self.local_size.iter().any(|&l| l != 0)
    }

    /// True when any active dimension has no work-items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.global_size[..self.work_dim as usize].contains(&0)
    }

    /// Total number of work-items.
    #[must_use]
    pub fn work_items(&self) -> usize {
        self.global_size[..self.work_dim as usize].iter().product()
    }

    /// Change the dimension count, zeroing entries that became inactive.
    pub(crate) fn set_work_dim(&mut self, work_dim: u32) -> GraphResult<()> {
        check_work_dim(work_dim)?;
        for d in work_dim as usize..3 {
            self.global_offset[d] = 0;
            self.global_size[d] = 0;
            self.local_size[d] = 0;
        }
        self.work_dim = work_dim;
        Ok(())
    }

    pub(crate) fn set_global_offset(&mut self, offset: &[usize]) -> GraphResult<()> {
        self.global_offset = pad(offset, self.work_dim, "global offset")?;
        Ok(())
    }

    pub(crate) fn set_global_size(&mut self, size: &[usize]) -> GraphResult<()> {
        self.global_size = pad(size, self.work_dim, "global size")?;
        Ok(())
    }

    pub(crate) fn set_local_size(&mut self, size: &[usize]) -> GraphResult<()> {
        self.local_size = pad(size, self.work_dim, "local size")?;
        Ok(())
    }
}

/// Block/grid shape handed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchDims {
    pub threads_per_block: [usize; 3],
    pub blocks_per_grid: [usize; 3],
}

impl LaunchDims {
    #[must_use]
    pub fn threads_per_block_total(&self) -> usize {
        self.threads_per_block.iter().product()
    }
}

fn best_divisor(n: usize, max: usize) -> usize {
    let cap = n.min(max).max(1);
    (1..=cap).rev().find(|d| n.is_multiple_of(*d)).unwrap_or(1)
}

/// Map `range` onto threads-per-block and blocks-per-grid.
///
/// A caller-supplied local size is validated and used as is. Otherwise each
/// active axis takes the largest divisor of its global size that fits the
/// remaining block budget; x is raised to the warp width when the divisor
/// would be smaller and the global size allows it.
pub fn resolve_launch_dims(range: &NdRange, limits: &DeviceLimits) -> GraphResult<LaunchDims> {
    let dims = range.work_dim as usize;
    let global = range.global_size;
    let mut threads = [1usize; 3];

    if range.has_local_size() {
        let local = range.local_size;
        for d in 0..dims {
            let l = local[d];
            if l == 0 || l > limits.max_block_dims[d] {
                return Err(GraphError::InvalidWorkGroupSize(format!(
                    "local size {l} in dimension {d} outside 1..={}",
                    limits.max_block_dims[d]
                )));
            }
            if !global[d].is_multiple_of(l) {
                return Err(GraphError::InvalidWorkGroupSize(format!(
                    "global size {} in dimension {d} is not a multiple of local size {l}",
                    global[d]
                )));
            }
            threads[d] = l;
        }
        let total: usize = threads.iter().product();
        if total > limits.max_group_size {
            return Err(GraphError::InvalidWorkGroupSize(format!(
                "{total} threads per block exceeds device limit {}",
                limits.max_group_size
            )));
        }
    } else {
        let mut budget = limits.max_group_size.max(1);
        for d in 0..dims {
            let cap = budget.min(limits.max_block_dims[d]);
            let mut t = best_divisor(global[d], cap);
            if d == 0 && t < limits.warp_size && global[d] >= limits.warp_size {
                t = limits.warp_size.min(cap);
            }
            threads[d] = t;
            budget = (budget / t).max(1);
        }
    }

    let mut blocks = [1usize; 3];
    for d in 0..dims {
        blocks[d] = global[d].div_ceil(threads[d]);
    }
    Ok(LaunchDims { threads_per_block: threads, blocks_per_grid: blocks })
}
