//! Fill validation and decomposition into native nodes.
//!
//! Native memset nodes take 1, 2 or 4-byte elements. Wider patterns either
//! go to a native pattern-fill node, when the backend has one large enough,
//! or are emulated by a chain of strided memsets:
//!
//! 1. one 4-byte memset over the whole range holding pattern bytes `0..4`;
//! 2. one 1-byte memset per remaining pattern byte `k`, starting at
//!    `dst + k` and strided by the pattern size.
//!
//! Each node of the chain depends on the one before it.

use crate::emitter::{MemsetNode, PatternFillNode};
use crate::error::{GraphError, GraphResult};
use crate::types::DevicePtr;

/// One native node of a fill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillStep {
    Memset(MemsetNode),
    Pattern(PatternFillNode),
}

/// Check pattern size, offset and size of a fill.
pub fn validate_fill(pattern: &[u8], offset: usize, size: usize) -> GraphResult<()> {
    let p = pattern.len();
    if p == 0 || !p.is_power_of_two() {
        return Err(GraphError::invalid_size(format!(
            "pattern size {p} is not a positive power of two"
        )));
    }
    if !offset.is_multiple_of(p) || !size.is_multiple_of(p) {
        return Err(GraphError::invalid_size(format!(
            "offset {offset} and size {size} must be multiples of pattern size {p}"
        )));
    }
    Ok(())
}

fn le_value(bytes: &[u8]) -> u32 {
    bytes.iter().rev().fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
}

/// Decompose a validated fill of `size` bytes at `dst` into native steps.
#[must_use]
pub fn plan_fill(dst: DevicePtr, pattern: &[u8], size: usize, max_native: usize) -> Vec<FillStep> {
    let p = pattern.len();
    if matches!(p, 1 | 2 | 4) {
        return vec![FillStep::Memset(MemsetNode {
            dst,
            element_size: p,
            value: le_value(pattern),
            count: size / p,
            pitch: p,
        })];
    }
    if p <= max_native {
        return vec![FillStep::Pattern(PatternFillNode { dst, pattern: pattern.to_vec(), size })];
    }

    let mut steps = Vec::with_capacity(1 + p - 4);
    steps.push(FillStep::Memset(MemsetNode {
        dst,
        element_size: 4,
        value: le_value(&pattern[..4]),
        count: size / 4,
        pitch: 4,
    }));
    for (k, &byte) in pattern.iter().enumerate().skip(4) {
        steps.push(FillStep::Memset(MemsetNode {
            dst: dst.offset(k),
            element_size: 1,
            value: u32::from(byte),
            count: size / p,
            pitch: p,
        }));
    }
    steps
}
