//! Reference-backend memory errors.

use cmdgraph_core::{DevicePtr, GraphError};
use thiserror::Error;

/// Failures of the simulated address space.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("allocation of {requested} bytes exceeds remaining capacity {available}")]
    OutOfCapacity { requested: usize, available: usize },

    #[error("zero-sized allocation")]
    ZeroSize,

    #[error("address {0} is not inside any allocation")]
    InvalidAddress(DevicePtr),

    #[error("access of {len} bytes at {ptr} runs past the end of its allocation")]
    OutOfBounds { ptr: DevicePtr, len: usize },
}

impl From<MemoryError> for GraphError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::OutOfCapacity { .. } => Self::OutOfResources(e.to_string()),
            MemoryError::ZeroSize => Self::InvalidSize(e.to_string()),
            MemoryError::InvalidAddress(_) | MemoryError::OutOfBounds { .. } => {
                Self::InvalidValue(e.to_string())
            }
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, MemoryError>;
