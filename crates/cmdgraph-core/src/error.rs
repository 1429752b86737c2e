//! Engine error types.

use std::fmt;

use thiserror::Error;

/// Result-code classes reported to callers.
///
/// Several [`GraphError`] variants carry extra context but collapse onto the
/// same class; see [`GraphError::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidValue,
    InvalidOperation,
    InvalidSize,
    OutOfResources,
    OutOfHostMemory,
    UnsupportedFeature,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidValue => "INVALID_VALUE",
            Self::InvalidOperation => "INVALID_OPERATION",
            Self::InvalidSize => "INVALID_SIZE",
            Self::OutOfResources => "OUT_OF_RESOURCES",
            Self::OutOfHostMemory => "OUT_OF_HOST_MEMORY",
            Self::UnsupportedFeature => "UNSUPPORTED_FEATURE",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Errors produced by command-buffer operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// An argument value is out of range or malformed.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A dependency names a sync point this buffer never issued.
    #[error("sync point {sync_point} is not registered in this command buffer")]
    InvalidDependency { sync_point: u32 },

    /// Launch work dimension outside 1..=3.
    #[error("work dimension {0} is outside 1..=3")]
    InvalidWorkDimension(u32),

    /// Local size does not fit the global size or the device limits.
    #[error("invalid work-group size: {0}")]
    InvalidWorkGroupSize(String),

    /// Kernel from another context, or unknown to the backend.
    #[error("invalid kernel: {0}")]
    InvalidKernel(String),

    /// Kernel argument index past the kernel's argument table.
    #[error("argument index {index} out of range (max {max})")]
    InvalidArgumentIndex { index: u32, max: u32 },

    /// Call not allowed in the object's current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Size, offset or pattern length rejected.
    #[error("invalid size: {0}")]
    InvalidSize(String),

    /// The backend could not create a node or compile the graph.
    #[error("out of resources: {0}")]
    OutOfResources(String),

    /// Host allocation failed.
    #[error("out of host memory")]
    OutOfHostMemory,

    /// The backend cannot express the requested operation.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Unclassified backend failure.
    #[error("unknown backend failure: {0}")]
    Unknown(String),
}

impl GraphError {
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    pub fn invalid_size(msg: impl Into<String>) -> Self {
        Self::InvalidSize(msg.into())
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }

    /// Result-code class of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidValue(_)
            | Self::InvalidDependency { .. }
            | Self::InvalidWorkDimension(_)
            | Self::InvalidWorkGroupSize(_)
            | Self::InvalidKernel(_)
            | Self::InvalidArgumentIndex { .. } => ErrorKind::InvalidValue,
            Self::InvalidOperation(_) => ErrorKind::InvalidOperation,
            Self::InvalidSize(_) => ErrorKind::InvalidSize,
            Self::OutOfResources(_) => ErrorKind::OutOfResources,
            Self::OutOfHostMemory => ErrorKind::OutOfHostMemory,
            Self::UnsupportedFeature(_) => ErrorKind::UnsupportedFeature,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Only resource exhaustion may succeed on a retry, after the caller
    /// frees memory. Everything else needs corrected input.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::OutOfResources(_))
    }
}

/// Convenience result alias.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Map a poisoned lock onto an engine error.
pub(crate) fn poisoned<T>(_: std::sync::PoisonError<T>) -> GraphError {
    GraphError::unknown("internal lock poisoned")
}
