//! Error types for the Galaxy3D RHI
//!
//! This module defines the single error type used throughout the command
//! submission and resource binding engine, plus the macros that log an error
//! at the point it is created.

use std::fmt;

use crate::binding::{ResourceKind, ShaderVisibility};
use crate::descriptor::DescriptorHeapType;
use crate::sync::SyncPointId;

/// Result type for Galaxy3D RHI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Galaxy3D RHI errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Backend-specific error (scheduler, queue, etc.)
    BackendError(String),

    /// Invalid resource (view, heap, layout handle, etc.)
    InvalidResource(String),

    /// Initialization failed (device, configuration)
    InitializationFailed(String),

    /// An operation was issued in a state that does not allow it
    InvalidState(String),

    /// A single reservation is larger than any heap of this type can hold
    OutOfDescriptors {
        heap_type: DescriptorHeapType,
        requested: u32,
        capacity: u32,
    },

    /// The binding shape needs more binding units than the device allows
    LayoutOverflow {
        required: u32,
        budget: u32,
    },

    /// The binding shape uses a kind of binding the stage cannot have
    UnsupportedBinding(String),

    /// A shader reads a slot that has nothing bound
    MissingBinding {
        stage: ShaderVisibility,
        kind: ResourceKind,
        slot: u32,
    },

    /// GPU work signaling this sync point never completed
    GpuTimeout {
        sync_point: SyncPointId,
    },

    /// The device was removed or hung; GPU state is presumed corrupted
    DeviceLost(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::OutOfDescriptors { heap_type, requested, capacity } => write!(
                f,
                "Out of descriptors: {} slots requested from a {:?} heap of {} slots",
                requested, heap_type, capacity
            ),
            Error::LayoutOverflow { required, budget } => write!(
                f,
                "Binding layout overflow: {} binding units required, {} available",
                required, budget
            ),
            Error::UnsupportedBinding(msg) => write!(f, "Unsupported binding: {}", msg),
            Error::MissingBinding { stage, kind, slot } => write!(
                f,
                "Missing binding: {:?} slot {} of stage {:?} is required but unbound",
                kind, slot, stage
            ),
            Error::GpuTimeout { sync_point } => {
                write!(f, "GPU timeout waiting for sync point {}", sync_point)
            }
            Error::DeviceLost(msg) => write!(f, "Device lost: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Whether the error means the GPU can no longer be trusted.
    ///
    /// Such errors are reported upward and never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::GpuTimeout { .. } | Error::DeviceLost(_))
    }
}

// ===== ERROR MACROS =====

/// Log an ERROR message and build an `Error::BackendError` from it
///
/// # Example
///
/// ```ignore
/// let err = engine_err!("galaxy3d::rhi::Queue", "Fence went backwards: {}", value);
/// ```
#[macro_export]
macro_rules! engine_err {
    ($source:expr, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::engine_error!($source, "{}", message);
        $crate::galaxy3d::Error::BackendError(message)
    }};
}

/// Log an ERROR message and return `Err(Error::BackendError)` from the current function
#[macro_export]
macro_rules! engine_bail {
    ($source:expr, $($arg:tt)*) => {
        return Err($crate::engine_err!($source, $($arg)*))
    };
}

/// Log an already-built `Error` at ERROR severity and evaluate to it
///
/// # Example
///
/// ```ignore
/// return Err(engine_report!("galaxy3d::rhi::Layout", Error::LayoutOverflow { required, budget }));
/// ```
#[macro_export]
macro_rules! engine_report {
    ($source:expr, $error:expr) => {{
        let error: $crate::galaxy3d::Error = $error;
        $crate::engine_error!($source, "{}", error);
        error
    }};
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
