//! Unit tests for error.rs
//!
//! Tests the Error variants, their Display output and the logging macros.

use crate::binding::{ResourceKind, ShaderVisibility};
use crate::descriptor::DescriptorHeapType;
use crate::error::{Error, Result};
use crate::sync::SyncPointId;

// ============================================================================
// ERROR DISPLAY TESTS
// ============================================================================

#[test]
fn test_backend_error_display() {
    let err = Error::BackendError("scheduler rejected payload".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Backend error"));
    assert!(display.contains("scheduler rejected payload"));
}

#[test]
fn test_layout_overflow_display() {
    let err = Error::LayoutOverflow { required: 70, budget: 64 };
    assert_eq!(
        format!("{}", err),
        "Binding layout overflow: 70 binding units required, 64 available"
    );
}

#[test]
fn test_out_of_descriptors_display() {
    let err = Error::OutOfDescriptors {
        heap_type: DescriptorHeapType::Sampler,
        requested: 4096,
        capacity: 2048,
    };
    let display = format!("{}", err);
    assert!(display.contains("4096"));
    assert!(display.contains("Sampler"));
    assert!(display.contains("2048"));
}

#[test]
fn test_missing_binding_display() {
    let err = Error::MissingBinding {
        stage: ShaderVisibility::Pixel,
        kind: ResourceKind::ShaderResource,
        slot: 3,
    };
    let display = format!("{}", err);
    assert!(display.contains("ShaderResource slot 3"));
    assert!(display.contains("Pixel"));
}

#[test]
fn test_gpu_timeout_display() {
    let err = Error::GpuTimeout { sync_point: SyncPointId(17) };
    assert_eq!(format!("{}", err), "GPU timeout waiting for sync point #17");
}

// ============================================================================
// ERROR TRAIT IMPLEMENTATIONS
// ============================================================================

#[test]
fn test_error_is_std_error() {
    let err = Error::DeviceLost("hung".to_string());
    let _: &dyn std::error::Error = &err;
}

#[test]
fn test_error_clone_and_eq() {
    let err = Error::InvalidState("context is closed".to_string());
    assert_eq!(err.clone(), err);
    assert_ne!(err, Error::InvalidState("context is open".to_string()));
}

#[test]
fn test_fatal_errors() {
    assert!(Error::GpuTimeout { sync_point: SyncPointId(1) }.is_fatal());
    assert!(Error::DeviceLost("removed".to_string()).is_fatal());
    assert!(!Error::LayoutOverflow { required: 1, budget: 0 }.is_fatal());
    assert!(!Error::InvalidState("x".to_string()).is_fatal());
}

// ============================================================================
// MACRO TESTS
// ============================================================================

#[test]
fn test_engine_err_builds_backend_error() {
    let err = crate::engine_err!("galaxy3d::rhi::test", "bad value {}", 7);
    assert_eq!(err, Error::BackendError("bad value 7".to_string()));
}

#[test]
fn test_engine_bail_returns_early() {
    fn fails(flag: bool) -> Result<u32> {
        if flag {
            crate::engine_bail!("galaxy3d::rhi::test", "flag was set");
        }
        Ok(1)
    }

    assert_eq!(fails(false), Ok(1));
    assert_eq!(fails(true), Err(Error::BackendError("flag was set".to_string())));
}

#[test]
fn test_engine_report_passes_error_through() {
    let err = crate::engine_report!(
        "galaxy3d::rhi::test",
        Error::LayoutOverflow { required: 80, budget: 60 }
    );
    assert_eq!(err, Error::LayoutOverflow { required: 80, budget: 60 });
}

// ============================================================================
// RESULT TYPE TESTS
// ============================================================================

#[test]
fn test_error_propagation_with_question_mark() {
    fn inner() -> Result<i32> {
        Err(Error::DeviceLost("removed".to_string()))
    }

    fn outer() -> Result<i32> {
        inner()?;
        Ok(42)
    }

    assert!(outer().is_err());
}
