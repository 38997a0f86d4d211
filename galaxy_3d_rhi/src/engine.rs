//! Galaxy3D RHI - Process-wide registry for devices and the logger
//!
//! Devices own every allocator (descriptor heap pools, binding layout cache),
//! so the registry only hands out shared handles to them. The logger is the
//! one piece of true global state: every module logs through `Engine::log`.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::SystemTime;

use crate::device::Device;
use crate::error::{Error, Result};
use crate::log::{DefaultLogger, LogEntry, LogSeverity, Logger};

// ===== INTERNAL STATE =====

/// Global engine state storage
static ENGINE_STATE: OnceLock<EngineState> = OnceLock::new();

/// Global logger (initialized with DefaultLogger)
static LOGGER: OnceLock<RwLock<Box<dyn Logger>>> = OnceLock::new();

/// Internal state structure holding the named devices
struct EngineState {
    devices: RwLock<HashMap<String, Arc<Device>>>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }
}

fn logger() -> &'static RwLock<Box<dyn Logger>> {
    LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger::new())))
}

// ===== PUBLIC API =====

/// Process-wide registry
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use galaxy_3d_rhi::galaxy3d::{Engine, Device, ManualScheduler, DeviceCapabilities, RhiConfig};
///
/// Engine::initialize()?;
/// let scheduler = Arc::new(ManualScheduler::new());
/// let device = Device::new(DeviceCapabilities::default(), RhiConfig::default(), scheduler)?;
/// Engine::register_device("main", device)?;
///
/// let device = Engine::device("main")?;
/// let mut context = device.create_context(galaxy_3d_rhi::galaxy3d::QueueType::Direct)?;
/// context.flush()?;
///
/// Engine::shutdown();
/// # Ok::<(), galaxy_3d_rhi::galaxy3d::Error>(())
/// ```
pub struct Engine;

impl Engine {
    fn log_and_return_error(error: Error) -> Error {
        crate::engine_error!("galaxy3d::Engine", "{}", error);
        error
    }

    fn state() -> Result<&'static EngineState> {
        ENGINE_STATE.get().ok_or_else(|| {
            Self::log_and_return_error(Error::InitializationFailed(
                "Engine not initialized. Call Engine::initialize() first.".to_string(),
            ))
        })
    }

    /// Initialize the engine (idempotent)
    pub fn initialize() -> Result<()> {
        ENGINE_STATE.get_or_init(EngineState::new);
        Ok(())
    }

    /// Drop every registered device handle
    ///
    /// Devices stay alive while contexts still reference them.
    pub fn shutdown() {
        if let Some(state) = ENGINE_STATE.get() {
            if let Ok(mut devices) = state.devices.write() {
                devices.clear();
            }
        }
    }

    /// Register a device under `name`
    ///
    /// # Errors
    ///
    /// - The engine is not initialized
    /// - A device with the same name already exists
    pub fn register_device(name: &str, device: Arc<Device>) -> Result<()> {
        let state = Self::state()?;
        let mut devices = state.devices.write().map_err(|_| {
            Self::log_and_return_error(Error::BackendError("Device registry lock poisoned".to_string()))
        })?;

        if devices.contains_key(name) {
            return Err(Self::log_and_return_error(Error::InitializationFailed(format!(
                "Device '{}' already exists. Call Engine::destroy_device() first.",
                name
            ))));
        }

        devices.insert(name.to_string(), device);
        crate::engine_info!("galaxy3d::Engine", "Device '{}' registered", name);
        Ok(())
    }

    /// Get a registered device
    pub fn device(name: &str) -> Result<Arc<Device>> {
        let state = Self::state()?;
        let devices = state.devices.read().map_err(|_| {
            Self::log_and_return_error(Error::BackendError("Device registry lock poisoned".to_string()))
        })?;

        devices.get(name).cloned().ok_or_else(|| {
            Self::log_and_return_error(Error::InvalidResource(format!(
                "Device '{}' not found",
                name
            )))
        })
    }

    /// Remove a device from the registry
    pub fn destroy_device(name: &str) -> Result<()> {
        let state = Self::state()?;
        let mut devices = state.devices.write().map_err(|_| {
            Self::log_and_return_error(Error::BackendError("Device registry lock poisoned".to_string()))
        })?;

        if devices.remove(name).is_none() {
            return Err(Self::log_and_return_error(Error::InvalidResource(format!(
                "Device '{}' not found",
                name
            ))));
        }

        crate::engine_info!("galaxy3d::Engine", "Device '{}' destroyed", name);
        Ok(())
    }

    /// Number of registered devices
    pub fn device_count() -> usize {
        ENGINE_STATE
            .get()
            .and_then(|state| state.devices.read().ok().map(|devices| devices.len()))
            .unwrap_or(0)
    }

    // ===== LOGGING API =====

    /// Replace the logger
    pub fn set_logger<L: Logger + 'static>(logger_impl: L) {
        if let Ok(mut lock) = logger().write() {
            *lock = Box::new(logger_impl);
        }
    }

    /// Reset logger to `DefaultLogger`
    pub fn reset_logger() {
        if let Ok(mut lock) = logger().write() {
            *lock = Box::new(DefaultLogger::new());
        }
    }

    /// Internal logging method (used by the engine_* macros)
    pub fn log(severity: LogSeverity, source: &str, message: String) {
        if let Ok(lock) = logger().read() {
            lock.log(&LogEntry {
                severity,
                timestamp: SystemTime::now(),
                source: source.to_string(),
                message,
                file: None,
                line: None,
            });
        }
    }

    /// Internal logging method with file:line information (used by engine_error!)
    pub fn log_detailed(
        severity: LogSeverity,
        source: &str,
        message: String,
        file: &'static str,
        line: u32,
    ) {
        if let Ok(lock) = logger().read() {
            lock.log(&LogEntry {
                severity,
                timestamp: SystemTime::now(),
                source: source.to_string(),
                message,
                file: Some(file),
                line: Some(line),
            });
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
