//! Device context factory with backend selection
//!
//! [`create_device_context`] builds the [`DeviceContext`] a session runs on
//! from the `[device]` configuration section. The device is created but not
//! initialized; `EncodeSession::start()` calls `init()` with the resolved
//! stream parameters.
//!
//! # Backend Selection
//!
//! `backend = "auto"` tries every compiled-in backend in priority order and
//! returns the first that constructs. A named backend is tried alone. If all
//! candidates fail, the error lists why each one failed.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::DeviceConfig;
use crate::video::converter::SoftwareConverter;

use super::synthetic::{SyntheticConfig, SyntheticEncoder};
use super::{DeviceContext, DeviceError, DeviceResult};

/// Backends in priority order
const BACKENDS: &[&str] = &["synthetic"];

/// Names of the backends this build can construct
pub fn available_backends() -> &'static [&'static str] {
    BACKENDS
}

/// Create a device context for the configured backend
///
/// # Errors
///
/// Returns `DeviceError::NoBackendAvailable` if the backend name is unknown
/// or every candidate fails to construct.
///
/// # Example
///
/// ```rust,ignore
/// use lamco_encode_session::config::DeviceConfig;
/// use lamco_encode_session::encoder::create_device_context;
///
/// let ctx = create_device_context(&DeviceConfig::default())?;
/// println!("Using {} backend", ctx.device.backend_name());
/// ```
pub fn create_device_context(config: &DeviceConfig) -> DeviceResult<DeviceContext> {
    let requested = config.backend.to_lowercase();
    let candidates: Vec<&str> = if requested == "auto" {
        BACKENDS.to_vec()
    } else if let Some(name) = BACKENDS.iter().find(|b| **b == requested) {
        vec![*name]
    } else {
        return Err(DeviceError::NoBackendAvailable {
            reason: format!(
                "unknown backend '{}' (available: auto, {})",
                config.backend,
                BACKENDS.join(", ")
            ),
        });
    };

    debug!("Creating device context: backend={}", requested);

    let mut errors: Vec<String> = Vec::new();
    for name in candidates {
        match try_backend(name, config) {
            Ok(ctx) => return Ok(ctx),
            Err(e) => {
                debug!("{} backend failed: {}", name, e);
                errors.push(format!("{}: {}", name, e));
            }
        }
    }

    Err(DeviceError::NoBackendAvailable {
        reason: errors.join("; "),
    })
}

fn try_backend(name: &str, config: &DeviceConfig) -> DeviceResult<DeviceContext> {
    match name {
        "synthetic" => try_synthetic(config),
        other => Err(DeviceError::NoBackendAvailable {
            reason: format!("backend '{}' not compiled in", other),
        }),
    }
}

fn try_synthetic(config: &DeviceConfig) -> DeviceResult<DeviceContext> {
    let synthetic = SyntheticConfig {
        queue_depth: config.queue_depth,
        gop_length: config.gop_length,
        idr_interval_gops: config.idr_interval_gops,
    };
    let encoder = SyntheticEncoder::new(synthetic)?;

    info!(
        "Synthetic encoder created: queue_depth={}, idr every {} GOPs",
        config.queue_depth, config.idr_interval_gops
    );

    Ok(DeviceContext::new(
        Arc::new(encoder),
        Arc::new(SoftwareConverter::new()),
    ))
}
