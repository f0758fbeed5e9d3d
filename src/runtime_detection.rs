//! Backend kinds and cached runtime detection of a usable device.

use std::fmt;
use std::sync::OnceLock;

use crate::config::BackendPreference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Host,
    Device,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Device => "device",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cached detection result.
static DETECTED: OnceLock<BackendKind> = OnceLock::new();

/// Detect the best available backend.
///
/// Priority: Device (wgpu) → Host. The result is computed once per process.
pub fn detect_backend() -> BackendKind {
    *DETECTED.get_or_init(|| {
        let detected = if try_device() {
            BackendKind::Device
        } else {
            BackendKind::Host
        };
        log::info!("Detected backend: {}", detected.name());
        detected
    })
}

/// Map a configured preference to a concrete backend.
pub fn resolve_backend(preference: BackendPreference) -> BackendKind {
    match preference {
        BackendPreference::Auto => detect_backend(),
        BackendPreference::Host => BackendKind::Host,
        BackendPreference::Device => BackendKind::Device,
    }
}

#[cfg(feature = "wgpu")]
fn try_device() -> bool {
    crate::wgpu_backend::device_context().is_some()
}

#[cfg(not(feature = "wgpu"))]
fn try_device() -> bool {
    false
}
