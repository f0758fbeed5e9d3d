//! Buffer creation for a chosen backend.
//!
//! [`BufferFactory::global`] follows the process-wide configuration: an `auto`
//! backend preference resolves through [`detect_backend`], which probes for a
//! wgpu device once and caches the answer.
//!
//! [`detect_backend`]: crate::runtime_detection::detect_backend

use crate::buffer::{ensure_alive, DataBuffer};
use crate::config::global_config;
use crate::element::{ElementKind, Scalar};
use crate::elements::Elements;
use crate::error::BufferResult;
use crate::host_buffer::HostBuffer;
use crate::runtime_detection::{resolve_backend, BackendKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferFactory {
    backend: BackendKind,
}

impl BufferFactory {
    pub fn new(backend: BackendKind) -> Self {
        Self { backend }
    }

    /// Factory for the configured backend.
    pub fn global() -> Self {
        let backend = resolve_backend(global_config().backend);
        log::debug!("BufferFactory: using {backend} backend");
        Self::new(backend)
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Zero-filled buffer.
    pub fn create(&self, kind: ElementKind, len: usize) -> BufferResult<Box<dyn DataBuffer>> {
        match self.backend {
            BackendKind::Host => Ok(Box::new(HostBuffer::zeros(kind, len))),
            BackendKind::Device => device::zeros(kind, len),
        }
    }

    /// Zero-filled buffer of the configured default kind.
    pub fn create_default(&self, len: usize) -> BufferResult<Box<dyn DataBuffer>> {
        self.create(global_config().default_kind, len)
    }

    pub fn from_elements(&self, values: Elements) -> BufferResult<Box<dyn DataBuffer>> {
        match self.backend {
            BackendKind::Host => Ok(Box::new(HostBuffer::from_elements(values))),
            BackendKind::Device => device::from_elements(&values),
        }
    }

    /// Copy of `source`, possibly from another backend, in its kind.
    pub fn from_buffer(&self, source: &dyn DataBuffer) -> BufferResult<Box<dyn DataBuffer>> {
        ensure_alive(source)?;
        if source.backend() == self.backend {
            return source.dup();
        }
        let values = source.as_typed(source.kind())?.into_owned();
        self.from_elements(values)
    }

    pub fn ones(&self, kind: ElementKind, len: usize) -> BufferResult<Box<dyn DataBuffer>> {
        self.from_elements(Elements::filled(kind, len, Scalar::Int(1)))
    }

    /// `len` evenly spaced values from `lower` to `upper` inclusive.
    pub fn linspace(
        &self,
        kind: ElementKind,
        lower: f64,
        upper: f64,
        len: usize,
    ) -> BufferResult<Box<dyn DataBuffer>> {
        self.from_elements(Elements::linspace(kind, lower, upper, len))
    }

    /// One-element buffer holding `value` in its own kind.
    pub fn scalar(&self, value: impl Into<Scalar>) -> BufferResult<Box<dyn DataBuffer>> {
        let value = value.into();
        self.from_elements(Elements::filled(value.kind(), 1, value))
    }
}

#[cfg(feature = "wgpu")]
mod device {
    use super::*;
    use crate::wgpu_backend::DeviceBuffer;

    pub(super) fn zeros(kind: ElementKind, len: usize) -> BufferResult<Box<dyn DataBuffer>> {
        Ok(Box::new(DeviceBuffer::zeros(kind, len)?))
    }

    pub(super) fn from_elements(values: &Elements) -> BufferResult<Box<dyn DataBuffer>> {
        Ok(Box::new(DeviceBuffer::from_elements(values)?))
    }
}

#[cfg(not(feature = "wgpu"))]
mod device {
    use super::*;
    use crate::error::BufferError;

    fn disabled() -> BufferError {
        BufferError::Unsupported("ndbuf was built without the `wgpu` feature".into())
    }

    pub(super) fn zeros(_kind: ElementKind, _len: usize) -> BufferResult<Box<dyn DataBuffer>> {
        Err(disabled())
    }

    pub(super) fn from_elements(_values: &Elements) -> BufferResult<Box<dyn DataBuffer>> {
        Err(disabled())
    }
}
