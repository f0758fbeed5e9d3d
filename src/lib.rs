//! ndbuf: typed, strided numeric buffers with host and wgpu device backends.
//!
//! Every backend implements [`DataBuffer`]: element access, strided reads and
//! writes, the arithmetic family (`addi`, `rsubi_buffer_into`, ...) and
//! elementwise transforms. [`BufferOps`] layers the ergonomic helpers on top
//! for any backend, including `Box<dyn DataBuffer>`.
//!
//! - **Host**: [`HostBuffer`] keeps a typed `Vec` in process memory.
//! - **Device**: `DeviceBuffer` keeps its elements in a wgpu storage buffer
//!   and runs WGSL kernels (feature `wgpu`, on by default).
//!
//! # Quick Start
//!
//! ```ignore
//! use ndbuf::prelude::*;
//!
//! let factory = BufferFactory::global(); // host or device, from NDBUF_BACKEND
//! let mut a = factory.linspace(ElementKind::Double, 1.0, 5.0, 5)?;
//! a.addi(1.0)?;
//! a.apply(&element_wise_op("pow", &[Scalar::Double(2.0)])?)?;
//! ```

pub mod buffer;
pub mod complex;
pub mod config;
pub mod element;
pub mod elements;
pub mod error;
pub mod factory;
pub mod host_buffer;
pub mod host_kernels;
pub mod op_cache;
pub mod ops;
pub mod runtime_detection;
pub mod strided;

// Device backend (cross-platform through wgpu)
#[cfg(feature = "wgpu")]
pub mod wgpu_backend;
#[cfg(feature = "wgpu")]
pub mod wgpu_kernels;

pub use buffer::{BufferOps, DataBuffer};
pub use complex::{Complex, ComplexF32, ComplexF64};
pub use config::{
    global_config, set_global_config, BackendPreference, BufferConfig, TransferPreference,
};
pub use element::{Element, ElementKind, Scalar};
pub use elements::Elements;
pub use error::{BufferError, BufferResult};
pub use factory::BufferFactory;
pub use host_buffer::HostBuffer;
pub use op_cache::{cached_op, element_wise_op};
pub use ops::{ArithOp, ElementWiseOp, Transform};
pub use runtime_detection::{detect_backend, resolve_backend, BackendKind};
pub use strided::{Strided, StridedPair};

#[cfg(feature = "wgpu")]
pub use wgpu_backend::{device_context, global_context, DeviceBuffer, DeviceContext, TransferPath};

/// Common imports for buffer users.
pub mod prelude {
    pub use crate::buffer::{BufferOps, DataBuffer};
    pub use crate::element::{ElementKind, Scalar};
    pub use crate::elements::Elements;
    pub use crate::error::{BufferError, BufferResult};
    pub use crate::factory::BufferFactory;
    pub use crate::op_cache::element_wise_op;
    pub use crate::strided::{Strided, StridedPair};
}
