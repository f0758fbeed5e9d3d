//! Error type shared by every buffer backend.

use thiserror::Error;

use crate::element::ElementKind;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BufferError {
    /// Index or strided walk reaches outside `[0, len)`.
    #[error("index {index} out of range for buffer of length {len}")]
    Range { index: usize, len: usize },
    #[error("shape mismatch: expected {expected} elements, found {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("element kind mismatch: expected {expected}, found {actual}")]
    KindMismatch {
        expected: ElementKind,
        actual: ElementKind,
    },
    #[error("unsupported addressing: {0}")]
    UnsupportedAddressing(String),
    #[error("allocation failed: {0}")]
    Allocation(String),
    #[error("host/device transfer failed: {0}")]
    Transfer(String),
    #[error("buffer used after destroy")]
    UseAfterDestroy,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("kernel error: {0}")]
    Kernel(String),
}

pub type BufferResult<T> = Result<T, BufferError>;
