//! Owned typed sequences moved in and out of buffers.

use crate::element::{Element, ElementKind, Scalar};
use crate::error::{BufferError, BufferResult};

/// Owned, contiguous values of a single kind.
///
/// Bulk reads always return a fresh `Elements`, never a view into a buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Elements {
    Double(Vec<f64>),
    Float(Vec<f32>),
    Int(Vec<i32>),
}

/// Run `$body` with `$v` bound to the inner vector of whichever variant `$e` is.
#[macro_export]
macro_rules! with_elements {
    ($e:expr, $v:ident => $body:expr) => {
        match $e {
            $crate::Elements::Double($v) => $body,
            $crate::Elements::Float($v) => $body,
            $crate::Elements::Int($v) => $body,
        }
    };
}

impl Elements {
    pub fn zeros(kind: ElementKind, len: usize) -> Self {
        match kind {
            ElementKind::Double => Elements::Double(vec![0.0; len]),
            ElementKind::Float => Elements::Float(vec![0.0; len]),
            ElementKind::Int => Elements::Int(vec![0; len]),
        }
    }

    pub fn filled(kind: ElementKind, len: usize, value: Scalar) -> Self {
        match kind {
            ElementKind::Double => Elements::Double(vec![value.cast(); len]),
            ElementKind::Float => Elements::Float(vec![value.cast(); len]),
            ElementKind::Int => Elements::Int(vec![value.cast(); len]),
        }
    }

    /// `n` evenly spaced values from `lower` to `upper` inclusive.
    pub fn linspace(kind: ElementKind, lower: f64, upper: f64, n: usize) -> Self {
        let step = if n > 1 { (upper - lower) / (n - 1) as f64 } else { 0.0 };
        let values: Vec<f64> = (0..n).map(|i| lower + step * i as f64).collect();
        Elements::Double(values).into_kind(kind)
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            Elements::Double(_) => ElementKind::Double,
            Elements::Float(_) => ElementKind::Float,
            Elements::Int(_) => ElementKind::Int,
        }
    }

    pub fn len(&self) -> usize {
        with_elements!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Scalar> {
        with_elements!(self, v => v.get(index).map(|x| x.into_scalar()))
    }

    pub fn as_slice<E: Element>(&self) -> Option<&[E]> {
        E::slice(self)
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        with_elements!(self, v => v.iter().map(|x| x.to_f64()).collect())
    }

    /// Copy out as `E`, casting each value when the kinds differ.
    pub fn to_vec<E: Element>(&self) -> Vec<E> {
        match E::slice(self) {
            Some(values) => values.to_vec(),
            None => with_elements!(self, v => v.iter().map(|x| E::from_f64(x.to_f64())).collect()),
        }
    }

    /// Convert into `kind` with an explicit elementwise cast.
    pub fn convert(&self, kind: ElementKind) -> Elements {
        if self.kind() == kind {
            return self.clone();
        }
        with_elements!(self, v => cast_vec(v, kind))
    }

    pub fn into_kind(self, kind: ElementKind) -> Elements {
        if self.kind() == kind {
            self
        } else {
            self.convert(kind)
        }
    }

    /// Native in-memory byte layout of the values.
    pub fn as_bytes(&self) -> &[u8] {
        with_elements!(self, v => bytemuck::cast_slice(v.as_slice()))
    }

    pub fn from_bytes(kind: ElementKind, bytes: &[u8]) -> BufferResult<Self> {
        if bytes.len() % kind.size_of() != 0 {
            return Err(BufferError::ShapeMismatch {
                expected: bytes.len() / kind.size_of() * kind.size_of(),
                actual: bytes.len(),
            });
        }
        Ok(match kind {
            ElementKind::Double => Elements::Double(bytemuck::pod_collect_to_vec(bytes)),
            ElementKind::Float => Elements::Float(bytemuck::pod_collect_to_vec(bytes)),
            ElementKind::Int => Elements::Int(bytemuck::pod_collect_to_vec(bytes)),
        })
    }
}

fn cast_vec<E: Element>(values: &[E], kind: ElementKind) -> Elements {
    match kind {
        ElementKind::Double => Elements::Double(values.iter().map(|x| x.to_f64()).collect()),
        ElementKind::Float => {
            Elements::Float(values.iter().map(|x| f32::from_f64(x.to_f64())).collect())
        }
        ElementKind::Int => Elements::Int(values.iter().map(|x| i32::from_f64(x.to_f64())).collect()),
    }
}

impl From<Vec<f64>> for Elements {
    fn from(v: Vec<f64>) -> Self {
        Elements::Double(v)
    }
}

impl From<Vec<f32>> for Elements {
    fn from(v: Vec<f32>) -> Self {
        Elements::Float(v)
    }
}

impl From<Vec<i32>> for Elements {
    fn from(v: Vec<i32>) -> Self {
        Elements::Int(v)
    }
}
