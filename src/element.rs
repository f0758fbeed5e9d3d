//! Element kinds and the scalar types that implement them.

use std::fmt;
use std::str::FromStr;

use crate::elements::Elements;
use crate::error::BufferError;

/// Storage kind of a buffer. Complex data is stored as interleaved pairs of
/// one of these kinds and has no kind of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Double,
    Float,
    Int,
}

impl ElementKind {
    pub const ALL: [ElementKind; 3] = [ElementKind::Double, ElementKind::Float, ElementKind::Int];

    /// Bytes per element.
    #[inline(always)]
    pub const fn size_of(self) -> usize {
        match self {
            ElementKind::Double => 8,
            ElementKind::Float => 4,
            ElementKind::Int => 4,
        }
    }

    /// Tag used to identify kernels for this kind, e.g. `("mul_scalar", "float")`.
    #[inline(always)]
    pub const fn tag(self) -> &'static str {
        match self {
            ElementKind::Double => "double",
            ElementKind::Float => "float",
            ElementKind::Int => "int",
        }
    }

    /// Convert to u8 for serialization.
    #[inline(always)]
    pub const fn as_u8(self) -> u8 {
        match self {
            ElementKind::Double => 0,
            ElementKind::Float => 1,
            ElementKind::Int => 2,
        }
    }

    /// Convert from u8 for deserialization.
    #[inline(always)]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ElementKind::Double),
            1 => Some(ElementKind::Float),
            2 => Some(ElementKind::Int),
            _ => None,
        }
    }

    pub const fn is_floating(self) -> bool {
        !matches!(self, ElementKind::Int)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ElementKind {
    type Err = BufferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "double" | "f64" => Ok(ElementKind::Double),
            "float" | "f32" => Ok(ElementKind::Float),
            "int" | "i32" => Ok(ElementKind::Int),
            other => Err(BufferError::InvalidArgument(format!(
                "unknown element kind '{other}'"
            ))),
        }
    }
}

/// A single value of one of the supported kinds.
///
/// Every scalar argument and every element read travels as a `Scalar`, and is
/// coerced to the receiving buffer's kind with [`Scalar::cast`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Double(f64),
    Float(f32),
    Int(i32),
}

impl Scalar {
    pub fn kind(self) -> ElementKind {
        match self {
            Scalar::Double(_) => ElementKind::Double,
            Scalar::Float(_) => ElementKind::Float,
            Scalar::Int(_) => ElementKind::Int,
        }
    }

    pub fn to_f64(self) -> f64 {
        match self {
            Scalar::Double(v) => v,
            Scalar::Float(v) => v as f64,
            Scalar::Int(v) => v as f64,
        }
    }

    /// Coerce to the element type `E` (truncating for float to int).
    #[inline]
    pub fn cast<E: Element>(self) -> E {
        E::from_f64(self.to_f64())
    }

    pub fn to_kind(self, kind: ElementKind) -> Scalar {
        match kind {
            ElementKind::Double => Scalar::Double(self.cast()),
            ElementKind::Float => Scalar::Float(self.cast()),
            ElementKind::Int => Scalar::Int(self.cast()),
        }
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Double(v)
    }
}

impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Scalar::Float(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(v)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Double(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Int(v) => write!(f, "{v}"),
        }
    }
}

/// Primitive types a buffer can store.
///
/// Integer arithmetic wraps; integer division by zero yields zero. The device
/// kernels implement the same rules so both backends agree.
pub trait Element:
    fmt::Debug + Copy + Default + PartialEq + PartialOrd + Send + Sync + bytemuck::Pod + 'static
{
    const KIND: ElementKind;
    const ZERO: Self;
    const ONE: Self;

    fn to_f64(self) -> f64;
    /// Cast from f64: truncates toward zero and saturates for `i32`.
    fn from_f64(v: f64) -> Self;

    fn elem_add(self, other: Self) -> Self;
    fn elem_sub(self, other: Self) -> Self;
    fn elem_mul(self, other: Self) -> Self;
    fn elem_div(self, other: Self) -> Self;

    fn into_scalar(self) -> Scalar;

    fn wrap(values: Vec<Self>) -> Elements;
    fn slice(elements: &Elements) -> Option<&[Self]>;
    fn slice_mut(elements: &mut Elements) -> Option<&mut [Self]>;
}

impl Element for f64 {
    const KIND: ElementKind = ElementKind::Double;
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;

    #[inline(always)] fn to_f64(self) -> f64 { self }
    #[inline(always)] fn from_f64(v: f64) -> Self { v }

    #[inline(always)] fn elem_add(self, other: Self) -> Self { self + other }
    #[inline(always)] fn elem_sub(self, other: Self) -> Self { self - other }
    #[inline(always)] fn elem_mul(self, other: Self) -> Self { self * other }
    #[inline(always)] fn elem_div(self, other: Self) -> Self { self / other }

    #[inline(always)] fn into_scalar(self) -> Scalar { Scalar::Double(self) }

    fn wrap(values: Vec<Self>) -> Elements { Elements::Double(values) }

    fn slice(elements: &Elements) -> Option<&[Self]> {
        match elements {
            Elements::Double(v) => Some(v),
            _ => None,
        }
    }

    fn slice_mut(elements: &mut Elements) -> Option<&mut [Self]> {
        match elements {
            Elements::Double(v) => Some(v),
            _ => None,
        }
    }
}

impl Element for f32 {
    const KIND: ElementKind = ElementKind::Float;
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;

    #[inline(always)] fn to_f64(self) -> f64 { self as f64 }
    #[inline(always)] fn from_f64(v: f64) -> Self { v as f32 }

    #[inline(always)] fn elem_add(self, other: Self) -> Self { self + other }
    #[inline(always)] fn elem_sub(self, other: Self) -> Self { self - other }
    #[inline(always)] fn elem_mul(self, other: Self) -> Self { self * other }
    #[inline(always)] fn elem_div(self, other: Self) -> Self { self / other }

    #[inline(always)] fn into_scalar(self) -> Scalar { Scalar::Float(self) }

    fn wrap(values: Vec<Self>) -> Elements { Elements::Float(values) }

    fn slice(elements: &Elements) -> Option<&[Self]> {
        match elements {
            Elements::Float(v) => Some(v),
            _ => None,
        }
    }

    fn slice_mut(elements: &mut Elements) -> Option<&mut [Self]> {
        match elements {
            Elements::Float(v) => Some(v),
            _ => None,
        }
    }
}

impl Element for i32 {
    const KIND: ElementKind = ElementKind::Int;
    const ZERO: Self = 0;
    const ONE: Self = 1;

    #[inline(always)] fn to_f64(self) -> f64 { self as f64 }
    #[inline(always)] fn from_f64(v: f64) -> Self { v as i32 }

    #[inline(always)] fn elem_add(self, other: Self) -> Self { self.wrapping_add(other) }
    #[inline(always)] fn elem_sub(self, other: Self) -> Self { self.wrapping_sub(other) }
    #[inline(always)] fn elem_mul(self, other: Self) -> Self { self.wrapping_mul(other) }
    #[inline(always)]
    fn elem_div(self, other: Self) -> Self {
        if other == 0 { 0 } else { self.wrapping_div(other) }
    }

    #[inline(always)] fn into_scalar(self) -> Scalar { Scalar::Int(self) }

    fn wrap(values: Vec<Self>) -> Elements { Elements::Int(values) }

    fn slice(elements: &Elements) -> Option<&[Self]> {
        match elements {
            Elements::Int(v) => Some(v),
            _ => None,
        }
    }

    fn slice_mut(elements: &mut Elements) -> Option<&mut [Self]> {
        match elements {
            Elements::Int(v) => Some(v),
            _ => None,
        }
    }
}
