//! Complex values stored as interleaved (real, imaginary) pairs.

use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::element::Element;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex<T> {
    pub re: T,
    pub im: T,
}

pub type ComplexF32 = Complex<f32>;
pub type ComplexF64 = Complex<f64>;

impl<T: Element> Complex<T> {
    pub fn new(re: T, im: T) -> Self {
        Self { re, im }
    }

    pub fn from_real(re: T) -> Self {
        Self { re, im: T::ZERO }
    }

    pub fn conj(self) -> Self {
        Self {
            re: self.re,
            im: T::ZERO.elem_sub(self.im),
        }
    }

    /// Modulus, computed in f64.
    pub fn abs(self) -> f64 {
        self.re.to_f64().hypot(self.im.to_f64())
    }

    pub fn add_real(self, other: T) -> Self {
        Self {
            re: self.re.elem_add(other),
            im: self.im,
        }
    }

    pub fn sub_real(self, other: T) -> Self {
        Self {
            re: self.re.elem_sub(other),
            im: self.im,
        }
    }

    /// `real - self`: the real operand is the minuend.
    pub fn real_sub(real: T, other: Self) -> Self {
        Self {
            re: real.elem_sub(other.re),
            im: T::ZERO.elem_sub(other.im),
        }
    }

    pub fn mul_real(self, other: T) -> Self {
        Self {
            re: self.re.elem_mul(other),
            im: self.im.elem_mul(other),
        }
    }

    pub fn div_real(self, other: T) -> Self {
        Self {
            re: self.re.elem_div(other),
            im: self.im.elem_div(other),
        }
    }
}

impl<T: Element> Add for Complex<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            re: self.re.elem_add(rhs.re),
            im: self.im.elem_add(rhs.im),
        }
    }
}

impl<T: Element> Sub for Complex<T> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            re: self.re.elem_sub(rhs.re),
            im: self.im.elem_sub(rhs.im),
        }
    }
}

impl<T: Element> Mul for Complex<T> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self {
            re: self.re.elem_mul(rhs.re).elem_sub(self.im.elem_mul(rhs.im)),
            im: self.re.elem_mul(rhs.im).elem_add(self.im.elem_mul(rhs.re)),
        }
    }
}

impl<T: Element> Div for Complex<T> {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        let denom = rhs.re.elem_mul(rhs.re).elem_add(rhs.im.elem_mul(rhs.im));
        let num = self * rhs.conj();
        Self {
            re: num.re.elem_div(denom),
            im: num.im.elem_div(denom),
        }
    }
}

impl<T: Element> Neg for Complex<T> {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            re: T::ZERO.elem_sub(self.re),
            im: T::ZERO.elem_sub(self.im),
        }
    }
}
