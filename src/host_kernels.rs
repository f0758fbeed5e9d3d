//! In-process loop bodies for the host backend.
//!
//! Callers validate walks against slice lengths first; these loops only
//! `debug_assert` their preconditions.

use crate::element::Element;
use crate::ops::{ArithOp, Transform};
use crate::strided::{Strided, StridedPair};

// ============================================================================
// Gather / scatter
// ============================================================================

/// Copy the walked elements into a new vector.
#[inline]
pub fn gather<E: Element>(src: &[E], walk: Strided) -> Vec<E> {
    if walk.is_contiguous() && walk.count > 0 {
        return src[walk.offset..walk.offset + walk.count].to_vec();
    }
    walk.indices().map(|i| src[i]).collect()
}

/// Write `values` to the walked positions of `dst`.
#[inline]
pub fn scatter<E: Element>(dst: &mut [E], walk: Strided, values: &[E]) {
    debug_assert_eq!(walk.count, values.len());
    if walk.is_contiguous() && walk.count > 0 {
        dst[walk.offset..walk.offset + walk.count].copy_from_slice(values);
        return;
    }
    for (i, &v) in walk.indices().zip(values.iter()) {
        dst[i] = v;
    }
}

/// Broadcast `value` to the walked positions of `dst`.
#[inline]
pub fn fill<E: Element>(dst: &mut [E], walk: Strided, value: E) {
    for i in walk.indices() {
        dst[i] = value;
    }
}

// ============================================================================
// Scalar arithmetic: x[i] = x[i] op c
// ============================================================================

#[inline]
pub fn scalar_inplace<E: Element>(data: &mut [E], op: ArithOp, scalar: E, walk: Strided) {
    for i in walk.indices() {
        data[i] = op.apply(data[i], scalar);
    }
}

/// Results in walk order, `src` untouched.
#[inline]
pub fn scalar_out<E: Element>(src: &[E], op: ArithOp, scalar: E, walk: Strided) -> Vec<E> {
    walk.indices().map(|i| op.apply(src[i], scalar)).collect()
}

// ============================================================================
// Buffer arithmetic: x[off + k*inc] = x[..] op y[other_off + k*other_inc]
// ============================================================================

#[inline]
pub fn binary_inplace<E: Element>(data: &mut [E], other: &[E], op: ArithOp, pair: StridedPair) {
    for (i, j) in pair.this().indices().zip(pair.other().indices()) {
        data[i] = op.apply(data[i], other[j]);
    }
}

#[inline]
pub fn binary_out<E: Element>(src: &[E], other: &[E], op: ArithOp, pair: StridedPair) -> Vec<E> {
    pair.this()
        .indices()
        .zip(pair.other().indices())
        .map(|(i, j)| op.apply(src[i], other[j]))
        .collect()
}

// ============================================================================
// Transforms
// ============================================================================

#[inline]
pub fn transform_inplace<E: Element>(data: &mut [E], transform: &Transform, walk: Strided) {
    for i in walk.indices() {
        data[i] = transform.apply(data[i]);
    }
}

#[inline]
pub fn transform_out<E: Element>(src: &[E], transform: &Transform, walk: Strided) -> Vec<E> {
    walk.indices().map(|i| transform.apply(src[i])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_scatter() {
        let src = vec![0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(gather(&src, Strided::new(1, 2, 3)), vec![1.0, 3.0, 5.0]);
        assert_eq!(gather(&src, Strided::contiguous(2, 2)), vec![2.0, 3.0]);

        let mut dst = vec![0i32; 5];
        scatter(&mut dst, Strided::new(0, 2, 3), &[7, 8, 9]);
        assert_eq!(dst, vec![7, 0, 8, 0, 9]);
    }

    #[test]
    fn test_scalar_inplace_only_touches_walk() {
        let mut data = vec![1.0f64; 5];
        scalar_inplace(&mut data, ArithOp::Add, 1.0, Strided::new(1, 2, 2));
        assert_eq!(data, vec![1.0, 2.0, 1.0, 2.0, 1.0]);
    }

    #[test]
    fn test_scalar_out_leaves_source() {
        let src = vec![2.0f32, 4.0];
        let out = scalar_out(&src, ArithOp::RDiv, 8.0, Strided::whole(2));
        assert_eq!(out, vec![4.0, 2.0]);
        assert_eq!(src, vec![2.0, 4.0]);
    }

    #[test]
    fn test_binary_with_independent_strides() {
        let mut x = vec![1i32, 2, 3, 4];
        let y = vec![10, 0, 20, 0, 30];
        binary_inplace(&mut x, &y, ArithOp::Mul, StridedPair::new(2, 1, 2, 2, 2));
        assert_eq!(x, vec![1, 40, 3, 120]);
    }

    #[test]
    fn test_transform_out() {
        let src = vec![0.0f64, 1.0];
        let out = transform_out(&src, &Transform::Exp, Strided::whole(2));
        assert!((out[1] - std::f64::consts::E).abs() < 1e-12);
    }
}
