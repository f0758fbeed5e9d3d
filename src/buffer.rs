//! The buffer contract every backend implements.
//!
//! [`DataBuffer`] is object safe and holds the primitive operations each backend
//! provides. [`BufferOps`] is implemented for every `DataBuffer` (including
//! `dyn DataBuffer`) and supplies the arithmetic family in four forms per
//! operator:
//!
//! | form | scalar | buffer |
//! |---|---|---|
//! | in place | `addi(c)` | `addi_buffer(&b)` |
//! | strided in place | `addi_strided(c, inc, offset)` | `addi_buffer_strided(&b, pair)` |
//! | into result | `addi_into(c, &mut r)` | `addi_buffer_into(&b, &mut r)` |
//! | strided into result | `addi_strided_into(c, inc, offset, &mut r)` | `addi_buffer_strided_into(&b, pair, &mut r)` |
//!
//! A result target receives the computed values at the walked positions and
//! the source is left unchanged. Result targets are validated before anything
//! is written, so a failed call never leaves a partially written target.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;

use crate::complex::ComplexF64;
use crate::element::{ElementKind, Scalar};
use crate::elements::Elements;
use crate::error::{BufferError, BufferResult};
use crate::ops::{ArithOp, ElementWiseOp};
use crate::runtime_detection::BackendKind;
use crate::strided::{Strided, StridedPair};

pub trait DataBuffer: fmt::Debug + Send + Any {
    fn backend(&self) -> BackendKind;
    fn kind(&self) -> ElementKind;
    /// Element count, fixed at construction. Still reported after `destroy`.
    fn len(&self) -> usize;
    fn is_destroyed(&self) -> bool;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn as_dyn(&self) -> &dyn DataBuffer;
    fn as_dyn_mut(&mut self) -> &mut dyn DataBuffer;

    fn get(&self, index: usize) -> BufferResult<Scalar>;
    fn put(&mut self, index: usize, value: Scalar) -> BufferResult<()>;

    /// Fresh copy of the walked elements in the buffer's kind.
    fn get_strided(&self, walk: Strided) -> BufferResult<Elements>;
    /// Write `values` (converted to the buffer's kind) to the walked positions.
    fn put_strided(&mut self, walk: Strided, values: &Elements) -> BufferResult<()>;

    /// Replace the full contents; `values.len()` must equal `len()`.
    fn set_all(&mut self, values: &Elements) -> BufferResult<()>;

    /// Contents converted to `kind`. May borrow internal storage when `kind`
    /// is the native kind; callers must not rely on either case.
    fn as_typed(&self, kind: ElementKind) -> BufferResult<Cow<'_, Elements>>;

    /// Native in-memory bytes. Not portable across backends and may be empty
    /// when the backend has no cheap host-visible copy.
    fn as_bytes(&self) -> BufferResult<Vec<u8>>;

    /// Broadcast `value` from `offset` to the end.
    fn assign_scalar(&mut self, value: Scalar, offset: usize) -> BufferResult<()>;

    /// Deep copy with independent storage on the same backend.
    fn dup(&self) -> BufferResult<Box<dyn DataBuffer>>;

    /// Release backing storage. Calling it again is a no-op; every other
    /// operation afterwards fails with [`BufferError::UseAfterDestroy`].
    fn destroy(&mut self);

    /// Wait for outstanding work on this buffer's storage.
    fn flush(&self) -> BufferResult<()>;

    fn exec_scalar(&mut self, op: ArithOp, value: Scalar, walk: Strided) -> BufferResult<()>;
    fn exec_scalar_into(
        &self,
        op: ArithOp,
        value: Scalar,
        walk: Strided,
        result: &mut dyn DataBuffer,
    ) -> BufferResult<()>;

    fn exec_binary(&mut self, op: ArithOp, other: &dyn DataBuffer, pair: StridedPair) -> BufferResult<()>;
    fn exec_binary_into(
        &self,
        op: ArithOp,
        other: &dyn DataBuffer,
        pair: StridedPair,
        result: &mut dyn DataBuffer,
    ) -> BufferResult<()>;

    fn exec_transform(&mut self, op: &ElementWiseOp, walk: Strided) -> BufferResult<()>;
    fn exec_transform_into(
        &self,
        op: &ElementWiseOp,
        walk: Strided,
        result: &mut dyn DataBuffer,
    ) -> BufferResult<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn element_size(&self) -> usize {
        self.kind().size_of()
    }

    /// Total footprint in bytes, excluding backend padding.
    fn byte_len(&self) -> usize {
        self.len() * self.element_size()
    }
}

/// Fail with `UseAfterDestroy` once `buffer` has been destroyed.
pub(crate) fn ensure_alive(buffer: &dyn DataBuffer) -> BufferResult<()> {
    if buffer.is_destroyed() {
        Err(BufferError::UseAfterDestroy)
    } else {
        Ok(())
    }
}

/// A result target must be live and match the source's kind and length.
pub(crate) fn check_result_target(
    kind: ElementKind,
    len: usize,
    result: &dyn DataBuffer,
) -> BufferResult<()> {
    ensure_alive(result)?;
    if result.kind() != kind {
        return Err(BufferError::KindMismatch {
            expected: kind,
            actual: result.kind(),
        });
    }
    if result.len() != len {
        return Err(BufferError::ShapeMismatch {
            expected: len,
            actual: result.len(),
        });
    }
    Ok(())
}

pub(crate) fn check_index(index: usize, len: usize) -> BufferResult<()> {
    if index < len {
        Ok(())
    } else {
        Err(BufferError::Range { index, len })
    }
}

/// Walk from `offset` to the end, the addressing of the `*_strided` scalar forms.
pub(crate) fn tail_walk(len: usize, offset: usize, inc: usize) -> BufferResult<Strided> {
    if offset > len {
        return Err(BufferError::Range { index: offset, len });
    }
    if inc == 0 && offset < len {
        return Err(BufferError::UnsupportedAddressing(
            "increment must be at least 1".into(),
        ));
    }
    Ok(Strided::to_end(len, offset, inc))
}

fn matching_pair(len: usize, other_len: usize) -> BufferResult<StridedPair> {
    if len != other_len {
        return Err(BufferError::ShapeMismatch {
            expected: len,
            actual: other_len,
        });
    }
    Ok(StridedPair::whole(len))
}

macro_rules! arith_family {
    (
        $op:ident,
        $scalar:ident, $scalar_strided:ident, $scalar_into:ident, $scalar_strided_into:ident,
        $buffer:ident, $buffer_strided:ident, $buffer_into:ident, $buffer_strided_into:ident
    ) => {
        fn $scalar(&mut self, value: impl Into<Scalar>) -> BufferResult<()> {
            ensure_alive(self.as_dyn())?;
            let walk = Strided::whole(self.len());
            self.exec_scalar(ArithOp::$op, value.into(), walk)
        }

        fn $scalar_strided(
            &mut self,
            value: impl Into<Scalar>,
            inc: usize,
            offset: usize,
        ) -> BufferResult<()> {
            ensure_alive(self.as_dyn())?;
            let walk = tail_walk(self.len(), offset, inc)?;
            self.exec_scalar(ArithOp::$op, value.into(), walk)
        }

        fn $scalar_into<R: DataBuffer + ?Sized>(
            &self,
            value: impl Into<Scalar>,
            result: &mut R,
        ) -> BufferResult<()> {
            ensure_alive(self.as_dyn())?;
            let walk = Strided::whole(self.len());
            self.exec_scalar_into(ArithOp::$op, value.into(), walk, result.as_dyn_mut())
        }

        fn $scalar_strided_into<R: DataBuffer + ?Sized>(
            &self,
            value: impl Into<Scalar>,
            inc: usize,
            offset: usize,
            result: &mut R,
        ) -> BufferResult<()> {
            ensure_alive(self.as_dyn())?;
            let walk = tail_walk(self.len(), offset, inc)?;
            self.exec_scalar_into(ArithOp::$op, value.into(), walk, result.as_dyn_mut())
        }

        fn $buffer<O: DataBuffer + ?Sized>(&mut self, other: &O) -> BufferResult<()> {
            ensure_alive(self.as_dyn())?;
            ensure_alive(other.as_dyn())?;
            let pair = matching_pair(self.len(), other.len())?;
            self.exec_binary(ArithOp::$op, other.as_dyn(), pair)
        }

        fn $buffer_strided<O: DataBuffer + ?Sized>(
            &mut self,
            other: &O,
            pair: StridedPair,
        ) -> BufferResult<()> {
            self.exec_binary(ArithOp::$op, other.as_dyn(), pair)
        }

        fn $buffer_into<O: DataBuffer + ?Sized, R: DataBuffer + ?Sized>(
            &self,
            other: &O,
            result: &mut R,
        ) -> BufferResult<()> {
            ensure_alive(self.as_dyn())?;
            ensure_alive(other.as_dyn())?;
            let pair = matching_pair(self.len(), other.len())?;
            self.exec_binary_into(ArithOp::$op, other.as_dyn(), pair, result.as_dyn_mut())
        }

        fn $buffer_strided_into<O: DataBuffer + ?Sized, R: DataBuffer + ?Sized>(
            &self,
            other: &O,
            pair: StridedPair,
            result: &mut R,
        ) -> BufferResult<()> {
            self.exec_binary_into(ArithOp::$op, other.as_dyn(), pair, result.as_dyn_mut())
        }
    };
}

/// Convenience surface over [`DataBuffer`], available on every buffer.
pub trait BufferOps: DataBuffer {
    arith_family!(Add, addi, addi_strided, addi_into, addi_strided_into,
        addi_buffer, addi_buffer_strided, addi_buffer_into, addi_buffer_strided_into);
    arith_family!(Sub, subi, subi_strided, subi_into, subi_strided_into,
        subi_buffer, subi_buffer_strided, subi_buffer_into, subi_buffer_strided_into);
    arith_family!(RSub, rsubi, rsubi_strided, rsubi_into, rsubi_strided_into,
        rsubi_buffer, rsubi_buffer_strided, rsubi_buffer_into, rsubi_buffer_strided_into);
    arith_family!(Mul, muli, muli_strided, muli_into, muli_strided_into,
        muli_buffer, muli_buffer_strided, muli_buffer_into, muli_buffer_strided_into);
    arith_family!(Div, divi, divi_strided, divi_into, divi_strided_into,
        divi_buffer, divi_buffer_strided, divi_buffer_into, divi_buffer_strided_into);
    arith_family!(RDiv, rdivi, rdivi_strided, rdivi_into, rdivi_strided_into,
        rdivi_buffer, rdivi_buffer_strided, rdivi_buffer_into, rdivi_buffer_strided_into);

    fn get_range(&self, offset: usize, count: usize) -> BufferResult<Elements> {
        self.get_strided(Strided::contiguous(offset, count))
    }

    fn get_range_strided(&self, offset: usize, inc: usize, count: usize) -> BufferResult<Elements> {
        self.get_strided(Strided::new(offset, inc, count))
    }

    fn as_double(&self) -> BufferResult<Vec<f64>> {
        Ok(self.as_typed(ElementKind::Double)?.to_vec())
    }

    fn as_float(&self) -> BufferResult<Vec<f32>> {
        Ok(self.as_typed(ElementKind::Float)?.to_vec())
    }

    fn as_int(&self) -> BufferResult<Vec<i32>> {
        Ok(self.as_typed(ElementKind::Int)?.to_vec())
    }

    /// Broadcast `value` to every element.
    fn assign(&mut self, value: impl Into<Scalar>) -> BufferResult<()> {
        self.assign_scalar(value.into(), 0)
    }

    /// Copy another buffer's values (any backend, any kind) into this one.
    fn assign_from<O: DataBuffer + ?Sized>(&mut self, other: &O) -> BufferResult<()> {
        ensure_alive(self.as_dyn())?;
        if other.len() != self.len() {
            return Err(BufferError::ShapeMismatch {
                expected: self.len(),
                actual: other.len(),
            });
        }
        let values = other.as_typed(self.kind())?.into_owned();
        self.set_all(&values)
    }

    /// Fill this buffer with the contents of `sources` laid end to end. The
    /// sources must hold exactly `len()` elements between them.
    fn assign_concat(&mut self, sources: &[&dyn DataBuffer]) -> BufferResult<()> {
        let offsets = vec![0usize; sources.len()];
        let incs = vec![1usize; sources.len()];
        self.assign_concat_strided(&offsets, &incs, sources)
    }

    /// Strided [`assign_concat`](BufferOps::assign_concat): source `i` is read
    /// from `offsets[i]` to its end in steps of `incs[i]`. Every walk and the
    /// total count are checked before anything is written.
    fn assign_concat_strided(
        &mut self,
        offsets: &[usize],
        incs: &[usize],
        sources: &[&dyn DataBuffer],
    ) -> BufferResult<()> {
        ensure_alive(self.as_dyn())?;
        if offsets.len() != sources.len() || incs.len() != sources.len() {
            return Err(BufferError::InvalidArgument(format!(
                "{} sources need as many offsets and increments, got {} and {}",
                sources.len(),
                offsets.len(),
                incs.len()
            )));
        }
        let mut walks = Vec::with_capacity(sources.len());
        for ((source, &offset), &inc) in sources.iter().zip(offsets).zip(incs) {
            ensure_alive(*source)?;
            walks.push(tail_walk(source.len(), offset, inc)?);
        }
        let total: usize = walks.iter().map(|walk| walk.count).sum();
        if total != self.len() {
            return Err(BufferError::ShapeMismatch {
                expected: self.len(),
                actual: total,
            });
        }

        let mut position = 0;
        for (source, walk) in sources.iter().zip(walks) {
            let values = source.get_strided(walk)?;
            self.put_strided(Strided::contiguous(position, walk.count), &values)?;
            position += walk.count;
        }
        Ok(())
    }

    /// Complex element `index`: physical elements `2*index` and `2*index + 1`.
    fn get_complex(&self, index: usize) -> BufferResult<ComplexF64> {
        let pair = self.get_strided(Strided::contiguous(complex_offset(index)?, 2))?;
        let values = pair.to_f64_vec();
        Ok(ComplexF64::new(values[0], values[1]))
    }

    fn put_complex(&mut self, index: usize, value: ComplexF64) -> BufferResult<()> {
        let walk = Strided::contiguous(complex_offset(index)?, 2);
        self.put_strided(walk, &Elements::Double(vec![value.re, value.im]))
    }

    /// Apply a transform to every element.
    fn apply(&mut self, op: &ElementWiseOp) -> BufferResult<()> {
        ensure_alive(self.as_dyn())?;
        let walk = Strided::whole(self.len());
        self.exec_transform(op, walk)
    }

    /// Apply a transform from `offset` to the end.
    fn apply_from(&mut self, op: &ElementWiseOp, offset: usize) -> BufferResult<()> {
        ensure_alive(self.as_dyn())?;
        let walk = tail_walk(self.len(), offset, 1)?;
        self.exec_transform(op, walk)
    }

    fn apply_strided(&mut self, op: &ElementWiseOp, walk: Strided) -> BufferResult<()> {
        self.exec_transform(op, walk)
    }

    fn apply_into<R: DataBuffer + ?Sized>(
        &self,
        op: &ElementWiseOp,
        walk: Strided,
        result: &mut R,
    ) -> BufferResult<()> {
        self.exec_transform_into(op, walk, result.as_dyn_mut())
    }
}

impl<B: DataBuffer + ?Sized> BufferOps for B {}

fn complex_offset(index: usize) -> BufferResult<usize> {
    index.checked_mul(2).ok_or(BufferError::Range {
        index,
        len: usize::MAX / 2,
    })
}
