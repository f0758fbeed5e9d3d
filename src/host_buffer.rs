//! In-process buffer backed by a typed vector.

use std::any::Any;
use std::borrow::Cow;

use crate::buffer::{check_index, check_result_target, ensure_alive, tail_walk, DataBuffer};
use crate::element::{Element, ElementKind, Scalar};
use crate::elements::Elements;
use crate::error::{BufferError, BufferResult};
use crate::host_kernels;
use crate::ops::{ArithOp, ElementWiseOp};
use crate::runtime_detection::BackendKind;
use crate::strided::{Strided, StridedPair};
use crate::with_elements;

/// Host-memory buffer. `data` is `None` once destroyed.
#[derive(Debug, Clone, PartialEq)]
pub struct HostBuffer {
    kind: ElementKind,
    len: usize,
    data: Option<Elements>,
}

impl HostBuffer {
    pub fn zeros(kind: ElementKind, len: usize) -> Self {
        Self::from_elements(Elements::zeros(kind, len))
    }

    pub fn from_elements(values: Elements) -> Self {
        Self {
            kind: values.kind(),
            len: values.len(),
            data: Some(values),
        }
    }

    pub fn from_vec<E: Element>(values: Vec<E>) -> Self {
        Self::from_elements(E::wrap(values))
    }

    pub fn from_bytes(kind: ElementKind, bytes: &[u8]) -> BufferResult<Self> {
        Elements::from_bytes(kind, bytes).map(Self::from_elements)
    }

    /// Borrow the backing values.
    pub fn elements(&self) -> BufferResult<&Elements> {
        self.data.as_ref().ok_or(BufferError::UseAfterDestroy)
    }

    fn elements_mut(&mut self) -> BufferResult<&mut Elements> {
        self.data.as_mut().ok_or(BufferError::UseAfterDestroy)
    }

    /// Borrow the backing values as `&[E]` when `E` is the native kind.
    pub fn as_slice<E: Element>(&self) -> BufferResult<&[E]> {
        let kind = self.kind;
        E::slice(self.elements()?).ok_or(BufferError::KindMismatch {
            expected: E::KIND,
            actual: kind,
        })
    }

    /// Operand values of a binary op and the pair that addresses them.
    ///
    /// Another host buffer is borrowed whole; any other backend is gathered
    /// along its walk, so the returned pair reads it contiguously.
    fn operand<'a>(
        other: &'a dyn DataBuffer,
        pair: StridedPair,
    ) -> BufferResult<(Cow<'a, Elements>, StridedPair)> {
        if let Some(host) = other.as_any().downcast_ref::<HostBuffer>() {
            return Ok((Cow::Borrowed(host.elements()?), pair));
        }
        let gathered = other.get_strided(pair.other())?;
        Ok((
            Cow::Owned(gathered),
            StridedPair::new(pair.count, pair.offset, 0, pair.inc, 1),
        ))
    }
}

fn scatter_converted<E: Element>(dst: &mut [E], walk: Strided, values: &Elements) {
    match E::slice(values) {
        Some(src) => host_kernels::scatter(dst, walk, src),
        None => {
            let src: Vec<E> = values.to_vec();
            host_kernels::scatter(dst, walk, &src);
        }
    }
}

fn binary_inplace_converted<E: Element>(
    data: &mut [E],
    other: &Elements,
    op: ArithOp,
    pair: StridedPair,
) {
    match E::slice(other) {
        Some(y) => host_kernels::binary_inplace(data, y, op, pair),
        None => {
            let y: Vec<E> = other.to_vec();
            host_kernels::binary_inplace(data, &y, op, pair);
        }
    }
}

fn binary_out_converted<E: Element>(
    src: &[E],
    other: &Elements,
    op: ArithOp,
    pair: StridedPair,
) -> Elements {
    let out = match E::slice(other) {
        Some(y) => host_kernels::binary_out(src, y, op, pair),
        None => {
            let y: Vec<E> = other.to_vec();
            host_kernels::binary_out(src, &y, op, pair)
        }
    };
    E::wrap(out)
}

impl DataBuffer for HostBuffer {
    fn backend(&self) -> BackendKind {
        BackendKind::Host
    }

    fn kind(&self) -> ElementKind {
        self.kind
    }

    fn len(&self) -> usize {
        self.len
    }

    fn is_destroyed(&self) -> bool {
        self.data.is_none()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn as_dyn(&self) -> &dyn DataBuffer {
        self
    }

    fn as_dyn_mut(&mut self) -> &mut dyn DataBuffer {
        self
    }

    fn get(&self, index: usize) -> BufferResult<Scalar> {
        let data = self.elements()?;
        check_index(index, self.len)?;
        data.get(index).ok_or(BufferError::Range { index, len: self.len })
    }

    fn put(&mut self, index: usize, value: Scalar) -> BufferResult<()> {
        let len = self.len;
        let data = self.elements_mut()?;
        check_index(index, len)?;
        with_elements!(data, v => v[index] = value.cast());
        Ok(())
    }

    fn get_strided(&self, walk: Strided) -> BufferResult<Elements> {
        let data = self.elements()?;
        walk.validate(self.len)?;
        Ok(with_elements!(data, v => Elements::from(host_kernels::gather(v.as_slice(), walk))))
    }

    fn put_strided(&mut self, walk: Strided, values: &Elements) -> BufferResult<()> {
        let len = self.len;
        let data = self.elements_mut()?;
        walk.validate(len)?;
        if values.len() != walk.count {
            return Err(BufferError::ShapeMismatch {
                expected: walk.count,
                actual: values.len(),
            });
        }
        with_elements!(data, v => scatter_converted(v.as_mut_slice(), walk, values));
        Ok(())
    }

    fn set_all(&mut self, values: &Elements) -> BufferResult<()> {
        let (kind, len) = (self.kind, self.len);
        let data = self.elements_mut()?;
        if values.len() != len {
            return Err(BufferError::ShapeMismatch {
                expected: len,
                actual: values.len(),
            });
        }
        *data = values.convert(kind);
        Ok(())
    }

    fn as_typed(&self, kind: ElementKind) -> BufferResult<Cow<'_, Elements>> {
        let data = self.elements()?;
        if kind == self.kind {
            Ok(Cow::Borrowed(data))
        } else {
            Ok(Cow::Owned(data.convert(kind)))
        }
    }

    fn as_bytes(&self) -> BufferResult<Vec<u8>> {
        Ok(self.elements()?.as_bytes().to_vec())
    }

    fn assign_scalar(&mut self, value: Scalar, offset: usize) -> BufferResult<()> {
        let len = self.len;
        let data = self.elements_mut()?;
        let walk = tail_walk(len, offset, 1)?;
        with_elements!(data, v => host_kernels::fill(v.as_mut_slice(), walk, value.cast()));
        Ok(())
    }

    fn dup(&self) -> BufferResult<Box<dyn DataBuffer>> {
        ensure_alive(self)?;
        Ok(Box::new(self.clone()))
    }

    fn destroy(&mut self) {
        if self.data.take().is_some() {
            log::trace!("HostBuffer: released {} {} elements", self.len, self.kind);
        }
    }

    fn flush(&self) -> BufferResult<()> {
        ensure_alive(self)
    }

    fn exec_scalar(&mut self, op: ArithOp, value: Scalar, walk: Strided) -> BufferResult<()> {
        let len = self.len;
        let data = self.elements_mut()?;
        walk.validate(len)?;
        with_elements!(data, v => host_kernels::scalar_inplace(v.as_mut_slice(), op, value.cast(), walk));
        Ok(())
    }

    fn exec_scalar_into(
        &self,
        op: ArithOp,
        value: Scalar,
        walk: Strided,
        result: &mut dyn DataBuffer,
    ) -> BufferResult<()> {
        let data = self.elements()?;
        walk.validate(self.len)?;
        check_result_target(self.kind, self.len, result)?;
        let values = with_elements!(data, v => {
            Elements::from(host_kernels::scalar_out(v.as_slice(), op, value.cast(), walk))
        });
        result.put_strided(walk, &values)
    }

    fn exec_binary(&mut self, op: ArithOp, other: &dyn DataBuffer, pair: StridedPair) -> BufferResult<()> {
        let len = self.len;
        self.elements()?;
        ensure_alive(other)?;
        pair.validate(len, other.len())?;
        let (operand, pair) = Self::operand(other, pair)?;
        let data = self.elements_mut()?;
        with_elements!(data, v => binary_inplace_converted(v.as_mut_slice(), &operand, op, pair));
        Ok(())
    }

    fn exec_binary_into(
        &self,
        op: ArithOp,
        other: &dyn DataBuffer,
        pair: StridedPair,
        result: &mut dyn DataBuffer,
    ) -> BufferResult<()> {
        let data = self.elements()?;
        ensure_alive(other)?;
        pair.validate(self.len, other.len())?;
        check_result_target(self.kind, self.len, result)?;
        let (operand, local) = Self::operand(other, pair)?;
        let values = with_elements!(data, v => binary_out_converted(v.as_slice(), &operand, op, local));
        result.put_strided(pair.this(), &values)
    }

    fn exec_transform(&mut self, op: &ElementWiseOp, walk: Strided) -> BufferResult<()> {
        let len = self.len;
        let data = self.elements_mut()?;
        walk.validate(len)?;
        let transform = op.transform();
        with_elements!(data, v => host_kernels::transform_inplace(v.as_mut_slice(), &transform, walk));
        Ok(())
    }

    fn exec_transform_into(
        &self,
        op: &ElementWiseOp,
        walk: Strided,
        result: &mut dyn DataBuffer,
    ) -> BufferResult<()> {
        let data = self.elements()?;
        walk.validate(self.len)?;
        check_result_target(self.kind, self.len, result)?;
        let transform = op.transform();
        let values = with_elements!(data, v => {
            Elements::from(host_kernels::transform_out(v.as_slice(), &transform, walk))
        });
        result.put_strided(walk, &values)
    }
}
