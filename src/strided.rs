//! Strided addressing shared by every backend.
//!
//! A walk touches physical indices `offset + k * inc` for `k in [0, count)`.
//! Bound checks run before anything is read or written and use `checked_*`
//! arithmetic, so an overflowing walk is reported as a range error.

use crate::error::{BufferError, BufferResult};

/// (offset, increment, count) over a single buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Strided {
    pub offset: usize,
    pub inc: usize,
    pub count: usize,
}

impl Strided {
    pub const fn new(offset: usize, inc: usize, count: usize) -> Self {
        Self { offset, inc, count }
    }

    pub const fn contiguous(offset: usize, count: usize) -> Self {
        Self { offset, inc: 1, count }
    }

    /// Every element of a buffer of length `len`.
    pub const fn whole(len: usize) -> Self {
        Self { offset: 0, inc: 1, count: len }
    }

    /// From `offset` to the end of a buffer of length `len`, stepping by `inc`.
    ///
    /// An `offset` at or past the end yields an empty walk; an `inc` of zero is
    /// kept so that validation can refuse it.
    pub fn to_end(len: usize, offset: usize, inc: usize) -> Self {
        let count = if offset >= len || inc == 0 {
            0
        } else {
            (len - offset - 1) / inc + 1
        };
        Self { offset, inc, count }
    }

    /// Physical index of the last touched element, `None` for an empty walk.
    pub fn last_index(&self) -> Option<usize> {
        if self.count == 0 {
            return None;
        }
        (self.count - 1)
            .checked_mul(self.inc)
            .and_then(|span| span.checked_add(self.offset))
            .or(Some(usize::MAX))
    }

    /// Check the walk against a buffer of length `len`.
    pub fn validate(&self, len: usize) -> BufferResult<()> {
        if self.count == 0 {
            return Ok(());
        }
        if self.inc == 0 && self.count > 1 {
            return Err(BufferError::UnsupportedAddressing(format!(
                "increment 0 with count {} would touch index {} repeatedly",
                self.count, self.offset
            )));
        }
        match self.last_index() {
            Some(last) if last < len => Ok(()),
            Some(last) => Err(BufferError::Range { index: last, len }),
            None => Ok(()),
        }
    }

    /// Number of elements between the first and last touched index, inclusive.
    pub fn span(&self) -> usize {
        match self.last_index() {
            Some(last) => last - self.offset + 1,
            None => 0,
        }
    }

    pub fn is_contiguous(&self) -> bool {
        self.inc == 1 || self.count <= 1
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> {
        let Strided { offset, inc, count } = *self;
        (0..count).map(move |k| offset + k * inc)
    }
}

/// Two walks of equal length over `self` and `other` of a binary operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StridedPair {
    pub count: usize,
    pub offset: usize,
    pub inc: usize,
    pub other_offset: usize,
    pub other_inc: usize,
}

impl StridedPair {
    pub const fn new(
        count: usize,
        offset: usize,
        other_offset: usize,
        inc: usize,
        other_inc: usize,
    ) -> Self {
        Self {
            count,
            offset,
            inc,
            other_offset,
            other_inc,
        }
    }

    pub const fn whole(len: usize) -> Self {
        Self::new(len, 0, 0, 1, 1)
    }

    /// Walk over the receiving buffer.
    pub const fn this(&self) -> Strided {
        Strided::new(self.offset, self.inc, self.count)
    }

    /// Walk over the other operand.
    pub const fn other(&self) -> Strided {
        Strided::new(self.other_offset, self.other_inc, self.count)
    }

    pub fn validate(&self, len: usize, other_len: usize) -> BufferResult<()> {
        self.this().validate(len)?;
        self.other().validate(other_len)
    }
}
