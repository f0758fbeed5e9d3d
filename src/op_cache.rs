//! Process-wide cache of configured elementwise operations.
//!
//! Descriptors are keyed by transform name plus the bit pattern of their
//! configuring argument, so `pow(2)` and `pow(3)` are separate entries and a
//! second lookup of `pow(2)` returns the same `Arc`. The cache holds at most
//! [`MAX_CACHED_OPS`] entries; lookups past that build an uncached descriptor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::element::Scalar;
use crate::error::BufferResult;
use crate::ops::{ElementWiseOp, Transform};

/// Upper bound on distinct cached configurations. The expected cardinality is
/// the 20 transform names times a handful of exponents/thresholds per program.
pub const MAX_CACHED_OPS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct OpKey {
    name: &'static str,
    arg_bits: u64,
}

impl OpKey {
    fn of(transform: &Transform) -> Self {
        Self {
            name: transform.name(),
            arg_bits: transform.arg().to_bits(),
        }
    }
}

struct OpCache {
    entries: HashMap<OpKey, Arc<ElementWiseOp>>,
}

impl OpCache {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn get_or_create(&mut self, transform: Transform) -> Arc<ElementWiseOp> {
        let key = OpKey::of(&transform);
        if let Some(op) = self.entries.get(&key) {
            log::trace!("OpCache: hit {}({})", key.name, transform.arg());
            return Arc::clone(op);
        }

        let op = Arc::new(ElementWiseOp::new(transform));
        if self.entries.len() >= MAX_CACHED_OPS {
            log::debug!("OpCache: full, not caching {}({})", key.name, transform.arg());
            return op;
        }
        log::trace!("OpCache: created {}({})", key.name, transform.arg());
        self.entries.insert(key, Arc::clone(&op));
        op
    }
}

static OP_CACHE: OnceLock<Mutex<OpCache>> = OnceLock::new();

fn get_op_cache() -> &'static Mutex<OpCache> {
    OP_CACHE.get_or_init(|| Mutex::new(OpCache::new()))
}

/// Shared descriptor for `transform`.
pub fn cached_op(transform: Transform) -> Arc<ElementWiseOp> {
    match get_op_cache().lock() {
        Ok(mut cache) => cache.get_or_create(transform),
        Err(poisoned) => poisoned.into_inner().get_or_create(transform),
    }
}

/// Resolve a transform by name and untyped arguments, then look it up in the cache.
///
/// ```
/// use ndbuf::{element_wise_op, Scalar};
/// let square = element_wise_op("pow", &[Scalar::Double(2.0)]).unwrap();
/// assert_eq!(square.name(), "pow");
/// ```
pub fn element_wise_op(name: &str, args: &[Scalar]) -> BufferResult<Arc<ElementWiseOp>> {
    Transform::parse(name, args).map(cached_op)
}

/// Number of cached descriptors.
pub fn cached_op_count() -> usize {
    match get_op_cache().lock() {
        Ok(cache) => cache.entries.len(),
        Err(poisoned) => poisoned.into_inner().entries.len(),
    }
}
