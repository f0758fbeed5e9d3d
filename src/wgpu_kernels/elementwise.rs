//! Named elementwise kernels: arithmetic (`add_scalar`, `rdiv_strided`, ...)
//! and transforms (`sigmoid`, `pow`, ...), compiled lazily per
//! `(name, element kind)`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{
    create_pipeline, dispatch_dims, kind_prelude, push_arg, push_element, submit_dispatch,
    BindingSet, KernelLayout, UNIFORM_BYTES,
};
use crate::element::{ElementKind, Scalar};
use crate::error::BufferResult;
use crate::ops::{ArithOp, OpForm, Transform};

const SHADER_SOURCE: &str = include_str!("kernels/elementwise.wgsl");

/// Identity of a device kernel: operation name plus element kind tag,
/// e.g. `("mul_scalar", "float")`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelId {
    pub name: &'static str,
    pub kind: ElementKind,
    op_code: u32,
}

impl KernelId {
    pub fn arith(op: ArithOp, form: OpForm, kind: ElementKind) -> Self {
        Self {
            name: op.kernel_name(form),
            kind,
            op_code: arith_code(op),
        }
    }

    pub fn transform(transform: &Transform, kind: ElementKind) -> Self {
        Self {
            name: transform.name(),
            kind,
            op_code: transform_code(transform),
        }
    }

    pub fn tag(&self) -> &'static str {
        self.kind.tag()
    }
}

fn arith_code(op: ArithOp) -> u32 {
    match op {
        ArithOp::Add => 0,
        ArithOp::Sub => 1,
        ArithOp::RSub => 2,
        ArithOp::Mul => 3,
        ArithOp::Div => 4,
        ArithOp::RDiv => 5,
    }
}

fn transform_code(transform: &Transform) -> u32 {
    match transform {
        Transform::Neg => 0,
        Transform::Abs => 1,
        Transform::Exp => 2,
        Transform::Log => 3,
        Transform::Sqrt => 4,
        Transform::Sigmoid => 5,
        Transform::Tanh => 6,
        Transform::HardTanh => 7,
        Transform::Floor => 8,
        Transform::Round => 9,
        Transform::Sign => 10,
        Transform::Identity => 11,
        Transform::Pow(_) => 12,
        Transform::Max(_) => 13,
        Transform::Min(_) => 14,
        Transform::Stabilize(_) => 15,
        Transform::EqualTo(_) => 16,
        Transform::NotEqualTo(_) => 17,
        Transform::GreaterThan(_) => 18,
        Transform::LessThan(_) => 19,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    ScalarInplace,
    ScalarOut,
    BinaryInplace,
    BinaryOut,
    TransformInplace,
    TransformOut,
}

impl EntryPoint {
    pub const fn name(self) -> &'static str {
        match self {
            EntryPoint::ScalarInplace => "scalar_inplace",
            EntryPoint::ScalarOut => "scalar_out",
            EntryPoint::BinaryInplace => "binary_inplace",
            EntryPoint::BinaryOut => "binary_out",
            EntryPoint::TransformInplace => "transform_inplace",
            EntryPoint::TransformOut => "transform_out",
        }
    }

    pub const fn binding_set(self) -> BindingSet {
        match self {
            EntryPoint::ScalarInplace | EntryPoint::TransformInplace => BindingSet::UnaryInplace,
            EntryPoint::BinaryInplace => BindingSet::BinaryInplace,
            EntryPoint::ScalarOut | EntryPoint::TransformOut => BindingSet::UnaryOut,
            EntryPoint::BinaryOut => BindingSet::BinaryOut,
        }
    }
}

/// Walk header of the uniform block. `row_stride` is filled in at dispatch.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct WalkParams {
    pub count: u32,
    pub offset: u32,
    pub inc: u32,
    pub other_offset: u32,
    pub other_inc: u32,
    pub out_offset: u32,
    pub out_inc: u32,
    pub row_stride: u32,
}

impl WalkParams {
    fn encode(mut self, kind: ElementKind, scalar: Scalar, arg: f64) -> Vec<u8> {
        let (_, _, row_stride) = dispatch_dims(self.count);
        self.row_stride = row_stride;
        let mut bytes = bytemuck::bytes_of(&self).to_vec();
        push_element(&mut bytes, kind, scalar);
        push_arg(&mut bytes, kind, arg);
        bytes.resize(UNIFORM_BYTES, 0);
        bytes
    }
}

/// Pipeline cache and launcher for the elementwise kernel family.
pub struct ElementwiseKernels {
    device: wgpu::Device,
    queue: wgpu::Queue,
    unary_inplace: KernelLayout,
    binary_inplace: KernelLayout,
    unary_out: KernelLayout,
    binary_out: KernelLayout,
    pipelines: Mutex<HashMap<(KernelId, EntryPoint), Arc<wgpu::ComputePipeline>>>,
}

impl ElementwiseKernels {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            unary_inplace: KernelLayout::new(&device, BindingSet::UnaryInplace),
            binary_inplace: KernelLayout::new(&device, BindingSet::BinaryInplace),
            unary_out: KernelLayout::new(&device, BindingSet::UnaryOut),
            binary_out: KernelLayout::new(&device, BindingSet::BinaryOut),
            device,
            queue,
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    fn layout(&self, set: BindingSet) -> &KernelLayout {
        match set {
            BindingSet::UnaryInplace => &self.unary_inplace,
            BindingSet::BinaryInplace => &self.binary_inplace,
            BindingSet::UnaryOut => &self.unary_out,
            BindingSet::BinaryOut => &self.binary_out,
        }
    }

    /// Look up or compile the pipeline for `id` at `entry`.
    pub fn pipeline(&self, id: KernelId, entry: EntryPoint) -> BufferResult<Arc<wgpu::ComputePipeline>> {
        let mut cache = match self.pipelines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(pipeline) = cache.get(&(id, entry)) {
            return Ok(Arc::clone(pipeline));
        }

        let source = format!(
            "{}\nconst OP: u32 = {}u;\n\n{}",
            kind_prelude(id.kind),
            id.op_code,
            SHADER_SOURCE
        );
        let label = format!("ndbuf_{}_{}_{}", id.name, id.tag(), entry.name());
        let pipeline = Arc::new(create_pipeline(
            &self.device,
            self.layout(entry.binding_set()),
            &label,
            source,
            entry.name(),
        )?);
        log::debug!("compiled kernel ({}, {}) entry {}", id.name, id.tag(), entry.name());
        cache.insert((id, entry), Arc::clone(&pipeline));
        Ok(pipeline)
    }

    /// `(name, kind tag)` of every compiled kernel.
    pub fn compiled(&self) -> Vec<(&'static str, &'static str)> {
        let cache = match self.pipelines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut ids: Vec<_> = cache.keys().map(|(id, _)| (id.name, id.tag())).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Run `id` at `entry` over `walk`, binding `buffers` by index.
    pub fn launch(
        &self,
        id: KernelId,
        entry: EntryPoint,
        walk: WalkParams,
        scalar: Scalar,
        arg: f64,
        buffers: &[(u32, &wgpu::Buffer)],
    ) -> BufferResult<()> {
        if walk.count == 0 {
            return Ok(());
        }
        let pipeline = self.pipeline(id, entry)?;
        let uniform = walk.encode(id.kind, scalar, arg);
        submit_dispatch(
            &self.device,
            &self.queue,
            &pipeline,
            self.layout(entry.binding_set()),
            id.name,
            &uniform,
            buffers,
            walk.count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_ids_use_buffer_kind_tag() {
        let id = KernelId::arith(ArithOp::RSub, OpForm::Scalar, ElementKind::Float);
        assert_eq!((id.name, id.tag()), ("rsub_scalar", "float"));
        let id = KernelId::arith(ArithOp::RDiv, OpForm::Strided, ElementKind::Int);
        assert_eq!((id.name, id.tag()), ("rdiv_strided", "int"));
        let id = KernelId::transform(&Transform::Sigmoid, ElementKind::Double);
        assert_eq!((id.name, id.tag()), ("sigmoid", "double"));
    }

    #[test]
    fn test_pow_configurations_share_a_kernel() {
        let a = KernelId::transform(&Transform::Pow(2.0), ElementKind::Float);
        let b = KernelId::transform(&Transform::Pow(3.0), ElementKind::Float);
        assert_eq!(a, b);
    }

    #[test]
    fn test_walk_params_encoding() {
        let walk = WalkParams {
            count: 3,
            offset: 1,
            inc: 2,
            ..Default::default()
        };
        let bytes = walk.encode(ElementKind::Float, Scalar::Float(2.0), 0.0);
        assert_eq!(bytes.len(), UNIFORM_BYTES);
        assert_eq!(&bytes[0..4], &3u32.to_ne_bytes());
        assert_eq!(&bytes[28..32], &256u32.to_ne_bytes());
        assert_eq!(&bytes[32..36], &2.0f32.to_ne_bytes());
    }

    #[test]
    fn test_transform_codes_are_distinct() {
        let names = [
            "neg", "abs", "exp", "log", "sqrt", "sigmoid", "tanh", "hard_tanh", "floor",
            "round", "sign", "identity",
        ];
        let mut codes: Vec<u32> = names
            .iter()
            .map(|n| transform_code(&Transform::parse(n, &[]).unwrap()))
            .collect();
        for t in [
            Transform::Pow(1.0),
            Transform::Max(0.0),
            Transform::Min(0.0),
            Transform::Stabilize(1.0),
            Transform::EqualTo(0.0),
            Transform::NotEqualTo(0.0),
            Transform::GreaterThan(0.0),
            Transform::LessThan(0.0),
        ] {
            codes.push(transform_code(&t));
        }
        codes.sort_unstable();
        assert_eq!(codes, (0..20).collect::<Vec<u32>>());
    }
}
