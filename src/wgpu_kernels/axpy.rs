//! Strided `y = alpha * x + y`, the vector primitive behind in-place buffer
//! add and subtract.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{
    create_pipeline, dispatch_dims, kind_prelude, push_element, submit_dispatch, BindingSet,
    KernelLayout, UNIFORM_BYTES,
};
use crate::element::{ElementKind, Scalar};
use crate::error::BufferResult;

const SHADER_SOURCE: &str = include_str!("kernels/axpy.wgsl");
pub const KERNEL_NAME: &str = "axpy";

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AxpyParams {
    pub count: u32,
    pub x_offset: u32,
    pub x_inc: u32,
    pub y_offset: u32,
    pub y_inc: u32,
    pub row_stride: u32,
    pub _pad0: u32,
    pub _pad1: u32,
}

pub struct WgpuAxpy {
    device: wgpu::Device,
    queue: wgpu::Queue,
    layout: KernelLayout,
    pipelines: Mutex<HashMap<ElementKind, Arc<wgpu::ComputePipeline>>>,
}

impl WgpuAxpy {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            layout: KernelLayout::new(&device, BindingSet::BinaryInplace),
            device,
            queue,
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    fn pipeline(&self, kind: ElementKind) -> BufferResult<Arc<wgpu::ComputePipeline>> {
        let mut cache = match self.pipelines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(pipeline) = cache.get(&kind) {
            return Ok(Arc::clone(pipeline));
        }
        let source = format!("{}\n{}", kind_prelude(kind), SHADER_SOURCE);
        let label = format!("ndbuf_axpy_{}", kind.tag());
        let pipeline = Arc::new(create_pipeline(
            &self.device,
            &self.layout,
            &label,
            source,
            KERNEL_NAME,
        )?);
        log::debug!("compiled kernel ({KERNEL_NAME}, {})", kind.tag());
        cache.insert(kind, Arc::clone(&pipeline));
        Ok(pipeline)
    }

    /// Kinds with a compiled pipeline.
    pub fn compiled(&self) -> Vec<ElementKind> {
        match self.pipelines.lock() {
            Ok(cache) => cache.keys().copied().collect(),
            Err(poisoned) => poisoned.into_inner().keys().copied().collect(),
        }
    }

    /// `y[walk] = alpha * x[walk] + y[walk]`.
    pub fn forward(
        &self,
        kind: ElementKind,
        mut params: AxpyParams,
        alpha: Scalar,
        x: &wgpu::Buffer,
        y: &wgpu::Buffer,
    ) -> BufferResult<()> {
        if params.count == 0 {
            return Ok(());
        }
        let pipeline = self.pipeline(kind)?;
        let (_, _, row_stride) = dispatch_dims(params.count);
        params.row_stride = row_stride;

        let mut uniform = bytemuck::bytes_of(&params).to_vec();
        push_element(&mut uniform, kind, alpha);
        uniform.resize(UNIFORM_BYTES, 0);

        submit_dispatch(
            &self.device,
            &self.queue,
            &pipeline,
            &self.layout,
            KERNEL_NAME,
            &uniform,
            &[(1, y), (2, x)],
            params.count,
        )
    }
}
