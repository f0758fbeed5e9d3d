//! WGSL compute kernels backing device buffers.
//!
//! Every kernel source is an element prelude (`T`, `A` and the kind-specific
//! helpers) followed by a shared body, so one template serves all kinds.

pub mod axpy;
pub mod elementwise;

pub use axpy::{AxpyParams, WgpuAxpy};
pub use elementwise::{ElementwiseKernels, EntryPoint, KernelId, WalkParams};

use crate::element::{ElementKind, Scalar};
use crate::error::{BufferError, BufferResult};

use wgpu::util::DeviceExt;

pub const WORKGROUP_SIZE: u32 = 256;
/// Per-dimension workgroup limit guaranteed by `wgpu::Limits::default()`.
const MAX_GROUPS_PER_DIM: u32 = 65_535;
/// Uniform block size: 32-byte walk header, scalar and argument slots.
pub const UNIFORM_BYTES: usize = 48;

const PRELUDE_FLOAT: &str = include_str!("kernels/prelude_float.wgsl");
const PRELUDE_INT: &str = include_str!("kernels/prelude_int.wgsl");
const PRELUDE_DOUBLE: &str = include_str!("kernels/prelude_double.wgsl");

pub(crate) fn kind_prelude(kind: ElementKind) -> &'static str {
    match kind {
        ElementKind::Double => PRELUDE_DOUBLE,
        ElementKind::Float => PRELUDE_FLOAT,
        ElementKind::Int => PRELUDE_INT,
    }
}

/// Workgroup grid for `count` invocations: `(x, y, row_stride)` where the
/// shader recovers the walk index as `gid.x + gid.y * row_stride`.
pub fn dispatch_dims(count: u32) -> (u32, u32, u32) {
    let groups = count.div_ceil(WORKGROUP_SIZE).max(1);
    let x = groups.min(MAX_GROUPS_PER_DIM);
    let y = groups.div_ceil(x);
    (x, y, x * WORKGROUP_SIZE)
}

/// Append `value` in the kernel's element type `T`.
pub(crate) fn push_element(bytes: &mut Vec<u8>, kind: ElementKind, value: Scalar) {
    match kind {
        ElementKind::Double => bytes.extend_from_slice(bytemuck::bytes_of(&value.cast::<f64>())),
        ElementKind::Float => bytes.extend_from_slice(bytemuck::bytes_of(&value.cast::<f32>())),
        ElementKind::Int => bytes.extend_from_slice(bytemuck::bytes_of(&value.cast::<i32>())),
    }
}

/// Append `value` in the kernel's argument type `A` (f64 for double, else f32).
pub(crate) fn push_arg(bytes: &mut Vec<u8>, kind: ElementKind, value: f64) {
    match kind {
        ElementKind::Double => bytes.extend_from_slice(bytemuck::bytes_of(&value)),
        ElementKind::Float | ElementKind::Int => {
            bytes.extend_from_slice(bytemuck::bytes_of(&(value as f32)))
        }
    }
}

/// Which storage buffers an entry point binds, next to the uniform at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingSet {
    /// 1: data (read_write)
    UnaryInplace,
    /// 1: data (read_write), 2: other
    BinaryInplace,
    /// 3: src, 4: out (read_write)
    UnaryOut,
    /// 2: other, 3: src, 4: out (read_write)
    BinaryOut,
}

impl BindingSet {
    fn entries(self) -> Vec<wgpu::BindGroupLayoutEntry> {
        let mut entries = vec![uniform_layout_entry(0)];
        match self {
            BindingSet::UnaryInplace => entries.push(buffer_layout_entry(1, false)),
            BindingSet::BinaryInplace => {
                entries.push(buffer_layout_entry(1, false));
                entries.push(buffer_layout_entry(2, true));
            }
            BindingSet::UnaryOut => {
                entries.push(buffer_layout_entry(3, true));
                entries.push(buffer_layout_entry(4, false));
            }
            BindingSet::BinaryOut => {
                entries.push(buffer_layout_entry(2, true));
                entries.push(buffer_layout_entry(3, true));
                entries.push(buffer_layout_entry(4, false));
            }
        }
        entries
    }

    fn label(self) -> &'static str {
        match self {
            BindingSet::UnaryInplace => "ndbuf_unary_inplace_layout",
            BindingSet::BinaryInplace => "ndbuf_binary_inplace_layout",
            BindingSet::UnaryOut => "ndbuf_unary_out_layout",
            BindingSet::BinaryOut => "ndbuf_binary_out_layout",
        }
    }
}

/// Bind group layout plus the pipeline layout built from it.
pub struct KernelLayout {
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub pipeline_layout: wgpu::PipelineLayout,
}

impl KernelLayout {
    pub fn new(device: &wgpu::Device, set: BindingSet) -> Self {
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(set.label()),
            entries: &set.entries(),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(set.label()),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        Self {
            bind_group_layout,
            pipeline_layout,
        }
    }
}

fn buffer_layout_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_layout_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Compile `source` and create a compute pipeline for `entry_point`, turning
/// validation failures into [`BufferError::Kernel`].
pub(crate) fn create_pipeline(
    device: &wgpu::Device,
    layout: &KernelLayout,
    label: &str,
    source: String,
    entry_point: &str,
) -> BufferResult<wgpu::ComputePipeline> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&layout.pipeline_layout),
        module: &module,
        entry_point: Some(entry_point),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(BufferError::Kernel(format!("{label}: {err}"))),
        None => Ok(pipeline),
    }
}

/// Encode, submit and wait for one dispatch of `count` walk elements.
///
/// `bindings` lists the storage buffers by binding index; the uniform block
/// is bound at 0.
pub(crate) fn submit_dispatch(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    pipeline: &wgpu::ComputePipeline,
    layout: &KernelLayout,
    label: &str,
    uniform: &[u8],
    bindings: &[(u32, &wgpu::Buffer)],
    count: u32,
) -> BufferResult<()> {
    if count == 0 {
        return Ok(());
    }

    let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: uniform,
        usage: wgpu::BufferUsages::UNIFORM,
    });

    let mut entries = Vec::with_capacity(bindings.len() + 1);
    entries.push(wgpu::BindGroupEntry {
        binding: 0,
        resource: params_buf.as_entire_binding(),
    });
    for (binding, buffer) in bindings {
        entries.push(wgpu::BindGroupEntry {
            binding: *binding,
            resource: buffer.as_entire_binding(),
        });
    }

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &layout.bind_group_layout,
        entries: &entries,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some(label),
    });
    let (x, y, _) = dispatch_dims(count);
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(x, y, 1);
    }
    queue.submit(Some(encoder.finish()));

    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        return Err(BufferError::Kernel(format!("{label}: {err}")));
    }
    device
        .poll(wgpu::PollType::Wait)
        .map_err(|err| BufferError::Kernel(format!("{label}: poll failed: {err}")))?;
    log::trace!("dispatched {label}: count={count} grid=({x}, {y})");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_dims_small() {
        assert_eq!(dispatch_dims(1), (1, 1, 256));
        assert_eq!(dispatch_dims(256), (1, 1, 256));
        assert_eq!(dispatch_dims(257), (2, 1, 512));
    }

    #[test]
    fn test_dispatch_dims_spills_into_y() {
        let count = MAX_GROUPS_PER_DIM * WORKGROUP_SIZE + 1;
        let (x, y, row_stride) = dispatch_dims(count);
        assert_eq!(x, MAX_GROUPS_PER_DIM);
        assert_eq!(y, 2);
        assert!(u64::from(x) * u64::from(y) * u64::from(WORKGROUP_SIZE) >= u64::from(count));
        assert_eq!(row_stride, x * WORKGROUP_SIZE);
    }

    #[test]
    fn test_uniform_encoding_widths() {
        let mut bytes = Vec::new();
        push_element(&mut bytes, ElementKind::Int, Scalar::Double(-2.9));
        push_arg(&mut bytes, ElementKind::Int, 0.5);
        assert_eq!(&bytes[..4], &(-2i32).to_ne_bytes());
        assert_eq!(&bytes[4..], &0.5f32.to_ne_bytes());

        let mut wide = Vec::new();
        push_element(&mut wide, ElementKind::Double, Scalar::Float(1.5));
        push_arg(&mut wide, ElementKind::Double, 2.0);
        assert_eq!(wide.len(), 16);
    }

    #[test]
    fn test_preludes_define_element_alias() {
        for kind in ElementKind::ALL {
            let prelude = kind_prelude(kind);
            assert!(prelude.contains("alias T ="));
            assert!(prelude.contains("fn div_t"));
        }
    }
}
