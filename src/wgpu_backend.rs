//! Device buffers stored in wgpu storage buffers.
//!
//! A process-wide [`DeviceContext`] owns the wgpu device and queue, the kernel
//! pipeline caches and the host-to-device transfer path. Every operation blocks
//! until the device has finished (`PollType::Wait`), so effects are visible on
//! return just like on the host.

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use crate::buffer::{check_index, check_result_target, ensure_alive, tail_walk, DataBuffer};
use crate::config::{global_config, TransferPreference};
use crate::element::{ElementKind, Scalar};
use crate::elements::Elements;
use crate::error::{BufferError, BufferResult};
use crate::host_kernels;
use crate::ops::{ArithOp, ElementWiseOp, OpForm, Transform};
use crate::runtime_detection::BackendKind;
use crate::strided::{Strided, StridedPair};
use crate::wgpu_kernels::{
    axpy, AxpyParams, ElementwiseKernels, EntryPoint, KernelId, WalkParams, WgpuAxpy,
};

/// Global device context (lazy initialized). A failed initialization keeps its
/// error so later callers see the same cause.
static DEVICE_CONTEXT: OnceLock<BufferResult<Arc<DeviceContext>>> = OnceLock::new();

/// Staging pool limits.
const MAX_STAGING_PER_BUCKET: usize = 4;
const MAX_STAGING_BYTES: u64 = 64 * 1024 * 1024;

/// Initialize `cell` once with `init` and hand out the shared value or the
/// stored error.
fn init_once<T>(
    cell: &OnceLock<BufferResult<Arc<T>>>,
    init: impl FnOnce() -> BufferResult<T>,
) -> BufferResult<Arc<T>> {
    cell.get_or_init(|| init().map(Arc::new)).clone()
}

fn init_device_context() -> BufferResult<DeviceContext> {
    match DeviceContext::new(global_config().transfer) {
        Ok(ctx) => {
            log::info!(
                "wgpu device ready: {} (transfer: {}, f64: {})",
                ctx.adapter_name(),
                ctx.transfer_path(),
                ctx.supports(ElementKind::Double)
            );
            Ok(ctx)
        }
        Err(e) => {
            log::warn!("Failed to initialize wgpu device context: {e}");
            Err(e)
        }
    }
}

/// Shared device context, created on first use. `None` when no adapter or
/// device can be obtained or no transfer path works.
pub fn device_context() -> Option<Arc<DeviceContext>> {
    global_context().ok()
}

/// Shared device context, or the error that stopped its initialization.
pub fn global_context() -> BufferResult<Arc<DeviceContext>> {
    init_once(&DEVICE_CONTEXT, init_device_context)
}

/// How bytes move from host memory into a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferPath {
    /// `Queue::write_buffer`.
    QueueWrite,
    /// A mapped `MAP_WRITE` buffer copied on the queue.
    StagingCopy,
}

impl TransferPath {
    pub const ALL: [TransferPath; 2] = [TransferPath::QueueWrite, TransferPath::StagingCopy];

    pub fn name(self) -> &'static str {
        match self {
            TransferPath::QueueWrite => "queue-write",
            TransferPath::StagingCopy => "staging",
        }
    }

    /// Paths to probe, in order, for a configured preference.
    pub fn candidates(preference: TransferPreference) -> &'static [TransferPath] {
        match preference {
            TransferPreference::Auto => &Self::ALL,
            TransferPreference::QueueWrite => &[TransferPath::QueueWrite],
            TransferPreference::Staging => &[TransferPath::StagingCopy],
        }
    }
}

impl fmt::Display for TransferPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Size bucket for staging reuse (power of 2, minimum 256 bytes).
fn staging_bucket(size: u64) -> u64 {
    size.max(256).next_power_of_two()
}

/// Readback staging buffers grouped by bucket size.
struct StagingPool {
    buckets: HashMap<u64, Vec<wgpu::Buffer>>,
    total_bytes: u64,
}

impl StagingPool {
    fn new() -> Self {
        Self {
            buckets: HashMap::new(),
            total_bytes: 0,
        }
    }

    fn get_or_create(&mut self, device: &wgpu::Device, min_size: u64) -> (wgpu::Buffer, u64) {
        let bucket = staging_bucket(min_size);
        if let Some(buffer) = self.buckets.get_mut(&bucket).and_then(Vec::pop) {
            self.total_bytes = self.total_bytes.saturating_sub(bucket);
            log::trace!("StagingPool: reused buffer size={bucket}");
            return (buffer, bucket);
        }
        log::trace!("StagingPool: created buffer size={bucket}");
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ndbuf_readback_staging"),
            size: bucket,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        (buffer, bucket)
    }

    fn release(&mut self, buffer: wgpu::Buffer, bucket: u64) {
        if self.total_bytes + bucket > MAX_STAGING_BYTES {
            log::trace!("StagingPool: dropping buffer (pool full)");
            return;
        }
        let buffers = self.buckets.entry(bucket).or_default();
        if buffers.len() >= MAX_STAGING_PER_BUCKET {
            log::trace!("StagingPool: dropping buffer (bucket full)");
            return;
        }
        buffers.push(buffer);
        self.total_bytes += bucket;
    }
}

/// wgpu device, queue, kernels and transfer path shared by device buffers.
pub struct DeviceContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter: wgpu::AdapterInfo,
    supports_f64: bool,
    max_buffer_bytes: u64,
    transfer: TransferPath,
    kernels: ElementwiseKernels,
    axpy: WgpuAxpy,
    staging: Mutex<StagingPool>,
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("adapter", &self.adapter.name)
            .field("backend", &self.adapter.backend)
            .field("supports_f64", &self.supports_f64)
            .field("max_buffer_bytes", &self.max_buffer_bytes)
            .field("transfer", &self.transfer)
            .finish()
    }
}

impl DeviceContext {
    /// Acquire an adapter and device, then probe the transfer paths allowed by
    /// `preference` and keep the first that works.
    pub fn new(preference: TransferPreference) -> BufferResult<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| BufferError::Unsupported(format!("no wgpu adapter: {e}")))?;

        let supports_f64 = adapter.features().contains(wgpu::Features::SHADER_F64);
        let mut features = wgpu::Features::empty();
        if supports_f64 {
            features |= wgpu::Features::SHADER_F64;
        }
        let limits = adapter.limits();
        let max_buffer_bytes = limits
            .max_buffer_size
            .min(u64::from(limits.max_storage_buffer_binding_size));

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("ndbuf-device"),
            required_features: features,
            required_limits: limits,
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| BufferError::Unsupported(format!("request_device failed: {e}")))?;

        let mut ctx = Self {
            kernels: ElementwiseKernels::new(device.clone(), queue.clone()),
            axpy: WgpuAxpy::new(device.clone(), queue.clone()),
            device,
            queue,
            adapter: adapter.get_info(),
            supports_f64,
            max_buffer_bytes,
            transfer: TransferPath::QueueWrite,
            staging: Mutex::new(StagingPool::new()),
        };
        ctx.transfer = ctx.select_transfer(preference)?;
        Ok(ctx)
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter.name
    }

    pub fn transfer_path(&self) -> TransferPath {
        self.transfer
    }

    /// Whether buffers of `kind` can live on this device.
    pub fn supports(&self, kind: ElementKind) -> bool {
        kind != ElementKind::Double || self.supports_f64
    }

    /// Largest single allocation in bytes.
    pub fn max_buffer_bytes(&self) -> u64 {
        self.max_buffer_bytes
    }

    /// `(name, kind tag)` of every kernel compiled so far.
    pub fn compiled_kernels(&self) -> Vec<(&'static str, &'static str)> {
        let mut ids = self.kernels.compiled();
        ids.extend(self.axpy.compiled().into_iter().map(|kind| (axpy::KERNEL_NAME, kind.tag())));
        ids.sort_unstable();
        ids
    }

    fn select_transfer(&self, preference: TransferPreference) -> BufferResult<TransferPath> {
        let mut last_err = BufferError::Transfer("no transfer path to probe".into());
        for &path in TransferPath::candidates(preference) {
            match self.probe_transfer(path) {
                Ok(()) => {
                    log::info!("Selected {path} transfer path");
                    return Ok(path);
                }
                Err(e) => {
                    log::debug!("Transfer path {path} failed its probe: {e}");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    fn probe_transfer(&self, path: TransferPath) -> BufferResult<()> {
        let pattern: [u32; 4] = [0x0123_4567, 0x89ab_cdef, 0, u32::MAX];
        let bytes: &[u8] = bytemuck::cast_slice(&pattern);
        let mut probe = self.allocate(bytes.len() as u64, "ndbuf_transfer_probe")?;
        self.upload_with(path, probe.buffer()?, 0, bytes)?;
        let back = self.download(probe.buffer()?, 0, bytes.len() as u64)?;
        probe.release();
        if back == bytes {
            Ok(())
        } else {
            Err(BufferError::Transfer(format!("{path}: probe readback mismatch")))
        }
    }

    /// Allocate `bytes` of storage (at least one 4-byte word) inside
    /// validation and out-of-memory error scopes.
    pub fn allocate(&self, bytes: u64, label: &'static str) -> BufferResult<DeviceAllocation> {
        if bytes > self.max_buffer_bytes {
            return Err(BufferError::Allocation(format!(
                "{label}: {bytes} bytes exceeds the device limit of {} bytes",
                self.max_buffer_bytes
            )));
        }
        let size = bytes
            .max(wgpu::COPY_BUFFER_ALIGNMENT)
            .next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        let invalid = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = out_of_memory.or(invalid) {
            buffer.destroy();
            return Err(BufferError::Allocation(format!("{label}: {err}")));
        }
        log::trace!("allocated {size} bytes for {label}");
        Ok(DeviceAllocation {
            buffer: Some(buffer),
            size,
        })
    }

    /// Upload `bytes` to `target` at `byte_offset` through the selected path.
    pub fn upload(&self, target: &wgpu::Buffer, byte_offset: u64, bytes: &[u8]) -> BufferResult<()> {
        self.upload_with(self.transfer, target, byte_offset, bytes)
    }

    fn upload_with(
        &self,
        path: TransferPath,
        target: &wgpu::Buffer,
        byte_offset: u64,
        bytes: &[u8],
    ) -> BufferResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let size = bytes.len() as u64;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        match path {
            TransferPath::QueueWrite => {
                self.queue.write_buffer(target, byte_offset, bytes);
                self.queue.submit(std::iter::empty());
            }
            TransferPath::StagingCopy => {
                let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("ndbuf_upload_staging"),
                    size,
                    usage: wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: true,
                });
                staging.slice(..).get_mapped_range_mut().copy_from_slice(bytes);
                staging.unmap();
                let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("ndbuf_upload_encoder"),
                });
                encoder.copy_buffer_to_buffer(&staging, 0, target, byte_offset, size);
                self.queue.submit(Some(encoder.finish()));
            }
        }
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BufferError::Transfer(format!("{path} upload failed: {err}")));
        }
        self.wait()?;
        log::trace!("uploaded {size} bytes at {byte_offset} via {path}");
        Ok(())
    }

    /// Read `size` bytes of `source` starting at `byte_offset`.
    pub fn download(&self, source: &wgpu::Buffer, byte_offset: u64, size: u64) -> BufferResult<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }

        let (staging, bucket) = {
            let mut pool = self
                .staging
                .lock()
                .map_err(|_| BufferError::Transfer("staging pool lock poisoned".into()))?;
            pool.get_or_create(&self.device, size)
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("ndbuf_readback_encoder"),
        });
        encoder.copy_buffer_to_buffer(source, byte_offset, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BufferError::Transfer(format!("readback copy failed: {err}")));
        }

        let slice = staging.slice(..size);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.wait()?;
        receiver
            .recv()
            .map_err(|_| BufferError::Transfer("map_async channel closed".into()))?
            .map_err(|e| BufferError::Transfer(format!("map_async failed: {e}")))?;

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        if let Ok(mut pool) = self.staging.lock() {
            pool.release(staging, bucket);
        }
        log::trace!("downloaded {size} bytes at {byte_offset}");
        Ok(bytes)
    }

    /// Device-side copy of the first `size` bytes of `source` into `target`.
    pub fn copy(&self, source: &wgpu::Buffer, target: &wgpu::Buffer, size: u64) -> BufferResult<()> {
        if size == 0 {
            return Ok(());
        }
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("ndbuf_copy_encoder"),
        });
        encoder.copy_buffer_to_buffer(source, 0, target, 0, size);
        self.queue.submit(Some(encoder.finish()));
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BufferError::Transfer(format!("device copy failed: {err}")));
        }
        self.wait()
    }

    /// Download the range covering `walk` and gather it on the host.
    fn read_walk(&self, source: &wgpu::Buffer, kind: ElementKind, walk: Strided) -> BufferResult<Elements> {
        if walk.count == 0 {
            return Ok(Elements::zeros(kind, 0));
        }
        let width = kind.size_of() as u64;
        let bytes = self.download(source, walk.offset as u64 * width, walk.span() as u64 * width)?;
        let covering = Elements::from_bytes(kind, &bytes)?;
        if walk.inc == 1 {
            return Ok(covering);
        }
        let local = Strided::new(0, walk.inc, walk.count);
        Ok(crate::with_elements!(&covering, v => {
            Elements::from(host_kernels::gather(v.as_slice(), local))
        }))
    }

    fn wait(&self) -> BufferResult<()> {
        self.device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|e| BufferError::Transfer(format!("device poll failed: {e}")))
    }
}

/// Exclusive owner of one wgpu storage buffer. Not `Clone`: a copy is a new
/// allocation. Released by [`release`](Self::release) or on drop.
#[derive(Debug)]
pub struct DeviceAllocation {
    buffer: Option<wgpu::Buffer>,
    size: u64,
}

impl DeviceAllocation {
    pub fn buffer(&self) -> BufferResult<&wgpu::Buffer> {
        self.buffer.as_ref().ok_or(BufferError::UseAfterDestroy)
    }

    /// Allocated size in bytes, including padding.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_released(&self) -> bool {
        self.buffer.is_none()
    }

    /// Free the device memory. Returns `false` if it was already released.
    pub fn release(&mut self) -> bool {
        match self.buffer.take() {
            Some(buffer) => {
                buffer.destroy();
                true
            }
            None => false,
        }
    }
}

impl Drop for DeviceAllocation {
    fn drop(&mut self) {
        if self.release() {
            log::debug!("DeviceAllocation: released {} bytes on drop", self.size);
        }
    }
}

fn to_u32(value: usize, what: &str) -> BufferResult<u32> {
    u32::try_from(value).map_err(|_| {
        BufferError::UnsupportedAddressing(format!("{what} {value} does not fit in u32"))
    })
}

/// Offset and increment of a walk in kernel form. The increment of a walk with
/// at most one element is never read.
fn walk_u32(walk: Strided) -> BufferResult<(u32, u32)> {
    if let Some(last) = walk.last_index() {
        to_u32(last, "index")?;
    }
    let inc = if walk.count <= 1 { 0 } else { to_u32(walk.inc, "increment")? };
    Ok((to_u32(walk.offset, "offset")?, inc))
}

fn walk_params(this: Strided, other: Option<Strided>) -> BufferResult<WalkParams> {
    let (offset, inc) = walk_u32(this)?;
    let (other_offset, other_inc) = match other {
        Some(walk) => walk_u32(walk)?,
        None => (0, 0),
    };
    Ok(WalkParams {
        count: to_u32(this.count, "count")?,
        offset,
        inc,
        other_offset,
        other_inc,
        out_offset: offset,
        out_inc: inc,
        row_stride: 0,
    })
}

fn axpy_params(pair: StridedPair) -> BufferResult<AxpyParams> {
    let (y_offset, y_inc) = walk_u32(pair.this())?;
    let (x_offset, x_inc) = walk_u32(pair.other())?;
    Ok(AxpyParams {
        count: to_u32(pair.count, "count")?,
        x_offset,
        x_inc,
        y_offset,
        y_inc,
        ..Default::default()
    })
}

/// Whether transforms of `kind` run as device kernels. WGSL has no f64
/// transcendentals and int results must match the host's f64 evaluation, so
/// int and double transforms go through the host loops.
fn transform_on_device(kind: ElementKind) -> bool {
    kind == ElementKind::Float
}

/// Binary operand resident on this device or staged into a temporary buffer.
enum Operand<'a> {
    Resident(&'a wgpu::Buffer),
    Staged(DeviceAllocation),
}

impl Operand<'_> {
    fn buffer(&self) -> BufferResult<&wgpu::Buffer> {
        match self {
            Operand::Resident(buffer) => Ok(buffer),
            Operand::Staged(alloc) => alloc.buffer(),
        }
    }
}

/// Buffer whose elements live in device memory.
#[derive(Debug)]
pub struct DeviceBuffer {
    ctx: Arc<DeviceContext>,
    kind: ElementKind,
    len: usize,
    alloc: DeviceAllocation,
}

impl DeviceBuffer {
    /// Zero-filled buffer on the shared device.
    pub fn zeros(kind: ElementKind, len: usize) -> BufferResult<Self> {
        Self::zeros_in(&global_context()?, kind, len)
    }

    pub fn from_elements(values: &Elements) -> BufferResult<Self> {
        Self::from_elements_in(&global_context()?, values)
    }

    /// Zero-filled buffer on `ctx`; wgpu clears new buffers.
    pub fn zeros_in(ctx: &Arc<DeviceContext>, kind: ElementKind, len: usize) -> BufferResult<Self> {
        if !ctx.supports(kind) {
            return Err(BufferError::Unsupported(format!(
                "{kind} buffers need SHADER_F64, which {} does not support",
                ctx.adapter_name()
            )));
        }
        let bytes = (len as u64)
            .checked_mul(kind.size_of() as u64)
            .ok_or_else(|| BufferError::Allocation(format!("{len} {kind} elements overflow u64")))?;
        let alloc = ctx.allocate(bytes, "ndbuf_device_buffer")?;
        Ok(Self {
            ctx: Arc::clone(ctx),
            kind,
            len,
            alloc,
        })
    }

    pub fn from_elements_in(ctx: &Arc<DeviceContext>, values: &Elements) -> BufferResult<Self> {
        let buffer = Self::zeros_in(ctx, values.kind(), values.len())?;
        buffer.write_contiguous(0, values)?;
        Ok(buffer)
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.ctx
    }

    /// Allocated size in bytes, including padding.
    pub fn allocation_size(&self) -> u64 {
        self.alloc.size()
    }

    fn raw(&self) -> BufferResult<&wgpu::Buffer> {
        self.alloc.buffer()
    }

    fn byte_offset(&self, index: usize) -> u64 {
        index as u64 * self.kind.size_of() as u64
    }

    fn write_contiguous(&self, offset: usize, values: &Elements) -> BufferResult<()> {
        let values = if values.kind() == self.kind {
            Cow::Borrowed(values)
        } else {
            Cow::Owned(values.convert(self.kind))
        };
        self.ctx.upload(self.raw()?, self.byte_offset(offset), values.as_bytes())
    }

    /// Walked values with `transform` applied by the host loops.
    fn host_transform(&self, transform: &Transform, walk: Strided) -> BufferResult<Elements> {
        let values = self.ctx.read_walk(self.raw()?, self.kind, walk)?;
        let gathered = Strided::whole(walk.count);
        log::trace!("{} transform of {} {} elements on the host", transform.name(), walk.count, self.kind);
        Ok(crate::with_elements!(&values, v => {
            Elements::from(host_kernels::transform_out(v.as_slice(), transform, gathered))
        }))
    }

    fn same_device(&self, other: &DeviceBuffer) -> bool {
        Arc::ptr_eq(&self.ctx, &other.ctx)
    }

    /// Resolve `other` to a buffer on this device in this kind. Operands
    /// elsewhere are gathered along their walk and uploaded, so the returned
    /// pair reads them contiguously.
    fn operand<'a>(&self, other: &'a dyn DataBuffer, pair: StridedPair) -> BufferResult<(Operand<'a>, StridedPair)> {
        if let Some(device) = other.as_any().downcast_ref::<DeviceBuffer>() {
            if self.same_device(device) && device.kind == self.kind {
                return Ok((Operand::Resident(device.raw()?), pair));
            }
        }
        let values = other.get_strided(pair.other())?.into_kind(self.kind);
        let staged = self.ctx.allocate(values.as_bytes().len() as u64, "ndbuf_staged_operand")?;
        self.ctx.upload(staged.buffer()?, 0, values.as_bytes())?;
        log::trace!("staged {} {} operand elements from {}", values.len(), self.kind, other.backend());
        Ok((
            Operand::Staged(staged),
            StridedPair::new(pair.count, pair.offset, 0, pair.inc, 1),
        ))
    }

    /// Run an out-of-place `launch` whose output lands in `result` at `walk`.
    ///
    /// A result on this device is written directly; any other result gets the
    /// walked values of a device scratch buffer.
    fn launch_into(
        &self,
        result: &mut dyn DataBuffer,
        walk: Strided,
        launch: impl FnOnce(&wgpu::Buffer) -> BufferResult<()>,
    ) -> BufferResult<()> {
        if let Some(target) = result.as_any_mut().downcast_mut::<DeviceBuffer>() {
            if Arc::ptr_eq(&target.ctx, &self.ctx) {
                return launch(target.raw()?);
            }
        }
        let mut scratch = self.ctx.allocate(self.byte_len() as u64, "ndbuf_result_scratch")?;
        launch(scratch.buffer()?)?;
        let values = self.ctx.read_walk(scratch.buffer()?, self.kind, walk)?;
        scratch.release();
        result.put_strided(walk, &values)
    }
}

fn patch(covering: &mut Elements, walk: Strided, values: &Elements) -> BufferResult<()> {
    match (covering, values) {
        (Elements::Double(dst), Elements::Double(src)) => host_kernels::scatter(dst, walk, src),
        (Elements::Float(dst), Elements::Float(src)) => host_kernels::scatter(dst, walk, src),
        (Elements::Int(dst), Elements::Int(src)) => host_kernels::scatter(dst, walk, src),
        (dst, src) => {
            return Err(BufferError::KindMismatch {
                expected: dst.kind(),
                actual: src.kind(),
            })
        }
    }
    Ok(())
}

impl DataBuffer for DeviceBuffer {
    fn backend(&self) -> BackendKind {
        BackendKind::Device
    }

    fn kind(&self) -> ElementKind {
        self.kind
    }

    fn len(&self) -> usize {
        self.len
    }

    fn is_destroyed(&self) -> bool {
        self.alloc.is_released()
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
        let raw = self.raw()?;
        check_index(index, self.len)?;
        let width = self.kind.size_of() as u64;
        let bytes = self.ctx.download(raw, self.byte_offset(index), width)?;
        Elements::from_bytes(self.kind, &bytes)?
            .get(0)
            .ok_or_else(|| BufferError::Transfer(format!("short readback of element {index}")))
    }

    fn put(&mut self, index: usize, value: Scalar) -> BufferResult<()> {
        self.raw()?;
        check_index(index, self.len)?;
        self.write_contiguous(index, &Elements::filled(self.kind, 1, value))
    }

    fn get_strided(&self, walk: Strided) -> BufferResult<Elements> {
        let raw = self.raw()?;
        walk.validate(self.len)?;
        self.ctx.read_walk(raw, self.kind, walk)
    }

    fn put_strided(&mut self, walk: Strided, values: &Elements) -> BufferResult<()> {
        let raw = self.raw()?;
        walk.validate(self.len)?;
        if values.len() != walk.count {
            return Err(BufferError::ShapeMismatch {
                expected: walk.count,
                actual: values.len(),
            });
        }
        if walk.count == 0 {
            return Ok(());
        }
        if walk.is_contiguous() {
            return self.write_contiguous(walk.offset, values);
        }
        let covering_walk = Strided::contiguous(walk.offset, walk.span());
        let mut covering = self.ctx.read_walk(raw, self.kind, covering_walk)?;
        let converted = values.convert(self.kind);
        patch(&mut covering, Strided::new(0, walk.inc, walk.count), &converted)?;
        self.ctx.upload(raw, self.byte_offset(walk.offset), covering.as_bytes())
    }

    fn set_all(&mut self, values: &Elements) -> BufferResult<()> {
        self.raw()?;
        if values.len() != self.len {
            return Err(BufferError::ShapeMismatch {
                expected: self.len,
                actual: values.len(),
            });
        }
        self.write_contiguous(0, values)
    }

    fn as_typed(&self, kind: ElementKind) -> BufferResult<Cow<'_, Elements>> {
        let raw = self.raw()?;
        let bytes = self.ctx.download(raw, 0, self.byte_len() as u64)?;
        Ok(Cow::Owned(Elements::from_bytes(self.kind, &bytes)?.into_kind(kind)))
    }

    fn as_bytes(&self) -> BufferResult<Vec<u8>> {
        self.raw()?;
        Ok(Vec::new())
    }

    fn assign_scalar(&mut self, value: Scalar, offset: usize) -> BufferResult<()> {
        self.raw()?;
        let walk = tail_walk(self.len, offset, 1)?;
        if walk.count == 0 {
            return Ok(());
        }
        self.write_contiguous(offset, &Elements::filled(self.kind, walk.count, value))
    }

    fn dup(&self) -> BufferResult<Box<dyn DataBuffer>> {
        let raw = self.raw()?;
        let bytes = self.byte_len() as u64;
        let alloc = self.ctx.allocate(bytes, "ndbuf_device_buffer")?;
        self.ctx.copy(raw, alloc.buffer()?, bytes)?;
        Ok(Box::new(DeviceBuffer {
            ctx: Arc::clone(&self.ctx),
            kind: self.kind,
            len: self.len,
            alloc,
        }))
    }

    fn destroy(&mut self) {
        if self.alloc.release() {
            log::trace!("DeviceBuffer: destroyed {} {} elements", self.len, self.kind);
        }
    }

    fn flush(&self) -> BufferResult<()> {
        self.raw()?;
        self.ctx.wait()
    }

    fn exec_scalar(&mut self, op: ArithOp, value: Scalar, walk: Strided) -> BufferResult<()> {
        let raw = self.raw()?;
        walk.validate(self.len)?;
        let id = KernelId::arith(op, OpForm::Scalar, self.kind);
        self.ctx
            .kernels
            .launch(id, EntryPoint::ScalarInplace, walk_params(walk, None)?, value, 0.0, &[(1, raw)])
    }

    fn exec_scalar_into(
        &self,
        op: ArithOp,
        value: Scalar,
        walk: Strided,
        result: &mut dyn DataBuffer,
    ) -> BufferResult<()> {
        let src = self.raw()?;
        walk.validate(self.len)?;
        check_result_target(self.kind, self.len, result)?;
        let id = KernelId::arith(op, OpForm::Scalar, self.kind);
        let params = walk_params(walk, None)?;
        self.launch_into(result, walk, |out| {
            self.ctx
                .kernels
                .launch(id, EntryPoint::ScalarOut, params, value, 0.0, &[(3, src), (4, out)])
        })
    }

    fn exec_binary(&mut self, op: ArithOp, other: &dyn DataBuffer, pair: StridedPair) -> BufferResult<()> {
        let raw = self.raw()?;
        ensure_alive(other)?;
        pair.validate(self.len, other.len())?;
        if pair.count == 0 {
            return Ok(());
        }
        let (operand, local) = self.operand(other, pair)?;
        let x = operand.buffer()?;
        match op {
            ArithOp::Add | ArithOp::Sub => {
                let alpha = Scalar::Int(if op == ArithOp::Add { 1 } else { -1 });
                self.ctx.axpy.forward(self.kind, axpy_params(local)?, alpha, x, raw)
            }
            _ => {
                let id = KernelId::arith(op, OpForm::Strided, self.kind);
                let params = walk_params(local.this(), Some(local.other()))?;
                self.ctx
                    .kernels
                    .launch(id, EntryPoint::BinaryInplace, params, Scalar::Int(0), 0.0, &[(1, raw), (2, x)])
            }
        }
    }

    fn exec_binary_into(
        &self,
        op: ArithOp,
        other: &dyn DataBuffer,
        pair: StridedPair,
        result: &mut dyn DataBuffer,
    ) -> BufferResult<()> {
        let src = self.raw()?;
        ensure_alive(other)?;
        pair.validate(self.len, other.len())?;
        check_result_target(self.kind, self.len, result)?;
        if pair.count == 0 {
            return Ok(());
        }
        let (operand, local) = self.operand(other, pair)?;
        let x = operand.buffer()?;
        let id = KernelId::arith(op, OpForm::Strided, self.kind);
        let params = walk_params(local.this(), Some(local.other()))?;
        self.launch_into(result, pair.this(), |out| {
            self.ctx.kernels.launch(
                id,
                EntryPoint::BinaryOut,
                params,
                Scalar::Int(0),
                0.0,
                &[(2, x), (3, src), (4, out)],
            )
        })
    }

    fn exec_transform(&mut self, op: &ElementWiseOp, walk: Strided) -> BufferResult<()> {
        let raw = self.raw()?;
        walk.validate(self.len)?;
        let transform = op.transform();
        if !transform_on_device(self.kind) {
            let values = self.host_transform(&transform, walk)?;
            return self.put_strided(walk, &values);
        }
        let id = KernelId::transform(&transform, self.kind);
        self.ctx.kernels.launch(
            id,
            EntryPoint::TransformInplace,
            walk_params(walk, None)?,
            Scalar::Int(0),
            transform.arg(),
            &[(1, raw)],
        )
    }

    fn exec_transform_into(
        &self,
        op: &ElementWiseOp,
        walk: Strided,
        result: &mut dyn DataBuffer,
    ) -> BufferResult<()> {
        let src = self.raw()?;
        walk.validate(self.len)?;
        check_result_target(self.kind, self.len, result)?;
        let transform = op.transform();
        if !transform_on_device(self.kind) {
            let values = self.host_transform(&transform, walk)?;
            return result.put_strided(walk, &values);
        }
        let id = KernelId::transform(&transform, self.kind);
        let params = walk_params(walk, None)?;
        self.launch_into(result, walk, |out| {
            self.ctx.kernels.launch(
                id,
                EntryPoint::TransformOut,
                params,
                Scalar::Int(0),
                transform.arg(),
                &[(3, src), (4, out)],
            )
        })
    }
}
