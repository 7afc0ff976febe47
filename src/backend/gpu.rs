//! wgpu compute backend.
//!
//! Fields live in storage buffers. Every dispatch of a submitted graph gets
//! its own [`KernelParams`] slot in one uniform buffer, bound with a dynamic
//! offset. A graph barrier ends the current compute pass; buffer copies are
//! recorded between passes.

use std::collections::HashMap;
use std::mem::size_of;

use bytemuck::{Pod, Zeroable};
use log::{debug, info, trace};
use wgpu::util::DeviceExt;

use super::ComputeBackend;
use crate::error::{OceanError, Result};
use crate::graph::{CommandGraph, FieldHandle, Kernel, KernelKind, Node, ResourceId, TableHandle};
use crate::grid::{FieldFormat, GridSize};

/// Uniform block shared by every shader (`Params` in the WGSL sources)
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct KernelParams {
    pub width: u32,
    pub height: u32,
    pub stage: u32,
    pub axis: u32,
    pub direction: f32,
    pub scale: f32,
    pub time: f32,
    pub choppiness: f32,
    pub wind_direction: [f32; 2],
    pub wind_speed: f32,
    pub gravity: f32,
    pub sqrt_amplitude: f32,
    pub fetch: f32,
    pub depth: f32,
    pub length: f32,
}

impl KernelParams {
    /// Uniform values for one dispatch
    pub fn for_kernel(kernel: &Kernel) -> Self {
        let grid = kernel.grid();
        let mut params = Self {
            width: grid.width(),
            height: grid.height(),
            ..Self::default()
        };
        match kernel {
            Kernel::BitReverse { axis, .. } => params.axis = axis.index(),
            Kernel::Butterfly {
                axis,
                stage,
                direction,
                ..
            } => {
                params.axis = axis.index();
                params.stage = *stage;
                params.direction = direction.sign();
            }
            Kernel::Scale { factor, .. } => params.scale = *factor,
            Kernel::StaticSpectrum { settings, .. } => {
                let waves = &settings.waves;
                params.wind_direction = waves.wind_direction;
                params.wind_speed = waves.wind_speed;
                params.gravity = waves.gravity;
                params.sqrt_amplitude = waves.wave_amplitude.max(0.0).sqrt();
                params.fetch = waves.fetch;
                params.depth = waves.depth;
                params.length = settings.length;
            }
            Kernel::Evolve { time, .. } => params.time = *time,
            Kernel::Merge { choppiness, .. } => params.choppiness = *choppiness,
            Kernel::Modulate { .. } | Kernel::Copy { .. } => {}
        }
        params
    }
}

const PARAMS_SIZE: u64 = size_of::<KernelParams>() as u64;

/// Storage bindings per kernel: `(binding, read_only)`
fn storage_layout(kind: KernelKind) -> &'static [(u32, bool)] {
    match kind {
        KernelKind::BitReverse => &[(1, true), (2, false), (3, true)],
        KernelKind::Butterfly => &[(1, true), (2, false)],
        KernelKind::Modulate | KernelKind::Scale => &[(2, false)],
        KernelKind::StaticSpectrum => &[(1, true), (2, false), (3, false)],
        KernelKind::Evolve => &[
            (1, true),
            (2, true),
            (3, false),
            (4, false),
            (5, false),
            (6, false),
        ],
        KernelKind::Merge => &[
            (3, false),
            (4, false),
            (5, false),
            (6, false),
            (7, false),
            (8, false),
            (9, false),
        ],
        KernelKind::Copy => &[],
    }
}

/// Buffers bound by a dispatch, in [`storage_layout`] order
fn storage_resources(kernel: &Kernel) -> Vec<ResourceId> {
    match kernel {
        Kernel::BitReverse {
            src, dst, table, ..
        } => vec![src.id, dst.id, table.id],
        Kernel::Butterfly { src, dst, .. } => vec![src.id, dst.id],
        Kernel::Modulate { target } | Kernel::Scale { target, .. } => vec![target.id],
        Kernel::StaticSpectrum {
            noise,
            h0,
            frequency,
            ..
        } => vec![noise.id, h0.id, frequency.id],
        Kernel::Evolve {
            h0,
            frequency,
            components,
            ..
        } => {
            let mut ids = vec![h0.id, frequency.id];
            ids.extend(components.ids());
            ids
        }
        Kernel::Merge {
            components,
            outputs,
            ..
        } => {
            let mut ids = components.ids().to_vec();
            ids.extend(outputs.ids());
            ids
        }
        Kernel::Copy { .. } => Vec::new(),
    }
}

/// Shader source and entry point of each pipeline
fn entry_point(kind: KernelKind) -> Option<(ShaderFile, &'static str)> {
    let entry = match kind {
        KernelKind::BitReverse => (ShaderFile::Fft, "bit_reverse"),
        KernelKind::Butterfly => (ShaderFile::Fft, "butterfly"),
        KernelKind::Modulate => (ShaderFile::Fft, "modulate"),
        KernelKind::Scale => (ShaderFile::Fft, "scale"),
        KernelKind::StaticSpectrum => (ShaderFile::Spectrum, "static_spectrum"),
        KernelKind::Evolve => (ShaderFile::Wave, "evolve"),
        KernelKind::Merge => (ShaderFile::Wave, "merge"),
        KernelKind::Copy => return None,
    };
    Some(entry)
}

const PIPELINE_KINDS: [KernelKind; 7] = [
    KernelKind::BitReverse,
    KernelKind::Butterfly,
    KernelKind::Modulate,
    KernelKind::Scale,
    KernelKind::StaticSpectrum,
    KernelKind::Evolve,
    KernelKind::Merge,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum ShaderFile {
    Fft,
    Spectrum,
    Wave,
}

impl ShaderFile {
    fn label(self) -> &'static str {
        match self {
            ShaderFile::Fft => "FFT Shader",
            ShaderFile::Spectrum => "Spectrum Shader",
            ShaderFile::Wave => "Wave Shader",
        }
    }

    fn code(self) -> &'static str {
        match self {
            ShaderFile::Fft => include_str!("../shaders/fft.wgsl"),
            ShaderFile::Spectrum => include_str!("../shaders/spectrum.wgsl"),
            ShaderFile::Wave => include_str!("../shaders/wave.wgsl"),
        }
    }
}

struct KernelPipeline {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

/// Uniform buffer holding one params slot per dispatch
struct ParamsArena {
    buffer: wgpu::Buffer,
    slots: usize,
    stride: u64,
}

impl ParamsArena {
    fn new(device: &wgpu::Device, slots: usize, stride: u64) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Kernel Params Buffer"),
            size: slots as u64 * stride,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            slots,
            stride,
        }
    }
}

type BindGroupKey = (KernelKind, Vec<ResourceId>);

/// A run of nodes encoded together
enum Segment<'a> {
    /// Dispatches sharing one compute pass, with their params slot
    Compute(Vec<(&'a Kernel, usize)>),
    Copy { src: &'a FieldHandle, dst: &'a FieldHandle },
}

/// Compute backend on a wgpu device
pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    pipelines: HashMap<KernelKind, KernelPipeline>,
    buffers: HashMap<ResourceId, wgpu::Buffer>,
    params: ParamsArena,
    bind_groups: HashMap<BindGroupKey, wgpu::BindGroup>,
    next_id: u32,
}

impl GpuBackend {
    /// Request an adapter and device, then build every pipeline
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(OceanError::AdapterUnavailable)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Ocean Compute Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        let adapter_name = adapter.get_info().name;
        info!("GPU backend on '{}'", adapter_name);

        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let stride = PARAMS_SIZE.next_multiple_of(alignment);
        let params = ParamsArena::new(&device, 64, stride);
        let pipelines = create_pipelines(&device);

        Ok(Self {
            device,
            queue,
            adapter_name,
            pipelines,
            buffers: HashMap::new(),
            params,
            bind_groups: HashMap::new(),
            next_id: 0,
        })
    }

    /// [`GpuBackend::new`] driven to completion on the current thread
    pub fn new_blocking() -> Result<Self> {
        pollster::block_on(Self::new())
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Storage buffer behind a field, for binding into render pipelines
    pub fn buffer(&self, field: &FieldHandle) -> Option<&wgpu::Buffer> {
        self.buffers.get(&field.id)
    }

    fn allocate_id(&mut self) -> ResourceId {
        let id = ResourceId(self.next_id);
        self.next_id += 1;
        id
    }

    fn storage(&self, id: ResourceId) -> Result<&wgpu::Buffer> {
        self.buffers.get(&id).ok_or(OceanError::UnknownResource(id))
    }

    /// Storage buffer whose size matches what `field` describes
    fn field_buffer(&self, field: &FieldHandle) -> Result<&wgpu::Buffer> {
        let buffer = self.storage(field.id)?;
        let expected = field.value_count();
        let actual = (buffer.size() / size_of::<f32>() as u64) as usize;
        if actual != expected {
            return Err(OceanError::DataLength { expected, actual });
        }
        Ok(buffer)
    }

    /// Create a buffer inside out-of-memory and validation error scopes
    fn allocate(
        &self,
        label: &str,
        size: u64,
        create: impl FnOnce(&wgpu::Device) -> wgpu::Buffer,
    ) -> Result<wgpu::Buffer> {
        check_storage_size(label, size, &self.device.limits())?;
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let buffer = create(&self.device);
        let invalid = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        match invalid.or(out_of_memory) {
            Some(error) => Err(OceanError::Allocation {
                label: label.to_string(),
                reason: error.to_string(),
            }),
            None => Ok(buffer),
        }
    }

    /// Grow the params buffer; bind groups referencing the old one are dropped
    fn reserve_params(&mut self, slots: usize) {
        if slots <= self.params.slots {
            return;
        }
        let slots = slots.next_power_of_two();
        debug!("gpu: growing params buffer to {} slots", slots);
        self.params = ParamsArena::new(&self.device, slots, self.params.stride);
        self.bind_groups.clear();
    }

    fn ensure_bind_group(&mut self, kernel: &Kernel) -> Result<()> {
        let key = (kernel.kind(), storage_resources(kernel));
        if self.bind_groups.contains_key(&key) {
            return Ok(());
        }
        let pipeline = self
            .pipelines
            .get(&key.0)
            .ok_or_else(|| OceanError::GraphHazard(format!("no pipeline for {:?}", key.0)))?;

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &self.params.buffer,
                offset: 0,
                size: wgpu::BufferSize::new(PARAMS_SIZE),
            }),
        }];
        for (&(binding, _), id) in storage_layout(key.0).iter().zip(&key.1) {
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: self.storage(*id)?.as_entire_binding(),
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Kernel Bind Group"),
            layout: &pipeline.layout,
            entries: &entries,
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(OceanError::Device {
                label: format!("{:?} bind group", key.0),
                reason: error.to_string(),
            });
        }
        trace!("gpu: cached bind group for {:?} {:?}", key.0, key.1);
        self.bind_groups.insert(key, bind_group);
        Ok(())
    }

    /// Pipeline and cached bind group for a compute dispatch
    fn bound(&self, kernel: &Kernel) -> Result<(&wgpu::ComputePipeline, &wgpu::BindGroup)> {
        let kind = kernel.kind();
        let key = (kind, storage_resources(kernel));
        match (self.pipelines.get(&kind), self.bind_groups.get(&key)) {
            (Some(pipeline), Some(bind_group)) => Ok((&pipeline.pipeline, bind_group)),
            _ => Err(OceanError::GraphHazard(format!("{:?} dispatch is unbound", kind))),
        }
    }

    fn encode(
        &self,
        label: &'static str,
        segments: &[Segment<'_>],
        stride: usize,
    ) -> Result<wgpu::CommandBuffer> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });

        for segment in segments {
            match segment {
                Segment::Compute(dispatches) => {
                    let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some(label),
                        timestamp_writes: None,
                    });
                    for &(kernel, slot) in dispatches {
                        let (pipeline, bind_group) = self.bound(kernel)?;
                        let offset = (slot * stride) as wgpu::DynamicOffset;
                        let (x, y) = kernel.grid().workgroups();
                        compute_pass.set_pipeline(pipeline);
                        compute_pass.set_bind_group(0, bind_group, &[offset]);
                        compute_pass.dispatch_workgroups(x, y, 1);
                    }
                }
                Segment::Copy { src, dst } => {
                    let size = (src.value_count() * size_of::<f32>()) as u64;
                    encoder.copy_buffer_to_buffer(
                        self.field_buffer(src)?,
                        0,
                        self.field_buffer(dst)?,
                        0,
                        size,
                    );
                }
            }
        }
        Ok(encoder.finish())
    }

    /// Split the graph at barriers and copies, assigning params slots to dispatches
    fn segments<'a>(graph: &'a CommandGraph) -> (Vec<Segment<'a>>, Vec<KernelParams>) {
        let mut segments = Vec::new();
        let mut params = Vec::new();
        let mut current: Vec<(&Kernel, usize)> = Vec::new();

        for node in graph.nodes() {
            match node {
                Node::Dispatch(Kernel::Copy { src, dst }) => {
                    if !current.is_empty() {
                        segments.push(Segment::Compute(std::mem::take(&mut current)));
                    }
                    segments.push(Segment::Copy { src, dst });
                }
                Node::Dispatch(kernel) => {
                    current.push((kernel, params.len()));
                    params.push(KernelParams::for_kernel(kernel));
                }
                Node::Barrier(_) => {
                    if !current.is_empty() {
                        segments.push(Segment::Compute(std::mem::take(&mut current)));
                    }
                }
            }
        }
        if !current.is_empty() {
            segments.push(Segment::Compute(current));
        }
        (segments, params)
    }
}

/// Reject buffers the device cannot create or bind as one storage binding
fn check_storage_size(label: &str, size: u64, limits: &wgpu::Limits) -> Result<()> {
    let limit = limits
        .max_buffer_size
        .min(limits.max_storage_buffer_binding_size as u64);
    if size > limit {
        return Err(OceanError::Allocation {
            label: label.to_string(),
            reason: format!("{} bytes exceeds the device storage limit of {} bytes", size, limit),
        });
    }
    Ok(())
}

fn create_pipelines(device: &wgpu::Device) -> HashMap<KernelKind, KernelPipeline> {
    let mut modules = HashMap::new();
    let mut pipelines = HashMap::new();

    for kind in PIPELINE_KINDS {
        let Some((source, entry)) = entry_point(kind) else {
            continue;
        };
        let module = modules.entry(source).or_insert_with(|| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(source.label()),
                source: wgpu::ShaderSource::Wgsl(source.code().into()),
            })
        });

        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: wgpu::BufferSize::new(PARAMS_SIZE),
            },
            count: None,
        }];
        for &(binding, read_only) in storage_layout(kind) {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(entry),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(entry),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(entry),
            layout: Some(&pipeline_layout),
            module,
            entry_point: Some(entry),
            compilation_options: Default::default(),
            cache: None,
        });

        pipelines.insert(kind, KernelPipeline { pipeline, layout });
    }
    pipelines
}

impl ComputeBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn create_field(
        &mut self,
        label: &str,
        grid: GridSize,
        format: FieldFormat,
    ) -> Result<FieldHandle> {
        let handle = FieldHandle {
            id: self.allocate_id(),
            grid,
            format,
        };
        let size = (handle.value_count() * size_of::<f32>()) as u64;
        let buffer = self.allocate(label, size, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;
        trace!("gpu: field '{}' {} {} as {}", label, grid, format, handle.id);
        self.buffers.insert(handle.id, buffer);
        Ok(handle)
    }

    fn create_table(&mut self, label: &str, data: &[u32]) -> Result<TableHandle> {
        let handle = TableHandle {
            id: self.allocate_id(),
            len: data.len() as u32,
        };
        let size = std::mem::size_of_val(data) as u64;
        let buffer = self.allocate(label, size, |device| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(data),
                usage: wgpu::BufferUsages::STORAGE,
            })
        })?;
        self.buffers.insert(handle.id, buffer);
        Ok(handle)
    }

    fn write_field(&mut self, field: &FieldHandle, data: &[f32]) -> Result<()> {
        if data.len() != field.value_count() {
            return Err(OceanError::DataLength {
                expected: field.value_count(),
                actual: data.len(),
            });
        }
        let buffer = self.field_buffer(field)?;
        self.queue.write_buffer(buffer, 0, bytemuck::cast_slice(data));
        Ok(())
    }

    fn read_field(&self, field: &FieldHandle) -> Result<Vec<f32>> {
        let source = self.field_buffer(field)?;
        let size = (field.value_count() * size_of::<f32>()) as u64;

        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &staging_buffer, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            // The receiver outlives the poll below
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        pollster::block_on(receiver)
            .map_err(|e| OceanError::Readback(e.to_string()))?
            .map_err(|e| OceanError::Readback(e.to_string()))?;

        let data = buffer_slice.get_mapped_range();
        let result: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging_buffer.unmap();

        Ok(result)
    }

    fn submit(&mut self, graph: &CommandGraph) -> Result<()> {
        graph.validate()?;
        let (segments, params) = Self::segments(graph);

        self.reserve_params(params.len());
        let stride = self.params.stride as usize;
        let mut bytes = vec![0u8; params.len() * stride];
        for (slot, value) in params.iter().enumerate() {
            bytes[slot * stride..slot * stride + PARAMS_SIZE as usize]
                .copy_from_slice(bytemuck::bytes_of(value));
        }
        if !bytes.is_empty() {
            self.queue.write_buffer(&self.params.buffer, 0, &bytes);
        }

        for kernel in graph.kernels() {
            if kernel.kind() != KernelKind::Copy {
                self.ensure_bind_group(kernel)?;
            }
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let submitted = self
            .encode(graph.label(), &segments, stride)
            .map(|commands| {
                self.queue.submit(Some(commands));
            });
        let device_error = pollster::block_on(self.device.pop_error_scope());
        submitted?;
        if let Some(error) = device_error {
            return Err(OceanError::Device {
                label: graph.label().to_string(),
                reason: error.to_string(),
            });
        }
        trace!(
            "gpu: submitted '{}' ({} dispatches, {} segments)",
            graph.label(),
            params.len(),
            segments.len()
        );
        Ok(())
    }
}
