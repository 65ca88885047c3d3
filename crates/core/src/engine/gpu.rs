//! GPU backend
//!
//! Working buffers are ping-ponged storage buffers; a bind group is prepared for
//! each direction so a step only records a dispatch. Every stage goes out as its
//! own command buffer inside a validation error scope, which turns wgpu
//! validation failures into [`EngineError::SubmissionFailure`] instead of the
//! uncaptured-error panic.
//!
//! The host copy lands in a `MAP_READ` staging buffer whose mapping is requested
//! right after submission. Flushing polls the device up to that submission and
//! reads the mapped range.

use super::{CopySource, DeviceStages};
use crate::config::{GridDims, StencilWeights};
use crate::context::GpuContext;
use crate::error::{EngineError, Result};
use crate::stage::Stage;
use bytemuck::{Pod, Zeroable};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::debug;
use wgpu::util::DeviceExt;

const WORKGROUP_SIZE: u32 = 16;

/// How long a flush waits for the map callback once the device reports idle
const MAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Propagation shader parameters (must match WGSL struct layout)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct StencilParams {
    width: u32,
    height: u32,
    c1: f32,
    c2: f32,
}

impl StencilParams {
    fn new(dims: GridDims, weights: StencilWeights) -> Self {
        Self {
            width: dims.width,
            height: dims.height,
            c1: weights.c1,
            c2: weights.c2,
        }
    }
}

/// Downsample shader parameters (must match WGSL struct layout)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct DownsampleParams {
    out_width: u32,
    out_height: u32,
    factor: u32,
    src_width: u32,
}

type MapResult = std::result::Result<(), wgpu::BufferAsyncError>;

/// A host copy that has been submitted but not yet read
struct PendingReadback {
    device: Arc<wgpu::Device>,
    submission: wgpu::SubmissionIndex,
    receiver: mpsc::Receiver<MapResult>,
}

/// Downsample pass resources, present only for supersampled engines
struct DownsamplePass {
    pipeline: wgpu::ComputePipeline,
    // Indexed by the working buffer being filtered
    bind_groups: [wgpu::BindGroup; 2],
    output: wgpu::Buffer,
}

pub(crate) struct GpuBuffers {
    simulation: GridDims,
    logical: GridDims,

    intensity: [wgpu::Buffer; 2],
    fuel: wgpu::Buffer,
    staging: wgpu::Buffer,

    propagate_pipeline: wgpu::ComputePipeline,
    // Indexed by the working buffer being read
    propagate_groups: [wgpu::BindGroup; 2],
    downsample: Option<DownsamplePass>,

    pending: Option<PendingReadback>,
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
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

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
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

fn compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    module: &wgpu::ShaderModule,
) -> wgpu::ComputePipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module,
        entry_point: Some("main"),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    })
}

fn storage_buffer(
    device: &wgpu::Device,
    label: &str,
    size: u64,
    usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::STORAGE | usage,
        mapped_at_creation: false,
    })
}

fn staging_buffer(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Host Copy Staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn workgroups(dims: GridDims) -> (u32, u32) {
    (
        dims.width.div_ceil(WORKGROUP_SIZE),
        dims.height.div_ceil(WORKGROUP_SIZE),
    )
}

/// True when one dispatch covers `dims` within `max_per_dimension` workgroups
fn dispatch_fits(dims: GridDims, max_per_dimension: u32) -> bool {
    let (x, y) = workgroups(dims);
    x <= max_per_dimension && y <= max_per_dimension
}

impl GpuBuffers {
    /// Allocate buffers and build pipelines on `ctx`
    ///
    /// # Errors
    /// Returns [`EngineError::AllocationFailure`] if the grid exceeds the device
    /// buffer limits or the device runs out of memory,
    /// [`EngineError::InvalidDimensions`] if one dispatch cannot cover it, and
    /// [`EngineError::ContextUnavailable`] if pipeline creation fails validation
    pub(crate) fn new(
        ctx: &GpuContext,
        simulation: GridDims,
        logical: GridDims,
        factor: u32,
        weights: StencilWeights,
    ) -> Result<Self> {
        if !ctx.can_allocate(simulation) {
            return Err(EngineError::AllocationFailure {
                what: "GPU working buffer",
                bytes: simulation.byte_size(),
            });
        }

        let device = ctx.device();
        let max_groups = device.limits().max_compute_workgroups_per_dimension;
        if !dispatch_fits(simulation, max_groups) || !dispatch_fits(logical, max_groups) {
            return Err(EngineError::InvalidDimensions {
                width: logical.width,
                height: logical.height,
                reason: "grid needs more workgroups than the GPU can dispatch",
            });
        }

        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let buffers = Self::create(device, simulation, logical, factor, weights);

        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        if let Some(error) = out_of_memory {
            debug!("GPU allocation failed: {}", error);
            return Err(EngineError::AllocationFailure {
                what: "GPU engine buffers",
                bytes: 2 * simulation.byte_size() + 2 * logical.byte_size(),
            });
        }
        if let Some(error) = validation {
            return Err(EngineError::ContextUnavailable(format!(
                "GPU pipeline setup failed on {}: {error}",
                ctx.adapter_name()
            )));
        }

        debug!(
            "GPU engine buffers allocated: {}x{} working, {}x{} visible",
            simulation.width, simulation.height, logical.width, logical.height
        );
        Ok(buffers)
    }

    fn create(
        device: &wgpu::Device,
        simulation: GridDims,
        logical: GridDims,
        factor: u32,
        weights: StencilWeights,
    ) -> Self {
        let working_usage = wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
        let intensity = [
            storage_buffer(device, "Intensity A", simulation.byte_size(), working_usage),
            storage_buffer(device, "Intensity B", simulation.byte_size(), working_usage),
        ];
        let fuel = storage_buffer(
            device,
            "Fuel Row",
            u64::from(simulation.height) * std::mem::size_of::<f32>() as u64,
            wgpu::BufferUsages::COPY_DST,
        );
        let staging = staging_buffer(device, logical.byte_size());

        let stencil_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Stencil Params"),
            contents: bytemuck::bytes_of(&StencilParams::new(simulation, weights)),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let propagate_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Propagate Bind Group Layout"),
            entries: &[
                // params
                uniform_entry(0),
                // current
                storage_entry(1, true),
                // fuel
                storage_entry(2, true),
                // next
                storage_entry(3, false),
            ],
        });
        let propagate_module =
            device.create_shader_module(wgpu::include_wgsl!("shaders/propagate.wgsl"));
        let propagate_pipeline = compute_pipeline(
            device,
            "Propagate Pipeline",
            &propagate_layout,
            &propagate_module,
        );

        let propagate_group = |read: usize| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Propagate Bind Group"),
                layout: &propagate_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: stencil_params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: intensity[read].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: fuel.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: intensity[read ^ 1].as_entire_binding(),
                    },
                ],
            })
        };
        let propagate_groups = [propagate_group(0), propagate_group(1)];

        let downsample = (factor > 1)
            .then(|| DownsamplePass::new(device, &intensity, simulation, logical, factor));

        Self {
            simulation,
            logical,
            intensity,
            fuel,
            staging,
            propagate_pipeline,
            propagate_groups,
            downsample,
            pending: None,
        }
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Wait for the pending copy and read the staging buffer into `host`
    pub(crate) fn resolve_pending(&mut self, host: &mut [f32]) -> Result<bool> {
        let Some(pending) = self.pending.take() else {
            return Ok(false);
        };

        if let Err(e) = Self::wait_mapped(&pending) {
            // The staging buffer may be stuck mid-map; the next copy gets a fresh one
            self.staging = staging_buffer(&pending.device, self.logical.byte_size());
            return Err(e);
        }

        {
            let data = self.staging.slice(..).get_mapped_range();
            host.copy_from_slice(bytemuck::cast_slice(&data));
        }
        self.staging.unmap();
        Ok(true)
    }

    fn wait_mapped(pending: &PendingReadback) -> Result<()> {
        let _ = pending
            .device
            .poll(wgpu::Maintain::wait_for(pending.submission.clone()));
        let mapped = match pending.receiver.try_recv() {
            Ok(result) => result,
            Err(mpsc::TryRecvError::Empty) => {
                let _ = pending.device.poll(wgpu::Maintain::Wait);
                pending
                    .receiver
                    .recv_timeout(MAP_TIMEOUT)
                    .map_err(|_| EngineError::WaitFailure("host copy never completed".into()))?
            }
            Err(mpsc::TryRecvError::Disconnected) => {
                return Err(EngineError::WaitFailure(
                    "host copy callback dropped".into(),
                ));
            }
        };
        mapped.map_err(|e| EngineError::WaitFailure(format!("host copy map failed: {e}")))
    }
}

impl DownsamplePass {
    fn new(
        device: &wgpu::Device,
        intensity: &[wgpu::Buffer; 2],
        simulation: GridDims,
        logical: GridDims,
        factor: u32,
    ) -> Self {
        let output = storage_buffer(
            device,
            "Downsampled Intensity",
            logical.byte_size(),
            wgpu::BufferUsages::COPY_SRC,
        );
        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Downsample Params"),
            contents: bytemuck::bytes_of(&DownsampleParams {
                out_width: logical.width,
                out_height: logical.height,
                factor,
                src_width: simulation.width,
            }),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Downsample Bind Group Layout"),
            entries: &[uniform_entry(0), storage_entry(1, true), storage_entry(2, false)],
        });
        let module = device.create_shader_module(wgpu::include_wgsl!("shaders/downsample.wgsl"));
        let pipeline = compute_pipeline(device, "Downsample Pipeline", &layout, &module);

        let group = |source: usize| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Downsample Bind Group"),
                layout: &layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: intensity[source].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: output.as_entire_binding(),
                    },
                ],
            })
        };
        let bind_groups = [group(0), group(1)];

        Self {
            pipeline,
            bind_groups,
            output,
        }
    }
}

/// GPU buffers bound to the context that owns them
pub(crate) struct GpuStages<'a> {
    buffers: &'a mut GpuBuffers,
    ctx: &'a GpuContext,
}

impl<'a> GpuStages<'a> {
    pub(crate) fn new(buffers: &'a mut GpuBuffers, ctx: &'a GpuContext) -> Self {
        Self { buffers, ctx }
    }

    /// Run `record` inside a validation scope and submit what it recorded
    fn submit(
        &self,
        stage: Stage,
        record: impl FnOnce(&mut wgpu::CommandEncoder),
    ) -> Result<wgpu::SubmissionIndex> {
        let device = self.ctx.device();
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(stage.label()),
        });
        record(&mut encoder);
        let submission = self.ctx.queue().submit(std::iter::once(encoder.finish()));

        match pollster::block_on(device.pop_error_scope()) {
            Some(error) => Err(EngineError::submission(stage, error.to_string())),
            None => Ok(submission),
        }
    }

    /// Queue a buffer write inside a validation scope
    fn write(&self, stage: Stage, buffer: &wgpu::Buffer, data: &[u8]) -> Result<()> {
        let device = self.ctx.device();
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.ctx.queue().write_buffer(buffer, 0, data);
        match pollster::block_on(device.pop_error_scope()) {
            Some(error) => Err(EngineError::submission(stage, error.to_string())),
            None => Ok(()),
        }
    }
}

impl DeviceStages for GpuStages<'_> {
    fn clear(&mut self, index: usize) -> Result<()> {
        let target = &self.buffers.intensity[index];
        self.submit(Stage::Clear, |encoder| encoder.clear_buffer(target, 0, None))?;
        Ok(())
    }

    fn inject_fuel(&mut self, fuel: &[f32]) -> Result<()> {
        self.write(
            Stage::FuelInjection,
            &self.buffers.fuel,
            bytemuck::cast_slice(fuel),
        )
    }

    fn propagate(&mut self, read: usize) -> Result<()> {
        let pipeline = &self.buffers.propagate_pipeline;
        let bind_group = &self.buffers.propagate_groups[read];
        let (wg_x, wg_y) = workgroups(self.buffers.simulation);
        self.submit(Stage::Propagation, |encoder| {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Propagate Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(wg_x, wg_y, 1);
        })?;
        Ok(())
    }

    fn downsample(&mut self, current: usize) -> Result<()> {
        let Some(downsample) = self.buffers.downsample.as_ref() else {
            return Err(EngineError::submission(
                Stage::Downsample,
                "no downsample buffer",
            ));
        };
        let (wg_x, wg_y) = workgroups(self.buffers.logical);
        self.submit(Stage::Downsample, |encoder| {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Downsample Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&downsample.pipeline);
            pass.set_bind_group(0, &downsample.bind_groups[current], &[]);
            pass.dispatch_workgroups(wg_x, wg_y, 1);
        })?;
        Ok(())
    }

    fn copy_to_host(&mut self, source: CopySource) -> Result<()> {
        let size = self.buffers.logical.byte_size();
        if self.buffers.pending.take().is_some() {
            // The superseded copy may still be mapping; give it up with its buffer
            self.buffers.staging = staging_buffer(self.ctx.device(), size);
        }

        let src = match source {
            CopySource::Working(index) => &self.buffers.intensity[index],
            CopySource::Downsampled => match self.buffers.downsample.as_ref() {
                Some(downsample) => &downsample.output,
                None => {
                    return Err(EngineError::submission(
                        Stage::HostCopy,
                        "no downsample buffer",
                    ))
                }
            },
        };
        let staging = &self.buffers.staging;
        let submission = self.submit(Stage::HostCopy, |encoder| {
            encoder.copy_buffer_to_buffer(src, 0, staging, 0, size);
        })?;

        let (sender, receiver) = mpsc::channel();
        staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            // A superseded copy has no receiver left
            sender.send(result).ok();
        });

        self.buffers.pending = Some(PendingReadback {
            device: self.ctx.device_handle(),
            submission,
            receiver,
        });
        Ok(())
    }

    fn read_working(&mut self, index: usize) -> Result<Vec<f32>> {
        let buffer = &self.buffers.intensity[index];
        self.ctx.read_buffer(buffer, self.buffers.simulation.byte_size())
    }

    fn write_working(&mut self, index: usize, data: &[f32]) -> Result<()> {
        self.write(
            Stage::Upload,
            &self.buffers.intensity[index],
            bytemuck::cast_slice(data),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workgroups_round_up() {
        assert_eq!(workgroups(GridDims::new(128, 32)), (8, 2));
        assert_eq!(workgroups(GridDims::new(17, 1)), (2, 1));
    }

    #[test]
    fn test_dispatch_limit_applies_per_axis() {
        // Default wgpu limit: 65535 workgroups of 16 columns each
        let limit = wgpu::Limits::default().max_compute_workgroups_per_dimension;
        let widest = limit * WORKGROUP_SIZE;
        assert!(dispatch_fits(GridDims::new(widest, 32), limit));
        assert!(!dispatch_fits(GridDims::new(widest + 1, 32), limit));
        assert!(!dispatch_fits(GridDims::new(32, widest + 1), limit));
    }
}
