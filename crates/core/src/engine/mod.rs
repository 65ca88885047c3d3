//! The fire engine
//!
//! [`FireEngine`] owns the device buffers of one simulation and submits its
//! stages to the [`ExecutionContext`] they were allocated on. Each call to
//! [`FireEngine::update`] enqueues, in order:
//!
//! 1. fuel injection into the device fuel row
//! 2. propagation from the current working buffer into the other one, after
//!    which the two buffers swap roles
//! 3. downsampling of the new current buffer (supersampled quality only)
//! 4. an asynchronous copy of the visible grid into a readback area
//!
//! `update` returns once the work is queued. [`FireEngine::flush_to_host`] waits
//! for the most recent copy and publishes it into the host snapshot, so the
//! snapshot only ever changes inside `flush_to_host`.
//!
//! # Example
//!
//! ```no_run
//! use fire_plasma_core::{ExecutionContext, FireConfig, FireEngine};
//!
//! let ctx = ExecutionContext::host(None).unwrap();
//! let mut engine = FireEngine::new(&ctx, FireConfig::default()).unwrap();
//! engine.init(&ctx).unwrap();
//! for _ in 0..100 {
//!     engine.update(&ctx).unwrap();
//!     engine.flush_to_host().unwrap();
//! }
//! println!("{:?}", engine.snapshot().stats());
//! ```

#[cfg(feature = "gpu")]
mod gpu;
mod host;

use crate::config::{FireConfig, GridDims, StencilWeights};
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::fuel::{FuelSource, RandomFuel};
use crate::grid::{try_zeroed, IntensityGrid};
use crate::profiler::ProfilerScope;
use std::fmt;
use tracing::{debug, error, info, trace};

/// Buffer the host copy reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopySource {
    /// A working buffer, by double-buffer index
    Working(usize),
    /// The logical-resolution downsample buffer
    Downsampled,
}

/// Stage submission on one backend, bound to the context owning its buffers
///
/// Every method only enqueues work; none of them waits for the device except
/// the diagnostic `read_working`.
trait DeviceStages {
    /// Zero working buffer `index`
    fn clear(&mut self, index: usize) -> Result<()>;

    /// Upload one fuel value per simulation row
    fn inject_fuel(&mut self, fuel: &[f32]) -> Result<()>;

    /// Run the stencil from buffer `read` into buffer `read ^ 1`
    fn propagate(&mut self, read: usize) -> Result<()>;

    /// Box-filter working buffer `current` into the downsample buffer
    fn downsample(&mut self, current: usize) -> Result<()>;

    /// Copy the visible grid into the readback area and record it as pending
    fn copy_to_host(&mut self, source: CopySource) -> Result<()>;

    /// Blocking read of working buffer `index`
    fn read_working(&mut self, index: usize) -> Result<Vec<f32>>;

    /// Overwrite working buffer `index`
    fn write_working(&mut self, index: usize, data: &[f32]) -> Result<()>;
}

/// Device-side storage for one engine
enum DeviceBuffers {
    Host(host::HostBuffers),
    #[cfg(feature = "gpu")]
    Gpu(gpu::GpuBuffers),
}

impl DeviceBuffers {
    fn has_pending(&self) -> bool {
        match self {
            Self::Host(buffers) => buffers.has_pending(),
            #[cfg(feature = "gpu")]
            Self::Gpu(buffers) => buffers.has_pending(),
        }
    }

    /// Wait for the pending copy, if any, and write it into `host`
    ///
    /// Returns whether a copy was published.
    fn resolve_pending(&mut self, host: &mut [f32]) -> Result<bool> {
        match self {
            Self::Host(buffers) => buffers.resolve_pending(host),
            #[cfg(feature = "gpu")]
            Self::Gpu(buffers) => buffers.resolve_pending(host),
        }
    }
}

fn bind<'a>(
    buffers: &'a mut DeviceBuffers,
    ctx: &'a ExecutionContext,
    owner: u64,
) -> Result<Box<dyn DeviceStages + 'a>> {
    if ctx.id() != owner {
        return Err(EngineError::ContextMismatch);
    }
    match (buffers, ctx) {
        (DeviceBuffers::Host(buffers), ExecutionContext::Host(host)) => {
            Ok(Box::new(host::HostStages::new(buffers, host)))
        }
        #[cfg(feature = "gpu")]
        (DeviceBuffers::Gpu(buffers), ExecutionContext::Gpu(gpu)) => {
            Ok(Box::new(gpu::GpuStages::new(buffers, gpu)))
        }
        #[cfg(feature = "gpu")]
        _ => Err(EngineError::ContextMismatch),
    }
}

/// Double-buffered fire simulation
pub struct FireEngine {
    config: FireConfig,
    logical: GridDims,
    simulation: GridDims,
    weights: StencilWeights,
    context_id: u64,
    buffers: DeviceBuffers,
    double_buffer_index: usize,
    fuel_source: Box<dyn FuelSource>,
    fuel_row: Vec<f32>,
    host_intensity: Vec<f32>,
    steps: u64,
}

impl fmt::Debug for FireEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FireEngine")
            .field("config", &self.config)
            .field("context_id", &self.context_id)
            .field("double_buffer_index", &self.double_buffer_index)
            .field("steps", &self.steps)
            .field("pending_copy", &self.buffers.has_pending())
            .finish_non_exhaustive()
    }
}

impl FireEngine {
    /// Allocate an engine on `ctx`, fuelled by an OS-seeded random source
    ///
    /// # Arguments
    ///
    /// * `ctx` - Context that will own the device buffers
    /// * `config` - Grid size and quality
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidDimensions`] for an unusable configuration
    /// and [`EngineError::AllocationFailure`] if a buffer cannot be allocated
    pub fn new(ctx: &ExecutionContext, config: FireConfig) -> Result<Self> {
        Self::with_fuel_source(ctx, config, RandomFuel::new())
    }

    /// Allocate an engine on `ctx` with a custom fuel source
    ///
    /// All buffers are allocated up front; a failure leaves nothing behind.
    ///
    /// # Errors
    /// Same as [`FireEngine::new`]
    pub fn with_fuel_source(
        ctx: &ExecutionContext,
        config: FireConfig,
        fuel: impl FuelSource + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let logical = config.logical_dims();
        let simulation = config.simulation_dims();
        let factor = config.quality.supersample_factor();

        let host_intensity = try_zeroed(logical.cells(), "host intensity snapshot")?;
        let fuel_row = try_zeroed(simulation.height as usize, "fuel row")?;

        let buffers = match ctx {
            ExecutionContext::Host(_) => {
                DeviceBuffers::Host(host::HostBuffers::new(
                    simulation,
                    logical,
                    factor,
                    config.quality.weights(),
                )?)
            }
            #[cfg(feature = "gpu")]
            ExecutionContext::Gpu(gpu_ctx) => {
                DeviceBuffers::Gpu(gpu::GpuBuffers::new(
                    gpu_ctx,
                    simulation,
                    logical,
                    factor,
                    config.quality.weights(),
                )?)
            }
        };

        info!(
            "Fire engine created: {}x{} ({:?}, simulating {}x{}) on {}",
            logical.width,
            logical.height,
            config.quality,
            simulation.width,
            simulation.height,
            ctx.describe()
        );

        Ok(Self {
            config,
            logical,
            simulation,
            weights: config.quality.weights(),
            context_id: ctx.id(),
            buffers,
            double_buffer_index: 0,
            fuel_source: Box::new(fuel),
            fuel_row,
            host_intensity,
            steps: 0,
        })
    }

    /// Replace the fuel source used by subsequent updates
    pub fn set_fuel_source(&mut self, fuel: impl FuelSource + 'static) {
        self.fuel_source = Box::new(fuel);
    }

    /// Clear the working grid and reset the double-buffer index
    ///
    /// The clear is enqueued; it completes before any later stage runs.
    ///
    /// # Errors
    /// Returns [`EngineError::ContextMismatch`] for a foreign context and
    /// [`EngineError::SubmissionFailure`] if the clear cannot be enqueued
    pub fn init(&mut self, ctx: &ExecutionContext) -> Result<()> {
        self.try_init(ctx).map_err(|e| {
            error!("Fire engine init failed: {}", e);
            e
        })
    }

    fn try_init(&mut self, ctx: &ExecutionContext) -> Result<()> {
        let mut stages = bind(&mut self.buffers, ctx, self.context_id)?;
        stages.clear(0)?;
        self.double_buffer_index = 0;
        debug!("Fire engine initialized");
        Ok(())
    }

    /// Enqueue one simulation step and an asynchronous host copy
    ///
    /// Returns without waiting for the device. A copy still pending from an
    /// earlier update is superseded by this one.
    ///
    /// # Errors
    /// Returns [`EngineError::SubmissionFailure`] naming the stage that could
    /// not be enqueued. The step is abandoned there; stages already enqueued
    /// still run, and the buffers swap only if propagation was enqueued.
    pub fn update(&mut self, ctx: &ExecutionContext) -> Result<()> {
        let _scope = ProfilerScope::new("fire update");
        self.try_update(ctx).map_err(|e| {
            error!(step = self.steps, "Fire step abandoned: {}", e);
            e
        })
    }

    fn try_update(&mut self, ctx: &ExecutionContext) -> Result<()> {
        if self.buffers.has_pending() {
            debug!(step = self.steps, "Superseding unflushed host copy");
        }
        let mut stages = bind(&mut self.buffers, ctx, self.context_id)?;

        self.fuel_source.fill(&mut self.fuel_row);
        stages.inject_fuel(&self.fuel_row)?;

        stages.propagate(self.double_buffer_index)?;
        self.double_buffer_index ^= 1;
        self.steps += 1;

        let source = if self.config.quality.is_supersampled() {
            stages.downsample(self.double_buffer_index)?;
            CopySource::Downsampled
        } else {
            CopySource::Working(self.double_buffer_index)
        };
        stages.copy_to_host(source)?;

        trace!(
            step = self.steps,
            current = self.double_buffer_index,
            "Fire step enqueued"
        );
        Ok(())
    }

    /// Wait for the most recent host copy and publish it to the snapshot
    ///
    /// Without a pending copy this returns immediately and leaves the snapshot
    /// untouched.
    ///
    /// # Errors
    /// Returns [`EngineError::WaitFailure`] if the device reports an error while
    /// completing the copy. The snapshot is not updated in that case.
    pub fn flush_to_host(&mut self) -> Result<()> {
        let _scope = ProfilerScope::new("fire flush");
        match self.buffers.resolve_pending(&mut self.host_intensity) {
            Ok(published) => {
                if published {
                    trace!(step = self.steps, "Host snapshot refreshed");
                }
                Ok(())
            }
            Err(e) => {
                error!(step = self.steps, "Fire flush failed: {}", e);
                Err(e)
            }
        }
    }

    /// Host snapshot at logical resolution, row-major
    ///
    /// Holds the grid as of the last successful [`FireEngine::flush_to_host`].
    #[must_use]
    pub fn host_intensity(&self) -> &[f32] {
        &self.host_intensity
    }

    /// Owned copy of the host snapshot
    #[must_use]
    pub fn snapshot(&self) -> IntensityGrid {
        IntensityGrid::from_raw(self.logical, self.host_intensity.clone())
    }

    /// Which working buffer is current (0 or 1)
    #[must_use]
    pub fn current_index(&self) -> usize {
        self.double_buffer_index
    }

    /// Number of steps whose propagation has been enqueued
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &FireConfig {
        &self.config
    }

    /// Stencil weights in use
    #[must_use]
    pub fn weights(&self) -> StencilWeights {
        self.weights
    }

    /// Visible grid dimensions
    #[must_use]
    pub fn logical_dims(&self) -> GridDims {
        self.logical
    }

    /// Dimensions of the working buffers
    #[must_use]
    pub fn simulation_dims(&self) -> GridDims {
        self.simulation
    }

    /// Fuel values injected by the most recent update
    #[must_use]
    pub fn fuel_row(&self) -> &[f32] {
        &self.fuel_row
    }

    /// True while a host copy has been enqueued but not flushed
    #[must_use]
    pub fn has_pending_copy(&self) -> bool {
        self.buffers.has_pending()
    }

    /// Blocking read of the current working buffer at simulation resolution
    ///
    /// Waits for every stage enqueued so far. Intended for diagnostics and tests.
    ///
    /// # Errors
    /// Returns [`EngineError::ContextMismatch`] for a foreign context and
    /// [`EngineError::WaitFailure`] if the read cannot complete
    pub fn read_current(&mut self, ctx: &ExecutionContext) -> Result<IntensityGrid> {
        let index = self.double_buffer_index;
        let mut stages = bind(&mut self.buffers, ctx, self.context_id)?;
        let data = stages.read_working(index)?;
        IntensityGrid::from_vec(self.simulation, data)
    }

    /// Enqueue an overwrite of the current working buffer
    ///
    /// # Errors
    /// Returns [`EngineError::SizeMismatch`] unless `data` covers the simulation
    /// grid, plus the errors of [`FireEngine::init`]
    pub fn write_current(&mut self, ctx: &ExecutionContext, data: &[f32]) -> Result<()> {
        if data.len() != self.simulation.cells() {
            return Err(EngineError::SizeMismatch {
                expected: self.simulation.cells(),
                actual: data.len(),
            });
        }
        let index = self.double_buffer_index;
        let mut stages = bind(&mut self.buffers, ctx, self.context_id)?;
        stages.write_working(index, data)
    }
}
