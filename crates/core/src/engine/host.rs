//! Host backend
//!
//! Buffers live behind `Arc<Mutex<_>>` so each queued command can own a handle
//! to the ones it touches. Only the queue worker locks them while work is in
//! flight; commands run one at a time, so the locks never contend.

use super::{CopySource, DeviceStages};
use crate::config::{GridDims, StencilWeights};
use crate::context::{CompletionSignal, HostContext};
use crate::error::{EngineError, Result};
use crate::grid::try_zeroed;
use crate::kernels;
use crate::stage::Stage;
use parking_lot::Mutex;
use std::sync::Arc;

type SharedBuffer = Arc<Mutex<Vec<f32>>>;

fn shared(len: usize, what: &'static str) -> Result<SharedBuffer> {
    Ok(Arc::new(Mutex::new(try_zeroed(len, what)?)))
}

pub(crate) struct HostBuffers {
    simulation: GridDims,
    factor: u32,
    weights: StencilWeights,
    intensity: [SharedBuffer; 2],
    fuel: SharedBuffer,
    downsampled: Option<SharedBuffer>,
    readback: SharedBuffer,
    pending: Option<CompletionSignal>,
}

impl HostBuffers {
    pub(crate) fn new(
        simulation: GridDims,
        logical: GridDims,
        factor: u32,
        weights: StencilWeights,
    ) -> Result<Self> {
        let cells = simulation.cells();
        let downsampled = if factor > 1 {
            Some(shared(logical.cells(), "downsample buffer")?)
        } else {
            None
        };
        Ok(Self {
            simulation,
            factor,
            weights,
            intensity: [
                shared(cells, "working buffer A")?,
                shared(cells, "working buffer B")?,
            ],
            fuel: shared(simulation.height as usize, "device fuel row")?,
            downsampled,
            readback: shared(logical.cells(), "readback area")?,
            pending: None,
        })
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub(crate) fn resolve_pending(&mut self, host: &mut [f32]) -> Result<bool> {
        let Some(signal) = self.pending.take() else {
            return Ok(false);
        };
        signal.wait()?;
        host.copy_from_slice(&self.readback.lock());
        Ok(true)
    }
}

/// Host buffers bound to the queue that owns them
pub(crate) struct HostStages<'a> {
    buffers: &'a mut HostBuffers,
    ctx: &'a HostContext,
    // Last ticket before this binding
    start: u64,
}

impl<'a> HostStages<'a> {
    pub(crate) fn new(buffers: &'a mut HostBuffers, ctx: &'a HostContext) -> Self {
        let start = ctx.last_ticket();
        Self {
            buffers,
            ctx,
            start,
        }
    }
}

impl DeviceStages for HostStages<'_> {
    fn clear(&mut self, index: usize) -> Result<()> {
        let target = Arc::clone(&self.buffers.intensity[index]);
        self.ctx
            .submit(Stage::Clear, Box::new(move |_| target.lock().fill(0.0)))?;
        Ok(())
    }

    fn inject_fuel(&mut self, fuel: &[f32]) -> Result<()> {
        let staged = fuel.to_vec();
        let target = Arc::clone(&self.buffers.fuel);
        self.ctx.submit(
            Stage::FuelInjection,
            Box::new(move |_| target.lock().copy_from_slice(&staged)),
        )?;
        Ok(())
    }

    fn propagate(&mut self, read: usize) -> Result<()> {
        let current = Arc::clone(&self.buffers.intensity[read]);
        let next = Arc::clone(&self.buffers.intensity[read ^ 1]);
        let fuel = Arc::clone(&self.buffers.fuel);
        let (dims, weights) = (self.buffers.simulation, self.buffers.weights);
        self.ctx.submit(
            Stage::Propagation,
            Box::new(move |pool| {
                let current = current.lock();
                let mut next = next.lock();
                let fuel = fuel.lock();
                let (src, dst, row) = (current.as_slice(), next.as_mut_slice(), fuel.as_slice());
                pool.install(|| kernels::propagate(src, dst, row, dims, weights));
            }),
        )?;
        Ok(())
    }

    fn downsample(&mut self, current: usize) -> Result<()> {
        let target = self
            .buffers
            .downsampled
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| EngineError::submission(Stage::Downsample, "no downsample buffer"))?;
        let source = Arc::clone(&self.buffers.intensity[current]);
        let (dims, factor) = (self.buffers.simulation, self.buffers.factor);
        self.ctx.submit(
            Stage::Downsample,
            Box::new(move |pool| {
                let source = source.lock();
                let mut target = target.lock();
                let (src, dst) = (source.as_slice(), target.as_mut_slice());
                pool.install(|| kernels::downsample(src, dims, dst, factor));
            }),
        )?;
        Ok(())
    }

    fn copy_to_host(&mut self, source: CopySource) -> Result<()> {
        let source = match source {
            CopySource::Working(index) => Arc::clone(&self.buffers.intensity[index]),
            CopySource::Downsampled => self
                .buffers
                .downsampled
                .as_ref()
                .map(Arc::clone)
                .ok_or_else(|| EngineError::submission(Stage::HostCopy, "no downsample buffer"))?,
        };
        let readback = Arc::clone(&self.buffers.readback);
        self.ctx.submit(
            Stage::HostCopy,
            Box::new(move |_| {
                let source = source.lock();
                readback.lock().copy_from_slice(&source);
            }),
        )?;
        // Supersedes any earlier copy; the new signal also covers that copy's steps
        let after = self
            .buffers
            .pending
            .as_ref()
            .map_or(self.start, |earlier| earlier.after().min(self.start));
        self.buffers.pending = Some(self.ctx.signal_since(after));
        Ok(())
    }

    fn read_working(&mut self, index: usize) -> Result<Vec<f32>> {
        let before = self.ctx.last_ticket();
        let slot: SharedBuffer = Arc::new(Mutex::new(Vec::new()));
        let (source, out) = (Arc::clone(&self.buffers.intensity[index]), Arc::clone(&slot));
        self.ctx.submit(
            Stage::Readback,
            Box::new(move |_| {
                let data = source.lock().clone();
                *out.lock() = data;
            }),
        )?;
        self.ctx.wait(&self.ctx.signal_since(before))?;
        let data = std::mem::take(&mut *slot.lock());
        Ok(data)
    }

    fn write_working(&mut self, index: usize, data: &[f32]) -> Result<()> {
        let staged = data.to_vec();
        let target = Arc::clone(&self.buffers.intensity[index]);
        self.ctx.submit(
            Stage::Upload,
            Box::new(move |_| target.lock().copy_from_slice(&staged)),
        )?;
        Ok(())
    }
}
