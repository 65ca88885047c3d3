//! Fire Plasma Core Library
//!
//! A double-buffered stencil simulation of a scrolling fire. Heat is injected at
//! the left edge of a grid every step and carried rightwards while being blended
//! across neighbouring rows, which wrap around top to bottom.
//!
//! ## Execution
//!
//! Work is submitted to an [`ExecutionContext`]: either a wgpu device (feature
//! `gpu`, on by default) or a parallel host device built on rayon. The engine
//! only enqueues work in `update`; `flush_to_host` waits for the latest copy
//! and publishes it to a host snapshot.
//!
//! ## Quality
//!
//! [`Quality::Supersampled`] runs the stencil on a grid eight times larger in
//! each dimension and box-filters it back down before the copy.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod fuel;
pub mod grid;
pub mod kernels;
pub mod palette;
pub mod profiler;
pub mod stage;

pub use config::{FireConfig, GridDims, Quality, StencilWeights};
pub use context::{BackendPreference, CompletionSignal, ExecutionContext, HostContext};
#[cfg(feature = "gpu")]
pub use context::{GpuContext, GpuInitResult};
pub use engine::FireEngine;
pub use error::{EngineError, Result};
pub use fuel::{ConstantFuel, FuelSource, RandomFuel, SequenceFuel};
pub use grid::{IntensityGrid, IntensityStats};
pub use palette::{classify, Glyph, RampColor};
pub use profiler::{FrameTimer, ProfilerScope};
pub use stage::Stage;
