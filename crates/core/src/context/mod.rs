//! Execution contexts
//!
//! An execution context is the single in-order queue the engine submits its
//! stages to. Two backends exist:
//!
//! - [`HostContext`]: a worker thread draining commands that fan out over rayon
//! - [`GpuContext`]: a wgpu device and queue (requires the `gpu` feature)
//!
//! Contexts are created once by the caller and passed explicitly to every engine
//! call. Picking one is deliberately simple: try the GPU if asked to, otherwise
//! (or on failure) fall back to the host.

#[cfg(feature = "gpu")]
mod gpu;
mod host;

#[cfg(feature = "gpu")]
pub use gpu::{GpuContext, GpuInitResult};
pub use host::{Command, CompletionSignal, HostContext};

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Which backend to run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendPreference {
    /// GPU when one initializes and passes its self-test, host otherwise
    #[default]
    Auto,
    /// Parallel host device only
    Host,
    /// GPU only; fail if none is usable
    Gpu,
}

/// The queue an engine submits its work to
#[derive(Debug)]
pub enum ExecutionContext {
    /// Parallel host device
    Host(HostContext),
    /// wgpu device
    #[cfg(feature = "gpu")]
    Gpu(GpuContext),
}

impl ExecutionContext {
    /// Start a host context
    ///
    /// # Arguments
    ///
    /// * `threads` - Kernel pool size, `None` for one thread per core
    ///
    /// # Errors
    /// Returns [`EngineError::ContextUnavailable`] if the worker cannot start
    pub fn host(threads: Option<usize>) -> Result<Self> {
        HostContext::new(next_id(), threads).map(Self::Host)
    }

    /// Initialize a GPU context
    ///
    /// # Errors
    /// Returns [`EngineError::ContextUnavailable`] if no adapter is found or the
    /// device cannot be created
    #[cfg(feature = "gpu")]
    pub fn gpu() -> Result<Self> {
        match GpuContext::new(next_id()) {
            GpuInitResult::Success(ctx) => Ok(Self::Gpu(ctx)),
            GpuInitResult::NoGpuFound => Err(EngineError::ContextUnavailable(
                "no GPU adapter found".into(),
            )),
            GpuInitResult::InitFailed {
                adapter_name,
                error,
            } => Err(EngineError::ContextUnavailable(format!(
                "GPU '{adapter_name}' failed to initialize: {error}"
            ))),
        }
    }

    /// Create a context according to `preference` and self-test it
    ///
    /// `Auto` tries the GPU first and falls back to the host, logging why.
    ///
    /// # Errors
    /// Returns [`EngineError::ContextUnavailable`] if the requested backend cannot
    /// be used
    pub fn select(preference: BackendPreference, threads: Option<usize>) -> Result<Self> {
        match preference {
            BackendPreference::Host => Self::checked(Self::host(threads)?),
            BackendPreference::Gpu => Self::checked(Self::try_gpu()?),
            BackendPreference::Auto => {
                match Self::try_gpu().and_then(Self::checked) {
                    Ok(ctx) => return Ok(ctx),
                    Err(e) => warn!("{}. Falling back to host backend.", e),
                }
                Self::checked(Self::host(threads)?)
            }
        }
    }

    #[cfg(feature = "gpu")]
    fn try_gpu() -> Result<Self> {
        Self::gpu()
    }

    #[cfg(not(feature = "gpu"))]
    fn try_gpu() -> Result<Self> {
        Err(EngineError::ContextUnavailable(
            "GPU feature disabled".into(),
        ))
    }

    fn checked(ctx: Self) -> Result<Self> {
        ctx.self_test()?;
        info!("Execution context ready: {}", ctx.describe());
        Ok(ctx)
    }

    /// Identifier used to match engines to the context owning their buffers
    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            Self::Host(ctx) => ctx.id(),
            #[cfg(feature = "gpu")]
            Self::Gpu(ctx) => ctx.id(),
        }
    }

    /// One-line description of the device behind the queue
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Host(ctx) => format!("host ({} threads)", ctx.threads()),
            #[cfg(feature = "gpu")]
            Self::Gpu(ctx) => {
                let info = ctx.adapter_info();
                format!("{} ({:?}, {:?})", info.name, info.backend, info.device_type)
            }
        }
    }

    /// True for the GPU backend
    #[must_use]
    pub fn is_gpu_accelerated(&self) -> bool {
        match self {
            Self::Host(_) => false,
            #[cfg(feature = "gpu")]
            Self::Gpu(_) => true,
        }
    }

    /// Block until every submitted command has completed
    ///
    /// # Errors
    /// Returns [`EngineError::WaitFailure`] if the host worker stopped early
    pub fn drain(&self) -> Result<()> {
        match self {
            Self::Host(ctx) => ctx.drain(),
            #[cfg(feature = "gpu")]
            Self::Gpu(ctx) => {
                ctx.drain();
                Ok(())
            }
        }
    }

    /// Fill a 128×128 grid with its row index in a device kernel and verify it
    ///
    /// # Errors
    /// Returns [`EngineError::ContextUnavailable`] if the check fails
    pub fn self_test(&self) -> Result<()> {
        match self {
            Self::Host(ctx) => host_self_test(ctx),
            #[cfg(feature = "gpu")]
            Self::Gpu(ctx) => ctx.self_test(),
        }
    }
}

fn host_self_test(ctx: &HostContext) -> Result<()> {
    use crate::config::GridDims;
    use crate::stage::Stage;
    use parking_lot::Mutex;
    use std::sync::Arc;

    let dims = GridDims::new(128, 128);
    let buffer = Arc::new(Mutex::new(vec![0.0_f32; dims.cells()]));

    let before = ctx.last_ticket();
    let target = Arc::clone(&buffer);
    ctx.submit(
        Stage::SelfTest,
        Box::new(move |pool| {
            let mut guard = target.lock();
            let data = guard.as_mut_slice();
            pool.install(|| crate::kernels::fill_row_index(data, dims));
        }),
    )?;
    ctx.wait(&ctx.signal_since(before))?;

    let data = buffer.lock();
    if data[dims.index(127, 0)] == 127.0 {
        Ok(())
    } else {
        Err(EngineError::ContextUnavailable(
            "host self test failed".into(),
        ))
    }
}
