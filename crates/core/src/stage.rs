//! Named units of device work
//!
//! Every command submitted to an execution context carries a [`Stage`]. The
//! name labels wgpu objects and shows up in log fields and errors.

use std::fmt;

/// One kind of command the engine submits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Zero-fill of a working buffer
    Clear,
    /// Copy of freshly drawn fuel into the device fuel row
    FuelInjection,
    /// 3-tap stencil writing the next working buffer
    Propagation,
    /// Box filter from simulation to output resolution
    Downsample,
    /// Copy of the output grid towards the host snapshot
    HostCopy,
    /// Host data written straight into a working buffer
    Upload,
    /// Blocking read of a working buffer
    Readback,
    /// Context self-test kernel
    SelfTest,
}

impl Stage {
    /// Human-readable label
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::FuelInjection => "fuel injection",
            Self::Propagation => "propagation",
            Self::Downsample => "downsample",
            Self::HostCopy => "host copy",
            Self::Upload => "upload",
            Self::Readback => "readback",
            Self::SelfTest => "self test",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
