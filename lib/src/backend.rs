//! Compute backends executing the two per-frame stages
//!
//! The stages are data-parallel and stateless, so any executor that can run
//! one unit of work per pixel (luminance) and one per output cell (matching)
//! fits behind [`ComputeBackend`]. The CPU backend spreads the work over the
//! rayon thread pool; the GPU backend (feature `gpu`) dispatches wgpu compute
//! shaders.

use std::sync::Arc;

use crate::config::BlockSize;
use crate::error::Result;
use crate::fingerprint::FingerprintTable;
use crate::frame::{Frame, FrameSize, LuminanceBuffer, OutputGrid};
use crate::luminance::luminance_stage;
use crate::matching::matching_stage;

/// Executor for the luminance and matching stages
pub trait ComputeBackend: Send {
    fn name(&self) -> &'static str;

    /// Luminance stage alone
    fn luminance(&mut self, frame: &Frame<'_>, contrast: f32) -> Result<LuminanceBuffer>;

    /// Matching stage alone
    fn match_blocks(
        &mut self,
        lum: &LuminanceBuffer,
        table: &Arc<FingerprintTable>,
        block: BlockSize,
    ) -> Result<OutputGrid>;

    /// Both stages for one frame; luminance completes before matching starts
    fn process(
        &mut self,
        frame: &Frame<'_>,
        contrast: f32,
        table: &Arc<FingerprintTable>,
        block: BlockSize,
    ) -> Result<OutputGrid> {
        let lum = self.luminance(frame, contrast)?;
        self.match_blocks(&lum, table, block)
    }

    /// Frees device resources. The backend must not be used afterwards.
    fn release(&mut self) {}
}

/// Rayon-parallel CPU backend
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuBackend;

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn luminance(&mut self, frame: &Frame<'_>, contrast: f32) -> Result<LuminanceBuffer> {
        frame.check_len()?;
        Ok(luminance_stage(frame, contrast))
    }

    fn match_blocks(
        &mut self,
        lum: &LuminanceBuffer,
        table: &Arc<FingerprintTable>,
        block: BlockSize,
    ) -> Result<OutputGrid> {
        matching_stage(lum, table, block)
    }
}

/// Which backend to run the stages on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Cpu,
    #[cfg(feature = "gpu")]
    Gpu,
}

impl BackendKind {
    /// All kinds compiled into this build
    pub fn available() -> &'static [BackendKind] {
        #[cfg(feature = "gpu")]
        {
            &[BackendKind::Cpu, BackendKind::Gpu]
        }
        #[cfg(not(feature = "gpu"))]
        {
            &[BackendKind::Cpu]
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::Cpu => "CPU (rayon)",
            #[cfg(feature = "gpu")]
            BackendKind::Gpu => "GPU (wgpu)",
        }
    }
}

/// Creates a backend sized for frames of `surface`
///
/// # Errors
/// `ComputeUnavailable` when the GPU backend cannot acquire a device.
pub fn create_backend(kind: BackendKind, surface: FrameSize) -> Result<Box<dyn ComputeBackend>> {
    let backend: Box<dyn ComputeBackend> = match kind {
        BackendKind::Cpu => Box::new(CpuBackend),
        #[cfg(feature = "gpu")]
        BackendKind::Gpu => Box::new(crate::gpu::GpuBackend::new(surface)?),
    };
    log::info!("using {} compute backend for {} frames", backend.name(), surface);
    Ok(backend)
}
