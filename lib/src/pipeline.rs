//! Single-pass pipeline: one frame in, one output grid out
//!
//! A [`Pipeline`] owns the active configuration, the fingerprint table built
//! for it and the compute backend. Configuration changes are posted through a
//! [`SettingsHandle`] and swapped in by [`Pipeline::apply_pending`] between
//! passes, never during one.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::backend::{BackendKind, ComputeBackend, create_backend};
use crate::config::RenderConfig;
use crate::error::{Error, Result};
use crate::fingerprint::{FingerprintTable, build_table};
use crate::frame::{Frame, FrameSize, OutputGrid};
use crate::glyph::GlyphRasterizer;

/// Cloneable handle for posting configuration updates to a running pipeline
///
/// Only the most recent update is kept; submitting twice before the next pass
/// boundary replaces the first update.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    pending: Arc<Mutex<Option<RenderConfig>>>,
}

impl SettingsHandle {
    pub fn submit(&self, config: RenderConfig) {
        *self.lock() = Some(config);
    }

    pub fn has_pending(&self) -> bool {
        self.lock().is_some()
    }

    fn take(&self) -> Option<RenderConfig> {
        self.lock().take()
    }

    fn lock(&self) -> MutexGuard<'_, Option<RenderConfig>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct Pipeline {
    config: RenderConfig,
    surface: FrameSize,
    rasterizer: GlyphRasterizer,
    table: Arc<FingerprintTable>,
    backend: Box<dyn ComputeBackend>,
    settings: SettingsHandle,
}

impl Pipeline {
    /// Creates a pipeline for frames of `surface` pixels
    ///
    /// Loads the configured font, builds the initial fingerprint table and
    /// acquires the compute backend.
    ///
    /// # Errors
    /// * `InvalidConfig` if `config` fails validation
    /// * `RenderingUnavailable` if the font cannot be loaded
    /// * `ComputeUnavailable` if the backend cannot be acquired
    pub fn new(config: RenderConfig, surface: FrameSize, kind: BackendKind) -> Result<Self> {
        config.validate()?;
        let rasterizer = GlyphRasterizer::from_spec(&config.font)?;
        let backend = create_backend(kind, surface)?;
        Self::with_parts(config, surface, rasterizer, backend)
    }

    /// Creates a pipeline from an already loaded rasterizer and backend
    pub fn with_parts(
        config: RenderConfig,
        surface: FrameSize,
        rasterizer: GlyphRasterizer,
        backend: Box<dyn ComputeBackend>,
    ) -> Result<Self> {
        let table = build_table(&config, &rasterizer)?;
        Ok(Self {
            config,
            surface,
            rasterizer,
            table,
            backend,
            settings: SettingsHandle::default(),
        })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn surface(&self) -> FrameSize {
        self.surface
    }

    pub fn table(&self) -> &Arc<FingerprintTable> {
        &self.table
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Output grid dimensions for the current block size
    pub fn grid_size(&self) -> (u32, u32) {
        self.surface.grid_for(self.config.block)
    }

    /// Handle for posting updates that take effect at the next pass boundary
    pub fn settings(&self) -> SettingsHandle {
        self.settings.clone()
    }

    /// Regenerates the fingerprint table for `config` and makes both active
    ///
    /// Runs synchronously. On failure nothing changes: the previous
    /// configuration and table stay in place.
    pub fn rebuild_fingerprints(&mut self, config: &RenderConfig) -> Result<Arc<FingerprintTable>> {
        config.validate()?;
        let rasterizer = if config.font == self.config.font {
            self.rasterizer.clone()
        } else {
            GlyphRasterizer::from_spec(&config.font)?
        };
        let table = build_table(config, &rasterizer)?;

        self.rasterizer = rasterizer;
        self.config = config.clone();
        self.table = Arc::clone(&table);
        Ok(table)
    }

    /// Switches to `config`, rebuilding the table only when the character
    /// set, block size or font changed
    pub fn update_config(&mut self, config: RenderConfig) -> Result<()> {
        if self.config.needs_rebuild(&config) {
            self.rebuild_fingerprints(&config)?;
        } else {
            config.validate()?;
            self.config = config;
        }
        Ok(())
    }

    /// Takes the pending update, if any, and applies it
    ///
    /// Returns `Ok(true)` when an update was applied. A rejected update is
    /// consumed and the previous configuration stays active.
    pub fn apply_pending(&mut self) -> Result<bool> {
        match self.settings.take() {
            Some(config) => {
                self.update_config(config)?;
                log::debug!(
                    "applied settings: block {}, {} characters, contrast {}",
                    self.config.block,
                    self.config.characters.chars().count(),
                    self.config.contrast_coefficient
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Installs a precomputed table without touching the configuration
    ///
    /// The table is checked against the configured block size on the next
    /// pass.
    pub fn set_table(&mut self, table: Arc<FingerprintTable>) {
        self.table = table;
    }

    /// Runs both stages on one frame
    ///
    /// # Errors
    /// * `DimensionMismatch` if the frame is not the pipeline's surface size
    ///   or its buffer length does not match its format
    /// * `StaleFingerprintTable` if the active table was built for another block size
    pub fn process_frame(&mut self, frame: &Frame<'_>) -> Result<OutputGrid> {
        frame.check_len()?;
        if frame.size != self.surface {
            return Err(Error::surface_mismatch(self.surface, frame.size));
        }
        self.table.ensure_block(self.config.block)?;

        let started = Instant::now();
        let grid = self.backend.process(
            frame,
            self.config.contrast_coefficient,
            &self.table,
            self.config.block,
        )?;
        log::trace!(
            "{} pass: {}x{} cells in {:.2} ms",
            self.backend.name(),
            grid.cols,
            grid.rows,
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(grid)
    }

    /// Frees backend resources. Further passes are not possible on the GPU backend.
    pub fn release(&mut self) {
        self.backend.release();
    }
}
