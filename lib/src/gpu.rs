//! wgpu compute backend
//!
//! Runs the luminance stage as one invocation per pixel and the matching stage
//! as one invocation per output cell. Device buffers are sized once for the
//! compute surface; the fingerprint table is uploaded again only when a new
//! table is passed in.

use std::borrow::Cow;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::backend::ComputeBackend;
use crate::config::BlockSize;
use crate::error::{Error, Result};
use crate::fingerprint::FingerprintTable;
use crate::frame::{Frame, FrameSize, LuminanceBuffer, OutputGrid, PixelFormat};

const LUMINANCE_SHADER: &str = include_str!("shaders/luminance.wgsl");
const MATCHING_SHADER: &str = include_str!("shaders/matching.wgsl");

const LUMINANCE_WORKGROUP: u32 = 16;
const MATCHING_WORKGROUP: u32 = 8;

const FORMAT_RGBA: u32 = 0;
const FORMAT_LUMA: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LuminanceParams {
    width: u32,
    height: u32,
    format: u32,
    _pad0: u32,
    contrast: f32,
    _pad1: [f32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct MatchingParams {
    frame_width: u32,
    block_width: u32,
    block_height: u32,
    cols: u32,
    rows: u32,
    char_count: u32,
    row_stride: u32,
    _pad0: u32,
}

/// Buffers sized for the compute surface
struct SurfaceBuffers {
    pixels: wgpu::Buffer,
    lights: wgpu::Buffer,
    lights_staging: wgpu::Buffer,
    params: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

/// Buffers tied to one fingerprint table
struct TableBuffers {
    table: Arc<FingerprintTable>,
    cols: u32,
    rows: u32,
    codes: wgpu::Buffer,
    codes_staging: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    luminance_pipeline: wgpu::ComputePipeline,
    matching_pipeline: wgpu::ComputePipeline,
    matching_layout: wgpu::BindGroupLayout,
    surface: FrameSize,
    buffers: Option<SurfaceBuffers>,
    table: Option<TableBuffers>,
}

impl GpuBackend {
    /// Acquires a device and allocates buffers for frames of `surface`
    ///
    /// # Errors
    /// `ComputeUnavailable` when no adapter or device can be acquired.
    pub fn new(surface: FrameSize) -> Result<Self> {
        if surface.pixel_count() == 0 {
            return Err(Error::DimensionMismatch {
                expected: "a non-empty compute surface".to_string(),
                found: surface.to_string(),
            });
        }
        pollster::block_on(Self::new_async(surface))
    }

    async fn new_async(surface: FrameSize) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .map_err(|e| Error::ComputeUnavailable(format!("no compute adapter: {e}")))?;

        let info = adapter.get_info();
        log::info!("compute adapter: {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("ascii-stream device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                ..Default::default()
            })
            .await
            .map_err(|e| Error::ComputeUnavailable(format!("device request failed: {e}")))?;

        let luminance_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("luminance layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, false),
            ],
        });
        let matching_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("matching layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
            ],
        });

        let luminance_pipeline =
            compute_pipeline(&device, "luminance", LUMINANCE_SHADER, &luminance_layout);
        let matching_pipeline =
            compute_pipeline(&device, "matching", MATCHING_SHADER, &matching_layout);

        let buffers = SurfaceBuffers::new(&device, &luminance_layout, surface);

        Ok(Self {
            device,
            queue,
            luminance_pipeline,
            matching_pipeline,
            matching_layout,
            surface,
            buffers: Some(buffers),
            table: None,
        })
    }

    pub fn surface(&self) -> FrameSize {
        self.surface
    }

    fn surface_buffers(&self) -> Result<&SurfaceBuffers> {
        self.buffers
            .as_ref()
            .ok_or_else(|| Error::ComputeUnavailable("backend has been released".to_string()))
    }

    fn check_frame(&self, frame: &Frame<'_>) -> Result<()> {
        frame.check_len()?;
        if frame.size != self.surface {
            return Err(Error::surface_mismatch(self.surface, frame.size));
        }
        Ok(())
    }

    /// Writes the frame pixels and stage parameters into device memory
    fn upload_frame(&self, frame: &Frame<'_>, contrast: f32) -> Result<()> {
        let buffers = self.surface_buffers()?;
        let format = match frame.format {
            PixelFormat::Rgba => FORMAT_RGBA,
            PixelFormat::Luma => FORMAT_LUMA,
        };
        let params = LuminanceParams {
            width: frame.size.width,
            height: frame.size.height,
            format,
            _pad0: 0,
            contrast,
            _pad1: [0.0; 3],
        };
        self.queue
            .write_buffer(&buffers.params, 0, bytemuck::bytes_of(&params));

        let padded = frame.pixels.len().next_multiple_of(4);
        if padded == frame.pixels.len() {
            self.queue.write_buffer(&buffers.pixels, 0, frame.pixels);
        } else {
            let mut bytes = frame.pixels.to_vec();
            bytes.resize(padded, 0);
            self.queue.write_buffer(&buffers.pixels, 0, &bytes);
        }
        Ok(())
    }

    /// Makes sure the device holds `table`, uploading it if it changed
    fn prepare_table(&mut self, table: &Arc<FingerprintTable>, block: BlockSize) -> Result<()> {
        table.ensure_block(block)?;
        if table.is_empty() {
            return Err(Error::InvalidConfig(
                "fingerprint table has no characters".to_string(),
            ));
        }
        if let Some(current) = &self.table
            && Arc::ptr_eq(&current.table, table)
        {
            return Ok(());
        }

        let buffers = self.surface_buffers()?;
        let (cols, rows) = self.surface.grid_for(block);
        let char_count = table.len() as u32;

        let params = MatchingParams {
            frame_width: self.surface.width,
            block_width: block.width,
            block_height: block.height,
            cols,
            rows,
            char_count,
            row_stride: table.row_width() as u32,
            _pad0: 0,
        };
        let params_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("matching params"),
            size: std::mem::size_of::<MatchingParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue
            .write_buffer(&params_buffer, 0, bytemuck::bytes_of(&params));

        let widened: Vec<u32> = table.as_bytes().iter().map(|&b| u32::from(b)).collect();
        let fingerprints = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("fingerprints"),
            size: (widened.len() * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue
            .write_buffer(&fingerprints, 0, bytemuck::cast_slice(&widened));

        // At least one word so the binding is never empty
        let code_bytes = (cols as u64 * rows as u64).max(1) * 4;
        let codes = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("codes"),
            size: code_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let codes_staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("codes staging"),
            size: code_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("matching bind group"),
            layout: &self.matching_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffers.lights.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: fingerprints.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: codes.as_entire_binding(),
                },
            ],
        });

        log::debug!(
            "uploaded fingerprint table: {} characters at {}, {}x{} cells",
            char_count,
            block,
            cols,
            rows
        );

        self.table = Some(TableBuffers {
            table: Arc::clone(table),
            cols,
            rows,
            codes,
            codes_staging,
            bind_group,
        });
        Ok(())
    }

    fn encode_luminance(&self, encoder: &mut wgpu::CommandEncoder) -> Result<()> {
        let buffers = self.surface_buffers()?;
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("luminance pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.luminance_pipeline);
        pass.set_bind_group(0, &buffers.bind_group, &[]);
        pass.dispatch_workgroups(
            self.surface.width.div_ceil(LUMINANCE_WORKGROUP),
            self.surface.height.div_ceil(LUMINANCE_WORKGROUP),
            1,
        );
        Ok(())
    }

    /// Encodes the matching pass and the copy of its results; returns the
    /// number of cells to read back
    fn encode_matching(&self, encoder: &mut wgpu::CommandEncoder) -> Result<usize> {
        let table = self
            .table
            .as_ref()
            .ok_or_else(|| Error::ComputeUnavailable("no fingerprint table uploaded".to_string()))?;
        let cells = table.cols as usize * table.rows as usize;
        if cells == 0 {
            return Ok(0);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("matching pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.matching_pipeline);
            pass.set_bind_group(0, &table.bind_group, &[]);
            pass.dispatch_workgroups(
                table.cols.div_ceil(MATCHING_WORKGROUP),
                table.rows.div_ceil(MATCHING_WORKGROUP),
                1,
            );
        }
        encoder.copy_buffer_to_buffer(
            &table.codes,
            0,
            &table.codes_staging,
            0,
            (cells * 4) as u64,
        );
        Ok(cells)
    }

    /// Blocks until `staging` is readable and returns its first `count` words
    fn read_back(&self, staging: &wgpu::Buffer, count: usize) -> Result<Vec<u32>> {
        let slice = staging.slice(..(count * 4) as u64);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| Error::ComputeUnavailable(format!("device poll failed: {e}")))?;
        rx.recv()
            .map_err(|_| Error::ComputeUnavailable("readback was cancelled".to_string()))?
            .map_err(|e| Error::ComputeUnavailable(format!("buffer map failed: {e}")))?;

        let values = {
            let data = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, u32>(&data).to_vec()
        };
        staging.unmap();
        Ok(values)
    }

    fn read_grid(&self, cells: usize) -> Result<OutputGrid> {
        let table = self
            .table
            .as_ref()
            .ok_or_else(|| Error::ComputeUnavailable("no fingerprint table uploaded".to_string()))?;
        let codes = if cells == 0 {
            Vec::new()
        } else {
            self.read_back(&table.codes_staging, cells)?
                .into_iter()
                .map(|code| code as u8)
                .collect()
        };
        Ok(OutputGrid {
            codes,
            cols: table.cols,
            rows: table.rows,
        })
    }

    fn create_encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }
}

impl ComputeBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn luminance(&mut self, frame: &Frame<'_>, contrast: f32) -> Result<LuminanceBuffer> {
        self.check_frame(frame)?;
        self.upload_frame(frame, contrast)?;

        let count = self.surface.pixel_count();
        let mut encoder = self.create_encoder("luminance");
        self.encode_luminance(&mut encoder)?;
        let buffers = self.surface_buffers()?;
        encoder.copy_buffer_to_buffer(
            &buffers.lights,
            0,
            &buffers.lights_staging,
            0,
            (count * 4) as u64,
        );
        self.queue.submit(Some(encoder.finish()));

        let lights = self.read_back(&buffers.lights_staging, count)?;
        LuminanceBuffer::new(self.surface, lights.into_iter().map(|v| v as u8).collect())
    }

    fn match_blocks(
        &mut self,
        lum: &LuminanceBuffer,
        table: &Arc<FingerprintTable>,
        block: BlockSize,
    ) -> Result<OutputGrid> {
        if lum.size != self.surface {
            return Err(Error::surface_mismatch(self.surface, lum.size));
        }
        self.prepare_table(table, block)?;

        let widened: Vec<u32> = lum.data.iter().map(|&v| u32::from(v)).collect();
        let buffers = self.surface_buffers()?;
        self.queue
            .write_buffer(&buffers.lights, 0, bytemuck::cast_slice(&widened));

        let mut encoder = self.create_encoder("matching");
        let cells = self.encode_matching(&mut encoder)?;
        self.queue.submit(Some(encoder.finish()));
        self.read_grid(cells)
    }

    fn process(
        &mut self,
        frame: &Frame<'_>,
        contrast: f32,
        table: &Arc<FingerprintTable>,
        block: BlockSize,
    ) -> Result<OutputGrid> {
        self.check_frame(frame)?;
        self.prepare_table(table, block)?;
        self.upload_frame(frame, contrast)?;

        // Passes in one encoder execute in order, so matching sees the
        // finished luminance buffer
        let mut encoder = self.create_encoder("frame");
        self.encode_luminance(&mut encoder)?;
        let cells = self.encode_matching(&mut encoder)?;
        self.queue.submit(Some(encoder.finish()));
        self.read_grid(cells)
    }

    fn release(&mut self) {
        if self.buffers.is_some() {
            log::debug!("releasing gpu buffers for {} surface", self.surface);
        }
        self.table = None;
        self.buffers = None;
    }
}

impl SurfaceBuffers {
    fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, surface: FrameSize) -> Self {
        // RGBA frames need one word per pixel; luma frames pack four per word
        let words = surface.pixel_count() as u64 * 4;

        let pixels = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pixels"),
            size: words,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let lights = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lights"),
            size: words,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let lights_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lights staging"),
            size: words,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("luminance params"),
            size: std::mem::size_of::<LuminanceParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("luminance bind group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: pixels.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: lights.as_entire_binding(),
                },
            ],
        });

        Self {
            pixels,
            lights,
            lights_staging,
            params,
            bind_group,
        }
    }
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
    source: &str,
    layout: &wgpu::BindGroupLayout,
) -> wgpu::ComputePipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    })
}
