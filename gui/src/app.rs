use ascii_stream::source::{DEFAULT_FPS, MAX_FPS, MIN_FPS, probe_size};
use ascii_stream::{
    AsciiStream, BackendKind, FrameSize, ImageSequenceSource, Pipeline, RenderConfig,
    StreamEvent, StreamHandle,
};
use eframe::egui;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Frames wider than this are scaled down before conversion
const MAX_SURFACE_WIDTH: u32 = 1280;

/// Main application state for the ASCII stream GUI
pub struct AsciiApp {
    /// Settings as edited in the panel; pushed to the running stream on change
    config: RenderConfig,
    fps: u32,
    backend: BackendKind,

    /// Image file or folder of frames currently playing
    source_path: Option<PathBuf>,
    stream: Option<StreamHandle>,

    /// Latest output grid as text
    output_text: String,
    grid_size: (u32, u32),
    text_size: f32,

    frames_received: u64,
    last_frame_at: Option<Instant>,
    measured_fps: f32,

    /// Error message to display (if any)
    error_message: Option<String>,
    /// Last error reported by the stream, so repeats are shown only once
    last_stream_error: Option<String>,
}

impl Default for AsciiApp {
    fn default() -> Self {
        Self {
            config: RenderConfig::default(),
            fps: DEFAULT_FPS,
            backend: BackendKind::default(),
            source_path: None,
            stream: None,
            output_text: String::new(),
            grid_size: (0, 0),
            text_size: 8.0,
            frames_received: 0,
            last_frame_at: None,
            measured_fps: 0.0,
            error_message: None,
            last_stream_error: None,
        }
    }
}

impl AsciiApp {
    /// Create a new application, optionally loading settings from a TOML file
    pub fn new(_cc: &eframe::CreationContext<'_>, config_path: Option<&Path>) -> Self {
        let mut app = Self::default();
        if let Some(path) = config_path {
            app.load_config(path);
        }
        app
    }

    /// Load render settings from a TOML file
    fn load_config(&mut self, path: &Path) {
        match RenderConfig::load(path) {
            Ok(config) => {
                log::info!("loaded settings from {}", path.display());
                self.config = config;
                self.push_settings();
            }
            Err(e) => self.error_message = Some(e.to_string()),
        }
    }

    /// Start streaming an image file or a folder of frames
    fn open_source(&mut self, path: PathBuf) {
        self.source_path = Some(path);
        self.restart_stream();
    }

    /// (Re)create the pipeline and stream for the current source
    fn restart_stream(&mut self) {
        self.stop_stream();
        let Some(path) = self.source_path.clone() else {
            return;
        };

        let started = Instant::now();
        match self.start_stream(&path) {
            Ok(stream) => {
                log::info!(
                    "started {} in {:.0} ms",
                    path.display(),
                    started.elapsed().as_secs_f64() * 1000.0
                );
                self.stream = Some(stream);
                self.error_message = None;
            }
            Err(e) => {
                log::error!("cannot start stream: {e}");
                self.error_message = Some(format!("Failed to start: {e}"));
            }
        }
    }

    fn start_stream(&self, path: &Path) -> ascii_stream::Result<StreamHandle> {
        let surface = surface_for(probe_size(path)?);
        let source = ImageSequenceSource::open(path, surface)?;
        let pipeline = Pipeline::new(self.config.clone(), surface, self.backend)?;
        AsciiStream::spawn(pipeline, source, self.fps)
    }

    /// Stop the stream and clear the output
    fn stop_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
        self.output_text.clear();
        self.grid_size = (0, 0);
        self.frames_received = 0;
        self.last_frame_at = None;
        self.measured_fps = 0.0;
        self.last_stream_error = None;
    }

    /// Hand the edited settings to the running stream
    fn push_settings(&mut self) {
        if let Some(stream) = &self.stream {
            stream.settings().submit(self.config.clone());
        }
    }

    /// Collect results produced since the last repaint
    fn poll_stream(&mut self) {
        let Some(stream) = &self.stream else {
            return;
        };
        for event in stream.poll() {
            match event {
                StreamEvent::Frame(grid) => {
                    self.output_text = grid.to_text();
                    self.grid_size = (grid.cols, grid.rows);
                    self.frames_received += 1;

                    let now = Instant::now();
                    if let Some(previous) = self.last_frame_at {
                        let instant_fps = 1.0 / now.duration_since(previous).as_secs_f32().max(1e-3);
                        self.measured_fps = self.measured_fps * 0.9 + instant_fps * 0.1;
                    }
                    self.last_frame_at = Some(now);
                }
                // The previous grid stays on screen
                StreamEvent::Error(e) => {
                    let message = e.to_string();
                    if self.last_stream_error.as_deref() != Some(message.as_str()) {
                        log::warn!("{message}");
                        self.error_message = Some(message.clone());
                        self.last_stream_error = Some(message);
                    }
                }
            }
        }
    }

    /// Render the control panel UI; returns (settings changed, restart needed)
    fn render_controls(&mut self, ui: &mut egui::Ui) -> (bool, bool) {
        let mut changed = false;
        let mut restart = false;

        ui.heading("Controls");
        ui.separator();

        ui.collapsing("Blocks", |ui| {
            changed |= ui
                .add(egui::Slider::new(&mut self.config.block.width, 2..=32).text("Width"))
                .on_hover_text("Source pixels per character, horizontally")
                .changed();

            changed |= ui
                .add(egui::Slider::new(&mut self.config.block.height, 4..=32).text("Height"))
                .on_hover_text("Source pixels per character, vertically")
                .changed();
        });

        ui.add_space(8.0);

        ui.collapsing("Characters", |ui| {
            changed |= ui
                .add(
                    egui::TextEdit::multiline(&mut self.config.characters)
                        .font(egui::TextStyle::Monospace)
                        .desired_rows(3),
                )
                .on_hover_text("Candidate characters, Latin-1 only")
                .changed();

            if ui.button("Reset to default set").clicked() {
                self.config.characters = ascii_stream::charset::default_characters();
                changed = true;
            }
        });

        ui.add_space(8.0);

        ui.collapsing("Image", |ui| {
            changed |= ui
                .add(
                    egui::Slider::new(&mut self.config.contrast_coefficient, -1.0..=1.0)
                        .text("Contrast"),
                )
                .on_hover_text("Spread of brightness around mid-gray; 0 leaves it unchanged")
                .changed();
        });

        ui.add_space(8.0);

        ui.collapsing("Playback", |ui| {
            if ui
                .add(egui::Slider::new(&mut self.fps, MIN_FPS..=MAX_FPS).text("FPS"))
                .changed()
                && let Some(stream) = &self.stream
            {
                stream.set_fps(self.fps);
            }

            let previous = self.backend;
            egui::ComboBox::from_label("Backend")
                .selected_text(self.backend.label())
                .show_ui(ui, |ui| {
                    for kind in BackendKind::available() {
                        ui.selectable_value(&mut self.backend, *kind, kind.label());
                    }
                });
            restart |= self.backend != previous;
        });

        ui.add_space(8.0);

        ui.collapsing("Display", |ui| {
            ui.add(egui::Slider::new(&mut self.text_size, 4.0..=20.0).text("Text size"));
        });

        ui.add_space(16.0);
        ui.separator();

        ui.horizontal(|ui| {
            ui.add_enabled_ui(self.source_path.is_some(), |ui| {
                if ui.button("Restart").clicked() {
                    restart = true;
                }
            });
            ui.add_enabled_ui(self.stream.is_some(), |ui| {
                if ui.button("Stop").clicked() {
                    self.stop_stream();
                }
            });
        });

        if let Some(stream) = &self.stream {
            ui.label(format!("Surface: {}", stream.surface()));
            ui.label(format!("Grid: {} x {}", self.grid_size.0, self.grid_size.1));
            ui.label(format!(
                "Frames: {} ({:.1} fps)",
                self.frames_received, self.measured_fps
            ));
        }

        (changed, restart)
    }
}

/// Compute surface for a source of `size`, scaled down to a bounded width
fn surface_for(size: FrameSize) -> FrameSize {
    if size.width <= MAX_SURFACE_WIDTH {
        return size;
    }
    let height = (u64::from(size.height) * u64::from(MAX_SURFACE_WIDTH) / u64::from(size.width)).max(1);
    FrameSize::new(MAX_SURFACE_WIDTH, height as u32)
}

impl eframe::App for AsciiApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_stream();

        // Top menu bar
        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::MenuBar::new().ui(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Open Image...").clicked() {
                        if let Some(path) = rfd::FileDialog::new()
                            .add_filter("Images", &["png", "jpg", "jpeg", "bmp", "gif", "webp"])
                            .pick_file()
                        {
                            self.open_source(path);
                        }
                        ui.close();
                    }

                    if ui.button("Open Frame Folder...").clicked() {
                        if let Some(path) = rfd::FileDialog::new().pick_folder() {
                            self.open_source(path);
                        }
                        ui.close();
                    }

                    if ui.button("Load Settings...").clicked() {
                        if let Some(path) = rfd::FileDialog::new()
                            .add_filter("TOML", &["toml"])
                            .pick_file()
                        {
                            self.load_config(&path);
                        }
                        ui.close();
                    }

                    if ui.button("Copy Output").clicked() {
                        ctx.copy_text(self.output_text.clone());
                        ui.close();
                    }

                    ui.separator();

                    if ui.button("Quit").clicked() {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });

                ui.menu_button("Help", |ui| {
                    if ui.button("About").clicked() {
                        self.error_message = Some(
                            "ASCII Stream\nFrames matched against glyph luminance fingerprints\n\nBuilt with Rust + egui".to_string()
                        );
                        ui.close();
                    }
                });
            });
        });

        // Left panel: Controls
        egui::SidePanel::left("control_panel")
            .resizable(true)
            .default_width(260.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    let (changed, restart) = self.render_controls(ui);

                    if restart {
                        self.restart_stream();
                    } else if changed {
                        self.last_stream_error = None;
                        self.push_settings();
                    }
                });
            });

        // Central panel: ASCII output
        egui::CentralPanel::default().show(ctx, |ui| {
            if let Some(ref msg) = self.error_message {
                ui.colored_label(egui::Color32::RED, msg);
                if ui.button("Clear Error").clicked() {
                    self.error_message = None;
                }
                ui.separator();
            }

            if self.output_text.is_empty() {
                ui.centered_and_justified(|ui| {
                    ui.label("Open an image or a folder of frames from the File menu");
                });
                return;
            }

            egui::ScrollArea::both().show(ui, |ui| {
                ui.add(
                    egui::Label::new(
                        egui::RichText::new(&self.output_text)
                            .monospace()
                            .size(self.text_size)
                            .color(egui::Color32::from_rgb(0, 255, 0)),
                    )
                    .wrap_mode(egui::TextWrapMode::Extend),
                );
            });
        });

        // Keep polling while frames are coming in
        if self.stream.is_some() {
            ctx.request_repaint_after(Duration::from_millis(1000 / u64::from(self.fps.max(1))));
        }
    }
}
