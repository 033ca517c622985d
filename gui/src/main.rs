mod app;

use app::AsciiApp;
use eframe::egui;
use std::path::PathBuf;

fn main() -> Result<(), eframe::Error> {
    // Configure logging
    env_logger::init();

    // Optional settings file: ascii-stream [config.toml]
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    // Configure viewport/window
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 720.0])
            .with_min_inner_size([800.0, 600.0])
            .with_title("ASCII Stream")
            .with_icon(load_icon()),
        ..Default::default()
    };

    eframe::run_native(
        "ASCII Stream",
        options,
        Box::new(move |cc| Ok(Box::new(AsciiApp::new(cc, config_path.as_deref())))),
    )
}

/// Application icon: rows of bright glyph-like dots on black
fn load_icon() -> egui::IconData {
    let icon_size = 32;
    let mut pixels = vec![0u8; icon_size * icon_size * 4];

    for y in 0..icon_size {
        for x in 0..icon_size {
            let idx = (y * icon_size + x) * 4;

            // 4x8 character cells with a vertical stroke in each
            let in_stroke = x % 4 == 1 && y % 8 >= 1 && y % 8 <= 5;
            let level = if in_stroke { 255 } else { 0 };

            pixels[idx] = 0;
            pixels[idx + 1] = level;
            pixels[idx + 2] = 0;
            pixels[idx + 3] = 255;
        }
    }

    egui::IconData {
        rgba: pixels,
        width: icon_size as u32,
        height: icon_size as u32,
    }
}
