/// Still image example: print one picture as ASCII art
///
/// Usage: `cargo run --example still_image -- [image] [config.toml]`
///
/// Without an image a test picture (a bright disc on a gray background with
/// a diagonal line) is generated instead.
use std::path::Path;

use ascii_stream::{BackendKind, Frame, FrameSize, Pipeline, RenderConfig};
use image::{Rgba, RgbaImage};

fn test_image(width: u32, height: u32) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(width, height, Rgba([100, 100, 100, 255]));

    let center_x = width as f32 / 2.0;
    let center_y = height as f32 / 2.0;
    let radius = height as f32 / 3.0;

    for y in 0..height {
        for x in 0..width {
            let dx = x as f32 - center_x;
            let dy = y as f32 - center_y;
            let dist = (dx * dx + dy * dy).sqrt();

            if dist < radius {
                img.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            } else if (dist - radius).abs() < 5.0 {
                img.put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
    }

    // Diagonal line
    for i in 0..width.min(height) {
        img.put_pixel(i, i, Rgba([255, 0, 0, 255]));
    }

    img
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let img = match args.first() {
        Some(path) => image::open(path).expect("Failed to open image").to_rgba8(),
        None => test_image(640, 320),
    };
    let config = match args.get(1) {
        Some(path) => RenderConfig::load(Path::new(path)).expect("Failed to load config"),
        None => RenderConfig::default(),
    };

    let (width, height) = img.dimensions();
    eprintln!("Input: {}x{}, block {}", width, height, config.block);

    let mut pipeline = Pipeline::new(config, FrameSize::new(width, height), BackendKind::Cpu)
        .expect("Failed to create pipeline");
    let frame = Frame::rgba(img.as_raw(), width, height).expect("Invalid frame");
    let grid = pipeline.process_frame(&frame).expect("Failed to process frame");

    eprintln!("Output: {} columns x {} rows", grid.cols, grid.rows);
    println!("{}", grid.to_text());
}
