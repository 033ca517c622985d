/// Streaming example: a moving gradient rendered live in the terminal
///
/// Usage: `cargo run --example stream_demo -- [fps] [seconds]`
use std::time::{Duration, Instant};

use ascii_stream::{
    AsciiStream, BackendKind, BlockSize, FrameSize, FrameSource, OwnedFrame, PixelFormat,
    Pipeline, RenderConfig, StreamEvent,
};

/// Diagonal luminance bands drifting one step per frame
struct MovingGradient {
    size: FrameSize,
    phase: u32,
}

impl FrameSource for MovingGradient {
    fn size(&self) -> FrameSize {
        self.size
    }

    fn next_frame(&mut self) -> ascii_stream::Result<Option<OwnedFrame>> {
        let FrameSize { width, height } = self.size;
        let mut pixels = Vec::with_capacity(self.size.pixel_count());
        for y in 0..height {
            for x in 0..width {
                pixels.push(((x + y * 2 + self.phase * 4) % 256) as u8);
            }
        }
        self.phase = self.phase.wrapping_add(1);
        Ok(Some(OwnedFrame {
            pixels,
            size: self.size,
            format: PixelFormat::Luma,
        }))
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let fps: u32 = args.first().and_then(|s| s.parse().ok()).unwrap_or(15);
    let seconds: u64 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(5);

    let size = FrameSize::new(640, 320);
    let config = RenderConfig {
        characters: " .:-=+*#%@".to_string(),
        block: BlockSize::new(8, 16),
        ..RenderConfig::default()
    };

    let pipeline =
        Pipeline::new(config, size, BackendKind::Cpu).expect("Failed to create pipeline");
    let mut stream = AsciiStream::spawn(pipeline, MovingGradient { size, phase: 0 }, fps)
        .expect("Failed to start stream");

    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut frames = 0;
    while Instant::now() < deadline {
        match stream.events().recv_timeout(Duration::from_millis(500)) {
            Ok(StreamEvent::Frame(grid)) => {
                frames += 1;
                // Clear the screen and home the cursor before each frame
                println!("\x1b[2J\x1b[H{}", grid.to_text());
            }
            Ok(StreamEvent::Error(e)) => eprintln!("frame failed: {e}"),
            Err(_) => {}
        }
    }

    stream.stop();
    println!("{frames} frames in {seconds} s");
}
