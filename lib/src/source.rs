//! Frame sources feeding the pipeline
//!
//! A source produces frames of a fixed size. [`spawn_source`] drives any source
//! on its own thread at a configurable rate and pushes the frames into a
//! channel, in order.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use image::{RgbaImage, imageops};

use crate::error::{Error, Result};
use crate::frame::{FrameSize, OwnedFrame, PixelFormat};

/// Frame rate limits offered by front ends
pub const MIN_FPS: u32 = 5;
pub const MAX_FPS: u32 = 100;
pub const DEFAULT_FPS: u32 = 30;

/// Something that produces frames of one fixed size
pub trait FrameSource: Send {
    fn size(&self) -> FrameSize;

    /// The next frame, or `None` once the source is exhausted
    fn next_frame(&mut self) -> Result<Option<OwnedFrame>>;
}

/// Decoded still images played back in a loop
///
/// A single image repeats forever; a directory plays its images in file-name
/// order and starts over after the last one.
pub struct ImageSequenceSource {
    size: FrameSize,
    frames: Vec<OwnedFrame>,
    cursor: usize,
}

impl ImageSequenceSource {
    /// Loads an image file or every image in a directory, resized to `size`
    ///
    /// # Errors
    /// `Source` if the path holds no decodable image.
    pub fn open(path: &Path, size: FrameSize) -> Result<Self> {
        let paths = image_paths(path)?;
        let frames = paths
            .iter()
            .map(|p| load_frame(p, size))
            .collect::<Result<Vec<_>>>()?;
        log::info!(
            "loaded {} frame(s) from {} at {}",
            frames.len(),
            path.display(),
            size
        );
        Self::from_frames(frames, size)
    }

    /// Plays already decoded images, resizing those that are not `size`
    pub fn from_images(images: Vec<RgbaImage>, size: FrameSize) -> Result<Self> {
        let frames = images
            .into_iter()
            .map(|image| owned_rgba(fit_image(image, size)))
            .collect();
        Self::from_frames(frames, size)
    }

    fn from_frames(frames: Vec<OwnedFrame>, size: FrameSize) -> Result<Self> {
        if frames.is_empty() {
            return Err(Error::Source("no frames to play".to_string()));
        }
        Ok(Self {
            size,
            frames,
            cursor: 0,
        })
    }

    /// Number of distinct frames in one loop
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn size(&self) -> FrameSize {
        self.size
    }

    fn next_frame(&mut self) -> Result<Option<OwnedFrame>> {
        let frame = self.frames[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.frames.len();
        Ok(Some(frame))
    }
}

/// Dimensions of the image at `path`, or of the first image in a directory
pub fn probe_size(path: &Path) -> Result<FrameSize> {
    let paths = image_paths(path)?;
    let first = &paths[0];
    let (width, height) = image::image_dimensions(first)
        .map_err(|e| Error::Source(format!("cannot read {}: {e}", first.display())))?;
    Ok(FrameSize::new(width, height))
}

/// Image files under `path`, sorted by file name
fn image_paths(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let entries = std::fs::read_dir(path)
        .map_err(|e| Error::Source(format!("cannot list {}: {e}", path.display())))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && image::ImageFormat::from_path(p).is_ok())
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(Error::Source(format!(
            "no images found in {}",
            path.display()
        )));
    }
    Ok(paths)
}

fn load_frame(path: &Path, size: FrameSize) -> Result<OwnedFrame> {
    let image = image::open(path)
        .map_err(|e| Error::Source(format!("cannot decode {}: {e}", path.display())))?
        .to_rgba8();
    Ok(owned_rgba(fit_image(image, size)))
}

fn fit_image(image: RgbaImage, size: FrameSize) -> RgbaImage {
    if image.dimensions() == (size.width, size.height) {
        return image;
    }
    imageops::resize(
        &image,
        size.width,
        size.height,
        imageops::FilterType::Lanczos3,
    )
}

fn owned_rgba(image: RgbaImage) -> OwnedFrame {
    let (width, height) = image.dimensions();
    OwnedFrame {
        pixels: image.into_raw(),
        size: FrameSize::new(width, height),
        format: PixelFormat::Rgba,
    }
}

/// Controls a source running on its own thread
pub struct SourceHandle {
    fps: Arc<AtomicU32>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SourceHandle {
    pub fn fps(&self) -> u32 {
        self.fps.load(Ordering::Relaxed)
    }

    /// Changes the frame rate from the next frame on. Zero is ignored.
    pub fn set_fps(&self, fps: u32) {
        if fps == 0 {
            return;
        }
        self.fps.store(fps, Ordering::Relaxed);
        if let Some(thread) = &self.thread {
            thread.thread().unpark();
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops producing frames and waits for the thread to exit
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                log::error!("frame source thread panicked");
            }
        }
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs `source` on a new thread, sending one frame every `1000 / fps` ms
///
/// The thread ends when the source is exhausted or fails, when the receiver
/// is dropped, or on [`SourceHandle::stop`]. A source error is sent once
/// before the thread exits.
pub fn spawn_source<S>(
    mut source: S,
    fps: u32,
    sender: Sender<Result<OwnedFrame>>,
) -> Result<SourceHandle>
where
    S: FrameSource + 'static,
{
    if fps == 0 {
        return Err(Error::InvalidConfig("fps must be positive".to_string()));
    }

    let fps = Arc::new(AtomicU32::new(fps));
    let stop = Arc::new(AtomicBool::new(false));

    let thread = {
        let fps = Arc::clone(&fps);
        let stop = Arc::clone(&stop);
        thread::Builder::new()
            .name("frame-source".to_string())
            .spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    let started = Instant::now();
                    let message = match source.next_frame() {
                        Ok(Some(frame)) => Ok(frame),
                        Ok(None) => break,
                        Err(e) => Err(e),
                    };
                    let failed = message.is_err();
                    if sender.send(message).is_err() || failed {
                        break;
                    }

                    let interval = Duration::from_millis(1000 / u64::from(fps.load(Ordering::Relaxed)));
                    let deadline = started + interval;
                    // Woken early by stop() and set_fps()
                    while !stop.load(Ordering::SeqCst) {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        thread::park_timeout(deadline - now);
                    }
                }
                log::debug!("frame source stopped");
            })
            .map_err(|e| Error::Source(format!("cannot start source thread: {e}")))?
    };

    Ok(SourceHandle {
        fps,
        stop,
        thread: Some(thread),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct Counter {
        remaining: u8,
    }

    impl FrameSource for Counter {
        fn size(&self) -> FrameSize {
            FrameSize::new(1, 1)
        }

        fn next_frame(&mut self) -> Result<Option<OwnedFrame>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(OwnedFrame {
                pixels: vec![self.remaining],
                size: self.size(),
                format: PixelFormat::Luma,
            }))
        }
    }

    fn checker(size: u32, phase: u8) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            let v = if (x + y + u32::from(phase)) % 2 == 0 { 255 } else { 0 };
            image::Rgba([v, v, v, 255])
        })
    }

    #[test]
    fn test_sequence_loops_in_order() {
        let size = FrameSize::new(4, 4);
        let mut source =
            ImageSequenceSource::from_images(vec![checker(4, 0), checker(4, 1)], size).unwrap();
        let a = source.next_frame().unwrap().unwrap();
        let b = source.next_frame().unwrap().unwrap();
        let c = source.next_frame().unwrap().unwrap();
        assert_ne!(a.pixels, b.pixels);
        assert_eq!(a.pixels, c.pixels);
        assert_eq!(a.size, size);
    }

    #[test]
    fn test_sequence_resizes_to_surface() {
        let size = FrameSize::new(3, 5);
        let mut source = ImageSequenceSource::from_images(vec![checker(8, 0)], size).unwrap();
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.size, size);
        assert!(frame.as_frame().check_len().is_ok());
    }

    #[test]
    fn test_open_directory_sorted() {
        let dir = tempfile::tempdir().unwrap();
        checker(4, 1).save(dir.path().join("b.png")).unwrap();
        checker(4, 0).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let size = FrameSize::new(4, 4);
        let mut source = ImageSequenceSource::open(dir.path(), size).unwrap();
        assert_eq!(source.len(), 2);
        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.pixels, checker(4, 0).into_raw());

        assert_eq!(probe_size(dir.path()).unwrap(), size);
    }

    #[test]
    fn test_open_empty_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ImageSequenceSource::open(dir.path(), FrameSize::new(4, 4))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Source(_)));
    }

    #[test]
    fn test_spawned_source_delivers_in_order() {
        let (tx, rx) = mpsc::channel();
        let mut handle = spawn_source(Counter { remaining: 3 }, MAX_FPS, tx).unwrap();

        let values: Vec<u8> = rx.iter().map(|frame| frame.unwrap().pixels[0]).collect();
        assert_eq!(values, vec![2, 1, 0]);
        handle.stop();
        assert!(!handle.is_running());
    }

    #[test]
    fn test_set_fps_ignores_zero() {
        let (tx, _rx) = mpsc::channel();
        let mut handle = spawn_source(Counter { remaining: 0 }, 10, tx).unwrap();
        handle.set_fps(0);
        assert_eq!(handle.fps(), 10);
        handle.set_fps(60);
        assert_eq!(handle.fps(), 60);
        handle.stop();

        let (tx, _rx) = mpsc::channel();
        assert!(spawn_source(Counter { remaining: 1 }, 0, tx).is_err());
    }
}
