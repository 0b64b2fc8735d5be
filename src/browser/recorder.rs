//! Frame-sequence video recorder.
//!
//! Backends that cannot record video themselves get a recorder attached by
//! the session layer: a frame is pushed after every page interaction and
//! streamed as an animated GIF into the test's video directory. Only the
//! newest frame is held in memory. The file is written under a temporary name
//! and renamed once the context closes, so a reader never sees a partial
//! recording.

use image::codecs::gif::GifEncoder;
use image::imageops::{self, FilterType};
use image::{Delay, Frame, RgbaImage};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use super::types::{DriverResult, Viewport};

/// Upper bound on recorded frames; later frames replace the last one
pub const MAX_FRAMES: usize = 240;

/// Display time of each frame
const FRAME_DELAY_MS: u32 = 500;

/// Quantization speed of the GIF encoder (1 = best quality, 30 = fastest)
const GIF_SPEED: i32 = 20;

pub const VIDEO_EXTENSION: &str = "gif";

pub struct FrameRecorder {
    dir: PathBuf,
    size: Viewport,
    partial: PathBuf,
    path: PathBuf,
    /// Opened on the first written frame
    encoder: Option<GifEncoder<BufWriter<File>>>,
    /// Newest frame, written once the next one arrives or on finish
    pending: Option<RgbaImage>,
    written: usize,
}

impl std::fmt::Debug for FrameRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRecorder")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("frames", &self.frame_count())
            .finish()
    }
}

impl FrameRecorder {
    pub fn new(dir: impl Into<PathBuf>, size: Viewport) -> Self {
        let dir = dir.into();
        let name = format!("{}.{}", uuid::Uuid::new_v4().simple(), VIDEO_EXTENSION);
        Self {
            partial: dir.join(format!("{name}.part")),
            path: dir.join(name),
            dir,
            size,
            encoder: None,
            pending: None,
            written: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Frames the finished recording will contain
    pub fn frame_count(&self) -> usize {
        self.written + usize::from(self.pending.is_some())
    }

    /// Decoded frames currently held in memory (never more than one)
    pub fn buffered_frames(&self) -> usize {
        usize::from(self.pending.is_some())
    }

    /// Decode a PNG screenshot and append it as a frame scaled to the video size
    pub fn push_png(&mut self, png: &[u8]) -> DriverResult<()> {
        let image = image::load_from_memory(png)?.to_rgba8();
        let frame = if image.dimensions() == (self.size.width, self.size.height) {
            image
        } else {
            imageops::resize(&image, self.size.width, self.size.height, FilterType::Triangle)
        };
        if let Some(previous) = self.pending.take() {
            if self.written + 1 < MAX_FRAMES {
                self.write_frame(previous)?;
            }
        }
        self.pending = Some(frame);
        Ok(())
    }

    fn write_frame(&mut self, frame: RgbaImage) -> DriverResult<()> {
        if self.encoder.is_none() {
            fs::create_dir_all(&self.dir)?;
            let file = File::create(&self.partial)?;
            self.encoder = Some(GifEncoder::new_with_speed(BufWriter::new(file), GIF_SPEED));
        }
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.encode_frame(Frame::from_parts(frame, 0, 0, Delay::from_numer_denom_ms(FRAME_DELAY_MS, 1)))?;
            self.written += 1;
        }
        Ok(())
    }

    /// Complete the recording and move it to its final name.
    ///
    /// Returns `None` when no frame was ever pushed.
    pub fn finish(mut self) -> DriverResult<Option<PathBuf>> {
        if let Some(last) = self.pending.take() {
            self.write_frame(last)?;
        }
        let Some(encoder) = self.encoder.take() else {
            return Ok(None);
        };
        // Dropping the encoder writes the GIF trailer and flushes the file
        drop(encoder);
        fs::rename(&self.partial, &self.path)?;
        Ok(Some(self.path.clone()))
    }
}

impl Drop for FrameRecorder {
    fn drop(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            drop(encoder);
            let _ = fs::remove_file(&self.partial);
        }
    }
}
