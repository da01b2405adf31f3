//! Animated GIF export of rendered frames.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, Frame, RgbImage};
use log::{info, warn};

use crate::error::Result;

/// Write `frames` as a looping GIF played back at `fps`. Nothing is
/// written when there are no frames.
pub fn save_gif(frames: &[RgbImage], fps: u32, path: &Path) -> Result<()> {
    if frames.is_empty() {
        warn!("No frames to write to {}", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let delay = Delay::from_numer_denom_ms(1000, fps.max(1));
    let mut encoder = GifEncoder::new(BufWriter::new(File::create(path)?));
    encoder.set_repeat(Repeat::Infinite)?;
    for frame in frames {
        let rgba = DynamicImage::ImageRgb8(frame.clone()).to_rgba8();
        encoder.encode_frame(Frame::from_parts(rgba, 0, 0, delay))?;
    }
    info!("Saved {} frames to {}", frames.len(), path.display());
    Ok(())
}
