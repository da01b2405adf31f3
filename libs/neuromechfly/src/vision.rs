//! Compound eye sampling.
//!
//! Each eye camera renders a raw image that is pooled onto a hexagonal
//! lattice of ommatidia. The pixel to ommatidium map depends only on the
//! image size and the retina size, so it is computed once per environment.

use image::{Rgb, RgbImage};
use nalgebra::DMatrix;

use crate::error::{NmfError, Result};

pub const FOVY_PER_EYE: f64 = 150.0;
pub const RAW_IMG_HEIGHT_PX: u32 = 512;
pub const RAW_IMG_WIDTH_PX: u32 = 450;
pub const RETINA_SIDE_LEN_HEX: usize = 16;
pub const NUM_OMMATIDIA_PER_EYE: usize =
    3 * RETINA_SIDE_LEN_HEX * RETINA_SIDE_LEN_HEX - 3 * RETINA_SIDE_LEN_HEX + 1;

/// Photoreceptor channels per ommatidium.
pub const NUM_CHANNELS: usize = 2;

/// Eye camera offset from the thorax frame, left then right.
pub const EYE_POSITIONS: [[f64; 3]; 2] = [[0.75, 0.3, 1.32], [0.75, -0.3, 1.32]];
/// Intrinsic xyz Euler angles in radians, left then right.
pub const EYE_ORIENTATIONS: [[f64; 3]; 2] = [[1.57, -0.4676, 0.0], [-1.57, -0.4676, 3.14]];

pub const EYE_CAMERAS: [&str; 2] = ["camera_LEye", "camera_REye"];

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Axial coordinates of every hexagon of a retina with `side` hexagons per
/// edge, row by row.
fn hex_cells(side: usize) -> Vec<(i32, i32)> {
    let n = side as i32 - 1;
    let mut cells = Vec::new();
    for r in -n..=n {
        for q in (-n).max(-n - r)..=n.min(n - r) {
            cells.push((q, r));
        }
    }
    cells
}

fn cube_round(q: f64, r: f64) -> (i32, i32) {
    let s = -q - r;
    let (mut rq, mut rr, rs) = (q.round(), r.round(), s.round());
    let (dq, dr, ds) = ((rq - q).abs(), (rr - r).abs(), (rs - s).abs());
    if dq > dr && dq > ds {
        rq = -rr - rs;
    } else if dr > ds {
        rr = -rq - rs;
    }
    (rq as i32, rr as i32)
}

/// Pixel to ommatidium assignment for one eye.
#[derive(Clone, Debug)]
pub struct OmmatidiaMap {
    width: u32,
    height: u32,
    /// Ommatidium of each pixel, row-major; `None` outside the retina.
    ids: Vec<Option<u16>>,
    pixels_per_ommatidium: Vec<usize>,
}

impl Default for OmmatidiaMap {
    fn default() -> Self {
        Self::layout(RAW_IMG_WIDTH_PX, RAW_IMG_HEIGHT_PX, RETINA_SIDE_LEN_HEX)
    }
}

impl OmmatidiaMap {
    /// Lay a pointy-top hexagonal retina with `side` cells per edge over
    /// the centre of a `width` x `height` image, as large as fits.
    pub fn new(width: u32, height: u32, side: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(NmfError::config(format!("empty eye image {width}x{height}")));
        }
        if side == 0 || 3 * side * (side - 1) + 1 > usize::from(u16::MAX) + 1 {
            return Err(NmfError::config(format!("unsupported retina side length {side}")));
        }
        Ok(Self::layout(width, height, side))
    }

    fn layout(width: u32, height: u32, side: usize) -> Self {
        let cells = hex_cells(side);
        let n = side as i32 - 1;
        let index = |q: i32, r: i32| -> Option<u16> {
            if q.abs().max(r.abs()).max((q + r).abs()) > n {
                return None;
            }
            // Rows above r hold a fixed number of cells.
            let before: i32 = (-n..r).map(|row| 2 * n + 1 - row.abs()).sum();
            let start = (-n).max(-n - r);
            Some((before + q - start) as u16)
        };

        let w = width as f64;
        let h = height as f64;
        let size = (w / (SQRT_3 * (2 * side - 1) as f64)).min(h / (1.5 * (2 * side - 2) as f64 + 2.0));

        let mut ids = Vec::with_capacity((width * height) as usize);
        let mut pixels_per_ommatidium = vec![0; cells.len()];
        for py in 0..height {
            for px in 0..width {
                let x = px as f64 + 0.5 - w / 2.0;
                let y = py as f64 + 0.5 - h / 2.0;
                let q = (SQRT_3 / 3.0 * x - y / 3.0) / size;
                let r = (2.0 / 3.0 * y) / size;
                let (q, r) = cube_round(q, r);
                let id = index(q, r);
                if let Some(id) = id {
                    pixels_per_ommatidium[id as usize] += 1;
                }
                ids.push(id);
            }
        }
        Self {
            width,
            height,
            ids,
            pixels_per_ommatidium,
        }
    }

    pub fn num_ommatidia(&self) -> usize {
        self.pixels_per_ommatidium.len()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn ommatidium_at(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.ids[(y * self.width + x) as usize].map(usize::from)
    }

    pub fn pixels_per_ommatidium(&self) -> &[usize] {
        &self.pixels_per_ommatidium
    }

    /// Mean intensity per ommatidium, in [0, 1]. Column 0 pools the green
    /// channel (yellow-type photoreceptors), column 1 the blue channel
    /// (pale-type).
    pub fn readout(&self, image: &RgbImage) -> DMatrix<f64> {
        let mut sums = DMatrix::zeros(self.num_ommatidia(), NUM_CHANNELS);
        for (x, y, pixel) in image.enumerate_pixels() {
            if let Some(id) = self.ommatidium_at(x, y) {
                sums[(id, 0)] += pixel[1] as f64;
                sums[(id, 1)] += pixel[2] as f64;
            }
        }
        for (id, &count) in self.pixels_per_ommatidium.iter().enumerate() {
            if count > 0 {
                let scale = 1.0 / (255.0 * count as f64);
                sums[(id, 0)] *= scale;
                sums[(id, 1)] *= scale;
            }
        }
        sums
    }

    /// Paint a readout back onto the retina for inspection. Each pixel gets
    /// the mean of its ommatidium's channels; pixels outside the retina
    /// stay black.
    pub fn hex_pixels_to_human_readable(&self, readout: &DMatrix<f64>) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| match self.ommatidium_at(x, y) {
            Some(id) if id < readout.nrows() => {
                let mean = readout.row(id).mean();
                let v = (mean.clamp(0.0, 1.0) * 255.0).round() as u8;
                Rgb([v, v, v])
            }
            _ => Rgb([0, 0, 0]),
        })
    }
}
