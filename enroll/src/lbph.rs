//! Local Binary Patterns Histograms face model.
//!
//! Each training image becomes an 8x8 grid of 256-bin LBP histograms.
//! Prediction is nearest neighbour by chi-squared distance.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const RADIUS: u32 = 1;
pub const NEIGHBORS: u32 = 8;
pub const GRID_X: u32 = 8;
pub const GRID_Y: u32 = 8;
const BINS: usize = 256;

/// Clockwise from the top-left neighbour.
const OFFSETS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
];

#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("no face images to train on")]
    NoSamples,
    #[error("image {0}x{1} is too small for the 8x8 LBP grid")]
    ImageTooSmall(u32, u32),
    #[error("model file {0}: {1}")]
    Io(PathBuf, io::Error),
    #[error("model file is not valid: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sample {
    label: i64,
    histogram: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LbphModel {
    radius: u32,
    neighbors: u32,
    grid_x: u32,
    grid_y: u32,
    samples: Vec<Sample>,
}

impl LbphModel {
    pub fn train(samples: &[(i64, GrayImage)]) -> Result<Self, TrainError> {
        if samples.is_empty() {
            return Err(TrainError::NoSamples);
        }
        let samples = samples
            .iter()
            .map(|(label, img)| {
                Ok(Sample {
                    label: *label,
                    histogram: spatial_histogram(img)?,
                })
            })
            .collect::<Result<Vec<_>, TrainError>>()?;
        debug!(samples = samples.len(), "trained LBPH model");
        Ok(Self {
            radius: RADIUS,
            neighbors: NEIGHBORS,
            grid_x: GRID_X,
            grid_y: GRID_Y,
            samples,
        })
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Closest training label and its chi-squared distance.
    pub fn predict(&self, img: &GrayImage) -> Result<Option<(i64, f64)>, TrainError> {
        let query = spatial_histogram(img)?;
        Ok(self
            .samples
            .iter()
            .map(|s| (s.label, chi_squared(&s.histogram, &query)))
            .min_by(|a, b| a.1.total_cmp(&b.1)))
    }

    /// Write the model as JSON, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> Result<(), TrainError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| TrainError::Io(parent.to_path_buf(), e))?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec(self)?;
        fs::write(&tmp, json).map_err(|e| TrainError::Io(tmp.clone(), e))?;
        fs::rename(&tmp, path).map_err(|e| TrainError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), samples = self.samples.len(), "saved LBPH model");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, TrainError> {
        let bytes = fs::read(path).map_err(|e| TrainError::Io(path.to_path_buf(), e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// LBP code image, one pixel smaller on every side.
pub fn lbp_image(img: &GrayImage) -> GrayImage {
    let (w, h) = img.dimensions();
    let r = RADIUS as i32;
    if w <= 2 * RADIUS || h <= 2 * RADIUS {
        return GrayImage::new(0, 0);
    }
    GrayImage::from_fn(w - 2 * RADIUS, h - 2 * RADIUS, |x, y| {
        let (cx, cy) = (x as i32 + r, y as i32 + r);
        let center = img.get_pixel(cx as u32, cy as u32).0[0];
        let mut code = 0u8;
        for (bit, (dx, dy)) in OFFSETS.iter().enumerate() {
            let neighbour = img.get_pixel((cx + dx * r) as u32, (cy + dy * r) as u32).0[0];
            if neighbour >= center {
                code |= 1 << (7 - bit);
            }
        }
        image::Luma([code])
    })
}

/// Concatenated per-cell LBP histograms, each cell normalised to sum 1.
pub fn spatial_histogram(img: &GrayImage) -> Result<Vec<f32>, TrainError> {
    let lbp = lbp_image(img);
    let (w, h) = lbp.dimensions();
    if w < GRID_X || h < GRID_Y {
        return Err(TrainError::ImageTooSmall(img.width(), img.height()));
    }
    let (cell_w, cell_h) = (w / GRID_X, h / GRID_Y);

    let mut hist = vec![0f32; (GRID_X * GRID_Y) as usize * BINS];
    for gy in 0..GRID_Y {
        for gx in 0..GRID_X {
            let cell = &mut hist[((gy * GRID_X + gx) as usize) * BINS..][..BINS];
            for y in gy * cell_h..(gy + 1) * cell_h {
                for x in gx * cell_w..(gx + 1) * cell_w {
                    cell[lbp.get_pixel(x, y).0[0] as usize] += 1.0;
                }
            }
            let total = (cell_w * cell_h) as f32;
            cell.iter_mut().for_each(|v| *v /= total);
        }
    }
    Ok(hist)
}

/// Chi-squared distance between two histograms.
fn chi_squared(a: &[f32], b: &[f32]) -> f64 {
    let mut sum = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        let denom = (x + y) as f64;
        if denom > 1e-10 {
            let diff = (x - y) as f64;
            sum += (diff * diff) / denom;
        }
    }
    sum
}
