//! Local binary pattern histogram face model.
//!
//! Each normalized face is reduced to a grid of 256-bin LBP histograms. A
//! prediction is the label of the nearest training histogram under the
//! chi-square distance, and that distance is the confidence: lower is a
//! closer match.

use crate::types::NO_LABEL;
use crate::vision::{FaceModel, Prediction, TrainingSample, Trainer, VisionError};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

const BINS: usize = 256;

/// Offsets of the eight neighbours, clockwise from top-left.
const NEIGHBOURS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sample {
    label: i64,
    histogram: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LbphModel {
    grid_x: u32,
    grid_y: u32,
    samples: Vec<Sample>,
}

impl LbphModel {
    pub fn samples(&self) -> usize {
        self.samples.len()
    }

    pub fn load(path: &Path) -> Result<Self, VisionError> {
        if !path.exists() {
            return Err(VisionError::ModelNotFound(path.display().to_string()));
        }
        let reader = BufReader::new(File::open(path)?);
        let model: Self = serde_json::from_reader(reader)?;
        if model.grid_x == 0 || model.grid_y == 0 {
            return Err(VisionError::TrainingFailed(format!(
                "{}: invalid grid {}x{}",
                path.display(),
                model.grid_x,
                model.grid_y
            )));
        }
        Ok(model)
    }
}

impl FaceModel for LbphModel {
    fn predict(&self, face: &GrayImage) -> Prediction {
        let query = spatial_histogram(face, self.grid_x, self.grid_y);
        self.samples
            .iter()
            .map(|s| (s.label, chi_square(&s.histogram, &query)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(label, confidence)| Prediction { label, confidence })
            .unwrap_or(Prediction {
                label: NO_LABEL,
                confidence: f64::MAX,
            })
    }

    fn save(&self, path: &Path) -> Result<(), VisionError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        tracing::debug!(path = %path.display(), samples = self.samples.len(), "model saved");
        Ok(())
    }
}

/// Trains [`LbphModel`]s with an 8x8 cell grid by default.
#[derive(Debug, Clone)]
pub struct LbphTrainer {
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphTrainer {
    fn default() -> Self {
        Self { grid_x: 8, grid_y: 8 }
    }
}

impl Trainer for LbphTrainer {
    fn train(&self, samples: &[TrainingSample]) -> Result<Arc<dyn FaceModel>, VisionError> {
        if samples.is_empty() {
            return Err(VisionError::TrainingFailed("no training samples".into()));
        }
        let samples = samples
            .iter()
            .map(|s| Sample {
                label: s.label,
                histogram: spatial_histogram(&s.face, self.grid_x, self.grid_y),
            })
            .collect();
        Ok(Arc::new(LbphModel {
            grid_x: self.grid_x,
            grid_y: self.grid_y,
            samples,
        }))
    }

    fn load(&self, path: &Path) -> Result<Arc<dyn FaceModel>, VisionError> {
        Ok(Arc::new(LbphModel::load(path)?))
    }
}

/// Radius-1, 8-neighbour LBP codes. The one-pixel border is dropped.
fn lbp_codes(image: &GrayImage) -> (u32, u32, Vec<u8>) {
    let (w, h) = image.dimensions();
    if w < 3 || h < 3 {
        return (0, 0, Vec::new());
    }
    let (ow, oh) = (w - 2, h - 2);
    let mut codes = Vec::with_capacity((ow * oh) as usize);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = image.get_pixel(x, y)[0];
            let mut code = 0u8;
            for (bit, (dx, dy)) in NEIGHBOURS.iter().enumerate() {
                let nx = (x as i32 + dx) as u32;
                let ny = (y as i32 + dy) as u32;
                if image.get_pixel(nx, ny)[0] >= center {
                    code |= 1 << (7 - bit);
                }
            }
            codes.push(code);
        }
    }
    (ow, oh, codes)
}

/// Concatenated per-cell histograms, each normalized to sum to one.
fn spatial_histogram(image: &GrayImage, grid_x: u32, grid_y: u32) -> Vec<f32> {
    let cells = (grid_x * grid_y) as usize;
    let mut histogram = vec![0f32; cells * BINS];
    let (w, h, codes) = lbp_codes(image);
    if w == 0 || h == 0 {
        return histogram;
    }
    let cell_w = (w / grid_x).max(1);
    let cell_h = (h / grid_y).max(1);

    for cy in 0..grid_y {
        for cx in 0..grid_x {
            let base = ((cy * grid_x + cx) as usize) * BINS;
            let cell = &mut histogram[base..base + BINS];
            let mut total = 0f32;
            for y in (cy * cell_h)..((cy + 1) * cell_h).min(h) {
                for x in (cx * cell_w)..((cx + 1) * cell_w).min(w) {
                    cell[codes[(y * w + x) as usize] as usize] += 1.0;
                    total += 1.0;
                }
            }
            if total > 0.0 {
                cell.iter_mut().for_each(|v| *v /= total);
            }
        }
    }
    histogram
}

/// Symmetric chi-square: `sum 2(a-b)^2 / (a+b)` over bins either side uses.
fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&a, &b)| (f64::from(a), f64::from(b)))
        .filter(|(a, b)| a + b > f64::from(f32::EPSILON))
        .map(|(a, b)| 2.0 * (a - b) * (a - b) / (a + b))
        .sum()
}
