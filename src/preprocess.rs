//! Sketch preprocessing: turn a high-resolution ink grid into the network's
//! input vector by normalizing every pixel and averaging square blocks.

use std::path::Path;

use image::imageops::{self, FilterType};
use ndarray::{Array1, Array2, Axis};

use crate::config::ImageConfig;
use crate::data_loader::normalize_pixel;
use crate::error::{Error, Result};

/// Parse a comma-separated pixel string, as posted by the sketchpad.
pub fn parse_pixel_string(input: &str) -> Result<Vec<f64>> {
    input
        .split(',')
        .enumerate()
        .map(|(i, field)| {
            let value: f64 = field.trim().parse().map_err(|_| {
                Error::InputValidation(format!("pixel {i} ({field:?}) is not a number"))
            })?;
            if !(0.0..=255.0).contains(&value) {
                return Err(Error::InputValidation(format!(
                    "pixel {i} is {value}, outside 0..=255"
                )));
            }
            Ok(value)
        })
        .collect()
}

/// Normalize a `source_side`² grid and pool it down to `target_side`² by
/// block means, flattened row-major.
pub fn compress_image(raw: &[f64], dims: &ImageConfig) -> Result<Array1<f64>> {
    if raw.len() != dims.source_len() {
        return Err(Error::InputValidation(format!(
            "expected {} pixels ({1}x{1}), got {2}",
            dims.source_len(),
            dims.source_side,
            raw.len()
        )));
    }

    let block = dims.block_side();
    let grid = Array2::from_shape_fn((dims.source_side, dims.source_side), |(r, c)| {
        normalize_pixel(raw[r * dims.source_side + c])
    });

    let side = dims.target_side;
    let mut pooled = Array2::<f64>::zeros((side, side));
    for ((r, c), cell) in pooled.indexed_iter_mut() {
        let rows = r * block..(r + 1) * block;
        let cols = c * block..(c + 1) * block;
        *cell = grid.slice(ndarray::s![rows, cols]).mean().unwrap_or(0.0);
    }

    pooled
        .into_shape_with_order(side * side)
        .map_err(|e| Error::Configuration(format!("cannot flatten {side}x{side} grid: {e}")))
}

/// Lift a flat input into the N×1 column the propagation routines expect.
pub fn as_column(inputs: Array1<f64>) -> Array2<f64> {
    inputs.insert_axis(Axis(1))
}

/// A sketch with no ink at all cannot be classified.
pub fn ensure_not_blank(raw: &[f64]) -> Result<()> {
    if raw.iter().all(|&v| v == 0.0) {
        return Err(Error::InputValidation("blank sketch, please draw a digit".to_string()));
    }
    Ok(())
}

/// Load an image file as an ink grid of `source_side`²: grayscale, inverted so a
/// dark stroke on paper reads as high intensity, then resized.
pub fn grid_from_image(path: &Path, dims: &ImageConfig) -> Result<Vec<f64>> {
    let mut gray = image::open(path)?.to_luma8();
    imageops::invert(&mut gray);

    let side = dims.source_side as u32;
    let resized = imageops::resize(&gray, side, side, FilterType::Triangle);

    Ok(resized.pixels().map(|p| p.0[0] as f64).collect())
}
