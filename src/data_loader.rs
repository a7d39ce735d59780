//! MNIST data loading and vector encoding.
//! Single place for: reading labeled records from CSV or IDX files, scaling
//! pixels into (0.01, 1.0], and building the target column for a label.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Instant;

use mnist::MnistBuilder;
use ndarray::Array2;
use tracing::{info, warn};

use crate::config::{DataConfig, NetworkConfig};
use crate::error::{Error, Result};

/// Pixel count of one MNIST image as stored in the IDX files.
const IDX_IMAGE_LEN: usize = 28 * 28;
const IDX_TRAIN_LEN: u32 = 60_000;
const IDX_TEST_LEN: u32 = 10_000;
const IDX_IMAGE_MAGIC: u32 = 0x0803;
const IDX_LABEL_MAGIC: u32 = 0x0801;

/// Expected layout of one IDX file.
struct IdxLayout {
    name: &'static str,
    magic: u32,
    count: u32,
    /// Header bytes before the payload
    header_len: u64,
    /// Payload bytes per item
    item_len: u64,
}

const IDX_FILES: [IdxLayout; 4] = [
    IdxLayout {
        name: "train-images-idx3-ubyte",
        magic: IDX_IMAGE_MAGIC,
        count: IDX_TRAIN_LEN,
        header_len: 16,
        item_len: IDX_IMAGE_LEN as u64,
    },
    IdxLayout {
        name: "train-labels-idx1-ubyte",
        magic: IDX_LABEL_MAGIC,
        count: IDX_TRAIN_LEN,
        header_len: 8,
        item_len: 1,
    },
    IdxLayout {
        name: "t10k-images-idx3-ubyte",
        magic: IDX_IMAGE_MAGIC,
        count: IDX_TEST_LEN,
        header_len: 16,
        item_len: IDX_IMAGE_LEN as u64,
    },
    IdxLayout {
        name: "t10k-labels-idx1-ubyte",
        magic: IDX_LABEL_MAGIC,
        count: IDX_TEST_LEN,
        header_len: 8,
        item_len: 1,
    },
];

/// One labeled image: the digit and its raw 0–255 pixels in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub label: usize,
    pub pixels: Vec<u8>,
}

/// Scale a raw 0–255 intensity into [0.01, 1.0]. Zero never reaches the
/// network, so no input is dead.
pub fn normalize_pixel(raw: f64) -> f64 {
    raw / 255.0 * 0.99 + 0.01
}

/// Normalized pixels as an N×1 column.
pub fn input_vector(pixels: &[u8]) -> Array2<f64> {
    Array2::from_shape_fn((pixels.len(), 1), |(i, _)| normalize_pixel(pixels[i] as f64))
}

/// Target column for `label`: 0.99 at the label, 0.01 everywhere else.
/// 3 → [0.01, 0.01, 0.01, 0.99, 0.01, ...].
pub fn target_vector(label: usize, output_nodes: usize) -> Array2<f64> {
    let mut targets = Array2::from_elem((output_nodes, 1), 0.01);
    if let Some(slot) = targets.get_mut((label, 0)) {
        *slot = 0.99;
    }
    targets
}

/// Decode one `label,pixel_0,...,pixel_{n-1}` row.
pub fn parse_record<'a>(
    line: usize,
    fields: impl IntoIterator<Item = &'a str>,
    config: &NetworkConfig,
) -> Result<Record> {
    let mut fields = fields.into_iter();
    let label_field = fields
        .next()
        .ok_or_else(|| Error::malformed(line, "empty record"))?;
    let label: usize = label_field
        .trim()
        .parse()
        .map_err(|_| Error::malformed(line, format!("label {label_field:?} is not a class index")))?;
    if label >= config.output_nodes {
        return Err(Error::malformed(
            line,
            format!("label {label} outside 0..{}", config.output_nodes),
        ));
    }

    let pixels = fields
        .enumerate()
        .map(|(i, field)| {
            field.trim().parse::<u8>().map_err(|_| {
                Error::malformed(line, format!("pixel {i} ({field:?}) is not an integer in 0..=255"))
            })
        })
        .collect::<Result<Vec<u8>>>()?;
    if pixels.len() != config.input_nodes {
        return Err(Error::malformed(
            line,
            format!(
                "expected {} fields, found {}",
                config.input_nodes + 1,
                pixels.len() + 1
            ),
        ));
    }

    Ok(Record { label, pixels })
}

/// Read up to `limit` records from CSV text. The first bad row fails the whole read.
pub fn read_csv_records<R: Read>(
    reader: R,
    limit: Option<usize>,
    config: &NetworkConfig,
) -> Result<Vec<Record>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let limit = limit.unwrap_or(usize::MAX);
    let mut records = Vec::new();
    for (idx, row) in reader.records().take(limit).enumerate() {
        let row = row?;
        let line = row
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(idx + 1);
        records.push(parse_record(line, row.iter(), config)?);
    }
    Ok(records)
}

pub fn load_csv(path: &Path, limit: Option<usize>, config: &NetworkConfig) -> Result<Vec<Record>> {
    let started = Instant::now();
    let file = File::open(path).map_err(|e| Error::storage(path, e))?;
    let records = read_csv_records(file, limit, config)?;
    info!(
        path = %path.display(),
        records = records.len(),
        elapsed_secs = started.elapsed().as_secs_f64(),
        "read dataset"
    );
    Ok(records)
}

/// In-memory dataset: training records in file order, test records for scoring.
#[derive(Debug, Clone, Default)]
pub struct MnistDataSet {
    pub training_data: Vec<Record>,
    pub test_data: Vec<Record>,
}

impl MnistDataSet {
    /// Loads both splits from `source`, keeping at most `training_limit` training records.
    pub fn load(
        source: &DataConfig,
        training_limit: usize,
        config: &NetworkConfig,
    ) -> Result<Self> {
        match source {
            DataConfig::Csv { train, test } => Ok(Self {
                training_data: load_csv(train, Some(training_limit), config)?,
                test_data: load_csv(test, None, config)?,
            }),
            DataConfig::Idx { dir } => Self::load_idx(dir, training_limit, config),
        }
    }

    /// Only the test split, for re-scoring stored weights.
    pub fn load_test(source: &DataConfig, config: &NetworkConfig) -> Result<Vec<Record>> {
        match source {
            DataConfig::Csv { test, .. } => load_csv(test, None, config),
            DataConfig::Idx { dir } => Ok(Self::load_idx(dir, 0, config)?.test_data),
        }
    }

    /// Reads the four MNIST IDX files in `dir`.
    pub fn load_idx(dir: &Path, training_limit: usize, config: &NetworkConfig) -> Result<Self> {
        if config.input_nodes != IDX_IMAGE_LEN {
            return Err(Error::Dataset(format!(
                "IDX images have {IDX_IMAGE_LEN} pixels but the network expects {}",
                config.input_nodes
            )));
        }
        for layout in &IDX_FILES {
            check_idx_file(&dir.join(layout.name), layout)?;
        }
        let base_path = dir
            .to_str()
            .ok_or_else(|| Error::Dataset(format!("non UTF-8 path {}", dir.display())))?;

        let started = Instant::now();
        let mnist = MnistBuilder::new()
            .base_path(base_path)
            .label_format_digit()
            .training_set_length(IDX_TRAIN_LEN)
            .test_set_length(IDX_TEST_LEN)
            .finalize();

        let training_data = idx_records(&mnist.trn_img, &mnist.trn_lbl, config)?
            .into_iter()
            .take(training_limit)
            .collect();
        let test_data = idx_records(&mnist.tst_img, &mnist.tst_lbl, config)?;
        info!(
            dir = %dir.display(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "read IDX dataset"
        );

        Ok(Self {
            training_data,
            test_data,
        })
    }

    /// The first `count` training records, as a scenario sees them.
    pub fn leading(&self, count: usize) -> &[Record] {
        if count > self.training_data.len() {
            warn!(
                requested = count,
                available = self.training_data.len(),
                "scenario asks for more records than the dataset holds"
            );
        }
        &self.training_data[..count.min(self.training_data.len())]
    }
}

/// The mnist reader panics on short or foreign files, so headers and sizes
/// are checked up front.
fn check_idx_file(path: &Path, layout: &IdxLayout) -> Result<()> {
    let bad = |reason: String| Error::Dataset(format!("IDX file {}: {reason}", path.display()));
    if !path.is_file() {
        return Err(Error::Dataset(format!("missing IDX file {}", path.display())));
    }

    let mut file = File::open(path).map_err(|e| Error::storage(path, e))?;
    let mut header = [0u8; 16];
    let header = &mut header[..layout.header_len as usize];
    file.read_exact(header).map_err(|_| bad("truncated header".to_string()))?;

    let word = |i: usize| {
        u32::from_be_bytes([header[i], header[i + 1], header[i + 2], header[i + 3]])
    };
    if word(0) != layout.magic {
        return Err(bad(format!("magic {:#010x}, expected {:#010x}", word(0), layout.magic)));
    }
    if word(4) != layout.count {
        return Err(bad(format!("{} items, expected {}", word(4), layout.count)));
    }
    if layout.header_len == 16 && (word(8) != 28 || word(12) != 28) {
        return Err(bad(format!("images are {}x{}, expected 28x28", word(8), word(12))));
    }

    let expected = layout.header_len + u64::from(layout.count) * layout.item_len;
    let actual = file.metadata().map_err(|e| Error::storage(path, e))?.len();
    if actual != expected {
        return Err(bad(format!("{actual} bytes, expected {expected}")));
    }
    Ok(())
}

fn idx_records(images: &[u8], labels: &[u8], config: &NetworkConfig) -> Result<Vec<Record>> {
    images
        .chunks(IDX_IMAGE_LEN)
        .zip(labels.iter())
        .enumerate()
        .map(|(i, (image, &label))| {
            let label = label as usize;
            if label >= config.output_nodes {
                return Err(Error::malformed(
                    i + 1,
                    format!("label {label} outside 0..{}", config.output_nodes),
                ));
            }
            Ok(Record {
                label,
                pixels: image.to_vec(),
            })
        })
        .collect()
}
