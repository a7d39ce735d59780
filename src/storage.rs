//! Weight and score persistence.
//!
//! Matrices are stored as comma-delimited text, row-major, one matrix row per
//! line, each value in its shortest round-trip form. Scores are one string per line.

use std::fs;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use ndarray::Array2;
use tracing::debug;

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::network::Network;

const SCORES_FILE: &str = "test_scores.csv";

/// Storage for one trained weight pair per scenario.
pub trait WeightStore {
    fn load_weights(&self, scenario: usize, config: &NetworkConfig) -> Result<Network>;
    fn save_weights(&self, scenario: usize, network: &Network) -> Result<()>;
}

/// Storage for the per-scenario accuracy strings.
pub trait ScoreStore {
    fn load_scores(&self) -> Result<Vec<String>>;
    fn save_scores(&self, scores: &[String]) -> Result<()>;
}

/// Plain files in one directory: `weights_wih_{i}.csv`, `weights_who_{i}.csv`
/// and `test_scores.csv`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn wih_path(&self, scenario: usize) -> PathBuf {
        self.dir.join(format!("weights_wih_{scenario}.csv"))
    }

    pub fn who_path(&self, scenario: usize) -> PathBuf {
        self.dir.join(format!("weights_who_{scenario}.csv"))
    }

    pub fn scores_path(&self) -> PathBuf {
        self.dir.join(SCORES_FILE)
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::storage(&self.dir, e))
    }
}

impl WeightStore for FileStore {
    fn load_weights(&self, scenario: usize, config: &NetworkConfig) -> Result<Network> {
        let wih = read_matrix(&self.wih_path(scenario))?;
        let who = read_matrix(&self.who_path(scenario))?;
        Network::from_weights(wih, who, config)
    }

    fn save_weights(&self, scenario: usize, network: &Network) -> Result<()> {
        self.ensure_dir()?;
        write_matrix(&self.wih_path(scenario), network.wih())?;
        write_matrix(&self.who_path(scenario), network.who())?;
        debug!(scenario, dir = %self.dir.display(), "saved weights");
        Ok(())
    }
}

impl ScoreStore for FileStore {
    fn load_scores(&self) -> Result<Vec<String>> {
        let path = self.scores_path();
        let text = fs::read_to_string(&path).map_err(|e| Error::storage(&path, e))?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    fn save_scores(&self, scores: &[String]) -> Result<()> {
        self.ensure_dir()?;
        let path = self.scores_path();
        let mut body = scores.join("\n");
        body.push('\n');
        fs::write(&path, body).map_err(|e| Error::storage(&path, e))?;
        debug!(path = %path.display(), count = scores.len(), "saved scores");
        Ok(())
    }
}

pub fn write_matrix(path: &Path, matrix: &Array2<f64>) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;
    for row in matrix.rows() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush().map_err(|e| Error::storage(path, e))?;
    Ok(())
}

pub fn read_matrix(path: &Path) -> Result<Array2<f64>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| match e.into_kind() {
            csv::ErrorKind::Io(io) => Error::storage(path, io),
            other => Error::CorruptWeights {
                path: path.to_path_buf(),
                reason: format!("{other:?}"),
            },
        })?;

    let corrupt = |reason: String| Error::CorruptWeights {
        path: path.to_path_buf(),
        reason,
    };

    let mut values = Vec::new();
    let mut rows = 0;
    let mut cols = None;
    for row in reader.records() {
        let row = row?;
        match cols {
            None => cols = Some(row.len()),
            Some(n) if n != row.len() => {
                return Err(corrupt(format!(
                    "row {} has {} values, expected {n}",
                    rows + 1,
                    row.len()
                )))
            }
            Some(_) => {}
        }
        for field in row.iter() {
            let value: f64 = field
                .trim()
                .parse()
                .map_err(|_| corrupt(format!("{field:?} in row {} is not a number", rows + 1)))?;
            if !value.is_finite() {
                return Err(corrupt(format!("{field:?} in row {} is not finite", rows + 1)));
            }
            values.push(value);
        }
        rows += 1;
    }

    let cols = cols.ok_or_else(|| corrupt("empty matrix".to_string()))?;
    Array2::from_shape_vec((rows, cols), values).map_err(|e| corrupt(e.to_string()))
}
