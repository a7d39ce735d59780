//! Explicit configuration passed to every engine.
//!
//! Defaults reproduce the classic MNIST setup (784-200-10, learning rate 0.1,
//! four training scenarios). A YAML file can override any subset of fields.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Layer sizes and step size of the three-layer perceptron.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub input_nodes: usize,
    pub hidden_nodes: usize,
    pub output_nodes: usize,
    /// Step size for gradient descent updates
    pub learning_rate: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            input_nodes: 784,
            hidden_nodes: 200,
            output_nodes: 10,
            learning_rate: 0.1,
        }
    }
}

/// One training regimen: how many leading records to use, and how many passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub records: usize,
    pub epochs: usize,
}

impl Scenario {
    pub const fn new(records: usize, epochs: usize) -> Self {
        Self { records, epochs }
    }
}

pub fn default_scenarios() -> Vec<Scenario> {
    vec![
        Scenario::new(600, 1),
        Scenario::new(6_000, 1),
        Scenario::new(60_000, 1),
        Scenario::new(60_000, 5),
    ]
}

/// Percentage cut-offs for the confidence band of the headline prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceThresholds {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            high: 90.0,
            medium: 60.0,
            low: 20.0,
        }
    }
}

/// Square grid sizes: sketches arrive at `source_side` and are pooled down to `target_side`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub source_side: usize,
    pub target_side: usize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            source_side: 224,
            target_side: 28,
        }
    }
}

impl ImageConfig {
    pub fn source_len(&self) -> usize {
        self.source_side * self.source_side
    }

    pub fn target_len(&self) -> usize {
        self.target_side * self.target_side
    }

    /// Side of the square block averaged into one output pixel.
    pub fn block_side(&self) -> usize {
        self.source_side / self.target_side
    }
}

/// Where labeled records come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum DataConfig {
    /// `label,pixel_0,...,pixel_{n-1}` lines
    Csv { train: PathBuf, test: PathBuf },
    /// Directory holding the four MNIST IDX files
    Idx { dir: PathBuf },
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig::Csv {
            train: PathBuf::from("mnist_train.csv"),
            test: PathBuf::from("mnist_test.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for weight matrices and test scores
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub scenarios: Vec<Scenario>,
    pub thresholds: ConfidenceThresholds,
    pub image: ImageConfig,
    pub data: DataConfig,
    pub storage: StorageConfig,
    /// Seed for weight initialisation; `None` seeds from the OS
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            scenarios: default_scenarios(),
            thresholds: ConfidenceThresholds::default(),
            image: ImageConfig::default(),
            data: DataConfig::default(),
            storage: StorageConfig::default(),
            seed: None,
        }
    }
}

impl Config {
    /// Load from an optional YAML file, falling back to defaults, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| Error::storage(path, e))?;
                debug!(path = %path.display(), "loaded config file");
                Self::from_yaml(&text)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<()> {
        let net = &self.network;
        if net.input_nodes == 0 || net.hidden_nodes == 0 || net.output_nodes == 0 {
            return Err(Error::Configuration(format!(
                "node counts must be non-zero, got {}-{}-{}",
                net.input_nodes, net.hidden_nodes, net.output_nodes
            )));
        }
        if !(net.learning_rate.is_finite() && net.learning_rate > 0.0) {
            return Err(Error::Configuration(format!(
                "learning rate must be finite and positive, got {}",
                net.learning_rate
            )));
        }

        let image = &self.image;
        if image.target_side == 0 || image.source_side % image.target_side != 0 {
            return Err(Error::Configuration(format!(
                "source side {} is not a multiple of target side {}",
                image.source_side, image.target_side
            )));
        }
        if image.target_len() != net.input_nodes {
            return Err(Error::Configuration(format!(
                "target grid {0}x{0} does not match {1} input nodes",
                image.target_side, net.input_nodes
            )));
        }

        let t = &self.thresholds;
        if !(t.high >= t.medium && t.medium >= t.low) {
            return Err(Error::Configuration(format!(
                "thresholds must satisfy high >= medium >= low, got {}/{}/{}",
                t.high, t.medium, t.low
            )));
        }

        if self.scenarios.is_empty() {
            return Err(Error::Configuration("no training scenarios".to_string()));
        }
        if let Some(s) = self.scenarios.iter().find(|s| s.records == 0 || s.epochs == 0) {
            return Err(Error::Configuration(format!(
                "scenario with {} records x {} epochs trains nothing",
                s.records, s.epochs
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scenarios.len(), 4);
        assert_eq!(config.image.block_side(), 8);
        assert_eq!(config.scenarios[3], Scenario::new(60_000, 5));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
network:
  hidden_nodes: 100
  learning_rate: 0.2
scenarios:
  - { records: 10, epochs: 2 }
data:
  format: idx
  dir: data
seed: 7
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.network.hidden_nodes, 100);
        assert_eq!(config.network.input_nodes, 784);
        assert_eq!(config.scenarios, vec![Scenario::new(10, 2)]);
        assert_eq!(config.data, DataConfig::Idx { dir: PathBuf::from("data") });
        assert_eq!(config.thresholds, ConfidenceThresholds::default());
        assert_eq!(config.seed, Some(7));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_grid_mismatch() {
        let mut config = Config::default();
        config.image.target_side = 14;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let mut config = Config::default();
        config.image.source_side = 230;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_rejects_bad_learning_rate_and_thresholds() {
        let mut config = Config::default();
        config.network.learning_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.thresholds.low = 95.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_scenarios() {
        let mut config = Config::default();
        config.scenarios.clear();
        assert!(config.validate().is_err());

        config.scenarios.push(Scenario::new(0, 1));
        assert!(config.validate().is_err());
    }
}
