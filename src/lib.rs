//! # sketch-digits
//!
//! A three-layer sigmoid perceptron for handwritten digits. Networks are
//! trained offline on MNIST under several scenarios (record count × epochs),
//! scored on the test set, and then queried live with hand-drawn sketches.
//!
//! ## Modules
//!
//! - `network` - sigmoid, forward and backward propagation, the weight pair
//! - `training` - scenario training loop and accuracy evaluation
//! - `data_loader` - CSV / IDX datasets and input/target encoding
//! - `preprocess` - sketch grid normalization and block pooling
//! - `query` - multi-scenario inference, ranking and confidence bands
//! - `storage` - weight and score persistence
//! - `server` - HTTP request interface

pub mod config;
pub mod data_loader;
pub mod error;
pub mod network;
pub mod preprocess;
pub mod query;
pub mod server;
pub mod storage;
pub mod training;

pub use config::Config;
pub use error::{Error, Result};
pub use network::Network;
pub use query::{ConfidenceBand, Predictor, QueryResponse};
pub use storage::FileStore;
