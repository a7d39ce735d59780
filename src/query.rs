//! Live queries: run one preprocessed sketch through every scenario's network
//! and turn raw activations into ranked percentage confidences.
//!
//! Percentages divide each sigmoid output by the sum of all outputs. The
//! outputs are independent sigmoids, so this is a relative score, not a
//! calibrated probability.

use std::fmt;

use ndarray::{Array1, Array2};
use serde::Serialize;
use tracing::warn;

use crate::config::{Config, ConfidenceThresholds};
use crate::error::{Error, Result};
use crate::network::{argmax, Network};
use crate::preprocess::{as_column, compress_image, ensure_not_blank, parse_pixel_string};
use crate::storage::{ScoreStore, WeightStore};

/// Qualitative reading of the headline confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
    #[serde(rename = "none")]
    NoConfidence,
}

impl ConfidenceBand {
    pub fn from_percentage(pct: f64, thresholds: &ConfidenceThresholds) -> Self {
        if pct >= thresholds.high {
            ConfidenceBand::High
        } else if pct >= thresholds.medium {
            ConfidenceBand::Medium
        } else if pct >= thresholds.low {
            ConfidenceBand::Low
        } else {
            ConfidenceBand::NoConfidence
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceBand::High => "high",
            ConfidenceBand::Medium => "medium",
            ConfidenceBand::Low => "low",
            ConfidenceBand::NoConfidence => "none",
        }
    }
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Round to two decimals, halves to even.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

pub fn format_percentage(pct: f64) -> String {
    format!("{pct:.2}%")
}

/// What one scenario's network says about a sketch.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioPrediction {
    /// Index of the largest raw activation
    pub label: usize,
    /// Classes by descending percentage; equal percentages keep class order
    pub ranked: Vec<(usize, f64)>,
}

impl ScenarioPrediction {
    /// Rank the raw output activations of one forward pass.
    pub fn from_outputs(outputs: &Array2<f64>) -> Self {
        let total: f64 = outputs.sum();
        let mut ranked: Vec<(usize, f64)> = outputs
            .iter()
            .enumerate()
            .map(|(class, &out)| (class, round2(out / total * 100.0)))
            .collect();
        // stable: ties keep encounter order
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        Self {
            label: argmax(outputs.iter()),
            ranked,
        }
    }

    /// Percentage of the top-ranked class.
    pub fn confidence(&self) -> f64 {
        self.ranked.first().map_or(0.0, |&(_, pct)| pct)
    }

    /// The raw maximum and the top of the percentage ranking are separate
    /// computations and can split when rounding creates a tie.
    pub fn ranking_agrees(&self) -> bool {
        self.ranked.first().map(|&(class, _)| class) == Some(self.label)
    }
}

/// Result of querying every scenario with the same sketch.
#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    pub scenarios: Vec<ScenarioPrediction>,
    pub band: ConfidenceBand,
}

impl Inference {
    /// The most-trained scenario, which is always the last one.
    pub fn headline(&self) -> Option<&ScenarioPrediction> {
        self.scenarios.last()
    }
}

/// Forward every scenario's network over `inputs` and rank the results.
pub fn infer(
    inputs: &Array1<f64>,
    networks: &[Network],
    thresholds: &ConfidenceThresholds,
) -> Result<Inference> {
    if networks.is_empty() {
        return Err(Error::Configuration("no trained scenarios to query".to_string()));
    }
    let column = as_column(inputs.clone());

    let scenarios = networks
        .iter()
        .enumerate()
        .map(|(i, net)| {
            let prediction = ScenarioPrediction::from_outputs(&net.query(&column)?);
            if !prediction.ranking_agrees() {
                warn!(
                    scenario = i,
                    label = prediction.label,
                    top = ?prediction.ranked.first(),
                    "raw maximum and ranked percentages disagree"
                );
            }
            Ok(prediction)
        })
        .collect::<Result<Vec<_>>>()?;

    let headline_pct = scenarios.last().map_or(0.0, ScenarioPrediction::confidence);
    Ok(Inference {
        band: ConfidenceBand::from_percentage(headline_pct, thresholds),
        scenarios,
    })
}

/// The payload handed back to a sketch request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub predictions: Vec<String>,
    pub confidences: Vec<String>,
    pub test_scores: Vec<String>,
    /// Empty until a sketch has been classified
    pub confidence_band: Option<ConfidenceBand>,
    pub indices: Vec<usize>,
    pub values: Vec<String>,
}

impl QueryResponse {
    /// Placeholder state shown before any sketch is submitted.
    pub fn initial(scenario_count: usize, test_scores: Vec<String>) -> Self {
        Self {
            predictions: vec!["-".to_string(); scenario_count],
            confidences: vec!["-".to_string(); scenario_count],
            test_scores,
            confidence_band: None,
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn from_inference(inference: &Inference, test_scores: Vec<String>) -> Self {
        let headline = inference.headline().map(|h| h.ranked.as_slice()).unwrap_or(&[]);
        Self {
            predictions: inference
                .scenarios
                .iter()
                .map(|s| s.label.to_string())
                .collect(),
            confidences: inference
                .scenarios
                .iter()
                .map(|s| format_percentage(s.confidence()))
                .collect(),
            test_scores,
            confidence_band: Some(inference.band),
            indices: headline.iter().map(|&(class, _)| class).collect(),
            values: headline.iter().map(|&(_, pct)| format_percentage(pct)).collect(),
        }
    }
}

/// Loaded scenario networks plus everything needed to answer sketch queries.
#[derive(Debug, Clone)]
pub struct Predictor {
    config: Config,
    networks: Vec<Network>,
    test_scores: Vec<String>,
}

impl Predictor {
    pub fn new(config: Config, networks: Vec<Network>, test_scores: Vec<String>) -> Self {
        Self {
            config,
            networks,
            test_scores,
        }
    }

    /// Read every scenario's weights and the stored scores.
    pub fn load<S: WeightStore + ScoreStore>(config: Config, store: &S) -> Result<Self> {
        let networks = (0..config.scenarios.len())
            .map(|i| store.load_weights(i, &config.network))
            .collect::<Result<Vec<_>>>()?;
        let test_scores = store.load_scores()?;
        Ok(Self::new(config, networks, test_scores))
    }

    pub fn scenario_count(&self) -> usize {
        self.networks.len()
    }

    pub fn initial_response(&self) -> QueryResponse {
        QueryResponse::initial(self.networks.len(), self.test_scores.clone())
    }

    /// Classify an ink grid of `source_side`² raw intensities.
    pub fn process_grid(&self, raw: &[f64]) -> Result<QueryResponse> {
        ensure_not_blank(raw)?;
        let inputs = compress_image(raw, &self.config.image)?;
        let inference = infer(&inputs, &self.networks, &self.config.thresholds)?;
        Ok(QueryResponse::from_inference(&inference, self.test_scores.clone()))
    }

    /// Classify the comma-separated pixel string posted by the sketchpad.
    pub fn process_pixels(&self, input: &str) -> Result<QueryResponse> {
        self.process_grid(&parse_pixel_string(input)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ImageConfig, NetworkConfig, Scenario};
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn headline_outputs() -> Array2<f64> {
        array![[0.9], [0.05], [0.05], [0.05], [0.05], [0.05], [0.05], [0.05], [0.05], [0.05]]
    }

    #[test]
    fn test_bands_use_literal_thresholds() {
        let t = ConfidenceThresholds::default();
        assert_eq!(ConfidenceBand::from_percentage(95.0, &t), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_percentage(90.0, &t), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_percentage(89.99, &t), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_percentage(60.0, &t), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_percentage(59.99, &t), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::from_percentage(20.0, &t), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::from_percentage(19.99, &t), ConfidenceBand::NoConfidence);
        assert_eq!(ConfidenceBand::NoConfidence.to_string(), "none");
    }

    #[test]
    fn test_ranking_of_dominant_class() {
        let prediction = ScenarioPrediction::from_outputs(&headline_outputs());
        assert_eq!(prediction.label, 0);
        assert_eq!(prediction.ranked[0].0, 0);
        // 0.9 / 1.35
        assert_relative_eq!(prediction.confidence(), 66.67, epsilon = 1e-9);
        assert!(prediction.ranking_agrees());

        // ties keep class order
        let rest: Vec<usize> = prediction.ranked[1..].iter().map(|&(c, _)| c).collect();
        assert_eq!(rest, (1..10).collect::<Vec<_>>());
        assert!(prediction.ranked[1..].iter().all(|&(_, p)| (p - 3.7).abs() < 1e-9));
    }

    #[test]
    fn test_rounding_tie_can_split_label_and_ranking() {
        let outputs = array![[0.3], [0.300_000_1], [0.1]];
        let prediction = ScenarioPrediction::from_outputs(&outputs);
        assert_eq!(prediction.label, 1);
        assert_eq!(prediction.ranked[0].0, 0);
        assert!(!prediction.ranking_agrees());
    }

    #[test]
    fn test_round2_and_format() {
        assert_relative_eq!(round2(12.345_6), 12.35);
        assert_relative_eq!(round2(0.004), 0.0);
        // exact binary ties go to the even hundredth
        assert_relative_eq!(round2(0.125), 0.12);
        assert_relative_eq!(round2(0.375), 0.38);
        assert_relative_eq!(round2(-0.125), -0.12);
        assert_eq!(format_percentage(90.0), "90.00%");
        assert_eq!(format_percentage(3.7), "3.70%");
    }

    fn tiny_setup() -> (Config, Vec<Network>) {
        let config = Config {
            network: NetworkConfig {
                input_nodes: 4,
                hidden_nodes: 3,
                output_nodes: 10,
                learning_rate: 0.1,
            },
            image: ImageConfig {
                source_side: 4,
                target_side: 2,
            },
            scenarios: vec![Scenario::new(1, 1), Scenario::new(2, 1)],
            ..Config::default()
        };
        let mut rng = StdRng::seed_from_u64(9);
        let networks = (0..2)
            .map(|_| Network::random(&config.network, &mut rng).unwrap())
            .collect();
        (config, networks)
    }

    #[test]
    fn test_infer_uses_last_scenario_for_band() {
        let (config, networks) = tiny_setup();
        let inputs = Array1::from(vec![0.5, 0.01, 0.9, 0.2]);
        let inference = infer(&inputs, &networks, &config.thresholds).unwrap();
        assert_eq!(inference.scenarios.len(), 2);

        let headline = inference.headline().unwrap();
        let expected = ConfidenceBand::from_percentage(headline.confidence(), &config.thresholds);
        assert_eq!(inference.band, expected);

        // every scenario ranks all classes
        for s in &inference.scenarios {
            assert_eq!(s.ranked.len(), 10);
            assert!(s.label < 10);
        }
    }

    /// A one-input network whose outputs are exactly `outputs` for any input:
    /// the hidden unit sits at sigmoid(0) = 0.5, so each output weight is
    /// twice the logit of its target.
    fn fixed_output_network(outputs: &[f64]) -> Network {
        let config = NetworkConfig {
            input_nodes: 1,
            hidden_nodes: 1,
            output_nodes: outputs.len(),
            learning_rate: 0.1,
        };
        let who = Array2::from_shape_fn((outputs.len(), 1), |(k, _)| {
            2.0 * (outputs[k] / (1.0 - outputs[k])).ln()
        });
        Network::from_weights(Array2::zeros((1, 1)), who, &config).unwrap()
    }

    #[test]
    fn test_dominant_class_in_last_of_four_scenarios_is_medium() {
        let flat = fixed_output_network(&[0.5; 10]);
        let headline: Vec<f64> = headline_outputs().iter().copied().collect();
        let networks = vec![flat.clone(), flat.clone(), flat, fixed_output_network(&headline)];

        let inputs = Array1::from(vec![0.7]);
        let inference = infer(&inputs, &networks, &ConfidenceThresholds::default()).unwrap();
        assert_eq!(inference.scenarios.len(), 4);
        assert_eq!(inference.band, ConfidenceBand::Medium);

        let last = inference.headline().unwrap();
        assert_eq!(last.label, 0);
        assert_relative_eq!(last.confidence(), 66.67, epsilon = 1e-9);
        // flat outputs rank every class at 10%
        assert_relative_eq!(inference.scenarios[0].confidence(), 10.0, epsilon = 1e-9);

        let response = QueryResponse::from_inference(&inference, vec![]);
        assert_eq!(response.predictions, vec!["0"; 4]);
        assert_eq!(response.confidences[3], "66.67%");
        assert_eq!(response.indices[0], 0);
        assert_eq!(response.values[0], "66.67%");
        assert_eq!(response.values[1], "3.70%");
    }

    #[test]
    fn test_infer_requires_networks() {
        let inputs = Array1::from(vec![0.5; 4]);
        let err = infer(&inputs, &[], &ConfidenceThresholds::default()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_predictor_response_shape() {
        let (config, networks) = tiny_setup();
        let scores = vec!["70.00%".to_string(), "80.00%".to_string()];
        let predictor = Predictor::new(config, networks, scores.clone());

        let initial = predictor.initial_response();
        assert_eq!(initial.predictions, vec!["-", "-"]);
        assert_eq!(initial.confidence_band, None);
        assert_eq!(initial.test_scores, scores);

        let response = predictor
            .process_pixels("0,0,255,255,0,0,255,255,10,10,0,0,10,10,0,0")
            .unwrap();
        assert_eq!(response.predictions.len(), 2);
        assert_eq!(response.confidences.len(), 2);
        assert!(response.confidences.iter().all(|c| c.ends_with('%')));
        assert_eq!(response.indices.len(), 10);
        assert_eq!(response.values.len(), 10);
        assert!(response.confidence_band.is_some());
        assert_eq!(response.test_scores, scores);
    }

    #[test]
    fn test_predictor_rejects_bad_sketches() {
        let (config, networks) = tiny_setup();
        let predictor = Predictor::new(config, networks, vec![]);
        let blank = vec!["0"; 16].join(",");
        assert!(matches!(
            predictor.process_pixels(&blank),
            Err(Error::InputValidation(_))
        ));
        assert!(matches!(
            predictor.process_pixels("1,2,3"),
            Err(Error::InputValidation(_))
        ));
    }

    #[test]
    fn test_response_serializes_band_names() {
        let (config, networks) = tiny_setup();
        let predictor = Predictor::new(config, networks, vec![]);
        let json = serde_json::to_value(predictor.initial_response()).unwrap();
        assert!(json["confidence_band"].is_null());

        let inference = Inference {
            scenarios: vec![],
            band: ConfidenceBand::NoConfidence,
        };
        let json = serde_json::to_value(QueryResponse::from_inference(&inference, vec![])).unwrap();
        assert_eq!(json["confidence_band"], "none");
    }
}
