//! Offline training and scoring.
//!
//! Every scenario starts from the same initial weights and walks its leading
//! records in file order, one record per gradient step. No shuffling, no batches.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, info_span};

use crate::config::{Config, NetworkConfig, Scenario};
use crate::data_loader::{input_vector, target_vector, MnistDataSet, Record};
use crate::error::{Error, Result};
use crate::network::Network;
use crate::query::round2;
use crate::storage::{ScoreStore, WeightStore};

/// Correct predictions over a labeled set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accuracy {
    pub correct: usize,
    pub total: usize,
}

impl Accuracy {
    /// Percentage rounded to two decimals. `evaluate` never scores an empty set.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        round2(self.correct as f64 / self.total as f64 * 100.0)
    }
}

impl std::fmt::Display for Accuracy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}%", self.percent())
    }
}

/// Run `epochs` passes of single-record gradient descent over `records`.
pub fn train(
    network: &mut Network,
    records: &[Record],
    epochs: usize,
    config: &NetworkConfig,
) -> Result<()> {
    for epoch in 0..epochs {
        let started = Instant::now();
        for record in records {
            let inputs = input_vector(&record.pixels);
            let targets = target_vector(record.label, config.output_nodes);
            network.train(&inputs, &targets, config.learning_rate)?;
        }
        debug!(
            epoch,
            records = records.len(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "epoch finished"
        );
    }
    Ok(())
}

/// Train one scenario from a copy of `initial` and persist the result.
pub fn train_scenario<S: WeightStore + ?Sized>(
    id: usize,
    scenario: &Scenario,
    initial: &Network,
    data: &MnistDataSet,
    config: &NetworkConfig,
    store: &S,
) -> Result<Network> {
    let _span = info_span!("scenario", id).entered();
    let records = data.leading(scenario.records);
    info!(
        records = records.len(),
        epochs = scenario.epochs,
        "training"
    );

    let started = Instant::now();
    let mut network = initial.clone();
    train(&mut network, records, scenario.epochs, config)?;
    info!(elapsed_secs = started.elapsed().as_secs_f64(), "training finished");

    store.save_weights(id, &network)?;
    Ok(network)
}

/// Forward-only pass over `records`, counting predictions that hit the label.
pub fn evaluate(network: &Network, records: &[Record]) -> Result<Accuracy> {
    if records.is_empty() {
        return Err(Error::Dataset("empty test set".to_string()));
    }
    let started = Instant::now();
    let mut correct = 0;
    for record in records {
        if network.predict(&input_vector(&record.pixels))? == record.label {
            correct += 1;
        }
    }
    let accuracy = Accuracy {
        correct,
        total: records.len(),
    };
    info!(
        %accuracy,
        correct,
        total = accuracy.total,
        elapsed_secs = started.elapsed().as_secs_f64(),
        "evaluated"
    );
    Ok(accuracy)
}

/// Outcome of one scenario in a full run.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub accuracy: Accuracy,
    pub network: Network,
}

/// Initial weights for a run: seeded when the config asks for it.
pub fn initial_network(config: &Config) -> Result<Network> {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    Network::random(&config.network, &mut rng)
}

/// Train and score every configured scenario, then persist the score list.
pub fn run_scenarios<S: WeightStore + ScoreStore + ?Sized>(
    config: &Config,
    data: &MnistDataSet,
    store: &S,
) -> Result<Vec<ScenarioReport>> {
    let initial = initial_network(config)?;

    let mut reports = Vec::with_capacity(config.scenarios.len());
    for (id, scenario) in config.scenarios.iter().enumerate() {
        let network = train_scenario(id, scenario, &initial, data, &config.network, store)?;
        let accuracy = evaluate(&network, &data.test_data)?;
        reports.push(ScenarioReport {
            scenario: *scenario,
            accuracy,
            network,
        });
    }

    let scores: Vec<String> = reports.iter().map(|r| r.accuracy.to_string()).collect();
    store.save_scores(&scores)?;
    Ok(reports)
}

/// Re-score stored weights against `test_data` and overwrite the score list.
pub fn rescore<S: WeightStore + ScoreStore + ?Sized>(
    config: &Config,
    test_data: &[Record],
    store: &S,
) -> Result<Vec<Accuracy>> {
    let accuracies = (0..config.scenarios.len())
        .map(|id| {
            let network = store.load_weights(id, &config.network)?;
            evaluate(&network, test_data)
        })
        .collect::<Result<Vec<_>>>()?;
    let scores: Vec<String> = accuracies.iter().map(Accuracy::to_string).collect();
    store.save_scores(&scores)?;
    Ok(accuracies)
}
