use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::config::NetworkConfig;
use crate::error::{Error, Result};

/// Sigmoid: σ(z) = 1 / (1 + e^(-z)). Squashes values to (0, 1).
pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Elementwise σ over a whole layer.
pub fn activate(z: &Array2<f64>) -> Array2<f64> {
    z.mapv(sigmoid)
}

/// σ'(z) written in terms of the activation itself: a(1 − a).
fn sigmoid_slope(activation: &Array2<f64>) -> Array2<f64> {
    activation.mapv(|a| a * (1.0 - a))
}

fn check_column(name: &str, v: &Array2<f64>, rows: usize) -> Result<()> {
    if v.dim() != (rows, 1) {
        return Err(Error::Configuration(format!(
            "{name} must be a {rows}x1 column vector, got {:?}",
            v.dim()
        )));
    }
    Ok(())
}

fn check_chain(wih: &Array2<f64>, who: &Array2<f64>) -> Result<()> {
    if who.ncols() != wih.nrows() {
        return Err(Error::Configuration(format!(
            "hidden->output weights {:?} do not follow input->hidden weights {:?}",
            who.dim(),
            wih.dim()
        )));
    }
    Ok(())
}

/// Forward pass: hidden = σ(wih · x), output = σ(who · hidden).
///
/// Returns `(hidden_outputs, final_outputs)`; backprop needs the former,
/// pure inference callers drop it.
pub fn forward_prop(
    inputs: &Array2<f64>,
    wih: &Array2<f64>,
    who: &Array2<f64>,
) -> Result<(Array2<f64>, Array2<f64>)> {
    check_chain(wih, who)?;
    check_column("input vector", inputs, wih.ncols())?;

    let hidden_outputs = activate(&wih.dot(inputs));
    let final_outputs = activate(&who.dot(&hidden_outputs));

    Ok((hidden_outputs, final_outputs))
}

/// Error calculation plus one gradient-descent step, applied to both weight
/// matrices in place.
///
/// Output error is `target − output`. It is spread back over the hidden units
/// through `whoᵀ`, and each matrix moves by
/// `lr · (error ⊙ a(1 − a)) · previous_layerᵀ`.
pub fn backward_prop(
    inputs: &Array2<f64>,
    hidden_outputs: &Array2<f64>,
    final_outputs: &Array2<f64>,
    targets: &Array2<f64>,
    wih: &mut Array2<f64>,
    who: &mut Array2<f64>,
    learning_rate: f64,
) -> Result<()> {
    check_chain(wih, who)?;
    check_column("input vector", inputs, wih.ncols())?;
    check_column("hidden outputs", hidden_outputs, wih.nrows())?;
    check_column("final outputs", final_outputs, who.nrows())?;
    check_column("target vector", targets, who.nrows())?;

    let output_errors = targets - final_outputs;
    let hidden_errors = who.t().dot(&output_errors);

    // both deltas are taken before either matrix moves
    let hidden_delta = &hidden_errors * &sigmoid_slope(hidden_outputs);
    let output_delta = &output_errors * &sigmoid_slope(final_outputs);

    wih.scaled_add(learning_rate, &hidden_delta.dot(&inputs.t()));
    who.scaled_add(learning_rate, &output_delta.dot(&hidden_outputs.t()));

    Ok(())
}

/// Index of the largest value; the first one wins on ties.
pub fn argmax<'a>(values: impl IntoIterator<Item = &'a f64>) -> usize {
    let (idx, _) = values
        .into_iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(max_idx, max_val), (idx, &val)| {
            if val > max_val {
                (idx, val)
            } else {
                (max_idx, max_val)
            }
        });
    idx
}

/// Three-layer perceptron: one pair of weight matrices, no biases.
/// `wih[hidden][input]` and `who[output][hidden]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    wih: Array2<f64>,
    who: Array2<f64>,
}

impl Network {
    /// Samples every weight from N(0, n^-0.5), `n` being the fan-in of the layer.
    pub fn random<R: Rng + ?Sized>(config: &NetworkConfig, rng: &mut R) -> Result<Self> {
        let wih = normal_matrix(config.hidden_nodes, config.input_nodes, rng)?;
        let who = normal_matrix(config.output_nodes, config.hidden_nodes, rng)?;
        Ok(Self { wih, who })
    }

    /// Wraps existing matrices, rejecting any shape that disagrees with `config`.
    pub fn from_weights(
        wih: Array2<f64>,
        who: Array2<f64>,
        config: &NetworkConfig,
    ) -> Result<Self> {
        let expected_wih = (config.hidden_nodes, config.input_nodes);
        let expected_who = (config.output_nodes, config.hidden_nodes);
        if wih.dim() != expected_wih {
            return Err(Error::Configuration(format!(
                "input->hidden weights are {:?}, expected {:?}",
                wih.dim(),
                expected_wih
            )));
        }
        if who.dim() != expected_who {
            return Err(Error::Configuration(format!(
                "hidden->output weights are {:?}, expected {:?}",
                who.dim(),
                expected_who
            )));
        }
        Ok(Self { wih, who })
    }

    pub fn wih(&self) -> &Array2<f64> {
        &self.wih
    }

    pub fn who(&self) -> &Array2<f64> {
        &self.who
    }

    pub fn into_weights(self) -> (Array2<f64>, Array2<f64>) {
        (self.wih, self.who)
    }

    /// Output activations for one input column.
    pub fn query(&self, inputs: &Array2<f64>) -> Result<Array2<f64>> {
        let (_hidden, outputs) = forward_prop(inputs, &self.wih, &self.who)?;
        Ok(outputs)
    }

    /// Index of the strongest output neuron.
    pub fn predict(&self, inputs: &Array2<f64>) -> Result<usize> {
        Ok(argmax(self.query(inputs)?.iter()))
    }

    /// One stochastic step on a single (input, target) pair.
    pub fn train(
        &mut self,
        inputs: &Array2<f64>,
        targets: &Array2<f64>,
        learning_rate: f64,
    ) -> Result<()> {
        let (hidden, outputs) = forward_prop(inputs, &self.wih, &self.who)?;
        backward_prop(
            inputs,
            &hidden,
            &outputs,
            targets,
            &mut self.wih,
            &mut self.who,
            learning_rate,
        )
    }
}

fn normal_matrix<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Result<Array2<f64>> {
    let std_dev = (cols as f64).powf(-0.5);
    let normal = Normal::new(0.0, std_dev)
        .map_err(|e| Error::Configuration(format!("weight distribution: {e}")))?;
    Ok(Array2::from_shape_fn((rows, cols), |_| normal.sample(&mut *rng)))
}
