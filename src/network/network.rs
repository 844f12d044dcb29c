use std::path::Path;

use rand::Rng;
use serde::{Serialize, Deserialize};
use tracing::info;

use crate::{
    activation::activation::ActivationFunction,
    error::{Result, TrainError},
    layers::dense::Layer,
    math::matrix::Matrix,
    network::gradients::Gradients,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub layers: Vec<Layer>,
}

impl Network {
    /// Builds a network from (size, input_size, activation) tuples.
    pub fn new<R: Rng + ?Sized>(
        layer_specs: Vec<(usize, usize, ActivationFunction)>,
        rng: &mut R,
    ) -> Network {
        let layers = layer_specs.into_iter()
            .map(|(size, input_size, activation)| Layer::new(size, input_size, activation, rng))
            .collect();
        Network { layers }
    }

    pub fn input_size(&self) -> usize {
        self.layers.first().map_or(0, |l| l.weights.rows)
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(0, |l| l.size)
    }

    /// Forward pass; stores activations in each layer for backprop.
    pub fn forward(&mut self, input: Vec<f64>) -> Vec<f64> {
        let mut current = input;
        for layer in &mut self.layers {
            current = layer.feed_from(current);
        }
        current
    }

    /// Backward pass for the most recent `forward(input)`.
    ///
    /// `output_grad` is ∂L/∂output for that sample.
    pub fn backward(&self, input: &[f64], output_grad: Vec<f64>) -> Gradients {
        let mut delta = Matrix::row(output_grad);
        let mut grads = vec![(Matrix::default(), Matrix::default()); self.layers.len()];

        for i in (0..self.layers.len()).rev() {
            let input_for_layer = if i == 0 {
                Matrix::row(input.to_vec())
            } else {
                self.layers[i - 1].neurons.clone()
            };

            let (w_grad, b_grad) = self.layers[i].compute_gradients(&delta, &input_for_layer);

            if i > 0 {
                // propagate δ_i through the weights to get ∂L/∂a_{i-1}
                delta = b_grad.clone() * self.layers[i].weights.transpose();
            }
            grads[i] = (w_grad, b_grad);
        }

        Gradients { layers: grads }
    }

    /// Forward then backward for one sample.
    pub fn sample_gradients(&mut self, input: &[f64], output_grad: Vec<f64>) -> Gradients {
        self.forward(input.to_vec());
        self.backward(input, output_grad)
    }

    /// Serializes the network weights to a pretty-printed JSON file.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes a network from a JSON file previously written by `save_json`.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Network> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let mut network: Network = serde_json::from_reader(reader)?;
        network.reset_buffers();
        Ok(network)
    }

    /// Re-creates the activation buffers, which are not serialized.
    pub fn reset_buffers(&mut self) {
        for layer in &mut self.layers {
            layer.neurons = Matrix::zeros(1, layer.size);
        }
    }

    /// Number of trainable weights and biases.
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(Layer::parameter_count).sum()
    }

    /// One line per layer with its shape, activation and parameter count,
    /// followed by the total.
    pub fn summary(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.layers.iter().enumerate()
            .map(|(i, layer)| format!(
                "layer {i}: {} -> {} {:?}, {} parameters",
                layer.weights.rows, layer.size, layer.activator, layer.parameter_count()
            ))
            .collect();
        lines.push(format!("total: {} parameters", self.parameter_count()));
        lines
    }

    pub fn log_summary(&self) {
        for line in self.summary() {
            info!("{line}");
        }
    }

    /// Checks that consecutive layers agree on their sizes.
    pub fn validate(&self) -> Result<()> {
        for pair in self.layers.windows(2) {
            if pair[0].size != pair[1].weights.rows {
                return Err(TrainError::shape(format!(
                    "layer of size {} feeds a layer expecting {} inputs",
                    pair[0].size, pair[1].weights.rows
                )));
            }
        }
        Ok(())
    }
}
