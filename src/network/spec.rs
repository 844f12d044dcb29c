use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{Result, TrainError};
use crate::network::network::Network;

/// One hidden layer of a model: its width and activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub size: usize,
    pub activation: ActivationFunction,
}

/// Architecture of a dense model. Input and output widths come from the
/// model family (channels → classes, features → targets); this only
/// describes the hidden stack. The output layer always emits logits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    #[serde(default)]
    pub hidden: Vec<LayerSpec>,
}

impl NetworkSpec {
    pub fn build<R: Rng + ?Sized>(&self, input_size: usize, output_size: usize, rng: &mut R) -> Result<Network> {
        if input_size == 0 || output_size == 0 {
            return Err(TrainError::config(format!(
                "a network needs non-empty input and output, got {input_size} -> {output_size}"
            )));
        }
        let mut specs = Vec::with_capacity(self.hidden.len() + 1);
        let mut fan_in = input_size;
        for layer in &self.hidden {
            if layer.size == 0 {
                return Err(TrainError::config("hidden layers must have at least one neuron"));
            }
            specs.push((layer.size, fan_in, layer.activation.clone()));
            fan_in = layer.size;
        }
        specs.push((output_size, fan_in, ActivationFunction::Identity));
        Ok(Network::new(specs, rng))
    }
}

impl Default for NetworkSpec {
    fn default() -> Self {
        NetworkSpec { hidden: vec![LayerSpec { size: 16, activation: ActivationFunction::ReLU }] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn build_chains_hidden_layers_to_logits() {
        let spec = NetworkSpec { hidden: vec![
            LayerSpec { size: 8, activation: ActivationFunction::ReLU },
            LayerSpec { size: 4, activation: ActivationFunction::Tanh },
        ] };
        let net = spec.build(3, 2, &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(net.input_size(), 3);
        assert_eq!(net.output_size(), 2);
        assert_eq!(net.layers.len(), 3);
        assert_eq!(net.layers[2].activator, ActivationFunction::Identity);
        assert!(spec.build(0, 2, &mut StdRng::seed_from_u64(0)).is_err());
    }
}
