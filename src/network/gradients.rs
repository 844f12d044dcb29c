use crate::{math::matrix::Matrix, network::network::Network};

/// Per-layer `(weights_grad, biases_grad)` pairs, aligned with `Network::layers`.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    pub layers: Vec<(Matrix, Matrix)>,
}

impl Gradients {
    pub fn zeros_like(network: &Network) -> Gradients {
        Gradients {
            layers: network.layers.iter()
                .map(|layer| (
                    Matrix::zeros(layer.weights.rows, layer.weights.cols),
                    Matrix::zeros(layer.biases.rows, layer.biases.cols),
                ))
                .collect(),
        }
    }

    /// `self += other * factor`
    pub fn accumulate(&mut self, other: &Gradients, factor: f64) {
        for ((w, b), (ow, ob)) in self.layers.iter_mut().zip(other.layers.iter()) {
            w.add_scaled(ow, factor);
            b.add_scaled(ob, factor);
        }
    }

    pub fn is_finite(&self) -> bool {
        self.layers.iter().all(|(w, b)| {
            w.data.iter().chain(b.data.iter()).flatten().all(|x| x.is_finite())
        })
    }
}
