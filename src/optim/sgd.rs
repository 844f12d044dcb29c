use crate::{
    math::matrix::Matrix,
    network::{gradients::Gradients, network::Network},
    optim::Optimizer,
};

/// Stochastic gradient descent with optional momentum and L2 weight decay.
pub struct Sgd {
    pub momentum: f64,
    pub weight_decay: f64,
    velocity: Vec<(Matrix, Matrix)>,
}

impl Sgd {
    pub fn new(momentum: f64, weight_decay: f64) -> Sgd {
        Sgd { momentum, weight_decay, velocity: Vec::new() }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, network: &mut Network, grads: &Gradients, learning_rate: f64) {
        if self.velocity.len() != network.layers.len() {
            self.velocity = Gradients::zeros_like(network).layers;
        }
        for ((layer, (w_grad, b_grad)), (w_vel, b_vel)) in network.layers.iter_mut()
            .zip(grads.layers.iter())
            .zip(self.velocity.iter_mut())
        {
            let decay = self.weight_decay;
            let w_grad = w_grad.zip_with(&layer.weights, |g, w| g + decay * w);
            *w_vel = w_vel.map(|v| v * self.momentum) + w_grad;
            *b_vel = b_vel.map(|v| v * self.momentum) + b_grad.clone();
            layer.weights.add_scaled(w_vel, -learning_rate);
            layer.biases.add_scaled(b_vel, -learning_rate);
        }
    }
}
