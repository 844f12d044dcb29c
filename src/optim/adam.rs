use crate::{
    math::matrix::Matrix,
    network::{gradients::Gradients, network::Network},
    optim::Optimizer,
};

/// Adam with bias-corrected first and second moment estimates.
pub struct Adam {
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
    t: i32,
    // (m, v) for weights then biases, per layer
    moments: Vec<[(Matrix, Matrix); 2]>,
}

impl Adam {
    pub fn new(beta1: f64, beta2: f64, eps: f64, weight_decay: f64) -> Adam {
        Adam { beta1, beta2, eps, weight_decay, t: 0, moments: Vec::new() }
    }

    fn update(&self, param: &mut Matrix, grad: &Matrix, moments: &mut (Matrix, Matrix), lr: f64) {
        let (b1, b2) = (self.beta1, self.beta2);
        moments.0 = moments.0.zip_with(grad, |m, g| b1 * m + (1.0 - b1) * g);
        moments.1 = moments.1.zip_with(grad, |v, g| b2 * v + (1.0 - b2) * g * g);
        let c1 = 1.0 - b1.powi(self.t);
        let c2 = 1.0 - b2.powi(self.t);
        let eps = self.eps;
        let step = moments.0.zip_with(&moments.1, |m, v| (m / c1) / ((v / c2).sqrt() + eps));
        param.add_scaled(&step, -lr);
    }
}

impl Optimizer for Adam {
    fn step(&mut self, network: &mut Network, grads: &Gradients, learning_rate: f64) {
        if self.moments.len() != network.layers.len() {
            self.moments = Gradients::zeros_like(network).layers.into_iter()
                .map(|(w, b)| [(w.clone(), w), (b.clone(), b)])
                .collect();
        }
        self.t += 1;
        let mut moments = std::mem::take(&mut self.moments);
        for ((layer, (w_grad, b_grad)), [w_m, b_m]) in network.layers.iter_mut()
            .zip(grads.layers.iter())
            .zip(moments.iter_mut())
        {
            let decay = self.weight_decay;
            let w_grad = w_grad.zip_with(&layer.weights, |g, w| g + decay * w);
            self.update(&mut layer.weights, &w_grad, w_m, learning_rate);
            self.update(&mut layer.biases, b_grad, b_m, learning_rate);
        }
        self.moments = moments;
    }
}
