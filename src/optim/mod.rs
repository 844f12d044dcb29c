pub mod adam;
pub mod scheduler;
pub mod sgd;

use serde::{Serialize, Deserialize};

use crate::network::{gradients::Gradients, network::Network};

pub use adam::Adam;
pub use scheduler::{LrSchedule, SchedulerWithWarmUp};
pub use sgd::Sgd;

/// Applies one parameter update to a network.
pub trait Optimizer {
    fn step(&mut self, network: &mut Network, grads: &Gradients, learning_rate: f64);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum OptimizerType {
    Sgd { momentum: f64 },
    Adam { beta1: f64, beta2: f64, eps: f64 },
}

impl Default for OptimizerType {
    fn default() -> Self {
        OptimizerType::Adam { beta1: 0.9, beta2: 0.999, eps: 1e-8 }
    }
}

pub fn create_optimizer(kind: OptimizerType, weight_decay: f64) -> Box<dyn Optimizer> {
    match kind {
        OptimizerType::Sgd { momentum } => Box::new(Sgd::new(momentum, weight_decay)),
        OptimizerType::Adam { beta1, beta2, eps } => Box::new(Adam::new(beta1, beta2, eps, weight_decay)),
    }
}
