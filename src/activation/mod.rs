pub mod activation;

pub use activation::{ActivationFunction, PosteriorNormalization, sigmoid, softmax};
