use crate::activation::activation::softmax;

/// Categorical cross-entropy on logits (softmax folded in).
pub struct CrossEntropyLoss;

/// Small epsilon added inside log() to prevent log(0) = -inf.
const EPS: f64 = 1e-12;

impl CrossEntropyLoss {
    /// L = -Σ expected[i] · log(softmax(logits)[i] + eps)
    ///
    /// `expected` is a one-hot (or soft) target distribution.
    pub fn loss(logits: &[f64], expected: &[f64]) -> f64 {
        softmax(logits).iter().zip(expected.iter())
            .map(|(p, e)| -e * (p + EPS).ln())
            .sum()
    }

    /// ∂L/∂z_i = softmax(z)_i − expected_i
    pub fn derivative(logits: &[f64], expected: &[f64]) -> Vec<f64> {
        softmax(logits).iter().zip(expected.iter())
            .map(|(p, e)| p - e)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_logits_cost_log_of_class_count() {
        let loss = CrossEntropyLoss::loss(&[0.0, 0.0, 0.0, 0.0], &[0.0, 1.0, 0.0, 0.0]);
        assert!((loss - 4f64.ln()).abs() < 1e-9);
        let grad = CrossEntropyLoss::derivative(&[0.0, 0.0], &[1.0, 0.0]);
        assert_eq!(grad, vec![-0.5, 0.5]);
    }
}
