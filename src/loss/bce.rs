use crate::activation::activation::sigmoid;

/// Binary cross-entropy computed directly on logits.
pub struct BceWithLogitsLoss;

impl BceWithLogitsLoss {
    /// mean(max(z, 0) − z·y + ln(1 + e^−|z|)), the overflow-free form of
    /// −[y·ln σ(z) + (1−y)·ln(1−σ(z))].
    pub fn loss(logits: &[f64], expected: &[f64]) -> f64 {
        let n = logits.len() as f64;
        logits.iter().zip(expected.iter())
            .map(|(&z, &y)| z.max(0.0) - z * y + (-z.abs()).exp().ln_1p())
            .sum::<f64>() / n
    }

    /// Per-logit gradient: (σ(z) − y) / n
    pub fn derivative(logits: &[f64], expected: &[f64]) -> Vec<f64> {
        let n = logits.len() as f64;
        logits.iter().zip(expected.iter())
            .map(|(&z, &y)| (sigmoid(z) - y) / n)
            .collect()
    }
}
