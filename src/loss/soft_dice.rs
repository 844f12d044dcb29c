use crate::activation::activation::softmax;

/// Soft Dice loss over a whole patch, on voxel-wise logits.
///
/// L = 1 − mean_c (2·Σ_v p_cv·g_cv + ε) / (Σ_v p_cv + Σ_v g_cv + ε)
/// with p = softmax over classes per voxel.
pub struct SoftDiceLoss;

const EPS: f64 = 1e-5;

impl SoftDiceLoss {
    /// Returns the loss and ∂L/∂logits for every voxel.
    pub fn loss_and_derivative(logits: &[Vec<f64>], expected: &[Vec<f64>]) -> (f64, Vec<Vec<f64>>) {
        let num_classes = logits.first().map_or(0, |l| l.len());
        if num_classes == 0 {
            return (0.0, vec![]);
        }
        let posteriors: Vec<Vec<f64>> = logits.iter().map(|z| softmax(z)).collect();

        let mut intersection = vec![0.0; num_classes];
        let mut denominator = vec![EPS; num_classes];
        for (p, g) in posteriors.iter().zip(expected.iter()) {
            for c in 0..num_classes {
                intersection[c] += p[c] * g[c];
                denominator[c] += p[c] + g[c];
            }
        }

        let dice: Vec<f64> = (0..num_classes)
            .map(|c| (2.0 * intersection[c] + EPS) / denominator[c])
            .collect();
        let loss = 1.0 - dice.iter().sum::<f64>() / num_classes as f64;

        let grads = posteriors.iter().zip(expected.iter())
            .map(|(p, g)| {
                // ∂L/∂p_c for this voxel
                let d_p: Vec<f64> = (0..num_classes)
                    .map(|c| {
                        let num = 2.0 * intersection[c] + EPS;
                        -(2.0 * g[c] * denominator[c] - num) / (denominator[c] * denominator[c])
                            / num_classes as f64
                    })
                    .collect();
                // through the softmax Jacobian
                let weighted: f64 = p.iter().zip(d_p.iter()).map(|(pk, dk)| pk * dk).sum();
                p.iter().zip(d_p.iter()).map(|(pk, dk)| pk * (dk - weighted)).collect()
            })
            .collect();

        (loss, grads)
    }
}
