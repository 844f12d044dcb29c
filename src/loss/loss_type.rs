use serde::{Serialize, Deserialize};

use crate::loss::bce::BceWithLogitsLoss;
use crate::loss::cross_entropy::CrossEntropyLoss;
use crate::loss::mse::MseLoss;
use crate::loss::soft_dice::SoftDiceLoss;

/// Value of a loss over a set of outputs plus ∂L/∂logits for each of them.
#[derive(Debug, Clone, PartialEq)]
pub struct LossOutput {
    pub value: f64,
    pub logit_grads: Vec<Vec<f64>>,
}

/// Loss applied to the voxel-wise logits of a segmentation patch.
///
/// - `CrossEntropy`: mean voxel-wise softmax cross-entropy.
/// - `SoftDice`    : 1 − mean soft Dice over classes.
/// - `Mixture`     : `cross_entropy_weight`·CE + (1 − weight)·SoftDice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SegmentationLossType {
    CrossEntropy,
    SoftDice,
    Mixture { cross_entropy_weight: f64 },
}

impl SegmentationLossType {
    /// `logits` and `expected` hold one class vector per voxel.
    pub fn evaluate(&self, logits: &[Vec<f64>], expected: &[Vec<f64>]) -> LossOutput {
        match *self {
            SegmentationLossType::CrossEntropy => voxel_cross_entropy(logits, expected),
            SegmentationLossType::SoftDice => {
                let (value, logit_grads) = SoftDiceLoss::loss_and_derivative(logits, expected);
                LossOutput { value, logit_grads }
            }
            SegmentationLossType::Mixture { cross_entropy_weight: w } => {
                let ce = voxel_cross_entropy(logits, expected);
                let (dice, dice_grads) = SoftDiceLoss::loss_and_derivative(logits, expected);
                let logit_grads = ce.logit_grads.iter().zip(dice_grads.iter())
                    .map(|(a, b)| a.iter().zip(b.iter()).map(|(x, y)| w * x + (1.0 - w) * y).collect())
                    .collect();
                LossOutput { value: w * ce.value + (1.0 - w) * dice, logit_grads }
            }
        }
    }
}

fn voxel_cross_entropy(logits: &[Vec<f64>], expected: &[Vec<f64>]) -> LossOutput {
    let n = logits.len().max(1) as f64;
    let value = logits.iter().zip(expected.iter())
        .map(|(z, t)| CrossEntropyLoss::loss(z, t))
        .sum::<f64>() / n;
    let logit_grads = logits.iter().zip(expected.iter())
        .map(|(z, t)| CrossEntropyLoss::derivative(z, t).into_iter().map(|g| g / n).collect())
        .collect();
    LossOutput { value, logit_grads }
}

/// Loss for scalar (per-subject) models.
///
/// - `Mse`                         : pair with `Identity` posteriors (regression).
/// - `BinaryCrossEntropyWithLogits`: pair with `Sigmoid` posteriors.
/// - `CrossEntropy`                : pair with `Softmax` posteriors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarLossType {
    Mse,
    BinaryCrossEntropyWithLogits,
    CrossEntropy,
}

impl ScalarLossType {
    /// Mean loss over the batch; `logits[i]` and `expected[i]` belong to subject `i`.
    pub fn evaluate(&self, logits: &[Vec<f64>], expected: &[Vec<f64>]) -> LossOutput {
        let n = logits.len().max(1) as f64;
        let mut value = 0.0;
        let mut logit_grads = Vec::with_capacity(logits.len());
        for (z, t) in logits.iter().zip(expected.iter()) {
            let (l, g) = match self {
                ScalarLossType::Mse => (MseLoss::loss(z, t), MseLoss::derivative(z, t)),
                ScalarLossType::BinaryCrossEntropyWithLogits => {
                    (BceWithLogitsLoss::loss(z, t), BceWithLogitsLoss::derivative(z, t))
                }
                ScalarLossType::CrossEntropy => {
                    (CrossEntropyLoss::loss(z, t), CrossEntropyLoss::derivative(z, t))
                }
            };
            value += l;
            logit_grads.push(g.into_iter().map(|x| x / n).collect());
        }
        LossOutput { value: value / n, logit_grads }
    }
}
