pub mod bce;
pub mod cross_entropy;
pub mod loss_type;
pub mod mse;
pub mod soft_dice;

pub use bce::BceWithLogitsLoss;
pub use cross_entropy::CrossEntropyLoss;
pub use loss_type::{LossOutput, ScalarLossType, SegmentationLossType};
pub use mse::MseLoss;
pub use soft_dice::SoftDiceLoss;
