//! Dice coefficients, one-hot target construction, and the Dice loss

mod build_target;
mod coeff;
mod dice_loss;

pub use build_target::build_target;
pub use coeff::{dice_coeff, multiclass_dice_coeff};
pub use dice_loss::DiceLoss;
