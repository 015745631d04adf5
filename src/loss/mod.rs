//! Loss functions for segmentation training
//!
//! This module provides the objectives used to train binary and multiclass
//! segmentation models, plus the overlap metrics used to evaluate them:
//!
//! - [`BCEDiceLoss`] - equal-weight binary cross-entropy + soft Dice on
//!   sigmoid activations, each sample flattened
//! - [`DiceLoss`] - `1 - Dice coefficient` over channel softmax, with
//!   single-channel or per-class dispatch and ignore masking
//! - [`TwerkyLoss`] - weighted BCE + per-channel spatial Dice
//! - [`dice_coeff`] / [`multiclass_dice_coeff`] - batch-averaged overlap
//!   scores for evaluation
//! - [`build_target`] - class-index maps to one-hot channel stacks

mod bce;
mod bce_dice;
mod dice;
mod traits;
mod twerky;

pub use bce_dice::BCEDiceLoss;
pub use dice::{build_target, dice_coeff, multiclass_dice_coeff, DiceLoss};
pub use traits::LossFn;
pub use twerky::TwerkyLoss;
