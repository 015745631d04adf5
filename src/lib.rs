//! Differentiable segmentation losses on a tape-based autograd tensor
//!
//! `segmentar` provides the loss side of an image-segmentation training
//! stack:
//!
//! - [`loss::BCEDiceLoss`] - equal-weight binary cross-entropy + soft Dice
//! - [`loss::DiceLoss`] - `1 - Dice coefficient` over channel softmax,
//!   single- or multi-class, with ignore masking
//! - [`loss::TwerkyLoss`] - weighted BCE + per-channel spatial Dice
//! - [`loss::dice_coeff`] / [`loss::multiclass_dice_coeff`] - batch-averaged
//!   overlap metrics for evaluation
//! - [`loss::build_target`] - class-index maps to one-hot channel stacks
//!
//! All losses return a scalar [`Tensor`] wired into a small gradient tape,
//! so an external training loop can call [`autograd::backward`] and read
//! gradients off the logits. Tensors are flat `f32` buffers; shaped
//! operations receive their NCHW geometry explicitly.
//!
//! # Example
//!
//! ```
//! use segmentar::loss::{BCEDiceLoss, LossFn};
//! use segmentar::{autograd, Tensor};
//!
//! // Two samples of 2x2 logits with binary targets.
//! let logits = Tensor::from_vec(vec![2.0, -1.0, 0.5, -2.0, 1.5, 0.0, -0.5, 3.0], true);
//! let targets = Tensor::from_vec(vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0], false);
//!
//! let loss_fn = BCEDiceLoss::new(4); // 4 elements per sample
//! let mut loss = loss_fn.forward(&logits, &targets);
//! autograd::backward(&mut loss, None);
//!
//! assert!(loss.data()[0] > 0.0);
//! assert!(logits.grad().is_some());
//! ```

pub mod autograd;
pub mod config;
pub mod loss;
pub mod trace;

pub use autograd::Tensor;
