//! Numerically stable binary cross-entropy on raw logits
//!
//! Shared by [`BCEDiceLoss`](super::BCEDiceLoss) and
//! [`TwerkyLoss`](super::TwerkyLoss): both pair a BCE term over the raw
//! logits with a soft Dice term over the sigmoid activations.
//!
//! # Formula
//!
//! ```text
//! L_i = max(x_i, 0) - x_i * t_i + log(1 + exp(-|x_i|))
//! L = mean(L_i) over all i
//! ```
//!
//! Gradient: `∂L/∂x_i = (σ(x_i) - t_i) / N`

use crate::autograd::sigmoid_scalar;
use ndarray::Array1;

/// Numerically stable BCE for one logit/target pair:
/// max(x, 0) - x*t + log(1 + exp(-|x|))
pub(crate) fn stable_bce(logit: f32, target: f32) -> f32 {
    let relu = logit.max(0.0);
    let abs_x = logit.abs();
    relu - logit * target + (1.0 + (-abs_x).exp()).ln()
}

/// Mean BCE over all elements, plus its gradient w.r.t. the logits.
pub(crate) fn mean_bce_with_grad(logits: &Array1<f32>, targets: &Array1<f32>) -> (f32, Array1<f32>) {
    let n = logits.len() as f32;
    let mut total = 0.0;
    let mut grad = Array1::<f32>::zeros(logits.len());

    for (i, (&x, &t)) in logits.iter().zip(targets.iter()).enumerate() {
        total += stable_bce(x, t);
        grad[i] = (sigmoid_scalar(x) - t) / n;
    }

    (total / n, grad)
}
