//! Twerky loss: weighted BCE plus per-channel spatial Dice

use std::rc::Rc;

use ndarray::Array1;

use crate::autograd::{sigmoid, BackwardOp};
use crate::loss::bce::mean_bce_with_grad;
use crate::loss::LossFn;
use crate::trace::{TraceStep, TRACER};
use crate::Tensor;

const DEFAULT_ALPHA: f32 = 0.5;
const DEFAULT_BETA: f32 = 0.5;
const DEFAULT_SMOOTH: f32 = 1e-5;

/// Weighted combination of binary cross-entropy and per-channel soft Dice.
///
/// The BCE term runs over the raw logits. The Dice term sums intersection
/// and union over the spatial dimensions only, keeping batch and channel
/// axes, then averages the per-channel Dice loss over channels and batch:
///
/// ```text
/// L = alpha * bce + beta * mean(1 - dice(n, c))
/// ```
///
/// # Example
///
/// ```
/// use segmentar::loss::{LossFn, TwerkyLoss};
/// use segmentar::Tensor;
///
/// // One sample, 2 channels, 2x2 plane
/// let loss_fn = TwerkyLoss::new(2, 4);
/// let logits = Tensor::from_vec(vec![2.0, -1.0, 0.5, -2.0, 1.0, -0.5, 2.0, -1.5], true);
/// let target = Tensor::from_vec(vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0], false);
///
/// let loss = loss_fn.forward(&logits, &target);
/// assert!(loss.data()[0] > 0.0);
/// ```
#[derive(Debug)]
pub struct TwerkyLoss {
    /// Channel count of the prediction tensor
    num_classes: usize,
    /// Spatial elements per channel (H*W)
    plane_size: usize,
    /// Weight for the BCE component
    alpha: f32,
    /// Weight for the Dice component
    beta: f32,
    /// Smoothing constant preventing division by zero
    smooth: f32,
}

impl TwerkyLoss {
    /// Create a Twerky loss with the default weights (0.5 / 0.5)
    pub fn new(num_classes: usize, plane_size: usize) -> Self {
        Self::with_weights(num_classes, plane_size, DEFAULT_ALPHA, DEFAULT_BETA)
    }

    /// Create a Twerky loss with explicit BCE and Dice weights
    pub fn with_weights(num_classes: usize, plane_size: usize, alpha: f32, beta: f32) -> Self {
        assert!(num_classes > 0, "num_classes must be positive");
        assert!(plane_size > 0, "plane_size must be positive");
        assert!(alpha.is_finite() && alpha >= 0.0, "alpha must be non-negative");
        assert!(beta.is_finite() && beta >= 0.0, "beta must be non-negative");
        Self {
            num_classes,
            plane_size,
            alpha,
            beta,
            smooth: DEFAULT_SMOOTH,
        }
    }

    /// Override the smoothing constant
    pub fn with_smooth(mut self, smooth: f32) -> Self {
        assert!(smooth > 0.0, "smooth must be positive");
        self.smooth = smooth;
        self
    }
}

impl LossFn for TwerkyLoss {
    fn forward(&self, predictions: &Tensor, targets: &Tensor) -> Tensor {
        assert_eq!(
            predictions.len(),
            targets.len(),
            "Predictions and targets must have same length"
        );
        let chunk = self.num_classes * self.plane_size;
        assert_eq!(
            predictions.len() % chunk,
            0,
            "Predictions must be batches of num_classes * plane_size"
        );
        let batch_size = predictions.len() / chunk;

        TRACER.span(TraceStep::Forward, "Twerky", || {
            let (bce, bce_grad) = mean_bce_with_grad(predictions.data(), targets.data());

            let probs = sigmoid(predictions);

            // Per-(sample, channel) Dice over the spatial plane only
            let planes = (batch_size * self.num_classes) as f32;
            let mut dice_sum = 0.0;
            let mut dice_grad = vec![0.0f32; predictions.len()];
            {
                let ps = probs.data().as_slice().expect("contiguous tensor data");
                let ts = targets.data().as_slice().expect("contiguous tensor data");

                for n in 0..batch_size {
                    for c in 0..self.num_classes {
                        let lo = (n * self.num_classes + c) * self.plane_size;
                        let hi = lo + self.plane_size;

                        let mut inter = 0.0;
                        let mut sets_sum = 0.0;
                        for (&p, &t) in ps[lo..hi].iter().zip(ts[lo..hi].iter()) {
                            inter += p * t;
                            sets_sum += p + t;
                        }

                        let denom = sets_sum + self.smooth;
                        let num = 2.0 * inter + self.smooth;
                        dice_sum += num / denom;

                        for j in lo..hi {
                            dice_grad[j] = -self.beta * (2.0 * ts[j] * denom - num)
                                / (denom * denom)
                                / planes;
                        }
                    }
                }
            }

            let dice_loss = 1.0 - dice_sum / planes;
            let value = self.alpha * bce + self.beta * dice_loss;

            let mut loss = Tensor::from_vec(vec![value], true);

            if predictions.requires_grad() {
                loss.set_backward_op(Rc::new(TwerkyBackward {
                    predictions: predictions.clone(),
                    probs,
                    bce_grad: &bce_grad * self.alpha,
                    dice_grad: Array1::from(dice_grad),
                }));
            }

            loss
        })
    }

    fn name(&self) -> &'static str {
        "Twerky"
    }
}

struct TwerkyBackward {
    predictions: Tensor,
    probs: Tensor,
    bce_grad: Array1<f32>,
    dice_grad: Array1<f32>,
}

impl BackwardOp for TwerkyBackward {
    fn backward(&self) {
        // BCE straight to the logits; the Dice term rides the sigmoid op.
        self.predictions.accumulate_grad(self.bce_grad.clone());
        self.probs.accumulate_grad(self.dice_grad.clone());
        if let Some(op) = self.probs.backward_op() {
            op.backward();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn finite_difference<F>(f: F, x: &[f32], epsilon: f32) -> Vec<f32>
    where
        F: Fn(&[f32]) -> f32,
    {
        let mut probe = x.to_vec();
        let mut grad = Vec::with_capacity(x.len());
        for i in 0..x.len() {
            probe[i] = x[i] + epsilon;
            let f_plus = f(&probe);
            probe[i] = x[i] - epsilon;
            let f_minus = f(&probe);
            probe[i] = x[i];
            grad.push((f_plus - f_minus) / (2.0 * epsilon));
        }
        grad
    }

    /// Representative 2x1x4x4 logits with a matching binary target.
    fn example_pair() -> (Vec<f32>, Vec<f32>) {
        let logits: Vec<f32> = (0..32).map(|i| ((i as f32) * 0.53).cos() * 2.0).collect();
        let targets: Vec<f32> = (0..32).map(|i| if i % 4 == 0 { 1.0 } else { 0.0 }).collect();
        (logits, targets)
    }

    #[test]
    fn test_twerky_basic() {
        let (logits, targets) = example_pair();
        let loss_fn = TwerkyLoss::new(1, 16);

        let x = Tensor::from_vec(logits, true);
        let t = Tensor::from_vec(targets, false);
        let loss = loss_fn.forward(&x, &t);

        assert!(loss.data()[0].is_finite());
        assert!(loss.data()[0] >= 0.0);
    }

    #[test]
    fn test_twerky_perfect_prediction() {
        let logits = vec![100.0, -100.0, 100.0, -100.0];
        let targets = vec![1.0, 0.0, 1.0, 0.0];
        let loss_fn = TwerkyLoss::new(1, 4);

        let loss = loss_fn.forward(
            &Tensor::from_vec(logits, false),
            &Tensor::from_vec(targets, false),
        );
        assert!(loss.data()[0] < 0.01);
    }

    #[test]
    fn test_twerky_alpha_only_is_weighted_bce() {
        // beta = 0 reduces the loss to alpha * bce
        let (logits, targets) = example_pair();
        let x = Tensor::from_vec(logits.clone(), false);
        let t = Tensor::from_vec(targets.clone(), false);

        let loss = TwerkyLoss::with_weights(1, 16, 1.0, 0.0).forward(&x, &t);
        let (bce, _) = mean_bce_with_grad(x.data(), t.data());

        assert_abs_diff_eq!(loss.data()[0], bce, epsilon = 1e-6);
    }

    #[test]
    fn test_twerky_default_weights() {
        // new() must agree with explicit 0.5 / 0.5 weights
        let (logits, targets) = example_pair();
        let x = Tensor::from_vec(logits, false);
        let t = Tensor::from_vec(targets, false);

        let a = TwerkyLoss::new(1, 16).forward(&x, &t);
        let b = TwerkyLoss::with_weights(1, 16, 0.5, 0.5).forward(&x, &t);
        assert_abs_diff_eq!(a.data()[0], b.data()[0], epsilon = 1e-7);
    }

    #[test]
    fn test_twerky_gradient_check() {
        let (logits, targets) = example_pair();
        let loss_fn = TwerkyLoss::new(1, 16);

        let x = Tensor::from_vec(logits.clone(), true);
        let t = Tensor::from_vec(targets.clone(), false);
        let loss = loss_fn.forward(&x, &t);
        if let Some(op) = loss.backward_op() {
            op.backward();
        }
        let analytical = x.grad().expect("gradient should be available");

        let numerical = finite_difference(
            |v| {
                let xt = Tensor::from_vec(v.to_vec(), false);
                let tt = Tensor::from_vec(targets.clone(), false);
                loss_fn.forward(&xt, &tt).data()[0]
            },
            &logits,
            1e-3,
        );

        for i in 0..logits.len() {
            assert_abs_diff_eq!(analytical[i], numerical[i], epsilon = 1e-2);
        }
    }

    #[test]
    fn test_twerky_gradient_check_multichannel() {
        // Two samples, three channels, 2x1 plane
        let logits: Vec<f32> = (0..12).map(|i| ((i as f32) * 0.71).sin() * 1.5).collect();
        let targets: Vec<f32> = (0..12).map(|i| if i % 2 == 0 { 1.0 } else { 0.0 }).collect();
        let loss_fn = TwerkyLoss::new(3, 2);

        let x = Tensor::from_vec(logits.clone(), true);
        let t = Tensor::from_vec(targets.clone(), false);
        let loss = loss_fn.forward(&x, &t);
        if let Some(op) = loss.backward_op() {
            op.backward();
        }
        let analytical = x.grad().expect("gradient should be available");

        let numerical = finite_difference(
            |v| {
                let xt = Tensor::from_vec(v.to_vec(), false);
                let tt = Tensor::from_vec(targets.clone(), false);
                loss_fn.forward(&xt, &tt).data()[0]
            },
            &logits,
            1e-3,
        );

        for i in 0..logits.len() {
            assert_abs_diff_eq!(analytical[i], numerical[i], epsilon = 1e-2);
        }
    }

    #[test]
    fn test_twerky_no_grad() {
        let x = Tensor::from_vec(vec![1.0, -1.0], false);
        let t = Tensor::from_vec(vec![1.0, 0.0], false);
        let loss = TwerkyLoss::new(1, 2).forward(&x, &t);
        assert!(loss.data()[0] > 0.0);
        assert!(loss.backward_op().is_none());
    }

    #[test]
    #[should_panic(expected = "must have same length")]
    fn test_twerky_mismatched_lengths() {
        let x = Tensor::from_vec(vec![1.0, 2.0], false);
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0], false);
        TwerkyLoss::new(1, 2).forward(&x, &t);
    }

    #[test]
    #[should_panic(expected = "alpha must be non-negative")]
    fn test_twerky_negative_alpha() {
        TwerkyLoss::with_weights(1, 4, -0.5, 0.5);
    }

    #[test]
    #[should_panic(expected = "smooth must be positive")]
    fn test_twerky_zero_smooth() {
        let _ = TwerkyLoss::new(1, 4).with_smooth(0.0);
    }

    #[test]
    fn test_twerky_name() {
        assert_eq!(TwerkyLoss::new(1, 4).name(), "Twerky");
    }
}
