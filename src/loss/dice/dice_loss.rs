//! Dice loss over channel-softmax probabilities

use std::rc::Rc;

use ndarray::Array1;

use crate::autograd::{channel_softmax, BackwardOp};
use crate::loss::LossFn;
use crate::trace::{TraceStep, TRACER};
use crate::Tensor;

use super::coeff::{dice_coeff, multiclass_dice_coeff, sample_dice_grad};

const DEFAULT_EPSILON: f32 = 1e-6;

/// Dice loss: `1 - Dice coefficient` over channel-softmax probabilities.
///
/// The prediction logits are softmaxed across the class dimension, then
/// scored with [`dice_coeff`] (whole samples flattened) or
/// [`multiclass_dice_coeff`] (per channel) depending on the `multiclass`
/// flag. The gradient chains the coefficient derivative through the softmax
/// Jacobian; positions labeled with the ignore sentinel receive none.
///
/// # Example
///
/// ```
/// use segmentar::loss::{DiceLoss, LossFn};
/// use segmentar::Tensor;
///
/// // One sample, 2 classes, 2x2 plane
/// let logits = Tensor::from_vec(vec![2.0, -1.0, 0.5, 1.0, -2.0, 1.0, -0.5, -1.0], true);
/// let target = Tensor::from_vec(vec![1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0], false);
///
/// let loss_fn = DiceLoss::new(2, 4, true);
/// let loss = loss_fn.forward(&logits, &target);
/// assert!(loss.data()[0] >= 0.0);
/// ```
#[derive(Debug)]
pub struct DiceLoss {
    /// Channel count of the prediction tensor
    num_classes: usize,
    /// Spatial elements per channel (H*W)
    plane_size: usize,
    /// Score each channel independently instead of whole flattened samples
    multiclass: bool,
    /// Target label excluded from the coefficient
    ignore_index: Option<usize>,
    /// Stability epsilon
    epsilon: f32,
}

impl DiceLoss {
    /// Create a Dice loss for predictions of `num_classes` channels with
    /// `plane_size` spatial elements each.
    pub fn new(num_classes: usize, plane_size: usize, multiclass: bool) -> Self {
        assert!(num_classes > 0, "num_classes must be positive");
        assert!(plane_size > 0, "plane_size must be positive");
        Self {
            num_classes,
            plane_size,
            multiclass,
            ignore_index: None,
            epsilon: DEFAULT_EPSILON,
        }
    }

    /// Exclude positions labeled `ignore_index` from the coefficient.
    pub fn with_ignore_index(mut self, ignore_index: usize) -> Self {
        self.ignore_index = Some(ignore_index);
        self
    }

    /// Override the stability epsilon.
    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        assert!(epsilon > 0.0, "epsilon must be positive");
        self.epsilon = epsilon;
        self
    }
}

impl LossFn for DiceLoss {
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

        TRACER.span(TraceStep::Forward, "Dice", || {
            let probs = channel_softmax(predictions, self.num_classes, self.plane_size);

            let coeff = if self.multiclass {
                multiclass_dice_coeff(
                    &probs,
                    targets,
                    batch_size,
                    self.num_classes,
                    self.ignore_index,
                    self.epsilon,
                )
            } else {
                dice_coeff(&probs, targets, batch_size, self.ignore_index, self.epsilon)
            };

            let mut loss = Tensor::from_vec(vec![1.0 - coeff], true);

            if predictions.requires_grad() {
                // Gradient w.r.t. the probabilities; the softmax op chains it
                // back to the logits.
                let mut grad = vec![0.0f32; predictions.len()];
                {
                    let ps = probs.data().as_slice().expect("contiguous tensor data");
                    let ts = targets.data().as_slice().expect("contiguous tensor data");
                    let sentinel = self.ignore_index.map(|ix| ix as f32);

                    if self.multiclass {
                        let scale = -1.0 / (batch_size * self.num_classes) as f32;
                        for c in 0..self.num_classes {
                            for n in 0..batch_size {
                                let lo = (n * self.num_classes + c) * self.plane_size;
                                let hi = lo + self.plane_size;
                                sample_dice_grad(
                                    &ps[lo..hi],
                                    &ts[lo..hi],
                                    sentinel,
                                    self.epsilon,
                                    scale,
                                    &mut grad[lo..hi],
                                );
                            }
                        }
                    } else {
                        let scale = -1.0 / batch_size as f32;
                        for n in 0..batch_size {
                            let lo = n * chunk;
                            let hi = lo + chunk;
                            sample_dice_grad(
                                &ps[lo..hi],
                                &ts[lo..hi],
                                sentinel,
                                self.epsilon,
                                scale,
                                &mut grad[lo..hi],
                            );
                        }
                    }
                }

                loss.set_backward_op(Rc::new(DiceBackward {
                    probs,
                    grad: Array1::from(grad),
                }));
            }

            loss
        })
    }

    fn name(&self) -> &'static str {
        "Dice"
    }
}

struct DiceBackward {
    probs: Tensor,
    grad: Array1<f32>,
}

impl BackwardOp for DiceBackward {
    fn backward(&self) {
        // Seed the probabilities and let the softmax op carry the gradient
        // the rest of the way to the logits.
        self.probs.accumulate_grad(self.grad.clone());
        if let Some(op) = self.probs.backward_op() {
            op.backward();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

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

    #[test]
    fn test_dice_loss_equals_one_minus_coeff() {
        // multiclass = false must reduce to 1 - dice_coeff on the softmaxed input
        let logits = vec![2.0, -1.0, 0.5, 1.0, -2.0, 1.0, -0.5, -1.0];
        let target = vec![1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0];

        let x = Tensor::from_vec(logits.clone(), false);
        let t = Tensor::from_vec(target.clone(), false);

        let loss_fn = DiceLoss::new(2, 4, false);
        let loss = loss_fn.forward(&x, &t);

        let probs = channel_softmax(&Tensor::from_vec(logits, false), 2, 4);
        let coeff = dice_coeff(&probs, &t, 1, None, DEFAULT_EPSILON);

        assert_relative_eq!(loss.data()[0], 1.0 - coeff, epsilon = 1e-6);
    }

    #[test]
    fn test_dice_loss_in_unit_range() {
        let x = Tensor::from_vec(vec![3.0, -3.0, 1.0, -1.0, -3.0, 3.0, -1.0, 1.0], false);
        let t = Tensor::from_vec(vec![1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0], false);

        for &multiclass in &[false, true] {
            let loss_fn = DiceLoss::new(2, 4, multiclass);
            let loss = loss_fn.forward(&x, &t);
            let v = loss.data()[0];
            assert!((0.0..=1.0).contains(&v), "loss {v} outside [0, 1]");
        }
    }

    #[test]
    fn test_dice_loss_gradient_check_single() {
        let logits = vec![0.5, -1.0, 1.5, 0.2, -0.3, 2.0, 0.1, -0.7];
        let target = vec![1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0];
        let loss_fn = DiceLoss::new(2, 4, false);

        let x = Tensor::from_vec(logits.clone(), true);
        let t = Tensor::from_vec(target.clone(), false);
        let loss = loss_fn.forward(&x, &t);
        if let Some(op) = loss.backward_op() {
            op.backward();
        }
        let analytical = x.grad().expect("gradient should be available");

        let numerical = finite_difference(
            |v| {
                let xt = Tensor::from_vec(v.to_vec(), false);
                let tt = Tensor::from_vec(target.clone(), false);
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
    fn test_dice_loss_gradient_check_multiclass() {
        let logits = vec![0.8, -0.2, 0.3, 1.1, -0.6, 0.4, 0.9, -1.2, 0.2, 0.5, -0.4, 0.7];
        let target = vec![1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0];
        let loss_fn = DiceLoss::new(3, 2, true);

        let x = Tensor::from_vec(logits.clone(), true);
        let t = Tensor::from_vec(target.clone(), false);
        let loss = loss_fn.forward(&x, &t);
        if let Some(op) = loss.backward_op() {
            op.backward();
        }
        let analytical = x.grad().expect("gradient should be available");

        let numerical = finite_difference(
            |v| {
                let xt = Tensor::from_vec(v.to_vec(), false);
                let tt = Tensor::from_vec(target.clone(), false);
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
    fn test_dice_loss_ignored_positions_get_zero_gradient() {
        // Pixel 1 carries the sentinel in both channels (build_target layout)
        let logits = vec![0.5, -1.0, 1.5, 0.2, -0.3, 2.0, 0.1, -0.7];
        let target = vec![1.0, 255.0, 1.0, 0.0, 0.0, 255.0, 0.0, 1.0];

        let loss_fn = DiceLoss::new(2, 4, true).with_ignore_index(255);
        let x = Tensor::from_vec(logits, true);
        let t = Tensor::from_vec(target, false);
        let loss = loss_fn.forward(&x, &t);
        if let Some(op) = loss.backward_op() {
            op.backward();
        }

        let grad = x.grad().expect("gradient should be available");
        // Pixel index 1 in both channels of the single sample
        assert_eq!(grad[1], 0.0);
        assert_eq!(grad[5], 0.0);
        // Unmasked pixels still receive gradient
        assert!(grad[0] != 0.0);
    }

    #[test]
    fn test_dice_loss_no_grad() {
        let x = Tensor::from_vec(vec![1.0, -1.0, 0.5, -0.5], false);
        let t = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0], false);
        let loss = DiceLoss::new(2, 2, false).forward(&x, &t);

        assert!(loss.data()[0].is_finite());
        assert!(loss.backward_op().is_none());
    }

    #[test]
    fn test_dice_loss_name() {
        assert_eq!(DiceLoss::new(2, 4, false).name(), "Dice");
    }

    #[test]
    #[should_panic(expected = "batches of num_classes * plane_size")]
    fn test_dice_loss_bad_geometry() {
        let x = Tensor::from_vec(vec![1.0; 6], false);
        let t = Tensor::from_vec(vec![0.0; 6], false);
        DiceLoss::new(2, 4, false).forward(&x, &t);
    }
}
