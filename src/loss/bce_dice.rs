//! Combined binary cross-entropy and soft Dice loss

use std::rc::Rc;

use ndarray::Array1;

use crate::autograd::{sigmoid, BackwardOp};
use crate::loss::bce::mean_bce_with_grad;
use crate::loss::LossFn;
use crate::trace::{TraceStep, TRACER};
use crate::Tensor;

/// Dice smoothing constant shared by numerator and denominator
const SMOOTH: f32 = 1e-5;
/// Fixed weight of the BCE term
const BCE_WEIGHT: f32 = 0.5;

/// Combined BCE + soft Dice loss for binary segmentation.
///
/// Computes binary cross-entropy on the raw logits and a smoothed soft Dice
/// loss on the sigmoid activations, each sample flattened, and returns
/// `0.5 * bce + dice_loss`.
///
/// # Example
///
/// ```
/// use segmentar::loss::{BCEDiceLoss, LossFn};
/// use segmentar::Tensor;
///
/// let loss_fn = BCEDiceLoss::new(4); // 4 elements per sample
/// let logits = Tensor::from_vec(vec![2.0, -1.0, 0.5, -2.0], true);
/// let target = Tensor::from_vec(vec![1.0, 0.0, 1.0, 0.0], false);
///
/// let loss = loss_fn.forward(&logits, &target);
/// assert!(loss.data()[0] > 0.0);
/// ```
#[derive(Debug)]
pub struct BCEDiceLoss {
    /// Elements per sample (C*H*W of one prediction map)
    sample_size: usize,
}

impl BCEDiceLoss {
    /// Create a BCE-Dice loss for samples of `sample_size` elements
    pub fn new(sample_size: usize) -> Self {
        assert!(sample_size > 0, "sample_size must be positive");
        Self { sample_size }
    }
}

impl LossFn for BCEDiceLoss {
    fn forward(&self, predictions: &Tensor, targets: &Tensor) -> Tensor {
        assert_eq!(
            predictions.len(),
            targets.len(),
            "Predictions and targets must have same length"
        );
        assert_eq!(
            predictions.len() % self.sample_size,
            0,
            "Predictions must be batches of sample_size elements"
        );
        let batch_size = predictions.len() / self.sample_size;

        TRACER.span(TraceStep::Forward, "BCEDice", || {
            let (bce, bce_grad) = mean_bce_with_grad(predictions.data(), targets.data());

            let probs = sigmoid(predictions);

            let mut dice_sum = 0.0;
            let mut dice_grad = vec![0.0f32; predictions.len()];
            {
                let ps = probs.data().as_slice().expect("contiguous tensor data");
                let ts = targets.data().as_slice().expect("contiguous tensor data");

                for i in 0..batch_size {
                    let lo = i * self.sample_size;
                    let hi = lo + self.sample_size;

                    let mut inter = 0.0;
                    let mut sets_sum = 0.0;
                    for (&p, &t) in ps[lo..hi].iter().zip(ts[lo..hi].iter()) {
                        inter += p * t;
                        sets_sum += p + t;
                    }

                    let denom = sets_sum + SMOOTH;
                    let num = 2.0 * inter + SMOOTH;
                    dice_sum += num / denom;

                    // ∂(1 - mean dice)/∂p_j = -(2 t_j denom - num) / denom² / batch
                    for j in lo..hi {
                        dice_grad[j] =
                            -(2.0 * ts[j] * denom - num) / (denom * denom) / batch_size as f32;
                    }
                }
            }

            let dice_loss = 1.0 - dice_sum / batch_size as f32;
            let value = BCE_WEIGHT * bce + dice_loss;

            let mut loss = Tensor::from_vec(vec![value], true);

            if predictions.requires_grad() {
                loss.set_backward_op(Rc::new(BCEDiceBackward {
                    predictions: predictions.clone(),
                    probs,
                    bce_grad: &bce_grad * BCE_WEIGHT,
                    dice_grad: Array1::from(dice_grad),
                }));
            }

            loss
        })
    }

    fn name(&self) -> &'static str {
        "BCEDice"
    }
}

struct BCEDiceBackward {
    predictions: Tensor,
    probs: Tensor,
    bce_grad: Array1<f32>,
    dice_grad: Array1<f32>,
}

impl BackwardOp for BCEDiceBackward {
    fn backward(&self) {
        // The BCE term flows straight to the logits; the Dice term is a
        // gradient w.r.t. the sigmoid activations and rides the sigmoid op,
        // which applies σ' and recurses into the upstream graph.
        self.predictions.accumulate_grad(self.bce_grad.clone());
        self.probs.accumulate_grad(self.dice_grad.clone());
        if let Some(op) = self.probs.backward_op() {
            op.backward();
        }
    }
}
