//! Batch-averaged Dice coefficients with ignore masking

use crate::Tensor;

/// Dice ratio for one flattened sample, with the empty-sample guard.
///
/// Positions whose target equals the sentinel are excluded from both
/// tensors before the reductions. A sample whose masked prediction and
/// target are both all-zero scores exactly 1.
fn sample_dice(x: &[f32], t: &[f32], sentinel: Option<f32>, epsilon: f32) -> f32 {
    let mut inter = 0.0;
    let mut sets_sum = 0.0;
    for (&xi, &ti) in x.iter().zip(t.iter()) {
        if let Some(s) = sentinel {
            if ti == s {
                continue;
            }
        }
        inter += xi * ti;
        sets_sum += xi + ti;
    }

    if sets_sum == 0.0 {
        sets_sum = 2.0 * inter;
    }

    (2.0 * inter + epsilon) / (sets_sum + epsilon)
}

/// Accumulate `scale * ∂dice/∂x_j` for one flattened sample into `grad`.
///
/// Masked positions and empty samples (where the ratio is pinned at 1)
/// contribute nothing.
pub(super) fn sample_dice_grad(
    x: &[f32],
    t: &[f32],
    sentinel: Option<f32>,
    epsilon: f32,
    scale: f32,
    grad: &mut [f32],
) {
    let mut inter = 0.0;
    let mut sets_sum = 0.0;
    for (&xi, &ti) in x.iter().zip(t.iter()) {
        if let Some(s) = sentinel {
            if ti == s {
                continue;
            }
        }
        inter += xi * ti;
        sets_sum += xi + ti;
    }

    if sets_sum == 0.0 {
        return;
    }

    let denom = sets_sum + epsilon;
    let num = 2.0 * inter + epsilon;
    for (&ti, g) in t.iter().zip(grad.iter_mut()) {
        if let Some(s) = sentinel {
            if ti == s {
                continue;
            }
        }
        *g += scale * (2.0 * ti * denom - num) / (denom * denom);
    }
}

/// Average Dice coefficient over the samples of a batch.
///
/// `x` and `target` share shape; each sample is flattened before the
/// reductions. `ignore_index` names a target label excluded from the
/// computation; `None` disables masking.
///
/// # Example
///
/// ```
/// use segmentar::loss::dice_coeff;
/// use segmentar::Tensor;
///
/// let pred = Tensor::from_vec(vec![1.0, 0.0, 1.0, 0.0], false);
/// let target = Tensor::from_vec(vec![1.0, 0.0, 1.0, 0.0], false);
///
/// let d = dice_coeff(&pred, &target, 1, None, 1e-6);
/// assert!((d - 1.0).abs() < 1e-5);
/// ```
pub fn dice_coeff(
    x: &Tensor,
    target: &Tensor,
    batch_size: usize,
    ignore_index: Option<usize>,
    epsilon: f32,
) -> f32 {
    assert_eq!(
        x.len(),
        target.len(),
        "Predictions and targets must have same length"
    );
    assert!(batch_size > 0, "batch_size must be positive");
    assert_eq!(
        x.len() % batch_size,
        0,
        "Tensor length must be a multiple of the batch size"
    );

    let sample_size = x.len() / batch_size;
    let xs = x.data().as_slice().expect("contiguous tensor data");
    let ts = target.data().as_slice().expect("contiguous tensor data");
    let sentinel = ignore_index.map(|ix| ix as f32);

    let mut d = 0.0;
    for i in 0..batch_size {
        let lo = i * sample_size;
        let hi = lo + sample_size;
        d += sample_dice(&xs[lo..hi], &ts[lo..hi], sentinel, epsilon);
    }

    d / batch_size as f32
}

/// Average of the per-sample Dice coefficient over all classes.
///
/// Computes [`dice_coeff`] independently for each channel of an NCHW
/// tensor, then averages across channels. Prediction and target share the
/// channel dimension.
pub fn multiclass_dice_coeff(
    x: &Tensor,
    target: &Tensor,
    batch_size: usize,
    num_classes: usize,
    ignore_index: Option<usize>,
    epsilon: f32,
) -> f32 {
    assert_eq!(
        x.len(),
        target.len(),
        "Predictions and targets must have same length"
    );
    assert!(batch_size > 0, "batch_size must be positive");
    assert!(num_classes > 0, "num_classes must be positive");
    let chunk = batch_size * num_classes;
    assert_eq!(
        x.len() % chunk,
        0,
        "Tensor length must be a multiple of batch_size * num_classes"
    );

    let plane_size = x.len() / chunk;
    let xs = x.data().as_slice().expect("contiguous tensor data");
    let ts = target.data().as_slice().expect("contiguous tensor data");
    let sentinel = ignore_index.map(|ix| ix as f32);

    let mut dice = 0.0;
    for c in 0..num_classes {
        let mut channel_dice = 0.0;
        for n in 0..batch_size {
            let lo = (n * num_classes + c) * plane_size;
            let hi = lo + plane_size;
            channel_dice += sample_dice(&xs[lo..hi], &ts[lo..hi], sentinel, epsilon);
        }
        dice += channel_dice / batch_size as f32;
    }

    dice / num_classes as f32
}
