//! One-hot target construction for Dice evaluation

use crate::trace::{TraceStep, TRACER};
use crate::Tensor;

/// Expand a class-index target map into a one-hot, channel-stacked tensor.
///
/// The input holds `batch_size` samples of class ids stored as f32; the
/// output is the (batch, num_classes, plane) expansion, row-major. Positions
/// whose value equals the ignore sentinel carry the sentinel in every output
/// channel, so the ignore mask can be re-derived from any channel. With
/// `ignore_index = None` the expansion is applied unconditionally.
///
/// # Example
///
/// ```
/// use segmentar::loss::build_target;
/// use segmentar::Tensor;
///
/// let indices = Tensor::from_vec(vec![0.0, 1.0, 1.0, 0.0], false);
/// let one_hot = build_target(&indices, 2, 1, None);
///
/// // Channel 0 then channel 1, each 4 pixels
/// assert_eq!(one_hot.data().as_slice().unwrap(),
///            &[1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0]);
/// ```
pub fn build_target(
    target: &Tensor,
    num_classes: usize,
    batch_size: usize,
    ignore_index: Option<usize>,
) -> Tensor {
    assert!(num_classes > 0, "num_classes must be positive");
    assert!(batch_size > 0, "batch_size must be positive");
    assert_eq!(
        target.len() % batch_size,
        0,
        "Tensor length must be a multiple of the batch size"
    );

    TRACER.span(TraceStep::Encode, format!("{num_classes} classes"), || {
        let plane_size = target.len() / batch_size;
        let src = target.data();
        let sentinel = ignore_index.map(|ix| ix as f32);
        let mut data = vec![0.0f32; target.len() * num_classes];

        for n in 0..batch_size {
            for p in 0..plane_size {
                let v = src[n * plane_size + p];

                if let Some(s) = sentinel {
                    if v == s {
                        for c in 0..num_classes {
                            data[(n * num_classes + c) * plane_size + p] = s;
                        }
                        continue;
                    }
                }

                let cls = v as usize;
                assert!(
                    v >= 0.0 && v.fract() == 0.0 && cls < num_classes,
                    "class index {v} out of range for {num_classes} classes"
                );
                data[(n * num_classes + cls) * plane_size + p] = 1.0;
            }
        }

        Tensor::from_vec(data, false)
    })
}
