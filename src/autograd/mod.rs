//! Tape-based autograd engine
//!
//! Automatic differentiation over a computational graph with gradient tape.
//! The engine carries exactly the operations the segmentation losses need:
//! element-wise sigmoid and softmax over the class axis. The losses
//! themselves compute their remaining derivatives analytically and chain
//! into the tape through these ops.

mod backward;
mod ops;
mod tensor;

#[cfg(test)]
mod tests;

pub use backward::BackwardOp;
pub use ops::{channel_softmax, sigmoid, sigmoid_scalar};
pub use tensor::Tensor;

use crate::trace::{TraceStep, TRACER};

/// Perform backward pass on a tensor
pub fn backward(tensor: &mut Tensor, grad_output: Option<ndarray::Array1<f32>>) {
    if let Some(grad) = grad_output {
        tensor.set_grad(grad);
    } else {
        // Initialize with ones for scalar loss
        let ones = ndarray::Array1::ones(tensor.data().len());
        tensor.set_grad(ones);
    }

    if let Some(op) = tensor.backward_op() {
        TRACER.span(TraceStep::Backward, "tape", || op.backward());
    }
}
