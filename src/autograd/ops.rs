//! Activation autograd operations: sigmoid, channel softmax

use crate::autograd::{BackwardOp, Tensor};
use ndarray::Array1;
use std::cell::RefCell;
use std::rc::Rc;

/// Numerically stable scalar sigmoid: σ(x) = 1 / (1 + exp(-x))
pub fn sigmoid_scalar(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let exp_x = x.exp();
        exp_x / (1.0 + exp_x)
    }
}

/// Element-wise logistic sigmoid
pub fn sigmoid(a: &Tensor) -> Tensor {
    let data = a.data().mapv(sigmoid_scalar);
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let a_clone = a.clone();
        let output_clone = result.clone();
        let backward_op = Rc::new(SigmoidBackward {
            a: a_clone,
            output: output_clone,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct SigmoidBackward {
    a: Tensor,
    output: Tensor,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for SigmoidBackward {
    fn backward(&self) {
        if let Some(grad_output) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂σ/∂x = σ(x) * (1 - σ(x))
                let grad_a = grad_output * &self.output.data().mapv(|y| y * (1.0 - y));
                self.a.accumulate_grad(grad_a);
            }

            if let Some(op) = self.a.backward_op() {
                op.backward();
            }
        }
    }
}

/// Softmax across the class axis of an NCHW-flattened tensor.
///
/// `a` holds batches of `num_classes` channels with `plane_size` spatial
/// elements each, row-major. The softmax normalizes the `num_classes`
/// scores at every (sample, pixel) site independently.
pub fn channel_softmax(a: &Tensor, num_classes: usize, plane_size: usize) -> Tensor {
    assert!(num_classes > 0, "num_classes must be positive");
    assert!(plane_size > 0, "plane_size must be positive");
    let chunk = num_classes * plane_size;
    assert_eq!(
        a.len() % chunk,
        0,
        "Tensor length must be a multiple of num_classes * plane_size"
    );
    let batch_size = a.len() / chunk;

    let src = a.data();
    let mut data = Array1::<f32>::zeros(a.len());
    for n in 0..batch_size {
        for p in 0..plane_size {
            let site = |c: usize| (n * num_classes + c) * plane_size + p;

            let mut max_val = f32::NEG_INFINITY;
            for c in 0..num_classes {
                max_val = max_val.max(src[site(c)]);
            }

            let mut sum_exp = 0.0;
            for c in 0..num_classes {
                let e = (src[site(c)] - max_val).exp();
                data[site(c)] = e;
                sum_exp += e;
            }
            for c in 0..num_classes {
                data[site(c)] /= sum_exp;
            }
        }
    }

    let requires_grad = a.requires_grad();
    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let a_clone = a.clone();
        let output_clone = result.clone();
        let backward_op = Rc::new(ChannelSoftmaxBackward {
            a: a_clone,
            output: output_clone,
            num_classes,
            plane_size,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ChannelSoftmaxBackward {
    a: Tensor,
    output: Tensor,
    num_classes: usize,
    plane_size: usize,
    result_grad: Rc<RefCell<Option<Array1<f32>>>>,
}

impl BackwardOp for ChannelSoftmaxBackward {
    fn backward(&self) {
        if let Some(grad_output) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // Per site: ∂L/∂x_c = y_c * (∂L/∂y_c - Σ_k y_k ∂L/∂y_k)
                let y = self.output.data();
                let chunk = self.num_classes * self.plane_size;
                let batch_size = self.a.len() / chunk;

                let mut grad_a = Array1::<f32>::zeros(self.a.len());
                for n in 0..batch_size {
                    for p in 0..self.plane_size {
                        let site = |c: usize| (n * self.num_classes + c) * self.plane_size + p;

                        let mut dot = 0.0;
                        for c in 0..self.num_classes {
                            dot += y[site(c)] * grad_output[site(c)];
                        }
                        for c in 0..self.num_classes {
                            let i = site(c);
                            grad_a[i] = y[i] * (grad_output[i] - dot);
                        }
                    }
                }
                self.a.accumulate_grad(grad_a);
            }

            if let Some(op) = self.a.backward_op() {
                op.backward();
            }
        }
    }
}
