//! Flat f32 tensor with optional gradient tracking

use crate::autograd::BackwardOp;
use ndarray::Array1;
use std::cell::RefCell;
use std::rc::Rc;

/// A flat f32 tensor carrying an optional gradient tape entry.
///
/// Data is stored as a 1-D array; shaped operations (channel softmax, the
/// segmentation losses) receive their NCHW geometry explicitly, with element
/// (n, c, p) of an (N, C, P) tensor at index `(n * C + c) * P + p`.
///
/// Cloning copies the data but shares the gradient cell, so every clone
/// held by a backward op accumulates into the same gradient.
#[derive(Clone)]
pub struct Tensor {
    data: Array1<f32>,
    requires_grad: bool,
    grad: Rc<RefCell<Option<Array1<f32>>>>,
    backward_op: Option<Rc<dyn BackwardOp>>,
}

impl Tensor {
    /// Create a tensor from an ndarray
    pub fn new(data: Array1<f32>, requires_grad: bool) -> Self {
        Self {
            data,
            requires_grad,
            grad: Rc::new(RefCell::new(None)),
            backward_op: None,
        }
    }

    /// Create a tensor from a Vec
    pub fn from_vec(data: Vec<f32>, requires_grad: bool) -> Self {
        Self::new(Array1::from(data), requires_grad)
    }

    /// Borrow the underlying data
    pub fn data(&self) -> &Array1<f32> {
        &self.data
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the tensor holds no elements
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether this tensor participates in gradient computation
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Current gradient, if one has been accumulated
    pub fn grad(&self) -> Option<Array1<f32>> {
        self.grad.borrow().clone()
    }

    /// Shared handle to this tensor's gradient cell
    pub fn grad_cell(&self) -> Rc<RefCell<Option<Array1<f32>>>> {
        Rc::clone(&self.grad)
    }

    /// Replace the gradient
    pub fn set_grad(&self, grad: Array1<f32>) {
        *self.grad.borrow_mut() = Some(grad);
    }

    /// Add `grad` to the stored gradient, initializing it if absent
    pub fn accumulate_grad(&self, grad: Array1<f32>) {
        let mut cell = self.grad.borrow_mut();
        if let Some(existing) = cell.as_mut() {
            *existing = &*existing + &grad;
        } else {
            *cell = Some(grad);
        }
    }

    /// Clear the gradient ahead of a fresh backward pass
    pub fn zero_grad(&self) {
        *self.grad.borrow_mut() = None;
    }

    /// Backward op that produced this tensor, if any
    pub fn backward_op(&self) -> Option<Rc<dyn BackwardOp>> {
        self.backward_op.clone()
    }

    /// Attach the backward op that produced this tensor
    pub fn set_backward_op(&mut self, op: Rc<dyn BackwardOp>) {
        self.backward_op = Some(op);
    }
}
