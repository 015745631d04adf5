//! Backward-operation trait for the gradient tape

/// A node on the gradient tape.
///
/// Each operation captures the gradient cell of its output at construction
/// time. `backward` reads that cell, accumulates gradients into the
/// operation's inputs, and recurses into their backward ops.
pub trait BackwardOp {
    /// Propagate gradients from this operation's output to its inputs
    fn backward(&self);
}
