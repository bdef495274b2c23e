// Module trait — The interface every layer implements
//
// A layer is immutable once built from its tag. Running it never changes it:
// forward() reads the input, issues kernel calls on whichever backend it is
// handed, and returns a fresh output buffer (or a view of the input, for the
// layers that only reinterpret shape).
//
// GENERIC OVER BACKEND:
//
// Layers are plain data; the backend is passed to forward() rather than
// stored, so one loaded network can be run on the CPU reference and on the
// accelerated backend side by side.

use deepbelief_core::{Backend, Buffer, Result};

/// The trait every layer implements.
pub trait Module<B: Backend + ?Sized> {
    /// Compute the layer's output for `input`.
    fn forward(&self, backend: &B, input: &Buffer) -> Result<Buffer>;

    /// Weight and bias buffers owned by the layer.
    fn weights(&self) -> Vec<&Buffer> {
        Vec::new()
    }

    /// Total number of stored weight values.
    fn num_parameters(&self) -> usize {
        self.weights().iter().map(|w| w.element_count()).sum()
    }
}
