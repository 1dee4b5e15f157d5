//! Reference kernels for the interpreter. Plain `f32` slices, no SIMD.

pub mod activation;
pub mod naive;
pub mod recurrent;
