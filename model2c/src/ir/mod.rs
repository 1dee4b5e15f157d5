pub mod graph;
pub mod layer;

pub use graph::{Layer, Model, Param, TensorRef};
pub use layer::{
    Activation, BatchNormParams, ConvParams, DataFormat, DenseParams, LayerKind, Padding,
    PoolParams, RecurrentParams, ReluParams,
};

use crate::eval::{EvalError, Interpreter};

/// Reference executor of a model, used to produce expected outputs.
///
/// Inputs and outputs are flattened row-major buffers ordered like the
/// source's declared inputs and outputs.
pub trait ReferenceModel {
    fn predict(&mut self, inputs: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, EvalError>;

    /// Zero all persistent recurrent state.
    fn reset_states(&mut self);
}

/// Anything the compiler can read a model graph from.
pub trait ModelSource {
    fn name(&self) -> &str;
    fn layers(&self) -> &[Layer];
    fn inputs(&self) -> &[TensorRef];
    fn outputs(&self) -> &[TensorRef];
    fn reference(&self) -> Result<Box<dyn ReferenceModel + '_>, EvalError>;
}

impl ModelSource for Model {
    fn name(&self) -> &str {
        &self.name
    }

    fn layers(&self) -> &[Layer] {
        &self.layers
    }

    fn inputs(&self) -> &[TensorRef] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorRef] {
        &self.outputs
    }

    fn reference(&self) -> Result<Box<dyn ReferenceModel + '_>, EvalError> {
        Ok(Box::new(Interpreter::new(self)?))
    }
}
