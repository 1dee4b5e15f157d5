//! Core graph types: the model as an ordered list of layers.

use super::layer::LayerKind;

/// A tensor edge as reported by the source: raw name plus per-sample shape
/// (the batch dimension is never included).
#[derive(Debug, Clone, PartialEq)]
pub struct TensorRef {
    pub name: String,
    pub shape: Vec<usize>,
}

impl TensorRef {
    pub fn new(name: impl Into<String>, shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Learned parameter tensor, values flattened row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl Param {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            shape,
            values,
        }
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub kind: LayerKind,
    pub inputs: Vec<TensorRef>,
    pub outputs: Vec<TensorRef>,
    pub params: Vec<Param>,
}

impl Layer {
    pub fn new(name: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, shape: Vec<usize>) -> Self {
        self.inputs.push(TensorRef::new(name, shape));
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, shape: Vec<usize>) -> Self {
        self.outputs.push(TensorRef::new(name, shape));
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, shape: Vec<usize>, values: Vec<f32>) -> Self {
        self.params.push(Param::new(name, shape, values));
        self
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    /// The single output; the checker guarantees there is exactly one.
    pub fn output(&self) -> &TensorRef {
        &self.outputs[0]
    }
}

/// A whole model: layers in declaration order plus declared model inputs and
/// outputs. Declared io is authoritative; `Input` layers are optional.
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub layers: Vec<Layer>,
    pub inputs: Vec<TensorRef>,
    pub outputs: Vec<TensorRef>,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layers: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn add_layer(&mut self, layer: Layer) {
        self.layers.push(layer);
    }
}
