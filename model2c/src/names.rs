//! Tensor naming: normalizes source tensor names and collects the io lists of
//! every layer and of the model.

use std::collections::BTreeSet;

use crate::ir::{Layer, LayerKind, ModelSource};

/// Normalize a raw source tensor name into a C identifier stem.
///
/// Everything after the first `:` is dropped, then everything after the first
/// `/`, so `dense_1/BiasAdd:0` becomes `dense_1`. Remaining characters that
/// cannot appear in a C identifier are replaced with `_`.
pub fn normalize(raw: &str) -> String {
    let stem = raw.split(':').next().unwrap_or(raw);
    let stem = stem.split('/').next().unwrap_or(stem);
    sanitize(stem)
}

/// Replace non-identifier characters with `_` and guard a leading digit.
pub fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerIo {
    pub layer: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelIo {
    /// Per-layer names, in declaration order.
    pub layers: Vec<LayerIo>,
    /// Every tensor name in the graph, deduplicated and sorted.
    pub all_names: Vec<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl ModelIo {
    pub fn is_model_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|n| n == name)
    }

    pub fn is_model_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|n| n == name)
    }
}

/// Normalized io names of one layer. `Input` layers have no inputs.
pub fn layer_io_names(layer: &Layer) -> LayerIo {
    let inputs = match layer.kind {
        LayerKind::Input => Vec::new(),
        _ => layer.inputs.iter().map(|t| normalize(&t.name)).collect(),
    };
    LayerIo {
        layer: layer.name.clone(),
        inputs,
        outputs: layer.outputs.iter().map(|t| normalize(&t.name)).collect(),
    }
}

/// Ordered model input and output names, taken from the source's declared io.
pub fn model_io_names(source: &dyn ModelSource) -> (Vec<String>, Vec<String>) {
    let inputs = source.inputs().iter().map(|t| normalize(&t.name)).collect();
    let outputs = source.outputs().iter().map(|t| normalize(&t.name)).collect();
    (inputs, outputs)
}

pub fn extract(source: &dyn ModelSource) -> ModelIo {
    let layers: Vec<LayerIo> = source.layers().iter().map(layer_io_names).collect();
    let (inputs, outputs) = model_io_names(source);

    let mut all = BTreeSet::new();
    for io in &layers {
        all.extend(io.inputs.iter().cloned());
        all.extend(io.outputs.iter().cloned());
    }
    all.extend(inputs.iter().cloned());
    all.extend(outputs.iter().cloned());

    ModelIo {
        layers,
        all_names: all.into_iter().collect(),
        inputs,
        outputs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Activation, DenseParams, Model, TensorRef};

    fn two_layer_model() -> Model {
        let mut model = Model::new("m");
        model.inputs.push(TensorRef::new("input_1:0", vec![3]));
        model.outputs.push(TensorRef::new("dense_1/BiasAdd:0", vec![2]));
        model.add_layer(Layer::new("input_1", LayerKind::Input).with_output("input_1:0", vec![3]));
        model.add_layer(
            Layer::new(
                "dense_1",
                LayerKind::Dense(DenseParams {
                    units: 2,
                    activation: Activation::Linear,
                    use_bias: true,
                }),
            )
            .with_input("input_1:0", vec![3])
            .with_output("dense_1/BiasAdd:0", vec![2]),
        );
        model
    }

    #[test]
    fn normalize_strips_suffixes() {
        assert_eq!(normalize("dense_1/BiasAdd:0"), "dense_1");
        assert_eq!(normalize("input_1:0"), "input_1");
        assert_eq!(normalize("plain"), "plain");
        // colon split happens before slash split
        assert_eq!(normalize("a:0/b"), "a");
    }

    #[test]
    fn sanitize_produces_identifiers() {
        assert_eq!(sanitize("conv-2d.1"), "conv_2d_1");
        assert_eq!(sanitize("1st"), "_1st");
        assert_eq!(sanitize(""), "_");
    }

    #[test]
    fn input_layer_has_no_inputs() {
        let model = two_layer_model();
        let io = layer_io_names(&model.layers[0]);
        assert!(io.inputs.is_empty());
        assert_eq!(io.outputs, vec!["input_1".to_string()]);
    }

    #[test]
    fn extract_collects_deduplicated_names() {
        let model = two_layer_model();
        let io = extract(&model);
        assert_eq!(io.all_names, vec!["dense_1".to_string(), "input_1".to_string()]);
        assert_eq!(io.inputs, vec!["input_1".to_string()]);
        assert_eq!(io.outputs, vec!["dense_1".to_string()]);
        assert_eq!(io.layers.len(), 2);
        assert!(io.is_model_output("dense_1"));
        assert!(!io.is_model_output("input_1"));
    }
}
