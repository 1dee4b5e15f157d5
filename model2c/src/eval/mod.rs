//! Reference interpreter: evaluates a model graph layer by layer with the
//! naive kernels. Produces the expected outputs the generated test suite
//! compares against.

use std::collections::HashMap;

use thiserror::Error;

use crate::ir::{Layer, LayerKind, ModelSource, ReferenceModel};
use crate::kernels::activation;
use crate::kernels::naive::{self, PoolMode};
use crate::kernels::recurrent::{self, RecurrentWeights, Sequence};
use crate::names::normalize;
use crate::shapes;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("expected {expected} model inputs, got {got}")]
    InputCount { expected: usize, got: usize },
    #[error("input `{name}` expects {expected} values, got {got}")]
    InputSize {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("tensor `{0}` is read before it is produced")]
    MissingTensor(String),
    #[error("layer `{layer}`: {reason}")]
    Layer { layer: String, reason: String },
}

struct Value {
    data: Vec<f32>,
    shape: Vec<usize>,
}

pub struct Interpreter<'a> {
    source: &'a dyn ModelSource,
    /// Persistent state of stateful recurrent layers, keyed by layer name.
    states: HashMap<String, Vec<f32>>,
}

impl<'a> Interpreter<'a> {
    pub fn new(source: &'a dyn ModelSource) -> Result<Self, EvalError> {
        let mut states = HashMap::new();
        for layer in source.layers() {
            if let (Some(p), Some(len)) = (layer.kind.recurrent(), layer.kind.state_len()) {
                if p.stateful {
                    states.insert(layer.name.clone(), vec![0.0; len]);
                }
            }
        }
        Ok(Self { source, states })
    }

    fn eval_layer(&mut self, layer: &Layer, values: &HashMap<String, Value>) -> Result<Vec<f32>, EvalError> {
        let mut args = Vec::with_capacity(layer.inputs.len());
        for t in &layer.inputs {
            let name = normalize(&t.name);
            let value = values.get(&name).ok_or(EvalError::MissingTensor(name))?;
            args.push(value);
        }
        let state = self.states.get_mut(&layer.name);
        let out = eval_kind(layer, &args, state).map_err(|reason| EvalError::Layer {
            layer: layer.name.clone(),
            reason,
        })?;

        let expected = layer.output().numel();
        if out.len() != expected {
            return Err(EvalError::Layer {
                layer: layer.name.clone(),
                reason: format!("produced {} values, declared shape holds {expected}", out.len()),
            });
        }
        Ok(out)
    }
}

impl ReferenceModel for Interpreter<'_> {
    fn predict(&mut self, inputs: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, EvalError> {
        let declared = self.source.inputs();
        if inputs.len() != declared.len() {
            return Err(EvalError::InputCount {
                expected: declared.len(),
                got: inputs.len(),
            });
        }

        let mut values: HashMap<String, Value> = HashMap::new();
        for (t, data) in declared.iter().zip(inputs) {
            if data.len() != t.numel() {
                return Err(EvalError::InputSize {
                    name: t.name.clone(),
                    expected: t.numel(),
                    got: data.len(),
                });
            }
            values.insert(
                normalize(&t.name),
                Value {
                    data: data.clone(),
                    shape: t.shape.clone(),
                },
            );
        }

        let source = self.source;
        for layer in source.layers() {
            if layer.kind == LayerKind::Input {
                continue;
            }
            let data = self.eval_layer(layer, &values)?;
            log::trace!("evaluated {} -> {} values", layer.name, data.len());
            let out = layer.output();
            values.insert(
                normalize(&out.name),
                Value {
                    data,
                    shape: out.shape.clone(),
                },
            );
        }

        source
            .outputs()
            .iter()
            .map(|t| {
                let name = normalize(&t.name);
                values
                    .remove(&name)
                    .map(|v| v.data)
                    .ok_or(EvalError::MissingTensor(name))
            })
            .collect()
    }

    fn reset_states(&mut self) {
        for state in self.states.values_mut() {
            state.iter_mut().for_each(|v| *v = 0.0);
        }
    }
}

fn param<'l>(layer: &'l Layer, name: &str) -> Result<&'l [f32], String> {
    layer
        .param(name)
        .map(|p| p.values.as_slice())
        .ok_or_else(|| format!("missing parameter `{name}`"))
}

fn optional_bias<'l>(layer: &'l Layer, use_bias: bool) -> Result<Option<&'l [f32]>, String> {
    if use_bias {
        param(layer, "bias").map(Some)
    } else {
        Ok(None)
    }
}

fn eval_kind(layer: &Layer, args: &[&Value], state: Option<&mut Vec<f32>>) -> Result<Vec<f32>, String> {
    let x = args.first().ok_or_else(|| "layer has no inputs".to_string())?;
    let out_shape = layer.output().shape.clone();
    let out_numel: usize = out_shape.iter().product();

    let out = match &layer.kind {
        LayerKind::Input => x.data.clone(),

        LayerKind::Dense(p) => {
            let in_features = *x.shape.last().ok_or("dense input has rank 0")?;
            let mut out = vec![0.0; out_numel];
            naive::dense(
                &x.data,
                in_features,
                param(layer, "kernel")?,
                optional_bias(layer, p.use_bias)?,
                p.units,
                &mut out,
            );
            activation::apply(&p.activation, &mut out)?;
            out
        }

        LayerKind::Conv1D(p) => {
            let pads = shapes::spatial_padding(&x.shape, &p.kernel_size, &p.strides, &p.dilation_rate, p.padding);
            let padded = naive::pad(&x.data, &x.shape, &pads, 0.0);
            let pshape = shapes::padded_shape(&x.shape, &pads);
            let mut out = vec![0.0; out_numel];
            naive::conv1d(
                &padded,
                [pshape[0], pshape[1]],
                param(layer, "kernel")?,
                [p.kernel_size[0], pshape[1], p.filters],
                optional_bias(layer, p.use_bias)?,
                p.strides[0],
                p.dilation_rate[0],
                &mut out,
                [out_shape[0], out_shape[1]],
            );
            activation::apply(&p.activation, &mut out)?;
            out
        }

        LayerKind::Conv2D(p) => {
            let pads = shapes::spatial_padding(&x.shape, &p.kernel_size, &p.strides, &p.dilation_rate, p.padding);
            let padded = naive::pad(&x.data, &x.shape, &pads, 0.0);
            let pshape = shapes::padded_shape(&x.shape, &pads);
            let mut out = vec![0.0; out_numel];
            naive::conv2d(
                &padded,
                [pshape[0], pshape[1], pshape[2]],
                param(layer, "kernel")?,
                [p.kernel_size[0], p.kernel_size[1], pshape[2], p.filters],
                optional_bias(layer, p.use_bias)?,
                [p.strides[0], p.strides[1]],
                [p.dilation_rate[0], p.dilation_rate[1]],
                &mut out,
                [out_shape[0], out_shape[1], out_shape[2]],
            );
            activation::apply(&p.activation, &mut out)?;
            out
        }

        LayerKind::ZeroPadding1D { padding } => naive::pad(&x.data, &x.shape, &[(padding[0], padding[1])], 0.0),
        LayerKind::ZeroPadding2D { padding } => naive::pad(
            &x.data,
            &x.shape,
            &[(padding[0][0], padding[0][1]), (padding[1][0], padding[1][1])],
            0.0,
        ),

        LayerKind::MaxPooling1D(p) | LayerKind::AveragePooling1D(p) => {
            let mode = pool_mode(&layer.kind);
            let pads = shapes::spatial_padding(&x.shape, &p.pool_size, &p.strides, &[1], p.padding);
            let padded = naive::pad(&x.data, &x.shape, &pads, f32::NEG_INFINITY);
            let mut out = vec![0.0; out_numel];
            naive::pool1d(&padded, x.shape[1], p.pool_size[0], p.strides[0], mode, &mut out);
            out
        }

        LayerKind::MaxPooling2D(p) | LayerKind::AveragePooling2D(p) => {
            let mode = pool_mode(&layer.kind);
            let pads = shapes::spatial_padding(&x.shape, &p.pool_size, &p.strides, &[1, 1], p.padding);
            let padded = naive::pad(&x.data, &x.shape, &pads, f32::NEG_INFINITY);
            let pshape = shapes::padded_shape(&x.shape, &pads);
            let mut out = vec![0.0; out_numel];
            naive::pool2d(
                &padded,
                [pshape[0], pshape[1], pshape[2]],
                [p.pool_size[0], p.pool_size[1]],
                [p.strides[0], p.strides[1]],
                mode,
                &mut out,
                [out_shape[0], out_shape[1], out_shape[2]],
            );
            out
        }

        LayerKind::GlobalMaxPooling1D | LayerKind::GlobalMaxPooling2D => {
            naive::global_pool(&x.data, out_numel, PoolMode::Max)
        }
        LayerKind::GlobalAveragePooling1D | LayerKind::GlobalAveragePooling2D => {
            naive::global_pool(&x.data, out_numel, PoolMode::Average)
        }

        LayerKind::Activation(act) => {
            let mut out = x.data.clone();
            activation::apply(act, &mut out)?;
            out
        }
        LayerKind::ReLU(p) => {
            let mut out = x.data.clone();
            activation::relu(
                &mut out,
                p.max_value.unwrap_or(f32::INFINITY),
                p.negative_slope,
                p.threshold,
            );
            out
        }
        LayerKind::LeakyReLU { alpha } => {
            let mut out = x.data.clone();
            activation::leaky_relu(&mut out, *alpha);
            out
        }
        LayerKind::Elu { alpha } => {
            let mut out = x.data.clone();
            activation::elu(&mut out, *alpha);
            out
        }
        LayerKind::ThresholdedReLU { theta } => {
            let mut out = x.data.clone();
            activation::thresholded_relu(&mut out, *theta);
            out
        }
        LayerKind::PReLU => {
            let mut out = x.data.clone();
            activation::prelu(&mut out, param(layer, "alpha")?);
            out
        }
        LayerKind::Softmax { .. } => {
            let mut out = x.data.clone();
            activation::softmax(&mut out);
            out
        }

        LayerKind::SimpleRNN(p) | LayerKind::Lstm(p) | LayerKind::Gru(p) => {
            let mut local;
            let state = match state {
                Some(s) => s.as_mut_slice(),
                None => {
                    local = vec![0.0; layer.kind.state_len().unwrap_or(p.units)];
                    local.as_mut_slice()
                }
            };
            let w = RecurrentWeights {
                kernel: param(layer, "kernel")?,
                recurrent: param(layer, "recurrent_kernel")?,
                bias: optional_bias(layer, p.use_bias)?,
                features: x.shape[1],
                units: p.units,
            };
            let seq = Sequence {
                go_backwards: p.go_backwards,
                return_sequences: p.return_sequences,
            };
            match &layer.kind {
                LayerKind::SimpleRNN(_) => recurrent::simple_rnn(&x.data, &w, &p.activation, &seq, state)?,
                LayerKind::Lstm(_) => {
                    recurrent::lstm(&x.data, &w, &p.activation, &p.recurrent_activation, &seq, state)?
                }
                _ => recurrent::gru(
                    &x.data,
                    &w,
                    &p.activation,
                    &p.recurrent_activation,
                    p.reset_after,
                    &seq,
                    state,
                )?,
            }
        }

        LayerKind::BatchNormalization(p) => {
            let axis = shapes::normalize_axis(p.axis, x.shape.len())
                .ok_or_else(|| format!("axis {} out of range", p.axis))?;
            let mut out = vec![0.0; out_numel];
            naive::batch_norm(
                &x.data,
                &x.shape,
                axis,
                param(layer, "moving_mean")?,
                param(layer, "moving_variance")?,
                param(layer, "gamma")?,
                param(layer, "beta")?,
                p.epsilon,
                &mut out,
            );
            out
        }

        LayerKind::Add => elementwise(args, |a, b| a + b),
        LayerKind::Multiply => elementwise(args, |a, b| a * b),
        LayerKind::Maximum => elementwise(args, f32::max),
        LayerKind::Minimum => elementwise(args, f32::min),
        LayerKind::Average => {
            let n = args.len() as f32;
            elementwise(args, |a, b| a + b).into_iter().map(|v| v / n).collect()
        }
        LayerKind::Subtract => {
            let b = args.get(1).ok_or("subtract needs two inputs")?;
            x.data.iter().zip(&b.data).map(|(a, b)| a - b).collect()
        }
        LayerKind::Concatenate { axis } => {
            let ax = shapes::normalize_axis(*axis, x.shape.len())
                .ok_or_else(|| format!("axis {axis} out of range"))?;
            let parts: Vec<(&[f32], &[usize])> = args.iter().map(|v| (v.data.as_slice(), v.shape.as_slice())).collect();
            naive::concatenate(&parts, ax)
        }

        LayerKind::Flatten | LayerKind::Reshape { .. } | LayerKind::Dropout => x.data.clone(),
        LayerKind::Permute { dims } => {
            let perm: Vec<usize> = dims.iter().map(|d| d - 1).collect();
            naive::permute(&x.data, &x.shape, &perm)
        }
        LayerKind::RepeatVector { n } => naive::repeat_vector(&x.data, *n),

        LayerKind::Unsupported(name) => return Err(format!("no reference kernel for `{name}`")),
    };
    Ok(out)
}

fn pool_mode(kind: &LayerKind) -> PoolMode {
    match kind {
        LayerKind::AveragePooling1D(_) | LayerKind::AveragePooling2D(_) => PoolMode::Average,
        _ => PoolMode::Max,
    }
}

fn elementwise(args: &[&Value], f: impl Fn(f32, f32) -> f32) -> Vec<f32> {
    let mut out = args[0].data.clone();
    for v in &args[1..] {
        for (o, b) in out.iter_mut().zip(&v.data) {
            *o = f(*o, *b);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Activation, DenseParams, Model, RecurrentParams, ReluParams, TensorRef};

    fn dense_clamp_model() -> Model {
        let mut model = Model::new("scenario");
        model.inputs.push(TensorRef::new("input_1", vec![3]));
        model.outputs.push(TensorRef::new("clamp/Relu:0", vec![2]));
        model.add_layer(
            Layer::new(
                "dense_1",
                LayerKind::Dense(DenseParams {
                    units: 2,
                    activation: Activation::Linear,
                    use_bias: true,
                }),
            )
            .with_input("input_1", vec![3])
            .with_output("dense_1/BiasAdd:0", vec![2])
            .with_param("kernel", vec![3, 2], vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0])
            .with_param("bias", vec![2], vec![0.0, 0.0]),
        );
        model.add_layer(
            Layer::new(
                "clamp",
                LayerKind::ReLU(ReluParams {
                    max_value: Some(4.5),
                    negative_slope: 0.0,
                    threshold: 0.0,
                }),
            )
            .with_input("dense_1/BiasAdd:0", vec![2])
            .with_output("clamp/Relu:0", vec![2]),
        );
        model
    }

    fn stateful_rnn_model() -> Model {
        let mut model = Model::new("rnn");
        model.inputs.push(TensorRef::new("seq", vec![2, 1]));
        model.outputs.push(TensorRef::new("rnn_1", vec![1]));
        model.add_layer(
            Layer::new(
                "rnn_1",
                LayerKind::SimpleRNN(RecurrentParams {
                    units: 1,
                    activation: Activation::Linear,
                    recurrent_activation: Activation::Sigmoid,
                    use_bias: false,
                    return_sequences: false,
                    return_state: false,
                    go_backwards: false,
                    stateful: true,
                    reset_after: false,
                }),
            )
            .with_input("seq", vec![2, 1])
            .with_output("rnn_1", vec![1])
            .with_param("kernel", vec![1, 1], vec![1.0])
            .with_param("recurrent_kernel", vec![1, 1], vec![0.5]),
        );
        model
    }

    #[test]
    fn dense_then_clamp() {
        let model = dense_clamp_model();
        let mut reference = model.reference().unwrap();
        let out = reference.predict(&[vec![1.0, 2.0, 3.0]]).unwrap();
        // dense gives [4, 5]; clamp caps the second element
        assert_eq!(out, vec![vec![4.0, 4.5]]);
    }

    #[test]
    fn stateless_predict_is_pure() {
        let model = dense_clamp_model();
        let mut reference = model.reference().unwrap();
        let a = reference.predict(&[vec![0.3, -0.2, 0.9]]).unwrap();
        let b = reference.predict(&[vec![0.3, -0.2, 0.9]]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn stateful_state_carries_between_calls() {
        let model = stateful_rnn_model();
        let mut reference = model.reference().unwrap();
        let a = vec![1.0, 1.0];
        let b = vec![0.5, -0.5];

        reference.predict(&[a.clone()]).unwrap();
        let carried = reference.predict(&[b.clone()]).unwrap();

        reference.reset_states();
        let fresh = reference.predict(&[b.clone()]).unwrap();
        assert_ne!(carried, fresh);

        // reset is idempotent and equivalent to a fresh instance
        reference.reset_states();
        reference.reset_states();
        let again = reference.predict(&[b.clone()]).unwrap();
        assert_eq!(again, fresh);
        let mut other = model.reference().unwrap();
        assert_eq!(other.predict(&[b]).unwrap(), fresh);
    }

    #[test]
    fn wrong_input_size_is_rejected() {
        let model = dense_clamp_model();
        let mut reference = model.reference().unwrap();
        match reference.predict(&[vec![1.0]]) {
            Err(EvalError::InputSize { expected, got, .. }) => assert_eq!((expected, got), (3, 1)),
            other => panic!("expected InputSize error, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_layer_fails_with_layer_name() {
        let mut model = dense_clamp_model();
        model.layers[1].kind = LayerKind::Unsupported("Lambda".into());
        let mut reference = model.reference().unwrap();
        let err = reference.predict(&[vec![1.0, 2.0, 3.0]]).unwrap_err();
        assert!(err.to_string().contains("clamp"), "{err}");
    }
}
