//! Compatibility checks run before anything is generated or written.
//!
//! The first violation aborts with an error naming the layer, its kind and the
//! reason.

use std::collections::{HashMap, HashSet};

use crate::error::{CompileError, Result};
use crate::ir::{Activation, DataFormat, Layer, LayerKind, ModelSource, Padding};
use crate::names::{self, normalize};
use crate::shapes::{self, MAX_NDIM};

const C_KEYWORDS: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else", "enum",
    "extern", "float", "for", "goto", "if", "inline", "int", "long", "register", "restrict",
    "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef", "union",
    "unsigned", "void", "volatile", "while", "_Bool", "_Complex", "_Imaginary",
];

/// Identifiers the generated sources and the test harness already use at
/// file or `main` scope.
const RESERVED: &[&str] = &[
    "main", "outputs_match", "failures", "elapsed", "t0", "ATOL", "RTOL", "malloc", "free", "memcpy",
    "memset", "printf", "clock", "fabsf",
];

/// Prefix of every runtime entry point.
const RUNTIME_PREFIX: &str = "k2c_";

pub fn check_function_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| CompileError::InvalidFunctionName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid("name is empty")),
        Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
            return Err(invalid("must start with a letter or underscore"))
        }
        _ => {}
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid("must contain only letters, digits and underscores"));
    }
    if C_KEYWORDS.contains(&name) {
        return Err(invalid("is a C keyword"));
    }
    if RESERVED.contains(&name) {
        return Err(invalid("clashes with an identifier of the generated code"));
    }
    if name.starts_with(RUNTIME_PREFIX) {
        return Err(invalid("uses the runtime prefix `k2c_`"));
    }
    Ok(())
}

fn check_shape(what: &str, shape: &[usize]) -> std::result::Result<(), String> {
    if shape.is_empty() {
        return Err(format!("{what} has an empty shape"));
    }
    if shape.len() > MAX_NDIM {
        return Err(format!(
            "{what} has rank {} but at most {MAX_NDIM} dimensions are supported",
            shape.len()
        ));
    }
    if shape.contains(&0) {
        return Err(format!("{what} has a zero-sized dimension: {shape:?}"));
    }
    Ok(())
}

pub fn check_model(source: &dyn ModelSource, function_name: &str) -> Result<()> {
    check_function_name(function_name)?;

    if source.inputs().is_empty() {
        return Err(CompileError::InvalidModel("model declares no inputs".into()));
    }
    if source.outputs().is_empty() {
        return Err(CompileError::InvalidModel("model declares no outputs".into()));
    }

    // tensor name -> shape for everything available so far
    let mut produced: HashMap<String, Vec<usize>> = HashMap::new();
    let mut input_names = HashSet::new();
    for t in source.inputs() {
        check_shape(&format!("model input `{}`", t.name), &t.shape).map_err(CompileError::InvalidModel)?;
        let name = normalize(&t.name);
        if produced.insert(name.clone(), t.shape.clone()).is_some() {
            return Err(CompileError::InvalidModel(format!("duplicate model input `{name}`")));
        }
        input_names.insert(name);
    }

    let mut layer_names = HashSet::new();
    for layer in source.layers() {
        let sanitized = names::sanitize(&layer.name);
        if format!("{sanitized}_weights") == function_name {
            return Err(CompileError::InvalidFunctionName {
                name: function_name.to_string(),
                reason: format!("clashes with the weight pointer of layer `{}`", layer.name),
            });
        }
        if !layer_names.insert(sanitized) {
            return Err(CompileError::InvalidModel(format!(
                "duplicate layer name `{}`",
                layer.name
            )));
        }
        check_layer(layer, &input_names, &mut produced)?;
    }

    let mut output_names = HashSet::new();
    for t in source.outputs() {
        let name = normalize(&t.name);
        if !output_names.insert(name.clone()) {
            return Err(CompileError::InvalidModel(format!("duplicate model output `{name}`")));
        }
        if input_names.contains(&name) {
            return Err(CompileError::InvalidModel(format!(
                "model output `{name}` is a model input"
            )));
        }
        match produced.get(&name) {
            None => {
                return Err(CompileError::InvalidModel(format!(
                    "model output `{name}` is not produced by any layer"
                )))
            }
            Some(shape) if *shape != t.shape => {
                return Err(CompileError::InvalidModel(format!(
                    "model output `{name}` declared with shape {:?} but produced with {shape:?}",
                    t.shape
                )))
            }
            Some(_) => {}
        }
    }

    log::debug!("model `{}` passed compatibility checks", source.name());
    Ok(())
}

fn check_layer(
    layer: &Layer,
    input_names: &HashSet<String>,
    produced: &mut HashMap<String, Vec<usize>>,
) -> Result<()> {
    if let LayerKind::Unsupported(name) = &layer.kind {
        return Err(CompileError::unsupported(layer, format!("layer class `{name}` is not supported")));
    }
    if layer.outputs.len() != 1 {
        return Err(CompileError::unsupported(
            layer,
            format!("expected exactly one output, found {}", layer.outputs.len()),
        ));
    }
    let out = layer.output();
    check_shape("output", &out.shape).map_err(|r| CompileError::unsupported(layer, r))?;
    let io = names::layer_io_names(layer);
    let out_name = io.outputs[0].clone();

    if layer.kind == LayerKind::Input {
        return match produced.get(&out_name) {
            Some(shape) if input_names.contains(&out_name) && *shape == out.shape => Ok(()),
            Some(_) if input_names.contains(&out_name) => Err(CompileError::unsupported(
                layer,
                "input layer shape differs from the declared model input",
            )),
            _ => Err(CompileError::InvalidModel(format!(
                "input layer `{}` produces `{out_name}` which is not a declared model input",
                layer.name
            ))),
        };
    }

    check_arity(layer)?;

    let mut input_shapes = Vec::with_capacity(layer.inputs.len());
    for (name, t) in io.inputs.iter().zip(&layer.inputs) {
        let shape = produced.get(name).ok_or_else(|| CompileError::OutOfOrder {
            layer: layer.name.clone(),
            tensor: name.clone(),
        })?;
        if *shape != t.shape {
            return Err(CompileError::unsupported(
                layer,
                format!("input `{name}` has shape {shape:?} but the layer expects {:?}", t.shape),
            ));
        }
        input_shapes.push(shape.clone());
    }

    check_config(layer, &input_shapes[0], &out.shape)?;
    check_params(layer, &input_shapes[0])?;

    let inferred = shapes::infer_output_shape(&layer.kind, &input_shapes)
        .map_err(|r| CompileError::unsupported(layer, r))?;
    if inferred != out.shape {
        return Err(CompileError::unsupported(
            layer,
            format!("declared output shape {:?} does not match computed {inferred:?}", out.shape),
        ));
    }

    if produced.insert(out_name.clone(), inferred).is_some() {
        return Err(CompileError::InvalidModel(format!(
            "tensor `{out_name}` is produced more than once"
        )));
    }
    Ok(())
}

fn check_arity(layer: &Layer) -> Result<()> {
    let n = layer.inputs.len();
    let ok = match layer.kind {
        LayerKind::Subtract => n == 2,
        _ if layer.kind.is_merge() => n >= 2,
        _ => n == 1,
    };
    if !ok {
        return Err(CompileError::unsupported(layer, format!("unexpected number of inputs: {n}")));
    }
    Ok(())
}

fn check_activation(layer: &Layer, act: &Activation, rank: usize) -> Result<()> {
    match act {
        Activation::Unknown(name) => Err(CompileError::unsupported(
            layer,
            format!("activation `{name}` is not supported"),
        )),
        Activation::Softmax if rank != 1 => Err(CompileError::unsupported(
            layer,
            format!("softmax is only supported on 1D tensors, output has rank {rank}"),
        )),
        _ => Ok(()),
    }
}

fn check_channels_last(layer: &Layer, format: DataFormat) -> Result<()> {
    if format != DataFormat::ChannelsLast {
        return Err(CompileError::unsupported(layer, "only channels_last data format is supported"));
    }
    Ok(())
}

fn check_config(layer: &Layer, input: &[usize], output: &[usize]) -> Result<()> {
    match &layer.kind {
        LayerKind::Dense(p) => check_activation(layer, &p.activation, output.len()),

        LayerKind::Conv1D(p) | LayerKind::Conv2D(p) => {
            check_channels_last(layer, p.data_format)?;
            if p.padding == Padding::Causal && !matches!(layer.kind, LayerKind::Conv1D(_)) {
                return Err(CompileError::unsupported(layer, "causal padding is only valid for Conv1D"));
            }
            let strided = p.strides.iter().any(|s| *s > 1);
            let dilated = p.dilation_rate.iter().any(|d| *d > 1);
            if strided && dilated {
                return Err(CompileError::unsupported(
                    layer,
                    "strides > 1 combined with dilation > 1 is not supported",
                ));
            }
            check_activation(layer, &p.activation, output.len())
        }

        LayerKind::MaxPooling1D(p)
        | LayerKind::MaxPooling2D(p)
        | LayerKind::AveragePooling1D(p)
        | LayerKind::AveragePooling2D(p) => {
            check_channels_last(layer, p.data_format)?;
            match p.padding {
                Padding::Causal => Err(CompileError::unsupported(layer, "causal padding is not valid for pooling")),
                Padding::Same
                    if matches!(
                        layer.kind,
                        LayerKind::AveragePooling1D(_) | LayerKind::AveragePooling2D(_)
                    ) =>
                {
                    Err(CompileError::unsupported(layer, "same padding is not supported for average pooling"))
                }
                _ => Ok(()),
            }
        }

        LayerKind::Activation(act) => check_activation(layer, act, input.len()),
        LayerKind::Softmax { axis } => {
            if input.len() != 1 {
                return Err(CompileError::unsupported(
                    layer,
                    format!("softmax is only supported on 1D tensors, input has rank {}", input.len()),
                ));
            }
            if shapes::normalize_axis(*axis, 1) != Some(0) {
                return Err(CompileError::unsupported(layer, format!("softmax axis {axis} is not supported")));
            }
            Ok(())
        }

        LayerKind::SimpleRNN(p) | LayerKind::Lstm(p) | LayerKind::Gru(p) => {
            if p.return_state {
                return Err(CompileError::unsupported(layer, "return_state is not supported"));
            }
            for act in [&p.activation, &p.recurrent_activation] {
                if matches!(act, Activation::Softmax) {
                    return Err(CompileError::unsupported(layer, "softmax is not supported inside recurrent cells"));
                }
                check_activation(layer, act, 1)?;
            }
            Ok(())
        }

        LayerKind::BatchNormalization(p) => {
            if shapes::normalize_axis(p.axis, input.len()).is_none() {
                return Err(CompileError::unsupported(
                    layer,
                    format!("axis {} out of range for input rank {}", p.axis, input.len()),
                ));
            }
            Ok(())
        }

        _ => Ok(()),
    }
}

fn check_params(layer: &Layer, input: &[usize]) -> Result<()> {
    for (name, shape) in shapes::param_shapes(&layer.kind, input) {
        let param = layer
            .param(name)
            .ok_or_else(|| CompileError::unsupported(layer, format!("missing parameter `{name}`")))?;
        if param.shape != shape {
            return Err(CompileError::unsupported(
                layer,
                format!("parameter `{name}` has shape {:?}, expected {shape:?}", param.shape),
            ));
        }
        if param.values.len() != param.numel() {
            return Err(CompileError::unsupported(
                layer,
                format!(
                    "parameter `{name}` holds {} values for shape {:?}",
                    param.values.len(),
                    param.shape
                ),
            ));
        }
    }
    Ok(())
}
