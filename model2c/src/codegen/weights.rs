//! Weight externalization: decides where every parameter, buffer and state
//! array lives and emits their declarations.
//!
//! The result is split into three partitions:
//! - `stack`: declarations at the top of the main function body
//! - `external`: views over weight groups loaded by `F_initialize`, plus the
//!   payload manifest
//! - `statics`: persistent recurrent state kept across calls

use super::plan::{ArrayInit, DataRef, Decl, Storage};
use super::tensor_expr::TensorExprWriter;
use crate::ir::{Layer, LayerKind, ModelSource, Padding};
use crate::names::{normalize, ModelIo};
use crate::shapes;

/// Where learned parameters are stored in generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// Literal arrays compiled into the program.
    #[default]
    Inline,
    /// Loaded at runtime from payload files into heap buffers.
    External,
}

/// One payload file and where its values land inside the group buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub file_name: String,
    pub offset: usize,
    pub values: Vec<f32>,
}

/// All parameters of one layer under external placement.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightGroup {
    pub layer: String,
    /// Name of the `float*` parameter of the main function.
    pub pointer: String,
    pub len: usize,
    pub payloads: Vec<Payload>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateRecord {
    pub layer: String,
    pub field: String,
    pub len: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalPartition {
    pub decls: Vec<Decl>,
    pub groups: Vec<WeightGroup>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightPlan {
    pub stack: Vec<Decl>,
    pub external: ExternalPartition,
    pub statics: Vec<StateRecord>,
}

impl WeightPlan {
    pub fn is_stateful(&self) -> bool {
        !self.statics.is_empty()
    }

    pub fn group_pointers(&self) -> Vec<String> {
        self.external.groups.iter().map(|g| g.pointer.clone()).collect()
    }
}

/// Spatial padding a windowed layer applies before its kernel runs, if any
/// side is non-zero.
pub fn window_padding(layer: &Layer) -> Option<Vec<(usize, usize)>> {
    let input = &layer.inputs.first()?.shape;
    let pads = match &layer.kind {
        LayerKind::Conv1D(p) | LayerKind::Conv2D(p) => {
            shapes::spatial_padding(input, &p.kernel_size, &p.strides, &p.dilation_rate, p.padding)
        }
        LayerKind::MaxPooling1D(p) | LayerKind::MaxPooling2D(p) if p.padding == Padding::Same => {
            let ones = vec![1; p.pool_size.len()];
            shapes::spatial_padding(input, &p.pool_size, &p.strides, &ones, p.padding)
        }
        _ => return None,
    };
    if pads.iter().all(|(a, b)| *a == 0 && *b == 0) {
        None
    } else {
        Some(pads)
    }
}

/// Length of the scratch array a layer's runtime call needs.
pub fn fwork_len(layer: &Layer) -> Option<usize> {
    match &layer.kind {
        LayerKind::Dense(_) => {
            let kernel: usize = layer.param("kernel").map(|p| p.numel()).unwrap_or(0);
            Some(layer.inputs[0].numel() + kernel)
        }
        LayerKind::SimpleRNN(p) => Some(2 * p.units),
        LayerKind::Lstm(p) => Some(8 * p.units),
        LayerKind::Gru(p) => Some(6 * p.units),
        _ => None,
    }
}

/// Shape of the bias a layer expects; used to substitute zeros when the layer
/// was built without one.
fn bias_shape(layer: &Layer) -> Option<Vec<usize>> {
    match &layer.kind {
        LayerKind::Dense(p) if !p.use_bias => Some(vec![p.units]),
        LayerKind::Conv1D(p) | LayerKind::Conv2D(p) if !p.use_bias => Some(vec![p.filters]),
        LayerKind::Gru(p) if !p.use_bias && p.reset_after => Some(vec![2, 3 * p.units]),
        LayerKind::SimpleRNN(p) | LayerKind::Lstm(p) | LayerKind::Gru(p) if !p.use_bias => {
            Some(vec![layer.kind.gate_count().unwrap_or(1) * p.units])
        }
        _ => None,
    }
}

fn float_array(name: String, len: usize, init: ArrayInit, storage: Storage) -> Decl {
    Decl::FloatArray {
        name,
        len,
        init,
        storage,
    }
}

fn view(name: String, data: DataRef, shape: Vec<usize>) -> Decl {
    Decl::Tensor { name, data, shape }
}

pub fn externalize(
    source: &dyn ModelSource,
    io: &ModelIo,
    writer: &TensorExprWriter,
    placement: Placement,
) -> WeightPlan {
    let mut plan = WeightPlan::default();

    for layer in source.layers() {
        if layer.kind == LayerKind::Input {
            continue;
        }

        // output buffer, unless the caller provides it
        let out = layer.output();
        let out_name = normalize(&out.name);
        if !io.is_model_output(&out_name) {
            let handle = writer.tensor(&out_name);
            let array = writer.array(&handle.name);
            plan.stack.push(float_array(array.clone(), out.numel(), ArrayInit::Zeros, Storage::Auto));
            plan.stack.push(view(handle.name, DataRef::Array(array), out.shape.clone()));
        }

        add_params(&mut plan, layer, writer, placement);

        if let Some(shape) = bias_shape(layer) {
            let ident = writer.local(&layer.name, "bias");
            let array = writer.array(&ident);
            let len = shape.iter().product();
            plan.stack.push(float_array(array.clone(), len, ArrayInit::Zeros, Storage::Static));
            plan.stack.push(view(ident, DataRef::Array(array), shape));
        }

        if let Some(len) = fwork_len(layer) {
            plan.stack.push(float_array(writer.fwork(&layer.name), len, ArrayInit::Zeros, Storage::Auto));
        }

        if let Some(pads) = window_padding(layer) {
            let input = &layer.inputs[0].shape;
            let shape = shapes::padded_shape(input, &pads);
            let handle = writer.padded(&layer.name);
            let array = writer.array(&handle.name);
            let len = shape.iter().product();
            plan.stack.push(float_array(array.clone(), len, ArrayInit::Zeros, Storage::Auto));
            plan.stack.push(view(handle.name, DataRef::Array(array), shape));
        }

        if let (Some(p), Some(len)) = (layer.kind.recurrent(), layer.kind.state_len()) {
            if p.stateful {
                plan.statics.push(StateRecord {
                    layer: layer.name.clone(),
                    field: writer.local(&layer.name, "state"),
                    len,
                });
            } else {
                plan.stack.push(float_array(
                    writer.state(&layer.name, false),
                    len,
                    ArrayInit::Zeros,
                    Storage::Auto,
                ));
            }
        }
    }

    log::debug!(
        "weights: {} stack decls, {} external groups, {} state records",
        plan.stack.len(),
        plan.external.groups.len(),
        plan.statics.len()
    );
    plan
}

/// A parameter as the runtime consumes it. Batch normalization takes the
/// standard deviation `sqrt(variance + epsilon)` in place of the variance.
fn runtime_param(layer: &Layer, name: &'static str, values: &[f32]) -> (&'static str, Vec<f32>) {
    match &layer.kind {
        LayerKind::BatchNormalization(p) if name == "moving_variance" => {
            ("stdev", values.iter().map(|v| (v + p.epsilon).sqrt()).collect())
        }
        _ => (name, values.to_vec()),
    }
}

fn add_params(plan: &mut WeightPlan, layer: &Layer, writer: &TensorExprWriter, placement: Placement) {
    let input = &layer.inputs[0].shape;
    let expected = shapes::param_shapes(&layer.kind, input);
    if expected.is_empty() {
        return;
    }

    let pointer = writer.group(&layer.name);
    let mut group = WeightGroup {
        layer: layer.name.clone(),
        pointer: pointer.clone(),
        len: 0,
        payloads: Vec::new(),
    };

    for (name, shape) in expected {
        let Some(param) = layer.param(name) else {
            continue;
        };
        let (name, values) = runtime_param(layer, name, &param.values);
        let ident = writer.local(&layer.name, name);
        match placement {
            Placement::Inline => {
                let array = writer.array(&ident);
                let init = if values.iter().all(|v| *v == 0.0) {
                    ArrayInit::Zeros
                } else {
                    ArrayInit::Values(values)
                };
                plan.stack.push(float_array(array.clone(), param.numel(), init, Storage::Static));
                plan.stack.push(view(ident, DataRef::Array(array), shape));
            }
            Placement::External => {
                let offset = group.len;
                plan.external.decls.push(view(
                    ident.clone(),
                    DataRef::Offset {
                        pointer: pointer.clone(),
                        offset,
                    },
                    shape,
                ));
                group.len += values.len();
                group.payloads.push(Payload {
                    file_name: writer.payload_file(&ident),
                    offset,
                    values,
                });
            }
        }
    }

    if !group.payloads.is_empty() {
        plan.external.groups.push(group);
    }
}
