use crate::error::{CompileError, Result};
use crate::ir::{Activation, Layer, LayerKind, ModelSource};
use crate::names::normalize;
use crate::shapes;

use super::plan::*;
use super::runtime::RuntimeFn;
use super::tensor_expr::TensorExprWriter;
use super::weights::{window_padding, WeightPlan};

/**
 * Lower every layer into one block of C statements, in declaration order.
 */
pub fn lower_layers(
    source: &dyn ModelSource,
    writer: &TensorExprWriter,
    weights: &WeightPlan,
) -> Result<Vec<LayerBlock>> {
    source
        .layers()
        .iter()
        .map(|layer| {
            let persistent = weights.statics.iter().any(|s| s.layer == layer.name);
            let items = lower_layer(layer, writer, persistent)?;
            log::debug!("lowered {} ({}) into {} items", layer.name, layer.kind.class_name(), items.len());
            Ok(LayerBlock {
                layer: layer.name.clone(),
                kind: layer.kind.class_name().to_string(),
                items,
            })
        })
        .collect()
}

fn call(func: RuntimeFn, args: Vec<Arg>) -> Item {
    Item::Stmt(Stmt::Call { func, args })
}

fn size_array(name: String, values: Vec<usize>) -> Item {
    Item::Decl(Decl::SizeArray { name, values })
}

fn flat_pads(pads: &[(usize, usize)]) -> Vec<usize> {
    pads.iter().flat_map(|(a, b)| [*a, *b]).collect()
}

fn lower_layer(layer: &Layer, w: &TensorExprWriter, persistent: bool) -> Result<Vec<Item>> {
    if layer.kind == LayerKind::Input {
        return Ok(Vec::new());
    }

    let inputs: Vec<TensorHandle> = layer.inputs.iter().map(|t| w.tensor(&normalize(&t.name))).collect();
    let x = inputs[0].clone();
    let y = w.tensor(&normalize(&layer.output().name));
    let numel = layer.output().numel();
    let name = layer.name.as_str();
    let param = |p: &str| Arg::Tensor(w.param(name, p));
    let param_data = |p: &str| Arg::TensorData(w.param(name, p));

    let mut items = Vec::new();

    // Padding ahead of windowed kernels; the kernel then reads the padded copy.
    let mut src = x.clone();
    if let Some(pads) = window_padding(layer) {
        let fill = match layer.kind {
            LayerKind::MaxPooling1D(_) | LayerKind::MaxPooling2D(_) => f32::NEG_INFINITY,
            _ => 0.0,
        };
        let func = if pads.len() == 1 { RuntimeFn::Pad1d } else { RuntimeFn::Pad2d };
        let pad = w.local(name, "pad");
        items.push(size_array(pad.clone(), flat_pads(&pads)));
        let padded = w.padded(name);
        items.push(call(
            func,
            vec![Arg::Tensor(padded.clone()), Arg::Tensor(x.clone()), Arg::Float(fill), Arg::Ident(pad)],
        ));
        src = padded;
    }

    match &layer.kind {
        LayerKind::Input => {}

        LayerKind::Dense(p) => items.push(call(
            RuntimeFn::Dense,
            vec![
                Arg::Tensor(y),
                Arg::Tensor(x),
                param("kernel"),
                param("bias"),
                Arg::ActivationFn(p.activation.clone()),
                Arg::Ident(w.fwork(name)),
            ],
        )),

        LayerKind::Conv1D(p) => items.push(call(
            RuntimeFn::Conv1d,
            vec![
                Arg::Tensor(y),
                Arg::Tensor(src),
                param("kernel"),
                param("bias"),
                Arg::Size(p.strides[0]),
                Arg::Size(p.dilation_rate[0]),
                Arg::ActivationFn(p.activation.clone()),
            ],
        )),

        LayerKind::Conv2D(p) => {
            let stride = w.local(name, "stride");
            let dilation = w.local(name, "dilation");
            items.push(size_array(stride.clone(), p.strides.clone()));
            items.push(size_array(dilation.clone(), p.dilation_rate.clone()));
            items.push(call(
                RuntimeFn::Conv2d,
                vec![
                    Arg::Tensor(y),
                    Arg::Tensor(src),
                    param("kernel"),
                    param("bias"),
                    Arg::Ident(stride),
                    Arg::Ident(dilation),
                    Arg::ActivationFn(p.activation.clone()),
                ],
            ));
        }

        LayerKind::ZeroPadding1D { padding } => {
            let pad = w.local(name, "pad");
            items.push(size_array(pad.clone(), padding.to_vec()));
            items.push(call(
                RuntimeFn::Pad1d,
                vec![Arg::Tensor(y), Arg::Tensor(x), Arg::Float(0.0), Arg::Ident(pad)],
            ));
        }
        LayerKind::ZeroPadding2D { padding } => {
            let pad = w.local(name, "pad");
            items.push(size_array(pad.clone(), padding.iter().flatten().copied().collect()));
            items.push(call(
                RuntimeFn::Pad2d,
                vec![Arg::Tensor(y), Arg::Tensor(x), Arg::Float(0.0), Arg::Ident(pad)],
            ));
        }

        LayerKind::MaxPooling1D(p) | LayerKind::AveragePooling1D(p) => {
            let func = if matches!(layer.kind, LayerKind::MaxPooling1D(_)) {
                RuntimeFn::MaxPool1d
            } else {
                RuntimeFn::AvgPool1d
            };
            items.push(call(
                func,
                vec![
                    Arg::Tensor(y),
                    Arg::Tensor(src),
                    Arg::Size(p.pool_size[0]),
                    Arg::Size(p.strides[0]),
                ],
            ));
        }
        LayerKind::MaxPooling2D(p) | LayerKind::AveragePooling2D(p) => {
            let func = if matches!(layer.kind, LayerKind::MaxPooling2D(_)) {
                RuntimeFn::MaxPool2d
            } else {
                RuntimeFn::AvgPool2d
            };
            let pool = w.local(name, "pool_size");
            let stride = w.local(name, "stride");
            items.push(size_array(pool.clone(), p.pool_size.clone()));
            items.push(size_array(stride.clone(), p.strides.clone()));
            items.push(call(
                func,
                vec![Arg::Tensor(y), Arg::Tensor(src), Arg::Ident(pool), Arg::Ident(stride)],
            ));
        }

        LayerKind::GlobalMaxPooling1D | LayerKind::GlobalMaxPooling2D => {
            items.push(call(RuntimeFn::GlobalMaxPooling, vec![Arg::Tensor(y), Arg::Tensor(x)]));
        }
        LayerKind::GlobalAveragePooling1D | LayerKind::GlobalAveragePooling2D => {
            items.push(call(RuntimeFn::GlobalAvgPooling, vec![Arg::Tensor(y), Arg::Tensor(x)]));
        }

        LayerKind::Activation(act) => {
            items.push(copy(&y, &x, numel));
            if *act != Activation::Linear {
                items.push(call(
                    RuntimeFn::Activation(act.clone()),
                    vec![Arg::TensorData(y.clone()), Arg::TensorNumel(y)],
                ));
            }
        }
        LayerKind::Softmax { .. } => {
            items.push(copy(&y, &x, numel));
            items.push(call(
                RuntimeFn::Activation(Activation::Softmax),
                vec![Arg::TensorData(y.clone()), Arg::TensorNumel(y)],
            ));
        }
        LayerKind::ReLU(p) => {
            items.push(copy(&y, &x, numel));
            items.push(call(
                RuntimeFn::Relu,
                vec![
                    Arg::TensorData(y.clone()),
                    Arg::TensorNumel(y),
                    Arg::Float(p.max_value.unwrap_or(f32::INFINITY)),
                    Arg::Float(p.negative_slope),
                    Arg::Float(p.threshold),
                ],
            ));
        }
        LayerKind::LeakyReLU { alpha } | LayerKind::Elu { alpha } => {
            let func = if matches!(layer.kind, LayerKind::LeakyReLU { .. }) {
                RuntimeFn::LeakyRelu
            } else {
                RuntimeFn::Elu
            };
            items.push(copy(&y, &x, numel));
            items.push(call(
                func,
                vec![Arg::TensorData(y.clone()), Arg::TensorNumel(y), Arg::Float(*alpha)],
            ));
        }
        LayerKind::ThresholdedReLU { theta } => {
            items.push(copy(&y, &x, numel));
            items.push(call(
                RuntimeFn::ThresholdedRelu,
                vec![Arg::TensorData(y.clone()), Arg::TensorNumel(y), Arg::Float(*theta)],
            ));
        }
        LayerKind::PReLU => {
            items.push(copy(&y, &x, numel));
            items.push(call(
                RuntimeFn::Prelu,
                vec![Arg::TensorData(y.clone()), Arg::TensorNumel(y), param_data("alpha")],
            ));
        }

        LayerKind::SimpleRNN(p) | LayerKind::Lstm(p) | LayerKind::Gru(p) => {
            let mut args = vec![
                Arg::Tensor(y),
                Arg::Tensor(x),
                Arg::Ident(w.state(name, persistent)),
                param_data("kernel"),
                param_data("recurrent_kernel"),
                param_data("bias"),
                Arg::Ident(w.fwork(name)),
            ];
            let func = match layer.kind {
                LayerKind::SimpleRNN(_) => RuntimeFn::SimpleRnn,
                LayerKind::Lstm(_) => RuntimeFn::Lstm,
                _ => {
                    args.push(Arg::Flag(p.reset_after));
                    RuntimeFn::Gru
                }
            };
            args.push(Arg::Flag(p.go_backwards));
            args.push(Arg::Flag(p.return_sequences));
            if func != RuntimeFn::SimpleRnn {
                args.push(Arg::ActivationFn(p.recurrent_activation.clone()));
            }
            args.push(Arg::ActivationFn(p.activation.clone()));
            items.push(call(func, args));
        }

        // epsilon is folded into `stdev` by the weight plan
        LayerKind::BatchNormalization(p) => {
            let axis = shapes::normalize_axis(p.axis, layer.inputs[0].shape.len())
                .ok_or_else(|| CompileError::unsupported(layer, format!("axis {} out of range", p.axis)))?;
            items.push(call(
                RuntimeFn::BatchNorm,
                vec![
                    Arg::Tensor(y),
                    Arg::Tensor(x),
                    param("moving_mean"),
                    param("stdev"),
                    param("gamma"),
                    param("beta"),
                    Arg::Size(axis),
                ],
            ));
        }

        LayerKind::Add
        | LayerKind::Multiply
        | LayerKind::Average
        | LayerKind::Maximum
        | LayerKind::Minimum => {
            let func = match layer.kind {
                LayerKind::Add => RuntimeFn::Add,
                LayerKind::Multiply => RuntimeFn::Multiply,
                LayerKind::Average => RuntimeFn::Average,
                LayerKind::Maximum => RuntimeFn::Max,
                _ => RuntimeFn::Min,
            };
            let mut args = vec![Arg::Tensor(y), Arg::Size(inputs.len())];
            args.extend(inputs.iter().cloned().map(Arg::Tensor));
            items.push(call(func, args));
        }
        LayerKind::Subtract => items.push(call(
            RuntimeFn::Subtract,
            vec![Arg::Tensor(y), Arg::Size(2), Arg::Tensor(x), Arg::Tensor(inputs[1].clone())],
        )),
        LayerKind::Concatenate { axis } => {
            let ax = shapes::normalize_axis(*axis, layer.inputs[0].shape.len())
                .ok_or_else(|| CompileError::unsupported(layer, format!("axis {axis} out of range")))?;
            let mut args = vec![Arg::Tensor(y), Arg::Size(ax), Arg::Size(inputs.len())];
            args.extend(inputs.iter().cloned().map(Arg::Tensor));
            items.push(call(RuntimeFn::Concatenate, args));
        }

        LayerKind::Flatten => items.push(call(RuntimeFn::Flatten, vec![Arg::Tensor(y), Arg::Tensor(x)])),
        LayerKind::Reshape { .. } => {
            let shape = layer.output().shape.clone();
            let ndim = shape.len();
            let newshp = w.local(name, "newshp");
            items.push(size_array(newshp.clone(), shape));
            items.push(call(
                RuntimeFn::Reshape,
                vec![Arg::Tensor(y), Arg::Tensor(x), Arg::Ident(newshp), Arg::Size(ndim)],
            ));
        }
        LayerKind::Permute { dims } => {
            let perm = w.local(name, "permute");
            items.push(size_array(perm.clone(), dims.iter().map(|d| d - 1).collect()));
            items.push(call(
                RuntimeFn::PermuteDims,
                vec![Arg::Tensor(y), Arg::Tensor(x), Arg::Ident(perm)],
            ));
        }
        LayerKind::RepeatVector { n } => items.push(call(
            RuntimeFn::RepeatVector,
            vec![Arg::Tensor(y), Arg::Tensor(x), Arg::Size(*n)],
        )),
        LayerKind::Dropout => items.push(copy(&y, &x, numel)),

        LayerKind::Unsupported(class) => {
            return Err(CompileError::unsupported(layer, format!("no lowering for `{class}`")));
        }
    }

    Ok(items)
}

fn copy(dst: &TensorHandle, src: &TensorHandle, numel: usize) -> Item {
    Item::Stmt(Stmt::Copy {
        dst: dst.clone(),
        src: src.clone(),
        numel,
    })
}
