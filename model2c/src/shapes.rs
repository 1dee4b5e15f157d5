//! Static shape arithmetic shared by the checker, the code generator and the
//! reference interpreter. All shapes exclude the batch dimension.

use crate::ir::{LayerKind, Padding};

/// Maximum tensor rank supported by the `k2c_tensor` runtime type.
pub const MAX_NDIM: usize = 5;

/// `(before, after)` padding of one spatial axis.
pub fn axis_padding(
    len: usize,
    kernel: usize,
    stride: usize,
    dilation: usize,
    padding: Padding,
) -> (usize, usize) {
    let span = dilation * (kernel - 1) + 1;
    match padding {
        Padding::Valid => (0, 0),
        Padding::Same => {
            // Output size for SAME: ceil(len / stride)
            let out = (len + stride - 1) / stride;
            let total = ((out - 1) * stride + span).saturating_sub(len);
            // more on the trailing side if odd
            let before = total / 2;
            (before, total - before)
        }
        Padding::Causal => (span - 1, 0),
    }
}

/// Output length of a windowed op over an already padded axis.
pub fn window_output(padded_len: usize, kernel: usize, stride: usize, dilation: usize) -> Option<usize> {
    let span = dilation * (kernel - 1) + 1;
    if stride == 0 || padded_len < span {
        return None;
    }
    Some((padded_len - span) / stride + 1)
}

/// Per-axis padding of a windowed op whose spatial axes lead `input`.
pub fn spatial_padding(
    input: &[usize],
    kernel: &[usize],
    strides: &[usize],
    dilation: &[usize],
    padding: Padding,
) -> Vec<(usize, usize)> {
    kernel
        .iter()
        .enumerate()
        .map(|(i, &k)| axis_padding(input[i], k, strides[i], dilation[i], padding))
        .collect()
}

/// Input shape after applying spatial padding to its leading axes.
pub fn padded_shape(input: &[usize], pads: &[(usize, usize)]) -> Vec<usize> {
    let mut shape = input.to_vec();
    for (i, (before, after)) in pads.iter().enumerate() {
        shape[i] += before + after;
    }
    shape
}

/// Convert a source axis (batch counted as 0, negatives from the end) into
/// an index into a batchless shape of rank `rank`.
pub fn normalize_axis(axis: i64, rank: usize) -> Option<usize> {
    let idx = if axis < 0 { rank as i64 + axis } else { axis - 1 };
    if idx >= 0 && (idx as usize) < rank {
        Some(idx as usize)
    } else {
        None
    }
}

/// Resolve a reshape target that may contain one `-1` placeholder.
pub fn resolve_reshape(target: &[i64], numel: usize) -> Result<Vec<usize>, String> {
    let unknown = target.iter().filter(|d| **d == -1).count();
    if unknown > 1 {
        return Err("reshape target has more than one unknown dimension".into());
    }
    if target.iter().any(|d| *d == 0 || *d < -1) {
        return Err(format!("invalid reshape target {target:?}"));
    }
    let known: usize = target.iter().filter(|d| **d > 0).map(|d| *d as usize).product();
    let fill = if unknown == 1 {
        if known == 0 || numel % known != 0 {
            return Err(format!("cannot reshape {numel} elements into {target:?}"));
        }
        numel / known
    } else {
        1
    };
    let shape: Vec<usize> = target
        .iter()
        .map(|d| if *d == -1 { fill } else { *d as usize })
        .collect();
    if shape.iter().product::<usize>() != numel {
        return Err(format!("cannot reshape {numel} elements into {shape:?}"));
    }
    Ok(shape)
}

fn expect_rank(input: &[usize], rank: usize) -> Result<(), String> {
    if input.len() != rank {
        return Err(format!("expected rank-{rank} input, got shape {input:?}"));
    }
    Ok(())
}

fn expect_window(kernel: &[usize], strides: &[usize], dilation: &[usize]) -> Result<(), String> {
    let n = kernel.len();
    if strides.len() != n || dilation.len() != n {
        return Err(format!(
            "window rank mismatch: kernel {kernel:?}, strides {strides:?}, dilation {dilation:?}"
        ));
    }
    if kernel.iter().chain(strides).chain(dilation).any(|v| *v == 0) {
        return Err(format!(
            "window sizes must be positive: kernel {kernel:?}, strides {strides:?}, dilation {dilation:?}"
        ));
    }
    Ok(())
}

/// Shape produced by a layer of `kind` from `inputs`.
pub fn infer_output_shape(kind: &LayerKind, inputs: &[Vec<usize>]) -> Result<Vec<usize>, String> {
    let first = inputs
        .first()
        .ok_or_else(|| "layer has no inputs".to_string())?;

    match kind {
        LayerKind::Input => Ok(first.clone()),

        LayerKind::Dense(p) => {
            if first.is_empty() {
                return Err("dense input must have rank >= 1".into());
            }
            let mut out = first.clone();
            let last = out.len() - 1;
            out[last] = p.units;
            Ok(out)
        }

        LayerKind::Conv1D(p) | LayerKind::Conv2D(p) => {
            let spatial = p.kernel_size.len();
            expect_rank(first, spatial + 1)?;
            expect_window(&p.kernel_size, &p.strides, &p.dilation_rate)?;
            let pads = spatial_padding(first, &p.kernel_size, &p.strides, &p.dilation_rate, p.padding);
            let padded = padded_shape(first, &pads);
            let mut out = Vec::with_capacity(spatial + 1);
            for i in 0..spatial {
                let len = window_output(padded[i], p.kernel_size[i], p.strides[i], p.dilation_rate[i])
                    .ok_or_else(|| format!("kernel {:?} larger than input {first:?}", p.kernel_size))?;
                out.push(len);
            }
            out.push(p.filters);
            Ok(out)
        }

        LayerKind::ZeroPadding1D { padding } => {
            expect_rank(first, 2)?;
            Ok(vec![first[0] + padding[0] + padding[1], first[1]])
        }
        LayerKind::ZeroPadding2D { padding } => {
            expect_rank(first, 3)?;
            Ok(vec![
                first[0] + padding[0][0] + padding[0][1],
                first[1] + padding[1][0] + padding[1][1],
                first[2],
            ])
        }

        LayerKind::MaxPooling1D(p)
        | LayerKind::MaxPooling2D(p)
        | LayerKind::AveragePooling1D(p)
        | LayerKind::AveragePooling2D(p) => {
            let spatial = p.pool_size.len();
            expect_rank(first, spatial + 1)?;
            let ones = vec![1; spatial];
            expect_window(&p.pool_size, &p.strides, &ones)?;
            let pads = spatial_padding(first, &p.pool_size, &p.strides, &ones, p.padding);
            let padded = padded_shape(first, &pads);
            let mut out = Vec::with_capacity(spatial + 1);
            for i in 0..spatial {
                let len = window_output(padded[i], p.pool_size[i], p.strides[i], 1)
                    .ok_or_else(|| format!("pool {:?} larger than input {first:?}", p.pool_size))?;
                out.push(len);
            }
            out.push(first[spatial]);
            Ok(out)
        }

        LayerKind::GlobalMaxPooling1D | LayerKind::GlobalAveragePooling1D => {
            expect_rank(first, 2)?;
            Ok(vec![first[1]])
        }
        LayerKind::GlobalMaxPooling2D | LayerKind::GlobalAveragePooling2D => {
            expect_rank(first, 3)?;
            Ok(vec![first[2]])
        }

        LayerKind::Activation(_)
        | LayerKind::ReLU(_)
        | LayerKind::LeakyReLU { .. }
        | LayerKind::Elu { .. }
        | LayerKind::ThresholdedReLU { .. }
        | LayerKind::PReLU
        | LayerKind::Softmax { .. }
        | LayerKind::BatchNormalization(_)
        | LayerKind::Dropout => Ok(first.clone()),

        LayerKind::SimpleRNN(p) | LayerKind::Lstm(p) | LayerKind::Gru(p) => {
            expect_rank(first, 2)?;
            if p.return_sequences {
                Ok(vec![first[0], p.units])
            } else {
                Ok(vec![p.units])
            }
        }

        LayerKind::Add
        | LayerKind::Subtract
        | LayerKind::Multiply
        | LayerKind::Average
        | LayerKind::Maximum
        | LayerKind::Minimum => {
            if let Some(other) = inputs.iter().find(|s| *s != first) {
                return Err(format!("merge inputs differ in shape: {first:?} vs {other:?}"));
            }
            Ok(first.clone())
        }

        LayerKind::Concatenate { axis } => {
            let ax = normalize_axis(*axis, first.len())
                .ok_or_else(|| format!("concatenate axis {axis} out of range for {first:?}"))?;
            let mut out = first.clone();
            out[ax] = 0;
            for shape in inputs {
                let compatible = shape.len() == first.len()
                    && shape.iter().zip(first).enumerate().all(|(i, (a, b))| i == ax || a == b);
                if !compatible {
                    return Err(format!("cannot concatenate {shape:?} with {first:?} on axis {axis}"));
                }
                out[ax] += shape[ax];
            }
            Ok(out)
        }

        LayerKind::Flatten => Ok(vec![first.iter().product()]),
        LayerKind::Reshape { target_shape } => resolve_reshape(target_shape, first.iter().product()),
        LayerKind::Permute { dims } => {
            let mut sorted = dims.clone();
            sorted.sort_unstable();
            if sorted != (1..=first.len()).collect::<Vec<_>>() {
                return Err(format!("permute dims {dims:?} are not a permutation of the input axes"));
            }
            Ok(dims.iter().map(|d| first[d - 1]).collect())
        }
        LayerKind::RepeatVector { n } => {
            expect_rank(first, 1)?;
            Ok(vec![*n, first[0]])
        }

        LayerKind::Unsupported(name) => Err(format!("unsupported layer class {name}")),
    }
}

/// Parameter tensors a layer of `kind` must carry, with their exact shapes.
///
/// Biases only appear when `use_bias` is set; the code generator substitutes
/// zeros otherwise.
pub fn param_shapes(kind: &LayerKind, input: &[usize]) -> Vec<(&'static str, Vec<usize>)> {
    let last = input.last().copied().unwrap_or(0);
    let mut params = Vec::new();
    match kind {
        LayerKind::Dense(p) => {
            params.push(("kernel", vec![last, p.units]));
            if p.use_bias {
                params.push(("bias", vec![p.units]));
            }
        }
        LayerKind::Conv1D(p) | LayerKind::Conv2D(p) => {
            let mut kernel = p.kernel_size.clone();
            kernel.extend([last, p.filters]);
            params.push(("kernel", kernel));
            if p.use_bias {
                params.push(("bias", vec![p.filters]));
            }
        }
        LayerKind::PReLU => params.push(("alpha", input.to_vec())),
        LayerKind::SimpleRNN(p) | LayerKind::Lstm(p) | LayerKind::Gru(p) => {
            let width = kind.gate_count().unwrap_or(1) * p.units;
            let features = if input.len() == 2 { input[1] } else { last };
            params.push(("kernel", vec![features, width]));
            params.push(("recurrent_kernel", vec![p.units, width]));
            if p.use_bias {
                if matches!(kind, LayerKind::Gru(_)) && p.reset_after {
                    params.push(("bias", vec![2, width]));
                } else {
                    params.push(("bias", vec![width]));
                }
            }
        }
        LayerKind::BatchNormalization(p) => {
            if let Some(axis) = normalize_axis(p.axis, input.len()) {
                let c = input[axis];
                for name in ["gamma", "beta", "moving_mean", "moving_variance"] {
                    params.push((name, vec![c]));
                }
            }
        }
        _ => {}
    }
    params
}
