//! Naive reference implementations - correct but slow.
//! Used by the interpreter to produce expected outputs for generated code.
//!
//! All buffers are flattened row-major, channels-last, without a batch
//! dimension.

/// Dense layer applied over the last axis.
///
/// - `input`:  [..., In]
/// - `kernel`: [In, Units]
/// - `bias`:   [Units]
/// - `output`: [..., Units]
pub fn dense(input: &[f32], in_features: usize, kernel: &[f32], bias: Option<&[f32]>, units: usize, output: &mut [f32]) {
    let rows = input.len() / in_features;
    for r in 0..rows {
        let x = &input[r * in_features..(r + 1) * in_features];
        for u in 0..units {
            let mut sum = bias.map_or(0.0, |b| b[u]);
            for (i, xi) in x.iter().enumerate() {
                sum += xi * kernel[i * units + u];
            }
            output[r * units + u] = sum;
        }
    }
}

/// 1D convolution over an already padded input.
///
/// - `input`:  [Steps, Ci]
/// - `kernel`: [K, Ci, Co]
/// - `bias`:   [Co]
/// - `output`: [OutSteps, Co]
pub fn conv1d(
    input: &[f32],
    input_shape: [usize; 2],
    kernel: &[f32],
    kernel_shape: [usize; 3],
    bias: Option<&[f32]>,
    stride: usize,
    dilation: usize,
    output: &mut [f32],
    output_shape: [usize; 2],
) {
    let [_, ci] = input_shape;
    let [k, _, co] = kernel_shape;
    let [out_steps, _] = output_shape;

    for t in 0..out_steps {
        for oc in 0..co {
            let mut sum = bias.map_or(0.0, |b| b[oc]);
            for kt in 0..k {
                let it = t * stride + kt * dilation;
                for ic in 0..ci {
                    sum += input[it * ci + ic] * kernel[kt * (ci * co) + ic * co + oc];
                }
            }
            output[t * co + oc] = sum;
        }
    }
}

/// 2D convolution over an already padded input.
///
/// - `input`:  [H, W, Ci]
/// - `kernel`: [Kh, Kw, Ci, Co]
/// - `bias`:   [Co]
/// - `output`: [Ho, Wo, Co]
pub fn conv2d(
    input: &[f32],
    input_shape: [usize; 3],
    kernel: &[f32],
    kernel_shape: [usize; 4],
    bias: Option<&[f32]>,
    stride: [usize; 2],
    dilation: [usize; 2],
    output: &mut [f32],
    output_shape: [usize; 3],
) {
    let [_, w, ci] = input_shape;
    let [kh, kw, _, co] = kernel_shape;
    let [ho, wo, _] = output_shape;
    let [sh, sw] = stride;
    let [dh, dw] = dilation;

    for oy in 0..ho {
        for ox in 0..wo {
            for oc in 0..co {
                let mut sum = bias.map_or(0.0, |b| b[oc]);
                for ky in 0..kh {
                    for kx in 0..kw {
                        let iy = oy * sh + ky * dh;
                        let ix = ox * sw + kx * dw;
                        for ic in 0..ci {
                            let in_idx = iy * (w * ci) + ix * ci + ic;
                            let k_idx = ky * (kw * ci * co) + kx * (ci * co) + ic * co + oc;
                            sum += input[in_idx] * kernel[k_idx];
                        }
                    }
                }
                output[oy * (wo * co) + ox * co + oc] = sum;
            }
        }
    }
}

/// Pad the leading (spatial) axes of `input` with `fill`.
///
/// `pads` holds one `(before, after)` pair per spatial axis; the trailing
/// channel axis is never padded.
pub fn pad(input: &[f32], input_shape: &[usize], pads: &[(usize, usize)], fill: f32) -> Vec<f32> {
    let channels = input_shape[input_shape.len() - 1];
    match pads.len() {
        1 => {
            let (before, after) = pads[0];
            let steps = input_shape[0];
            let mut out = vec![fill; (steps + before + after) * channels];
            out[before * channels..(before + steps) * channels].copy_from_slice(input);
            out
        }
        2 => {
            let [(top, bottom), (left, right)] = [pads[0], pads[1]];
            let (h, w) = (input_shape[0], input_shape[1]);
            let pw = w + left + right;
            let mut out = vec![fill; (h + top + bottom) * pw * channels];
            for y in 0..h {
                let src = &input[y * w * channels..(y + 1) * w * channels];
                let start = ((y + top) * pw + left) * channels;
                out[start..start + w * channels].copy_from_slice(src);
            }
            out
        }
        _ => input.to_vec(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    Max,
    Average,
}

/// 1D pooling over an already padded input.
///
/// - `input`:  [Steps, C]
/// - `output`: [OutSteps, C]
pub fn pool1d(input: &[f32], channels: usize, pool: usize, stride: usize, mode: PoolMode, output: &mut [f32]) {
    let out_steps = output.len() / channels;
    for t in 0..out_steps {
        for ch in 0..channels {
            let window = (0..pool).map(|k| input[(t * stride + k) * channels + ch]);
            output[t * channels + ch] = reduce(window, pool, mode);
        }
    }
}

/// 2D pooling over an already padded input.
///
/// - `input`:  [H, W, C]
/// - `output`: [Ho, Wo, C]
pub fn pool2d(
    input: &[f32],
    input_shape: [usize; 3],
    pool: [usize; 2],
    stride: [usize; 2],
    mode: PoolMode,
    output: &mut [f32],
    output_shape: [usize; 3],
) {
    let [_, w, c] = input_shape;
    let [ph, pw] = pool;
    let [sh, sw] = stride;
    let [ho, wo, _] = output_shape;

    for oy in 0..ho {
        for ox in 0..wo {
            for ch in 0..c {
                let window = (0..ph).flat_map(|ky| {
                    (0..pw).map(move |kx| input[(oy * sh + ky) * (w * c) + (ox * sw + kx) * c + ch])
                });
                output[oy * (wo * c) + ox * c + ch] = reduce(window, ph * pw, mode);
            }
        }
    }
}

/// Reduce every axis except the trailing channel axis.
pub fn global_pool(input: &[f32], channels: usize, mode: PoolMode) -> Vec<f32> {
    let count = input.len() / channels;
    (0..channels)
        .map(|ch| reduce((0..count).map(|i| input[i * channels + ch]), count, mode))
        .collect()
}

fn reduce(values: impl Iterator<Item = f32>, count: usize, mode: PoolMode) -> f32 {
    match mode {
        PoolMode::Max => values.fold(f32::NEG_INFINITY, f32::max),
        PoolMode::Average => values.sum::<f32>() / count as f32,
    }
}

/// Batch normalization along `axis` with inference statistics.
pub fn batch_norm(
    input: &[f32],
    shape: &[usize],
    axis: usize,
    mean: &[f32],
    variance: &[f32],
    gamma: &[f32],
    beta: &[f32],
    epsilon: f32,
    output: &mut [f32],
) {
    let inner: usize = shape[axis + 1..].iter().product();
    let channels = shape[axis];
    for (i, (y, x)) in output.iter_mut().zip(input).enumerate() {
        let c = (i / inner) % channels;
        *y = (x - mean[c]) / (variance[c] + epsilon).sqrt() * gamma[c] + beta[c];
    }
}

/// Concatenate row-major tensors along `axis`.
pub fn concatenate(inputs: &[(&[f32], &[usize])], axis: usize) -> Vec<f32> {
    let outer: usize = inputs[0].1[..axis].iter().product();
    let mut out = Vec::with_capacity(inputs.iter().map(|(d, _)| d.len()).sum());
    for o in 0..outer {
        for (data, shape) in inputs {
            let chunk: usize = shape[axis..].iter().product();
            out.extend_from_slice(&data[o * chunk..(o + 1) * chunk]);
        }
    }
    out
}

/// Transpose a row-major tensor; `perm[i]` is the source axis of output axis `i`.
pub fn permute(input: &[f32], shape: &[usize], perm: &[usize]) -> Vec<f32> {
    let rank = shape.len();
    let out_shape: Vec<usize> = perm.iter().map(|&p| shape[p]).collect();
    let mut in_strides = vec![1; rank];
    for i in (0..rank.saturating_sub(1)).rev() {
        in_strides[i] = in_strides[i + 1] * shape[i + 1];
    }

    let mut out = Vec::with_capacity(input.len());
    let mut index = vec![0usize; rank];
    for _ in 0..input.len() {
        let src: usize = index.iter().zip(perm).map(|(i, &p)| i * in_strides[p]).sum();
        out.push(input[src]);
        for axis in (0..rank).rev() {
            index[axis] += 1;
            if index[axis] < out_shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    out
}

/// Repeat a vector `n` times: [F] -> [N, F].
pub fn repeat_vector(input: &[f32], n: usize) -> Vec<f32> {
    input.repeat(n)
}
