//! Recurrent cells unrolled over the time axis.
//!
//! Fused weight layout follows the source framework: `kernel` is
//! `[features, gates * units]`, `recurrent` is `[units, gates * units]`, gate
//! blocks are contiguous along the last axis.

use super::activation;
use crate::ir::Activation;

pub struct RecurrentWeights<'a> {
    pub kernel: &'a [f32],
    pub recurrent: &'a [f32],
    /// `[gates * units]`, or `[2, gates * units]` for GRU with `reset_after`.
    pub bias: Option<&'a [f32]>,
    pub features: usize,
    pub units: usize,
}

pub struct Sequence {
    pub go_backwards: bool,
    pub return_sequences: bool,
}

/// `y = x @ w` for a row vector `x` and a `[x.len(), cols]` matrix.
fn matvec(x: &[f32], w: &[f32], cols: usize, out: &mut [f32]) {
    out.iter_mut().for_each(|v| *v = 0.0);
    for (i, xi) in x.iter().enumerate() {
        let row = &w[i * cols..(i + 1) * cols];
        for (o, wv) in out.iter_mut().zip(row) {
            *o += xi * wv;
        }
    }
}

fn steps(input_len: usize, features: usize, go_backwards: bool) -> Vec<usize> {
    let n = input_len / features;
    if go_backwards {
        (0..n).rev().collect()
    } else {
        (0..n).collect()
    }
}

fn emit(out: &mut Vec<f32>, h: &[f32], seq: &Sequence) {
    if seq.return_sequences {
        out.extend_from_slice(h);
    }
}

fn finish(mut out: Vec<f32>, h: &[f32], seq: &Sequence) -> Vec<f32> {
    if !seq.return_sequences {
        out.extend_from_slice(h);
    }
    out
}

/// `h = act(x W + h U + b)`. `state` is `[units]`.
pub fn simple_rnn(
    input: &[f32],
    w: &RecurrentWeights,
    act: &Activation,
    seq: &Sequence,
    state: &mut [f32],
) -> Result<Vec<f32>, String> {
    let u = w.units;
    let mut xw = vec![0.0; u];
    let mut hu = vec![0.0; u];
    let mut out = Vec::new();

    for t in steps(input.len(), w.features, seq.go_backwards) {
        let x = &input[t * w.features..(t + 1) * w.features];
        matvec(x, w.kernel, u, &mut xw);
        matvec(state, w.recurrent, u, &mut hu);
        for j in 0..u {
            state[j] = xw[j] + hu[j] + w.bias.map_or(0.0, |b| b[j]);
        }
        activation::apply(act, state)?;
        emit(&mut out, state, seq);
    }
    Ok(finish(out, state, seq))
}

/// LSTM with gate order `i, f, c, o`. `state` is `[h (units), c (units)]`.
pub fn lstm(
    input: &[f32],
    w: &RecurrentWeights,
    act: &Activation,
    recurrent_act: &Activation,
    seq: &Sequence,
    state: &mut [f32],
) -> Result<Vec<f32>, String> {
    let u = w.units;
    let mut z = vec![0.0; 4 * u];
    let mut hz = vec![0.0; 4 * u];
    let mut out = Vec::new();

    for t in steps(input.len(), w.features, seq.go_backwards) {
        let x = &input[t * w.features..(t + 1) * w.features];
        let (h, c) = state.split_at_mut(u);
        matvec(x, w.kernel, 4 * u, &mut z);
        matvec(h, w.recurrent, 4 * u, &mut hz);
        for j in 0..4 * u {
            z[j] += hz[j] + w.bias.map_or(0.0, |b| b[j]);
        }

        let (zi, rest) = z.split_at_mut(u);
        let (zf, rest) = rest.split_at_mut(u);
        let (zc, zo) = rest.split_at_mut(u);
        activation::apply(recurrent_act, zi)?;
        activation::apply(recurrent_act, zf)?;
        activation::apply(act, zc)?;
        activation::apply(recurrent_act, zo)?;

        for j in 0..u {
            c[j] = zf[j] * c[j] + zi[j] * zc[j];
            h[j] = c[j];
        }
        activation::apply(act, h)?;
        for j in 0..u {
            h[j] *= zo[j];
        }
        emit(&mut out, h, seq);
    }
    let h = state[..u].to_vec();
    Ok(finish(out, &h, seq))
}

/// GRU with gate order `z, r, h`. `state` is `[units]`.
pub fn gru(
    input: &[f32],
    w: &RecurrentWeights,
    act: &Activation,
    recurrent_act: &Activation,
    reset_after: bool,
    seq: &Sequence,
    state: &mut [f32],
) -> Result<Vec<f32>, String> {
    let u = w.units;
    let (input_bias, recurrent_bias) = match (w.bias, reset_after) {
        (Some(b), true) => (Some(&b[..3 * u]), Some(&b[3 * u..])),
        (Some(b), false) => (Some(b), None),
        (None, _) => (None, None),
    };
    let bias_at = |b: Option<&[f32]>, j: usize| b.map_or(0.0, |b| b[j]);

    let mut xw = vec![0.0; 3 * u];
    let mut hu = vec![0.0; 3 * u];
    let mut gate = vec![0.0; u];
    let mut hh = vec![0.0; u];
    let mut out = Vec::new();

    for t in steps(input.len(), w.features, seq.go_backwards) {
        let x = &input[t * w.features..(t + 1) * w.features];
        matvec(x, w.kernel, 3 * u, &mut xw);
        for j in 0..3 * u {
            xw[j] += bias_at(input_bias, j);
        }

        let mut z = vec![0.0; u];
        let mut r = vec![0.0; u];
        if reset_after {
            matvec(state, w.recurrent, 3 * u, &mut hu);
            for j in 0..3 * u {
                hu[j] += bias_at(recurrent_bias, j);
            }
            for j in 0..u {
                z[j] = xw[j] + hu[j];
                r[j] = xw[u + j] + hu[u + j];
            }
            activation::apply(recurrent_act, &mut z)?;
            activation::apply(recurrent_act, &mut r)?;
            for j in 0..u {
                hh[j] = xw[2 * u + j] + r[j] * hu[2 * u + j];
            }
        } else {
            // z and r use the full recurrent matmul; the candidate uses (r * h) U_h
            matvec(state, w.recurrent, 3 * u, &mut hu);
            for j in 0..u {
                z[j] = xw[j] + hu[j];
                r[j] = xw[u + j] + hu[u + j];
            }
            activation::apply(recurrent_act, &mut z)?;
            activation::apply(recurrent_act, &mut r)?;
            for j in 0..u {
                gate[j] = r[j] * state[j];
            }
            for j in 0..u {
                let mut acc = xw[2 * u + j];
                for (i, g) in gate.iter().enumerate() {
                    acc += g * w.recurrent[i * 3 * u + 2 * u + j];
                }
                hh[j] = acc;
            }
        }
        activation::apply(act, &mut hh)?;
        for j in 0..u {
            state[j] = z[j] * state[j] + (1.0 - z[j]) * hh[j];
        }
        emit(&mut out, state, seq);
    }
    Ok(finish(out, state, seq))
}
