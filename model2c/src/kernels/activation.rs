//! Elementwise activations, matching the runtime's in-place semantics.

use crate::ir::Activation;

/// Apply `act` in place. Softmax normalizes the whole slice.
pub fn apply(act: &Activation, x: &mut [f32]) -> Result<(), String> {
    match act {
        Activation::Linear => {}
        Activation::Relu => x.iter_mut().for_each(|v| *v = v.max(0.0)),
        Activation::Sigmoid => x.iter_mut().for_each(|v| *v = sigmoid(*v)),
        Activation::Tanh => x.iter_mut().for_each(|v| *v = v.tanh()),
        Activation::Softmax => softmax(x),
        Activation::HardSigmoid => x.iter_mut().for_each(|v| *v = (0.2 * *v + 0.5).clamp(0.0, 1.0)),
        Activation::Exponential => x.iter_mut().for_each(|v| *v = v.exp()),
        Activation::Softplus => x.iter_mut().for_each(|v| *v = v.exp().ln_1p()),
        Activation::Softsign => x.iter_mut().for_each(|v| *v = *v / (1.0 + v.abs())),
        Activation::Unknown(name) => return Err(format!("unknown activation `{name}`")),
    }
    Ok(())
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

pub fn softmax(x: &mut [f32]) {
    let max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in x.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in x.iter_mut() {
        *v /= sum;
    }
}

/// Parameterized ReLU: clamps at `max_value`, leaks below `threshold`.
pub fn relu(x: &mut [f32], max_value: f32, negative_slope: f32, threshold: f32) {
    for v in x.iter_mut() {
        *v = if *v >= max_value {
            max_value
        } else if *v >= threshold {
            *v
        } else {
            negative_slope * (*v - threshold)
        };
    }
}

pub fn leaky_relu(x: &mut [f32], alpha: f32) {
    for v in x.iter_mut() {
        if *v < 0.0 {
            *v *= alpha;
        }
    }
}

/// Elementwise PReLU; `alpha` has the same length as `x`.
pub fn prelu(x: &mut [f32], alpha: &[f32]) {
    for (v, a) in x.iter_mut().zip(alpha) {
        if *v < 0.0 {
            *v *= a;
        }
    }
}

pub fn elu(x: &mut [f32], alpha: f32) {
    for v in x.iter_mut() {
        if *v <= 0.0 {
            *v = alpha * (v.exp() - 1.0);
        }
    }
}

pub fn thresholded_relu(x: &mut [f32], theta: f32) {
    for v in x.iter_mut() {
        if *v <= theta {
            *v = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu_clamps_at_max_value() {
        let mut x = [4.0, 5.0, -1.0];
        relu(&mut x, 4.5, 0.0, 0.0);
        assert_eq!(x, [4.0, 4.5, 0.0]);
    }

    #[test]
    fn relu_leaks_below_threshold() {
        let mut x = [0.5, 2.0];
        relu(&mut x, f32::INFINITY, 0.5, 1.0);
        assert_eq!(x, [-0.25, 2.0]);
    }

    #[test]
    fn softmax_sums_to_one() {
        let mut x = [1.0, 2.0, 3.0];
        apply(&Activation::Softmax, &mut x).unwrap();
        let sum: f32 = x.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(x[2] > x[1] && x[1] > x[0]);
    }

    #[test]
    fn hard_sigmoid_saturates() {
        let mut x = [-10.0, 0.0, 10.0];
        apply(&Activation::HardSigmoid, &mut x).unwrap();
        assert_eq!(x, [0.0, 0.5, 1.0]);
    }

    #[test]
    fn unknown_activation_errors() {
        let mut x = [0.0];
        let err = apply(&Activation::Unknown("gelu".into()), &mut x).unwrap_err();
        assert!(err.contains("gelu"));
    }
}
