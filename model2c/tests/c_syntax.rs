//! Runs the system C compiler in syntax-only mode over generated sources,
//! against headers carrying the `k2c` runtime prototypes. Skipped when no
//! `cc` is installed.

use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use model2c::ir::{
    Activation, BatchNormParams, ConvParams, DataFormat, DenseParams, Layer, LayerKind, Model, Padding, PoolParams,
    RecurrentParams, TensorRef,
};
use model2c::{convert, CompileOptions, Identity, Placement, TestSuiteOptions};

const TENSOR_HEADER: &str = r#"#pragma once
#include <stddef.h>
#define K2C_MAX_NDIM 5
struct k2c_tensor {
    float * array;
    size_t ndim;
    size_t numel;
    size_t shape[K2C_MAX_NDIM];
};
typedef struct k2c_tensor k2c_tensor;
typedef void k2c_activationType(float * x, const size_t size);
"#;

const RUNTIME_HEADER: &str = r#"#pragma once
#include <stddef.h>
#include "k2c_tensor_include.h"

extern k2c_activationType * k2c_linear;
extern k2c_activationType * k2c_exponential;
extern k2c_activationType * k2c_relu;
extern k2c_activationType * k2c_hard_sigmoid;
extern k2c_activationType * k2c_tanh;
extern k2c_activationType * k2c_sigmoid;
extern k2c_activationType * k2c_softmax;
extern k2c_activationType * k2c_softplus;
extern k2c_activationType * k2c_softsign;
void k2c_LeakyReLU(float * x, const size_t size, const float alpha);
void k2c_PReLU(float * x, const size_t size, const float * alpha);
void k2c_ELU(float * x, const size_t size, const float alpha);
void k2c_ThresholdedReLU(float * x, const size_t size, const float theta);
void k2c_ReLU(float * x, const size_t size, const float max_value, const float negative_slope,
              const float threshold);

void k2c_pad1d(k2c_tensor* output, const k2c_tensor* input, const float fill, const size_t * pad);
void k2c_pad2d(k2c_tensor* output, const k2c_tensor* input, const float fill, const size_t * pad);
void k2c_conv1d(k2c_tensor* output, const k2c_tensor* input, const k2c_tensor* kernel,
                const k2c_tensor* bias, const size_t stride, const size_t dilation,
                k2c_activationType *activation);
void k2c_conv2d(k2c_tensor* output, const k2c_tensor* input, const k2c_tensor* kernel,
                const k2c_tensor* bias, const size_t * stride, const size_t * dilation,
                k2c_activationType *activation);

void k2c_dense(k2c_tensor* output, const k2c_tensor* input, const k2c_tensor* kernel,
               const k2c_tensor* bias, k2c_activationType *activation, float * fwork);
void k2c_flatten(k2c_tensor *output, const k2c_tensor* input);
void k2c_reshape(k2c_tensor *output, const k2c_tensor* input, const size_t * newshp,
                 const size_t newndim);
void k2c_permute_dims(k2c_tensor* output, const k2c_tensor* input, const size_t * permute);
void k2c_repeat_vector(k2c_tensor* output, const k2c_tensor* input, const size_t n);

float* k2c_read_array(const char* filename, const size_t array_size);

void k2c_add(k2c_tensor* output, const size_t num_tensors, ...);
void k2c_subtract(k2c_tensor* output, const size_t num_tensors, ...);
void k2c_multiply(k2c_tensor* output, const size_t num_tensors, ...);
void k2c_average(k2c_tensor* output, const size_t num_tensors, ...);
void k2c_max(k2c_tensor* output, const size_t num_tensors, ...);
void k2c_min(k2c_tensor* output, const size_t num_tensors, ...);
void k2c_concatenate(k2c_tensor* output, const size_t axis, const size_t num_tensors, ...);

void k2c_batch_norm(k2c_tensor* outputs, const k2c_tensor* inputs, const k2c_tensor* mean,
                    const k2c_tensor* stdev, const k2c_tensor* gamma, const k2c_tensor* beta,
                    const size_t axis);

void k2c_global_max_pooling(k2c_tensor* output, const k2c_tensor* input);
void k2c_global_avg_pooling(k2c_tensor* output, const k2c_tensor* input);
void k2c_maxpool1d(k2c_tensor* output, const k2c_tensor* input, const size_t pool_size,
                   const size_t stride);
void k2c_maxpool2d(k2c_tensor* output, const k2c_tensor* input, const size_t * pool_size,
                   const size_t * stride);
void k2c_avgpool1d(k2c_tensor* output, const k2c_tensor* input, const size_t pool_size,
                   const size_t stride);
void k2c_avgpool2d(k2c_tensor* output, const k2c_tensor* input, const size_t * pool_size,
                   const size_t * stride);

void k2c_simpleRNN(k2c_tensor* output, const k2c_tensor* input, float * state, const float * kernel,
                   const float * recurrent_kernel, const float * bias, float * fwork,
                   const int go_backwards, const int return_sequences,
                   k2c_activationType *output_activation);
void k2c_lstm(k2c_tensor* output, const k2c_tensor* input, float * state, const float * kernel,
              const float * recurrent_kernel, const float * bias, float * fwork,
              const int go_backwards, const int return_sequences,
              k2c_activationType *recurrent_activation, k2c_activationType *output_activation);
void k2c_gru(k2c_tensor* output, const k2c_tensor* input, float * state, const float * kernel,
             const float * recurrent_kernel, const float * bias, float * fwork, const int reset_after,
             const int go_backwards, const int return_sequences,
             k2c_activationType *recurrent_activation, k2c_activationType *output_activation);
"#;

struct ScratchDir(PathBuf);

impl Deref for ScratchDir {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

fn scratch_dir(tag: &str) -> ScratchDir {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "model2c_cc_{tag}_{}_{nanos}_{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(&dir).unwrap();
    ScratchDir(dir)
}

fn have_cc() -> bool {
    Command::new("cc")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn values(n: usize) -> Vec<f32> {
    (0..n).map(|i| ((i % 7) as f32 - 3.0) * 0.1).collect()
}

fn recurrent(units: usize, stateful: bool, reset_after: bool) -> RecurrentParams {
    RecurrentParams {
        units,
        activation: Activation::Tanh,
        recurrent_activation: Activation::Sigmoid,
        use_bias: true,
        return_sequences: false,
        return_state: false,
        go_backwards: false,
        stateful,
        reset_after,
    }
}

/// Conv, batch norm, pooling, merges, reshapes and all three recurrent
/// cells, one of them stateful.
fn mixed_model() -> Model {
    let mut model = Model::new("mixed");
    model.inputs.push(TensorRef::new("x_img", vec![4, 4, 2]));
    model.inputs.push(TensorRef::new("x_seq", vec![6, 4]));
    model.inputs.push(TensorRef::new("x_vec", vec![8]));
    model.outputs.push(TensorRef::new("perm", vec![4, 2]));
    model.outputs.push(TensorRef::new("dense", vec![3]));

    let layers = vec![
        Layer::new(
            "conv",
            LayerKind::Conv2D(ConvParams {
                filters: 2,
                kernel_size: vec![3, 3],
                strides: vec![1, 1],
                dilation_rate: vec![1, 1],
                padding: Padding::Same,
                data_format: DataFormat::ChannelsLast,
                activation: Activation::Relu,
                use_bias: true,
            }),
        )
        .with_input("x_img", vec![4, 4, 2])
        .with_output("conv", vec![4, 4, 2])
        .with_param("kernel", vec![3, 3, 2, 2], values(36))
        .with_param("bias", vec![2], values(2)),
        Layer::new(
            "bn",
            LayerKind::BatchNormalization(BatchNormParams {
                axis: -1,
                epsilon: 1e-3,
            }),
        )
        .with_input("conv", vec![4, 4, 2])
        .with_output("bn", vec![4, 4, 2])
        .with_param("gamma", vec![2], vec![1.0, 0.5])
        .with_param("beta", vec![2], vec![0.0, 0.1])
        .with_param("moving_mean", vec![2], vec![0.2, -0.2])
        .with_param("moving_variance", vec![2], vec![1.0, 2.0]),
        Layer::new(
            "pool",
            LayerKind::MaxPooling2D(PoolParams {
                pool_size: vec![2, 2],
                strides: vec![2, 2],
                padding: Padding::Valid,
                data_format: DataFormat::ChannelsLast,
            }),
        )
        .with_input("bn", vec![4, 4, 2])
        .with_output("pool", vec![2, 2, 2]),
        Layer::new("flat", LayerKind::Flatten)
            .with_input("pool", vec![2, 2, 2])
            .with_output("flat", vec![8]),
        Layer::new("sub", LayerKind::Subtract)
            .with_input("flat", vec![8])
            .with_input("x_vec", vec![8])
            .with_output("sub", vec![8]),
        Layer::new("reshape", LayerKind::Reshape { target_shape: vec![2, -1] })
            .with_input("sub", vec![8])
            .with_output("reshape", vec![2, 4]),
        Layer::new("perm", LayerKind::Permute { dims: vec![2, 1] })
            .with_input("reshape", vec![2, 4])
            .with_output("perm", vec![4, 2]),
        Layer::new("rnn", LayerKind::SimpleRNN(recurrent(2, true, false)))
            .with_input("x_seq", vec![6, 4])
            .with_output("rnn", vec![2])
            .with_param("kernel", vec![4, 2], values(8))
            .with_param("recurrent_kernel", vec![2, 2], values(4))
            .with_param("bias", vec![2], values(2)),
        Layer::new("lstm", LayerKind::Lstm(recurrent(2, false, false)))
            .with_input("x_seq", vec![6, 4])
            .with_output("lstm", vec![2])
            .with_param("kernel", vec![4, 8], values(32))
            .with_param("recurrent_kernel", vec![2, 8], values(16))
            .with_param("bias", vec![8], values(8)),
        Layer::new("gru", LayerKind::Gru(recurrent(2, false, true)))
            .with_input("x_seq", vec![6, 4])
            .with_output("gru", vec![2])
            .with_param("kernel", vec![4, 6], values(24))
            .with_param("recurrent_kernel", vec![2, 6], values(12))
            .with_param("bias", vec![2, 6], values(12)),
        Layer::new("cat", LayerKind::Concatenate { axis: -1 })
            .with_input("rnn", vec![2])
            .with_input("lstm", vec![2])
            .with_input("gru", vec![2])
            .with_output("cat", vec![6]),
        Layer::new(
            "dense",
            LayerKind::Dense(DenseParams {
                units: 3,
                activation: Activation::Softmax,
                use_bias: true,
            }),
        )
        .with_input("cat", vec![6])
        .with_output("dense", vec![3])
        .with_param("kernel", vec![6, 3], values(18))
        .with_param("bias", vec![3], values(3)),
    ];
    for layer in layers {
        model.add_layer(layer);
    }
    model
}

fn syntax_check(dir: &Path, file: &str) {
    let out = Command::new("cc")
        .args(["-std=c99", "-fsyntax-only", "-Werror=implicit-function-declaration"])
        .args(["-Werror=incompatible-pointer-types", "-I"])
        .arg(dir)
        .arg(dir.join(file))
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "{file} failed to compile:\n{}\n{}",
        String::from_utf8_lossy(&out.stderr),
        fs::read_to_string(dir.join(file)).unwrap_or_default()
    );
}

fn generate_and_check(placement: Placement, tag: &str) {
    if !have_cc() {
        eprintln!("cc not found, skipping");
        return;
    }
    let dir = scratch_dir(tag);
    fs::write(dir.join("k2c_tensor_include.h"), TENSOR_HEADER).unwrap();
    fs::write(dir.join("k2c_include.h"), RUNTIME_HEADER).unwrap();

    let options = CompileOptions {
        placement,
        formatter: Box::new(Identity),
        ..CompileOptions::new("mixed")
    };
    let tests = TestSuiteOptions {
        num_tests: 2,
        ..TestSuiteOptions::default()
    };
    let artifacts = convert(&mixed_model(), &options, &tests, &dir).unwrap();
    assert!(artifacts.stateful);

    syntax_check(&dir, "mixed.c");
    syntax_check(&dir, "mixed_test_suite.c");
}

#[test]
fn external_weights_compile() {
    generate_and_check(Placement::External, "external");
}

#[test]
fn inline_weights_compile() {
    generate_and_check(Placement::Inline, "inline");
}
