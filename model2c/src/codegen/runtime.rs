//! Entry points of the `k2c` C runtime that generated code may call.

use crate::ir::Activation;

pub const RUNTIME_HEADER: &str = "k2c_include.h";
pub const TENSOR_HEADER: &str = "k2c_tensor_include.h";

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeFn {
    Dense,
    Conv1d,
    Conv2d,
    Pad1d,
    Pad2d,
    MaxPool1d,
    MaxPool2d,
    AvgPool1d,
    AvgPool2d,
    GlobalMaxPooling,
    GlobalAvgPooling,
    SimpleRnn,
    Lstm,
    Gru,
    BatchNorm,
    Add,
    Subtract,
    Multiply,
    Average,
    Max,
    Min,
    Concatenate,
    Flatten,
    Reshape,
    PermuteDims,
    RepeatVector,
    /// `k2c_ReLU(x, size, max_value, negative_slope, threshold)`
    Relu,
    LeakyRelu,
    Elu,
    ThresholdedRelu,
    Prelu,
    /// In-place activation through its function pointer, `(x, size)`.
    Activation(Activation),
    /// `float* k2c_read_array(filename, size)`, heap-allocated
    ReadArray,
}

impl RuntimeFn {
    pub fn c_name(&self) -> &'static str {
        match self {
            RuntimeFn::Dense => "k2c_dense",
            RuntimeFn::Conv1d => "k2c_conv1d",
            RuntimeFn::Conv2d => "k2c_conv2d",
            RuntimeFn::Pad1d => "k2c_pad1d",
            RuntimeFn::Pad2d => "k2c_pad2d",
            RuntimeFn::MaxPool1d => "k2c_maxpool1d",
            RuntimeFn::MaxPool2d => "k2c_maxpool2d",
            RuntimeFn::AvgPool1d => "k2c_avgpool1d",
            RuntimeFn::AvgPool2d => "k2c_avgpool2d",
            RuntimeFn::GlobalMaxPooling => "k2c_global_max_pooling",
            RuntimeFn::GlobalAvgPooling => "k2c_global_avg_pooling",
            RuntimeFn::SimpleRnn => "k2c_simpleRNN",
            RuntimeFn::Lstm => "k2c_lstm",
            RuntimeFn::Gru => "k2c_gru",
            RuntimeFn::BatchNorm => "k2c_batch_norm",
            RuntimeFn::Add => "k2c_add",
            RuntimeFn::Subtract => "k2c_subtract",
            RuntimeFn::Multiply => "k2c_multiply",
            RuntimeFn::Average => "k2c_average",
            RuntimeFn::Max => "k2c_max",
            RuntimeFn::Min => "k2c_min",
            RuntimeFn::Concatenate => "k2c_concatenate",
            RuntimeFn::Flatten => "k2c_flatten",
            RuntimeFn::Reshape => "k2c_reshape",
            RuntimeFn::PermuteDims => "k2c_permute_dims",
            RuntimeFn::RepeatVector => "k2c_repeat_vector",
            RuntimeFn::Relu => "k2c_ReLU",
            RuntimeFn::LeakyRelu => "k2c_LeakyReLU",
            RuntimeFn::Elu => "k2c_ELU",
            RuntimeFn::ThresholdedRelu => "k2c_ThresholdedReLU",
            RuntimeFn::Prelu => "k2c_PReLU",
            RuntimeFn::Activation(act) => activation_fn(act),
            RuntimeFn::ReadArray => "k2c_read_array",
        }
    }
}

/// Function-pointer name of an activation. Unknown activations never reach
/// code generation; they map to the identity.
pub fn activation_fn(act: &Activation) -> &'static str {
    match act {
        Activation::Linear | Activation::Unknown(_) => "k2c_linear",
        Activation::Relu => "k2c_relu",
        Activation::Sigmoid => "k2c_sigmoid",
        Activation::Tanh => "k2c_tanh",
        Activation::Softmax => "k2c_softmax",
        Activation::HardSigmoid => "k2c_hard_sigmoid",
        Activation::Exponential => "k2c_exponential",
        Activation::Softplus => "k2c_softplus",
        Activation::Softsign => "k2c_softsign",
    }
}
