//! Layer kinds and their typed configuration records.
//!
//! Each kind maps onto one template in the lowering engine and one kernel in
//! the reference interpreter.

#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    /// Placeholder that introduces a model input; emits no computation.
    Input,

    Dense(DenseParams),
    Conv1D(ConvParams),
    Conv2D(ConvParams),
    ZeroPadding1D { padding: [usize; 2] },
    /// `[[top, bottom], [left, right]]`
    ZeroPadding2D { padding: [[usize; 2]; 2] },

    MaxPooling1D(PoolParams),
    MaxPooling2D(PoolParams),
    AveragePooling1D(PoolParams),
    AveragePooling2D(PoolParams),
    GlobalMaxPooling1D,
    GlobalMaxPooling2D,
    GlobalAveragePooling1D,
    GlobalAveragePooling2D,

    Activation(Activation),
    ReLU(ReluParams),
    LeakyReLU { alpha: f32 },
    Elu { alpha: f32 },
    ThresholdedReLU { theta: f32 },
    /// Learned per-element slope stored in the `alpha` parameter.
    PReLU,
    Softmax { axis: i64 },

    SimpleRNN(RecurrentParams),
    Lstm(RecurrentParams),
    Gru(RecurrentParams),

    BatchNormalization(BatchNormParams),

    Add,
    Subtract,
    Multiply,
    Average,
    Maximum,
    Minimum,
    Concatenate { axis: i64 },

    Flatten,
    Reshape { target_shape: Vec<i64> },
    /// 1-based dimension indices, batch excluded.
    Permute { dims: Vec<usize> },
    RepeatVector { n: usize },
    Dropout,

    /// Class name the source reported but that has no lowering.
    Unsupported(String),
}

/// Elementwise activation functions available as runtime function pointers.
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
    HardSigmoid,
    Exponential,
    Softplus,
    Softsign,
    Unknown(String),
}

impl Activation {
    pub fn from_name(name: &str) -> Self {
        match name {
            "linear" => Activation::Linear,
            "relu" => Activation::Relu,
            "sigmoid" => Activation::Sigmoid,
            "tanh" => Activation::Tanh,
            "softmax" => Activation::Softmax,
            "hard_sigmoid" => Activation::HardSigmoid,
            "exponential" => Activation::Exponential,
            "softplus" => Activation::Softplus,
            "softsign" => Activation::Softsign,
            other => Activation::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Activation::Linear => "linear",
            Activation::Relu => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::Softmax => "softmax",
            Activation::HardSigmoid => "hard_sigmoid",
            Activation::Exponential => "exponential",
            Activation::Softplus => "softplus",
            Activation::Softsign => "softsign",
            Activation::Unknown(name) => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    Valid,
    Same,
    /// Left-only padding so output step `t` never sees inputs after `t`.
    Causal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    ChannelsLast,
    ChannelsFirst,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DenseParams {
    pub units: usize,
    pub activation: Activation,
    pub use_bias: bool,
}

/// Shared by `Conv1D` (one entry per vector) and `Conv2D` (two entries).
#[derive(Debug, Clone, PartialEq)]
pub struct ConvParams {
    pub filters: usize,
    pub kernel_size: Vec<usize>,
    pub strides: Vec<usize>,
    pub dilation_rate: Vec<usize>,
    pub padding: Padding,
    pub data_format: DataFormat,
    pub activation: Activation,
    pub use_bias: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolParams {
    pub pool_size: Vec<usize>,
    pub strides: Vec<usize>,
    pub padding: Padding,
    pub data_format: DataFormat,
}

/// `max_value` of `None` means unbounded.
#[derive(Debug, Clone, PartialEq)]
pub struct ReluParams {
    pub max_value: Option<f32>,
    pub negative_slope: f32,
    pub threshold: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecurrentParams {
    pub units: usize,
    pub activation: Activation,
    /// Gate activation; ignored by `SimpleRNN`.
    pub recurrent_activation: Activation,
    pub use_bias: bool,
    pub return_sequences: bool,
    pub return_state: bool,
    pub go_backwards: bool,
    pub stateful: bool,
    /// GRU only: apply the reset gate after the recurrent matmul.
    pub reset_after: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormParams {
    /// Axis as written by the source, counting the batch dimension as 0.
    pub axis: i64,
    pub epsilon: f32,
}

impl LayerKind {
    /// Class name used in diagnostics.
    pub fn class_name(&self) -> &str {
        match self {
            LayerKind::Input => "InputLayer",
            LayerKind::Dense(_) => "Dense",
            LayerKind::Conv1D(_) => "Conv1D",
            LayerKind::Conv2D(_) => "Conv2D",
            LayerKind::ZeroPadding1D { .. } => "ZeroPadding1D",
            LayerKind::ZeroPadding2D { .. } => "ZeroPadding2D",
            LayerKind::MaxPooling1D(_) => "MaxPooling1D",
            LayerKind::MaxPooling2D(_) => "MaxPooling2D",
            LayerKind::AveragePooling1D(_) => "AveragePooling1D",
            LayerKind::AveragePooling2D(_) => "AveragePooling2D",
            LayerKind::GlobalMaxPooling1D => "GlobalMaxPooling1D",
            LayerKind::GlobalMaxPooling2D => "GlobalMaxPooling2D",
            LayerKind::GlobalAveragePooling1D => "GlobalAveragePooling1D",
            LayerKind::GlobalAveragePooling2D => "GlobalAveragePooling2D",
            LayerKind::Activation(_) => "Activation",
            LayerKind::ReLU(_) => "ReLU",
            LayerKind::LeakyReLU { .. } => "LeakyReLU",
            LayerKind::Elu { .. } => "ELU",
            LayerKind::ThresholdedReLU { .. } => "ThresholdedReLU",
            LayerKind::PReLU => "PReLU",
            LayerKind::Softmax { .. } => "Softmax",
            LayerKind::SimpleRNN(_) => "SimpleRNN",
            LayerKind::Lstm(_) => "LSTM",
            LayerKind::Gru(_) => "GRU",
            LayerKind::BatchNormalization(_) => "BatchNormalization",
            LayerKind::Add => "Add",
            LayerKind::Subtract => "Subtract",
            LayerKind::Multiply => "Multiply",
            LayerKind::Average => "Average",
            LayerKind::Maximum => "Maximum",
            LayerKind::Minimum => "Minimum",
            LayerKind::Concatenate { .. } => "Concatenate",
            LayerKind::Flatten => "Flatten",
            LayerKind::Reshape { .. } => "Reshape",
            LayerKind::Permute { .. } => "Permute",
            LayerKind::RepeatVector { .. } => "RepeatVector",
            LayerKind::Dropout => "Dropout",
            LayerKind::Unsupported(name) => name,
        }
    }

    pub fn is_merge(&self) -> bool {
        matches!(
            self,
            LayerKind::Add
                | LayerKind::Subtract
                | LayerKind::Multiply
                | LayerKind::Average
                | LayerKind::Maximum
                | LayerKind::Minimum
                | LayerKind::Concatenate { .. }
        )
    }

    pub fn recurrent(&self) -> Option<&RecurrentParams> {
        match self {
            LayerKind::SimpleRNN(p) | LayerKind::Lstm(p) | LayerKind::Gru(p) => Some(p),
            _ => None,
        }
    }

    /// Elements of recurrent state per layer: `[h, c]` for LSTM, `h` otherwise.
    pub fn state_len(&self) -> Option<usize> {
        match self {
            LayerKind::Lstm(p) => Some(2 * p.units),
            LayerKind::SimpleRNN(p) | LayerKind::Gru(p) => Some(p.units),
            _ => None,
        }
    }

    /// Gate count of the fused recurrent kernel (`kernel` is `[features, gates * units]`).
    pub fn gate_count(&self) -> Option<usize> {
        match self {
            LayerKind::SimpleRNN(_) => Some(1),
            LayerKind::Lstm(_) => Some(4),
            LayerKind::Gru(_) => Some(3),
            _ => None,
        }
    }
}
