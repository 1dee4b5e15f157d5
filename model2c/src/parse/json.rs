//! JSON model reader.
//!
//! The document mirrors a layer-graph export: declared model io, then layers in
//! declaration order, each with a class name, a framework-style `config`
//! object, its io tensors and its weights.
//!
//! ```json
//! {
//!   "name": "mnist",
//!   "inputs":  [{"name": "input_1", "shape": [3]}],
//!   "outputs": [{"name": "dense_1/BiasAdd:0", "shape": [2]}],
//!   "layers": [
//!     {"name": "dense_1", "class_name": "Dense",
//!      "config": {"units": 2, "activation": "relu"},
//!      "inputs":  [{"name": "input_1", "shape": [3]}],
//!      "outputs": [{"name": "dense_1/BiasAdd:0", "shape": [2]}],
//!      "weights": [{"name": "kernel", "shape": [3, 2], "values": [[1, 0], [0, 1], [1, 1]]},
//!                  {"name": "bias", "shape": [2], "values": [0, 0]}]}
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::de::Error as _;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{CompileError, Result};
use crate::ir::{
    Activation, BatchNormParams, ConvParams, DataFormat, DenseParams, Layer, LayerKind, Model, Padding,
    PoolParams, RecurrentParams, ReluParams, TensorRef,
};

#[derive(Deserialize)]
struct ModelDoc {
    #[serde(default = "default_model_name")]
    name: String,
    inputs: Vec<TensorDoc>,
    outputs: Vec<TensorDoc>,
    layers: Vec<LayerDoc>,
}

#[derive(Deserialize)]
struct TensorDoc {
    name: String,
    shape: Vec<usize>,
}

#[derive(Deserialize)]
struct LayerDoc {
    name: String,
    class_name: String,
    #[serde(default)]
    config: Value,
    #[serde(default)]
    inputs: Vec<TensorDoc>,
    #[serde(default)]
    outputs: Vec<TensorDoc>,
    #[serde(default)]
    weights: Vec<WeightDoc>,
}

#[derive(Deserialize)]
struct WeightDoc {
    name: String,
    shape: Vec<usize>,
    /// Flat or nested numeric arrays; flattened row-major.
    values: Value,
}

/// An integer or a list of integers, as framework configs write window sizes.
#[derive(Deserialize, Clone)]
#[serde(untagged)]
enum OneOrMany {
    One(usize),
    Many(Vec<usize>),
}

impl OneOrMany {
    fn expand(&self, n: usize) -> std::result::Result<Vec<usize>, String> {
        match self {
            OneOrMany::One(v) => Ok(vec![*v; n]),
            OneOrMany::Many(v) if v.len() == n => Ok(v.clone()),
            OneOrMany::Many(v) => Err(format!("expected {n} values, got {v:?}")),
        }
    }
}

fn default_model_name() -> String {
    "model".into()
}
fn yes() -> bool {
    true
}
fn linear() -> String {
    "linear".into()
}
fn tanh() -> String {
    "tanh".into()
}
fn sigmoid() -> String {
    "sigmoid".into()
}
fn valid() -> String {
    "valid".into()
}
fn channels_last() -> String {
    "channels_last".into()
}
fn one() -> OneOrMany {
    OneOrMany::One(1)
}
fn two() -> OneOrMany {
    OneOrMany::One(2)
}
fn minus_one() -> i64 {
    -1
}

#[derive(Deserialize)]
struct DenseConfig {
    units: usize,
    #[serde(default = "linear")]
    activation: String,
    #[serde(default = "yes")]
    use_bias: bool,
}

#[derive(Deserialize)]
struct ConvConfig {
    filters: usize,
    kernel_size: OneOrMany,
    #[serde(default = "one")]
    strides: OneOrMany,
    #[serde(default = "one")]
    dilation_rate: OneOrMany,
    #[serde(default = "valid")]
    padding: String,
    #[serde(default = "channels_last")]
    data_format: String,
    #[serde(default = "linear")]
    activation: String,
    #[serde(default = "yes")]
    use_bias: bool,
}

#[derive(Deserialize)]
struct PoolConfig {
    #[serde(default = "two")]
    pool_size: OneOrMany,
    #[serde(default)]
    strides: Option<OneOrMany>,
    #[serde(default = "valid")]
    padding: String,
    #[serde(default = "channels_last")]
    data_format: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Padding2dDoc {
    Same(usize),
    Symmetric([usize; 2]),
    Explicit([[usize; 2]; 2]),
}

#[derive(Deserialize)]
struct ZeroPadding1DConfig {
    #[serde(default = "one")]
    padding: OneOrMany,
}

#[derive(Deserialize)]
struct ZeroPadding2DConfig {
    padding: Option<Padding2dDoc>,
}

#[derive(Deserialize)]
struct ActivationConfig {
    activation: String,
}

#[derive(Deserialize)]
struct ReluConfig {
    #[serde(default)]
    max_value: Option<f32>,
    #[serde(default)]
    negative_slope: f32,
    #[serde(default)]
    threshold: f32,
}

#[derive(Deserialize)]
struct AlphaConfig {
    #[serde(alias = "negative_slope")]
    alpha: Option<f32>,
}

#[derive(Deserialize)]
struct ThetaConfig {
    theta: Option<f32>,
}

#[derive(Deserialize)]
struct AxisConfig {
    #[serde(default = "minus_one")]
    axis: i64,
}

#[derive(Deserialize)]
struct RecurrentConfig {
    units: usize,
    #[serde(default = "tanh")]
    activation: String,
    #[serde(default = "sigmoid")]
    recurrent_activation: String,
    #[serde(default = "yes")]
    use_bias: bool,
    #[serde(default)]
    return_sequences: bool,
    #[serde(default)]
    return_state: bool,
    #[serde(default)]
    go_backwards: bool,
    #[serde(default)]
    stateful: bool,
    #[serde(default = "yes")]
    reset_after: bool,
}

#[derive(Deserialize)]
struct BatchNormConfig {
    #[serde(default = "minus_one")]
    axis: i64,
    #[serde(default = "default_epsilon")]
    epsilon: f32,
    #[serde(default = "yes")]
    center: bool,
    #[serde(default = "yes")]
    scale: bool,
}

fn default_epsilon() -> f32 {
    1e-3
}

#[derive(Deserialize)]
struct ReshapeConfig {
    target_shape: Vec<i64>,
}

#[derive(Deserialize)]
struct PermuteConfig {
    dims: Vec<usize>,
}

#[derive(Deserialize)]
struct RepeatVectorConfig {
    n: usize,
}

type ConvertResult<T> = std::result::Result<T, String>;

fn config<T: DeserializeOwned>(value: &Value) -> ConvertResult<T> {
    // absent config behaves like an empty object so defaults apply
    let value = if value.is_null() {
        Value::Object(Default::default())
    } else {
        value.clone()
    };
    serde_json::from_value(value).map_err(|e| e.to_string())
}

fn padding(name: &str) -> ConvertResult<Padding> {
    match name {
        "valid" => Ok(Padding::Valid),
        "same" => Ok(Padding::Same),
        "causal" => Ok(Padding::Causal),
        other => Err(format!("unknown padding `{other}`")),
    }
}

fn data_format(name: &str) -> ConvertResult<DataFormat> {
    match name {
        "channels_last" => Ok(DataFormat::ChannelsLast),
        "channels_first" => Ok(DataFormat::ChannelsFirst),
        other => Err(format!("unknown data format `{other}`")),
    }
}

fn conv(value: &Value, spatial: usize) -> ConvertResult<ConvParams> {
    let c: ConvConfig = config(value)?;
    Ok(ConvParams {
        filters: c.filters,
        kernel_size: c.kernel_size.expand(spatial)?,
        strides: c.strides.expand(spatial)?,
        dilation_rate: c.dilation_rate.expand(spatial)?,
        padding: padding(&c.padding)?,
        data_format: data_format(&c.data_format)?,
        activation: Activation::from_name(&c.activation),
        use_bias: c.use_bias,
    })
}

fn pool(value: &Value, spatial: usize) -> ConvertResult<PoolParams> {
    let c: PoolConfig = config(value)?;
    let pool_size = c.pool_size.expand(spatial)?;
    let strides = match c.strides {
        Some(s) => s.expand(spatial)?,
        None => pool_size.clone(),
    };
    Ok(PoolParams {
        pool_size,
        strides,
        padding: padding(&c.padding)?,
        data_format: data_format(&c.data_format)?,
    })
}

fn recurrent(value: &Value) -> ConvertResult<RecurrentParams> {
    let c: RecurrentConfig = config(value)?;
    Ok(RecurrentParams {
        units: c.units,
        activation: Activation::from_name(&c.activation),
        recurrent_activation: Activation::from_name(&c.recurrent_activation),
        use_bias: c.use_bias,
        return_sequences: c.return_sequences,
        return_state: c.return_state,
        go_backwards: c.go_backwards,
        stateful: c.stateful,
        reset_after: c.reset_after,
    })
}

fn layer_kind(class_name: &str, value: &Value) -> ConvertResult<LayerKind> {
    let kind = match class_name {
        "InputLayer" | "Input" => LayerKind::Input,
        "Dense" => {
            let c: DenseConfig = config(value)?;
            LayerKind::Dense(DenseParams {
                units: c.units,
                activation: Activation::from_name(&c.activation),
                use_bias: c.use_bias,
            })
        }
        "Conv1D" => LayerKind::Conv1D(conv(value, 1)?),
        "Conv2D" => LayerKind::Conv2D(conv(value, 2)?),
        "ZeroPadding1D" => {
            let c: ZeroPadding1DConfig = config(value)?;
            let p = c.padding.expand(2)?;
            LayerKind::ZeroPadding1D { padding: [p[0], p[1]] }
        }
        "ZeroPadding2D" => {
            let c: ZeroPadding2DConfig = config(value)?;
            let padding = match c.padding.unwrap_or(Padding2dDoc::Same(1)) {
                Padding2dDoc::Same(p) => [[p, p], [p, p]],
                Padding2dDoc::Symmetric([h, w]) => [[h, h], [w, w]],
                Padding2dDoc::Explicit(p) => p,
            };
            LayerKind::ZeroPadding2D { padding }
        }
        "MaxPooling1D" => LayerKind::MaxPooling1D(pool(value, 1)?),
        "MaxPooling2D" => LayerKind::MaxPooling2D(pool(value, 2)?),
        "AveragePooling1D" => LayerKind::AveragePooling1D(pool(value, 1)?),
        "AveragePooling2D" => LayerKind::AveragePooling2D(pool(value, 2)?),
        "GlobalMaxPooling1D" => LayerKind::GlobalMaxPooling1D,
        "GlobalMaxPooling2D" => LayerKind::GlobalMaxPooling2D,
        "GlobalAveragePooling1D" => LayerKind::GlobalAveragePooling1D,
        "GlobalAveragePooling2D" => LayerKind::GlobalAveragePooling2D,
        "Activation" => {
            let c: ActivationConfig = config(value)?;
            LayerKind::Activation(Activation::from_name(&c.activation))
        }
        "ReLU" => {
            let c: ReluConfig = config(value)?;
            LayerKind::ReLU(ReluParams {
                max_value: c.max_value,
                negative_slope: c.negative_slope,
                threshold: c.threshold,
            })
        }
        "LeakyReLU" => {
            let c: AlphaConfig = config(value)?;
            LayerKind::LeakyReLU {
                alpha: c.alpha.unwrap_or(0.3),
            }
        }
        "ELU" => {
            let c: AlphaConfig = config(value)?;
            LayerKind::Elu {
                alpha: c.alpha.unwrap_or(1.0),
            }
        }
        "ThresholdedReLU" => {
            let c: ThetaConfig = config(value)?;
            LayerKind::ThresholdedReLU {
                theta: c.theta.unwrap_or(1.0),
            }
        }
        "PReLU" => LayerKind::PReLU,
        "Softmax" => {
            let c: AxisConfig = config(value)?;
            LayerKind::Softmax { axis: c.axis }
        }
        "SimpleRNN" => LayerKind::SimpleRNN(recurrent(value)?),
        "LSTM" => LayerKind::Lstm(recurrent(value)?),
        "GRU" => LayerKind::Gru(recurrent(value)?),
        "BatchNormalization" => {
            let c: BatchNormConfig = config(value)?;
            LayerKind::BatchNormalization(BatchNormParams {
                axis: c.axis,
                epsilon: c.epsilon,
            })
        }
        "Add" => LayerKind::Add,
        "Subtract" => LayerKind::Subtract,
        "Multiply" => LayerKind::Multiply,
        "Average" => LayerKind::Average,
        "Maximum" => LayerKind::Maximum,
        "Minimum" => LayerKind::Minimum,
        "Concatenate" => {
            let c: AxisConfig = config(value)?;
            LayerKind::Concatenate { axis: c.axis }
        }
        "Flatten" => LayerKind::Flatten,
        "Reshape" => {
            let c: ReshapeConfig = config(value)?;
            LayerKind::Reshape {
                target_shape: c.target_shape,
            }
        }
        "Permute" => {
            let c: PermuteConfig = config(value)?;
            LayerKind::Permute { dims: c.dims }
        }
        "RepeatVector" => {
            let c: RepeatVectorConfig = config(value)?;
            LayerKind::RepeatVector { n: c.n }
        }
        "Dropout" | "SpatialDropout1D" | "SpatialDropout2D" | "GaussianNoise" | "GaussianDropout"
        | "AlphaDropout" => LayerKind::Dropout,
        other => LayerKind::Unsupported(other.to_string()),
    };
    Ok(kind)
}

fn flatten_values(value: &Value, out: &mut Vec<f32>) -> ConvertResult<()> {
    match value {
        Value::Number(n) => {
            let v = n.as_f64().ok_or_else(|| format!("non-finite weight value {n}"))?;
            out.push(v as f32);
        }
        Value::Array(items) => {
            for item in items {
                flatten_values(item, out)?;
            }
        }
        other => return Err(format!("weight values must be numbers, found {other}")),
    }
    Ok(())
}

fn convert_layer(doc: LayerDoc) -> ConvertResult<Layer> {
    let kind = layer_kind(&doc.class_name, &doc.config)?;
    let mut layer = Layer::new(doc.name, kind);
    for t in doc.inputs {
        layer.inputs.push(TensorRef::new(t.name, t.shape));
    }
    for t in doc.outputs {
        layer.outputs.push(TensorRef::new(t.name, t.shape));
    }
    for w in doc.weights {
        let mut values = Vec::new();
        flatten_values(&w.values, &mut values)?;
        layer = layer.with_param(w.name, w.shape, values);
    }

    // center/scale disabled: substitute the identity so every batch norm
    // carries the same four parameters
    if doc.class_name == "BatchNormalization" {
        let c: BatchNormConfig = config(&doc.config)?;
        let channels = layer.param("moving_mean").map(|p| p.shape.clone());
        if let Some(shape) = channels {
            let n = shape.iter().product();
            if !c.scale && layer.param("gamma").is_none() {
                layer = layer.with_param("gamma", shape.clone(), vec![1.0; n]);
            }
            if !c.center && layer.param("beta").is_none() {
                layer = layer.with_param("beta", shape, vec![0.0; n]);
            }
        }
    }
    Ok(layer)
}

/// Parse a model document from JSON text.
pub fn parse_model(text: &str) -> std::result::Result<Model, serde_json::Error> {
    let doc: ModelDoc = serde_json::from_str(text)?;
    let mut model = Model::new(doc.name);
    model.inputs = doc.inputs.into_iter().map(|t| TensorRef::new(t.name, t.shape)).collect();
    model.outputs = doc.outputs.into_iter().map(|t| TensorRef::new(t.name, t.shape)).collect();
    for layer in doc.layers {
        let name = layer.name.clone();
        let layer = convert_layer(layer)
            .map_err(|e| serde_json::Error::custom(format!("layer `{name}`: {e}")))?;
        model.add_layer(layer);
    }
    log::debug!("parsed model `{}` with {} layers", model.name, model.layers.len());
    Ok(model)
}

/// Read and parse a model document from disk.
pub fn load_model(path: impl AsRef<Path>) -> Result<Model> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| CompileError::io(path, e))?;
    parse_model(&text).map_err(|source| CompileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
