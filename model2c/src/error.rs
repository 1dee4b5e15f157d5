use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::eval::EvalError;

#[derive(Debug, Error)]
pub enum CompileError {
    /// A layer kind or configuration the code generator cannot express
    #[error("layer `{layer}` ({kind}): {reason}")]
    Unsupported {
        layer: String,
        kind: String,
        reason: String,
    },
    /// A layer reads a tensor no earlier layer produced
    #[error("layer `{layer}` reads tensor `{tensor}` before it is produced")]
    OutOfOrder { layer: String, tensor: String },
    /// Model-level inconsistency (io declarations, duplicate names)
    #[error("invalid model: {0}")]
    InvalidModel(String),
    #[error("invalid function name `{name}`: {reason}")]
    InvalidFunctionName { name: String, reason: String },
    /// Reference evaluation failed while building the test suite
    #[error("reference evaluation failed: {0}")]
    Reference(#[from] EvalError),
    #[error("failed to parse model {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl CompileError {
    pub(crate) fn unsupported(layer: &crate::ir::Layer, reason: impl Into<String>) -> Self {
        CompileError::Unsupported {
            layer: layer.name.clone(),
            kind: layer.kind.class_name().to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CompileError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;
