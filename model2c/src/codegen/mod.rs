pub mod assemble;
pub mod lower;
pub mod payload;
pub mod plan;
pub mod render;
pub mod runtime;
pub mod tensor_expr;
pub mod weights;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CompileError, Result};
use crate::format::{format_or_passthrough, CodeFormatter};
use crate::ir::ModelSource;
use crate::names;

pub use assemble::{MainSignature, TensorArg};
pub use weights::Placement;

use tensor_expr::TensorExprWriter;

/// Rendered artifacts, not yet on disk.
#[derive(Debug, Clone)]
pub struct Generated {
    pub function_name: String,
    pub source: String,
    pub header: String,
    /// Payload file name and values, external placement only.
    pub payloads: Vec<(String, Vec<f32>)>,
    pub signature: MainSignature,
}

/// What a compile run produced, and how to call it.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifacts {
    pub function_name: String,
    pub signature: MainSignature,
    pub external_weights: Vec<String>,
    pub stateful: bool,
    pub files: Vec<PathBuf>,
}

/// Run the code generation passes. The model must already have passed the
/// checker.
pub fn generate(source: &dyn ModelSource, function_name: &str, placement: Placement) -> Result<Generated> {
    let io = names::extract(source);
    let writer = TensorExprWriter::new(function_name, &io);

    let weights = weights::externalize(source, &io, &writer, placement);
    let blocks = lower::lower_layers(source, &writer, &weights)?;
    let assembled = assemble::assemble(source, &io, &writer, &weights, blocks);

    let payloads = weights
        .external
        .groups
        .iter()
        .flat_map(|g| g.payloads.iter().map(|p| (p.file_name.clone(), p.values.clone())))
        .collect();

    Ok(Generated {
        function_name: function_name.to_string(),
        source: render::render_source(&assembled.unit),
        header: render::render_header(&assembled.header),
        payloads,
        signature: assembled.signature,
    })
}

fn write_file(path: &Path, text: &str) -> Result<()> {
    fs::write(path, text).map_err(|e| CompileError::io(path, e))
}

/// Write `F.c`, `F.h` and any payload files into `out_dir`.
pub fn write_artifacts(generated: Generated, formatter: &dyn CodeFormatter, out_dir: &Path) -> Result<Artifacts> {
    fs::create_dir_all(out_dir).map_err(|e| CompileError::io(out_dir, e))?;
    let name = &generated.function_name;
    let mut files = Vec::new();

    let c_path = out_dir.join(format!("{name}.c"));
    write_file(&c_path, &format_or_passthrough(formatter, generated.source))?;
    files.push(c_path);

    let h_path = out_dir.join(format!("{name}.h"));
    write_file(&h_path, &format_or_passthrough(formatter, generated.header))?;
    files.push(h_path);

    for (file_name, values) in &generated.payloads {
        let path = out_dir.join(file_name);
        payload::write_payload(&path, values)?;
        files.push(path);
    }

    log::info!("wrote {} files to {}", files.len(), out_dir.display());
    Ok(Artifacts {
        function_name: name.clone(),
        external_weights: generated.signature.weight_groups.clone(),
        stateful: generated.signature.stateful,
        signature: generated.signature,
        files,
    })
}
