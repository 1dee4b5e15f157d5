//! Compile trained neural network models into standalone C source that runs
//! on the `k2c` runtime.
//!
//! ```text
//! load_model ─▶ check ─▶ names ─▶ weights ─▶ lower ─▶ assemble ─▶ render ─▶ files
//!                                                                          └▶ testsuite
//! ```

pub mod check;
pub mod codegen;
pub mod error;
pub mod eval;
pub mod format;
pub mod ir;
pub mod kernels;
pub mod names;
pub mod parse;
pub mod shapes;
pub mod testsuite;

#[cfg(test)]
pub(crate) mod test_util;

use std::path::Path;

use log::Level;

pub use codegen::{Artifacts, MainSignature, Placement};
pub use error::{CompileError, Result};
pub use format::{Astyle, CodeFormatter, Identity};
pub use ir::{Model, ModelSource};
pub use testsuite::TestSuiteOptions;

pub struct CompileOptions {
    /// Name of the generated entry point, and stem of every output file.
    pub function_name: String,
    pub placement: Placement,
    /// Report pipeline progress at `info` instead of `debug`.
    pub verbose: bool,
    pub formatter: Box<dyn CodeFormatter>,
}

impl CompileOptions {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            placement: Placement::default(),
            verbose: false,
            formatter: Box::new(Astyle::default()),
        }
    }

    fn progress_level(&self) -> Level {
        if self.verbose {
            Level::Info
        } else {
            Level::Debug
        }
    }
}

/// Check `source`, generate `F.c`, `F.h` and any payload files into
/// `out_dir`. Nothing is written if the model fails the checks.
pub fn compile(source: &dyn ModelSource, options: &CompileOptions, out_dir: &Path) -> Result<Artifacts> {
    let level = options.progress_level();
    let name = &options.function_name;

    check::check_model(source, name)?;
    log::log!(level, "all checks passed for model `{}`", source.name());

    let generated = codegen::generate(source, name, options.placement)?;
    log::log!(level, "generated `{name}` ({} weight groups)", generated.signature.weight_groups.len());

    let artifacts = codegen::write_artifacts(generated, options.formatter.as_ref(), out_dir)?;
    log::log!(level, "C code is in {name}.c with header {name}.h");
    if !artifacts.external_weights.is_empty() {
        log::log!(
            level,
            "weight payloads must be placed in the directory the program runs from"
        );
    }
    Ok(artifacts)
}

/// [`compile`], then generate `F_test_suite.c` unless `tests.num_tests` is 0.
pub fn convert(
    source: &dyn ModelSource,
    options: &CompileOptions,
    tests: &TestSuiteOptions,
    out_dir: &Path,
) -> Result<Artifacts> {
    let mut artifacts = compile(source, options, out_dir)?;
    if tests.num_tests > 0 {
        let path = testsuite::make_test_suite(source, &artifacts, tests, out_dir)?;
        log::log!(options.progress_level(), "tests are in {}", path.display());
        artifacts.files.push(path);
    }
    Ok(artifacts)
}
