//! Generates `F_test_suite.c`: a standalone C program that feeds sampled
//! inputs through the generated function and compares against reference
//! outputs.

use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::codegen::plan::{ArrayInit, DataRef, Decl, Storage};
use crate::codegen::render::{render_decl, render_float};
use crate::codegen::runtime::TENSOR_HEADER;
use crate::codegen::{Artifacts, MainSignature, TensorArg};
use crate::error::{CompileError, Result};
use crate::ir::ModelSource;

#[derive(Debug, Clone, PartialEq)]
pub struct TestSuiteOptions {
    pub num_tests: usize,
    pub seed: u64,
    /// Half-open range inputs are drawn from.
    pub input_range: (f32, f32),
    pub atol: f32,
    pub rtol: f32,
    /// Reset recurrent state before every case. Ignored for stateless models.
    pub independent_cases: bool,
}

impl Default for TestSuiteOptions {
    fn default() -> Self {
        Self {
            num_tests: 10,
            seed: 0,
            input_range: (-1.0, 1.0),
            atol: 1e-5,
            rtol: 1e-4,
            independent_cases: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub inputs: Vec<Vec<f32>>,
    pub expected: Vec<Vec<f32>>,
}

/// Sample inputs and run them through the reference model.
pub fn sample_cases(
    source: &dyn ModelSource,
    signature: &MainSignature,
    options: &TestSuiteOptions,
) -> Result<Vec<TestCase>> {
    let mut rng = SmallRng::seed_from_u64(options.seed);
    let mut reference = source.reference()?;
    let (lo, hi) = options.input_range;

    let mut cases = Vec::with_capacity(options.num_tests);
    for _ in 0..options.num_tests {
        let inputs: Vec<Vec<f32>> = signature
            .inputs
            .iter()
            .map(|t| {
                (0..t.numel())
                    .map(|_| if lo < hi { rng.gen_range(lo..hi) } else { lo })
                    .collect()
            })
            .collect();
        if options.independent_cases && signature.stateful {
            reference.reset_states();
        }
        let expected = reference.predict(&inputs)?;
        cases.push(TestCase { inputs, expected });
    }
    Ok(cases)
}

fn tensor_decls(ident: &str, shape: &[usize], init: ArrayInit) -> [Decl; 2] {
    let array = format!("{ident}_array");
    [
        Decl::FloatArray {
            name: array.clone(),
            len: shape.iter().product(),
            init,
            storage: Storage::Static,
        },
        Decl::Tensor {
            name: ident.to_string(),
            data: DataRef::Array(array),
            shape: shape.to_vec(),
        },
    ]
}

fn values(v: &[f32]) -> ArrayInit {
    if v.iter().all(|x| *x == 0.0) {
        ArrayInit::Zeros
    } else {
        ArrayInit::Values(v.to_vec())
    }
}

fn case_input(t: &TensorArg, case: usize) -> String {
    format!("test{case}_{}", t.param)
}

fn case_expected(t: &TensorArg, case: usize) -> String {
    format!("expected_{}_test{case}", t.name)
}

fn case_actual(t: &TensorArg, case: usize) -> String {
    format!("c_{}_test{case}", t.name)
}

pub fn render_test_suite(signature: &MainSignature, cases: &[TestCase], options: &TestSuiteOptions) -> String {
    let f = &signature.function;
    let reset = options.independent_cases.then(|| signature.reset_states()).flatten();
    let mut out = String::new();

    out.push_str("#include <math.h>\n#include <stdio.h>\n#include <stdlib.h>\n#include <time.h>\n");
    let _ = writeln!(out, "#include \"{TENSOR_HEADER}\"");
    let _ = writeln!(out, "#include \"{f}.h\"\n");
    let _ = writeln!(out, "#define ATOL {}", render_float(options.atol));
    let _ = writeln!(out, "#define RTOL {}\n", render_float(options.rtol));

    out.push_str(
        "static int outputs_match(const k2c_tensor* actual, const k2c_tensor* expected) {\n\
         \x20   for (size_t i = 0; i < expected->numel; ++i) {\n\
         \x20       float a = actual->array[i];\n\
         \x20       float e = expected->array[i];\n\
         \x20       if (!(fabsf(a - e) <= ATOL + RTOL * fabsf(e))) {\n\
         \x20           return 0;\n\
         \x20       }\n\
         \x20   }\n\
         \x20   return 1;\n\
         }\n\n",
    );

    out.push_str("int main(void) {\n");
    for (i, case) in cases.iter().enumerate() {
        let n = i + 1;
        for (t, v) in signature.inputs.iter().zip(&case.inputs) {
            for decl in tensor_decls(&case_input(t, n), &t.shape, values(v)) {
                let _ = writeln!(out, "    {}", render_decl(&decl));
            }
        }
        for (t, v) in signature.outputs.iter().zip(&case.expected) {
            for decl in tensor_decls(&case_expected(t, n), &t.shape, values(v)) {
                let _ = writeln!(out, "    {}", render_decl(&decl));
            }
            for decl in tensor_decls(&case_actual(t, n), &t.shape, ArrayInit::Zeros) {
                let _ = writeln!(out, "    {}", render_decl(&decl));
            }
        }
    }
    out.push('\n');

    for group in &signature.weight_groups {
        let _ = writeln!(out, "    float* {group} = NULL;");
    }
    let init_args: Vec<String> = signature.weight_groups.iter().map(|g| format!("&{g}")).collect();
    let _ = writeln!(out, "    {}({});", signature.initialize(), init_args.join(","));
    out.push_str("    int failures = 0;\n    double elapsed = 0.0;\n    clock_t t0;\n\n");

    for n in 1..=cases.len() {
        let mut args: Vec<String> = Vec::new();
        args.extend(signature.inputs.iter().map(|t| format!("&{}", case_input(t, n))));
        args.extend(signature.outputs.iter().map(|t| format!("&{}", case_actual(t, n))));
        args.extend(signature.weight_groups.iter().cloned());

        if let Some(reset) = &reset {
            let _ = writeln!(out, "    {reset}();");
        }
        out.push_str("    t0 = clock();\n");
        let _ = writeln!(out, "    {f}({});", args.join(","));
        out.push_str("    elapsed += (double)(clock() - t0) / CLOCKS_PER_SEC;\n");

        let checks: Vec<String> = signature
            .outputs
            .iter()
            .map(|t| format!("outputs_match(&{}, &{})", case_actual(t, n), case_expected(t, n)))
            .collect();
        let _ = writeln!(
            out,
            "    if ({}) {{\n        printf(\"PASS test {n}\\n\");\n    }} else {{\n        printf(\"FAIL test {n}\\n\");\n        failures++;\n    }}\n",
            checks.join(" && ")
        );
    }

    let total = cases.len();
    if total > 0 {
        let _ = writeln!(
            out,
            "    printf(\"Average time over {total} tests: %e s\\n\", elapsed / {total});"
        );
    }
    let _ = writeln!(out, "    {}({});", signature.terminate(), signature.weight_groups.join(","));
    let _ = writeln!(
        out,
        "    if (failures > 0) {{\n        printf(\"%d of {total} tests failed\\n\", failures);\n        return 1;\n    }}"
    );
    out.push_str("    printf(\"All tests passed\\n\");\n    return 0;\n}\n");
    out
}

/// Evaluate the reference model and write `F_test_suite.c` into `out_dir`.
///
/// Nothing is written when reference evaluation fails.
pub fn make_test_suite(
    source: &dyn ModelSource,
    artifacts: &Artifacts,
    options: &TestSuiteOptions,
    out_dir: &Path,
) -> Result<PathBuf> {
    let cases = sample_cases(source, &artifacts.signature, options)?;
    let text = render_test_suite(&artifacts.signature, &cases, options);
    let path = out_dir.join(format!("{}_test_suite.c", artifacts.function_name));
    fs::write(&path, text).map_err(|e| CompileError::io(&path, e))?;
    log::info!("wrote {} test cases to {}", cases.len(), path.display());
    Ok(path)
}
