use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use model2c::codegen::payload::parse_payload;
use model2c::parse::{load_model, parse_model};
use model2c::{compile, convert, CompileError, CompileOptions, Identity, Model, ModelSource, Placement, TestSuiteOptions};

const CLAMP_MODEL: &str = r#"{
    "name": "clamp",
    "inputs": [{"name": "input_1", "shape": [3]}],
    "outputs": [{"name": "clamp/Relu6:0", "shape": [2]}],
    "layers": [
        {"name": "input_1", "class_name": "InputLayer",
         "outputs": [{"name": "input_1", "shape": [3]}]},
        {"name": "dense_1", "class_name": "Dense",
         "config": {"units": 2, "activation": "linear"},
         "inputs": [{"name": "input_1", "shape": [3]}],
         "outputs": [{"name": "dense_1/BiasAdd:0", "shape": [2]}],
         "weights": [
            {"name": "kernel", "shape": [3, 2], "values": [[1, 0], [0, 1], [1, 1]]},
            {"name": "bias", "shape": [2], "values": [0, 0]}
         ]},
        {"name": "clamp", "class_name": "ReLU",
         "config": {"max_value": 4.5},
         "inputs": [{"name": "dense_1/BiasAdd:0", "shape": [2]}],
         "outputs": [{"name": "clamp/Relu6:0", "shape": [2]}]}
    ]
}"#;

const STATEFUL_MODEL: &str = r#"{
    "name": "stateful",
    "inputs": [{"name": "x", "shape": [2, 1]}],
    "outputs": [{"name": "rnn", "shape": [1]}],
    "layers": [
        {"name": "rnn", "class_name": "SimpleRNN",
         "config": {"units": 1, "activation": "linear", "stateful": true},
         "inputs": [{"name": "x", "shape": [2, 1]}],
         "outputs": [{"name": "rnn", "shape": [1]}],
         "weights": [
            {"name": "kernel", "shape": [1, 1], "values": [[1]]},
            {"name": "recurrent_kernel", "shape": [1, 1], "values": [[1]]},
            {"name": "bias", "shape": [1], "values": [0]}
         ]}
    ]
}"#;

/// Removed with its contents on drop.
struct ScratchDir(PathBuf);

impl Deref for ScratchDir {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for ScratchDir {
    fn as_ref(&self) -> &Path {
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
        "model2c_it_{tag}_{}_{nanos}_{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(&dir).unwrap();
    ScratchDir(dir)
}

fn options(name: &str, placement: Placement) -> CompileOptions {
    CompileOptions {
        placement,
        formatter: Box::new(Identity),
        ..CompileOptions::new(name)
    }
}

fn read(dir: &Path, file: &str) -> String {
    fs::read_to_string(dir.join(file)).unwrap_or_else(|e| panic!("reading {file}: {e}"))
}

#[test]
fn clamp_model_external_weights() {
    let dir = scratch_dir("case1");
    let model_path = dir.join("clamp.json");
    fs::write(&model_path, CLAMP_MODEL).unwrap();
    let model = load_model(&model_path).unwrap();

    let out = dir.join("out");
    let artifacts = compile(&model, &options("F", Placement::External), &out).unwrap();

    assert_eq!(artifacts.function_name, "F");
    assert_eq!(artifacts.external_weights, vec!["dense_1_weights"]);
    assert!(!artifacts.stateful);
    assert_eq!(artifacts.files.len(), 4);

    let sig = &artifacts.signature;
    assert_eq!(sig.inputs[0].param, "input_1_input");
    assert_eq!(sig.outputs[0].param, "clamp_output");
    assert_eq!(sig.outputs[0].shape, vec![2]);

    let header = read(&out, "F.h");
    assert!(header.contains("void F(k2c_tensor* input_1_input, k2c_tensor* clamp_output, float* dense_1_weights);"));
    assert!(header.contains("void F_initialize(float** dense_1_weights);"));
    assert!(header.contains("void F_terminate(float* dense_1_weights);"));
    assert!(!header.contains("F_reset_states"));

    let source = read(&out, "F.c");
    assert!(source.contains("k2c_dense(&dense_1_output,input_1_input,&dense_1_kernel,&dense_1_bias,k2c_linear,dense_1_fwork);"));
    assert!(source.contains("k2c_ReLU(clamp_output->array,clamp_output->numel,4.50000000e0f,"));
    assert!(source.contains("*dense_1_weights = (float*) malloc(8*sizeof(float));"));
    assert!(source.contains("payload = k2c_read_array(\"Fdense_1_kernel.csv\",6);"));
    assert!(source.contains("memcpy(*dense_1_weights + 0,payload,6*sizeof(float));"));
    assert!(source.contains("payload = k2c_read_array(\"Fdense_1_bias.csv\",2);"));
    assert!(source.contains("memcpy(*dense_1_weights + 6,payload,2*sizeof(float));"));
    assert!(source.contains("free(dense_1_weights);"));

    let kernel = parse_payload(&read(&out, "Fdense_1_kernel.csv")).unwrap();
    assert_eq!(kernel, vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
    let bias = parse_payload(&read(&out, "Fdense_1_bias.csv")).unwrap();
    assert_eq!(bias, vec![0.0, 0.0]);

    // [1, 2, 3] -> [4, 5] before the clamp
    let mut reference = model.reference().unwrap();
    let outputs = reference.predict(&[vec![1.0, 2.0, 3.0]]).unwrap();
    assert_eq!(outputs, vec![vec![4.0, 4.5]]);
}

#[test]
fn clamp_model_inline_weights() {
    let dir = scratch_dir("case2");
    let model = parse_model(CLAMP_MODEL).unwrap();
    let artifacts = compile(&model, &options("net", Placement::Inline), &dir).unwrap();

    assert!(artifacts.external_weights.is_empty());
    assert_eq!(artifacts.files.len(), 2);
    let source = read(&dir, "net.c");
    assert!(source.contains("static float dense_1_kernel_array[6] = {"));
    assert!(source.contains("static float dense_1_bias_array[2] = {0};"));
    assert!(source.contains("void net_initialize(void) {"));
}

#[test]
fn rejected_model_writes_nothing() {
    let dir = scratch_dir("case3");
    let text = CLAMP_MODEL.replace(r#""class_name": "ReLU""#, r#""class_name": "Lambda""#);
    let model = parse_model(&text).unwrap();

    let err = compile(&model, &options("F", Placement::Inline), &dir).unwrap_err();
    match &err {
        CompileError::Unsupported { layer, kind, .. } => {
            assert_eq!(layer, "clamp");
            assert_eq!(kind, "Lambda");
        }
        other => panic!("expected Unsupported, got {other:?}"),
    }
    assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
}

#[test]
fn invalid_function_name_writes_nothing() {
    let dir = scratch_dir("case4");
    let model = parse_model(CLAMP_MODEL).unwrap();
    let err = compile(&model, &options("int", Placement::Inline), &dir).unwrap_err();
    assert!(matches!(err, CompileError::InvalidFunctionName { .. }), "{err:?}");
    assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
}

#[test]
fn stateful_model_gets_reset_function() {
    let dir = scratch_dir("case5");
    let model = parse_model(STATEFUL_MODEL).unwrap();
    let artifacts = compile(&model, &options("F", Placement::Inline), &dir).unwrap();
    assert!(artifacts.stateful);

    let header = read(&dir, "F.h");
    assert!(header.contains("void F_reset_states(void);"));
    let source = read(&dir, "F.c");
    assert!(source.contains("static struct {\n    float rnn_state[1];\n} F_states;"));
    assert!(source.contains("memset(&F_states,0,sizeof(F_states));"));
    assert!(source.contains("F_states.rnn_state"));
}

#[test]
fn stateful_reference_carries_until_reset() {
    let model = parse_model(STATEFUL_MODEL).unwrap();
    let mut reference = model.reference().unwrap();
    let x = vec![vec![1.0, 2.0]];

    // linear unit with unit weights: h = h0 + 1 + 2
    assert_eq!(reference.predict(&x).unwrap(), vec![vec![3.0]]);
    assert_eq!(reference.predict(&x).unwrap(), vec![vec![6.0]]);
    reference.reset_states();
    reference.reset_states();
    assert_eq!(reference.predict(&x).unwrap(), vec![vec![3.0]]);
}

#[test]
fn convert_writes_test_suite() {
    let dir = scratch_dir("case6");
    let model: Model = parse_model(CLAMP_MODEL).unwrap();
    let tests = TestSuiteOptions {
        num_tests: 5,
        seed: 42,
        ..TestSuiteOptions::default()
    };
    let artifacts = convert(&model, &options("F", Placement::External), &tests, &dir).unwrap();

    let suite = dir.join("F_test_suite.c");
    assert_eq!(artifacts.files.last(), Some(&suite));
    let text = read(&dir, "F_test_suite.c");
    assert_eq!(text.matches("    F(&test").count(), 5);
    assert!(text.contains("#include \"F.h\""));
    assert!(text.contains("float* dense_1_weights = NULL;"));
    assert!(text.contains("F_initialize(&dense_1_weights);"));
    assert!(text.contains("F_terminate(dense_1_weights);"));
    assert!(text.contains("return 1;"));
}

#[test]
fn convert_without_tests_skips_suite() {
    let dir = scratch_dir("case7");
    let model = parse_model(CLAMP_MODEL).unwrap();
    let tests = TestSuiteOptions {
        num_tests: 0,
        ..TestSuiteOptions::default()
    };
    convert(&model, &options("F", Placement::Inline), &tests, &dir).unwrap();
    assert!(!dir.join("F_test_suite.c").exists());
}
