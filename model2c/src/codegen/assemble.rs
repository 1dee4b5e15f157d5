//! Function assembly: wraps the weight plan and lowered blocks into the main
//! function, its lifecycle companions and the public header.

use crate::ir::ModelSource;
use crate::names::ModelIo;

use super::plan::*;
use super::runtime::{RUNTIME_HEADER, TENSOR_HEADER};
use super::tensor_expr::TensorExprWriter;
use super::weights::WeightPlan;

/// One `k2c_tensor*` parameter of the main function.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorArg {
    /// Normalized tensor name.
    pub name: String,
    /// C parameter name (`<name>_input` / `<name>_output`).
    pub param: String,
    pub shape: Vec<usize>,
}

impl TensorArg {
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// What a caller of the generated code needs to know about its entry points.
#[derive(Debug, Clone, PartialEq)]
pub struct MainSignature {
    pub function: String,
    pub inputs: Vec<TensorArg>,
    pub outputs: Vec<TensorArg>,
    /// `float*` weight group parameters, in declaration order.
    pub weight_groups: Vec<String>,
    pub stateful: bool,
}

impl MainSignature {
    pub fn initialize(&self) -> String {
        format!("{}_initialize", self.function)
    }

    pub fn terminate(&self) -> String {
        format!("{}_terminate", self.function)
    }

    pub fn reset_states(&self) -> Option<String> {
        self.stateful.then(|| format!("{}_reset_states", self.function))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assembled {
    pub unit: TranslationUnit,
    pub header: Header,
    pub signature: MainSignature,
}

pub fn assemble(
    source: &dyn ModelSource,
    io: &ModelIo,
    writer: &TensorExprWriter,
    weights: &WeightPlan,
    blocks: Vec<LayerBlock>,
) -> Assembled {
    let function = writer.function.to_string();
    let signature = main_signature(source, io, writer, weights);

    let mut functions = vec![
        main_function(&signature, weights, blocks),
        initialize_function(&signature, writer, weights),
        terminate_function(&signature),
    ];
    if let Some(name) = signature.reset_states() {
        functions.push(Function {
            signature: Signature {
                name,
                params: Vec::new(),
            },
            body: vec![Item::Stmt(Stmt::Zero(writer.states_var()))],
        });
    }

    let state = weights.is_stateful().then(|| StateStruct {
        var: writer.states_var(),
        fields: weights.statics.iter().map(|s| (s.field.clone(), s.len)).collect(),
    });

    let unit = TranslationUnit {
        includes: vec![
            Include::System("math.h".into()),
            Include::System("stdlib.h".into()),
            Include::System("string.h".into()),
            Include::Local(RUNTIME_HEADER.into()),
            Include::Local(TENSOR_HEADER.into()),
            Include::Local(format!("{function}.h")),
        ],
        state,
        functions,
    };
    let header = Header {
        includes: vec![Include::Local(TENSOR_HEADER.into())],
        prototypes: unit.functions.iter().map(|f| f.signature.clone()).collect(),
    };

    log::debug!("assembled {} functions for {function}", unit.functions.len());
    Assembled { unit, header, signature }
}

fn main_signature(
    source: &dyn ModelSource,
    io: &ModelIo,
    writer: &TensorExprWriter,
    weights: &WeightPlan,
) -> MainSignature {
    let inputs = io
        .inputs
        .iter()
        .zip(source.inputs())
        .map(|(name, t)| TensorArg {
            name: name.clone(),
            param: writer.input_param(name),
            shape: t.shape.clone(),
        })
        .collect();
    let outputs = io
        .outputs
        .iter()
        .zip(source.outputs())
        .map(|(name, t)| TensorArg {
            name: name.clone(),
            param: writer.output_param(name),
            shape: t.shape.clone(),
        })
        .collect();
    MainSignature {
        function: writer.function.to_string(),
        inputs,
        outputs,
        weight_groups: weights.group_pointers(),
        stateful: weights.is_stateful(),
    }
}

fn main_function(sig: &MainSignature, weights: &WeightPlan, blocks: Vec<LayerBlock>) -> Function {
    let mut params: Vec<CParam> = sig
        .inputs
        .iter()
        .chain(&sig.outputs)
        .map(|t| CParam::new("k2c_tensor*", t.param.clone()))
        .collect();
    params.extend(sig.weight_groups.iter().map(|g| CParam::new("float*", g.clone())));

    let mut body: Vec<Item> = weights.stack.iter().cloned().map(Item::Decl).collect();
    if !weights.external.decls.is_empty() {
        body.push(Item::Blank);
        body.extend(weights.external.decls.iter().cloned().map(Item::Decl));
    }

    for block in blocks.into_iter().filter(|b| !b.items.is_empty()) {
        body.push(Item::Blank);
        body.push(Item::Stmt(Stmt::Comment(format!("{} ({})", block.layer, block.kind))));
        body.extend(block.items);
    }

    Function {
        signature: Signature {
            name: sig.function.clone(),
            params,
        },
        body,
    }
}

/// Allocates each weight group, then reads every payload with
/// `k2c_read_array` and copies it into its slice of the group.
fn initialize_function(sig: &MainSignature, writer: &TensorExprWriter, weights: &WeightPlan) -> Function {
    let scratch = writer.payload_scratch().to_string();
    let mut body = Vec::new();
    if !weights.external.groups.is_empty() {
        body.push(Item::Decl(Decl::FloatPointer { name: scratch.clone() }));
    }
    for group in &weights.external.groups {
        body.push(Item::Stmt(Stmt::Alloc {
            target: group.pointer.clone(),
            len: group.len,
        }));
        for payload in &group.payloads {
            let len = payload.values.len();
            body.push(Item::Stmt(Stmt::ReadArray {
                target: scratch.clone(),
                file: payload.file_name.clone(),
                len,
            }));
            body.push(Item::Stmt(Stmt::CopyInto {
                pointer: group.pointer.clone(),
                offset: payload.offset,
                src: scratch.clone(),
                len,
            }));
            body.push(Item::Stmt(Stmt::Free(scratch.clone())));
        }
    }
    Function {
        signature: Signature {
            name: sig.initialize(),
            params: sig.weight_groups.iter().map(|g| CParam::new("float**", g.clone())).collect(),
        },
        body,
    }
}

fn terminate_function(sig: &MainSignature) -> Function {
    Function {
        signature: Signature {
            name: sig.terminate(),
            params: sig.weight_groups.iter().map(|g| CParam::new("float*", g.clone())).collect(),
        },
        body: sig.weight_groups.iter().map(|g| Item::Stmt(Stmt::Free(g.clone()))).collect(),
    }
}
