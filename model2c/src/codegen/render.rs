//! Renders the C IR into source text.
//!
//! This is the only codegen file that knows C syntax.

use std::fmt::Write;

use super::plan::*;
use super::runtime::{activation_fn, RuntimeFn};
use crate::shapes::MAX_NDIM;

const INDENT: &str = "    ";
const VALUES_PER_LINE: usize = 6;

pub fn render_source(unit: &TranslationUnit) -> String {
    let mut out = String::new();
    render_includes(&mut out, &unit.includes);
    out.push('\n');

    if let Some(state) = &unit.state {
        out.push_str("static struct {\n");
        for (field, len) in &state.fields {
            let _ = writeln!(out, "{INDENT}float {field}[{len}];");
        }
        let _ = writeln!(out, "}} {};\n", state.var);
    }

    for function in &unit.functions {
        let _ = writeln!(out, "{} {{", render_signature(&function.signature));
        for item in &function.body {
            render_item(&mut out, item);
        }
        out.push_str("}\n\n");
    }
    out
}

pub fn render_header(header: &Header) -> String {
    let mut out = String::from("#pragma once\n");
    render_includes(&mut out, &header.includes);
    out.push('\n');
    for proto in &header.prototypes {
        let _ = writeln!(out, "{};", render_signature(proto));
    }
    out
}

fn render_includes(out: &mut String, includes: &[Include]) {
    for include in includes {
        let _ = match include {
            Include::System(h) => writeln!(out, "#include <{h}>"),
            Include::Local(h) => writeln!(out, "#include \"{h}\""),
        };
    }
}

pub fn render_signature(sig: &Signature) -> String {
    let params = if sig.params.is_empty() {
        "void".to_string()
    } else {
        sig.params
            .iter()
            .map(|p| format!("{} {}", p.ty, p.name))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("void {}({params})", sig.name)
}

fn render_item(out: &mut String, item: &Item) {
    match item {
        Item::Blank => out.push('\n'),
        Item::Decl(decl) => {
            let _ = writeln!(out, "{INDENT}{}", render_decl(decl));
        }
        Item::Stmt(stmt) => {
            let _ = writeln!(out, "{INDENT}{}", render_stmt(stmt));
        }
    }
}

/// A C `float` literal. Infinities map to `HUGE_VALF` from `math.h`.
pub fn render_float(x: f32) -> String {
    if x.is_nan() {
        "NAN".to_string()
    } else if x == f32::INFINITY {
        "HUGE_VALF".to_string()
    } else if x == f32::NEG_INFINITY {
        "-HUGE_VALF".to_string()
    } else {
        format!("{x:.8e}f")
    }
}

pub fn render_float_list(values: &[f32]) -> String {
    values
        .chunks(VALUES_PER_LINE)
        .map(|chunk| chunk.iter().map(|v| render_float(*v)).collect::<Vec<_>>().join(","))
        .collect::<Vec<_>>()
        .join(",\n")
}

fn join_sizes(values: &[usize]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(",")
}

pub fn render_decl(decl: &Decl) -> String {
    match decl {
        Decl::FloatArray {
            name,
            len,
            init,
            storage,
        } => {
            let prefix = match storage {
                Storage::Auto => "",
                Storage::Static => "static ",
            };
            let init = match init {
                ArrayInit::Zeros => "{0}".to_string(),
                ArrayInit::Values(values) => format!("{{\n{}}}", render_float_list(values)),
            };
            format!("{prefix}float {name}[{len}] = {init};")
        }
        Decl::SizeArray { name, values } => {
            format!("size_t {name}[{}] = {{{}}};", values.len(), join_sizes(values))
        }
        Decl::FloatPointer { name } => format!("float* {name};"),
        Decl::Tensor { name, data, shape } => {
            let data = match data {
                DataRef::Array(array) => format!("&{array}[0]"),
                DataRef::Offset { pointer, offset } => format!("&{pointer}[{offset}]"),
            };
            let numel: usize = shape.iter().product();
            let mut padded = shape.clone();
            padded.resize(MAX_NDIM.max(shape.len()), 1);
            format!(
                "k2c_tensor {name} = {{{data},{},{numel},{{{}}}}};",
                shape.len(),
                join_sizes(&padded)
            )
        }
    }
}

fn tensor_ptr(h: &TensorHandle) -> String {
    if h.pointer {
        h.name.clone()
    } else {
        format!("&{}", h.name)
    }
}

fn tensor_member(h: &TensorHandle, member: &str) -> String {
    if h.pointer {
        format!("{}->{member}", h.name)
    } else {
        format!("{}.{member}", h.name)
    }
}

fn c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

pub fn render_arg(arg: &Arg) -> String {
    match arg {
        Arg::Tensor(h) => tensor_ptr(h),
        Arg::TensorData(h) => tensor_member(h, "array"),
        Arg::TensorNumel(h) => tensor_member(h, "numel"),
        Arg::Ident(s) => s.clone(),
        Arg::Size(n) => n.to_string(),
        Arg::Float(x) => render_float(*x),
        Arg::Flag(b) => u8::from(*b).to_string(),
        Arg::ActivationFn(act) => activation_fn(act).to_string(),
    }
}

pub fn render_stmt(stmt: &Stmt) -> String {
    match stmt {
        Stmt::Comment(text) => format!("// {text}"),
        Stmt::Call { func, args } => {
            let args: Vec<String> = args.iter().map(render_arg).collect();
            format!("{}({});", func.c_name(), args.join(","))
        }
        Stmt::Copy { dst, src, numel } => format!(
            "memcpy({},{},{numel}*sizeof(float));",
            tensor_member(dst, "array"),
            tensor_member(src, "array")
        ),
        Stmt::Alloc { target, len } => format!("*{target} = (float*) malloc({len}*sizeof(float));"),
        Stmt::ReadArray { target, file, len } => {
            format!("{target} = {}({},{len});", RuntimeFn::ReadArray.c_name(), c_string(file))
        }
        Stmt::CopyInto {
            pointer,
            offset,
            src,
            len,
        } => format!("memcpy(*{pointer} + {offset},{src},{len}*sizeof(float));"),
        Stmt::Free(pointer) => format!("free({pointer});"),
        Stmt::Zero(var) => format!("memset(&{var},0,sizeof({var}));"),
    }
}
