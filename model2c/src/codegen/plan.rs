//! C code IR
//!
//! Three core concepts:
//! 1. **Decl**: storage: float arrays, size arrays and `k2c_tensor` views
//! 2. **Stmt**: runtime calls, copies, weight loading and state resets
//! 3. **Function / TranslationUnit**: assembled entry points and files
//!
//! Produced by the weight, lowering and assembly passes; consumed only by
//! `render`.

use super::runtime::RuntimeFn;
use crate::ir::Activation;

// ─── (1) Declarations ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayInit {
    /// Rendered as `{0}`.
    Zeros,
    Values(Vec<f32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Automatic (stack) storage, one copy per call.
    Auto,
    /// Function-scope `static`, program lifetime.
    Static,
}

/// Where a tensor view's `array` pointer points.
#[derive(Debug, Clone, PartialEq)]
pub enum DataRef {
    /// `&name[0]`
    Array(String),
    /// `&pointer[offset]`, a slice of an externally loaded weight group
    Offset { pointer: String, offset: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    FloatArray {
        name: String,
        len: usize,
        init: ArrayInit,
        storage: Storage,
    },
    SizeArray {
        name: String,
        values: Vec<usize>,
    },
    /// `float* name;`
    FloatPointer { name: String },
    /// `k2c_tensor name = {data, ndim, numel, {shape}};`
    Tensor {
        name: String,
        data: DataRef,
        shape: Vec<usize>,
    },
}

impl Decl {
    pub fn name(&self) -> &str {
        match self {
            Decl::FloatArray { name, .. }
            | Decl::SizeArray { name, .. }
            | Decl::FloatPointer { name }
            | Decl::Tensor { name, .. } => name,
        }
    }
}

// ─── (2) Statements ─────────────────────────────────────────────

/// A `k2c_tensor` in expression position.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorHandle {
    pub name: String,
    /// The identifier already has type `k2c_tensor*` (function parameters).
    pub pointer: bool,
}

impl TensorHandle {
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pointer: false,
        }
    }

    pub fn param(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pointer: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// `k2c_tensor*`: `&t` or `t`
    Tensor(TensorHandle),
    /// `float*` data of a tensor: `t.array` or `t->array`
    TensorData(TensorHandle),
    /// Element count of a tensor: `t.numel` or `t->numel`
    TensorNumel(TensorHandle),
    /// Identifier or member expression used verbatim
    Ident(String),
    Size(usize),
    Float(f32),
    Flag(bool),
    ActivationFn(Activation),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Comment(String),
    Call {
        func: RuntimeFn,
        args: Vec<Arg>,
    },
    /// `memcpy(dst.array, src.array, numel * sizeof(float));`
    Copy {
        dst: TensorHandle,
        src: TensorHandle,
        numel: usize,
    },
    /// `*target = (float*) malloc(len * sizeof(float));`
    Alloc { target: String, len: usize },
    /// `target = k2c_read_array("file", len);`
    ReadArray { target: String, file: String, len: usize },
    /// `memcpy(*pointer + offset, src, len * sizeof(float));`
    CopyInto {
        pointer: String,
        offset: usize,
        src: String,
        len: usize,
    },
    /// `free(pointer);`
    Free(String),
    /// `memset(&var, 0, sizeof(var));`
    Zero(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Decl(Decl),
    Stmt(Stmt),
    Blank,
}

/// Statements contributed by one layer, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerBlock {
    pub layer: String,
    pub kind: String,
    pub items: Vec<Item>,
}

// ─── (3) Functions and files ────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CParam {
    pub ty: &'static str,
    pub name: String,
}

impl CParam {
    pub fn new(ty: &'static str, name: impl Into<String>) -> Self {
        Self { ty, name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub name: String,
    pub params: Vec<CParam>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub signature: Signature,
    pub body: Vec<Item>,
}

/// File-scope persistent state: `static struct { float f[n]; ... } var;`
#[derive(Debug, Clone, PartialEq)]
pub struct StateStruct {
    pub var: String,
    pub fields: Vec<(String, usize)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Include {
    System(String),
    Local(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslationUnit {
    pub includes: Vec<Include>,
    pub state: Option<StateStruct>,
    pub functions: Vec<Function>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub includes: Vec<Include>,
    pub prototypes: Vec<Signature>,
}
