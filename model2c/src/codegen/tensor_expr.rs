use super::plan::TensorHandle;
use crate::names::{sanitize, ModelIo};

/**
 * Naming scheme for every C identifier the generator emits.
 */
pub struct TensorExprWriter<'a> {
    pub function: &'a str,
    io: &'a ModelIo,
}

impl<'a> TensorExprWriter<'a> {
    pub fn new(function: &'a str, io: &'a ModelIo) -> Self {
        Self { function, io }
    }

    /// Handle for reading or writing a tensor in a runtime call.
    ///
    /// - Model input → `{name}_input` (a `k2c_tensor*` parameter)
    /// - Model output → `{name}_output` (a `k2c_tensor*` parameter)
    /// - Intermediate → `&{name}_output` (local view)
    pub fn tensor(&self, name: &str) -> TensorHandle {
        if self.io.is_model_input(name) {
            TensorHandle::param(self.input_param(name))
        } else if self.io.is_model_output(name) {
            TensorHandle::param(self.output_param(name))
        } else {
            TensorHandle::local(format!("{name}_output"))
        }
    }

    pub fn input_param(&self, name: &str) -> String {
        format!("{name}_input")
    }

    pub fn output_param(&self, name: &str) -> String {
        format!("{name}_output")
    }

    /// Backing array of a local view: `{ident}_array`.
    pub fn array(&self, ident: &str) -> String {
        format!("{ident}_array")
    }

    /// Layer-scoped identifier: `{layer}_{what}`.
    pub fn local(&self, layer: &str, what: &str) -> String {
        format!("{}_{what}", sanitize(layer))
    }

    /// View over a learned parameter: `{layer}_{param}`.
    pub fn param(&self, layer: &str, param: &str) -> TensorHandle {
        TensorHandle::local(self.local(layer, param))
    }

    pub fn fwork(&self, layer: &str) -> String {
        self.local(layer, "fwork")
    }

    pub fn padded(&self, layer: &str) -> TensorHandle {
        TensorHandle::local(self.local(layer, "padded_input"))
    }

    /// Weight group pointer parameter: `{layer}_weights`.
    pub fn group(&self, layer: &str) -> String {
        self.local(layer, "weights")
    }

    pub fn states_var(&self) -> String {
        format!("{}_states", self.function)
    }

    /// Recurrent state array: a field of the persistent struct, or a local.
    pub fn state(&self, layer: &str, persistent: bool) -> String {
        let field = self.local(layer, "state");
        if persistent {
            format!("{}.{field}", self.states_var())
        } else {
            field
        }
    }

    /// Payload file of one parameter view: `{F}{ident}.csv`.
    pub fn payload_file(&self, ident: &str) -> String {
        format!("{}{ident}.csv", self.function)
    }

    /// Scratch pointer `F_initialize` reads each payload into.
    pub fn payload_scratch(&self) -> &'static str {
        "payload"
    }
}
