//! Bytecode assembler.
//!
//! [`ScriptBuilder`] writes opcodes and operands in the encoding documented in
//! [`bytecode`](super::bytecode) and resolves forward references through labels. Operand order
//! is the caller's responsibility: emit exactly what the opcode's handler reads.

use anyhow::{Result, bail};

use crate::val::{ClassId, FunctionId, PropertyId};

use super::{NULL_INDEX, NameIndex, Opcode};

/// A code position that may be referenced before it is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Clone, Copy)]
enum Fixup {
    Absolute,
    /// Distance from `base` to the label, as context guards encode it.
    Relative { base: usize },
}

#[derive(Debug, Default)]
pub struct ScriptBuilder {
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label, Fixup)>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset the next byte will be written at.
    pub fn position(&self) -> usize {
        self.code.len()
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    pub fn bind(&mut self, label: Label) -> &mut Self {
        if let Some(slot) = self.labels.get_mut(label.0) {
            *slot = Some(self.code.len());
        }
        self
    }

    // ---- raw operands ----

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.code.push(op as u8);
        self
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.code.push(value);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i64(&mut self, value: i64) -> &mut Self {
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn f32(&mut self, value: f32) -> &mut Self {
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn f64(&mut self, value: f64) -> &mut Self {
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// NUL-terminated string payload.
    pub fn str(&mut self, value: &str) -> &mut Self {
        self.code.extend_from_slice(value.as_bytes());
        self.code.push(0);
        self
    }

    pub fn property(&mut self, id: PropertyId) -> &mut Self {
        self.u32(id.0)
    }

    /// A property operand that no longer resolves at runtime.
    pub fn missing_property(&mut self) -> &mut Self {
        self.u32(NULL_INDEX)
    }

    pub fn name(&mut self, name: NameIndex) -> &mut Self {
        self.u32(name.0)
    }

    pub fn function(&mut self, id: FunctionId) -> &mut Self {
        self.u32(id.0)
    }

    pub fn class(&mut self, id: Option<ClassId>) -> &mut Self {
        self.u32(id.map_or(NULL_INDEX, |c| c.0))
    }

    /// Absolute code offset of `label`.
    pub fn label(&mut self, label: Label) -> &mut Self {
        self.fixups.push((self.code.len(), label, Fixup::Absolute));
        self.u32(0)
    }

    /// The `skip` + `prop` guard that follows a context opcode's base expression. `end` must be
    /// bound right after the guarded expression.
    pub fn context_guard(&mut self, end: Label, rvalue: Option<PropertyId>) -> &mut Self {
        let at = self.code.len();
        self.fixups.push((at, end, Fixup::Relative { base: at + 8 }));
        self.u32(0);
        self.u32(rvalue.map_or(NULL_INDEX, |p| p.0))
    }

    // ---- expressions ----

    pub fn local(&mut self, id: PropertyId) -> &mut Self {
        self.op(Opcode::LocalVariable).property(id)
    }

    pub fn instance(&mut self, id: PropertyId) -> &mut Self {
        self.op(Opcode::InstanceVariable).property(id)
    }

    pub fn default_var(&mut self, id: PropertyId) -> &mut Self {
        self.op(Opcode::DefaultVariable).property(id)
    }

    pub fn local_out(&mut self, id: PropertyId) -> &mut Self {
        self.op(Opcode::LocalOutVariable).property(id)
    }

    pub fn sparse(&mut self, id: PropertyId) -> &mut Self {
        self.op(Opcode::ClassSparseDataVariable).property(id)
    }

    pub fn int(&mut self, value: i32) -> &mut Self {
        self.op(Opcode::IntConst).i32(value)
    }

    pub fn float(&mut self, value: f32) -> &mut Self {
        self.op(Opcode::FloatConst).f32(value)
    }

    pub fn double(&mut self, value: f64) -> &mut Self {
        self.op(Opcode::DoubleConst).f64(value)
    }

    pub fn string(&mut self, value: &str) -> &mut Self {
        self.op(Opcode::StringConst).str(value)
    }

    pub fn boolean(&mut self, value: bool) -> &mut Self {
        self.op(if value { Opcode::True } else { Opcode::False })
    }

    pub fn self_ref(&mut self) -> &mut Self {
        self.op(Opcode::SelfObject)
    }

    pub fn no_object(&mut self) -> &mut Self {
        self.op(Opcode::NoObject)
    }

    // ---- statements ----

    /// `Let` header; follow with the destination then the value expression.
    pub fn let_(&mut self, id: PropertyId) -> &mut Self {
        self.op(Opcode::Let).property(id)
    }

    pub fn jump(&mut self, target: Label) -> &mut Self {
        self.op(Opcode::Jump).label(target)
    }

    /// Follow with the condition expression.
    pub fn jump_if_not(&mut self, target: Label) -> &mut Self {
        self.op(Opcode::JumpIfNot).label(target)
    }

    pub fn push_flow(&mut self, resume: Label) -> &mut Self {
        self.op(Opcode::PushExecutionFlow).label(resume)
    }

    pub fn pop_flow(&mut self) -> &mut Self {
        self.op(Opcode::PopExecutionFlow)
    }

    pub fn pop_flow_if_not(&mut self) -> &mut Self {
        self.op(Opcode::PopExecutionFlowIfNot)
    }

    // ---- calls; follow with the arguments and `end_parms` ----

    pub fn call_final(&mut self, function: FunctionId) -> &mut Self {
        self.op(Opcode::FinalFunction).function(function)
    }

    pub fn call_local_final(&mut self, function: FunctionId) -> &mut Self {
        self.op(Opcode::LocalFinalFunction).function(function)
    }

    pub fn call_virtual(&mut self, name: NameIndex) -> &mut Self {
        self.op(Opcode::VirtualFunction).name(name)
    }

    pub fn call_local_virtual(&mut self, name: NameIndex) -> &mut Self {
        self.op(Opcode::LocalVirtualFunction).name(name)
    }

    pub fn call_math(&mut self, function: FunctionId) -> &mut Self {
        self.op(Opcode::CallMath).function(function)
    }

    pub fn end_parms(&mut self) -> &mut Self {
        self.op(Opcode::EndFunctionParms)
    }

    /// `Return`; follow with the returned expression.
    pub fn ret(&mut self) -> &mut Self {
        self.op(Opcode::Return)
    }

    pub fn ret_nothing(&mut self) -> &mut Self {
        self.op(Opcode::Return).op(Opcode::Nothing)
    }

    /// Resolves every label reference and returns the finished script.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        for (at, label, fixup) in std::mem::take(&mut self.fixups) {
            let Some(Some(target)) = self.labels.get(label.0).copied() else {
                bail!("label {} referenced at offset {at} was never bound", label.0);
            };
            let value = match fixup {
                Fixup::Absolute => target,
                Fixup::Relative { base } => match target.checked_sub(base) {
                    Some(distance) => distance,
                    None => bail!("context guard at offset {at} ends before its own guard"),
                },
            };
            let Ok(value) = u32::try_from(value) else {
                bail!("offset {value} does not fit a skip operand");
            };
            self.code[at..at + 4].copy_from_slice(&value.to_le_bytes());
        }
        Ok(self.code)
    }
}
