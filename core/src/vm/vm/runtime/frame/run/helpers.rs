use crate::val::{ObjectRef, Value};
use crate::vm::bytecode::Opcode;
use crate::vm::context::ExecutionContext;
use crate::vm::signal::{ScriptExceptionType, VmResult};
use crate::vm::vm::{Frame, Place, Vm};

#[inline]
pub(super) fn set_result(result: Option<&mut Value>, value: Value) {
    if let Some(result) = result {
        *result = value;
    }
}

/// True when the cursor sits on `marker`; running off the end of the script is malformed.
pub(super) fn at_opcode(frame: &Frame, marker: Opcode) -> VmResult<bool> {
    match frame.peek_u8() {
        Some(byte) => Ok(byte == marker as u8),
        None => Err(frame.malformed(&format!("missing {marker:?}"))),
    }
}

#[inline]
pub(super) fn at_end_of_parms(frame: &Frame) -> VmResult<bool> {
    at_opcode(frame, Opcode::EndFunctionParms)
}

impl Vm {
    /// Evaluates the next expression in the frame's own context.
    pub(super) fn eval(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame) -> VmResult<Value> {
        let this = frame.object;
        let mut value = Value::None;
        self.step(ctx, frame, this, Some(&mut value))?;
        Ok(value)
    }

    /// Evaluates the next expression for its address. The property it resolved stays in the
    /// frame's most-recent bookkeeping.
    pub(super) fn eval_lvalue(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame) -> VmResult<Option<Place>> {
        frame.most_recent_property = None;
        frame.most_recent_place = None;
        let this = frame.object;
        self.step(ctx, frame, this, None)?;
        Ok(frame.most_recent_place.take())
    }

    pub(super) fn access_violation(
        &self,
        ctx: &mut ExecutionContext,
        frame: &Frame,
        object: ObjectRef,
        description: impl Into<String>,
    ) -> VmResult<()> {
        self.throw_script_exception(ctx, object, frame, ScriptExceptionType::AccessViolation, description)
    }

    pub(super) fn non_fatal(
        &self,
        ctx: &mut ExecutionContext,
        frame: &Frame,
        object: ObjectRef,
        description: impl Into<String>,
    ) -> VmResult<()> {
        self.throw_script_exception(ctx, object, frame, ScriptExceptionType::NonFatalError, description)
    }

    /// Evaluates and drops every remaining argument, then consumes `EndFunctionParms`.
    pub(super) fn discard_parms(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame) -> VmResult<()> {
        while !at_end_of_parms(frame)? {
            self.eval(ctx, frame)?;
        }
        frame.advance(1);
        Ok(())
    }

    /// Moves past a context guard whose base was unusable and clears the result through the
    /// guard's r-value property.
    pub(super) fn skip_guarded(&self, frame: &mut Frame, result: Option<&mut Value>) -> VmResult<()> {
        let skip = frame.read_skip()?;
        let rvalue = frame.read_property(&self.program)?;
        frame.advance(skip);
        frame.most_recent_property = None;
        frame.most_recent_place = None;
        if let (Some(result), Some(rvalue)) = (result, rvalue) {
            rvalue.clear_value(result);
        }
        Ok(())
    }
}
