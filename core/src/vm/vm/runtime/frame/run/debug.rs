//! Debugger and instrumentation opcodes, plus the undefined-opcode trap.

use tracing::error;

use crate::val::ObjectRef;
use crate::vm::bytecode::Opcode;
use crate::vm::context::ExecutionContext;
use crate::vm::signal::{InstrumentationKind, InstrumentationSignal, ScriptExceptionType, VmResult};
use crate::vm::vm::{Frame, Vm};

impl Vm {
    pub(super) fn exec_undefined(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        object: ObjectRef,
        byte: u8,
        offset: usize,
    ) -> VmResult<()> {
        let description = format!("Encountered an undefined opcode ({byte:#04x}) at byte offset {offset}");
        error!(target: "bcvm::vm", function = %frame.node.name, "{description}");
        self.throw_script_exception(ctx, object, frame, ScriptExceptionType::FatalError, description)
    }

    /// `Breakpoint`, `Tracepoint` and `WireTracepoint`.
    pub(super) fn exec_debug_site(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        object: ObjectRef,
        op: Opcode,
    ) -> VmResult<()> {
        if !ctx.is_debugging() {
            return Ok(());
        }
        let kind = match op {
            Opcode::Breakpoint => ScriptExceptionType::Breakpoint,
            Opcode::WireTracepoint => ScriptExceptionType::WireTracepoint,
            _ => ScriptExceptionType::Tracepoint,
        };
        self.throw_script_exception(ctx, object, frame, kind, format!("{op:?}"))
    }

    pub(super) fn exec_instrumentation(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        object: ObjectRef,
        offset: usize,
    ) -> VmResult<()> {
        let byte = frame.read_u8()?;
        let Some(kind) = InstrumentationKind::from_byte(byte) else {
            return Err(frame.malformed(&format!("unknown instrumentation kind {byte}")));
        };
        let event = match kind {
            InstrumentationKind::InlineEvent => Some(frame.read_name(&self.program)?),
            _ => None,
        };
        if ctx.is_debugging() {
            ctx.instrument(InstrumentationSignal {
                kind,
                object,
                function: frame.node.name.clone(),
                code_offset: offset,
                event,
            });
        }
        Ok(())
    }
}
