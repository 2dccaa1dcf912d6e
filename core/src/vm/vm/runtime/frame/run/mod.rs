//! The interpreter loop and opcode dispatch.
//!
//! [`Vm::step`] is the one re-entrant primitive: it decodes a single opcode at the frame's
//! cursor and runs its handler, which in turn steps nested operand expressions. Handlers deposit
//! computed values into the optional `result` slot; `None` asks for address-only evaluation,
//! reported through the frame's most-recent place.

mod casts;
mod debug;
mod delegates;
mod flow;
mod helpers;
mod invoke;
mod literals;
mod opcode;
mod transact;

use std::sync::Arc;

use crate::val::{ObjectRef, Value};
use crate::vm::bytecode::Opcode;
use crate::vm::context::ExecutionContext;
use crate::vm::signal::{ScriptExceptionType, VmResult};
use crate::vm::vm::{Frame, FrameInfo, Vm};

impl Vm {
    /// Decodes and executes one opcode with `object` as its context.
    pub fn step(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        object: ObjectRef,
        result: Option<&mut Value>,
    ) -> VmResult<()> {
        let offset = frame.pc;
        let byte = frame.read_u8()?;
        let Some(op) = Opcode::from_byte(byte) else {
            return self.exec_undefined(ctx, frame, object, byte, offset);
        };

        match op {
            Opcode::LocalVariable
            | Opcode::InstanceVariable
            | Opcode::DefaultVariable
            | Opcode::LocalOutVariable
            | Opcode::ClassSparseDataVariable => self.exec_variable(ctx, frame, object, result, op),
            Opcode::Nothing => Ok(()),
            Opcode::NothingInt32 => frame.read_i32().map(drop),
            Opcode::Let
            | Opcode::LetBool
            | Opcode::LetObj
            | Opcode::LetDelegate
            | Opcode::LetMulticastDelegate => self.exec_let(ctx, frame, object, op),
            Opcode::LetValueOnPersistentFrame => self.exec_let_on_persistent_frame(ctx, frame),

            Opcode::SelfObject => self.exec_self(ctx, frame, object, result),
            Opcode::Context => self.exec_context(ctx, frame, object, result, false),
            Opcode::ContextFailSilent => self.exec_context(ctx, frame, object, result, true),
            Opcode::ClassContext => self.exec_class_context(ctx, frame, object, result),
            Opcode::InterfaceContext => self.exec_interface_context(ctx, frame, object, result),
            Opcode::StructMemberContext => self.exec_struct_member_context(ctx, frame, object, result),
            Opcode::ArrayGetByRef => self.exec_array_get_by_ref(ctx, frame, object, result),

            Opcode::VirtualFunction => self.exec_virtual_function(ctx, frame, object, result, false, offset),
            Opcode::LocalVirtualFunction => self.exec_virtual_function(ctx, frame, object, result, true, offset),
            Opcode::FinalFunction => self.exec_final_function(ctx, frame, object, result, false),
            Opcode::LocalFinalFunction => self.exec_final_function(ctx, frame, object, result, true),
            Opcode::CallMath => self.exec_call_math(ctx, frame, result),
            Opcode::EndFunctionParms => {
                // Left in place for the caller's `finish`.
                frame.pc -= 1;
                Ok(())
            }

            Opcode::CallMulticastDelegate => self.exec_call_multicast(ctx, frame),
            Opcode::AddMulticastDelegate => self.exec_add_multicast(ctx, frame),
            Opcode::RemoveMulticastDelegate => self.exec_remove_multicast(ctx, frame),
            Opcode::ClearMulticastDelegate => self.exec_clear_multicast(ctx, frame),
            Opcode::BindDelegate => self.exec_bind_delegate(ctx, frame),
            Opcode::InstanceDelegate => self.exec_instance_delegate(frame, object, result),

            Opcode::IntConst
            | Opcode::Int64Const
            | Opcode::UInt64Const
            | Opcode::FloatConst
            | Opcode::DoubleConst
            | Opcode::StringConst
            | Opcode::NameConst
            | Opcode::ByteConst
            | Opcode::IntConstByte
            | Opcode::IntZero
            | Opcode::IntOne
            | Opcode::True
            | Opcode::False
            | Opcode::NoObject
            | Opcode::NoInterface
            | Opcode::ClassConst
            | Opcode::SkipOffsetConst
            | Opcode::VectorConst
            | Opcode::RotationConst
            | Opcode::TransformConst => self.exec_literal(frame, result, op),
            Opcode::StructConst => self.exec_struct_const(ctx, frame, result),
            Opcode::ArrayConst | Opcode::SetConst => self.exec_sequence_const(ctx, frame, result, op),
            Opcode::MapConst => self.exec_map_const(ctx, frame, result),
            Opcode::SetArray | Opcode::SetSet | Opcode::SetMap => self.exec_container_set(ctx, frame, op),
            Opcode::EndStructConst
            | Opcode::EndArrayConst
            | Opcode::EndSetConst
            | Opcode::EndMapConst
            | Opcode::EndArray
            | Opcode::EndSet
            | Opcode::EndMap => {
                frame.pc = offset;
                Err(frame.malformed(&format!("unmatched {op:?}")))
            }

            Opcode::DynamicCast
            | Opcode::MetaCast
            | Opcode::ObjToInterfaceCast
            | Opcode::CrossInterfaceCast
            | Opcode::InterfaceToObjCast => self.exec_class_cast(ctx, frame, result, op),
            Opcode::Cast => self.exec_primitive_cast(ctx, frame, result),

            Opcode::Jump => self.exec_jump(ctx, frame),
            Opcode::JumpIfNot => self.exec_jump_if_not(ctx, frame),
            Opcode::ComputedJump => self.exec_computed_jump(ctx, frame),
            Opcode::PushExecutionFlow => self.exec_push_flow(frame),
            Opcode::PopExecutionFlow => self.exec_pop_flow(ctx, frame),
            Opcode::PopExecutionFlowIfNot => self.exec_pop_flow_if_not(ctx, frame),
            Opcode::SwitchValue => self.exec_switch_value(ctx, frame, object, result),
            Opcode::Assert => self.exec_assert(ctx, frame, object),

            Opcode::Breakpoint | Opcode::Tracepoint | Opcode::WireTracepoint => {
                self.exec_debug_site(ctx, frame, object, op)
            }
            Opcode::InstrumentationEvent => self.exec_instrumentation(ctx, frame, object, offset),

            Opcode::AutoRtfmTransact => self.exec_transact(ctx, frame),
            Opcode::AutoRtfmStopTransact => self.exec_stop_transact(frame),
            Opcode::AutoRtfmAbortIfNot => self.exec_abort_if_not(ctx, frame),

            Opcode::Return | Opcode::EndOfScript => {
                frame.pc = offset;
                Err(frame.malformed(&format!("{op:?} reached as an expression")))
            }
        }
    }

    /// Script entry honoring the callspace policy. Returns whether the body ran locally.
    pub(in crate::vm::vm) fn process_internal(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        result: Option<&mut Value>,
    ) -> VmResult<bool> {
        let node = Arc::clone(&frame.node);
        let callspace = ctx.callspace(frame.object, &node);
        if callspace.is_remote() {
            let parms = self.parm_values(&node, frame.locals);
            ctx.call_remote(frame.object, &node, &parms);
        }
        if callspace.is_local() {
            self.process_local_script_function(ctx, frame, result)?;
            return Ok(true);
        }
        node.clear_return_value(result);
        Ok(false)
    }

    /// Runs a bound script body under the recursion guard.
    pub(in crate::vm::vm) fn process_local_script_function(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        mut result: Option<&mut Value>,
    ) -> VmResult<()> {
        let node = Arc::clone(&frame.node);
        if ctx.ran_away() {
            node.clear_return_value(result);
            return Ok(());
        }
        if !ctx.enter_recursion() {
            node.clear_return_value(result.as_deref_mut());
            ctx.latch_ran_away();
            let limit = ctx.limits().recursion_limit();
            return self.throw_script_exception(
                ctx,
                frame.object,
                frame,
                ScriptExceptionType::InfiniteLoop,
                format!("Infinite script recursion ({limit} calls) detected"),
            );
        }

        self.call_stack.push(FrameInfo {
            function: node.name.clone(),
            object: frame.object,
            depth: self.call_stack.len(),
        });
        let outcome = self.run_script_body(ctx, frame, result);
        self.call_stack.pop();
        ctx.leave_recursion();
        outcome
    }

    fn run_script_body(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        mut result: Option<&mut Value>,
    ) -> VmResult<()> {
        let node = Arc::clone(&frame.node);
        let this = frame.object;
        loop {
            if ctx.runaway_exceeded() {
                node.clear_return_value(result.as_deref_mut());
                let message = ctx.trip_runaway();
                return self.throw_script_exception(ctx, this, frame, ScriptExceptionType::InfiniteLoop, message);
            }
            if ctx.ran_away() {
                node.clear_return_value(result);
                return Ok(());
            }
            match frame.peek_u8() {
                Some(byte) if byte == Opcode::Return as u8 => break,
                Some(_) => self.step(ctx, frame, this, None)?,
                None => return Err(frame.malformed("script ended without Return")),
            }
        }

        frame.advance(1);
        if frame.peek_u8() == Some(Opcode::Nothing as u8) {
            frame.advance(1);
            return Ok(());
        }
        self.step(ctx, frame, this, result)
    }
}
