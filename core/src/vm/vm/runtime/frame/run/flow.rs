//! Branches, the execution-flow stack, switch and assert.

use tracing::{error, warn};

use crate::val::{ObjectRef, Value};
use crate::vm::context::ExecutionContext;
use crate::vm::signal::VmResult;
use crate::vm::vm::{Frame, Vm};

fn jump_checked(frame: &mut Frame, target: usize) -> VmResult<()> {
    if target > frame.node.script.len() {
        return Err(frame.malformed(&format!("jump target {target} is outside the script")));
    }
    frame.jump_to(target);
    Ok(())
}

impl Vm {
    pub(super) fn exec_jump(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame) -> VmResult<()> {
        let target = frame.read_skip()?;
        ctx.add_runaway();
        jump_checked(frame, target)
    }

    pub(super) fn exec_jump_if_not(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame) -> VmResult<()> {
        let target = frame.read_skip()?;
        let condition = self.eval(ctx, frame)?.as_bool();
        ctx.add_runaway();
        if !condition {
            jump_checked(frame, target)?;
        }
        Ok(())
    }

    pub(super) fn exec_computed_jump(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame) -> VmResult<()> {
        let target = self.eval(ctx, frame)?.as_int();
        ctx.add_runaway();
        if target < 0 {
            return Err(frame.malformed(&format!("computed jump to negative offset {target}")));
        }
        jump_checked(frame, target as usize)
    }

    pub(super) fn exec_push_flow(&mut self, frame: &mut Frame) -> VmResult<()> {
        let target = frame.read_skip()?;
        frame.flow_stack.push(target);
        Ok(())
    }

    pub(super) fn exec_pop_flow(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame) -> VmResult<()> {
        ctx.add_runaway();
        self.pop_flow(frame)
    }

    pub(super) fn exec_pop_flow_if_not(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame) -> VmResult<()> {
        let condition = self.eval(ctx, frame)?.as_bool();
        ctx.add_runaway();
        if !condition {
            self.pop_flow(frame)?;
        }
        Ok(())
    }

    fn pop_flow(&self, frame: &mut Frame) -> VmResult<()> {
        match frame.flow_stack.pop() {
            Some(target) => jump_checked(frame, target),
            None => {
                error!(
                    target: "bcvm::vm",
                    function = %frame.node.name,
                    offset = frame.pc,
                    "Tried to pop from an empty flow stack"
                );
                Ok(())
            }
        }
    }

    pub(super) fn exec_switch_value(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        object: ObjectRef,
        mut result: Option<&mut Value>,
    ) -> VmResult<()> {
        let cases = frame.read_u16()?;
        let end = frame.read_skip()?;

        frame.most_recent_property = None;
        frame.most_recent_place = None;
        let index = self.eval(ctx, frame)?;
        let index_property = frame.most_recent_property.take();
        frame.most_recent_place = None;

        for _ in 0..cases {
            let case = self.eval(ctx, frame)?;
            let next = frame.read_skip()?;
            let matched = match &index_property {
                Some(property) => property.identical(&index, &case),
                None => index == case,
            };
            if matched {
                self.step(ctx, frame, object, result.as_deref_mut())?;
                return jump_checked(frame, end);
            }
            jump_checked(frame, next)?;
        }

        let name = index_property.as_ref().map_or("None", |p| p.name.as_str());
        self.non_fatal(
            ctx,
            frame,
            object,
            format!("Switch statement failed to match case for index property {name}"),
        )?;
        self.step(ctx, frame, object, result)
    }

    pub(super) fn exec_assert(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame, object: ObjectRef) -> VmResult<()> {
        let line = frame.read_u16()?;
        let debug = frame.read_u8()? != 0;
        if self.eval(ctx, frame)?.as_bool() {
            return Ok(());
        }
        if debug || ctx.is_debugging() {
            self.non_fatal(ctx, frame, object, format!("Assertion failed, line {line}"))
        } else {
            warn!(target: "bcvm::script", function = %frame.node.name, line, "assertion failed");
            Ok(())
        }
    }
}
