use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use tracing::{debug, trace};

use crate::val::{FunctionId, ObjectRef, Value};
use crate::vm::bytecode::Function;
use crate::vm::context::ExecutionContext;
use crate::vm::signal::{AbortReason, VmResult};
use crate::vm::vm::Vm;
use crate::vm::vm::frame::{Frame, OutParmRec, Place, PlaceRoot};

/// How a host entry through [`Vm::process_event`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Completed,
    /// The callspace policy forwarded the call and did not run it locally.
    RemoteOnly,
    /// The receiver was destroyed or pending kill; nothing ran.
    Rejected,
    Aborted(AbortReason),
}

impl CallOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CallOutcome::Completed)
    }
}

impl Vm {
    /// Invokes `function` on `object` with a parameter block laid out in declaration order.
    ///
    /// On return every out parameter slot holds the callee's final value and the return slot (if
    /// any) holds the result; by-value slots are left as passed. Guard state is not reset here;
    /// hosts call [`ExecutionContext::reset_runaway`] before a top-level entry.
    pub fn process_event(
        &mut self,
        ctx: &mut ExecutionContext,
        object: ObjectRef,
        function: FunctionId,
        parms: &mut [Value],
    ) -> Result<CallOutcome> {
        let function = self
            .program
            .function(function)
            .cloned()
            .ok_or_else(|| anyhow!("process_event: unknown function {}", function.0))?;
        if parms.len() != function.parms_count {
            bail!(
                "process_event: {} takes {} parameter(s), got {}",
                function.name,
                function.parms_count,
                parms.len()
            );
        }
        if !self.objects.is_valid(object) {
            debug!(target: "bcvm::vm", %object, function = %function.name, "process_event on invalid object");
            return Ok(CallOutcome::Rejected);
        }

        if !function.is_native() && function.script.is_empty() {
            if let (Some(idx), Some(property)) = (function.return_index, function.return_property())
                && let Some(slot) = parms.get_mut(idx)
            {
                *slot = property.initialize_value();
            }
            return Ok(CallOutcome::Completed);
        }

        trace!(target: "bcvm::vm", %object, function = %function.name, "process_event");
        ctx.enter_script();
        let outcome = self.process_event_inner(ctx, object, &function, parms);
        ctx.leave_script();
        Ok(match outcome {
            Ok(outcome) => outcome,
            Err(aborted) => {
                debug!(target: "bcvm::vm", function = %function.name, "{aborted}");
                CallOutcome::Aborted(aborted.reason)
            }
        })
    }

    pub(in crate::vm::vm) fn process_event_inner(
        &mut self,
        ctx: &mut ExecutionContext,
        object: ObjectRef,
        function: &Arc<Function>,
        parms: &mut [Value],
    ) -> VmResult<CallOutcome> {
        let mark = self.stack.mark();
        let outcome = self.run_event(ctx, object, function, parms);
        self.stack.release(mark);
        outcome
    }

    fn run_event(
        &mut self,
        ctx: &mut ExecutionContext,
        object: ObjectRef,
        function: &Arc<Function>,
        parms: &mut [Value],
    ) -> VmResult<CallOutcome> {
        if function.is_native() {
            let callspace = ctx.callspace(object, function);
            if callspace.is_remote() {
                ctx.call_remote(object, function, parms);
            }
            if !callspace.is_local() {
                return Ok(CallOutcome::RemoteOnly);
            }
        }

        let locals = self.allocate_locals(object, function);
        for (idx, value) in parms.iter().enumerate() {
            if let Some(slot) = self.place_mut(&Place::new(locals, idx)) {
                *slot = value.clone();
            }
        }

        let mut frame = Frame::new(Arc::clone(function), object, locals);
        if function.has_out_parms() {
            frame.out_parms = function
                .params()
                .iter()
                .enumerate()
                .filter(|(_, p)| p.is_out_parm() && !p.is_return_parm())
                .map(|(idx, p)| OutParmRec {
                    property: Arc::clone(p),
                    place: Place::new(locals, idx),
                })
                .collect();
        }

        let mut ret = function.return_property().map(|p| p.initialize_value());
        let ran_locally = match function.native {
            Some(native) => {
                native(self, ctx, &mut frame, object, ret.as_mut())?;
                true
            }
            None => self.process_internal(ctx, &mut frame, ret.as_mut())?,
        };

        for (idx, slot) in parms.iter_mut().enumerate() {
            if function.return_index == Some(idx) {
                if let Some(value) = ret.take() {
                    *slot = value;
                }
            } else if function.properties.get(idx).is_some_and(|p| p.is_out_parm())
                && let Some(value) = self.read_place(&Place::new(locals, idx))
            {
                *slot = value.clone();
            }
        }
        self.teardown_locals(function, locals);

        Ok(if ran_locally {
            CallOutcome::Completed
        } else {
            CallOutcome::RemoteOnly
        })
    }

    /// Fresh locals on the virtual stack, or the persistent frame of (object, function).
    pub(in crate::vm::vm) fn allocate_locals(&mut self, object: ObjectRef, function: &Function) -> PlaceRoot {
        if function.is_ubergraph() {
            self.persistent.ensure(object, function.id, &function.properties);
            PlaceRoot::Persistent(object, function.id)
        } else {
            PlaceRoot::Block(self.stack.push_block(&function.properties))
        }
    }

    /// Destroys owned values left in a fresh locals block. Persistent frames keep theirs.
    pub(in crate::vm::vm) fn teardown_locals(&mut self, function: &Function, locals: PlaceRoot) {
        if !matches!(locals, PlaceRoot::Block(_)) {
            return;
        }
        for (idx, property) in function.properties.iter().enumerate() {
            if property.needs_destroy()
                && !property.is_out_parm()
                && let Some(slot) = self.place_mut(&Place::new(locals, idx))
            {
                property.destroy_value(slot);
            }
        }
    }

    /// Snapshot of the bound parameters, handed to remote dispatch.
    pub(in crate::vm::vm) fn parm_values(&self, function: &Function, locals: PlaceRoot) -> Vec<Value> {
        (0..function.parms_count)
            .map(|idx| self.read_place(&Place::new(locals, idx)).cloned().unwrap_or_default())
            .collect()
    }
}
