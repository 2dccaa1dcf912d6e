//! Call opcodes and the call protocol: callspace routing, argument binding, out-parameter
//! records and the native/script split.

use std::sync::Arc;

use crate::val::{ObjectRef, Value};
use crate::vm::bytecode::Function;
use crate::vm::context::ExecutionContext;
use crate::vm::signal::VmResult;
use crate::vm::vm::{Frame, OutParmRec, Place, Vm};

use super::helpers::at_end_of_parms;

/// Which entry a script body goes through once its arguments are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ScriptEntry {
    /// Consults the callspace policy first.
    Internal,
    Local,
}

impl Vm {
    pub(super) fn exec_final_function(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        object: ObjectRef,
        result: Option<&mut Value>,
        local: bool,
    ) -> VmResult<()> {
        let function = frame.read_function(&self.program)?;
        if local {
            self.process_local_function(ctx, frame, object, &function, result)
        } else {
            self.call_function(ctx, frame, object, &function, result)
        }
    }

    /// Virtual call resolved against the dynamic class of `object`, cached per call site.
    pub(super) fn exec_virtual_function(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        object: ObjectRef,
        result: Option<&mut Value>,
        local: bool,
        site: usize,
    ) -> VmResult<()> {
        let name = frame.read_name(&self.program)?;
        let resolved = match self.objects.class_of(object) {
            Some(class) => {
                let key = (frame.node.id, site);
                match self.call_sites.lookup(key, class) {
                    Some(function) => Some(function),
                    None => {
                        let found = self.program.find_function(class, &name);
                        if let Some(function) = found {
                            self.call_sites.store(key, class, function);
                        }
                        found
                    }
                }
            }
            None => None,
        };

        let Some(function) = resolved.and_then(|id| self.program.function(id).cloned()) else {
            self.non_fatal(ctx, frame, object, format!("Failed to find function {name} in {object}"))?;
            return self.discard_parms(ctx, frame);
        };
        if local {
            self.process_local_function(ctx, frame, object, &function, result)
        } else {
            self.call_function(ctx, frame, object, &function, result)
        }
    }

    /// Pure library call: runs on the owner's class default object and skips callspace routing.
    pub(super) fn exec_call_math(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        result: Option<&mut Value>,
    ) -> VmResult<()> {
        let function = frame.read_function(&self.program)?;
        let Some(cdo) = self.objects.default_object(function.owner) else {
            return Err(frame.malformed(&format!("{} has no owner class", function.name)));
        };
        match function.native {
            Some(native) => native(self, ctx, frame, cdo, result),
            None => self.process_local_function(ctx, frame, cdo, &function, result),
        }
    }

    /// Call from bytecode with the caller's cursor on the first argument expression.
    pub(super) fn call_function(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        object: ObjectRef,
        function: &Arc<Function>,
        result: Option<&mut Value>,
    ) -> VmResult<()> {
        let Some(native) = function.native else {
            return self.process_script_function(ctx, frame, object, function, result, ScriptEntry::Internal);
        };

        let callspace = ctx.callspace(object, function);
        if callspace.is_remote() {
            let saved = frame.pc;
            let mut parms: Vec<Value> = function.params().iter().map(|p| p.initialize_value()).collect();
            for (idx, property) in function.params().iter().enumerate() {
                if !property.is_return_parm() {
                    parms[idx] = self.eval(ctx, frame)?;
                }
            }
            ctx.call_remote(object, function, &parms);
            if callspace.is_local() {
                frame.jump_to(saved);
            }
        }

        if callspace.is_local() {
            native(self, ctx, frame, object, result)
        } else {
            self.skip_function(ctx, frame, function, result)
        }
    }

    /// Evaluates the remaining arguments for their side effects and clears the result.
    fn skip_function(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        function: &Function,
        result: Option<&mut Value>,
    ) -> VmResult<()> {
        let mut params = function.params().iter().filter(|p| !p.is_return_parm());
        while !at_end_of_parms(frame)? {
            match params.next() {
                Some(property) if property.is_out_parm() => {
                    self.eval_lvalue(ctx, frame)?;
                }
                _ => {
                    self.eval(ctx, frame)?;
                }
            }
        }
        frame.advance(1);
        function.clear_return_value(result);
        Ok(())
    }

    /// Local-only call: no callspace check for either natives or script bodies.
    pub(super) fn process_local_function(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        object: ObjectRef,
        function: &Arc<Function>,
        result: Option<&mut Value>,
    ) -> VmResult<()> {
        match function.native {
            Some(native) => native(self, ctx, frame, object, result),
            None => self.process_script_function(ctx, frame, object, function, result, ScriptEntry::Local),
        }
    }

    fn process_script_function(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        object: ObjectRef,
        function: &Arc<Function>,
        result: Option<&mut Value>,
        entry: ScriptEntry,
    ) -> VmResult<()> {
        let mark = self.stack.mark();
        let outcome = self.bind_and_run(ctx, frame, object, function, result, entry);
        self.stack.release(mark);
        outcome
    }

    fn bind_and_run(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        object: ObjectRef,
        function: &Arc<Function>,
        result: Option<&mut Value>,
        entry: ScriptEntry,
    ) -> VmResult<()> {
        let locals = self.allocate_locals(object, function);
        let mut callee = Frame::new(Arc::clone(function), object, locals);

        let mut params = function.params().iter();
        while !at_end_of_parms(frame)? {
            let Some(property) = params.find(|p| !p.is_return_parm()) else {
                return Err(frame.malformed(&format!("too many arguments for {}", function.name)));
            };
            if property.is_out_parm() {
                let place = self
                    .eval_lvalue(ctx, frame)?
                    .unwrap_or_else(|| Place::new(locals, property.offset));
                callee.out_parms.push(OutParmRec {
                    property: Arc::clone(property),
                    place,
                });
            } else {
                let value = self.eval(ctx, frame)?;
                if let Some(slot) = self.place_mut(&Place::new(locals, property.offset)) {
                    property.copy_to_script_vm(slot, &value);
                }
            }
        }
        frame.advance(1);

        if function.script.is_empty() {
            function.clear_return_value(result);
        } else {
            match entry {
                ScriptEntry::Internal => {
                    self.process_internal(ctx, &mut callee, result)?;
                }
                ScriptEntry::Local => self.process_local_script_function(ctx, &mut callee, result)?,
            }
        }
        self.teardown_locals(function, locals);
        Ok(())
    }
}
