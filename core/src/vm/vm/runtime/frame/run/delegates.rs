//! Single-cast binding and multicast delegate lists.

use tracing::warn;

use crate::val::{ObjectRef, PropertyKind, ScriptDelegate, Value};
use crate::vm::context::ExecutionContext;
use crate::vm::signal::VmResult;
use crate::vm::vm::{Frame, Place, Vm};

use super::helpers::{at_end_of_parms, set_result};

fn delegate_of(value: Value) -> Option<ScriptDelegate> {
    match value {
        Value::Delegate(delegate) => delegate,
        _ => None,
    }
}

impl Vm {
    /// Resolves the next l-value and returns its place when it is a multicast delegate.
    fn multicast_place(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame) -> VmResult<Option<Place>> {
        let place = self.eval_lvalue(ctx, frame)?;
        let is_multicast = frame
            .most_recent_property
            .take()
            .is_some_and(|p| matches!(p.kind, PropertyKind::MulticastDelegate));
        Ok(place.filter(|_| is_multicast))
    }

    fn with_invocation_list(&mut self, place: &Place, edit: impl FnOnce(&mut Vec<ScriptDelegate>)) {
        let Some(slot) = self.place_mut(place) else {
            return;
        };
        if !matches!(slot, Value::MulticastDelegate(_)) {
            *slot = Value::MulticastDelegate(Vec::new());
        }
        if let Value::MulticastDelegate(list) = slot {
            edit(list);
        }
    }

    pub(super) fn exec_bind_delegate(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame) -> VmResult<()> {
        let function = frame.read_name(&self.program)?;
        let place = self.eval_lvalue(ctx, frame)?;
        let target = self.eval(ctx, frame)?.as_object();
        if let Some(place) = place
            && let Some(slot) = self.place_mut(&place)
        {
            *slot = Value::Delegate(target.map(|object| ScriptDelegate { object, function }));
        }
        Ok(())
    }

    pub(super) fn exec_instance_delegate(
        &mut self,
        frame: &mut Frame,
        object: ObjectRef,
        result: Option<&mut Value>,
    ) -> VmResult<()> {
        let function = frame.read_name(&self.program)?;
        let delegate = (!function.is_none()).then_some(ScriptDelegate { object, function });
        set_result(result, Value::Delegate(delegate));
        Ok(())
    }

    pub(super) fn exec_add_multicast(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame) -> VmResult<()> {
        let place = self.multicast_place(ctx, frame)?;
        let delegate = delegate_of(self.eval(ctx, frame)?);
        if let (Some(place), Some(delegate)) = (place, delegate) {
            self.with_invocation_list(&place, |list| {
                if !list.contains(&delegate) {
                    list.push(delegate);
                }
            });
        }
        Ok(())
    }

    pub(super) fn exec_remove_multicast(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame) -> VmResult<()> {
        let place = self.multicast_place(ctx, frame)?;
        let delegate = delegate_of(self.eval(ctx, frame)?);
        if let (Some(place), Some(delegate)) = (place, delegate) {
            self.with_invocation_list(&place, |list| list.retain(|bound| *bound != delegate));
        }
        Ok(())
    }

    pub(super) fn exec_clear_multicast(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame) -> VmResult<()> {
        if let Some(place) = self.multicast_place(ctx, frame)? {
            self.with_invocation_list(&place, Vec::clear);
        }
        Ok(())
    }

    /// Marshals the arguments once against the signature, then runs every bound target with its
    /// own copy of the parameter block.
    pub(super) fn exec_call_multicast(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame) -> VmResult<()> {
        let signature = frame.read_function(&self.program)?;
        let place = self.multicast_place(ctx, frame)?;

        let mut parms: Vec<Value> = signature.params().iter().map(|p| p.initialize_value()).collect();
        let mut params = signature.params().iter().enumerate();
        while !at_end_of_parms(frame)? {
            let Some((idx, property)) = params.find(|(_, p)| !p.is_return_parm()) else {
                return Err(frame.malformed(&format!("too many arguments for {}", signature.name)));
            };
            let value = if property.is_out_parm() {
                match self.eval_lvalue(ctx, frame)? {
                    Some(place) => self.read_place(&place).cloned().unwrap_or_default(),
                    None => property.initialize_value(),
                }
            } else {
                self.eval(ctx, frame)?
            };
            property.copy_to_script_vm(&mut parms[idx], &value);
        }
        frame.advance(1);

        let targets = match place.as_ref().and_then(|place| self.read_place(place)) {
            Some(Value::MulticastDelegate(list)) => list.clone(),
            _ => return Ok(()),
        };
        for target in targets {
            if !self.objects.is_valid(target.object) {
                continue;
            }
            let Some(function) = self
                .objects
                .class_of(target.object)
                .and_then(|class| self.program.find_function(class, &target.function))
                .and_then(|id| self.program.function(id).cloned())
            else {
                warn!(
                    target: "bcvm::vm",
                    object = %target.object,
                    function = %target.function,
                    "multicast target function not found"
                );
                continue;
            };
            if function.parms_count != parms.len() {
                warn!(
                    target: "bcvm::vm",
                    function = %function.name,
                    signature = %signature.name,
                    "multicast target does not match the delegate signature"
                );
                continue;
            }
            let mut copy = parms.clone();
            self.process_event_inner(ctx, target.object, &function, &mut copy)?;
        }
        Ok(())
    }
}
