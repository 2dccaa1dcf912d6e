//! Variable access, assignment and context opcodes.

use std::sync::Arc;

use crate::val::{ObjectRef, PropertyKind, PropertyOwner, Value};
use crate::vm::bytecode::{CONTEXT_GUARD_LEN, Opcode};
use crate::vm::context::ExecutionContext;
use crate::vm::signal::VmResult;
use crate::vm::vm::{Frame, Place, PlaceRoot, Vm};

use super::helpers::set_result;

const MISSING_LOCAL: &str = "Attempted to access missing local variable. If this is a packaged/cooked build, are you attempting to use an editor-only property?";
const MISSING_PROPERTY: &str = "Attempted to access missing property. If this is a packaged/cooked build, are you attempting to use an editor-only property?";

impl Vm {
    pub(super) fn exec_variable(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        object: ObjectRef,
        result: Option<&mut Value>,
        op: Opcode,
    ) -> VmResult<()> {
        let Some(property) = frame.read_property(&self.program)? else {
            frame.most_recent_property = None;
            frame.most_recent_place = None;
            let description = match op {
                Opcode::LocalVariable | Opcode::LocalOutVariable => MISSING_LOCAL,
                _ => MISSING_PROPERTY,
            };
            return self.access_violation(ctx, frame, object, description);
        };

        let place = match op {
            Opcode::LocalVariable => Some(Place::new(frame.locals, property.offset)),
            Opcode::InstanceVariable => Some(Place::new(PlaceRoot::Object(object), property.offset)),
            Opcode::DefaultVariable => self
                .objects
                .class_of(object)
                .and_then(|class| self.objects.default_object(class))
                .map(|cdo| Place::new(PlaceRoot::Object(cdo), property.offset)),
            Opcode::ClassSparseDataVariable => match property.owner {
                PropertyOwner::SparseData(class) => Some(Place::new(PlaceRoot::SparseData(class), property.offset)),
                _ => return Err(frame.malformed(&format!("{} is not sparse class data", property.name))),
            },
            _ => Some(
                frame
                    .out_parms
                    .iter()
                    .find(|rec| rec.property.id == property.id)
                    .map(|rec| rec.place.clone())
                    .unwrap_or_else(|| Place::new(frame.locals, property.offset)),
            ),
        };

        let Some(place) = place else {
            frame.most_recent_property = None;
            frame.most_recent_place = None;
            if let Some(result) = result {
                property.clear_value(result);
            }
            return Ok(());
        };
        if let Some(result) = result {
            match self.read_place(&place) {
                Some(value) => property.copy_to_script_vm(result, value),
                None => property.clear_value(result),
            }
        }
        frame.most_recent_property = Some(property);
        frame.most_recent_place = Some(place);
        Ok(())
    }

    /// `Let` and its typed variants: resolve the destination, then evaluate the value into it.
    pub(super) fn exec_let(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        object: ObjectRef,
        op: Opcode,
    ) -> VmResult<()> {
        let declared = if op == Opcode::Let {
            frame.read_property(&self.program)?
        } else {
            None
        };
        let place = self.eval_lvalue(ctx, frame)?;
        let property = declared.or_else(|| frame.most_recent_property.take());

        let Some(place) = place else {
            self.access_violation(ctx, frame, object, "Attempted to assign to None")?;
            self.eval(ctx, frame)?;
            return Ok(());
        };
        let mut value = property.as_ref().map_or(Value::None, |p| p.initialize_value());
        let this = frame.object;
        self.step(ctx, frame, this, Some(&mut value))?;
        match property {
            Some(property) => {
                self.write_place(&place, &property, value);
            }
            None => {
                if let Some(slot) = self.place_mut(&place) {
                    *slot = value;
                }
            }
        }
        Ok(())
    }

    pub(super) fn exec_let_on_persistent_frame(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
    ) -> VmResult<()> {
        let Some(property) = frame.read_property(&self.program)? else {
            return Err(frame.malformed("persistent frame assignment without a property"));
        };
        let PropertyOwner::Function(owner) = property.owner else {
            return Err(frame.malformed(&format!("{} is not a function local", property.name)));
        };
        let Some(function) = self.program.function(owner).cloned() else {
            return Err(frame.malformed(&format!("unknown function index {}", owner.0)));
        };
        let value = self.eval(ctx, frame)?;
        match self
            .persistent
            .ensure(frame.object, owner, &function.properties)
            .get_mut(property.offset)
        {
            Some(slot) => property.set_value(slot, value),
            None => return Err(frame.malformed(&format!("{} is outside its frame", property.name))),
        }
        Ok(())
    }

    pub(super) fn exec_self(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        object: ObjectRef,
        result: Option<&mut Value>,
    ) -> VmResult<()> {
        match result {
            Some(result) => {
                *result = Value::Object(Some(object));
                Ok(())
            }
            None => self.access_violation(
                ctx,
                frame,
                object,
                "Attempted to reference 'self' as an addressable property.",
            ),
        }
    }

    /// `Context` / `ContextFailSilent`: evaluate the base object, then run the guarded
    /// expression against it, or skip the guard when the base is unusable.
    pub(super) fn exec_context(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        object: ObjectRef,
        mut result: Option<&mut Value>,
        fail_silent: bool,
    ) -> VmResult<()> {
        frame.most_recent_property = None;
        let mut base = Value::None;
        self.step(ctx, frame, object, Some(&mut base))?;
        let guard = frame.pc;

        let target = base.as_object();
        let valid = target.filter(|t| self.objects.is_valid(*t));
        if let Some(context) = valid {
            frame.advance(CONTEXT_GUARD_LEN);
            self.step(ctx, frame, context, result.as_deref_mut())?;
            if !frame.array_context_failed {
                return Ok(());
            }
            frame.array_context_failed = false;
            frame.jump_to(guard);
        }

        if !fail_silent {
            let description = match (target, valid, &frame.most_recent_property) {
                (Some(stale), None, property) => format!(
                    "Attempted to access {stale} via property {}, but {stale} is not valid (pending kill or garbage)",
                    property.as_ref().map_or("None", |p| p.name.as_str())
                ),
                (_, _, Some(property)) => format!("Accessed None trying to read property {}", property.name),
                _ => "Accessed None".to_string(),
            };
            self.access_violation(ctx, frame, object, description)?;
        }
        self.skip_guarded(frame, result)
    }

    pub(super) fn exec_class_context(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        object: ObjectRef,
        result: Option<&mut Value>,
    ) -> VmResult<()> {
        frame.most_recent_property = None;
        let mut base = Value::None;
        self.step(ctx, frame, object, Some(&mut base))?;
        if let Some(cdo) = base.as_class().and_then(|class| self.objects.default_object(class)) {
            frame.advance(CONTEXT_GUARD_LEN);
            return self.step(ctx, frame, cdo, result);
        }
        let description = match &frame.most_recent_property {
            Some(property) => format!("Accessed None trying to read Class from property {}", property.name),
            None => "Accessed None reading a Class".to_string(),
        };
        self.access_violation(ctx, frame, object, description)?;
        self.skip_guarded(frame, result)
    }

    pub(super) fn exec_interface_context(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        object: ObjectRef,
        result: Option<&mut Value>,
    ) -> VmResult<()> {
        let mut interface = Value::None;
        self.step(ctx, frame, object, Some(&mut interface))?;
        set_result(result, Value::Object(interface.as_object()));
        Ok(())
    }

    pub(super) fn exec_struct_member_context(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        object: ObjectRef,
        result: Option<&mut Value>,
    ) -> VmResult<()> {
        let Some(member) = frame.read_property(&self.program)? else {
            return Err(frame.malformed("struct member context without a member"));
        };
        let Some(base) = self.eval_lvalue(ctx, frame)? else {
            frame.most_recent_property = None;
            return self.access_violation(
                ctx,
                frame,
                object,
                format!("Accessed None reading structure {}", member.name),
            );
        };
        let place = base.child(member.offset);
        if let Some(result) = result {
            match self.read_place(&place) {
                Some(value) => member.copy_to_script_vm(result, value),
                None => member.clear_value(result),
            }
        }
        frame.most_recent_property = Some(member);
        frame.most_recent_place = Some(place);
        Ok(())
    }

    pub(super) fn exec_array_get_by_ref(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        object: ObjectRef,
        result: Option<&mut Value>,
    ) -> VmResult<()> {
        let array = self.eval_lvalue(ctx, frame)?;
        if array.is_none() {
            self.access_violation(ctx, frame, object, "Attempt to assign variable through None")?;
        }
        let array_property = frame.most_recent_property.take();
        let index = self.eval(ctx, frame)?.as_int();

        let (Some(array), Some(array_property)) = (array, array_property) else {
            frame.array_context_failed = true;
            return Ok(());
        };
        let PropertyKind::Array(inner) = &array_property.kind else {
            frame.array_context_failed = true;
            return Ok(());
        };
        let inner = Arc::clone(inner);

        let len = self.read_place(&array).and_then(Value::container_len).unwrap_or(0);
        if index >= 0 && (index as usize) < len {
            let place = array.child(index as usize);
            if let Some(result) = result {
                match self.read_place(&place) {
                    Some(value) => inner.copy_to_script_vm(result, value),
                    None => inner.clear_value(result),
                }
            }
            frame.most_recent_property = Some(inner);
            frame.most_recent_place = Some(place);
            return Ok(());
        }

        frame.most_recent_property = None;
        frame.most_recent_place = None;
        if let Some(result) = result {
            inner.clear_value(result);
        }
        self.access_violation(
            ctx,
            frame,
            object,
            format!(
                "Attempted to access index {index} from array {} of length {len}!",
                array_property.name
            ),
        )
    }
}
