//! Object, class and interface casts plus the `Cast` sub-table.

use crate::val::{ClassId, ObjectRef, Value};
use crate::vm::bytecode::{CastToken, Opcode};
use crate::vm::context::ExecutionContext;
use crate::vm::signal::VmResult;
use crate::vm::vm::{Frame, Vm};

use super::helpers::set_result;

impl Vm {
    /// Live object whose class derives from or implements `target`.
    fn conforming(&self, object: Option<ObjectRef>, target: Option<ClassId>) -> Option<ObjectRef> {
        let object = object.filter(|o| self.objects.is_valid(*o))?;
        let target = target?;
        let class = self.objects.class_of(object)?;
        (self.program.is_child_of(class, target) || self.program.implements(class, target)).then_some(object)
    }

    fn target_is_interface(&self, target: Option<ClassId>) -> bool {
        target
            .and_then(|id| self.program.class(id))
            .is_some_and(|class| class.is_interface)
    }

    pub(super) fn exec_class_cast(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        result: Option<&mut Value>,
        op: Opcode,
    ) -> VmResult<()> {
        let target = frame.read_class(&self.program)?;
        let source = self.eval(ctx, frame)?;
        let value = match op {
            Opcode::DynamicCast => {
                let cast = self.conforming(source.as_object(), target);
                if self.target_is_interface(target) {
                    Value::Interface(cast)
                } else {
                    Value::Object(cast)
                }
            }
            Opcode::MetaCast => Value::Class(
                source
                    .as_class()
                    .zip(target)
                    .filter(|(class, target)| self.program.is_child_of(*class, *target))
                    .map(|(class, _)| class),
            ),
            Opcode::ObjToInterfaceCast | Opcode::CrossInterfaceCast => {
                Value::Interface(self.conforming(source.as_object(), target))
            }
            Opcode::InterfaceToObjCast => Value::Object(self.conforming(source.as_object(), target)),
            _ => return Err(frame.malformed(&format!("{op:?} is not a cast"))),
        };
        set_result(result, value);
        Ok(())
    }

    /// `Cast`: one sub-opcode byte selects the conversion.
    pub(super) fn exec_primitive_cast(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        result: Option<&mut Value>,
    ) -> VmResult<()> {
        let byte = frame.read_u8()?;
        let Some(token) = CastToken::from_byte(byte) else {
            return Err(frame.malformed(&format!("unknown cast token {byte:#04x}")));
        };
        let value = match token {
            CastToken::ObjectToInterface => {
                let target = frame.read_class(&self.program)?;
                let source = self.eval(ctx, frame)?;
                Value::Interface(self.conforming(source.as_object(), target))
            }
            CastToken::ObjectToBool | CastToken::InterfaceToBool => {
                let source = self.eval(ctx, frame)?;
                Value::Bool(source.as_object().is_some_and(|o| self.objects.is_valid(o)))
            }
            CastToken::DoubleToFloat => Value::Float(self.eval(ctx, frame)?.as_f64() as f32),
            CastToken::FloatToDouble => Value::Double(self.eval(ctx, frame)?.as_f64()),
        };
        set_result(result, value);
        Ok(())
    }
}
