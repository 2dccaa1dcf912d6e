//! Constant loaders, composite literals and container setters.

use crate::val::{Property, PropertyKind, Transform, Value};
use crate::vm::bytecode::Opcode;
use crate::vm::context::ExecutionContext;
use crate::vm::signal::VmResult;
use crate::vm::vm::{Frame, Vm};

use super::helpers::{at_opcode, set_result};

fn read_triple(frame: &mut Frame) -> VmResult<[f64; 3]> {
    Ok([frame.read_f64()?, frame.read_f64()?, frame.read_f64()?])
}

fn insert_unique(property: &Property, items: &mut Vec<Value>, value: Value) {
    if !items.iter().any(|existing| property.identical(existing, &value)) {
        items.push(value);
    }
}

fn insert_pair(key_property: &Property, pairs: &mut Vec<(Value, Value)>, key: Value, value: Value) {
    match pairs.iter_mut().find(|(existing, _)| key_property.identical(existing, &key)) {
        Some(pair) => pair.1 = value,
        None => pairs.push((key, value)),
    }
}

impl Vm {
    pub(super) fn exec_literal(&mut self, frame: &mut Frame, result: Option<&mut Value>, op: Opcode) -> VmResult<()> {
        let value = match op {
            Opcode::IntConst => Value::Int(frame.read_i32()?),
            Opcode::Int64Const => Value::Int64(frame.read_i64()?),
            Opcode::UInt64Const => Value::UInt64(frame.read_u64()?),
            Opcode::FloatConst => Value::Float(frame.read_f32()?),
            Opcode::DoubleConst => Value::Double(frame.read_f64()?),
            Opcode::StringConst => Value::str(&frame.read_cstr()?),
            Opcode::NameConst => Value::Name(frame.read_name(&self.program)?),
            Opcode::ByteConst => Value::Byte(frame.read_u8()?),
            Opcode::IntConstByte => Value::Int(frame.read_u8()? as i32),
            Opcode::IntZero => Value::Int(0),
            Opcode::IntOne => Value::Int(1),
            Opcode::True => Value::Bool(true),
            Opcode::False => Value::Bool(false),
            Opcode::NoObject => Value::Object(None),
            Opcode::NoInterface => Value::Interface(None),
            Opcode::ClassConst => Value::Class(frame.read_class(&self.program)?),
            Opcode::SkipOffsetConst => Value::Int(frame.read_skip()? as i32),
            Opcode::VectorConst => Value::Vector(read_triple(frame)?),
            Opcode::RotationConst => Value::Rotator(read_triple(frame)?),
            Opcode::TransformConst => {
                let rotation = [frame.read_f64()?, frame.read_f64()?, frame.read_f64()?, frame.read_f64()?];
                let translation = read_triple(frame)?;
                let scale = read_triple(frame)?;
                Value::Transform(Box::new(Transform {
                    rotation,
                    translation,
                    scale,
                }))
            }
            _ => return Err(frame.malformed(&format!("{op:?} is not a constant"))),
        };
        set_result(result, value);
        Ok(())
    }

    /// Evaluates the next expression and normalizes it to `property`'s storage.
    fn eval_element(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame, property: &Property) -> VmResult<Value> {
        let raw = self.eval(ctx, frame)?;
        let mut value = property.initialize_value();
        property.copy_to_script_vm(&mut value, &raw);
        Ok(value)
    }

    fn read_element_property(&self, frame: &mut Frame) -> VmResult<std::sync::Arc<Property>> {
        match frame.read_property(&self.program)? {
            Some(property) => Ok(property),
            None => Err(frame.malformed("composite literal without an element property")),
        }
    }

    pub(super) fn exec_struct_const(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        result: Option<&mut Value>,
    ) -> VmResult<()> {
        let property = self.read_element_property(frame)?;
        let PropertyKind::Struct(def) = &property.kind else {
            return Err(frame.malformed(&format!("{} is not a struct", property.name)));
        };
        let _declared = frame.read_i32()?;
        let mut fields = Vec::with_capacity(def.fields.len());
        while !at_opcode(frame, Opcode::EndStructConst)? {
            let Some(field) = def.fields.get(fields.len()) else {
                return Err(frame.malformed(&format!("too many members for struct {}", def.name)));
            };
            fields.push(self.eval_element(ctx, frame, field)?);
        }
        frame.advance(1);
        for field in def.fields.iter().skip(fields.len()) {
            fields.push(field.initialize_value());
        }
        set_result(result, Value::Struct(fields));
        Ok(())
    }

    /// `ArrayConst` and `SetConst`.
    pub(super) fn exec_sequence_const(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        result: Option<&mut Value>,
        op: Opcode,
    ) -> VmResult<()> {
        let inner = self.read_element_property(frame)?;
        let declared = (frame.read_i32()?.max(0) as usize).min(frame.remaining());
        let (end, is_set) = match op {
            Opcode::SetConst => (Opcode::EndSetConst, true),
            _ => (Opcode::EndArrayConst, false),
        };
        let mut items = Vec::with_capacity(declared);
        while !at_opcode(frame, end)? {
            let value = self.eval_element(ctx, frame, &inner)?;
            if is_set {
                insert_unique(&inner, &mut items, value);
            } else {
                items.push(value);
            }
        }
        frame.advance(1);
        set_result(result, if is_set { Value::Set(items) } else { Value::Array(items) });
        Ok(())
    }

    pub(super) fn exec_map_const(
        &mut self,
        ctx: &mut ExecutionContext,
        frame: &mut Frame,
        result: Option<&mut Value>,
    ) -> VmResult<()> {
        let key_property = self.read_element_property(frame)?;
        let value_property = self.read_element_property(frame)?;
        let declared = (frame.read_i32()?.max(0) as usize).min(frame.remaining() / 2);
        let mut pairs = Vec::with_capacity(declared);
        while !at_opcode(frame, Opcode::EndMapConst)? {
            let key = self.eval_element(ctx, frame, &key_property)?;
            let value = self.eval_element(ctx, frame, &value_property)?;
            insert_pair(&key_property, &mut pairs, key, value);
        }
        frame.advance(1);
        set_result(result, Value::Map(pairs));
        Ok(())
    }

    /// `SetArray`, `SetSet` and `SetMap`: rebuild a container variable from an element list.
    pub(super) fn exec_container_set(&mut self, ctx: &mut ExecutionContext, frame: &mut Frame, op: Opcode) -> VmResult<()> {
        let place = self.eval_lvalue(ctx, frame)?;
        let container = frame.most_recent_property.take();
        if op != Opcode::SetArray {
            frame.read_i32()?;
        }
        let end = match op {
            Opcode::SetSet => Opcode::EndSet,
            Opcode::SetMap => Opcode::EndMap,
            _ => Opcode::EndArray,
        };

        let Some(container) = container else {
            while !at_opcode(frame, end)? {
                self.eval(ctx, frame)?;
            }
            frame.advance(1);
            return Ok(());
        };

        let value = match &container.kind {
            PropertyKind::Array(inner) => {
                let mut items = Vec::new();
                while !at_opcode(frame, end)? {
                    items.push(self.eval_element(ctx, frame, inner)?);
                }
                Value::Array(items)
            }
            PropertyKind::Set(inner) => {
                let mut items = Vec::new();
                while !at_opcode(frame, end)? {
                    let value = self.eval_element(ctx, frame, inner)?;
                    insert_unique(inner, &mut items, value);
                }
                Value::Set(items)
            }
            PropertyKind::Map(key_property, value_property) => {
                let mut pairs = Vec::new();
                while !at_opcode(frame, end)? {
                    let key = self.eval_element(ctx, frame, key_property)?;
                    let value = self.eval_element(ctx, frame, value_property)?;
                    insert_pair(key_property, &mut pairs, key, value);
                }
                Value::Map(pairs)
            }
            _ => return Err(frame.malformed(&format!("{:?} target {} is not a container", op, container.name))),
        };
        frame.advance(1);
        if let Some(place) = place {
            self.write_place(&place, &container, value);
        }
        Ok(())
    }
}
