use super::*;

use crate::val::{Property, Transform};
use crate::vm::AbortReason;

/// Runs `body` as the script of `Bag.Run` and returns the `Out` field afterwards.
fn run_with_out(
    kind: PropertyKind,
    body: impl FnOnce(&mut ProgramBuilder, &mut ScriptBuilder, PropertyId),
) -> Result<(Value, CallOutcome)> {
    let mut pb = ProgramBuilder::new();
    let class = pb.add_class("Bag", None);
    let out = pb.add_field(class, "Out", kind);
    let f = pb.add_function(class, "Run", 0);
    let mut s = ScriptBuilder::new();
    body(&mut pb, &mut s, out);
    s.ret_nothing();
    pb.set_script(f, s.finish()?);

    let mut vm = Vm::new(pb.build()?);
    let obj = vm.spawn(class)?;
    let (mut ctx, _sink) = recording_ctx();
    let outcome = vm.process_event(&mut ctx, obj, f, &mut [])?;
    Ok((vm.field(obj, "Out")?, outcome))
}

/// `Out = <expr>`
fn eval_into(kind: PropertyKind, expr: impl FnOnce(&mut ProgramBuilder, &mut ScriptBuilder)) -> Result<Value> {
    let (value, outcome) = run_with_out(kind, |pb, s, out| {
        s.let_(out).instance(out);
        expr(pb, s);
    })?;
    assert!(outcome.is_completed());
    Ok(value)
}

fn ints(values: &[i32]) -> Vec<Value> {
    values.iter().copied().map(Value::Int).collect()
}

#[test]
fn test_scalar_constants() -> Result<()> {
    let big = 1i64 << 40;
    assert_eq!(
        eval_into(PropertyKind::Int64, |_, s| {
            s.op(Opcode::Int64Const).i64(big);
        })?,
        Value::Int64(big)
    );
    assert_eq!(
        eval_into(PropertyKind::UInt64, |_, s| {
            s.op(Opcode::UInt64Const).u64(u64::MAX);
        })?,
        Value::UInt64(u64::MAX)
    );
    assert_eq!(eval_into(PropertyKind::Float, |_, s| {
        s.float(1.5);
    })?, Value::Float(1.5));
    assert_eq!(eval_into(PropertyKind::Double, |_, s| {
        s.double(-0.25);
    })?, Value::Double(-0.25));
    assert_eq!(
        eval_into(PropertyKind::Byte, |_, s| {
            s.op(Opcode::ByteConst).u8(7);
        })?,
        Value::Byte(7)
    );
    assert_eq!(
        eval_into(PropertyKind::Int, |_, s| {
            s.op(Opcode::IntConstByte).u8(200);
        })?,
        Value::Int(200)
    );
    assert_eq!(
        eval_into(PropertyKind::Int, |_, s| {
            s.op(Opcode::IntOne);
        })?,
        Value::Int(1)
    );
    assert_eq!(eval_into(PropertyKind::Bool, |_, s| {
        s.boolean(true);
    })?, Value::Bool(true));
    assert_eq!(
        eval_into(PropertyKind::Str, |_, s| {
            s.string("hello world");
        })?,
        Value::str("hello world")
    );
    Ok(())
}

#[test]
fn test_name_class_and_object_constants() -> Result<()> {
    assert_eq!(
        eval_into(PropertyKind::Name, |pb, s| {
            let name = pb.intern("Greeting");
            s.op(Opcode::NameConst).name(name);
        })?,
        Value::Name(Name::new("Greeting"))
    );
    assert_eq!(
        eval_into(PropertyKind::Class(None), |_, s| {
            s.op(Opcode::ClassConst).class(Some(ClassId(0)));
        })?,
        Value::Class(Some(ClassId(0)))
    );
    assert_eq!(eval_into(PropertyKind::Object(None), |_, s| {
        s.no_object();
    })?, Value::Object(None));
    Ok(())
}

#[test]
fn test_vector_and_transform_constants() -> Result<()> {
    assert_eq!(
        eval_into(PropertyKind::Vector, |_, s| {
            s.op(Opcode::VectorConst).f64(1.0).f64(2.0).f64(3.0);
        })?,
        Value::Vector([1.0, 2.0, 3.0])
    );

    let expected = Transform {
        rotation: [0.0, 0.0, 0.5, 0.5],
        translation: [10.0, 20.0, 30.0],
        scale: [2.0, 2.0, 2.0],
    };
    let value = eval_into(PropertyKind::Transform, |_, s| {
        s.op(Opcode::TransformConst);
        for component in expected
            .rotation
            .iter()
            .chain(expected.translation.iter())
            .chain(expected.scale.iter())
        {
            s.f64(*component);
        }
    })?;
    assert_eq!(value, Value::Transform(Box::new(expected)));
    Ok(())
}

#[test]
fn test_struct_const_fills_missing_members_with_defaults() -> Result<()> {
    let mut pb = ProgramBuilder::new();
    let (point, _) = pb.add_struct("Point", vec![("X", PropertyKind::Int), ("Y", PropertyKind::Int)]);
    let kind = PropertyKind::Struct(point);

    let value = eval_into(kind.clone(), |pb, s| {
        let literal = pb.add_property("Point", kind.clone());
        s.op(Opcode::StructConst).property(literal).i32(2).int(3).op(Opcode::EndStructConst);
    })?;
    assert_eq!(value, Value::Struct(ints(&[3, 0])));

    let (_, outcome) = run_with_out(kind.clone(), |pb, s, out| {
        let literal = pb.add_property("Point", kind.clone());
        s.let_(out).instance(out);
        s.op(Opcode::StructConst).property(literal).i32(2);
        s.int(1).int(2).int(3).op(Opcode::EndStructConst);
    })?;
    assert!(matches!(outcome, CallOutcome::Aborted(AbortReason::Malformed { .. })));
    Ok(())
}

#[test]
fn test_array_and_set_constants() -> Result<()> {
    let element = Property::element(PropertyKind::Int);
    let array = eval_into(PropertyKind::Array(element.clone()), |pb, s| {
        let inner = pb.add_property("Elem", PropertyKind::Int);
        s.op(Opcode::ArrayConst).property(inner).i32(3);
        s.int(1).int(2).int(2).op(Opcode::EndArrayConst);
    })?;
    assert_eq!(array, Value::Array(ints(&[1, 2, 2])));

    let set = eval_into(PropertyKind::Set(element), |pb, s| {
        let inner = pb.add_property("Elem", PropertyKind::Int);
        s.op(Opcode::SetConst).property(inner).i32(3);
        s.int(1).int(2).int(2).op(Opcode::EndSetConst);
    })?;
    assert_eq!(set, Value::Set(ints(&[1, 2])));
    Ok(())
}

#[test]
fn test_declared_element_count_is_only_a_hint() -> Result<()> {
    let array = eval_into(PropertyKind::Array(Property::element(PropertyKind::Int)), |pb, s| {
        let inner = pb.add_property("Elem", PropertyKind::Int);
        s.op(Opcode::ArrayConst).property(inner).i32(i32::MAX);
        s.int(1).op(Opcode::EndArrayConst);
    })?;
    assert_eq!(array, Value::Array(ints(&[1])));

    let kind = PropertyKind::Map(Property::element(PropertyKind::Int), Property::element(PropertyKind::Int));
    let map = eval_into(kind, |pb, s| {
        let key = pb.add_property("Key", PropertyKind::Int);
        let value = pb.add_property("Value", PropertyKind::Int);
        s.op(Opcode::MapConst).property(key).property(value).i32(i32::MAX);
        s.int(1).int(2).op(Opcode::EndMapConst);
    })?;
    assert_eq!(map, Value::Map(vec![(Value::Int(1), Value::Int(2))]));
    Ok(())
}

#[test]
fn test_map_const_later_key_overwrites() -> Result<()> {
    let kind = PropertyKind::Map(Property::element(PropertyKind::Str), Property::element(PropertyKind::Int));
    let map = eval_into(kind, |pb, s| {
        let key = pb.add_property("Key", PropertyKind::Str);
        let value = pb.add_property("Value", PropertyKind::Int);
        s.op(Opcode::MapConst).property(key).property(value).i32(3);
        s.string("a").int(1).string("b").int(2).string("a").int(3);
        s.op(Opcode::EndMapConst);
    })?;
    assert_eq!(
        map,
        Value::Map(vec![(Value::str("a"), Value::Int(3)), (Value::str("b"), Value::Int(2))])
    );
    Ok(())
}

#[test]
fn test_container_setters_rebuild_variable() -> Result<()> {
    let (array, _) = run_with_out(PropertyKind::Array(Property::element(PropertyKind::Int)), |_, s, out| {
        s.op(Opcode::SetArray).instance(out).int(9).op(Opcode::EndArray);
        s.op(Opcode::SetArray).instance(out).int(4).int(5).op(Opcode::EndArray);
    })?;
    assert_eq!(array, Value::Array(ints(&[4, 5])));

    let (set, _) = run_with_out(PropertyKind::Set(Property::element(PropertyKind::Int)), |_, s, out| {
        s.op(Opcode::SetSet).instance(out).i32(3).int(1).int(1).int(2).op(Opcode::EndSet);
    })?;
    assert_eq!(set, Value::Set(ints(&[1, 2])));

    let kind = PropertyKind::Map(Property::element(PropertyKind::Str), Property::element(PropertyKind::Int));
    let (map, _) = run_with_out(kind, |_, s, out| {
        s.op(Opcode::SetMap).instance(out).i32(2);
        s.string("k").int(1).string("k").int(2).op(Opcode::EndMap);
    })?;
    assert_eq!(map, Value::Map(vec![(Value::str("k"), Value::Int(2))]));
    Ok(())
}

#[test]
fn test_unmatched_end_marker_is_malformed() -> Result<()> {
    let (_, outcome) = run_with_out(PropertyKind::Int, |_, s, _| {
        s.op(Opcode::EndArrayConst);
    })?;
    assert!(matches!(outcome, CallOutcome::Aborted(AbortReason::Malformed { .. })));
    Ok(())
}
