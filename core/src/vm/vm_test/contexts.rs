use super::*;

use crate::val::Property;

fn clamp_percent(slot: &mut Value, value: Value) {
    *slot = Value::Int(value.as_int().clamp(0, 100));
}

struct Holder {
    pb: ProgramBuilder,
    class: ClassId,
    other: ClassId,
    target: PropertyId,
    value: PropertyId,
    after: PropertyId,
    score: PropertyId,
}

/// `Holder` points at an `Other` through `Target`; scripts copy `Other.Score` into `Value`.
fn holder() -> Holder {
    let mut pb = ProgramBuilder::new();
    let other = pb.add_class("Other", None);
    let score = pb.add_field(other, "Score", PropertyKind::Int);
    let class = pb.add_class("Holder", None);
    let target = pb.add_field(class, "Target", PropertyKind::Object(Some(other)));
    let value = pb.add_field(class, "Value", PropertyKind::Int);
    let after = pb.add_field(class, "After", PropertyKind::Int);
    Holder {
        pb,
        class,
        other,
        target,
        value,
        after,
        score,
    }
}

/// `Value = <base>.Score; After = 1`
fn read_through_context(h: &Holder, op: Opcode, base: impl FnOnce(&mut ScriptBuilder)) -> Result<Vec<u8>> {
    let mut s = ScriptBuilder::new();
    let end = s.new_label();
    s.let_(h.value).instance(h.value).op(op);
    base(&mut s);
    s.context_guard(end, Some(h.score)).instance(h.score);
    s.bind(end);
    s.let_(h.after).instance(h.after).int(1);
    s.ret_nothing();
    s.finish()
}

fn run(mut h: Holder, script: Vec<u8>, setup: impl FnOnce(&mut Vm, ObjectRef, ClassId) -> Result<()>) -> Result<(Vm, ObjectRef, RecordingSink)> {
    let f = h.pb.add_function(h.class, "Run", 0);
    h.pb.set_script(f, script);
    let mut vm = Vm::new(h.pb.build()?);
    let obj = vm.spawn(h.class)?;
    setup(&mut vm, obj, h.other)?;
    let (mut ctx, sink) = recording_ctx();
    let outcome = vm.process_event(&mut ctx, obj, f, &mut [])?;
    assert!(outcome.is_completed());
    Ok((vm, obj, sink))
}

#[test]
fn test_context_reads_field_of_target() -> Result<()> {
    let h = holder();
    let target = h.target;
    let script = read_through_context(&h, Opcode::Context, |s| {
        s.instance(target);
    })?;
    let (vm, obj, sink) = run(h, script, |vm, obj, other| {
        let o = vm.spawn(other)?;
        vm.set_field(o, "Score", Value::Int(11))?;
        vm.set_field(obj, "Target", Value::Object(Some(o)))
    })?;

    assert_eq!(vm.field(obj, "Value")?, Value::Int(11));
    assert!(sink.exceptions().is_empty());
    Ok(())
}

#[test]
fn test_null_context_skips_guard_and_continues() -> Result<()> {
    let h = holder();
    let target = h.target;
    let script = read_through_context(&h, Opcode::Context, |s| {
        s.instance(target);
    })?;
    let (vm, obj, sink) = run(h, script, |vm, obj, _| vm.set_field(obj, "Value", Value::Int(7)))?;

    assert_eq!(vm.field(obj, "Value")?, Value::Int(0));
    assert_eq!(vm.field(obj, "After")?, Value::Int(1));
    assert_eq!(
        sink.descriptions(ScriptExceptionType::AccessViolation),
        vec!["Accessed None trying to read property Target".to_string()]
    );
    Ok(())
}

#[test]
fn test_literal_none_base_reports_plain_access_violation() -> Result<()> {
    let h = holder();
    let script = read_through_context(&h, Opcode::Context, |s| {
        s.no_object();
    })?;
    let (vm, obj, sink) = run(h, script, |_, _, _| Ok(()))?;

    assert_eq!(vm.field(obj, "After")?, Value::Int(1));
    assert_eq!(
        sink.descriptions(ScriptExceptionType::AccessViolation),
        vec!["Accessed None".to_string()]
    );
    Ok(())
}

#[test]
fn test_stale_context_names_the_object() -> Result<()> {
    let h = holder();
    let target = h.target;
    let script = read_through_context(&h, Opcode::Context, |s| {
        s.instance(target);
    })?;
    let stale = Arc::new(Mutex::new(None));
    let captured = Arc::clone(&stale);
    let (_vm, _obj, sink) = run(h, script, move |vm, obj, other| {
        let o = vm.spawn(other)?;
        vm.set_field(obj, "Target", Value::Object(Some(o)))?;
        vm.mark_pending_kill(o);
        *captured.lock().unwrap() = Some(o);
        Ok(())
    })?;

    let o = stale.lock().unwrap().expect("target spawned");
    assert_eq!(
        sink.descriptions(ScriptExceptionType::AccessViolation),
        vec![format!(
            "Attempted to access {o} via property Target, but {o} is not valid (pending kill or garbage)"
        )]
    );
    Ok(())
}

#[test]
fn test_fail_silent_context_raises_nothing() -> Result<()> {
    let h = holder();
    let target = h.target;
    let script = read_through_context(&h, Opcode::ContextFailSilent, |s| {
        s.instance(target);
    })?;
    let (vm, obj, sink) = run(h, script, |vm, obj, _| vm.set_field(obj, "Value", Value::Int(7)))?;

    assert_eq!(vm.field(obj, "Value")?, Value::Int(0));
    assert_eq!(vm.field(obj, "After")?, Value::Int(1));
    assert!(sink.exceptions().is_empty());
    Ok(())
}

#[test]
fn test_class_context_reads_default_object() -> Result<()> {
    let h = holder();
    let other = h.other;
    let script = read_through_context(&h, Opcode::ClassContext, |s| {
        s.op(Opcode::ClassConst).class(Some(other));
    })?;
    let (vm, obj, sink) = run(h, script, |vm, _, other| {
        let cdo = vm.default_object(other).expect("class default object");
        vm.set_field(cdo, "Score", Value::Int(9))
    })?;
    assert_eq!(vm.field(obj, "Value")?, Value::Int(9));
    assert!(sink.exceptions().is_empty());

    let h = holder();
    let script = read_through_context(&h, Opcode::ClassContext, |s| {
        s.op(Opcode::ClassConst).class(None);
    })?;
    let (vm, obj, sink) = run(h, script, |_, _, _| Ok(()))?;
    assert_eq!(vm.field(obj, "After")?, Value::Int(1));
    assert_eq!(
        sink.descriptions(ScriptExceptionType::AccessViolation),
        vec!["Accessed None reading a Class".to_string()]
    );
    Ok(())
}

#[test]
fn test_interface_context_yields_underlying_object() -> Result<()> {
    let mut h = holder();
    let scored = h.pb.add_interface("Scored");
    h.pb.implement(h.other, scored);
    let iface = h.pb.add_field(h.class, "Iface", PropertyKind::Interface(scored));
    let script = read_through_context(&h, Opcode::Context, |s| {
        s.op(Opcode::InterfaceContext).instance(iface);
    })?;
    let (vm, obj, sink) = run(h, script, |vm, obj, other| {
        let o = vm.spawn(other)?;
        vm.set_field(o, "Score", Value::Int(4))?;
        vm.set_field(obj, "Iface", Value::Interface(Some(o)))
    })?;

    assert_eq!(vm.field(obj, "Value")?, Value::Int(4));
    assert!(sink.exceptions().is_empty());
    Ok(())
}

#[test]
fn test_struct_member_context_reads_and_writes_member() -> Result<()> {
    let mut h = holder();
    let (point, members) = h.pb.add_struct("Point", vec![("X", PropertyKind::Int), ("Y", PropertyKind::Int)]);
    let pos = h.pb.add_field(h.class, "Pos", PropertyKind::Struct(point));
    let y = members[1];

    let mut s = ScriptBuilder::new();
    s.let_(h.value).instance(h.value).op(Opcode::StructMemberContext).property(y).instance(pos);
    s.let_(y).op(Opcode::StructMemberContext).property(y).instance(pos).int(9);
    s.ret_nothing();
    let script = s.finish()?;
    let (vm, obj, sink) = run(h, script, |vm, obj, _| {
        vm.set_field(obj, "Pos", Value::Struct(vec![Value::Int(3), Value::Int(4)]))
    })?;

    assert_eq!(vm.field(obj, "Value")?, Value::Int(4));
    assert_eq!(vm.field(obj, "Pos")?, Value::Struct(vec![Value::Int(3), Value::Int(9)]));
    assert!(sink.exceptions().is_empty());
    Ok(())
}

fn array_read(index: i32) -> Result<(Vm, ObjectRef, RecordingSink)> {
    let mut h = holder();
    let arr = h.pb.add_field(h.class, "Arr", PropertyKind::Array(Property::element(PropertyKind::Int)));
    let mut s = ScriptBuilder::new();
    s.let_(h.value).instance(h.value).op(Opcode::ArrayGetByRef).instance(arr).int(index);
    s.let_(h.after).instance(h.after).int(1);
    s.ret_nothing();
    let script = s.finish()?;
    run(h, script, |vm, obj, _| {
        vm.set_field(obj, "Value", Value::Int(-1))?;
        vm.set_field(obj, "Arr", Value::Array(vec![Value::Int(10), Value::Int(20), Value::Int(30)]))
    })
}

#[test]
fn test_array_get_by_ref_in_bounds() -> Result<()> {
    let (vm, obj, sink) = array_read(1)?;
    assert_eq!(vm.field(obj, "Value")?, Value::Int(20));
    assert!(sink.exceptions().is_empty());
    Ok(())
}

#[test]
fn test_array_get_by_ref_out_of_bounds_clears_result() -> Result<()> {
    let (vm, obj, sink) = array_read(5)?;
    assert_eq!(vm.field(obj, "Value")?, Value::Int(0));
    assert_eq!(vm.field(obj, "After")?, Value::Int(1));
    assert_eq!(
        sink.descriptions(ScriptExceptionType::AccessViolation),
        vec!["Attempted to access index 5 from array Arr of length 3!".to_string()]
    );
    Ok(())
}

#[test]
fn test_let_goes_through_property_setter() -> Result<()> {
    let mut h = holder();
    let clamped = h
        .pb
        .add_field_with_setter(h.class, "Clamped", PropertyKind::Int, clamp_percent);
    let mut s = ScriptBuilder::new();
    s.let_(clamped).instance(clamped).int(250);
    s.ret_nothing();
    let script = s.finish()?;
    let (vm, obj, _sink) = run(h, script, |_, _, _| Ok(()))?;

    assert_eq!(vm.field(obj, "Clamped")?, Value::Int(100));
    Ok(())
}

#[test]
fn test_missing_property_operand_is_access_violation() -> Result<()> {
    let h = holder();
    let mut s = ScriptBuilder::new();
    s.let_(h.value).instance(h.value).op(Opcode::InstanceVariable).missing_property();
    s.let_(h.after).instance(h.after).int(1);
    s.ret_nothing();
    let script = s.finish()?;
    let (vm, obj, sink) = run(h, script, |vm, obj, _| vm.set_field(obj, "Value", Value::Int(5)))?;

    assert_eq!(vm.field(obj, "Value")?, Value::Int(0));
    assert_eq!(vm.field(obj, "After")?, Value::Int(1));
    let violations = sink.descriptions(ScriptExceptionType::AccessViolation);
    assert_eq!(violations.len(), 1);
    assert!(violations[0].starts_with("Attempted to access missing property."));
    Ok(())
}

#[test]
fn test_default_and_sparse_variables() -> Result<()> {
    let mut h = holder();
    let base = h.pb.add_field(h.class, "Base", PropertyKind::Int);
    let shared = h.pb.add_sparse_field(h.class, "Shared", PropertyKind::Int, Value::Int(40));
    let mut s = ScriptBuilder::new();
    s.let_(h.value).instance(h.value).default_var(base);
    s.let_(h.after).instance(h.after).sparse(shared);
    s.let_(shared).sparse(shared).int(41);
    s.ret_nothing();
    let script = s.finish()?;
    let (vm, obj, sink) = run(h, script, |vm, obj, _| {
        let class = vm.objects().class_of(obj).expect("live holder");
        let cdo = vm.default_object(class).expect("class default object");
        vm.set_field(cdo, "Base", Value::Int(6))?;
        vm.set_field(obj, "Base", Value::Int(1))
    })?;

    assert_eq!(vm.field(obj, "Value")?, Value::Int(6));
    assert_eq!(vm.field(obj, "After")?, Value::Int(40));
    let class = vm.objects().class_of(obj).expect("live holder");
    assert_eq!(vm.objects().sparse_data(class).map(|d| d[0].clone()), Some(Value::Int(41)));
    assert!(sink.exceptions().is_empty());
    Ok(())
}
