use anyhow::Result;
use bcvm_core::{
    val::{ObjectRef, PropertyKind, Value},
    vm::{ExecutionContext, Frame, ProgramBuilder, Vm, VmResult},
};

use crate::{Library, LibraryBuilder, Param, set_result};

pub const CLASS_NAME: &str = "StringLibrary";

pub(crate) fn register(pb: &mut ProgramBuilder) -> Result<Library> {
    let mut lib = LibraryBuilder::new(pb, CLASS_NAME)?;
    lib.declare(
        "Concat_StrStr",
        concat_str_str,
        &[Param::In("A", PropertyKind::Str), Param::In("B", PropertyKind::Str)],
        Some(PropertyKind::Str),
    )
    .declare(
        "Conv_IntToString",
        conv_int_to_string,
        &[Param::In("InInt", PropertyKind::Int)],
        Some(PropertyKind::Str),
    )
    .declare("Len", len, &[Param::In("S", PropertyKind::Str)], Some(PropertyKind::Int));
    Ok(lib.finish())
}

fn text(value: &Value) -> &str {
    value.as_str().unwrap_or_default()
}

fn concat_str_str(
    vm: &mut Vm,
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    _object: ObjectRef,
    result: Option<&mut Value>,
) -> VmResult<()> {
    let a = frame.arg(vm, ctx)?;
    let b = frame.arg(vm, ctx)?;
    frame.finish()?;
    let mut joined = String::with_capacity(text(&a).len() + text(&b).len());
    joined.push_str(text(&a));
    joined.push_str(text(&b));
    set_result(result, Value::str(&joined));
    Ok(())
}

fn conv_int_to_string(
    vm: &mut Vm,
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    _object: ObjectRef,
    result: Option<&mut Value>,
) -> VmResult<()> {
    let value = frame.arg(vm, ctx)?.as_int();
    frame.finish()?;
    set_result(result, Value::str(&value.to_string()));
    Ok(())
}

/// Length in characters, not bytes.
fn len(
    vm: &mut Vm,
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    _object: ObjectRef,
    result: Option<&mut Value>,
) -> VmResult<()> {
    let s = frame.arg(vm, ctx)?;
    frame.finish()?;
    let count = text(&s).chars().count();
    set_result(result, Value::Int(i32::try_from(count).unwrap_or(i32::MAX)));
    Ok(())
}
