use anyhow::Result;
use bcvm_core::{
    val::{ObjectRef, PropertyKind, Value},
    vm::{ExecutionContext, Frame, ProgramBuilder, ScriptExceptionType, Vm, VmResult},
};

use crate::{Library, LibraryBuilder, Param, set_result};

pub const CLASS_NAME: &str = "MathLibrary";

pub(crate) fn register(pb: &mut ProgramBuilder) -> Result<Library> {
    let ints = || [Param::In("A", PropertyKind::Int), Param::In("B", PropertyKind::Int)];
    let doubles = || [Param::In("A", PropertyKind::Double), Param::In("B", PropertyKind::Double)];

    let mut lib = LibraryBuilder::new(pb, CLASS_NAME)?;
    lib.declare("Add_IntInt", add_int_int, &ints(), Some(PropertyKind::Int))
        .declare("Subtract_IntInt", subtract_int_int, &ints(), Some(PropertyKind::Int))
        .declare("Multiply_IntInt", multiply_int_int, &ints(), Some(PropertyKind::Int))
        .declare("Divide_IntInt", divide_int_int, &ints(), Some(PropertyKind::Int))
        .declare("Less_IntInt", less_int_int, &ints(), Some(PropertyKind::Bool))
        .declare("Greater_IntInt", greater_int_int, &ints(), Some(PropertyKind::Bool))
        .declare("EqualEqual_IntInt", equal_int_int, &ints(), Some(PropertyKind::Bool))
        .declare("Add_DoubleDouble", add_double_double, &doubles(), Some(PropertyKind::Double))
        .declare("Multiply_DoubleDouble", multiply_double_double, &doubles(), Some(PropertyKind::Double))
        .declare(
            "Not_PreBool",
            not_pre_bool,
            &[Param::In("A", PropertyKind::Bool)],
            Some(PropertyKind::Bool),
        )
        .declare(
            "BooleanAND",
            boolean_and,
            &[Param::In("A", PropertyKind::Bool), Param::In("B", PropertyKind::Bool)],
            Some(PropertyKind::Bool),
        );
    Ok(lib.finish())
}

fn pair(vm: &mut Vm, ctx: &mut ExecutionContext, frame: &mut Frame) -> VmResult<(Value, Value)> {
    let a = frame.arg(vm, ctx)?;
    let b = frame.arg(vm, ctx)?;
    frame.finish()?;
    Ok((a, b))
}

fn int_pair(vm: &mut Vm, ctx: &mut ExecutionContext, frame: &mut Frame) -> VmResult<(i32, i32)> {
    let (a, b) = pair(vm, ctx, frame)?;
    Ok((a.as_int(), b.as_int()))
}

fn double_pair(vm: &mut Vm, ctx: &mut ExecutionContext, frame: &mut Frame) -> VmResult<(f64, f64)> {
    let (a, b) = pair(vm, ctx, frame)?;
    Ok((a.as_f64(), b.as_f64()))
}

fn add_int_int(
    vm: &mut Vm,
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    _object: ObjectRef,
    result: Option<&mut Value>,
) -> VmResult<()> {
    let (a, b) = int_pair(vm, ctx, frame)?;
    set_result(result, Value::Int(a.wrapping_add(b)));
    Ok(())
}

fn subtract_int_int(
    vm: &mut Vm,
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    _object: ObjectRef,
    result: Option<&mut Value>,
) -> VmResult<()> {
    let (a, b) = int_pair(vm, ctx, frame)?;
    set_result(result, Value::Int(a.wrapping_sub(b)));
    Ok(())
}

fn multiply_int_int(
    vm: &mut Vm,
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    _object: ObjectRef,
    result: Option<&mut Value>,
) -> VmResult<()> {
    let (a, b) = int_pair(vm, ctx, frame)?;
    set_result(result, Value::Int(a.wrapping_mul(b)));
    Ok(())
}

/// Integer division truncating toward zero. Dividing by zero reports a non-fatal error and
/// yields 0.
fn divide_int_int(
    vm: &mut Vm,
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    object: ObjectRef,
    result: Option<&mut Value>,
) -> VmResult<()> {
    let (a, b) = int_pair(vm, ctx, frame)?;
    if b == 0 {
        vm.throw_script_exception(ctx, object, frame, ScriptExceptionType::NonFatalError, "Divide by zero")?;
        set_result(result, Value::Int(0));
        return Ok(());
    }
    set_result(result, Value::Int(a.wrapping_div(b)));
    Ok(())
}

fn less_int_int(
    vm: &mut Vm,
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    _object: ObjectRef,
    result: Option<&mut Value>,
) -> VmResult<()> {
    let (a, b) = int_pair(vm, ctx, frame)?;
    set_result(result, Value::Bool(a < b));
    Ok(())
}

fn greater_int_int(
    vm: &mut Vm,
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    _object: ObjectRef,
    result: Option<&mut Value>,
) -> VmResult<()> {
    let (a, b) = int_pair(vm, ctx, frame)?;
    set_result(result, Value::Bool(a > b));
    Ok(())
}

fn equal_int_int(
    vm: &mut Vm,
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    _object: ObjectRef,
    result: Option<&mut Value>,
) -> VmResult<()> {
    let (a, b) = int_pair(vm, ctx, frame)?;
    set_result(result, Value::Bool(a == b));
    Ok(())
}

fn add_double_double(
    vm: &mut Vm,
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    _object: ObjectRef,
    result: Option<&mut Value>,
) -> VmResult<()> {
    let (a, b) = double_pair(vm, ctx, frame)?;
    set_result(result, Value::Double(a + b));
    Ok(())
}

fn multiply_double_double(
    vm: &mut Vm,
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    _object: ObjectRef,
    result: Option<&mut Value>,
) -> VmResult<()> {
    let (a, b) = double_pair(vm, ctx, frame)?;
    set_result(result, Value::Double(a * b));
    Ok(())
}

fn not_pre_bool(
    vm: &mut Vm,
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    _object: ObjectRef,
    result: Option<&mut Value>,
) -> VmResult<()> {
    let a = frame.arg(vm, ctx)?.as_bool();
    frame.finish()?;
    set_result(result, Value::Bool(!a));
    Ok(())
}

/// Both operands are always evaluated.
fn boolean_and(
    vm: &mut Vm,
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    _object: ObjectRef,
    result: Option<&mut Value>,
) -> VmResult<()> {
    let (a, b) = pair(vm, ctx, frame)?;
    set_result(result, Value::Bool(a.as_bool() && b.as_bool()));
    Ok(())
}
