//! Array helpers. Element values are carried as-is; the declared element kind only shapes the
//! default values of the parameters.

use anyhow::Result;
use bcvm_core::{
    val::{ObjectRef, Property, PropertyKind, Value},
    vm::{ExecutionContext, Frame, ProgramBuilder, ScriptExceptionType, Vm, VmResult},
};

use crate::{Library, LibraryBuilder, Param, set_result};

pub const CLASS_NAME: &str = "ArrayLibrary";

fn int_array() -> PropertyKind {
    PropertyKind::Array(Property::element(PropertyKind::Int))
}

pub(crate) fn register(pb: &mut ProgramBuilder) -> Result<Library> {
    let mut lib = LibraryBuilder::new(pb, CLASS_NAME)?;
    lib.declare(
        "Array_Length",
        array_length,
        &[Param::In("TargetArray", int_array())],
        Some(PropertyKind::Int),
    )
    .declare(
        "Array_Add",
        array_add,
        &[Param::Ref("TargetArray", int_array()), Param::In("NewItem", PropertyKind::Int)],
        Some(PropertyKind::Int),
    )
    .declare(
        "Array_Get",
        array_get,
        &[
            Param::In("TargetArray", int_array()),
            Param::In("Index", PropertyKind::Int),
            Param::Out("Item", PropertyKind::Int),
        ],
        None,
    );
    Ok(lib.finish())
}

fn array_length(
    vm: &mut Vm,
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    _object: ObjectRef,
    result: Option<&mut Value>,
) -> VmResult<()> {
    let array = frame.arg(vm, ctx)?;
    frame.finish()?;
    let len = array.container_len().unwrap_or(0);
    set_result(result, Value::Int(i32::try_from(len).unwrap_or(i32::MAX)));
    Ok(())
}

/// Appends through the reference parameter and returns the new element's index.
fn array_add(
    vm: &mut Vm,
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    _object: ObjectRef,
    result: Option<&mut Value>,
) -> VmResult<()> {
    let target = frame.arg_ref(vm, ctx)?;
    let item = frame.arg(vm, ctx)?;
    frame.finish()?;

    let Some(slot) = target.as_ref().and_then(|place| vm.place_mut(place)) else {
        set_result(result, Value::Int(-1));
        return Ok(());
    };
    if !matches!(slot, Value::Array(_)) {
        *slot = Value::Array(Vec::new());
    }
    let index = match slot {
        Value::Array(items) => {
            items.push(item);
            items.len() - 1
        }
        _ => 0,
    };
    set_result(result, Value::Int(i32::try_from(index).unwrap_or(i32::MAX)));
    Ok(())
}

/// Copies element `Index` into the out parameter. An index outside the array reports an access
/// violation and leaves the default element there.
fn array_get(
    vm: &mut Vm,
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    object: ObjectRef,
    _result: Option<&mut Value>,
) -> VmResult<()> {
    let array = frame.arg(vm, ctx)?;
    let index = frame.arg(vm, ctx)?.as_int();
    let item = frame.arg_ref(vm, ctx)?;
    frame.finish()?;

    let len = array.container_len().unwrap_or(0);
    let element = usize::try_from(index).ok().and_then(|i| array.child(i)).cloned();
    if element.is_none() {
        vm.throw_script_exception(
            ctx,
            object,
            frame,
            ScriptExceptionType::AccessViolation,
            format!("Attempted to access index {index} from array of length {len}!"),
        )?;
    }
    if let Some(slot) = item.as_ref().and_then(|place| vm.place_mut(place)) {
        *slot = element.unwrap_or_else(|| PropertyKind::Int.default_value());
    }
    Ok(())
}
