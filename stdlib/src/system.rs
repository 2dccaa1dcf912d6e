use anyhow::Result;
use bcvm_core::{
    val::{ObjectRef, PropertyKind, Value},
    vm::{ExecutionContext, Frame, ProgramBuilder, Vm, VmResult},
};
use tracing::info;

use crate::{Library, LibraryBuilder, Param, set_result};

pub const CLASS_NAME: &str = "SystemLibrary";

pub(crate) fn register(pb: &mut ProgramBuilder) -> Result<Library> {
    let mut lib = LibraryBuilder::new(pb, CLASS_NAME)?;
    lib.declare("PrintString", print_string, &[Param::In("InString", PropertyKind::Str)], None)
        .declare(
            "IsValid",
            is_valid,
            &[Param::In("Object", PropertyKind::Object(None))],
            Some(PropertyKind::Bool),
        );
    Ok(lib.finish())
}

fn print_string(
    vm: &mut Vm,
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    object: ObjectRef,
    _result: Option<&mut Value>,
) -> VmResult<()> {
    let message = frame.arg(vm, ctx)?;
    frame.finish()?;
    info!(
        target: "bcvm::stdlib",
        %object,
        function = %frame.node().name,
        "{}",
        message.as_str().unwrap_or_default()
    );
    Ok(())
}

/// True for a live object that is not pending kill.
fn is_valid(
    vm: &mut Vm,
    ctx: &mut ExecutionContext,
    frame: &mut Frame,
    _object: ObjectRef,
    result: Option<&mut Value>,
) -> VmResult<()> {
    let target = frame.arg(vm, ctx)?.as_object();
    frame.finish()?;
    set_result(result, Value::Bool(target.is_some_and(|t| vm.is_valid(t))));
    Ok(())
}
