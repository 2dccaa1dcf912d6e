use super::*;

struct Ledger {
    pb: ProgramBuilder,
    class: ClassId,
    x: PropertyId,
    log: PropertyId,
}

fn ledger() -> Ledger {
    let mut pb = ProgramBuilder::new();
    let class = pb.add_class("Ledger", None);
    let x = pb.add_field(class, "X", PropertyKind::Int);
    let log = pb.add_field(class, "Log", PropertyKind::Int);
    Ledger { pb, class, x, log }
}

fn transact(s: &mut ScriptBuilder, id: i32, abort: crate::vm::Label) {
    s.op(Opcode::AutoRtfmTransact).i32(id).label(abort);
}

fn stop(s: &mut ScriptBuilder, id: i32, mode: u8) {
    s.op(Opcode::AutoRtfmStopTransact).i32(id).u8(mode);
}

/// Appends `Log = 1; return; abort: Log = 2; return`.
fn epilogue(l: &Ledger, s: &mut ScriptBuilder, abort: crate::vm::Label) {
    s.let_(l.log).instance(l.log).int(1);
    s.ret_nothing();
    s.bind(abort).let_(l.log).instance(l.log).int(2);
    s.ret_nothing();
}

/// Runs the script with `X` preset to 3 and returns (X, Log, context).
fn run(
    mut l: Ledger,
    s: ScriptBuilder,
    limits: GuardLimits,
) -> Result<(Value, Value, ExecutionContext, RecordingSink)> {
    let f = l.pb.add_function(l.class, "Run", 0);
    l.pb.set_script(f, s.finish()?);
    let mut vm = Vm::new(l.pb.build()?);
    let obj = vm.spawn(l.class)?;
    vm.set_field(obj, "X", Value::Int(3))?;
    let (mut ctx, sink) = recording_ctx_with(limits);
    vm.process_event(&mut ctx, obj, f, &mut [])?;
    Ok((vm.field(obj, "X")?, vm.field(obj, "Log")?, ctx, sink))
}

#[test]
fn test_graceful_stop_commits() -> Result<()> {
    let l = ledger();
    let mut s = ScriptBuilder::new();
    let abort = s.new_label();
    transact(&mut s, 1, abort);
    s.let_(l.x).instance(l.x).int(5);
    stop(&mut s, 1, 0);
    epilogue(&l, &mut s, abort);
    let (x, log, ctx, _sink) = run(l, s, GuardLimits::default())?;

    assert_eq!(x, Value::Int(5));
    assert_eq!(log, Value::Int(1));
    assert_eq!(ctx.transaction_depth(), 0);
    Ok(())
}

#[test]
fn test_aborting_stop_rolls_back_and_redirects() -> Result<()> {
    let l = ledger();
    let mut s = ScriptBuilder::new();
    let abort = s.new_label();
    transact(&mut s, 1, abort);
    s.let_(l.x).instance(l.x).int(5);
    stop(&mut s, 1, 1);
    epilogue(&l, &mut s, abort);
    let (x, log, ctx, _sink) = run(l, s, GuardLimits::default())?;

    assert_eq!(x, Value::Int(3));
    assert_eq!(log, Value::Int(2));
    assert_eq!(ctx.transaction_depth(), 0);
    Ok(())
}

#[test]
fn test_abort_if_not_checks_condition() -> Result<()> {
    for (condition, expected_x, expected_log) in [(false, 3, 2), (true, 6, 1)] {
        let l = ledger();
        let mut s = ScriptBuilder::new();
        let abort = s.new_label();
        transact(&mut s, 1, abort);
        s.let_(l.x).instance(l.x).int(5);
        s.op(Opcode::AutoRtfmAbortIfNot).boolean(condition);
        s.let_(l.x).instance(l.x).int(6);
        stop(&mut s, 1, 0);
        epilogue(&l, &mut s, abort);
        let (x, log, _ctx, _sink) = run(l, s, GuardLimits::default())?;

        assert_eq!(x, Value::Int(expected_x));
        assert_eq!(log, Value::Int(expected_log));
    }
    Ok(())
}

#[test]
fn test_inner_abort_can_abort_parent() -> Result<()> {
    let l = ledger();
    let mut s = ScriptBuilder::new();
    let outer_abort = s.new_label();
    let inner_abort = s.new_label();
    transact(&mut s, 1, outer_abort);
    s.let_(l.x).instance(l.x).int(1);
    transact(&mut s, 2, inner_abort);
    s.let_(l.x).instance(l.x).int(2);
    stop(&mut s, 2, 2);
    s.bind(inner_abort).let_(l.log).instance(l.log).int(5);
    stop(&mut s, 1, 0);
    epilogue(&l, &mut s, outer_abort);
    let (x, log, ctx, _sink) = run(l, s, GuardLimits::default())?;

    assert_eq!(x, Value::Int(3));
    assert_eq!(log, Value::Int(2));
    assert_eq!(ctx.transaction_depth(), 0);
    Ok(())
}

#[test]
fn test_inner_abort_keeps_parent_changes() -> Result<()> {
    let l = ledger();
    let mut s = ScriptBuilder::new();
    let outer_abort = s.new_label();
    let inner_abort = s.new_label();
    transact(&mut s, 1, outer_abort);
    s.let_(l.x).instance(l.x).int(1);
    transact(&mut s, 2, inner_abort);
    s.let_(l.x).instance(l.x).int(2);
    stop(&mut s, 2, 1);
    s.bind(inner_abort);
    stop(&mut s, 1, 0);
    epilogue(&l, &mut s, outer_abort);
    let (x, log, _ctx, _sink) = run(l, s, GuardLimits::default())?;

    assert_eq!(x, Value::Int(1));
    assert_eq!(log, Value::Int(1));
    Ok(())
}

#[test]
fn test_return_inside_region_commits() -> Result<()> {
    let l = ledger();
    let mut s = ScriptBuilder::new();
    let abort = s.new_label();
    transact(&mut s, 1, abort);
    s.let_(l.x).instance(l.x).int(4);
    s.ret_nothing();
    s.bind(abort).ret_nothing();
    let (x, _log, ctx, _sink) = run(l, s, GuardLimits::default())?;

    assert_eq!(x, Value::Int(4));
    assert_eq!(ctx.transaction_depth(), 0);
    Ok(())
}

#[test]
fn test_runaway_inside_region_rolls_back() -> Result<()> {
    let l = ledger();
    let mut s = ScriptBuilder::new();
    let abort = s.new_label();
    let top = s.new_label();
    transact(&mut s, 1, abort);
    s.let_(l.x).instance(l.x).int(7);
    s.bind(top).jump(top);
    stop(&mut s, 1, 0);
    epilogue(&l, &mut s, abort);
    let mut limits = GuardLimits::default();
    limits.set_max_loop_iterations(10)?;
    let (x, log, ctx, sink) = run(l, s, limits)?;

    assert_eq!(x, Value::Int(3));
    assert_eq!(log, Value::Int(0));
    assert_eq!(ctx.transaction_depth(), 0);
    assert_eq!(
        sink.descriptions(ScriptExceptionType::InfiniteLoop),
        vec!["Runaway loop detected (over 10 iterations)".to_string()]
    );
    Ok(())
}

#[test]
fn test_stop_outside_region_is_ignored() -> Result<()> {
    let l = ledger();
    let mut s = ScriptBuilder::new();
    let abort = s.new_label();
    stop(&mut s, 9, 1);
    epilogue(&l, &mut s, abort);
    let (x, log, _ctx, sink) = run(l, s, GuardLimits::default())?;

    assert_eq!(x, Value::Int(3));
    assert_eq!(log, Value::Int(1));
    assert!(sink.exceptions().is_empty());
    Ok(())
}
