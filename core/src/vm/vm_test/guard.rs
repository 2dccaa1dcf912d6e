use std::time::Duration;

use super::*;

fn limits(max_loop_iterations: i64, recursion_limit: i64) -> Result<GuardLimits> {
    let mut limits = GuardLimits::default();
    limits.set_max_loop_iterations(max_loop_iterations)?;
    limits.set_recursion_limit(recursion_limit)?;
    Ok(limits)
}

struct GuardFixture {
    vm: Vm,
    obj: ObjectRef,
    spin: FunctionId,
    recurse: FunctionId,
    add: FunctionId,
}

/// `Spin` sets its result to 5 and then loops forever; `Recurse` bumps `Calls` and calls itself;
/// `Add` is a plain straight-line function.
fn guard_fixture() -> Result<GuardFixture> {
    let mut pb = ProgramBuilder::new();
    let math = math_lib(&mut pb);
    let class = pb.add_class("Looper", None);
    let calls = pb.add_field(class, "Calls", PropertyKind::Int);

    let spin = pb.add_function(class, "Spin", 0);
    let ret = pb.add_return(spin, PropertyKind::Int);
    let mut s = ScriptBuilder::new();
    let top = s.new_label();
    s.let_(ret).local(ret).int(5);
    s.bind(top).jump(top);
    s.ret().local(ret);
    pb.set_script(spin, s.finish()?);

    let recurse = pb.add_function(class, "Recurse", 0);
    pb.add_return(recurse, PropertyKind::Int);
    let mut s = ScriptBuilder::new();
    s.let_(calls).instance(calls).call_math(math.add).instance(calls).int(1).end_parms();
    s.ret().call_final(recurse).end_parms();
    pb.set_script(recurse, s.finish()?);

    let add = pb.add_function(class, "Add", 0);
    let a = pb.add_param(add, "A", PropertyKind::Int);
    let b = pb.add_param(add, "B", PropertyKind::Int);
    pb.add_return(add, PropertyKind::Int);
    let mut s = ScriptBuilder::new();
    s.ret().call_math(math.add).local(a).local(b).end_parms();
    pb.set_script(add, s.finish()?);

    let mut vm = Vm::new(pb.build()?);
    let obj = vm.spawn(class)?;
    Ok(GuardFixture {
        vm,
        obj,
        spin,
        recurse,
        add,
    })
}

#[test]
fn test_runaway_loop_clears_result_and_signals_once() -> Result<()> {
    for ceiling in [1, 100, 1000] {
        let mut fx = guard_fixture()?;
        let (mut ctx, sink) = recording_ctx_with(limits(ceiling, 120)?);
        let mut parms = vec![Value::Int(-1)];
        let outcome = fx.vm.process_event(&mut ctx, fx.obj, fx.spin, &mut parms)?;

        assert!(outcome.is_completed());
        assert_eq!(parms[0], Value::Int(0));
        assert_eq!(sink.count(ScriptExceptionType::InfiniteLoop), 1);
        assert_eq!(
            sink.descriptions(ScriptExceptionType::InfiniteLoop),
            vec![format!("Runaway loop detected (over {ceiling} iterations)")]
        );
        assert!(ctx.ran_away());
    }
    Ok(())
}

#[test]
fn test_recursion_ceiling_stops_before_body_runs() -> Result<()> {
    for ceiling in [1u32, 5, 12] {
        let mut fx = guard_fixture()?;
        let (mut ctx, sink) = recording_ctx_with(limits(1_000_000, ceiling as i64)?);
        let mut parms = vec![Value::Int(-1)];
        fx.vm.process_event(&mut ctx, fx.obj, fx.recurse, &mut parms)?;

        assert_eq!(fx.vm.field(fx.obj, "Calls")?, Value::Int(ceiling as i32));
        assert_eq!(parms[0], Value::Int(0));
        assert_eq!(
            sink.descriptions(ScriptExceptionType::InfiniteLoop),
            vec![format!("Infinite script recursion ({ceiling} calls) detected")]
        );
        assert_eq!(ctx.recursion_depth(), 0);
        assert!(fx.vm.script_stack().is_empty());
    }
    Ok(())
}

#[test]
fn test_latched_guard_needs_host_reset() -> Result<()> {
    let mut fx = guard_fixture()?;
    let (mut ctx, sink) = recording_ctx_with(limits(50, 4)?);
    fx.vm.process_event(&mut ctx, fx.obj, fx.spin, &mut [Value::Int(0)])?;
    assert!(ctx.ran_away());

    // Still latched: the next entry returns a cleared value without running.
    let mut parms = vec![Value::Int(1), Value::Int(2), Value::Int(9)];
    fx.vm.process_event(&mut ctx, fx.obj, fx.add, &mut parms)?;
    assert_eq!(parms[2], Value::Int(0));

    ctx.reset_runaway();
    let mut parms = vec![Value::Int(1), Value::Int(2), Value::Int(9)];
    fx.vm.process_event(&mut ctx, fx.obj, fx.add, &mut parms)?;
    assert_eq!(parms[2], Value::Int(3));

    fx.vm.process_event(&mut ctx, fx.obj, fx.recurse, &mut [Value::Int(0)])?;
    ctx.reset_runaway();
    fx.vm.process_event(&mut ctx, fx.obj, fx.add, &mut parms)?;
    assert_eq!(parms[2], Value::Int(3));
    assert_eq!(sink.count(ScriptExceptionType::InfiniteLoop), 2);
    Ok(())
}

#[test]
fn test_time_budget_stops_unbounded_loop() -> Result<()> {
    let mut fx = guard_fixture()?;
    let mut limits = limits(u32::MAX as i64, 120)?;
    limits.set_time_limit(Some(Duration::from_millis(1)));
    let (mut ctx, sink) = recording_ctx_with(limits);

    let mut parms = vec![Value::Int(0)];
    fx.vm.process_event(&mut ctx, fx.obj, fx.spin, &mut parms)?;

    assert!(ctx.timed_out());
    assert_eq!(parms[0], Value::Int(0));
    assert_eq!(sink.descriptions(ScriptExceptionType::InfiniteLoop), vec!["Computation timed out".to_string()]);
    Ok(())
}

#[test]
fn test_straight_line_code_does_not_count_branches() -> Result<()> {
    let mut fx = guard_fixture()?;
    let (mut ctx, _sink) = recording_ctx_with(limits(1, 120)?);
    let mut parms = vec![Value::Int(20), Value::Int(22), Value::Int(0)];
    fx.vm.process_event(&mut ctx, fx.obj, fx.add, &mut parms)?;
    assert_eq!(parms[2], Value::Int(42));
    assert_eq!(ctx.runaway(), 0);
    Ok(())
}
