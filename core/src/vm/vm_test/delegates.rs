use super::*;

use crate::val::ScriptDelegate;

struct Board {
    vm: Vm,
    emitter: ObjectRef,
    a: ObjectRef,
    b: ObjectRef,
    deaf: ObjectRef,
    wire: FunctionId,
    fire: FunctionId,
    unwire_a: FunctionId,
    clear: FunctionId,
    bind: FunctionId,
    unbind: FunctionId,
}

/// Listeners accumulate `Amount` into `Total`; `Deaf.OnHit` takes no arguments and never matches
/// the `Hit` signature.
fn board() -> Result<Board> {
    let mut pb = ProgramBuilder::new();
    let math = math_lib(&mut pb);
    let on_hit = pb.intern("OnHit");

    let listener = pb.add_class("Listener", None);
    let total = pb.add_field(listener, "Total", PropertyKind::Int);
    let handler = pb.add_function(listener, "OnHit", 0);
    let amount = pb.add_param(handler, "Amount", PropertyKind::Int);
    let mut s = ScriptBuilder::new();
    s.let_(total).instance(total).call_math(math.add).instance(total).local(amount).end_parms();
    s.ret_nothing();
    pb.set_script(handler, s.finish()?);

    let deaf_class = pb.add_class("Deaf", None);
    let deaf_total = pb.add_field(deaf_class, "Total", PropertyKind::Int);
    let deaf_handler = pb.add_function(deaf_class, "OnHit", 0);
    let mut s = ScriptBuilder::new();
    s.let_(deaf_total).instance(deaf_total).int(99);
    s.ret_nothing();
    pb.set_script(deaf_handler, s.finish()?);

    let class = pb.add_class("Emitter", None);
    let hits = pb.add_field(class, "Hits", PropertyKind::MulticastDelegate);
    let single = pb.add_field(class, "Single", PropertyKind::Delegate);
    let fa = pb.add_field(class, "A", PropertyKind::Object(Some(listener)));
    let fb = pb.add_field(class, "B", PropertyKind::Object(Some(listener)));
    let fdeaf = pb.add_field(class, "Deafened", PropertyKind::Object(Some(deaf_class)));

    let signature = pb.add_function(class, "Hit", 0);
    pb.add_param(signature, "Amount", PropertyKind::Int);

    // `<op> Hits <receiver>.OnHit`
    let edit = |s: &mut ScriptBuilder, op: Opcode, receiver: PropertyId| {
        let end = s.new_label();
        s.op(op).instance(hits).op(Opcode::Context).instance(receiver);
        s.context_guard(end, None).op(Opcode::InstanceDelegate).name(on_hit);
        s.bind(end);
    };

    let wire = pb.add_function(class, "Wire", 0);
    let mut s = ScriptBuilder::new();
    edit(&mut s, Opcode::AddMulticastDelegate, fa);
    edit(&mut s, Opcode::AddMulticastDelegate, fb);
    edit(&mut s, Opcode::AddMulticastDelegate, fa);
    edit(&mut s, Opcode::AddMulticastDelegate, fdeaf);
    s.ret_nothing();
    pb.set_script(wire, s.finish()?);

    let unwire_a = pb.add_function(class, "UnwireA", 0);
    let mut s = ScriptBuilder::new();
    edit(&mut s, Opcode::RemoveMulticastDelegate, fa);
    s.ret_nothing();
    pb.set_script(unwire_a, s.finish()?);

    let clear = pb.add_function(class, "Clear", 0);
    let mut s = ScriptBuilder::new();
    s.op(Opcode::ClearMulticastDelegate).instance(hits);
    s.ret_nothing();
    pb.set_script(clear, s.finish()?);

    let fire = pb.add_function(class, "Fire", 0);
    let fire_amount = pb.add_param(fire, "Amount", PropertyKind::Int);
    let mut s = ScriptBuilder::new();
    s.op(Opcode::CallMulticastDelegate)
        .function(signature)
        .instance(hits)
        .local(fire_amount)
        .end_parms();
    s.ret_nothing();
    pb.set_script(fire, s.finish()?);

    let bind = pb.add_function(class, "Bind", 0);
    let mut s = ScriptBuilder::new();
    s.op(Opcode::BindDelegate).name(on_hit).instance(single).instance(fa);
    s.ret_nothing();
    pb.set_script(bind, s.finish()?);

    let unbind = pb.add_function(class, "Unbind", 0);
    let mut s = ScriptBuilder::new();
    s.op(Opcode::BindDelegate).name(on_hit).instance(single).no_object();
    s.ret_nothing();
    pb.set_script(unbind, s.finish()?);

    let mut vm = Vm::new(pb.build()?);
    let emitter = vm.spawn(class)?;
    let a = vm.spawn(listener)?;
    let b = vm.spawn(listener)?;
    let deaf = vm.spawn(deaf_class)?;
    vm.set_field(emitter, "A", Value::Object(Some(a)))?;
    vm.set_field(emitter, "B", Value::Object(Some(b)))?;
    vm.set_field(emitter, "Deafened", Value::Object(Some(deaf)))?;
    Ok(Board {
        vm,
        emitter,
        a,
        b,
        deaf,
        wire,
        fire,
        unwire_a,
        clear,
        bind,
        unbind,
    })
}

fn hit(object: ObjectRef) -> ScriptDelegate {
    ScriptDelegate {
        object,
        function: Name::new("OnHit"),
    }
}

impl Board {
    fn run(&mut self, ctx: &mut ExecutionContext, function: FunctionId) -> Result<()> {
        let outcome = self.vm.process_event(ctx, self.emitter, function, &mut [])?;
        assert!(outcome.is_completed());
        Ok(())
    }

    fn fire(&mut self, ctx: &mut ExecutionContext, amount: i32) -> Result<()> {
        let outcome = self
            .vm
            .process_event(ctx, self.emitter, self.fire, &mut [Value::Int(amount)])?;
        assert!(outcome.is_completed());
        Ok(())
    }
}

#[test]
fn test_add_multicast_keeps_targets_unique() -> Result<()> {
    let mut board = board()?;
    let (mut ctx, _sink) = recording_ctx();
    board.run(&mut ctx, board.wire)?;

    assert_eq!(
        board.vm.field(board.emitter, "Hits")?,
        Value::MulticastDelegate(vec![hit(board.a), hit(board.b), hit(board.deaf)])
    );
    Ok(())
}

#[test]
fn test_call_multicast_runs_every_matching_target() -> Result<()> {
    let mut board = board()?;
    let (mut ctx, sink) = recording_ctx();
    board.run(&mut ctx, board.wire)?;
    board.fire(&mut ctx, 5)?;
    board.fire(&mut ctx, 2)?;

    assert_eq!(board.vm.field(board.a, "Total")?, Value::Int(7));
    assert_eq!(board.vm.field(board.b, "Total")?, Value::Int(7));
    // Signature mismatch: skipped with a warning.
    assert_eq!(board.vm.field(board.deaf, "Total")?, Value::Int(0));
    assert!(sink.exceptions().is_empty());
    Ok(())
}

#[test]
fn test_call_multicast_skips_destroyed_targets() -> Result<()> {
    let mut board = board()?;
    let (mut ctx, _sink) = recording_ctx();
    board.run(&mut ctx, board.wire)?;
    assert!(board.vm.destroy(board.b));
    board.fire(&mut ctx, 3)?;

    assert_eq!(board.vm.field(board.a, "Total")?, Value::Int(3));
    assert!(!board.vm.is_valid(board.b));
    Ok(())
}

#[test]
fn test_remove_and_clear_multicast() -> Result<()> {
    let mut board = board()?;
    let (mut ctx, _sink) = recording_ctx();
    board.run(&mut ctx, board.wire)?;
    board.run(&mut ctx, board.unwire_a)?;
    assert_eq!(
        board.vm.field(board.emitter, "Hits")?,
        Value::MulticastDelegate(vec![hit(board.b), hit(board.deaf)])
    );

    board.fire(&mut ctx, 4)?;
    assert_eq!(board.vm.field(board.a, "Total")?, Value::Int(0));
    assert_eq!(board.vm.field(board.b, "Total")?, Value::Int(4));

    board.run(&mut ctx, board.clear)?;
    assert_eq!(board.vm.field(board.emitter, "Hits")?, Value::MulticastDelegate(Vec::new()));
    board.fire(&mut ctx, 4)?;
    assert_eq!(board.vm.field(board.b, "Total")?, Value::Int(4));
    Ok(())
}

#[test]
fn test_bind_delegate_to_object_and_to_none() -> Result<()> {
    let mut board = board()?;
    let (mut ctx, _sink) = recording_ctx();
    board.run(&mut ctx, board.bind)?;
    assert_eq!(board.vm.field(board.emitter, "Single")?, Value::Delegate(Some(hit(board.a))));

    board.run(&mut ctx, board.unbind)?;
    assert_eq!(board.vm.field(board.emitter, "Single")?, Value::Delegate(None));
    Ok(())
}
