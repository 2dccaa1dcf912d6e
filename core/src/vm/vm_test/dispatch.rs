use super::*;

struct Zoo {
    vm: Vm,
    zoo: ObjectRef,
    animal: ClassId,
    dog: ClassId,
    ask: FunctionId,
    ask_local: FunctionId,
    ask_missing: FunctionId,
}

fn constant_body(value: i32) -> Result<Vec<u8>> {
    let mut s = ScriptBuilder::new();
    s.ret().int(value);
    s.finish()
}

/// `Animal.Speak` returns 1, `Dog.Speak` overrides it with 2. `Zoo.Ask` stores `Pet.Speak()`
/// into `Heard`.
fn zoo() -> Result<Zoo> {
    let mut pb = ProgramBuilder::new();
    let speak_name = pb.intern("Speak");
    let fly_name = pb.intern("Fly");

    let animal = pb.add_class("Animal", None);
    let animal_speak = pb.add_function(animal, "Speak", 0);
    let speak_ret = pb.add_return(animal_speak, PropertyKind::Int);
    pb.set_script(animal_speak, constant_body(1)?);

    let dog = pb.add_class("Dog", Some(animal));
    let dog_speak = pb.add_function(dog, "Speak", 0);
    pb.add_return(dog_speak, PropertyKind::Int);
    pb.set_script(dog_speak, constant_body(2)?);

    let class = pb.add_class("Zoo", None);
    let pet = pb.add_field(class, "Pet", PropertyKind::Object(Some(animal)));
    let heard = pb.add_field(class, "Heard", PropertyKind::Int);

    let mut build_ask = |name: &str, call: &dyn Fn(&mut ScriptBuilder)| -> Result<FunctionId> {
        let f = pb.add_function(class, name, 0);
        let mut s = ScriptBuilder::new();
        let end = s.new_label();
        s.let_(heard).instance(heard).op(Opcode::Context).instance(pet);
        s.context_guard(end, Some(speak_ret));
        call(&mut s);
        s.end_parms();
        s.bind(end);
        s.ret_nothing();
        pb.set_script(f, s.finish()?);
        Ok(f)
    };
    let ask = build_ask("Ask", &|s| {
        s.call_virtual(speak_name);
    })?;
    let ask_local = build_ask("AskLocal", &|s| {
        s.call_local_virtual(speak_name);
    })?;
    let ask_missing = build_ask("AskMissing", &|s| {
        s.call_virtual(fly_name).int(3);
    })?;

    let mut vm = Vm::new(pb.build()?);
    let zoo = vm.spawn(class)?;
    Ok(Zoo {
        vm,
        zoo,
        animal,
        dog,
        ask,
        ask_local,
        ask_missing,
    })
}

fn ask(z: &mut Zoo, pet: ClassId, function: FunctionId, ctx: &mut ExecutionContext) -> Result<Value> {
    let pet = z.vm.spawn(pet)?;
    z.vm.set_field(z.zoo, "Pet", Value::Object(Some(pet)))?;
    z.vm.set_field(z.zoo, "Heard", Value::Int(-1))?;
    z.vm.process_event(ctx, z.zoo, function, &mut [])?;
    z.vm.field(z.zoo, "Heard")
}

#[test]
fn test_virtual_call_resolves_by_dynamic_class() -> Result<()> {
    let mut z = zoo()?;
    let (mut ctx, sink) = recording_ctx();
    let (animal, dog, f) = (z.animal, z.dog, z.ask);

    assert_eq!(ask(&mut z, animal, f, &mut ctx)?, Value::Int(1));
    assert_eq!(ask(&mut z, dog, f, &mut ctx)?, Value::Int(2));
    assert_eq!(ask(&mut z, dog, f, &mut ctx)?, Value::Int(2));
    assert!(sink.exceptions().is_empty());

    let stats = z.vm.call_site_stats();
    assert_eq!((stats.hits, stats.misses, stats.entries), (1, 2, 1));
    Ok(())
}

#[test]
fn test_local_virtual_call_resolves_override() -> Result<()> {
    let mut z = zoo()?;
    let (mut ctx, _sink) = recording_ctx();
    let (dog, f) = (z.dog, z.ask_local);
    assert_eq!(ask(&mut z, dog, f, &mut ctx)?, Value::Int(2));
    Ok(())
}

#[test]
fn test_unknown_virtual_function_is_non_fatal() -> Result<()> {
    let mut z = zoo()?;
    let (mut ctx, sink) = recording_ctx();
    let pet = z.vm.spawn(z.dog)?;
    z.vm.set_field(z.zoo, "Pet", Value::Object(Some(pet)))?;
    let outcome = z.vm.process_event(&mut ctx, z.zoo, z.ask_missing, &mut [])?;

    assert!(outcome.is_completed());
    assert_eq!(
        sink.descriptions(ScriptExceptionType::NonFatalError),
        vec![format!("Failed to find function Fly in {pet}")]
    );
    assert_eq!(z.vm.field(z.zoo, "Heard")?, Value::Int(0));
    assert_eq!(z.vm.call_site_stats().entries, 0);
    Ok(())
}
