use quarry::engine::Engine;
use quarry::error::{CompileError, QuarryError};
use quarry::parser::parse_terms;
use quarry::world::World;
use quarry::Query;

fn setup(facts: &str) -> Engine {
    let engine = Engine::new(World::new());
    engine.assert_facts(facts).expect("facts should load");
    engine
}

fn compile_err(world: &World, text: &str) -> CompileError {
    match Query::parse(world, text) {
        Ok(query) => panic!("'{text}' should not compile, got\n{query}"),
        Err(e) => e,
    }
}

#[test]
fn unknown_names_are_unresolved() {
    let engine = setup("Planet(Earth)");
    let world = engine.read().unwrap();
    let err = compile_err(&world, "Planet(X), Moon(X)");
    assert_eq!(err, CompileError::UnresolvedIdentifier { name: "Moon".into(), col: 12 });
}

#[test]
fn tags_cannot_be_used_as_relationships() {
    let engine = setup("Red(Car), Blue(Sky)");
    let world = engine.read().unwrap();
    let err = compile_err(&world, "Red(Car, Blue)");
    assert!(matches!(err, CompileError::NotARelationship { ref name, .. } if name == "Red"), "got {err}");
}

#[test]
fn terms_take_at_most_two_arguments() {
    let err = parse_terms("Between(Alpha, Beta, Gamma)").unwrap_err();
    assert!(matches!(err, CompileError::TooManyArguments { count: 3, .. }), "got {err}");
}

#[test]
fn or_groups_need_a_shared_subject() {
    let engine = setup("Planet(Earth), Moon(Luna)");
    let world = engine.read().unwrap();
    let err = compile_err(&world, "Planet(X) || Moon(Y)");
    assert!(matches!(err, CompileError::InvalidOr { .. }), "got {err}");
    let err = compile_err(&world, "Planet(X) || Moon(Luna)");
    assert!(matches!(err, CompileError::InvalidOr { .. }), "variable and literal subjects differ");
}

#[test]
fn or_groups_cannot_mix_operators() {
    let engine = setup("Planet(Earth), Moon(Luna)");
    let world = engine.read().unwrap();
    let err = compile_err(&world, "!Planet(X) || Moon(X)");
    assert!(matches!(err, CompileError::InvalidOr { .. }), "got {err}");
    let err = compile_err(&world, "Planet(X) || ?Moon(X)");
    assert!(matches!(err, CompileError::InvalidOr { .. }), "got {err}");
    let err = compile_err(&world, "Planet() || Moon()");
    assert!(matches!(err, CompileError::InvalidOr { .. }), "got {err}");
}

#[test]
fn or_groups_need_the_same_access() {
    let engine = setup("Planet(Earth), Moon(Luna)");
    let world = engine.read().unwrap();
    let err = compile_err(&world, "[in] Planet(X) || [out] Moon(X)");
    assert!(matches!(err, CompileError::InvalidOr { .. }), "got {err}");
}

#[test]
fn syntax_errors_carry_a_position() {
    let engine = setup("Likes(Alice, Bob)");
    let world = engine.read().unwrap();
    let err = compile_err(&world, "Likes(., Bob");
    assert_eq!(err.column(), Some(13), "reported at the end of input");
    assert!(matches!(err, CompileError::Syntax { line: 1, .. }));
}

#[test]
fn fact_scripts_must_be_ground() {
    let engine = Engine::new(World::new());
    let err = engine.assert_facts("Likes(Alice, Pizza), Likes(X, Pizza)").unwrap_err();
    assert!(
        matches!(err, QuarryError::Compile(CompileError::NotGround { .. })),
        "got {err}"
    );
    let res = engine.execute_collect("Likes(Y, Pizza)", None);
    assert!(res.is_err(), "the script was rejected as a whole, Likes was never created");
}

#[test]
fn failed_compiles_leave_the_store_untouched() {
    let engine = setup("Planet(Earth)");
    let world = engine.read().unwrap();
    let before = world.entity_count();
    let _ = compile_err(&world, "Planet(X), Unknown(X)");
    assert_eq!(world.entity_count(), before);
}
