use quarry::engine::Engine;
use quarry::error::QuarryError;
use quarry::world::World;

fn setup(facts: &str) -> Engine {
    let engine = Engine::new(World::new());
    engine.assert_facts(facts).expect("facts should load");
    engine
}

fn rows(engine: &Engine, query: &str) -> Vec<Vec<String>> {
    engine.execute_collect(query, None).expect("query ok").rows
}

#[test]
fn asserting_counts_only_new_facts() {
    let engine = Engine::new(World::new());
    assert_eq!(engine.assert_facts("Likes(Alice, Pizza), Likes(Bob, Pizza)").unwrap(), 2);
    assert_eq!(
        engine.assert_facts("Likes(Alice, Pizza), Likes(Alice, Tea)").unwrap(),
        1,
        "the repeated fact is not new"
    );
}

#[test]
fn comments_and_trailing_commas_are_allowed() {
    let engine = setup(
        "
        // cuisine
        Likes(Alice, Pizza),
        Likes(Bob, Sushi),
        ",
    );
    assert_eq!(rows(&engine, "Likes(X, Sushi)"), vec![vec!["Bob"]]);
}

#[test]
fn retracting_removes_facts_and_ignores_unknown_names() {
    let engine = setup("Likes(Alice, Pizza), Likes(Bob, Pizza)");
    assert_eq!(engine.retract_facts("Likes(Alice, Pizza), Likes(Nobody, Pizza)").unwrap(), 1);
    assert_eq!(rows(&engine, "Likes(X, Pizza)"), vec![vec!["Bob"]]);
}

#[test]
fn deleting_an_entity_removes_every_reference() {
    let engine = setup("Likes(Alice, Pizza), Likes(Bob, Pizza), Cheap(Pizza)");
    assert!(engine.delete("Pizza").unwrap());
    assert!(!engine.delete("Pizza").unwrap(), "already gone");
    assert!(rows(&engine, "Likes(X, *)").is_empty());
    assert!(
        engine.execute_collect("Cheap(Pizza)", None).is_err(),
        "the name no longer resolves"
    );
}

#[test]
fn deleting_a_parent_deletes_its_children() {
    let engine = setup("ChildOf(Wheel, Car), ChildOf(Spoke, Wheel), Part(Wheel), Part(Spoke), Part(Door)");
    assert!(engine.delete("Car").unwrap());
    assert_eq!(rows(&engine, "Part(X)"), vec![vec!["Door"]], "the whole subtree is gone");
}

#[test]
fn symmetric_relationships_hold_both_ways() {
    let engine = setup("Symmetric(MarriedTo), MarriedTo(Ann, Ben)");
    assert_eq!(rows(&engine, "MarriedTo(Ben, X)"), vec![vec!["Ann"]]);
    engine.retract_facts("MarriedTo(Ben, Ann)").unwrap();
    assert!(rows(&engine, "MarriedTo(Ann, X)").is_empty(), "retraction is mirrored too");
}

#[test]
fn exclusive_relationships_keep_one_target() {
    let engine = setup("Exclusive(Color), Color(Car, Red), Color(Car, Blue)");
    assert_eq!(rows(&engine, "Color(Car, X)"), vec![vec!["Blue"]]);
}

#[test]
fn builtins_cannot_be_deleted() {
    let engine = Engine::new(World::new());
    let err = engine.delete("IsA").unwrap_err();
    assert!(matches!(err, QuarryError::Execution(_)), "got {err}");
}

#[test]
fn relationship_marker_allows_pairs_before_any_fact() {
    let engine = setup("Relationship(Orbits), Planet(Earth)");
    let res = engine.execute_collect("Orbits(X, Earth)", None).expect("Orbits is a relationship");
    assert_eq!(res.row_count, 0);
}
