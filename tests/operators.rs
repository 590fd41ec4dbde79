use quarry::engine::Engine;
use quarry::world::World;
use quarry::{FactStore, Query};

const SOLAR: &str = "
    Planet(Earth), Planet(Mars), Inhabited(Earth),
    Orbits(Luna, Earth)
";

fn setup(facts: &str) -> Engine {
    let engine = Engine::new(World::new());
    engine.assert_facts(facts).expect("facts should load");
    engine
}

#[test]
fn not_removes_entities_carrying_the_term() {
    let engine = setup(SOLAR);
    let res = engine.execute_collect("Planet(X), !Inhabited(X)", None).expect("query ok");
    assert_eq!(res.rows, vec![vec!["Mars"]]);
}

#[test]
fn not_may_be_written_before_the_term_binding_its_variable() {
    let engine = setup(SOLAR);
    let res = engine.execute_collect("!Inhabited(X), Planet(X)", None).expect("query ok");
    assert_eq!(res.rows, vec![vec!["Mars"]], "negation is evaluated once X is bound");
}

#[test]
fn optional_keeps_rows_without_a_match() {
    let engine = setup("Planet(Earth), Planet(Mars), Orbits(Luna, Earth)");
    let res = engine.execute_collect("Planet(X), ?Orbits(Y, X)", None).expect("query ok");
    assert_eq!(res.columns, vec!["X", "Y"]);
    assert_eq!(
        res.rows,
        vec![vec!["Earth", "Luna"], vec!["Mars", ""]],
        "Mars has no moon, its Y stays unbound"
    );
}

#[test]
fn or_groups_report_each_entity_once() {
    let engine = setup("Planet(Earth), Planet(Pluto), Dwarf(Pluto), Moon(Luna), Comet(Halley)");
    let res = engine
        .execute_collect("Planet(X) || Dwarf(X) || Moon(X)", None)
        .expect("query ok");
    assert_eq!(
        res.rows,
        vec![vec!["Earth"], vec!["Pluto"], vec!["Luna"]],
        "Pluto matches two alternatives but is reported once"
    );
}

#[test]
fn or_terms_record_which_alternative_matched() {
    let engine = setup("Planet(Earth), Moon(Luna)");
    let world = engine.read().unwrap();
    let moon = world.lookup("Moon").unwrap();
    let query = Query::parse(&*world, "Planet(.) || Moon(.)").expect("compiles");
    let rows: Vec<_> = query.iter(&*world).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].id(0), None, "the first alternative did not match Luna");
    assert_eq!(rows[1].id(1), Some(quarry::construct::Id::Entity(moon)));
}

#[test]
fn empty_source_terms_match_once() {
    let engine = setup(SOLAR);
    let res = engine.execute_collect("Planet()", None).expect("query ok");
    assert_eq!(res.row_count, 1);
    assert!(res.columns.is_empty());
    let res = engine.execute_collect("Planet(), Inhabited(X)", None).expect("query ok");
    assert_eq!(res.rows, vec![vec!["Earth"]]);
}

#[test]
fn wildcard_objects_match_every_target() {
    let engine = setup("Likes(Alice, Pizza), Likes(Alice, Sushi), Likes(Bob, Tea)");
    let res = engine.execute_collect("Likes(Alice, *)", None).expect("query ok");
    assert_eq!(res.row_count, 2, "one row per matching pair");
    let res = engine.execute_collect("Likes(X, *)", None).expect("query ok");
    assert_eq!(res.rows, vec![vec!["Alice"], vec!["Alice"], vec!["Bob"]]);
}

#[test]
fn anonymous_variables_are_not_reported() {
    let engine = setup("Likes(Alice, Pizza), Likes(Alice, Sushi), Likes(Bob, Tea)");
    let res = engine.execute_collect("Likes(X, $)", None).expect("query ok");
    assert_eq!(res.columns, vec!["X"]);
    assert_eq!(res.row_count, 3);
}

#[test]
fn predicate_variables_enumerate_relationships() {
    let engine = setup("Likes(Alice, Pizza), Owns(Alice, Car), Likes(Bob, Tea)");
    let res = engine.execute_collect("_R(Alice, X)", None).expect("query ok");
    assert_eq!(res.columns, vec!["R", "X"]);
    assert_eq!(res.rows, vec![vec!["Likes", "Pizza"], vec!["Owns", "Car"]]);
}

#[test]
fn pair_shorthand_applies_to_the_result_entity() {
    let engine = setup("Likes(Alice, Pizza), Likes(Bob, Tea)");
    let res = engine.execute_collect("(Likes, Tea)", None).expect("query ok");
    assert_eq!(res.columns, vec!["."]);
    assert_eq!(res.rows, vec![vec!["Bob"]]);
}
