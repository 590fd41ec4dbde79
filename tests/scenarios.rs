use quarry::construct::Id;
use quarry::engine::Engine;
use quarry::world::World;
use quarry::Query;

fn setup(facts: &str) -> Engine {
    let engine = Engine::new(World::new());
    engine.assert_facts(facts).expect("facts should load");
    engine
}

#[test]
fn sentient_supertype_yields_each_subtype() {
    let engine = setup("IsA(Dog, Animal), IsA(Cat, Animal), Sentient(Animal)");
    let res = engine.execute_collect("Sentient(X), IsA(Y, X)", None).expect("query ok");
    assert_eq!(res.columns, vec!["X", "Y"]);
    assert_eq!(
        res.rows,
        vec![vec!["Animal", "Dog"], vec!["Animal", "Cat"]],
        "one row per subtype, in declaration order"
    );
}

#[test]
fn sentient_rock_has_no_rows() {
    let engine = setup("IsA(Dog, Animal), Sentient(Animal), Mineral(Rock)");
    let res = engine.execute_collect("Sentient(Rock)", None).expect("query ok");
    assert_eq!(res.row_count, 0, "Rock is not sentient");
    let res = engine.execute_collect("Sentient(Animal)", None).expect("query ok");
    assert_eq!(res.row_count, 1, "Animal is");
    assert!(res.columns.is_empty(), "ground queries have no columns");
}

#[test]
fn two_tags_on_one_entity_match_once() {
    let mut world = World::new();
    let a = world.named("A");
    let b = world.named("B");
    let thing = world.entity();
    world.add(thing, Id::Entity(a)).unwrap();
    world.add(thing, Id::Entity(b)).unwrap();

    let query = Query::parse(&world, "A(.), B(.)").expect("compiles");
    let rows: Vec<_> = query.iter(&world).map(|row| row.entity()).collect();
    assert_eq!(rows, vec![Some(thing)], "exactly one row for the entity");

    world.remove(thing, Id::Entity(b)).unwrap();
    let rows = query.iter(&world).count();
    assert_eq!(rows, 0, "a fresh iteration no longer sees the entity");
}
