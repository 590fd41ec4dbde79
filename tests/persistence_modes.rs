use quarry::engine::Engine;
use quarry::persist::{PersistenceMode, Persistor};
use quarry::world::World;
use quarry::FactStore;

const FACTS: &str = "
    Transitive(LocatedIn),
    LocatedIn(Paris, France), LocatedIn(France, Europe), LocatedIn(Louvre, Paris),
    Museum(Louvre)
";

fn engine_with(facts: &str) -> Engine {
    let engine = Engine::new(World::new());
    engine.assert_facts(facts).expect("facts should load");
    engine
}

fn restored(persistor: &Persistor) -> Engine {
    let mut world = World::new();
    persistor.restore(&mut world).expect("restore");
    Engine::new(world)
}

#[test]
fn in_memory_mode_round_trips_facts_and_traits() {
    let engine = engine_with(FACTS);
    let mut persistor = Persistor::new(PersistenceMode::InMemory).expect("db");
    assert!(persistor.saved_at().unwrap().is_none(), "nothing saved yet");

    let saved = persistor.save(&engine.read().unwrap()).expect("save");
    assert!(persistor.saved_at().unwrap().is_some(), "save is timestamped");

    let copy = restored(&persistor);
    let res = copy.execute_collect("LocatedIn(Louvre, X)", None).unwrap();
    assert_eq!(res.rows, vec![vec!["Paris"], vec!["France"], vec!["Europe"]], "transitivity survives");
    let res = copy.execute_collect("Museum(X)", None).unwrap();
    assert_eq!(res.rows, vec![vec!["Louvre"]]);
    assert_eq!(
        copy.read().unwrap().entity_count(),
        engine.read().unwrap().entity_count(),
        "same live entities"
    );
    assert!(saved >= 5, "every asserted fact was written");
}

#[test]
fn restored_worlds_keep_recycled_generations() {
    let engine = Engine::new(World::new());
    let ghost = {
        let mut world = engine.write().unwrap();
        world.named("Keeper");
        let ghost = world.named("Ghost");
        world.delete(ghost).unwrap();
        ghost
    };
    let mut persistor = Persistor::new(PersistenceMode::InMemory).expect("db");
    persistor.save(&engine.read().unwrap()).expect("save");

    let mut world = World::new();
    persistor.restore(&mut world).expect("restore");
    assert!(!world.is_alive(ghost), "the deleted entity stays dead");
    assert!(world.lookup("Keeper").is_some());
    let newcomer = world.entity();
    assert_eq!(newcomer.index(), ghost.index(), "the free index is reused");
    assert_eq!(newcomer.generation(), ghost.generation() + 1, "with the next generation");
}

#[test]
fn file_mode_survives_reopening() {
    let path = std::env::temp_dir().join(format!("quarry_test_{}.db", std::process::id()));
    let path = path.to_string_lossy().to_string();
    let _ = std::fs::remove_file(&path);

    {
        let engine = engine_with(FACTS);
        let mut persistor = Persistor::new(PersistenceMode::File(path.clone())).expect("db");
        persistor.save(&engine.read().unwrap()).expect("save");
    }
    let persistor = Persistor::new(PersistenceMode::File(path.clone())).expect("reopen");
    assert!(persistor.saved_at().unwrap().is_some(), "snapshot found after reopening");
    let copy = restored(&persistor);
    let res = copy.execute_collect("LocatedIn(X, Europe)", None).unwrap();
    assert_eq!(res.rows, vec![vec!["France"], vec!["Paris"], vec!["Louvre"]]);

    drop(persistor);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn saving_twice_replaces_the_snapshot() {
    let engine = engine_with("Museum(Louvre)");
    let mut persistor = Persistor::new(PersistenceMode::InMemory).expect("db");
    persistor.save(&engine.read().unwrap()).expect("first save");
    engine.retract_facts("Museum(Louvre)").unwrap();
    engine.assert_facts("Museum(Prado)").unwrap();
    persistor.save(&engine.read().unwrap()).expect("second save");

    let copy = restored(&persistor);
    let res = copy.execute_collect("Museum(X)", None).unwrap();
    assert_eq!(res.rows, vec![vec!["Prado"]], "only the latest snapshot is restored");
}
