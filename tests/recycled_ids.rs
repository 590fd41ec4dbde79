use quarry::construct::Id;
use quarry::error::CompileError;
use quarry::term::{Term, TermId};
use quarry::world::World;
use quarry::{compile, iterate, FactStore, Query};

#[test]
fn recycled_index_never_matches_the_old_entity() {
    let mut world = World::new();
    let haunted = world.named("Haunted");
    let ghost = world.named("Ghost");
    world.add(ghost, Id::Entity(haunted)).unwrap();

    let terms = vec![Term::new(TermId::Entity(haunted)).subject(TermId::Entity(ghost))];
    let query = compile(&world, &terms).expect("compiles while the entity is alive");
    assert_eq!(iterate(&query, &world).count(), 1);

    assert!(world.delete(ghost).unwrap());
    let newcomer = world.entity();
    assert_eq!(newcomer.index(), ghost.index(), "index is recycled");
    assert_ne!(newcomer, ghost, "generation differs");
    world.add(newcomer, Id::Entity(haunted)).unwrap();

    let mut cursor = iterate(&query, &world);
    assert!(cursor.advance().is_none(), "the old reference must not match the newcomer");
    assert_eq!(cursor.skipped(), 1, "the stale reference is counted, not raised");

    let fresh = Query::parse(&world, "Haunted(X)").unwrap();
    let x = fresh.find_variable("X").unwrap();
    let found: Vec<_> = fresh.iter(&world).filter_map(|row| row.get(x)).collect();
    assert_eq!(found, vec![newcomer]);
}

#[test]
fn compiling_against_a_dead_entity_fails() {
    let mut world = World::new();
    let tag = world.named("Tag");
    let gone = world.entity();
    world.delete(gone).unwrap();
    let terms = vec![Term::new(TermId::Entity(tag)).subject(TermId::Entity(gone))];
    let err = compile(&world, &terms).unwrap_err();
    assert!(matches!(err, CompileError::UnresolvedIdentifier { .. }), "got {err}");
}

#[test]
fn deleted_names_are_released() {
    let mut world = World::new();
    let old = world.named("Phoenix");
    world.delete(old).unwrap();
    let reborn = world.named("Phoenix");
    assert_ne!(old, reborn);
    assert!(!world.is_alive(old));
}
