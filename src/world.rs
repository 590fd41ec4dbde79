//! The in-memory fact store.
//!
//! Entities are grouped into archetype tables by the exact set of ids they
//! carry. Adding or removing an id moves the entity to the neighbouring table,
//! found through a cached edge where possible. An id index maps every id, and
//! the wildcard patterns `(R, *)`, `(*, O)` and `(*, *)` of every pair, to the
//! set of tables carrying it.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use bimap::BiMap;
use roaring::RoaringBitmap;
use tracing::{debug, trace};

use crate::construct::{
    is_trait_marker, Entity, EntityGenerator, EntityHasher, Id, OtherHasher, RelationTraits,
    ACYCLIC, BUILTINS, CHILD_OF, IS_A, TRANSITIVE, WILDCARD,
};
use crate::error::{QuarryError, Result};
use crate::store::{FactStore, Table, TableId, TableIter};
use crate::transitive;

#[derive(Clone, Copy, Debug)]
struct Location {
    table: TableId,
    row: usize,
}

#[derive(Debug, Default)]
struct Edges {
    add: HashMap<Id, TableId, OtherHasher>,
    remove: HashMap<Id, TableId, OtherHasher>,
}

pub struct World {
    generator: EntityGenerator,
    locations: Vec<Option<Location>>,
    tables: Vec<Table>,
    edges: Vec<Edges>,
    table_index: HashMap<Vec<Id>, TableId, OtherHasher>,
    id_index: HashMap<Id, RoaringBitmap, OtherHasher>,
    names: BiMap<String, Entity>,
    traits: HashMap<Entity, RelationTraits, EntityHasher>,
    predicates: HashSet<Entity, EntityHasher>,
}

impl World {
    pub const ROOT: TableId = TableId(0);

    pub fn new() -> Self {
        let mut world = World {
            generator: EntityGenerator::new(),
            locations: vec![None],
            tables: Vec::new(),
            edges: Vec::new(),
            table_index: HashMap::default(),
            id_index: HashMap::default(),
            names: BiMap::new(),
            traits: HashMap::default(),
            predicates: HashSet::default(),
        };
        world.table_for(Vec::new());
        for (builtin, name) in BUILTINS {
            let entity = world.entity();
            debug_assert_eq!(entity, builtin);
            world.names.insert(name.to_string(), entity);
        }
        // IsA is the subtype relationship; ChildOf forms trees
        world.insert_trait(IS_A, TRANSITIVE);
        world.insert_trait(IS_A, ACYCLIC);
        world.insert_trait(CHILD_OF, ACYCLIC);
        world
    }

    fn insert_trait(&mut self, relationship: Entity, marker: Entity) {
        self.insert_id(relationship, Id::Entity(marker));
        self.traits.entry(relationship).or_default().set(marker, true);
    }

    // ------------- Entities -------------
    pub fn entity(&mut self) -> Entity {
        let entity = self.generator.generate();
        self.place(entity);
        entity
    }

    fn place(&mut self, entity: Entity) {
        let index = entity.index() as usize;
        if index >= self.locations.len() {
            self.locations.resize(index + 1, None);
        }
        let row = self.tables[Self::ROOT.0 as usize].push(entity);
        self.locations[index] = Some(Location { table: Self::ROOT, row });
    }

    /// Looks up an entity by name, creating it when the name is unknown.
    pub fn named(&mut self, name: &str) -> Entity {
        if let Some(entity) = self.names.get_by_left(name) {
            return *entity;
        }
        let entity = self.entity();
        self.names.insert(name.to_string(), entity);
        entity
    }

    pub fn set_name(&mut self, entity: Entity, name: &str) -> Result<()> {
        self.ensure_alive(entity)?;
        match self.names.get_by_left(name) {
            Some(owner) if *owner == entity => return Ok(()),
            Some(owner) => {
                return Err(QuarryError::Execution(format!(
                    "name '{}' is already used by {}",
                    name, owner
                )));
            }
            None => (),
        }
        self.names.remove_by_right(&entity);
        self.names.insert(name.to_string(), entity);
        Ok(())
    }

    /// Number of live entities, builtins included.
    pub fn entity_count(&self) -> usize {
        self.generator.len()
    }

    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.generator.iter()
    }

    pub(crate) fn generator(&self) -> &EntityGenerator {
        &self.generator
    }

    fn ensure_alive(&self, entity: Entity) -> Result<()> {
        if self.generator.check(entity) {
            Ok(())
        } else {
            Err(QuarryError::StaleEntity(entity))
        }
    }

    /// Objects of `relationship` pairs directly carried by `entity`.
    pub fn targets(&self, entity: Entity, relationship: Entity) -> Vec<Entity> {
        self.ids_of(entity)
            .iter()
            .filter(|id| id.matches(Id::pair(relationship, WILDCARD)))
            .filter_map(|id| id.second())
            .collect()
    }

    // ------------- Facts -------------
    pub fn add_pair(&mut self, entity: Entity, relationship: Entity, object: Entity) -> Result<bool> {
        self.add(entity, Id::pair(relationship, object))
    }

    pub fn remove_pair(&mut self, entity: Entity, relationship: Entity, object: Entity) -> Result<bool> {
        self.remove(entity, Id::pair(relationship, object))
    }

    /// Attaches `id` to `entity`. Returns false when the entity already carried it.
    pub fn add(&mut self, entity: Entity, id: Id) -> Result<bool> {
        self.ensure_alive(entity)?;
        if id.is_wildcard() {
            return Err(QuarryError::Execution(format!("cannot add wildcard id {}", id)));
        }
        self.ensure_alive(id.first())?;
        if let Some(object) = id.second() {
            self.ensure_alive(object)?;
        }
        if self.has(entity, id) {
            return Ok(false);
        }
        match id {
            Id::Pair(relationship, object) => {
                let traits = self.relationship_traits(relationship);
                if traits.acyclic
                    && (object == entity || transitive::reaches(&*self, relationship, object, entity))
                {
                    return Err(QuarryError::Cycle { relationship, subject: entity, object });
                }
                if traits.exclusive {
                    for previous in self.targets(entity, relationship) {
                        self.remove_id(entity, Id::pair(relationship, previous));
                    }
                }
                self.insert_id(entity, id);
                self.predicates.insert(relationship);
                if traits.symmetric && object != entity && !self.has(object, Id::pair(relationship, entity)) {
                    self.insert_id(object, Id::pair(relationship, entity));
                }
            }
            Id::Entity(marker) => {
                self.insert_id(entity, id);
                if is_trait_marker(marker) {
                    self.traits.entry(entity).or_default().set(marker, true);
                }
            }
        }
        Ok(true)
    }

    /// Detaches `id` (or every id matching a wildcard pattern) from `entity`.
    pub fn remove(&mut self, entity: Entity, id: Id) -> Result<bool> {
        self.ensure_alive(entity)?;
        let matching: Vec<Id> = self.ids_of(entity).iter().copied().filter(|own| own.matches(id)).collect();
        if matching.is_empty() {
            return Ok(false);
        }
        for id in matching {
            self.remove_id(entity, id);
            match id {
                Id::Pair(relationship, object) => {
                    let traits = self.relationship_traits(relationship);
                    if traits.symmetric && self.has(object, Id::pair(relationship, entity)) {
                        self.remove_id(object, Id::pair(relationship, entity));
                    }
                }
                Id::Entity(marker) => {
                    if is_trait_marker(marker) {
                        if let Entry::Occupied(mut traits) = self.traits.entry(entity) {
                            traits.get_mut().set(marker, false);
                            if traits.get().is_empty() {
                                traits.remove();
                            }
                        }
                    }
                }
            }
        }
        Ok(true)
    }

    /// Deletes an entity. Ids referring to it are removed from every other
    /// entity and its `ChildOf` children are deleted with it. Returns false
    /// when the entity was already gone.
    pub fn delete(&mut self, entity: Entity) -> Result<bool> {
        if !self.generator.check(entity) {
            return Ok(false);
        }
        if BUILTINS.iter().any(|(builtin, _)| *builtin == entity) {
            return Err(QuarryError::Execution(format!("cannot delete builtin {}", self.display(entity))));
        }
        let mut doomed = vec![entity];
        let mut order = Vec::new();
        while let Some(next) = doomed.pop() {
            if order.contains(&next) {
                continue;
            }
            order.push(next);
            for table in self.tables_with(Id::pair(CHILD_OF, next)).collect::<Vec<_>>() {
                doomed.extend_from_slice(self.tables[table.0 as usize].entities());
            }
        }
        // children first, so their parents are still alive while they go
        for doomed in order.into_iter().rev() {
            self.delete_one(doomed);
        }
        Ok(true)
    }

    fn delete_one(&mut self, entity: Entity) {
        debug!(entity = %entity, name = ?self.name_of(entity), "deleting entity");
        if let Some(location) = self.locations[entity.index() as usize].take() {
            let moved = self.tables[location.table.0 as usize].swap_remove(location.row);
            if let Some(moved) = moved {
                if let Some(moved_location) = self.locations[moved.index() as usize].as_mut() {
                    moved_location.row = location.row;
                }
            }
        }
        self.generator.release(entity);
        self.names.remove_by_right(&entity);
        self.traits.remove(&entity);
        self.predicates.remove(&entity);

        let keys = [Id::Entity(entity), Id::pair(entity, WILDCARD), Id::pair(WILDCARD, entity)];
        let mut referencing = RoaringBitmap::new();
        for key in keys {
            if let Some(tables) = self.id_index.get(&key) {
                referencing |= tables;
            }
        }
        for table in referencing.iter().map(TableId) {
            let holders: Vec<Entity> = self.tables[table.0 as usize].entities().to_vec();
            if holders.is_empty() {
                continue;
            }
            let kept: Vec<Id> = self.tables[table.0 as usize]
                .ids()
                .iter()
                .copied()
                .filter(|id| !id.references(entity))
                .collect();
            let destination = self.table_for(kept);
            for holder in holders {
                self.move_entity(holder, destination);
            }
        }
    }

    /// Applies deferred commands in order. Commands aimed at entities that are
    /// no longer alive are skipped. Returns the number of commands applied.
    pub fn apply(&mut self, queue: CommandQueue) -> Result<usize> {
        let mut applied = 0;
        for command in queue.commands {
            let target = command.target();
            if !self.generator.check(target) {
                debug!(entity = %target, ?command, "skipping command for stale entity");
                continue;
            }
            match command {
                Command::Add(entity, id) => {
                    self.add(entity, id)?;
                }
                Command::Remove(entity, id) => {
                    self.remove(entity, id)?;
                }
                Command::Delete(entity) => {
                    self.delete(entity)?;
                }
                Command::SetName(entity, name) => {
                    self.set_name(entity, &name)?;
                }
            }
            applied += 1;
        }
        Ok(applied)
    }

    // ------------- Tables -------------
    fn insert_id(&mut self, entity: Entity, id: Id) {
        let Some(location) = self.locations[entity.index() as usize] else {
            return;
        };
        let destination = self.neighbour(location.table, id, true);
        self.move_entity(entity, destination);
    }

    fn remove_id(&mut self, entity: Entity, id: Id) {
        let Some(location) = self.locations[entity.index() as usize] else {
            return;
        };
        let destination = self.neighbour(location.table, id, false);
        self.move_entity(entity, destination);
    }

    fn neighbour(&mut self, from: TableId, id: Id, add: bool) -> TableId {
        let edges = &self.edges[from.0 as usize];
        let cached = if add { edges.add.get(&id) } else { edges.remove.get(&id) };
        if let Some(table) = cached {
            return *table;
        }
        let mut ids: Vec<Id> = self.tables[from.0 as usize].ids().to_vec();
        if add {
            ids.push(id);
        } else {
            ids.retain(|own| *own != id);
        }
        let to = self.table_for(ids);
        let edges = &mut self.edges[from.0 as usize];
        if add {
            edges.add.insert(id, to);
        } else {
            edges.remove.insert(id, to);
        }
        to
    }

    fn table_for(&mut self, mut ids: Vec<Id>) -> TableId {
        ids.sort_unstable();
        ids.dedup();
        if let Some(table) = self.table_index.get(&ids) {
            return *table;
        }
        let table = TableId(self.tables.len() as u32);
        trace!(table = %table, ids = ?ids, "creating table");
        for id in &ids {
            self.id_index.entry(*id).or_default().insert(table.0);
            for key in id.wildcard_keys() {
                self.id_index.entry(key).or_default().insert(table.0);
            }
        }
        self.tables.push(Table::new(table, ids.clone()));
        self.edges.push(Edges::default());
        self.table_index.insert(ids, table);
        table
    }

    fn move_entity(&mut self, entity: Entity, destination: TableId) {
        let index = entity.index() as usize;
        let Some(location) = self.locations[index] else {
            return;
        };
        if location.table == destination {
            return;
        }
        if let Some(moved) = self.tables[location.table.0 as usize].swap_remove(location.row) {
            if let Some(moved_location) = self.locations[moved.index() as usize].as_mut() {
                moved_location.row = location.row;
            }
        }
        let row = self.tables[destination.0 as usize].push(entity);
        self.locations[index] = Some(Location { table: destination, row });
    }

    // ------------- Restore support -------------
    /// Recreates an entity record with an exact index and generation.
    pub(crate) fn restore_entity(&mut self, entity: Entity, alive: bool, name: Option<&str>) {
        if self.generator.check(entity) {
            return;
        }
        if alive {
            self.generator.retain(entity);
            self.place(entity);
            if let Some(name) = name {
                self.names.insert(name.to_string(), entity);
            }
        } else {
            self.generator.retire(entity);
        }
    }

    /// Re-attaches a stored fact without applying relationship side effects.
    pub(crate) fn restore_fact(&mut self, entity: Entity, id: Id) -> Result<()> {
        self.ensure_alive(entity)?;
        if self.has(entity, id) {
            return Ok(());
        }
        self.insert_id(entity, id);
        match id {
            Id::Pair(relationship, _) => {
                self.predicates.insert(relationship);
            }
            Id::Entity(marker) => {
                if is_trait_marker(marker) {
                    self.traits.entry(entity).or_default().set(marker, true);
                }
            }
        }
        Ok(())
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl FactStore for World {
    fn has(&self, entity: Entity, id: Id) -> bool {
        match self.location(entity) {
            Some((table, _)) => self.tables[table.0 as usize].has(id),
            None => false,
        }
    }
    fn relationship_traits(&self, predicate: Entity) -> RelationTraits {
        self.traits.get(&predicate).copied().unwrap_or_default()
    }
    fn tables_with(&self, id: Id) -> TableIter<'_> {
        TableIter::new(self.id_index.get(&id))
    }
    fn is_alive(&self, entity: Entity) -> bool {
        self.generator.check(entity)
    }
    fn table(&self, table: TableId) -> Option<&Table> {
        self.tables.get(table.0 as usize)
    }
    fn table_count(&self) -> usize {
        self.tables.len()
    }
    fn location(&self, entity: Entity) -> Option<(TableId, usize)> {
        if !self.generator.check(entity) {
            return None;
        }
        self.locations
            .get(entity.index() as usize)
            .copied()
            .flatten()
            .map(|location| (location.table, location.row))
    }
    fn lookup(&self, name: &str) -> Option<Entity> {
        self.names.get_by_left(name).copied()
    }
    fn name_of(&self, entity: Entity) -> Option<&str> {
        self.names.get_by_right(&entity).map(String::as_str)
    }
    fn is_relationship(&self, entity: Entity) -> bool {
        if entity == WILDCARD || is_trait_marker(entity) || !self.generator.check(entity) {
            return false;
        }
        self.relationship_traits(entity).marks_relationship() || self.predicates.contains(&entity)
    }
}

// ------------- Deferred commands -------------
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Add(Entity, Id),
    Remove(Entity, Id),
    Delete(Entity),
    SetName(Entity, String),
}

impl Command {
    fn target(&self) -> Entity {
        match self {
            Command::Add(e, _) | Command::Remove(e, _) | Command::Delete(e) | Command::SetName(e, _) => *e,
        }
    }
}

/// Structural changes recorded while cursors borrow the world, applied
/// afterwards with [`World::apply`].
#[derive(Clone, Debug, Default)]
pub struct CommandQueue {
    commands: Vec<Command>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add(&mut self, entity: Entity, id: Id) -> &mut Self {
        self.commands.push(Command::Add(entity, id));
        self
    }
    pub fn add_pair(&mut self, entity: Entity, relationship: Entity, object: Entity) -> &mut Self {
        self.add(entity, Id::pair(relationship, object))
    }
    pub fn remove(&mut self, entity: Entity, id: Id) -> &mut Self {
        self.commands.push(Command::Remove(entity, id));
        self
    }
    pub fn delete(&mut self, entity: Entity) -> &mut Self {
        self.commands.push(Command::Delete(entity));
        self
    }
    pub fn set_name(&mut self, entity: Entity, name: &str) -> &mut Self {
        self.commands.push(Command::SetName(entity, name.to_string()));
        self
    }
    pub fn len(&self) -> usize {
        self.commands.len()
    }
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entities_move_between_tables() {
        let mut world = World::new();
        let apple = world.named("Apple");
        let red = world.named("Red");
        let fruit = world.named("Fruit");
        world.add(apple, Id::Entity(red)).unwrap();
        world.add(apple, Id::Entity(fruit)).unwrap();
        assert!(world.has(apple, Id::Entity(red)));
        assert!(world.has(apple, Id::Entity(fruit)));
        world.remove(apple, Id::Entity(red)).unwrap();
        assert!(!world.has(apple, Id::Entity(red)));
        assert_eq!(world.ids_of(apple), &[Id::Entity(fruit)]);
    }

    #[test]
    fn symmetric_pairs_are_mirrored() {
        let mut world = World::new();
        let married = world.named("MarriedTo");
        world.add(married, Id::Entity(crate::construct::SYMMETRIC)).unwrap();
        let a = world.named("Ann");
        let b = world.named("Ben");
        world.add_pair(a, married, b).unwrap();
        assert!(world.has(b, Id::pair(married, a)));
        world.remove_pair(b, married, a).unwrap();
        assert!(!world.has(a, Id::pair(married, b)));
    }

    #[test]
    fn exclusive_pairs_replace_previous_target() {
        let mut world = World::new();
        let color = world.named("Color");
        world.add(color, Id::Entity(crate::construct::EXCLUSIVE)).unwrap();
        let car = world.named("Car");
        let red = world.named("Red");
        let blue = world.named("Blue");
        world.add_pair(car, color, red).unwrap();
        world.add_pair(car, color, blue).unwrap();
        assert_eq!(world.targets(car, color), vec![blue]);
    }

    #[test]
    fn acyclic_relationship_rejects_cycles() {
        let mut world = World::new();
        let a = world.named("A");
        let b = world.named("B");
        world.add_pair(a, CHILD_OF, b).unwrap();
        let err = world.add_pair(b, CHILD_OF, a).unwrap_err();
        assert!(matches!(err, QuarryError::Cycle { .. }));
        assert!(!world.has(b, Id::pair(CHILD_OF, a)), "store must be unchanged");
    }

    #[test]
    fn deleting_parent_deletes_children_and_references() {
        let mut world = World::new();
        let parent = world.named("Parent");
        let child = world.named("Child");
        let likes = world.named("Likes");
        let fan = world.named("Fan");
        world.add_pair(child, CHILD_OF, parent).unwrap();
        world.add_pair(fan, likes, parent).unwrap();
        assert!(world.delete(parent).unwrap());
        assert!(!world.is_alive(parent));
        assert!(!world.is_alive(child));
        assert!(world.ids_of(fan).is_empty());
        assert_eq!(world.lookup("Parent"), None);
    }
}
