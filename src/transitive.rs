//! Closure over transitive relationships.
//!
//! Both directions are breadth first, nearest first, and keep roaring visited
//! sets keyed on entity index (and table id when walking down), so cyclic or
//! diamond shaped graphs never repeat a result or loop.

use std::collections::VecDeque;

use roaring::RoaringBitmap;
use tracing::trace;

use crate::construct::{Entity, Id, IS_A, WILDCARD};
use crate::store::{FactStore, TableId};

/// Objects reachable from a subject: `R(subject, o1)`, `R(o1, o2)`, ...
pub struct Supersets<'s> {
    store: &'s dyn FactStore,
    relationship: Entity,
    frontier: VecDeque<Entity>,
    ready: VecDeque<Entity>,
    visited: RoaringBitmap,
}

impl<'s> Supersets<'s> {
    /// With `reflexive` the subject itself is yielded first.
    pub fn new(store: &'s dyn FactStore, relationship: Entity, subject: Entity, reflexive: bool) -> Self {
        let mut supersets = Self {
            store,
            relationship,
            frontier: VecDeque::from([subject]),
            ready: VecDeque::new(),
            visited: RoaringBitmap::new(),
        };
        if reflexive {
            supersets.visited.insert(subject.index());
            supersets.frontier.clear();
            supersets.ready.push_back(subject);
        }
        supersets
    }
}

impl Iterator for Supersets<'_> {
    type Item = Entity;
    fn next(&mut self) -> Option<Entity> {
        loop {
            if let Some(object) = self.ready.pop_front() {
                self.frontier.push_back(object);
                return Some(object);
            }
            let source = self.frontier.pop_front()?;
            let store = self.store;
            let pattern = Id::pair(self.relationship, WILDCARD);
            for id in store.ids_of(source).iter().filter(|id| id.matches(pattern)) {
                if let Some(object) = id.second() {
                    if self.visited.insert(object.index()) {
                        self.ready.push_back(object);
                    }
                }
            }
        }
    }
}

/// Objects reachable from a subject through its own facts and then, when
/// inheriting, through those of its `IsA` ancestors, nearest first. Each
/// object comes once, with the entity whose facts start its chain.
pub struct Reachable<'s> {
    store: &'s dyn FactStore,
    relationship: Entity,
    holder: Entity,
    current: Supersets<'s>,
    ancestors: Option<Supersets<'s>>,
    reported: RoaringBitmap,
}

impl<'s> Reachable<'s> {
    pub fn new(store: &'s dyn FactStore, relationship: Entity, subject: Entity, reflexive: bool, inherit: bool) -> Self {
        Self {
            store,
            relationship,
            holder: subject,
            current: Supersets::new(store, relationship, subject, reflexive),
            ancestors: inherit.then(|| Supersets::new(store, IS_A, subject, false)),
            reported: RoaringBitmap::new(),
        }
    }
}

impl Iterator for Reachable<'_> {
    type Item = (Entity, Entity);
    fn next(&mut self) -> Option<(Entity, Entity)> {
        loop {
            for object in self.current.by_ref() {
                if self.reported.insert(object.index()) {
                    return Some((object, self.holder));
                }
            }
            let ancestor = self.ancestors.as_mut()?.next()?;
            trace!(relationship = %self.relationship, ancestor = %ancestor, "closure through ancestor");
            self.holder = ancestor;
            self.current = Supersets::new(self.store, self.relationship, ancestor, false);
        }
    }
}

/// Tables of subjects that reach an object: tables with `R(_, object)`, then
/// tables with `R(_, s)` for every subject `s` found so far, level by level.
///
/// When inheriting, tables with `IsA(_, s)` are walked too: their members
/// reach the object through the facts of `s`, which is reported alongside the
/// table as the holder. Tables of subjects holding the fact themselves come
/// with `None`.
pub struct Subsets<'s> {
    store: &'s dyn FactStore,
    relationship: Entity,
    inherit: bool,
    /// Subjects still to expand, with the holder their fact comes from.
    objects: VecDeque<(Entity, Option<Entity>)>,
    tables: VecDeque<(TableId, Option<Entity>)>,
    visited_entities: RoaringBitmap,
    visited_tables: RoaringBitmap,
    seed: Entity,
}

impl<'s> Subsets<'s> {
    pub fn new(store: &'s dyn FactStore, relationship: Entity, object: Entity) -> Self {
        let mut visited_entities = RoaringBitmap::new();
        visited_entities.insert(object.index());
        Self {
            store,
            relationship,
            inherit: false,
            objects: VecDeque::from([(object, None)]),
            tables: VecDeque::new(),
            visited_entities,
            visited_tables: RoaringBitmap::new(),
            seed: object,
        }
    }

    /// Also walk down `IsA` edges from every subject found.
    pub fn inheriting(mut self, inherit: bool) -> Self {
        self.inherit = inherit;
        self
    }

    fn enqueue(&mut self, pattern: Id, holder: Option<Entity>) {
        let store = self.store;
        for table in store.tables_with(pattern) {
            let non_empty = store.table(table).is_some_and(|t| !t.is_empty());
            if non_empty && self.visited_tables.insert(table.0) {
                self.tables.push_back((table, holder));
            }
        }
    }
}

impl Iterator for Subsets<'_> {
    type Item = (TableId, Option<Entity>);
    fn next(&mut self) -> Option<(TableId, Option<Entity>)> {
        loop {
            let store = self.store;
            if let Some((table, holder)) = self.tables.pop_front() {
                if let Some(members) = store.table(table) {
                    for member in members.entities() {
                        if self.visited_entities.insert(member.index()) {
                            self.objects.push_back((*member, holder));
                        }
                    }
                }
                return Some((table, holder));
            }
            let (object, holder) = self.objects.pop_front()?;
            trace!(relationship = %self.relationship, object = %object, "expanding subsets");
            self.enqueue(Id::pair(self.relationship, object), None);
            // IsA(_, seed) alone does not relate anything to the seed
            if self.inherit && object != self.seed {
                self.enqueue(Id::pair(IS_A, object), Some(holder.unwrap_or(object)));
            }
        }
    }
}

/// Does `from` reach `to` through one or more `relationship` edges?
pub fn reaches(store: &dyn FactStore, relationship: Entity, from: Entity, to: Entity) -> bool {
    Supersets::new(store, relationship, from, false).any(|object| object == to)
}
