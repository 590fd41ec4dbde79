//! The read-only interface the query core consumes.
//!
//! Entities with the same set of ids live together in a [`Table`]; a table is
//! the unit of bulk matching, since every entity in it carries exactly the
//! same facts. The query engine never mutates a store, it only navigates it
//! through [`FactStore`].

use roaring::RoaringBitmap;
use std::fmt;

use crate::construct::{Entity, Id, RelationTraits};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// A set of entities sharing the same sorted list of ids.
#[derive(Debug)]
pub struct Table {
    id: TableId,
    ids: Vec<Id>,
    entities: Vec<Entity>,
}

impl Table {
    pub fn new(id: TableId, mut ids: Vec<Id>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self { id, ids, entities: Vec::new() }
    }
    pub fn id(&self) -> TableId {
        self.id
    }
    pub fn ids(&self) -> &[Id] {
        &self.ids
    }
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }
    pub fn len(&self) -> usize {
        self.entities.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
    pub fn has(&self, id: Id) -> bool {
        if id.is_wildcard() {
            self.ids.iter().any(|own| own.matches(id))
        } else {
            self.ids.binary_search(&id).is_ok()
        }
    }
    /// Ids of this table matching `pattern`, in table order.
    pub fn matching(&self, pattern: Id) -> impl Iterator<Item = Id> + '_ {
        self.ids.iter().copied().filter(move |id| id.matches(pattern))
    }
    pub(crate) fn push(&mut self, entity: Entity) -> usize {
        self.entities.push(entity);
        self.entities.len() - 1
    }
    /// Removes the entity at `row`, returning the entity that was moved into
    /// its place (if any).
    pub(crate) fn swap_remove(&mut self, row: usize) -> Option<Entity> {
        self.entities.swap_remove(row);
        self.entities.get(row).copied()
    }
}

/// A contiguous run of rows in one table: the batch a table-valued variable
/// is bound to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TableRange {
    pub table: TableId,
    pub offset: usize,
    pub count: usize,
}

impl TableRange {
    pub fn whole(table: &Table) -> Self {
        Self { table: table.id(), offset: 0, count: table.len() }
    }
    pub fn single(table: TableId, row: usize) -> Self {
        Self { table, offset: row, count: 1 }
    }
}

/// Iterator over the tables carrying an id, in ascending table order.
pub struct TableIter<'s> {
    inner: Option<roaring::bitmap::Iter<'s>>,
}

impl<'s> TableIter<'s> {
    pub fn new(bitmap: Option<&'s RoaringBitmap>) -> Self {
        Self { inner: bitmap.map(|b| b.iter()) }
    }
}

impl Iterator for TableIter<'_> {
    type Item = TableId;
    fn next(&mut self) -> Option<TableId> {
        self.inner.as_mut()?.next().map(TableId)
    }
}

/// Read access to entities, the ids attached to them and relationship traits.
pub trait FactStore {
    /// Does `entity` directly carry `id`? Wildcards in `id` match any member.
    fn has(&self, entity: Entity, id: Id) -> bool;
    /// Traits declared on a relationship entity.
    fn relationship_traits(&self, predicate: Entity) -> RelationTraits;
    /// Non-empty and empty tables carrying `id` (wildcard patterns allowed).
    fn tables_with(&self, id: Id) -> TableIter<'_>;
    /// Does `entity` still refer to the live record at its index?
    fn is_alive(&self, entity: Entity) -> bool;

    fn table(&self, table: TableId) -> Option<&Table>;
    /// Number of tables; table ids run from zero up to it.
    fn table_count(&self) -> usize;
    /// Table and row of a live entity.
    fn location(&self, entity: Entity) -> Option<(TableId, usize)>;
    fn lookup(&self, name: &str) -> Option<Entity>;
    fn name_of(&self, entity: Entity) -> Option<&str>;
    /// Can `entity` be the predicate of a pair?
    fn is_relationship(&self, entity: Entity) -> bool;

    /// Ids carried by a live entity.
    fn ids_of(&self, entity: Entity) -> &[Id] {
        match self.location(entity).and_then(|(table, _)| self.table(table)) {
            Some(table) => table.ids(),
            None => &[],
        }
    }
    /// Entities covered by a range.
    fn batch(&self, range: TableRange) -> &[Entity] {
        match self.table(range.table) {
            Some(table) => {
                let end = (range.offset + range.count).min(table.len());
                &table.entities()[range.offset.min(end)..end]
            }
            None => &[],
        }
    }
    /// Human readable form of an entity: its name when it has one.
    fn display(&self, entity: Entity) -> String {
        match self.name_of(entity) {
            Some(name) => name.to_string(),
            None => entity.to_string(),
        }
    }
}
