//! Candidate enumeration for one step of a query.
//!
//! Given the bindings in place when a frame is pushed, the matcher builds a
//! lazy sequence of candidates for the step; tables, closures and ancestors
//! are only walked as far as the cursor pulls. Each candidate names the
//! matched id, where it came from and the variable values it introduces.

use std::cell::Cell;
use std::iter;

use roaring::RoaringBitmap;
use tracing::debug;

use crate::construct::{is_trait_marker, Entity, Id, IS_A, WILDCARD};
use crate::query::{Query, Ref, Step};
use crate::store::{FactStore, Table, TableId, TableRange};
use crate::term::Operator;
use crate::transitive::{Reachable, Subsets, Supersets};
use crate::variable::{Binding, VarKind};

/// Candidates of one frame, pulled one at a time.
pub(crate) type Candidates<'w> = Box<dyn Iterator<Item = Match> + 'w>;

/// Where a matched id was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    /// Not attached to any entity: `!`, empty `?`, empty source, wildcard subject.
    None,
    /// On the subject of the term itself.
    Subject,
    /// Inherited from this `IsA` ancestor of the subject.
    Holder(Entity),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match {
    /// Index of the term that produced the candidate.
    pub term: usize,
    pub id: Option<Id>,
    pub source: Source,
    pub writes: [Option<(usize, Binding)>; 3],
}

impl Match {
    fn new(term: usize, id: Option<Id>, source: Source) -> Self {
        Self { term, id, source, writes: [None; 3] }
    }

    /// Adds a write, or rejects the candidate when the same slot was already
    /// written with a different value.
    fn with(mut self, slot: Option<usize>, binding: Binding) -> Option<Self> {
        let Some(slot) = slot else {
            return Some(self);
        };
        for write in self.writes.iter_mut() {
            match write {
                Some((existing, value)) if *existing == slot => {
                    return (*value == binding).then_some(self);
                }
                Some(_) => (),
                None => {
                    *write = Some((slot, binding));
                    return Some(self);
                }
            }
        }
        None
    }

    pub(crate) fn same_bindings(&self, other: &Match) -> bool {
        let covers = |a: &Match, b: &Match| a.writes.iter().flatten().all(|w| b.writes.contains(&Some(*w)));
        covers(self, other) && covers(other, self)
    }
}

#[derive(Clone, Copy, Debug)]
enum Pos {
    Known(Entity),
    /// A table variable already bound to a batch.
    Range(usize, TableRange),
    Free(usize),
    Any,
}

impl Pos {
    fn free(&self) -> Option<usize> {
        match self {
            Pos::Free(slot) => Some(*slot),
            _ => None,
        }
    }
}

fn none<'w>() -> Candidates<'w> {
    Box::new(iter::empty())
}

fn candidate(t: usize, id: Id, source: Source, slots: [Option<usize>; 3]) -> Option<Match> {
    Match::new(t, Some(id), source)
        .with(slots[0], Binding::Entity(id.first()))?
        .with(slots[2], id.second().map(Binding::Entity).unwrap_or_default())
}

/// `Subject` when the fact is the subject's own, else the ancestor holding it.
fn source_of(subject: Entity, holder: Entity) -> Source {
    if holder == subject { Source::Subject } else { Source::Holder(holder) }
}

/// Non-empty tables carrying `pattern`, in table order.
fn tables_matching<'w>(store: &'w dyn FactStore, pattern: Id) -> impl Iterator<Item = &'w Table> + 'w {
    let ids: Box<dyn Iterator<Item = TableId> + 'w> = if pattern == Id::Entity(WILDCARD) {
        Box::new((0..store.table_count() as u32).map(TableId))
    } else {
        Box::new(store.tables_with(pattern))
    };
    ids.filter_map(move |id| store.table(id)).filter(|table| !table.is_empty())
}

/// Values a free subject variable takes over one table.
fn subjects<'w>(kind: VarKind, table: &'w Table) -> Box<dyn Iterator<Item = Binding> + 'w> {
    match kind {
        VarKind::Table => Box::new(iter::once(Binding::Range(TableRange::whole(table)))),
        VarKind::Entity => Box::new(table.entities().iter().map(|e| Binding::Entity(*e))),
    }
}

/// Binding of a free subject variable to exactly one entity.
fn single(store: &dyn FactStore, kind: VarKind, entity: Entity) -> Option<Binding> {
    match kind {
        VarKind::Entity => Some(Binding::Entity(entity)),
        VarKind::Table => store
            .location(entity)
            .map(|(table, row)| Binding::Range(TableRange::single(table, row))),
    }
}

/// Ids of a pattern declared on `IsA` ancestors of an entity and not seen
/// before, each with the nearest ancestor declaring it.
struct Inherited<'w> {
    store: &'w dyn FactStore,
    ancestors: Supersets<'w>,
    pattern: Id,
    seen: Vec<Id>,
    current: Option<(Entity, std::slice::Iter<'w, Id>)>,
}

impl<'w> Inherited<'w> {
    fn new(store: &'w dyn FactStore, entity: Entity, pattern: Id, seen: Vec<Id>) -> Self {
        Self { store, ancestors: Supersets::new(store, IS_A, entity, false), pattern, seen, current: None }
    }
}

impl<'w> Iterator for Inherited<'w> {
    type Item = (Id, Entity);
    fn next(&mut self) -> Option<(Id, Entity)> {
        loop {
            if let Some((ancestor, ids)) = &mut self.current {
                for id in ids.by_ref() {
                    if id.matches(self.pattern) && !self.seen.contains(id) {
                        self.seen.push(*id);
                        return Some((*id, *ancestor));
                    }
                }
            }
            let ancestor = self.ancestors.next()?;
            self.current = Some((ancestor, self.store.ids_of(ancestor).iter()));
        }
    }
}

pub(crate) struct Matcher<'a, 'w> {
    store: &'w dyn FactStore,
    query: &'a Query,
    bindings: &'a [Binding],
    skipped: Cell<usize>,
}

impl<'a, 'w> Matcher<'a, 'w> {
    pub fn new(store: &'w dyn FactStore, query: &'a Query, bindings: &'a [Binding]) -> Self {
        Self { store, query, bindings, skipped: Cell::new(0) }
    }

    /// Stale entity references met so far.
    pub fn skipped(&self) -> usize {
        self.skipped.get()
    }

    /// The candidates of `step` under the current bindings. The sequence
    /// does not borrow the bindings, which the cursor keeps changing while
    /// deeper frames run.
    pub fn candidates(&self, step: &Step) -> Candidates<'w> {
        let before = self.skipped();
        let mut terms: Vec<Candidates<'w>> = step.terms.iter().map(|t| self.term(*t)).collect();
        let all: Candidates<'w> = if terms.len() == 1 {
            terms.remove(0)
        } else {
            Box::new(terms.into_iter().flatten())
        };
        let stale = self.skipped() != before;
        let first = step.terms.first().copied().unwrap_or_default();
        match step.operator {
            Operator::And | Operator::Or => all,
            Operator::Not => {
                let mut matches = all;
                Box::new(
                    iter::once_with(move || {
                        (!stale && matches.next().is_none()).then(|| Match::new(first, None, Source::None))
                    })
                    .flatten(),
                )
            }
            Operator::Optional => {
                let mut inner = all.fuse();
                let mut matched = false;
                Box::new(iter::from_fn(move || match inner.next() {
                    Some(found) => {
                        matched = true;
                        Some(found)
                    }
                    None if !matched && !stale => {
                        matched = true;
                        Some(Match::new(first, None, Source::None))
                    }
                    None => None,
                }))
            }
        }
    }

    fn position(&self, r: Ref) -> Option<Pos> {
        match r {
            Ref::Entity(entity) => {
                if self.store.is_alive(entity) {
                    Some(Pos::Known(entity))
                } else {
                    debug!(entity = %entity, "stale entity in query, skipping");
                    self.skipped.set(self.skipped.get() + 1);
                    None
                }
            }
            Ref::Var(slot) => Some(match self.bindings.get(slot).copied().unwrap_or_default() {
                Binding::Unbound => Pos::Free(slot),
                Binding::Entity(entity) => Pos::Known(entity),
                Binding::Range(range) => Pos::Range(slot, range),
            }),
            Ref::Wildcard => Some(Pos::Any),
        }
    }

    fn term(&self, t: usize) -> Candidates<'w> {
        let Some(term) = self.query.terms().get(t) else {
            return none();
        };
        let Some(predicate) = self.position(term.predicate) else {
            return none();
        };
        let object = match term.object {
            Some(r) => match self.position(r) {
                Some(object) => Some(object),
                None => return none(),
            },
            None => None,
        };
        let Some(subject) = term.subject else {
            let first = match predicate {
                Pos::Known(p) => p,
                _ => WILDCARD,
            };
            let id = match object {
                Some(Pos::Known(o)) => Id::pair(first, o),
                Some(_) => Id::pair(first, WILDCARD),
                None => Id::Entity(first),
            };
            return Box::new(iter::once(Match::new(t, Some(id), Source::None)));
        };
        let Some(subject) = self.position(subject) else {
            return none();
        };

        let slots = [predicate.free(), subject.free(), object.and_then(|o| o.free())];
        match predicate {
            Pos::Known(p) => {
                let traits = self.store.relationship_traits(p);
                let inherit = p != IS_A && !traits.is_final && !is_trait_marker(p);
                match object {
                    None => self.direct(t, Id::Entity(p), subject, slots, inherit),
                    Some(object) if traits.transitive => {
                        self.transitive(t, p, traits.reflexive, inherit, subject, object)
                    }
                    Some(Pos::Known(o)) => {
                        let direct = self.direct(t, Id::pair(p, o), subject, slots, inherit);
                        if traits.reflexive {
                            Box::new(self.reflexive_self(t, p, subject, o).chain(direct))
                        } else {
                            direct
                        }
                    }
                    Some(_) => {
                        let direct = self.direct(t, Id::pair(p, WILDCARD), subject, slots, inherit);
                        if traits.reflexive {
                            Box::new(self.reflexive_any(t, p, subject, slots[2]).chain(direct))
                        } else {
                            direct
                        }
                    }
                }
            }
            Pos::Free(_) | Pos::Any => {
                let pattern = match object {
                    None => Id::Entity(WILDCARD),
                    Some(Pos::Known(o)) => Id::pair(WILDCARD, o),
                    Some(_) => Id::pair(WILDCARD, WILDCARD),
                };
                self.direct(t, pattern, subject, slots, false)
            }
            Pos::Range(..) => none(),
        }
    }

    // ------------- Helpers over subjects -------------
    fn subject_ids(&self, subject: Pos) -> &'w [Id] {
        match subject {
            Pos::Known(entity) => self.store.ids_of(entity),
            Pos::Range(_, range) => self.store.table(range.table).map(|t| t.ids()).unwrap_or(&[]),
            _ => &[],
        }
    }

    fn representative(&self, subject: Pos) -> Option<Entity> {
        match subject {
            Pos::Known(entity) => Some(entity),
            Pos::Range(_, range) => self.store.batch(range).first().copied(),
            _ => None,
        }
    }

    // ------------- Direct facts, wildcard scans and inheritance -------------
    fn direct(&self, t: usize, pattern: Id, subject: Pos, slots: [Option<usize>; 3], inherit: bool) -> Candidates<'w> {
        let store = self.store;
        match subject {
            Pos::Known(_) | Pos::Range(..) => {
                let ids = self.subject_ids(subject);
                let own = ids
                    .iter()
                    .filter(move |id| id.matches(pattern))
                    .filter_map(move |id| candidate(t, *id, Source::Subject, slots));
                let Some(entity) = self.representative(subject).filter(|_| inherit) else {
                    return Box::new(own);
                };
                let seen: Vec<Id> = ids.iter().copied().filter(|id| id.matches(pattern)).collect();
                let inherited = Inherited::new(store, entity, pattern, seen)
                    .filter_map(move |(id, holder)| candidate(t, id, Source::Holder(holder), slots));
                Box::new(own.chain(inherited))
            }
            Pos::Free(slot) => {
                let kind = self.query.kind(slot);
                let own = tables_matching(store, pattern).flat_map(move |table| {
                    subjects(kind, table).flat_map(move |binding| {
                        table
                            .matching(pattern)
                            .filter_map(move |id| candidate(t, id, Source::Subject, slots)?.with(Some(slot), binding))
                    })
                });
                if !inherit {
                    return Box::new(own);
                }
                let inherited = tables_matching(store, Id::pair(IS_A, WILDCARD)).flat_map(move |table| {
                    let found: Vec<(Id, Entity)> = match table.entities().first() {
                        Some(first) => Inherited::new(store, *first, pattern, table.matching(pattern).collect()).collect(),
                        None => Vec::new(),
                    };
                    subjects(kind, table).flat_map(move |binding| {
                        found.clone().into_iter().filter_map(move |(id, holder)| {
                            candidate(t, id, Source::Holder(holder), slots)?.with(Some(slot), binding)
                        })
                    })
                });
                Box::new(own.chain(inherited))
            }
            Pos::Any => {
                let mut seen: Vec<Id> = Vec::new();
                Box::new(
                    tables_matching(store, pattern)
                        .flat_map(move |table| table.matching(pattern))
                        .filter(move |id| {
                            let fresh = !seen.contains(id);
                            if fresh {
                                seen.push(*id);
                            }
                            fresh
                        })
                        .filter_map(move |id| candidate(t, id, Source::None, slots)),
                )
            }
        }
    }

    // ------------- Reflexive relationships -------------
    /// `R(o, o)` for a reflexive `R` not stored as a fact.
    fn reflexive_self(&self, t: usize, p: Entity, subject: Pos, o: Entity) -> Candidates<'w> {
        let store = self.store;
        let kind = subject.free().map(|slot| self.query.kind(slot));
        Box::new(
            iter::once_with(move || {
                let id = Id::pair(p, o);
                if store.has(o, id) {
                    return None;
                }
                match subject {
                    Pos::Known(s) if s == o => Some(Match::new(t, Some(id), Source::Subject)),
                    Pos::Range(slot, range) => {
                        let row = store.batch(range).iter().position(|e| *e == o)?;
                        let narrowed = TableRange::single(range.table, range.offset + row);
                        Match::new(t, Some(id), Source::Subject).with(Some(slot), Binding::Range(narrowed))
                    }
                    Pos::Free(slot) => {
                        let binding = single(store, kind?, o)?;
                        Match::new(t, Some(id), Source::Subject).with(Some(slot), binding)
                    }
                    Pos::Any => Some(Match::new(t, Some(id), Source::None)),
                    _ => None,
                }
            })
            .flatten(),
        )
    }

    /// `R(s, s)` for every known subject `s` when the object is open.
    fn reflexive_any(&self, t: usize, p: Entity, subject: Pos, object_slot: Option<usize>) -> Candidates<'w> {
        let store = self.store;
        let entities: Box<dyn Iterator<Item = (Entity, Option<(usize, Binding)>)> + 'w> = match subject {
            Pos::Known(s) => Box::new(iter::once((s, None))),
            Pos::Range(slot, range) => Box::new(store.batch(range).iter().enumerate().map(move |(row, e)| {
                let narrowed = TableRange::single(range.table, range.offset + row);
                (*e, Some((slot, Binding::Range(narrowed))))
            })),
            _ => return none(),
        };
        Box::new(entities.filter_map(move |(entity, narrowing)| {
            let id = Id::pair(p, entity);
            if store.has(entity, id) {
                return None;
            }
            let found = Match::new(t, Some(id), Source::Subject).with(object_slot, Binding::Entity(entity))?;
            match narrowing {
                Some((slot, binding)) => found.with(Some(slot), binding),
                None => Some(found),
            }
        }))
    }

    // ------------- Transitive relationships -------------
    fn transitive(&self, t: usize, p: Entity, reflexive: bool, inherit: bool, subject: Pos, object: Pos) -> Candidates<'w> {
        let store = self.store;
        match (subject, object) {
            (Pos::Known(s), Pos::Known(o)) => Box::new(
                iter::once_with(move || {
                    let id = Id::pair(p, o);
                    if reflexive && s == o {
                        return Some(Match::new(t, Some(id), Source::Subject));
                    }
                    let (_, holder) = Reachable::new(store, p, s, false, inherit).find(|(found, _)| *found == o)?;
                    Some(Match::new(t, Some(id), source_of(s, holder)))
                })
                .flatten(),
            ),
            (Pos::Range(..), Pos::Known(o)) => {
                let Some(first) = self.representative(subject) else {
                    return none();
                };
                let mut fallback = if reflexive { self.reflexive_self(t, p, subject, o) } else { none() };
                Box::new(
                    iter::once_with(move || {
                        match Reachable::new(store, p, first, false, inherit).find(|(found, _)| *found == o) {
                            Some((_, holder)) => Some(Match::new(t, Some(Id::pair(p, o)), source_of(first, holder))),
                            None => fallback.next(),
                        }
                    })
                    .flatten(),
                )
            }
            (Pos::Known(s), Pos::Free(_) | Pos::Any) => {
                let object_slot = object.free();
                Box::new(Reachable::new(store, p, s, reflexive, inherit).filter_map(move |(o, holder)| {
                    Match::new(t, Some(Id::pair(p, o)), source_of(s, holder)).with(object_slot, Binding::Entity(o))
                }))
            }
            (Pos::Range(slot, range), Pos::Free(_) | Pos::Any) => {
                upward_range(store, t, p, (reflexive, inherit), slot, range, object.free())
            }
            (Pos::Free(slot), Pos::Known(o)) => {
                let kind = self.query.kind(slot);
                let id = Id::pair(p, o);
                let itself = reflexive
                    .then(|| single(store, kind, o))
                    .flatten()
                    .and_then(|binding| Match::new(t, Some(id), Source::Subject).with(Some(slot), binding));
                let entity_kind = kind == VarKind::Entity;
                let below = Subsets::new(store, p, o)
                    .inheriting(inherit)
                    .filter_map(move |(table, holder)| store.table(table).map(|table| (table, holder)))
                    .flat_map(move |(table, holder)| {
                        let source = holder.map_or(Source::Subject, Source::Holder);
                        subjects(kind, table).filter_map(move |binding| {
                            if reflexive && entity_kind && binding == Binding::Entity(o) {
                                return None;
                            }
                            Match::new(t, Some(id), source).with(Some(slot), binding)
                        })
                    });
                Box::new(itself.into_iter().chain(below))
            }
            (Pos::Any, Pos::Known(o)) => Box::new(
                iter::once_with(move || {
                    let reached = reflexive || Subsets::new(store, p, o).inheriting(inherit).next().is_some();
                    reached.then(|| Match::new(t, Some(Id::pair(p, o)), Source::None))
                })
                .flatten(),
            ),
            (Pos::Free(slot), Pos::Free(_) | Pos::Any) => {
                let kind = self.query.kind(slot);
                let object_slot = object.free();
                let holders = tables_matching(store, Id::pair(p, WILDCARD));
                let inheriting = tables_matching(store, Id::pair(IS_A, WILDCARD))
                    .filter(move |table| inherit && !table.has(Id::pair(p, WILDCARD)));
                Box::new(holders.chain(inheriting).flat_map(move |table| -> Candidates<'w> {
                    match kind {
                        VarKind::Table => {
                            upward_range(store, t, p, (reflexive, inherit), slot, TableRange::whole(table), object_slot)
                        }
                        VarKind::Entity => Box::new(table.entities().iter().flat_map(move |s| {
                            let s = *s;
                            Reachable::new(store, p, s, reflexive, inherit).filter_map(move |(o, holder)| {
                                Match::new(t, Some(Id::pair(p, o)), source_of(s, holder))
                                    .with(Some(slot), Binding::Entity(s))?
                                    .with(object_slot, Binding::Entity(o))
                            })
                        })),
                    }
                }))
            }
            (Pos::Any, Pos::Free(_) | Pos::Any) => {
                let slots = [None, None, object.free()];
                self.direct(t, Id::pair(p, WILDCARD), Pos::Any, slots, false)
            }
            (_, Pos::Range(..)) => none(),
        }
    }
}

/// Closure of a table-valued subject. Every entity of the batch carries the
/// facts of its first member; with `reflexive` each one also relates to
/// itself, narrowed to its own row.
fn upward_range<'w>(
    store: &'w dyn FactStore,
    t: usize,
    p: Entity,
    (reflexive, inherit): (bool, bool),
    slot: usize,
    range: TableRange,
    object_slot: Option<usize>,
) -> Candidates<'w> {
    let batch = store.batch(range);
    let Some(first) = batch.first().copied() else {
        return none();
    };
    let mut closure = Reachable::new(store, p, first, false, inherit);
    let mut reached = RoaringBitmap::new();
    let mut rows = batch.iter().enumerate();
    Box::new(iter::from_fn(move || {
        for (o, holder) in closure.by_ref() {
            reached.insert(o.index());
            let found = Match::new(t, Some(Id::pair(p, o)), source_of(first, holder))
                .with(Some(slot), Binding::Range(range))
                .and_then(|m| m.with(object_slot, Binding::Entity(o)));
            if found.is_some() {
                return found;
            }
        }
        if !reflexive {
            return None;
        }
        for (row, entity) in rows.by_ref() {
            let id = Id::pair(p, *entity);
            if reached.contains(entity.index()) || store.has(*entity, id) {
                continue;
            }
            let narrowed = TableRange::single(range.table, range.offset + row);
            let found = Match::new(t, Some(id), Source::Subject)
                .with(Some(slot), Binding::Range(narrowed))
                .and_then(|m| m.with(object_slot, Binding::Entity(*entity)));
            if found.is_some() {
                return found;
            }
        }
        None
    }))
}
