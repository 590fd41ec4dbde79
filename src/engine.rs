//! A shareable facade over a [`World`] for fact scripts and collected query
//! results, used by the server and the binary.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::debug;

use crate::construct::{Entity, Id};
use crate::error::{CompileError, QuarryError, Result};
use crate::parser::parse_terms;
use crate::query::Query;
use crate::store::FactStore;
use crate::term::{Term, TermId};
use crate::world::World;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub row_count: usize,
    /// More rows were available than the limit allowed.
    pub limited: bool,
}

#[derive(Clone)]
pub struct Engine {
    world: Arc<RwLock<World>>,
}

impl Engine {
    pub fn new(world: World) -> Self {
        Self { world: Arc::new(RwLock::new(world)) }
    }

    pub fn world(&self) -> &Arc<RwLock<World>> {
        &self.world
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, World>> {
        self.world.read().map_err(|e| QuarryError::Lock(e.to_string()))
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, World>> {
        self.world.write().map_err(|e| QuarryError::Lock(e.to_string()))
    }

    /// Parses a script of ground terms, rejecting it as a whole when any term
    /// is not ground.
    fn facts(script: &str) -> Result<Vec<Term>> {
        let terms = parse_terms(script)?;
        if let Some(term) = terms.iter().find(|t| !t.is_ground()) {
            return Err(CompileError::NotGround { term: term.to_string() }.into());
        }
        Ok(terms)
    }

    /// Adds every fact of the script, creating named entities on first
    /// mention. Returns how many facts were new.
    pub fn assert_facts(&self, script: &str) -> Result<usize> {
        let terms = Self::facts(script)?;
        let mut world = self.write()?;
        let mut added = 0;
        for term in &terms {
            let mut entity = |id: &TermId| -> Result<Entity> {
                match id {
                    TermId::Name(name) => Ok(world.named(name)),
                    TermId::Entity(entity) if world.is_alive(*entity) => Ok(*entity),
                    other => Err(QuarryError::StaleEntity(match other {
                        TermId::Entity(entity) => *entity,
                        _ => Entity::NULL,
                    })),
                }
            };
            let predicate = entity(&term.predicate)?;
            let subject = entity(&term.subject)?;
            let id = match &term.object {
                Some(object) => Id::pair(predicate, entity(object)?),
                None => Id::Entity(predicate),
            };
            if world.add(subject, id)? {
                added += 1;
            }
        }
        debug!(facts = terms.len(), added, "asserted facts");
        Ok(added)
    }

    /// Removes every fact of the script. Facts naming unknown entities are
    /// ignored. Returns how many facts were removed.
    pub fn retract_facts(&self, script: &str) -> Result<usize> {
        let terms = Self::facts(script)?;
        let mut world = self.write()?;
        let mut removed = 0;
        for term in &terms {
            let entity = |id: &TermId| match id {
                TermId::Name(name) => world.lookup(name),
                TermId::Entity(entity) => Some(*entity).filter(|e| world.is_alive(*e)),
                _ => None,
            };
            let (Some(predicate), Some(subject)) = (entity(&term.predicate), entity(&term.subject)) else {
                continue;
            };
            let id = match &term.object {
                Some(object) => match entity(object) {
                    Some(object) => Id::pair(predicate, object),
                    None => continue,
                },
                None => Id::Entity(predicate),
            };
            if world.remove(subject, id)? {
                removed += 1;
            }
        }
        debug!(facts = terms.len(), removed, "retracted facts");
        Ok(removed)
    }

    /// Deletes a named entity together with everything referring to it.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let mut world = self.write()?;
        match world.lookup(name) {
            Some(entity) => world.delete(entity),
            None => Ok(false),
        }
    }

    /// Runs a query and renders every variable column, stopping after `limit`
    /// rows.
    pub fn execute_collect(&self, query: &str, limit: Option<usize>) -> Result<QueryResult> {
        let world = self.read()?;
        let store: &dyn FactStore = &*world;
        let query = Query::parse(store, query)?;
        let columns = query.columns();
        let mut rows = Vec::new();
        let mut limited = false;
        let mut cursor = query.iter(store);
        while let Some(row) = cursor.advance() {
            if limit.is_some_and(|limit| rows.len() >= limit) {
                limited = true;
                break;
            }
            rows.push(
                columns
                    .iter()
                    .map(|(slot, _)| row.get(*slot).map(|e| store.display(e)).unwrap_or_default())
                    .collect::<Vec<String>>(),
            );
        }
        if cursor.skipped() > 0 {
            debug!(skipped = cursor.skipped(), "stale references skipped");
        }
        cursor.finalize();
        Ok(QueryResult {
            columns: columns.into_iter().map(|(_, name)| name.to_string()).collect(),
            row_count: rows.len(),
            rows,
            limited,
        })
    }
}
