//! Compiled queries.
//!
//! A [`Query`] is immutable once compiled and can be shared by any number of
//! cursors, each of which keeps its own bindings and frame stack.

use std::fmt;

use crate::compiler;
use crate::construct::Entity;
use crate::cursor::Cursor;
use crate::error::CompileError;
use crate::parser::parse_terms;
use crate::store::FactStore;
use crate::term::{InOut, Operator, Term};
use crate::variable::{VarKind, VariableTable};

/// A resolved term position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Ref {
    Entity(Entity),
    Var(usize),
    Wildcard,
}

impl Ref {
    pub fn slot(&self) -> Option<usize> {
        match self {
            Ref::Var(slot) => Some(*slot),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CompiledTerm {
    /// Position of the term in the source list.
    pub index: usize,
    pub predicate: Ref,
    /// `None` for an empty-source term.
    pub subject: Option<Ref>,
    pub object: Option<Ref>,
    pub operator: Operator,
    pub inout: InOut,
    pub text: String,
}

impl CompiledTerm {
    /// Variable slots referenced by this term, possibly repeated.
    pub fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        [Some(self.predicate), self.subject, self.object]
            .into_iter()
            .flatten()
            .filter_map(|r| r.slot())
    }
}

/// One level of the join: a single term, or the alternatives of an `or` group.
#[derive(Clone, Debug)]
pub struct Step {
    pub terms: Vec<usize>,
    pub operator: Operator,
}

#[derive(Debug)]
pub struct Query {
    terms: Vec<CompiledTerm>,
    steps: Vec<Step>,
    variables: VariableTable,
}

impl Query {
    pub(crate) fn new(terms: Vec<CompiledTerm>, steps: Vec<Step>, variables: VariableTable) -> Self {
        Self { terms, steps, variables }
    }

    pub fn compile(store: &dyn FactStore, terms: &[Term]) -> Result<Query, CompileError> {
        compiler::compile(store, terms)
    }

    /// Parses and compiles a term expression such as `Sentient(X), IsA(Y, X)`.
    pub fn parse(store: &dyn FactStore, text: &str) -> Result<Query, CompileError> {
        let terms = parse_terms(text)?;
        compiler::compile(store, &terms)
    }

    /// Starts an iteration over `store`.
    pub fn iter<'q, 'w>(&'q self, store: &'w dyn FactStore) -> Cursor<'q, 'w> {
        Cursor::new(self, store)
    }

    /// Slot of a variable, by its name with or without the leading `_`.
    pub fn find_variable(&self, name: &str) -> Option<usize> {
        let name = match name.strip_prefix('_') {
            Some(stripped) if !stripped.is_empty() => stripped,
            _ => name,
        };
        self.variables.find(name)
    }

    pub fn variables(&self) -> &VariableTable {
        &self.variables
    }
    pub fn terms(&self) -> &[CompiledTerm] {
        &self.terms
    }
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
    pub fn term_count(&self) -> usize {
        self.terms.len()
    }
    pub(crate) fn kind(&self, slot: usize) -> VarKind {
        self.variables.kind(slot)
    }
    /// Slots reported as result columns: `.` first when used, then named
    /// variables in order of appearance.
    pub fn columns(&self) -> Vec<(usize, &str)> {
        self.variables.named().map(|v| (v.slot, v.name.as_str())).collect()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            let texts: Vec<&str> = step.terms.iter().map(|t| self.terms[*t].text.as_str()).collect();
            writeln!(f, "{}: {}", i, texts.join(" || "))?;
        }
        Ok(())
    }
}
