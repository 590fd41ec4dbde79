//! Query variables and the values they take during iteration.

use std::collections::HashMap;

use crate::construct::{Entity, OtherHasher};
use crate::store::TableRange;

/// Name of the result entity variable, always in slot 0.
pub const THIS: &str = ".";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VarKind {
    /// Bound to one entity at a time.
    Entity,
    /// Bound to a batch of entities sharing a table.
    Table,
}

#[derive(Clone, Debug)]
pub struct Variable {
    pub name: String,
    pub slot: usize,
    pub kind: VarKind,
    pub anonymous: bool,
    /// Referenced by at least one term.
    pub used: bool,
}

/// Named and anonymous variables of a query, indexed by slot.
#[derive(Clone, Debug)]
pub struct VariableTable {
    variables: Vec<Variable>,
    by_name: HashMap<String, usize, OtherHasher>,
}

impl VariableTable {
    pub fn new() -> Self {
        let mut table = Self { variables: Vec::new(), by_name: HashMap::default() };
        table.push(THIS.to_string(), false);
        table
    }
    fn push(&mut self, name: String, anonymous: bool) -> usize {
        let slot = self.variables.len();
        if !anonymous {
            self.by_name.insert(name.clone(), slot);
        }
        self.variables.push(Variable { name, slot, kind: VarKind::Entity, anonymous, used: false });
        slot
    }
    /// Slot of a named variable, allocating one on first sight.
    pub fn declare(&mut self, name: &str) -> usize {
        let slot = match self.by_name.get(name) {
            Some(slot) => *slot,
            None => self.push(name.to_string(), false),
        };
        self.variables[slot].used = true;
        slot
    }
    pub fn declare_this(&mut self) -> usize {
        self.variables[0].used = true;
        0
    }
    pub fn declare_anonymous(&mut self) -> usize {
        let slot = self.push(format!("${}", self.variables.len()), true);
        self.variables[slot].used = true;
        slot
    }
    pub fn find(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied().filter(|slot| self.variables[*slot].used)
    }
    pub fn get(&self, slot: usize) -> Option<&Variable> {
        self.variables.get(slot)
    }
    pub fn kind(&self, slot: usize) -> VarKind {
        self.variables.get(slot).map(|v| v.kind).unwrap_or(VarKind::Entity)
    }
    pub(crate) fn set_kind(&mut self, slot: usize, kind: VarKind) {
        if let Some(variable) = self.variables.get_mut(slot) {
            variable.kind = kind;
        }
    }
    pub fn len(&self) -> usize {
        self.variables.len()
    }
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter()
    }
    /// Used, non-anonymous variables in slot order; these become result columns.
    pub fn named(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter().filter(|v| v.used && !v.anonymous)
    }
}

impl Default for VariableTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The current value of a variable slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Binding {
    #[default]
    Unbound,
    Entity(Entity),
    Range(TableRange),
}

impl Binding {
    pub fn is_bound(&self) -> bool {
        !matches!(self, Binding::Unbound)
    }
    pub fn entity(&self) -> Option<Entity> {
        match self {
            Binding::Entity(e) => Some(*e),
            _ => None,
        }
    }
    pub fn range(&self) -> Option<TableRange> {
        match self {
            Binding::Range(r) => Some(*r),
            _ => None,
        }
    }
}
