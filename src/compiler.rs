//! Turns a term list into a [`Query`].
//!
//! Compilation resolves identifiers against the store, assigns variable
//! slots, validates `or` groups, infers variable kinds and picks the order in
//! which terms are evaluated. It either succeeds or returns the first error;
//! no partially compiled query is ever handed out.

use tracing::debug;

use crate::construct::WILDCARD;
use crate::error::CompileError;
use crate::query::{CompiledTerm, Query, Ref, Step};
use crate::store::FactStore;
use crate::term::{Operator, Term, TermId};
use crate::variable::{VarKind, VariableTable};

pub fn compile(store: &dyn FactStore, terms: &[Term]) -> Result<Query, CompileError> {
    let mut variables = VariableTable::new();
    let mut compiled: Vec<CompiledTerm> = Vec::with_capacity(terms.len());
    for (index, term) in terms.iter().enumerate() {
        let current = compile_term(store, &mut variables, index, term)?;
        if current.operator == Operator::Or {
            check_or(&current, compiled.last(), term.col)?;
        }
        compiled.push(current);
    }
    infer_kinds(&compiled, &mut variables);
    let steps = schedule(&compiled);
    let query = Query::new(compiled, steps, variables);
    debug!(
        terms = query.term_count(),
        steps = query.steps().len(),
        variables = query.variables().len(),
        "compiled query\n{}",
        query
    );
    Ok(query)
}

fn resolve(
    store: &dyn FactStore,
    variables: &mut VariableTable,
    id: &TermId,
    col: usize,
) -> Result<Ref, CompileError> {
    Ok(match id {
        TermId::Name(name) => match store.lookup(name) {
            Some(WILDCARD) => Ref::Wildcard,
            Some(entity) => Ref::Entity(entity),
            None => {
                return Err(CompileError::UnresolvedIdentifier { name: name.clone(), col });
            }
        },
        TermId::Entity(WILDCARD) => Ref::Wildcard,
        TermId::Entity(entity) => {
            if !store.is_alive(*entity) {
                return Err(CompileError::UnresolvedIdentifier { name: entity.to_string(), col });
            }
            Ref::Entity(*entity)
        }
        TermId::Variable(name) => Ref::Var(variables.declare(name)),
        TermId::Anonymous => Ref::Var(variables.declare_anonymous()),
        TermId::This => Ref::Var(variables.declare_this()),
        TermId::Wildcard => Ref::Wildcard,
    })
}

fn compile_term(
    store: &dyn FactStore,
    variables: &mut VariableTable,
    index: usize,
    term: &Term,
) -> Result<CompiledTerm, CompileError> {
    let col = term.col;
    let predicate = resolve(store, variables, &term.predicate, col)?;
    let subject = if term.flags.empty_source {
        None
    } else {
        Some(resolve(store, variables, &term.subject, col)?)
    };
    let object = match &term.object {
        Some(object) => Some(resolve(store, variables, object, col)?),
        None => None,
    };
    if let (Ref::Entity(p), Some(_)) = (predicate, object) {
        if !store.is_relationship(p) {
            return Err(CompileError::NotARelationship { name: store.display(p), col });
        }
    }
    Ok(CompiledTerm {
        index,
        predicate,
        subject,
        object,
        operator: term.operator,
        inout: term.inout,
        text: term.to_string(),
    })
}

fn check_or(current: &CompiledTerm, previous: Option<&CompiledTerm>, col: usize) -> Result<(), CompileError> {
    let invalid = |message: &str| Err(CompileError::InvalidOr { message: message.to_string(), col });
    let Some(previous) = previous else {
        return invalid("'||' must follow another term");
    };
    if matches!(previous.operator, Operator::Not | Operator::Optional) {
        return invalid("'||' cannot follow a '!' or '?' term");
    }
    if current.subject.is_none() || previous.subject.is_none() {
        return invalid("a term without source cannot be part of an OR group");
    }
    let same_source = match (previous.subject, current.subject) {
        (Some(Ref::Entity(_)), Some(Ref::Entity(_))) => true,
        (Some(Ref::Var(a)), Some(Ref::Var(b))) => a == b,
        (Some(Ref::Wildcard), Some(Ref::Wildcard)) => true,
        _ => false,
    };
    if !same_source {
        return invalid("terms in an OR group must have the same kind of subject");
    }
    if previous.inout != current.inout {
        return invalid("terms in an OR group must have the same read/write intent");
    }
    Ok(())
}

/// Variables that only ever appear as subjects iterate whole tables at a
/// time; everything else is bound to one entity.
fn infer_kinds(terms: &[CompiledTerm], variables: &mut VariableTable) {
    for slot in 0..variables.len() {
        let used = terms.iter().any(|t| t.slots().any(|s| s == slot));
        if !used {
            continue;
        }
        let elsewhere = terms
            .iter()
            .any(|t| t.predicate == Ref::Var(slot) || t.object == Some(Ref::Var(slot)));
        let kind = if elsewhere { VarKind::Entity } else { VarKind::Table };
        variables.set_kind(slot, kind);
    }
}

struct Group {
    terms: Vec<usize>,
    operator: Operator,
    slots: Vec<usize>,
}

impl Group {
    fn positive(&self) -> bool {
        matches!(self.operator, Operator::And | Operator::Or)
    }
}

/// Orders groups for evaluation. Ground groups come first; afterwards groups
/// keep source order, except that a group with no bound variable gives way to
/// the first later group sharing one. `!` and `?` groups wait until every
/// variable they share with positive groups is bound.
fn schedule(terms: &[CompiledTerm]) -> Vec<Step> {
    let mut groups: Vec<Group> = Vec::new();
    for term in terms {
        match (term.operator, groups.last_mut()) {
            (Operator::Or, Some(group)) => {
                group.terms.push(term.index);
                group.operator = Operator::Or;
                group.slots.extend(term.slots());
            }
            _ => groups.push(Group {
                terms: vec![term.index],
                operator: term.operator,
                slots: term.slots().collect(),
            }),
        }
    }
    for group in groups.iter_mut() {
        group.slots.sort_unstable();
        group.slots.dedup();
    }
    let positive_slots: Vec<usize> = groups
        .iter()
        .filter(|g| g.positive())
        .flat_map(|g| g.slots.iter().copied())
        .collect();

    let mut bound: Vec<usize> = Vec::new();
    let mut scheduled = vec![false; groups.len()];
    let mut order = Vec::with_capacity(groups.len());

    for (i, group) in groups.iter().enumerate() {
        if group.positive() && group.slots.is_empty() {
            scheduled[i] = true;
            order.push(i);
        }
    }
    while order.len() < groups.len() {
        let pending: Vec<usize> = (0..groups.len()).filter(|i| !scheduled[*i]).collect();
        let is_bound = |s: &usize| bound.contains(s);
        let find = |accept: &dyn Fn(&Group) -> bool| pending.iter().copied().find(|i| accept(&groups[*i]));
        let in_order = find(&|g: &Group| g.positive())
            .filter(|i| bound.is_empty() || groups[*i].slots.iter().any(is_bound));
        let next = find(&|g: &Group| !g.positive() && g.slots.iter().all(|s| is_bound(s) || !positive_slots.contains(s)))
            .or(in_order)
            .or_else(|| find(&|g: &Group| g.positive() && g.slots.iter().any(is_bound)))
            .or_else(|| find(&|g: &Group| g.positive()))
            .or_else(|| pending.first().copied());
        let Some(next) = next else {
            break;
        };
        scheduled[next] = true;
        order.push(next);
        if groups[next].operator != Operator::Not {
            bound.extend(groups[next].slots.iter().copied());
        }
    }
    order
        .into_iter()
        .map(|i| Step { terms: groups[i].terms.clone(), operator: groups[i].operator })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::World;

    #[test]
    fn negated_terms_wait_for_their_variables() {
        let mut world = World::new();
        world.named("Planet");
        world.named("Moon");
        let orbits = world.named("Orbits");
        world.add(orbits, crate::construct::Id::Entity(crate::construct::RELATIONSHIP)).unwrap();
        let query = Query::parse(&world, "!Moon(X), Orbits(X, Y), Planet(Y)").unwrap();
        let order: Vec<usize> = query.steps().iter().map(|s| s.terms[0]).collect();
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[test]
    fn groups_keep_source_order_while_they_share_a_variable() {
        let mut world = World::new();
        world.named("Planet");
        world.named("Inhabited");
        let orbits = world.named("Orbits");
        world.add(orbits, crate::construct::Id::Entity(crate::construct::RELATIONSHIP)).unwrap();
        let query = Query::parse(&world, "Planet(X), Orbits(Y, X), Inhabited(X)").unwrap();
        let order: Vec<usize> = query.steps().iter().map(|s| s.terms[0]).collect();
        assert_eq!(order, vec![0, 1, 2], "Orbits shares X, so Inhabited does not jump ahead");

        let query = Query::parse(&world, "Planet(X), Orbits(Y, Z), Inhabited(X)").unwrap();
        let order: Vec<usize> = query.steps().iter().map(|s| s.terms[0]).collect();
        assert_eq!(order, vec![0, 2, 1], "a group with nothing bound gives way");
    }

    #[test]
    fn ground_terms_go_first() {
        let mut world = World::new();
        world.named("Planet");
        world.named("Earth");
        let query = Query::parse(&world, "Planet(X), Planet(Earth)").unwrap();
        assert_eq!(query.steps()[0].terms, vec![1]);
    }
}
