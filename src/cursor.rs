//! The join: a resumable backtracking state machine over an explicit frame
//! stack.
//!
//! Each frame pulls the candidates of its step one at a time from a lazy
//! sequence built when the frame was pushed. Frames of `or` groups record
//! what they matched in the cursor's scratch arena, from the frame's
//! watermark up, so later alternatives can skip repeated bindings. Popping a
//! frame truncates the arena back to that watermark and restores the
//! variable values the frame overwrote.

use tracing::trace;

use crate::construct::{Entity, Id};
use crate::matcher::{Candidates, Match, Matcher, Source};
use crate::query::{Query, Ref};
use crate::store::FactStore;
use crate::term::Operator;
use crate::variable::Binding;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorState {
    Start,
    Advancing,
    Yielded,
    Exhausted,
}

struct Frame<'w> {
    step: usize,
    candidates: Candidates<'w>,
    /// First scratch slot owned by this frame.
    base: usize,
    /// Candidate currently applied, if any.
    current: Option<Match>,
    /// Values of the slots this frame overwrote, as they were on entry.
    saved: Vec<(usize, Binding)>,
}

/// A table variable being expanded entity by entity for the current match.
#[derive(Debug)]
struct Expansion {
    slots: Vec<usize>,
    positions: Vec<usize>,
    started: bool,
}

/// One result row.
#[derive(Clone, Debug)]
pub struct Row<'w> {
    /// Matched id per term, in source order. `None` for terms that did not
    /// contribute (`!`, unmatched `?`, other alternatives of an `or`).
    pub ids: Vec<Option<Id>>,
    /// Entity each term was matched on, in source order.
    pub sources: Vec<Option<Entity>>,
    /// Value of every variable slot.
    pub variables: Vec<Option<Entity>>,
    /// Full batch behind every table-valued variable, by slot.
    pub batches: Vec<(usize, &'w [Entity])>,
}

impl<'w> Row<'w> {
    pub fn get(&self, slot: usize) -> Option<Entity> {
        self.variables.get(slot).copied().flatten()
    }
    /// The result entity `.`.
    pub fn entity(&self) -> Option<Entity> {
        self.get(0)
    }
    pub fn id(&self, term: usize) -> Option<Id> {
        self.ids.get(term).copied().flatten()
    }
    pub fn source(&self, term: usize) -> Option<Entity> {
        self.sources.get(term).copied().flatten()
    }
    pub fn batch(&self, slot: usize) -> Option<&'w [Entity]> {
        self.batches.iter().find(|(s, _)| *s == slot).map(|(_, b)| *b)
    }
}

pub struct Cursor<'q, 'w> {
    query: &'q Query,
    store: &'w dyn FactStore,
    state: CursorState,
    bindings: Vec<Binding>,
    frames: Vec<Frame<'w>>,
    scratch: Vec<Match>,
    expansion: Option<Expansion>,
    batched: bool,
    skipped: usize,
}

impl<'q, 'w> Cursor<'q, 'w> {
    pub fn new(query: &'q Query, store: &'w dyn FactStore) -> Self {
        Self {
            query,
            store,
            state: CursorState::Start,
            bindings: vec![Binding::Unbound; query.variables().len()],
            frames: Vec::with_capacity(query.steps().len()),
            scratch: Vec::new(),
            expansion: None,
            batched: false,
            skipped: 0,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Candidates dropped because they referred to entities that are no
    /// longer alive.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn query(&self) -> &'q Query {
        self.query
    }

    /// Current value of a slot. Table variables report the batch they are
    /// bound to through [`Row::batch`] instead.
    pub fn binding(&self, slot: usize) -> Binding {
        self.bindings.get(slot).copied().unwrap_or_default()
    }

    /// Next row, with table-valued variables expanded one entity per row.
    pub fn advance(&mut self) -> Option<Row<'w>> {
        self.batched = false;
        self.step()
    }

    /// Next row without expanding table-valued variables: one row per batch,
    /// their entities in [`Row::batches`].
    pub fn advance_batch(&mut self) -> Option<Row<'w>> {
        self.batched = true;
        self.step()
    }

    /// Releases the scratch arena and ends the iteration.
    pub fn finalize(&mut self) {
        self.scratch.truncate(0);
        self.frames.clear();
        self.expansion = None;
        self.state = CursorState::Exhausted;
    }

    fn step(&mut self) -> Option<Row<'w>> {
        loop {
            match self.state {
                CursorState::Exhausted => return None,
                CursorState::Start => {
                    self.state = CursorState::Advancing;
                    if self.query.steps().is_empty() {
                        self.finalize();
                        return None;
                    }
                    self.push_frame(0);
                }
                CursorState::Yielded => {
                    if !self.batched {
                        if let Some(row) = self.expand() {
                            return Some(row);
                        }
                    }
                    self.expansion = None;
                    self.state = CursorState::Advancing;
                }
                CursorState::Advancing => {
                    if self.frames.is_empty() {
                        self.finalize();
                        return None;
                    }
                    let Some(candidate) = self.pull() else {
                        self.pop_frame();
                        continue;
                    };
                    self.apply(candidate);
                    if self.frames.len() == self.query.steps().len() {
                        self.state = CursorState::Yielded;
                        if self.batched {
                            return Some(self.row(&[]));
                        }
                        self.expansion = Some(self.start_expansion());
                    } else {
                        self.push_frame(self.frames.len());
                    }
                }
            }
        }
    }

    fn push_frame(&mut self, step: usize) {
        let Some(compiled) = self.query.steps().get(step) else {
            return;
        };
        let matcher = Matcher::new(self.store, self.query, &self.bindings);
        let candidates = matcher.candidates(compiled);
        self.skipped += matcher.skipped();
        trace!(step, "push frame");
        let base = self.scratch.len();
        self.frames.push(Frame { step, candidates, base, current: None, saved: Vec::new() });
    }

    /// Next candidate of the top frame. In an `or` group, candidates whose
    /// bindings an earlier alternative already produced are skipped.
    fn pull(&mut self) -> Option<Match> {
        let frame = self.frames.last_mut()?;
        let dedup = self.query.steps().get(frame.step).is_some_and(|s| s.operator == Operator::Or);
        loop {
            let candidate = frame.candidates.next()?;
            if !dedup {
                return Some(candidate);
            }
            let repeated = self.scratch[frame.base..]
                .iter()
                .any(|earlier| earlier.term != candidate.term && earlier.same_bindings(&candidate));
            if !repeated {
                self.scratch.push(candidate);
                return Some(candidate);
            }
        }
    }

    fn pop_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            trace!(step = frame.step, "pop frame");
            for (slot, value) in frame.saved.into_iter().rev() {
                self.bindings[slot] = value;
            }
            self.scratch.truncate(frame.base);
        }
    }

    /// Makes a candidate of the top frame current, undoing the previous one.
    fn apply(&mut self, candidate: Match) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        for (slot, value) in frame.saved.iter().rev() {
            self.bindings[*slot] = *value;
        }
        for (slot, value) in candidate.writes.into_iter().flatten() {
            if !frame.saved.iter().any(|(saved, _)| *saved == slot) {
                frame.saved.push((slot, self.bindings[slot]));
            }
            self.bindings[slot] = value;
        }
        frame.current = Some(candidate);
    }

    /// Table variables bound to ranges, to be walked one entity at a time.
    fn start_expansion(&self) -> Expansion {
        let slots: Vec<usize> = (0..self.bindings.len())
            .filter(|slot| matches!(self.bindings[*slot], Binding::Range(_)))
            .collect();
        let positions = vec![0; slots.len()];
        Expansion { slots, positions, started: false }
    }

    /// Next combination of the odometer over table variables.
    fn expand(&mut self) -> Option<Row<'w>> {
        let store = self.store;
        let expansion = self.expansion.as_mut()?;
        if !expansion.started {
            expansion.started = true;
            let all_filled = expansion
                .slots
                .iter()
                .all(|slot| self.bindings[*slot].range().is_some_and(|r| !store.batch(r).is_empty()));
            if !all_filled {
                return None;
            }
        } else {
            let mut digit = expansion.slots.len();
            loop {
                if digit == 0 {
                    return None;
                }
                digit -= 1;
                let len = self.bindings[expansion.slots[digit]].range().map(|r| store.batch(r).len()).unwrap_or(0);
                expansion.positions[digit] += 1;
                if expansion.positions[digit] < len {
                    break;
                }
                expansion.positions[digit] = 0;
            }
        }
        let picks: Vec<(usize, Entity)> = expansion
            .slots
            .iter()
            .zip(&expansion.positions)
            .filter_map(|(slot, position)| {
                let range = self.bindings[*slot].range()?;
                store.batch(range).get(*position).map(|e| (*slot, *e))
            })
            .collect();
        Some(self.row(&picks))
    }

    fn value(&self, slot: usize, picks: &[(usize, Entity)]) -> Option<Entity> {
        match self.bindings.get(slot)? {
            Binding::Entity(entity) => Some(*entity),
            Binding::Range(_) => picks.iter().find(|(s, _)| *s == slot).map(|(_, e)| *e),
            Binding::Unbound => None,
        }
    }

    fn row(&self, picks: &[(usize, Entity)]) -> Row<'w> {
        let count = self.query.term_count();
        let mut ids = vec![None; count];
        let mut sources = vec![None; count];
        for frame in &self.frames {
            let Some(candidate) = &frame.current else {
                continue;
            };
            let Some(term) = self.query.terms().get(candidate.term) else {
                continue;
            };
            ids[candidate.term] = candidate.id;
            sources[candidate.term] = match candidate.source {
                Source::None => None,
                Source::Holder(holder) => Some(holder),
                Source::Subject => match term.subject {
                    Some(Ref::Entity(entity)) => Some(entity),
                    Some(Ref::Var(slot)) => self.value(slot, picks),
                    _ => None,
                },
            };
        }
        let variables = (0..self.bindings.len()).map(|slot| self.value(slot, picks)).collect();
        let batches = self
            .bindings
            .iter()
            .enumerate()
            .filter_map(|(slot, binding)| binding.range().map(|r| (slot, self.store.batch(r))))
            .collect();
        Row { ids, sources, variables, batches }
    }
}

impl<'w> Iterator for Cursor<'_, 'w> {
    type Item = Row<'w>;
    fn next(&mut self) -> Option<Row<'w>> {
        self.advance()
    }
}
