//! The parsed form of one pattern clause.
//!
//! A [`Term`] names a predicate, a subject and an optional object. Each of
//! those is a [`TermId`]: a literal entity (by name or by handle), a named or
//! anonymous variable, the result entity `.` or the wildcard `*`.

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

use crate::construct::Entity;

lazy_static! {
    // an all-uppercase identifier such as X, Y or PARENT
    static ref UPPERCASE: Regex = Regex::new(r"^[A-Z][A-Z0-9_]*$").unwrap();
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TermId {
    /// A literal entity looked up by name at compile time.
    Name(String),
    /// A literal entity handle.
    Entity(Entity),
    Variable(String),
    /// `$` or `_`: a variable nobody refers to again.
    Anonymous,
    /// `.`, the result entity.
    This,
    /// `*`, matches anything and binds nothing.
    Wildcard,
}

impl TermId {
    pub fn var(name: &str) -> Self {
        TermId::Variable(name.to_string())
    }
    pub fn name(name: &str) -> Self {
        TermId::Name(name.to_string())
    }
    pub fn is_variable(&self) -> bool {
        matches!(self, TermId::Variable(_) | TermId::Anonymous | TermId::This)
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TermId::Name(name) => {
                if UPPERCASE.is_match(name) || name.starts_with('_') {
                    write!(f, "\\{}", name)
                } else {
                    write!(f, "{}", name)
                }
            }
            TermId::Entity(entity) => write!(f, "{}", entity),
            TermId::Variable(name) => write!(f, "_{}", name),
            TermId::Anonymous => write!(f, "$"),
            TermId::This => write!(f, "."),
            TermId::Wildcard => write!(f, "*"),
        }
    }
}

/// Where an identifier appears within a term.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Position {
    Predicate,
    Subject,
    Object,
}

/// Classifies a textual identifier.
///
/// `\Name` is always a literal. `_Name` is a variable anywhere, while an
/// all-uppercase name is a variable only as subject or object, so that
/// `A(.)` still names a predicate `A`.
pub fn classify(identifier: &str, position: Position) -> TermId {
    match identifier {
        "*" => return TermId::Wildcard,
        "$" | "_" => return TermId::Anonymous,
        "." => return TermId::This,
        _ => (),
    }
    if let Some(literal) = identifier.strip_prefix('\\') {
        return TermId::Name(literal.to_string());
    }
    if let Some(variable) = identifier.strip_prefix('_') {
        return TermId::Variable(variable.to_string());
    }
    if position != Position::Predicate && UPPERCASE.is_match(identifier) {
        return TermId::Variable(identifier.to_string());
    }
    TermId::Name(identifier.to_string())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Operator {
    #[default]
    And,
    /// Continues the group started by the previous term.
    Or,
    Not,
    Optional,
}

/// Declared read/write intent of a term.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum InOut {
    #[default]
    Default,
    In,
    Out,
    InOut,
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct TermFlags {
    /// Written as `(Pred, Obj)`.
    pub pair_shorthand: bool,
    /// Written as `Pred()`: no source, only the id is reported.
    pub empty_source: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Term {
    pub predicate: TermId,
    pub subject: TermId,
    pub object: Option<TermId>,
    pub operator: Operator,
    pub inout: InOut,
    pub flags: TermFlags,
    /// 1-based column of the term in its source text, 0 when built in code.
    pub col: usize,
}

impl Term {
    /// `predicate(.)`
    pub fn new(predicate: TermId) -> Self {
        Self {
            predicate,
            subject: TermId::This,
            object: None,
            operator: Operator::And,
            inout: InOut::Default,
            flags: TermFlags::default(),
            col: 0,
        }
    }
    pub fn pair(predicate: TermId, subject: TermId, object: TermId) -> Self {
        Self::new(predicate).subject(subject).object(object)
    }
    pub fn subject(mut self, subject: TermId) -> Self {
        self.subject = subject;
        self
    }
    pub fn object(mut self, object: TermId) -> Self {
        self.object = Some(object);
        self
    }
    pub fn operator(mut self, operator: Operator) -> Self {
        self.operator = operator;
        self
    }
    pub fn inout(mut self, inout: InOut) -> Self {
        self.inout = inout;
        self
    }
    pub fn empty_source(mut self) -> Self {
        self.flags.empty_source = true;
        self
    }
    /// No variables, no wildcards and a plain `and`: something that can be
    /// stored as a fact.
    pub fn is_ground(&self) -> bool {
        let literal = |id: &TermId| matches!(id, TermId::Name(_) | TermId::Entity(_));
        self.operator == Operator::And
            && !self.flags.empty_source
            && literal(&self.predicate)
            && literal(&self.subject)
            && self.object.as_ref().is_none_or(literal)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inout {
            InOut::Default => (),
            InOut::In => write!(f, "[in] ")?,
            InOut::Out => write!(f, "[out] ")?,
            InOut::InOut => write!(f, "[inout] ")?,
            InOut::None => write!(f, "[none] ")?,
        }
        match self.operator {
            Operator::Not => write!(f, "!")?,
            Operator::Optional => write!(f, "?")?,
            _ => (),
        }
        if self.flags.empty_source {
            return write!(f, "{}()", self.predicate);
        }
        match &self.object {
            Some(object) => write!(f, "{}({}, {})", self.predicate, self.subject, object),
            None => write!(f, "{}({})", self.predicate, self.subject),
        }
    }
}
