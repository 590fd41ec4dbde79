//! Text to [`Term`]s, using the pest grammar in `terms.pest`.

use pest::Parser;
use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest_derive::Parser;

use crate::error::CompileError;
use crate::term::{classify, InOut, Operator, Position, Term, TermId};

#[derive(Parser)]
#[grammar = "terms.pest"]
struct TermParser;

impl From<pest::error::Error<Rule>> for CompileError {
    fn from(e: pest::error::Error<Rule>) -> Self {
        let (line, col) = match e.line_col {
            LineColLocation::Pos(position) => position,
            LineColLocation::Span(start, _) => start,
        };
        CompileError::Syntax { message: e.variant.message().to_string(), line, col }
    }
}

/// Parses a comma separated term list. `||` joins a term to the group of the
/// term before it.
pub fn parse_terms(text: &str) -> Result<Vec<Term>, CompileError> {
    let mut parsed = TermParser::parse(Rule::terms, text)?;
    let Some(root) = parsed.next() else {
        return Ok(Vec::new());
    };
    let mut terms = Vec::new();
    let mut continues_or = false;
    for pair in root.into_inner() {
        match pair.as_rule() {
            Rule::term => {
                let mut term = build_term(pair)?;
                if continues_or {
                    if term.operator != Operator::And {
                        return Err(CompileError::InvalidOr {
                            message: "'!' and '?' terms cannot be combined with '||'".into(),
                            col: term.col,
                        });
                    }
                    term.operator = Operator::Or;
                }
                terms.push(term);
            }
            Rule::or_op => continues_or = true,
            Rule::and_op => continues_or = false,
            _ => (),
        }
    }
    Ok(terms)
}

fn column(pair: &Pair<Rule>) -> usize {
    pair.as_span().start_pos().line_col().1
}

fn build_term(pair: Pair<Rule>) -> Result<Term, CompileError> {
    let mut term = Term::new(TermId::Wildcard);
    term.col = column(&pair);
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::inout => {
                term.inout = match inner.into_inner().next().map(|kind| kind.as_str()) {
                    Some("in") => InOut::In,
                    Some("out") => InOut::Out,
                    Some("inout") => InOut::InOut,
                    Some("none") => InOut::None,
                    _ => InOut::Default,
                };
            }
            Rule::not => term.operator = Operator::Not,
            Rule::optional => term.operator = Operator::Optional,
            Rule::pair => {
                let mut members = inner.into_inner();
                if let (Some(predicate), Some(object)) = (members.next(), members.next()) {
                    term.predicate = classify(predicate.as_str(), Position::Predicate);
                    term.object = Some(classify(object.as_str(), Position::Object));
                    term.flags.pair_shorthand = true;
                }
            }
            Rule::identifier => {
                term.predicate = classify(inner.as_str(), Position::Predicate);
            }
            Rule::arguments => {
                let col = column(&inner);
                let arguments: Vec<&str> = inner.into_inner().map(|a| a.as_str()).collect();
                match arguments.as_slice() {
                    [] => term.flags.empty_source = true,
                    [subject] => term.subject = classify(subject, Position::Subject),
                    [subject, object] => {
                        term.subject = classify(subject, Position::Subject);
                        term.object = Some(classify(object, Position::Object));
                    }
                    _ => {
                        return Err(CompileError::TooManyArguments { count: arguments.len(), col });
                    }
                }
            }
            _ => (),
        }
    }
    Ok(term)
}
