//! Quarry – an in-memory entity/relationship store with a backtracking term
//! query engine.
//!
//! Entities are opaque, versioned identifiers. Facts are ids attached to
//! entities: either a plain tag (`Sentient(Animal)`) or a relationship pair
//! (`IsA(Dog, Animal)`). Queries are lists of terms over variables, which the
//! engine resolves like a tiny Datalog: joins with backtracking, wildcards,
//! transitive closure and implicit inheritance along `IsA`.
//!
//! ## Modules
//! * [`construct`] – Entities, ids, relationship traits and the entity generator.
//! * [`store`] – The read-only [`store::FactStore`] interface queries run against.
//! * [`world`] – The in-memory [`world::World`] implementing it, with a deferred
//!   [`world::CommandQueue`].
//! * [`term`] and [`parser`] – Terms and their textual syntax (see `terms.pest`).
//! * [`compiler`], [`query`] and [`variable`] – Compilation into an immutable [`query::Query`].
//! * [`matcher`], [`transitive`] and [`cursor`] – Evaluation.
//! * [`engine`] – Fact scripts and collected results over a shared world.
//! * [`persist`] – SQLite snapshots.
//! * [`settings`] and [`server`] – Configuration and the HTTP surface of the binary.
//!
//! ## Term syntax
//! * `Pred(Subject, Object)`, `Pred(Subject)`, `Pred` for `Pred(.)`, and
//!   `(Pred, Object)` for `Pred(., Object)`.
//! * `.` is the result entity, `*` a wildcard, `$` or `_` an anonymous variable.
//! * `_Name` is a variable; so is an all-uppercase name such as `X` when used as
//!   subject or object. `\Name` always names an entity.
//! * `,` separates terms, `||` adds an alternative to the previous term, `!`
//!   negates a term and `?` makes it optional.
//!
//! ## Quick Start
//! ```
//! use quarry::{world::World, construct::IS_A, Query};
//! let mut world = World::new();
//! let animal = world.named("Animal");
//! let dog = world.named("Dog");
//! let sentient = world.named("Sentient");
//! world.add_pair(dog, IS_A, animal).unwrap();
//! world.add(animal, quarry::construct::Id::Entity(sentient)).unwrap();
//!
//! let query = Query::parse(&world, "Sentient(X), IsA(Y, X)").unwrap();
//! let y = query.find_variable("Y").unwrap();
//! let rows: Vec<_> = query.iter(&world).map(|row| row.get(y)).collect();
//! assert_eq!(rows, vec![Some(dog)]);
//! ```

pub mod compiler;
pub mod construct;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod parser;
pub mod persist;
pub mod query;
pub mod server;
pub mod settings;
pub mod store;
pub mod term;
pub mod transitive;
pub mod variable;
pub mod world;

pub use cursor::{Cursor, CursorState, Row};
pub use error::{CompileError, QuarryError, Result};
pub use query::Query;
pub use store::FactStore;
pub use term::Term;

/// Compiles a term list against a store.
pub fn compile(store: &dyn FactStore, terms: &[Term]) -> std::result::Result<Query, CompileError> {
    Query::compile(store, terms)
}

/// Starts iterating a compiled query over a store.
pub fn iterate<'q, 'w>(query: &'q Query, store: &'w dyn FactStore) -> Cursor<'q, 'w> {
    query.iter(store)
}
