//! Mountebank-compatible predicates for request matching.
//!
//! Supports the bare field clause (`{"path": "/x"}`), the comparison operators
//! (equals, deepEquals, contains, startsWith, endsWith, matches, exists), the
//! logical operators (not, or, and) and injected JavaScript predicates, with
//! the `caseSensitive` and `except` parameters.
//!
//! # Module Structure
//!
//! - `types` - Predicate model and its JSON form
//! - `evaluator` - Declarative matching plus async evaluation of injected predicates
//! - `generator` - Predicate synthesis from recorded requests (proxy recording)

mod evaluator;
mod generator;
mod types;

pub use evaluator::{matches, PredicateEvaluator};
pub use generator::{same_predicate_set, synthesize, PredicateGenerator};
pub use types::{Operator, Predicate, PredicateKind, PredicateOptions};
