//! Retrieval-augmented answering over the journal.
//!
//! A question flows through five stages:
//! 1. [`classifier`] scores complexity and picks the tier's tuning
//! 2. [`planner`] chooses the search strategy, date window and answer shape
//! 3. [`router`] sets the time budget, concurrency and fallback chain
//! 4. [`executor`] runs the searches (vector, guarded SQL, or both) and merges
//! 5. [`generator`] prompts the language model with the results
//!
//! [`pipeline`] wires the stages together behind the chat handler.

pub mod classifier;
pub mod planner;
pub mod router;
pub mod sql_guard;
pub mod executor;
pub mod generator;
pub mod pipeline;

pub use classifier::{classify_complexity, Complexity, ComplexityAnalysis, Signal};
pub use executor::{SearchDiagnostics, SearchExecutor, SearchOutcome};
pub use planner::{plan_query, QueryPlan, ResponseShape, SearchStrategy, TimeRange};
pub use router::{route, RoutingDecision};
pub use sql_guard::SqlGuard;
