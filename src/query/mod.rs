//! Query pipeline
//!
//! A select runs in three stages:
//! 1. compile the filter against the schema ([`CompiledFilter`])
//! 2. scan the entity, evaluating each visible row in two passes
//!    (first pass may defer expressions on labels bound later)
//! 3. form the result: project, resolve deferred projection
//!    expressions, sort, paginate

mod errors;
mod expr;
mod filter;
mod node_dict;
mod projection;
mod read_view;
mod selection;
mod sorter;
mod value;

pub use errors::{QueryError, QueryResult};
pub use expr::{is_expression_key, Evaluation, Expression, MultiOp, UnaryOp};
pub use filter::{CompiledFilter, Condition, Outcome};
pub use node_dict::NodeDict;
pub use projection::form_result;
pub use read_view::ReadView;
pub use selection::{SelectOption, Selection};
pub use sorter::{SortDirection, SortPlan};
pub use value::{compare_values, is_truthy, values_equal};
