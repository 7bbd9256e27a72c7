//! Request-to-query compilation
//!
//! [`QueryCompiler`] turns untrusted query parameters into a [`PlanResult`]:
//! a lazy [`QuerySet`](crate::store::QuerySet), a scalar aggregate map, or a
//! raw payload passed through. Each optional stage reports its outcome in
//! [`Options`].

pub mod aggregation;
pub mod coercer;
#[allow(clippy::module_inception)]
mod compiler;
mod context;
mod errors;
mod options;
pub mod params;
pub mod shaper;

pub use aggregation::{AggregationPlanner, GroupedResult};
pub use coercer::{coerce, coerce_operand, Coerced, RawOperand};
pub use compiler::{CompiledPlan, PlanResult, QueryCompiler, Source};
pub use context::RequestContext;
pub use errors::{QueryError, Stage, ValidationError};
pub use options::Options;
pub use params::{str_to_bool, ParameterBundle, ReservedKeys};
pub use shaper::{OutputColumn, Projection, Shaper, Transform};
