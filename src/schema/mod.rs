//! Schema registry for restplan
//!
//! Models are declared up front (from a JSON schema file or in code) and
//! registered in a [`SchemaRegistry`]. Every field path a request names is
//! resolved against the registry; an unknown path is an error, never a panic.

mod errors;
mod loader;
mod registry;
mod types;
mod validator;

pub use errors::{SchemaError, SchemaErrorCode, SchemaResult};
pub use loader::SchemaLoader;
pub use registry::{FieldHop, ResolvedPath, SchemaRegistry, LOOKUP_SEP};
pub use types::{Choice, FieldDef, FieldKind, ModelDef};
pub use validator::{json_type_name, RecordValidator};
