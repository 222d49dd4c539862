//! Safe dynamic queries
//!
//! - `identifier`: table/column name validation, the only gate between
//!   caller-supplied names and statement text
//! - `dialect`: placeholder syntax and integer width per backend
//! - `value`: closed value type and ordered result rows
//! - `builder`: SELECT/INSERT/UPDATE/DELETE/COUNT/EXISTS compilation

pub mod builder;
pub mod dialect;
pub mod identifier;
pub mod value;

pub use builder::{CompiledQuery, MAX_LIMIT, QueryBuilder, SelectParams};
pub use dialect::Dialect;
pub use identifier::{RESERVED_KEYWORDS, is_safe_identifier, validate_identifier};
pub use value::{ColumnValues, Row, SqlValue};
