//! SQL template execution and result shaping for the Runar ecosystem.
//!
//! # Intention
//!
//! - Turn SQL templates with typed placeholder tokens into escaped statements.
//! - Execute them through a pluggable [`Connection`], caching SELECT results
//!   in an explicitly shared [`QueryRegistry`].
//! - Reshape results into values, maps, groups and bound objects.
//!
//! # Architectural Boundaries
//!
//! - The wire-level driver lives behind [`Connection`]; SQLite is provided.
//! - No query builder, ORM or migration logic belongs here.

pub mod adapter;
pub mod error;
pub mod parser;
pub mod query;
pub mod result;
pub mod sqlite;
pub mod value;

pub use adapter::{Connection, DriverResult, ResultSet};
pub use error::{Error, Result};
pub use parser::{QueryParser, Token, TokenKind, TypeCode};
pub use query::{LoggedQuery, Query, QueryConfig, QueryRegistry, QueryState};
pub use result::{BindTarget, Bindable, Construct, InstanceCache, QueryResult};
pub use sqlite::{SqliteConfig, SqliteConnection};
pub use value::{Key, Keyed, Params, Row, Value};
