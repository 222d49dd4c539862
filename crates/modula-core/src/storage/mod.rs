//! Storage layer
//!
//! One [`Backend`] per supported database, a [`Database`] pool wrapper with
//! versioned migrations, and [`DynamicQuery`] for runtime-named tables.

pub mod backend;
pub mod database;
pub mod dynamic;
pub mod migrations;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use backend::{Backend, Conn, Tx};
pub use database::Database;
pub use dynamic::DynamicQuery;
pub use migrations::{CURRENT_VERSION, MigrationStatus};
pub use mysql::MySqlBackend;
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;
