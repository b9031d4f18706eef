//! vocab-store - portable relational data access for the vocabulary service
//!
//! One CRUD/DDL layer that runs unchanged against MySQL or PostgreSQL. Table
//! schemas are declared once, records are plain serde types, and every
//! dialect difference lives in a [`DialectProfile`] value.
//!
//! # Architecture
//!
//! - **Dialect Profile**: placeholder style, auto-increment syntax, identity
//!   retrieval, type and clause quirks per backend
//! - **Schema Registry**: concurrency-safe catalog of [`TableDefinition`]s
//! - **DDL Generator**: idempotent `CREATE TABLE` / `CREATE INDEX` statements
//! - **Record Marshaler**: typed record <-> column map, with naming rules and
//!   server-managed field exclusion
//! - **CRUD Engine**: parameterized Select/Insert/Update/Delete/Count/Exec on
//!   a [`Database`] handle
//!
//! # Example
//!
//! ```rust,no_run
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//! use vocab_store::prelude::*;
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Word {
//!     id: i64,
//!     word: String,
//!     definition: String,
//! }
//!
//! impl Record for Word {}
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let registry = Arc::new(Registry::new());
//!     registry.register(
//!         TableDefinition::new("words")
//!             .column(ColumnDef::new("id", ColumnType::integer()).primary_key().auto_increment())
//!             .column(ColumnDef::new("word", ColumnType::varchar(255)).not_null().indexed())
//!             .column(ColumnDef::new("definition", ColumnType::text()).not_null()),
//!     )?;
//!
//!     let config = DbConfig::new(Backend::Postgres, "localhost", "vocab", "secret", "vocab");
//!     let db = Database::new(config, registry);
//!     db.connect().await?;
//!     db.initialize_tables().await?;
//!
//!     let id = db
//!         .insert("words", &Word { word: "hello".into(), definition: "a greeting".into(), ..Default::default() })
//!         .await?;
//!
//!     let words: Vec<Word> = db
//!         .select("words", &SelectQuery::new().where_eq("id", id))
//!         .await?;
//!     println!("{:?}", words);
//!
//!     db.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Backend Support
//!
//! Both backends are enabled by default; each can be switched off:
//!
//! ```toml
//! [dependencies]
//! vocab-store = { version = "0.1", default-features = false, features = ["postgres"] }
//! ```

pub mod backend;
pub mod builder;
pub mod config;
pub mod database;
pub mod ddl;
pub mod dialect;
pub mod error;
pub mod marshal;
pub mod schema;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use backend::{DatabaseBackend, QueryResult, QueryRow};
pub use builder::{ColumnCasts, ComparisonOp, Condition, LogicalOp, SelectQuery, Statement};
pub use config::{DbConfig, SslMode};
pub use database::Database;
pub use ddl::{create_index_sql, create_table_sql};
pub use dialect::{Backend, DialectProfile, MYSQL, POSTGRES, RANDOM_ORDER};
pub use error::{DbError, Result};
pub use marshal::{scan_rows, to_column_map, ColumnMap, Record};
pub use schema::{ColumnDef, ColumnType, ForeignKey, IndexDef, Registry, TableDefinition};

#[cfg(feature = "mysql")]
pub use mysql::MySqlBackend;

#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;

/// Prelude for common imports
pub mod prelude {
    pub use crate::backend::{DatabaseBackend, QueryResult, QueryRow};
    pub use crate::builder::{Condition, SelectQuery};
    pub use crate::config::{DbConfig, SslMode};
    pub use crate::database::Database;
    pub use crate::dialect::{Backend, RANDOM_ORDER};
    pub use crate::error::{DbError, Result};
    pub use crate::marshal::{ColumnMap, Record};
    pub use crate::schema::{ColumnDef, ColumnType, IndexDef, Registry, TableDefinition};
}
