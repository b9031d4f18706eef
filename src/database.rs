use crate::backend::{DatabaseBackend, QueryResult};
use crate::builder::{
    count_statement, delete_statement, existence_probe_statement, identity_probe_statement,
    insert_statement, update_statement, ColumnCasts, Condition, SelectQuery, Statement,
};
use crate::config::DbConfig;
use crate::ddl::{create_index_sql, create_table_sql};
use crate::dialect::{is_missing_table_error, Backend, DialectProfile, IdentityStrategy};
use crate::error::{DbError, Result};
use crate::marshal::{scan_rows, ColumnMap, Record};
use crate::schema::{Registry, TableDefinition};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Column used for the generated identifier when the table is not registered
/// or has no single primary key.
const DEFAULT_ID_COLUMN: &str = "id";

/// Dialect-portable CRUD and DDL over one backend.
///
/// A `Database` starts Disconnected. [`connect`](Database::connect) opens the
/// pool; [`close`](Database::close) releases it. While disconnected every
/// operation fails with [`DbError::NotConnected`]; nothing reconnects
/// implicitly. The handle is `Send + Sync` and meant to be shared behind an
/// `Arc`; concurrent calls run in parallel on the pool.
pub struct Database {
    config: DbConfig,
    profile: &'static DialectProfile,
    registry: Arc<Registry>,
    backend: RwLock<Option<Arc<dyn DatabaseBackend>>>,
}

impl Database {
    /// Create a disconnected handle.
    pub fn new(config: DbConfig, registry: Arc<Registry>) -> Self {
        Self {
            profile: config.backend.profile(),
            config,
            registry,
            backend: RwLock::new(None),
        }
    }

    /// Create a handle that is already connected through `backend`.
    pub fn from_backend(
        config: DbConfig,
        registry: Arc<Registry>,
        backend: Arc<dyn DatabaseBackend>,
    ) -> Self {
        Self {
            profile: config.backend.profile(),
            config,
            registry,
            backend: RwLock::new(Some(backend)),
        }
    }

    /// Open the pool for the configured backend and verify it answers.
    /// Connecting an already connected handle is a no-op.
    pub async fn connect(&self) -> Result<()> {
        let mut slot = self.backend.write().await;
        if slot.as_ref().is_some_and(|b| b.is_connected()) {
            return Ok(());
        }

        self.config.validate()?;
        let backend: Arc<dyn DatabaseBackend> = match self.config.backend {
            #[cfg(feature = "mysql")]
            Backend::MySql => Arc::new(crate::mysql::MySqlBackend::connect(&self.config).await?),
            #[cfg(feature = "postgres")]
            Backend::Postgres => {
                Arc::new(crate::postgres::PostgresBackend::connect(&self.config).await?)
            }
            #[allow(unreachable_patterns)]
            other => {
                return Err(DbError::Config(format!(
                    "{} support is not compiled in",
                    other
                )))
            }
        };

        *slot = Some(backend);
        Ok(())
    }

    /// Release the pool. Closing twice is a no-op.
    pub async fn close(&self) {
        let backend = self.backend.write().await.take();
        if let Some(backend) = backend {
            backend.close().await;
            info!(backend = %self.config.backend, "database connection closed");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.backend
            .read()
            .await
            .as_ref()
            .is_some_and(|b| b.is_connected())
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn profile(&self) -> &'static DialectProfile {
        self.profile
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Physical name of a logical table (configured prefix applied).
    pub fn table_name(&self, logical: &str) -> String {
        format!("{}{}", self.config.table_prefix, logical)
    }

    /// Select rows from `table` into records.
    pub async fn select<R>(&self, table: &str, query: &SelectQuery) -> Result<Vec<R>>
    where
        R: Record + DeserializeOwned,
    {
        let rows = self.fetch("select", table, query).await?;
        scan_rows(rows).map_err(|e| e.in_op("select"))
    }

    /// First matching record, if any.
    pub async fn select_one<R>(&self, table: &str, query: &SelectQuery) -> Result<Option<R>>
    where
        R: Record + DeserializeOwned,
    {
        let query = query.clone().limit(1);
        let rows = self.fetch("select_one", table, &query).await?;
        let mut records = scan_rows(rows).map_err(|e| e.in_op("select_one"))?;
        Ok(if records.is_empty() {
            None
        } else {
            Some(records.swap_remove(0))
        })
    }

    /// Select rows as untyped column maps.
    pub async fn select_rows(&self, table: &str, query: &SelectQuery) -> Result<Vec<ColumnMap>> {
        let rows = self.fetch("select_rows", table, query).await?;
        Ok(rows.into_iter().map(|row| row.columns).collect())
    }

    async fn fetch(
        &self,
        op: &'static str,
        table: &str,
        query: &SelectQuery,
    ) -> Result<QueryResult> {
        let backend = self.backend(op).await?;
        let statement = query
            .clone()
            .casts(self.param_casts(table))
            .build(&self.table_name(table), self.profile)
            .map_err(|e| e.in_op(op))?;
        run_query(backend.as_ref(), op, &statement).await
    }

    /// Insert a record and return its generated identifier.
    ///
    /// An identifier of `0` means the row was written but its identifier
    /// could not be determined unambiguously.
    pub async fn insert<R: Record>(&self, table: &str, record: &R) -> Result<i64> {
        const OP: &str = "insert";
        let backend = self.backend(OP).await?;
        let values = record.to_column_map().map_err(|e| e.in_op(OP))?;
        let name = self.table_name(table);
        let id_column = self.identity_column(table);
        let casts = self.param_casts(table);

        match self.profile.identity {
            IdentityStrategy::Returning => {
                let statement =
                    insert_statement(&name, &values, Some(&id_column), &casts, self.profile)?;
                let rows = run_query(backend.as_ref(), OP, &statement).await?;
                let id = rows
                    .first()
                    .and_then(|row| row.get_i64(&id_column))
                    .unwrap_or_else(|| {
                        warn!(table = %name, "insert returned no identifier");
                        0
                    });
                Ok(id)
            }
            IdentityStrategy::Reselect => {
                let statement = insert_statement(&name, &values, None, &casts, self.profile)?;
                run_execute(backend.as_ref(), OP, &statement).await?;
                Ok(self
                    .resolve_identity(backend.as_ref(), &name, &id_column, &values, &casts)
                    .await)
            }
        }
    }

    /// Find the identifier of a just-written row by matching every inserted
    /// value. Anything but exactly one match yields 0.
    async fn resolve_identity(
        &self,
        backend: &dyn DatabaseBackend,
        table: &str,
        id_column: &str,
        values: &ColumnMap,
        casts: &ColumnCasts,
    ) -> i64 {
        let statement = match identity_probe_statement(table, id_column, values, casts, self.profile)
        {
            Ok(statement) => statement,
            Err(e) => {
                warn!(table, error = %e, "could not build identity probe");
                return 0;
            }
        };

        match run_query(backend, "insert", &statement).await {
            Ok(rows) if rows.len() == 1 => rows[0].get_i64(id_column).unwrap_or_else(|| {
                warn!(table, column = id_column, "identity probe returned a non-integer id");
                0
            }),
            Ok(rows) => {
                warn!(table, matches = rows.len(), "inserted row identifier is ambiguous");
                0
            }
            Err(e) => {
                warn!(table, error = %e, "identity probe failed");
                0
            }
        }
    }

    fn identity_column(&self, table: &str) -> String {
        self.registry
            .get(table)
            .and_then(|definition| match definition.primary_key_columns().as_slice() {
                [only] => Some(only.name.clone()),
                _ => None,
            })
            .unwrap_or_else(|| DEFAULT_ID_COLUMN.to_string())
    }

    fn param_casts(&self, table: &str) -> ColumnCasts {
        self.registry
            .get(table)
            .map(|definition| definition.param_casts(self.profile))
            .unwrap_or_default()
    }

    /// Update the rows matching `filter` with the record's non-zero fields.
    /// Returns the number of affected rows.
    pub async fn update<R: Record>(
        &self,
        table: &str,
        record: &R,
        filter: Option<&Condition>,
    ) -> Result<u64> {
        const OP: &str = "update";
        let backend = self.backend(OP).await?;
        let values = record.to_column_map().map_err(|e| e.in_op(OP))?;
        let name = self.table_name(table);

        if values.is_empty() {
            return Err(DbError::NoData { op: OP, table: name });
        }
        let filter = filter.ok_or_else(|| DbError::MissingWhereClause {
            op: OP,
            table: name.clone(),
        })?;

        let statement =
            update_statement(&name, &values, filter, &self.param_casts(table), self.profile)?;
        let affected = run_execute(backend.as_ref(), OP, &statement).await?;
        if affected == 0 {
            return Err(DbError::NoRowsAffected { op: OP, table: name });
        }
        Ok(affected)
    }

    /// Delete the rows matching `filter`. Returns the number of affected rows.
    pub async fn delete(&self, table: &str, filter: Option<&Condition>) -> Result<u64> {
        const OP: &str = "delete";
        let backend = self.backend(OP).await?;
        let name = self.table_name(table);

        let filter = filter.ok_or_else(|| DbError::MissingWhereClause {
            op: OP,
            table: name.clone(),
        })?;

        let statement = delete_statement(&name, filter, &self.param_casts(table), self.profile)?;
        let affected = run_execute(backend.as_ref(), OP, &statement).await?;
        if affected == 0 {
            return Err(DbError::NoRowsAffected { op: OP, table: name });
        }
        Ok(affected)
    }

    /// Count the rows matching `filter`, or every row.
    pub async fn count(&self, table: &str, filter: Option<&Condition>) -> Result<i64> {
        const OP: &str = "count";
        let backend = self.backend(OP).await?;
        let statement = count_statement(
            &self.table_name(table),
            filter,
            &self.param_casts(table),
            self.profile,
        )?;
        let rows = run_query(backend.as_ref(), OP, &statement).await?;

        rows.first()
            .and_then(|row| {
                row.get_i64("count")
                    .or_else(|| row.first_value().and_then(Value::as_i64))
            })
            .ok_or_else(|| DbError::InvalidDestination {
                op: OP,
                reason: "COUNT(*) returned no value".to_string(),
            })
    }

    /// Execute a caller-written statement. `?` placeholders are rewritten for
    /// the active dialect. Returns the number of affected rows.
    pub async fn exec(&self, sql: &str, params: &[Value]) -> Result<u64> {
        const OP: &str = "exec";
        let backend = self.backend(OP).await?;
        let statement = Statement::raw(sql, params, self.profile)?;
        run_execute(backend.as_ref(), OP, &statement).await
    }

    /// Whether the physical table for `table` exists.
    ///
    /// A "does not exist" failure of the zero-row probe means absent; any
    /// other failure is returned as an error.
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        const OP: &str = "table_exists";
        let backend = self.backend(OP).await?;
        let statement = existence_probe_statement(&self.table_name(table), self.profile)?;
        probe_table(backend.as_ref(), &statement).await
    }

    /// Create every registered table that does not exist yet, referenced
    /// tables first, and (re-)create their indexes.
    pub async fn initialize_tables(&self) -> Result<()> {
        let tables = self.registry.in_dependency_order();
        info!(tables = tables.len(), "initializing tables");
        for table in &tables {
            self.create_table(table).await?;
        }
        Ok(())
    }

    /// Initialize one registered table.
    pub async fn initialize_table(&self, table: &str) -> Result<()> {
        let definition = self.registry.get(table).ok_or_else(|| {
            DbError::definition("initialize_table", format!("table {} is not registered", table))
        })?;
        self.create_table(&definition).await
    }

    async fn create_table(&self, table: &TableDefinition) -> Result<()> {
        const OP: &str = "initialize_table";
        let backend = self.backend(OP).await?;
        let prefix = self.config.table_prefix.as_str();
        let name = self.table_name(&table.name);

        let probe = existence_probe_statement(&name, self.profile).map_err(|e| e.in_op(OP))?;
        if probe_table(backend.as_ref(), &probe)
            .await
            .map_err(|e| e.in_op(OP))?
        {
            debug!(table = %name, "table exists, skipping create");
        } else {
            let ddl = Statement {
                sql: create_table_sql(table, self.profile, prefix),
                params: Vec::new(),
            };
            run_execute(backend.as_ref(), OP, &ddl).await?;
            info!(table = %name, "created table");
        }

        for sql in create_index_sql(table, self.profile, prefix) {
            debug!(sql = %sql, "executing");
            if let Err(e) = backend.execute(&sql, &[]).await {
                warn!(table = %name, sql = %sql, error = %e, "index creation failed");
            }
        }

        Ok(())
    }

    async fn backend(&self, op: &'static str) -> Result<Arc<dyn DatabaseBackend>> {
        match self.backend.read().await.as_ref() {
            Some(backend) if backend.is_connected() => Ok(Arc::clone(backend)),
            _ => Err(DbError::NotConnected { op }),
        }
    }
}

async fn run_query(
    backend: &dyn DatabaseBackend,
    op: &'static str,
    statement: &Statement,
) -> Result<QueryResult> {
    debug!(op, sql = %statement.sql, params = statement.params.len(), "executing");
    backend
        .query(&statement.sql, &statement.params)
        .await
        .map_err(|e| DbError::exec(op, e))
}

async fn run_execute(
    backend: &dyn DatabaseBackend,
    op: &'static str,
    statement: &Statement,
) -> Result<u64> {
    debug!(op, sql = %statement.sql, params = statement.params.len(), "executing");
    backend
        .execute(&statement.sql, &statement.params)
        .await
        .map_err(|e| DbError::exec(op, e))
}

async fn probe_table(backend: &dyn DatabaseBackend, statement: &Statement) -> Result<bool> {
    debug!(sql = %statement.sql, "probing table");
    match backend.query(&statement.sql, &statement.params).await {
        Ok(_) => Ok(true),
        Err(e) if is_missing_table_error(&e.to_string()) => Ok(false),
        Err(e) => Err(DbError::exec("table_exists", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::QueryRow;
    use crate::schema::{ColumnDef, ColumnType};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockBackend {
        executed: Mutex<Vec<(String, Vec<Value>)>>,
        responses: Mutex<VecDeque<std::result::Result<QueryResult, String>>>,
        failing_execute: Mutex<Vec<String>>,
        rows_affected: u64,
        closed: AtomicBool,
    }

    impl MockBackend {
        fn new(rows_affected: u64) -> Self {
            Self {
                rows_affected,
                ..Default::default()
            }
        }

        fn respond(&self, rows: Vec<ColumnMap>) {
            self.responses
                .lock()
                .unwrap()
                .push_back(Ok(rows.into_iter().map(QueryRow::from).collect()));
        }

        fn fail_query(&self, message: &str) {
            self.responses
                .lock()
                .unwrap()
                .push_back(Err(message.to_string()));
        }

        fn fail_execute_containing(&self, fragment: &str) {
            self.failing_execute.lock().unwrap().push(fragment.to_string());
        }

        fn statements(&self) -> Vec<String> {
            self.executed
                .lock()
                .unwrap()
                .iter()
                .map(|(sql, _)| sql.clone())
                .collect()
        }

        fn params(&self, index: usize) -> Vec<Value> {
            self.executed.lock().unwrap()[index].1.clone()
        }
    }

    #[async_trait]
    impl DatabaseBackend for MockBackend {
        async fn connect(_config: &DbConfig) -> Result<Self> {
            Ok(Self::new(1))
        }

        async fn execute(&self, sql: &str, params: &[Value]) -> std::result::Result<u64, sqlx::Error> {
            self.executed
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            let failing = self.failing_execute.lock().unwrap();
            if failing.iter().any(|f| sql.contains(f.as_str())) {
                return Err(sqlx::Error::Protocol(format!("cannot execute {}", sql)));
            }
            Ok(self.rows_affected)
        }

        async fn query(&self, sql: &str, params: &[Value]) -> std::result::Result<QueryResult, sqlx::Error> {
            self.executed
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            match self.responses.lock().unwrap().pop_front() {
                Some(Ok(rows)) => Ok(rows),
                Some(Err(message)) => Err(sqlx::Error::Protocol(message)),
                None => Ok(Vec::new()),
            }
        }

        async fn ping(&self) -> std::result::Result<(), sqlx::Error> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Word {
        id: i64,
        word: String,
        definition: String,
        starred: bool,
    }

    impl Record for Word {}

    fn config(backend: Backend) -> DbConfig {
        DbConfig::new(backend, "localhost", "vocab", "secret", "vocab")
    }

    fn words_registry() -> Arc<Registry> {
        let registry = Registry::new();
        registry
            .register(
                TableDefinition::new("words")
                    .column(
                        ColumnDef::new("id", ColumnType::integer())
                            .primary_key()
                            .auto_increment(),
                    )
                    .column(
                        ColumnDef::new("word", ColumnType::varchar(255))
                            .not_null()
                            .indexed(),
                    )
                    .column(ColumnDef::new("definition", ColumnType::text()).not_null())
                    .column(ColumnDef::new("reviewed_at", ColumnType::timestamp())),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn database(backend: Backend, mock: &Arc<MockBackend>) -> Database {
        let backend_handle: Arc<dyn DatabaseBackend> = mock.clone();
        Database::from_backend(config(backend), words_registry(), backend_handle)
    }

    fn row(pairs: &[(&str, Value)]) -> ColumnMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn hello() -> Word {
        Word {
            word: "hello".to_string(),
            definition: "a greeting".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_disconnected_operations_fail() {
        let db = Database::new(config(Backend::MySql), words_registry());
        assert!(!db.is_connected().await);

        let err = db.insert("words", &hello()).await.unwrap_err();
        assert!(matches!(err, DbError::NotConnected { op: "insert" }));

        let err = db
            .select::<Word>("words", &SelectQuery::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotConnected { op: "select" }));

        let err = db.count("words", None).await.unwrap_err();
        assert!(matches!(err, DbError::NotConnected { op: "count" }));

        let err = db.exec("DELETE FROM words", &[]).await.unwrap_err();
        assert!(matches!(err, DbError::NotConnected { op: "exec" }));

        let err = db.initialize_tables().await.unwrap_err();
        assert!(matches!(err, DbError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mock = Arc::new(MockBackend::new(1));
        let db = database(Backend::MySql, &mock);
        assert!(db.is_connected().await);

        db.close().await;
        db.close().await;

        assert!(!db.is_connected().await);
        assert!(mock.closed.load(Ordering::SeqCst));
        let err = db.delete("words", Some(&Condition::eq("id", 1))).await.unwrap_err();
        assert!(matches!(err, DbError::NotConnected { op: "delete" }));
    }

    #[tokio::test]
    async fn test_insert_returning_postgres() {
        let mock = Arc::new(MockBackend::new(1));
        mock.respond(vec![row(&[("id", json!(42))])]);
        let db = database(Backend::Postgres, &mock);

        let id = db.insert("words", &hello()).await.unwrap();

        assert_eq!(id, 42);
        assert_eq!(
            mock.statements(),
            vec!["INSERT INTO words (definition, word) VALUES ($1, $2) RETURNING id"]
        );
        assert_eq!(mock.params(0), vec![json!("a greeting"), json!("hello")]);
    }

    #[tokio::test]
    async fn test_insert_reselect_mysql() {
        let mock = Arc::new(MockBackend::new(1));
        mock.respond(vec![row(&[("id", json!(7))])]);
        let db = database(Backend::MySql, &mock);

        let id = db.insert("words", &hello()).await.unwrap();

        assert_eq!(id, 7);
        assert_eq!(
            mock.statements(),
            vec![
                "INSERT INTO words (definition, word) VALUES (?, ?)",
                "SELECT id FROM words WHERE (definition = ? AND word = ?) LIMIT 2",
            ]
        );
        assert_eq!(mock.params(1), vec![json!("a greeting"), json!("hello")]);
    }

    #[tokio::test]
    async fn test_insert_reselect_ambiguous_or_empty_yields_zero() {
        let mock = Arc::new(MockBackend::new(1));
        mock.respond(vec![row(&[("id", json!(1))]), row(&[("id", json!(2))])]);
        mock.respond(vec![]);
        mock.fail_query("connection reset");
        let db = database(Backend::MySql, &mock);

        assert_eq!(db.insert("words", &hello()).await.unwrap(), 0);
        assert_eq!(db.insert("words", &hello()).await.unwrap(), 0);
        assert_eq!(db.insert("words", &hello()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_empty_record_is_no_data() {
        let mock = Arc::new(MockBackend::new(1));
        let db = database(Backend::Postgres, &mock);

        let record = Word {
            id: 9,
            ..Default::default()
        };
        let err = db.insert("words", &record).await.unwrap_err();

        assert!(matches!(err, DbError::NoData { op: "insert", .. }));
        assert!(mock.statements().is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete_require_where() {
        let mock = Arc::new(MockBackend::new(1));
        let db = database(Backend::MySql, &mock);

        let err = db.update("words", &hello(), None).await.unwrap_err();
        assert!(matches!(err, DbError::MissingWhereClause { op: "update", .. }));

        let err = db.delete("words", None).await.unwrap_err();
        assert!(matches!(err, DbError::MissingWhereClause { op: "delete", .. }));

        assert!(mock.statements().is_empty());
    }

    #[tokio::test]
    async fn test_filters_matching_every_row_do_not_scope_mutations() {
        let mock = Arc::new(MockBackend::new(5));
        let db = database(Backend::Postgres, &mock);

        let err = db
            .update("words", &hello(), Some(&Condition::all(vec![])))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::MissingWhereClause { op: "update", .. }));

        let err = db
            .delete("words", Some(&Condition::matching(&ColumnMap::new())))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::MissingWhereClause { op: "delete", .. }));

        let err = db
            .delete("words", Some(&Condition::raw("", vec![])))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::MissingWhereClause { op: "delete", .. }));

        assert!(mock.statements().is_empty());
    }

    #[tokio::test]
    async fn test_update_statement_and_rows_affected() {
        let mock = Arc::new(MockBackend::new(1));
        let db = database(Backend::Postgres, &mock);

        let affected = db
            .update("words", &hello(), Some(&Condition::eq("id", 3)))
            .await
            .unwrap();

        assert_eq!(affected, 1);
        assert_eq!(
            mock.statements(),
            vec!["UPDATE words SET definition = $1, word = $2 WHERE id = $3"]
        );
        assert_eq!(
            mock.params(0),
            vec![json!("a greeting"), json!("hello"), json!(3)]
        );
    }

    #[tokio::test]
    async fn test_zero_rows_affected_is_an_error() {
        let mock = Arc::new(MockBackend::new(0));
        let db = database(Backend::MySql, &mock);

        let err = db
            .update("words", &hello(), Some(&Condition::eq("id", 3)))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NoRowsAffected { op: "update", .. }));

        let err = db
            .delete("words", Some(&Condition::eq("id", 3)))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NoRowsAffected { op: "delete", .. }));
    }

    #[tokio::test]
    async fn test_select_translates_terms_and_scans() {
        let mock = Arc::new(MockBackend::new(1));
        mock.respond(vec![row(&[
            ("id", json!(1)),
            ("word", json!("hello")),
            ("definition", json!("a greeting")),
            ("starred", json!(true)),
            ("extra", json!("ignored")),
        ])]);
        let db = database(Backend::MySql, &mock);

        let query = SelectQuery::new()
            .where_eq("word", "hello")
            .order_random()
            .limit(5);
        let words: Vec<Word> = db.select("words", &query).await.unwrap();

        assert_eq!(
            mock.statements(),
            vec!["SELECT * FROM words WHERE word = ? ORDER BY RAND() LIMIT 5"]
        );
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].id, 1);
        assert!(words[0].starred);
    }

    #[tokio::test]
    async fn test_select_one_and_rows() {
        let mock = Arc::new(MockBackend::new(1));
        mock.respond(vec![]);
        mock.respond(vec![row(&[("word", json!("hello"))])]);
        let db = database(Backend::Postgres, &mock);

        let found: Option<Word> = db
            .select_one("words", &SelectQuery::new().where_eq("id", 1))
            .await
            .unwrap();
        assert!(found.is_none());

        let rows = db
            .select_rows("words", &SelectQuery::new().columns(vec!["word"]))
            .await
            .unwrap();
        assert_eq!(rows, vec![row(&[("word", json!("hello"))])]);

        assert_eq!(
            mock.statements(),
            vec![
                "SELECT * FROM words WHERE id = $1 LIMIT 1",
                "SELECT word FROM words",
            ]
        );
    }

    #[tokio::test]
    async fn test_query_exec_error_carries_op() {
        let mock = Arc::new(MockBackend::new(1));
        mock.fail_query("syntax error");
        let db = database(Backend::MySql, &mock);

        let err = db
            .select::<Word>("words", &SelectQuery::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::QueryExec { op: "select", .. }));
    }

    #[tokio::test]
    async fn test_count() {
        let mock = Arc::new(MockBackend::new(1));
        mock.respond(vec![row(&[("count", json!(12))])]);
        let db = database(Backend::Postgres, &mock);

        let count = db
            .count("words", Some(&Condition::like("word", "he%")))
            .await
            .unwrap();

        assert_eq!(count, 12);
        assert_eq!(
            mock.statements(),
            vec!["SELECT COUNT(*) AS count FROM words WHERE word LIKE $1"]
        );
    }

    #[tokio::test]
    async fn test_timestamp_parameters_are_cast_on_postgres() {
        let mock = Arc::new(MockBackend::new(1));
        mock.respond(vec![row(&[("count", json!(2))])]);
        mock.respond(vec![]);
        let db = database(Backend::Postgres, &mock);

        let since = Condition::gt("reviewed_at", "2024-05-01T10:00:00Z")
            .and(Condition::eq("word", "2024-05-01T10:00:00Z"));
        db.count("words", Some(&since)).await.unwrap();
        db.select_rows("words", &SelectQuery::new().where_clause(since.clone()))
            .await
            .unwrap();
        db.delete("words", Some(&since)).await.unwrap();

        let scoped = "WHERE (reviewed_at > $1::TIMESTAMP AND word = $2)";
        assert_eq!(
            mock.statements(),
            vec![
                format!("SELECT COUNT(*) AS count FROM words {}", scoped),
                format!("SELECT * FROM words {}", scoped),
                format!("DELETE FROM words {}", scoped),
            ]
        );

        let mysql_mock = Arc::new(MockBackend::new(1));
        let mysql = database(Backend::MySql, &mysql_mock);
        mysql.delete("words", Some(&since)).await.unwrap();
        assert_eq!(
            mysql_mock.statements(),
            vec!["DELETE FROM words WHERE (reviewed_at > ? AND word = ?)"]
        );
    }

    #[tokio::test]
    async fn test_exec_rebinds_placeholders() {
        let mock = Arc::new(MockBackend::new(3));
        let db = database(Backend::Postgres, &mock);

        let affected = db
            .exec(
                "UPDATE words SET starred = ? WHERE word <> '?' AND id > ?",
                &[json!(true), json!(10)],
            )
            .await
            .unwrap();

        assert_eq!(affected, 3);
        assert_eq!(
            mock.statements(),
            vec!["UPDATE words SET starred = $1 WHERE word <> '?' AND id > $2"]
        );
    }

    #[tokio::test]
    async fn test_table_prefix_applies_everywhere() {
        let mock = Arc::new(MockBackend::new(1));
        mock.respond(vec![row(&[("count", json!(0))])]);
        let backend_handle: Arc<dyn DatabaseBackend> = mock.clone();
        let db = Database::from_backend(
            config(Backend::MySql).with_table_prefix("vocab_"),
            words_registry(),
            backend_handle,
        );

        assert_eq!(db.table_name("words"), "vocab_words");
        db.count("words", None).await.unwrap();
        db.delete("words", Some(&Condition::eq("id", 1))).await.unwrap();

        assert_eq!(
            mock.statements(),
            vec![
                "SELECT COUNT(*) AS count FROM vocab_words",
                "DELETE FROM vocab_words WHERE id = ?",
            ]
        );
    }

    #[tokio::test]
    async fn test_table_exists_classifies_errors() {
        let mock = Arc::new(MockBackend::new(1));
        mock.respond(vec![]);
        mock.fail_query("Table 'vocab.words' doesn't exist");
        mock.fail_query("connection refused");
        let db = database(Backend::MySql, &mock);

        assert!(db.table_exists("words").await.unwrap());
        assert!(!db.table_exists("words").await.unwrap());
        let err = db.table_exists("words").await.unwrap_err();
        assert!(matches!(err, DbError::QueryExec { op: "table_exists", .. }));
    }

    #[tokio::test]
    async fn test_initialize_creates_missing_table_and_indexes() {
        let mock = Arc::new(MockBackend::new(0));
        mock.fail_query("relation \"words\" does not exist");
        let db = database(Backend::Postgres, &mock);

        db.initialize_tables().await.unwrap();

        let statements = mock.statements();
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0], "SELECT * FROM words LIMIT 0");
        assert!(statements[1].starts_with("CREATE TABLE IF NOT EXISTS words ("));
        assert!(statements[1].contains("id SERIAL PRIMARY KEY"));
        assert_eq!(
            statements[2],
            "CREATE INDEX IF NOT EXISTS idx_words_word ON words (word)"
        );
    }

    #[tokio::test]
    async fn test_initialize_skips_existing_table_and_swallows_index_errors() {
        let mock = Arc::new(MockBackend::new(0));
        mock.respond(vec![]);
        mock.fail_execute_containing("CREATE INDEX");
        let db = database(Backend::MySql, &mock);

        db.initialize_table("words").await.unwrap();

        assert_eq!(
            mock.statements(),
            vec![
                "SELECT * FROM words LIMIT 0",
                "CREATE INDEX idx_words_word ON words (word)",
            ]
        );
    }

    #[tokio::test]
    async fn test_initialize_propagates_connectivity_failure() {
        let mock = Arc::new(MockBackend::new(0));
        mock.fail_query("connection refused");
        let db = database(Backend::MySql, &mock);

        let err = db.initialize_tables().await.unwrap_err();
        assert!(matches!(err, DbError::QueryExec { op: "initialize_table", .. }));
        assert_eq!(mock.statements().len(), 1);
    }

    #[tokio::test]
    async fn test_initialize_unregistered_table() {
        let mock = Arc::new(MockBackend::new(0));
        let db = database(Backend::MySql, &mock);

        let err = db.initialize_table("quizzes").await.unwrap_err();
        assert!(matches!(err, DbError::InvalidDefinition { .. }));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let mut config = config(Backend::Postgres);
        config.host.clear();
        let db = Database::new(config, Arc::new(Registry::new()));

        let err = db.connect().await.unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
        assert!(!db.is_connected().await);
    }
}
