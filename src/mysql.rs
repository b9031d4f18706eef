use crate::backend::{encode_bytes, float_value, naive_timestamp, DatabaseBackend, QueryResult, QueryRow};
use crate::config::{DbConfig, SslMode};
use crate::error::{DbError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use sqlx::mysql::{
    MySql, MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode,
};
use sqlx::query::Query;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tracing::{debug, info};

pub struct MySqlBackend {
    pool: MySqlPool,
}

impl MySqlBackend {
    /// Create a new MySQL backend with connection pool
    pub async fn new(config: &DbConfig) -> Result<Self> {
        config.validate()?;

        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port())
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
            .charset("utf8mb4")
            .ssl_mode(match config.ssl_mode {
                SslMode::Disable => MySqlSslMode::Disabled,
                SslMode::Prefer => MySqlSslMode::Preferred,
                SslMode::Require => MySqlSslMode::Required,
            });

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .idle_timeout(config.idle_timeout())
            .acquire_timeout(config.acquire_timeout())
            .connect_with(options)
            .await
            .map_err(DbError::Connect)?;

        let backend = Self { pool };
        backend.ping().await.map_err(DbError::Connect)?;

        info!(
            host = %config.host,
            database = %config.database,
            max_connections = config.max_connections,
            "connected to mysql"
        );
        Ok(backend)
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    fn bind_params<'q>(
        mut query: Query<'q, MySql, MySqlArguments>,
        params: &'q [Value],
    ) -> Query<'q, MySql, MySqlArguments> {
        for value in params {
            query = match value {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => match (n.as_i64(), n.as_u64()) {
                    (Some(i), _) => query.bind(i),
                    (None, Some(u)) => query.bind(u),
                    _ => query.bind(n.as_f64().unwrap_or_default()),
                },
                Value::String(s) => query.bind(s.as_str()),
                Value::Array(_) | Value::Object(_) => query.bind(sqlx::types::Json(value)),
            };
        }
        query
    }

    /// Convert MySQL row to QueryRow
    fn convert_row(row: &MySqlRow) -> QueryRow {
        let mut query_row = QueryRow::new();

        for (idx, column) in row.columns().iter().enumerate() {
            let column_name = column.name().to_string();

            let is_null = row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true);
            if is_null {
                query_row.insert(column_name, Value::Null);
                continue;
            }

            // TINYINT(1) is reported as BOOLEAN
            let type_name = column.type_info().name();
            let value = match type_name {
                "BOOLEAN" => row.try_get::<bool, _>(idx).map(Value::Bool),
                "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
                    row.try_get::<i64, _>(idx).map(Value::from)
                }
                t if t.ends_with("UNSIGNED") => row.try_get::<u64, _>(idx).map(Value::from),
                "FLOAT" => row.try_get::<f32, _>(idx).map(|f| float_value(f as f64)),
                "DOUBLE" => row.try_get::<f64, _>(idx).map(float_value),
                "JSON" => row.try_get::<Value, _>(idx),
                "DATETIME" => row.try_get::<NaiveDateTime, _>(idx).map(naive_timestamp),
                "TIMESTAMP" => row
                    .try_get::<DateTime<Utc>, _>(idx)
                    .map(|ts| Value::String(ts.to_rfc3339())),
                "DATE" => row
                    .try_get::<NaiveDate, _>(idx)
                    .map(|d| Value::String(d.to_string())),
                "TIME" => row
                    .try_get::<NaiveTime, _>(idx)
                    .map(|t| Value::String(t.to_string())),
                "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
                    row.try_get::<Vec<u8>, _>(idx).map(|b| encode_bytes(&b))
                }
                _ => row.try_get::<String, _>(idx).map(Value::String),
            };

            match value {
                Ok(value) => query_row.insert(column_name, value),
                Err(e) => {
                    debug!(column = %column_name, type_name, error = %e, "undecodable column, using NULL");
                    query_row.insert(column_name, Value::Null);
                }
            }
        }

        query_row
    }

    /// Get list of all tables in the current database
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT table_name AS name FROM information_schema.tables WHERE table_schema = DATABASE()",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DbError::exec("list_tables", e))?;

        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>("name").ok())
            .collect())
    }
}

#[async_trait]
impl DatabaseBackend for MySqlBackend {
    async fn connect(config: &DbConfig) -> Result<Self> {
        Self::new(config).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> std::result::Result<u64, sqlx::Error> {
        let result = Self::bind_params(sqlx::query(sql), params)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> std::result::Result<QueryResult, sqlx::Error> {
        let rows = Self::bind_params(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;

        let result = rows.iter().map(Self::convert_row).collect();

        Ok(result)
    }

    async fn ping(&self) -> std::result::Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
