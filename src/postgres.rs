use crate::backend::{encode_bytes, float_value, naive_timestamp, DatabaseBackend, QueryResult, QueryRow};
use crate::config::{DbConfig, SslMode};
use crate::error::{DbError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use sqlx::postgres::{
    PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode, Postgres,
};
use sqlx::query::Query;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tracing::{debug, info};

pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Create a new PostgreSQL backend with connection pool
    pub async fn new(config: &DbConfig) -> Result<Self> {
        config.validate()?;

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port())
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
            .ssl_mode(match config.ssl_mode {
                SslMode::Disable => PgSslMode::Disable,
                SslMode::Prefer => PgSslMode::Prefer,
                SslMode::Require => PgSslMode::Require,
            });

        let pool = PgPoolOptions::new()
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
            "connected to postgres"
        );
        Ok(backend)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn bind_params<'q>(
        mut query: Query<'q, Postgres, PgArguments>,
        params: &'q [Value],
    ) -> Query<'q, Postgres, PgArguments> {
        for value in params {
            query = match value {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => query.bind(i),
                    None => query.bind(n.as_f64().unwrap_or_default()),
                },
                // Strings are always TEXT; temporal columns cast in the SQL.
                Value::String(s) => query.bind(s.as_str()),
                Value::Array(_) | Value::Object(_) => query.bind(sqlx::types::Json(value)),
            };
        }
        query
    }

    /// Convert PostgreSQL row to QueryRow
    fn convert_row(row: &PgRow) -> QueryRow {
        let mut query_row = QueryRow::new();

        for (idx, column) in row.columns().iter().enumerate() {
            let column_name = column.name().to_string();

            let is_null = row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true);
            if is_null {
                query_row.insert(column_name, Value::Null);
                continue;
            }

            let type_name = column.type_info().name();
            let value = match type_name {
                "INT2" => row.try_get::<i16, _>(idx).map(Value::from),
                "INT4" => row.try_get::<i32, _>(idx).map(Value::from),
                "INT8" => row.try_get::<i64, _>(idx).map(Value::from),
                "FLOAT4" => row.try_get::<f32, _>(idx).map(|f| float_value(f as f64)),
                "FLOAT8" => row.try_get::<f64, _>(idx).map(float_value),
                "BOOL" => row.try_get::<bool, _>(idx).map(Value::Bool),
                "JSON" | "JSONB" => row.try_get::<Value, _>(idx),
                "TIMESTAMP" => row.try_get::<NaiveDateTime, _>(idx).map(naive_timestamp),
                "TIMESTAMPTZ" => row
                    .try_get::<DateTime<Utc>, _>(idx)
                    .map(|ts| Value::String(ts.to_rfc3339())),
                "DATE" => row
                    .try_get::<NaiveDate, _>(idx)
                    .map(|d| Value::String(d.to_string())),
                "TIME" => row
                    .try_get::<NaiveTime, _>(idx)
                    .map(|t| Value::String(t.to_string())),
                "BYTEA" => row.try_get::<Vec<u8>, _>(idx).map(|b| encode_bytes(&b)),
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
}

#[async_trait]
impl DatabaseBackend for PostgresBackend {
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
