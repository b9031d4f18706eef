use crate::config::DbConfig;
use crate::error::Result;
use crate::marshal::ColumnMap;
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::Value;

/// Row from a query result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRow {
    pub columns: ColumnMap,
}

impl QueryRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: Value) {
        self.columns.insert(key, value);
    }

    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.columns
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.columns
            .get(key)
            .and_then(|v| v.as_str().map(String::from))
    }

    /// Integer value, also accepting integral floats and numeric strings
    /// (drivers disagree on how they report COUNT(*) and identifiers).
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.columns.get(key)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.columns.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.columns.get(key).and_then(|v| v.as_bool())
    }

    /// Value of the first column, for single-column results.
    pub fn first_value(&self) -> Option<&Value> {
        self.columns.values().next()
    }
}

impl From<ColumnMap> for QueryRow {
    fn from(columns: ColumnMap) -> Self {
        Self { columns }
    }
}

/// Result of a query
pub type QueryResult = Vec<QueryRow>;

/// Database driver seam.
///
/// Statements arrive fully rendered in the driver's placeholder syntax with
/// their parameters; the driver binds, runs and converts rows. Implementations
/// own a connection pool and are shared across concurrent callers.
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Open a pool and verify it answers.
    async fn connect(config: &DbConfig) -> Result<Self>
    where
        Self: Sized;

    /// Execute a statement, returning the number of affected rows.
    async fn execute(&self, sql: &str, params: &[Value]) -> std::result::Result<u64, sqlx::Error>;

    /// Query and return results
    async fn query(&self, sql: &str, params: &[Value]) -> std::result::Result<QueryResult, sqlx::Error>;

    /// Round trip to the server.
    async fn ping(&self) -> std::result::Result<(), sqlx::Error>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Close the pool. Calling it again is a no-op.
    async fn close(&self);
}

/// Binary cells are surfaced as base64 text.
pub(crate) fn encode_bytes(bytes: &[u8]) -> Value {
    Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Timestamp without zone, in the form chrono's serde impls read back.
pub(crate) fn naive_timestamp(ts: chrono::NaiveDateTime) -> Value {
    Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

pub(crate) fn float_value(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
