use crate::builder::{validate_identifier, ColumnCasts};
use crate::dialect::{Backend, DialectProfile, MYSQL, POSTGRES};
use crate::error::{DbError, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

/// SQL type of a column, spelled once per dialect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    pub mysql: String,
    pub postgres: String,
}

impl ColumnType {
    pub fn new(mysql: impl Into<String>, postgres: impl Into<String>) -> Self {
        Self {
            mysql: mysql.into(),
            postgres: postgres.into(),
        }
    }

    /// Same spelling on every dialect.
    pub fn uniform(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self::new(sql.clone(), sql)
    }

    pub fn integer() -> Self {
        Self::new("INT", "INTEGER")
    }

    pub fn big_integer() -> Self {
        Self::uniform("BIGINT")
    }

    pub fn varchar(len: u32) -> Self {
        Self::uniform(format!("VARCHAR({})", len))
    }

    pub fn text() -> Self {
        Self::uniform("TEXT")
    }

    pub fn boolean() -> Self {
        Self::new(MYSQL.boolean_type, POSTGRES.boolean_type)
    }

    pub fn timestamp() -> Self {
        Self::new(MYSQL.timestamp_type, POSTGRES.timestamp_type)
    }

    pub fn json() -> Self {
        Self::new("JSON", "JSONB")
    }

    pub fn for_dialect(&self, profile: &DialectProfile) -> &str {
        match profile.backend {
            Backend::MySql => &self.mysql,
            Backend::Postgres => &self.postgres,
        }
    }
}

/// Column-level reference to another table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: ColumnType,
    pub not_null: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub unique: bool,
    pub indexed: bool,
    /// Default expression, e.g. `CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP`.
    /// Clauses a dialect does not understand are stripped at generation time.
    pub default: Option<String>,
    pub foreign_key: Option<ForeignKey>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, sql_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            not_null: false,
            primary_key: false,
            auto_increment: false,
            unique: false,
            indexed: false,
            default: None,
            foreign_key: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn default_value(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_key = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
        });
        self
    }
}

/// Index definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, columns: Vec<impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(|c| c.into()).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Table schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
    pub description: String,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            description: String::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key_columns(&self) -> Vec<&ColumnDef> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    /// Casts for text parameters bound to this table's date and time columns.
    pub fn param_casts(&self, profile: &DialectProfile) -> ColumnCasts {
        if !profile.cast_temporal_params {
            return ColumnCasts::new();
        }
        self.columns
            .iter()
            .filter_map(|c| {
                let sql_type = c.sql_type.for_dialect(profile);
                let upper = sql_type.to_ascii_uppercase();
                ["TIMESTAMP", "DATE", "TIME", "INTERVAL"]
                    .iter()
                    .any(|t| upper.starts_with(t))
                    .then(|| (c.name.clone(), sql_type.to_string()))
            })
            .collect()
    }

    /// Tables this one references through foreign keys, excluding itself.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = self
            .columns
            .iter()
            .filter_map(|c| c.foreign_key.as_ref())
            .map(|fk| fk.table.as_str())
            .filter(|t| *t != self.name)
            .collect();
        deps.sort_unstable();
        deps.dedup();
        deps
    }

    /// Structural checks applied on registration.
    pub fn validate(&self) -> Result<()> {
        const OP: &str = "register";

        if self.name.trim().is_empty() {
            return Err(DbError::definition(OP, "table name is empty"));
        }
        validate_identifier(&self.name).map_err(|reason| DbError::definition(OP, reason))?;

        if self.columns.is_empty() {
            return Err(DbError::definition(
                OP,
                format!("table {} has no columns", self.name),
            ));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            validate_identifier(&column.name)
                .map_err(|reason| DbError::definition(OP, reason))?;
            if !seen.insert(column.name.as_str()) {
                return Err(DbError::definition(
                    OP,
                    format!("duplicate column {} in table {}", column.name, self.name),
                ));
            }
            if column.sql_type.mysql.trim().is_empty() || column.sql_type.postgres.trim().is_empty()
            {
                return Err(DbError::definition(
                    OP,
                    format!("column {}.{} has no type", self.name, column.name),
                ));
            }
            if let Some(fk) = &column.foreign_key {
                validate_identifier(&fk.table).map_err(|reason| DbError::definition(OP, reason))?;
                validate_identifier(&fk.column)
                    .map_err(|reason| DbError::definition(OP, reason))?;
            }
        }

        for index in &self.indexes {
            validate_identifier(&index.name).map_err(|reason| DbError::definition(OP, reason))?;
            if index.columns.is_empty() {
                return Err(DbError::definition(
                    OP,
                    format!("index {} has no columns", index.name),
                ));
            }
            if let Some(missing) = index.columns.iter().find(|c| !seen.contains(c.as_str())) {
                return Err(DbError::definition(
                    OP,
                    format!(
                        "index {} references unknown column {}.{}",
                        index.name, self.name, missing
                    ),
                ));
            }
        }

        Ok(())
    }
}

/// Catalog of table definitions, keyed by logical table name.
///
/// Writers are mutually exclusive; readers proceed in parallel.
#[derive(Debug, Default)]
pub struct Registry {
    tables: RwLock<HashMap<String, TableDefinition>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table, replacing any previous definition with the same name.
    pub fn register(&self, table: TableDefinition) -> Result<()> {
        table.validate()?;
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.insert(table.name.clone(), table);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<TableDefinition> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.get(name).cloned()
    }

    pub fn exists(&self, name: &str) -> bool {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.contains_key(name)
    }

    /// Snapshot of every definition. Changes to the returned map never reach
    /// the registry.
    pub fn all(&self) -> HashMap<String, TableDefinition> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.clone()
    }

    /// Registered table names, sorted.
    pub fn names(&self) -> Vec<String> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.clear();
    }

    /// Definitions ordered so that every table comes after the registered
    /// tables it references. Ties and cycles fall back to name order.
    pub fn in_dependency_order(&self) -> Vec<TableDefinition> {
        let mut pending: BTreeMap<String, TableDefinition> = self.all().into_iter().collect();
        let mut ordered = Vec::with_capacity(pending.len());
        let mut placed: HashSet<String> = HashSet::new();

        while !pending.is_empty() {
            let ready: Vec<String> = pending
                .values()
                .filter(|t| {
                    t.dependencies()
                        .iter()
                        .all(|dep| placed.contains(*dep) || !pending.contains_key(*dep))
                })
                .map(|t| t.name.clone())
                .collect();

            // A cycle: release the first remaining table by name.
            let batch = if ready.is_empty() {
                pending.keys().next().cloned().into_iter().collect()
            } else {
                ready
            };

            for name in batch {
                if let Some(table) = pending.remove(&name) {
                    placed.insert(name);
                    ordered.push(table);
                }
            }
        }

        ordered
    }
}
