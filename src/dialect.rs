//! Per-backend SQL constants.
//!
//! All dialect-dependent behavior lives in a [`DialectProfile`] value. The DDL
//! generator and the CRUD engine read these fields instead of branching on the
//! backend, so a third backend is one more profile constant.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported SQL backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    #[serde(alias = "mariadb")]
    MySql,
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
}

impl Backend {
    pub fn profile(self) -> &'static DialectProfile {
        match self {
            Backend::MySql => &MYSQL,
            Backend::Postgres => &POSTGRES,
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Backend::MySql => 3306,
            Backend::Postgres => 5432,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::MySql => write!(f, "mysql"),
            Backend::Postgres => write!(f, "postgres"),
        }
    }
}

/// Bind parameter syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// Positional `?`
    Question,
    /// Numbered `$1`, `$2`, ...
    Numbered,
}

/// How an auto-incrementing column is declared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoIncrement {
    /// Keep the declared type and append a keyword (`AUTO_INCREMENT`).
    Keyword(&'static str),
    /// Replace the declared type with a serial pseudo-type.
    SerialType,
}

/// How the generated identifier of an inserted row is discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityStrategy {
    /// `INSERT ... RETURNING id`
    Returning,
    /// Re-select the identifier filtered by every inserted value.
    Reselect,
}

/// Portable pseudo-function for random ordering, usable in ORDER BY terms.
pub const RANDOM_ORDER: &str = "RANDOM()";

/// Dialect constants consumed by the DDL generator and the CRUD engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialectProfile {
    pub backend: Backend,
    pub placeholder: PlaceholderStyle,
    pub auto_increment: AutoIncrement,
    pub identity: IdentityStrategy,
    /// Whether `DEFAULT ... ON UPDATE ...` is understood.
    pub supports_on_update: bool,
    /// Whether `CREATE INDEX IF NOT EXISTS` is understood.
    pub index_if_not_exists: bool,
    pub boolean_type: &'static str,
    pub timestamp_type: &'static str,
    /// LIMIT value used when only an OFFSET was requested, for dialects that
    /// cannot express OFFSET alone.
    pub unbounded_limit: Option<&'static str>,
    /// Portable term -> native SQL
    pub terms: &'static [(&'static str, &'static str)],
    /// Whether text parameters bound to temporal columns need an explicit
    /// `::TYPE` cast.
    pub cast_temporal_params: bool,
}

pub const MYSQL: DialectProfile = DialectProfile {
    backend: Backend::MySql,
    placeholder: PlaceholderStyle::Question,
    auto_increment: AutoIncrement::Keyword("AUTO_INCREMENT"),
    identity: IdentityStrategy::Reselect,
    supports_on_update: true,
    index_if_not_exists: false,
    boolean_type: "TINYINT(1)",
    timestamp_type: "TIMESTAMP",
    unbounded_limit: Some("18446744073709551615"),
    terms: &[(RANDOM_ORDER, "RAND()")],
    cast_temporal_params: false,
};

pub const POSTGRES: DialectProfile = DialectProfile {
    backend: Backend::Postgres,
    placeholder: PlaceholderStyle::Numbered,
    auto_increment: AutoIncrement::SerialType,
    identity: IdentityStrategy::Returning,
    supports_on_update: false,
    index_if_not_exists: true,
    boolean_type: "BOOLEAN",
    timestamp_type: "TIMESTAMP",
    unbounded_limit: None,
    terms: &[(RANDOM_ORDER, "RANDOM()")],
    cast_temporal_params: true,
};

impl DialectProfile {
    /// Placeholder for the `n`th bound parameter (1-based).
    pub fn placeholder(&self, n: usize) -> String {
        match self.placeholder {
            PlaceholderStyle::Question => "?".to_string(),
            PlaceholderStyle::Numbered => format!("${}", n),
        }
    }

    /// Serial pseudo-type standing in for an auto-increment column of the
    /// given declared type.
    pub fn serial_type(&self, declared: &str) -> &'static str {
        let upper = declared.to_ascii_uppercase();
        if upper.starts_with("BIGINT") || upper.starts_with("INT8") {
            "BIGSERIAL"
        } else if upper.starts_with("SMALLINT") || upper.starts_with("INT2") {
            "SMALLSERIAL"
        } else {
            "SERIAL"
        }
    }
}

/// Rewrite every portable pseudo-function in `expr` into the dialect's
/// native spelling. Plain substring substitution.
pub fn translate_terms(expr: &str, profile: &DialectProfile) -> String {
    let mut out = expr.to_string();
    for (portable, native) in profile.terms {
        if portable != native {
            out = out.replace(portable, native);
        }
    }
    out
}

/// Classify a driver error message as "the table is absent".
///
/// Backends do not share a structured not-found code, so this looks at the
/// message text. Anything else is a genuine failure.
pub fn is_missing_table_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("does not exist")
        || lower.contains("doesn't exist")
        || lower.contains("no such table")
}
