//! CREATE TABLE / CREATE INDEX generation.

use crate::dialect::{AutoIncrement, DialectProfile};
use crate::schema::{ColumnDef, TableDefinition};

/// Generate the `CREATE TABLE IF NOT EXISTS` statement for a table.
///
/// `prefix` is prepended to the table name and to foreign-key targets.
pub fn create_table_sql(table: &TableDefinition, profile: &DialectProfile, prefix: &str) -> String {
    let primary_keys: Vec<&str> = table
        .primary_key_columns()
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    let inline_primary_key = primary_keys.len() == 1;

    let mut clauses: Vec<String> = table
        .columns
        .iter()
        .map(|col| column_clause(col, profile, inline_primary_key))
        .collect();

    if primary_keys.len() > 1 {
        clauses.push(format!("PRIMARY KEY ({})", primary_keys.join(", ")));
    }

    for col in &table.columns {
        if let Some(fk) = &col.foreign_key {
            clauses.push(format!(
                "FOREIGN KEY ({}) REFERENCES {}{}({})",
                col.name, prefix, fk.table, fk.column
            ));
        }
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {}{} (\n    {}\n)",
        prefix,
        table.name,
        clauses.join(",\n    ")
    )
}

fn column_clause(col: &ColumnDef, profile: &DialectProfile, inline_primary_key: bool) -> String {
    let declared = col.sql_type.for_dialect(profile);
    let mut def = match (col.auto_increment, profile.auto_increment) {
        (true, AutoIncrement::SerialType) => {
            format!("{} {}", col.name, profile.serial_type(declared))
        }
        (true, AutoIncrement::Keyword(keyword)) => format!("{} {} {}", col.name, declared, keyword),
        (false, _) => format!("{} {}", col.name, declared),
    };

    if col.not_null {
        def.push_str(" NOT NULL");
    }

    if let Some(default) = &col.default {
        let default = if profile.supports_on_update {
            default.trim()
        } else {
            strip_on_update(default)
        };
        if !default.is_empty() {
            def.push_str(&format!(" DEFAULT {}", default));
        }
    }

    if col.primary_key && inline_primary_key {
        def.push_str(" PRIMARY KEY");
    }

    if col.unique {
        def.push_str(" UNIQUE");
    }

    def
}

/// Drop an `ON UPDATE ...` tail from a default expression, leaving the plain
/// constant default.
pub fn strip_on_update(default: &str) -> &str {
    let upper = default.to_ascii_uppercase();
    match find_on_update(&upper) {
        Some(pos) => default[..pos].trim(),
        None => default.trim(),
    }
}

fn find_on_update(upper: &str) -> Option<usize> {
    let bytes = upper.as_bytes();
    let mut from = 0;
    while let Some(rel) = upper[from..].find("ON") {
        let start = from + rel;
        let boundary_before = start == 0 || bytes[start - 1].is_ascii_whitespace();
        let rest = &upper[start + 2..];
        let trimmed = rest.trim_start();
        if boundary_before
            && trimmed.len() < rest.len()
            && trimmed.starts_with("UPDATE")
            && trimmed[6..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_ascii_alphanumeric() && c != '_')
        {
            return Some(start);
        }
        from = start + 2;
    }
    None
}

/// Generate the index statements for a table: every declared index, plus a
/// single-column index for each `unique` or `indexed` column that no declared
/// single-column index already covers.
pub fn create_index_sql(table: &TableDefinition, profile: &DialectProfile, prefix: &str) -> Vec<String> {
    let mut statements: Vec<String> = table
        .indexes
        .iter()
        .map(|index| {
            index_statement(
                profile,
                index.unique,
                &format!("{}{}", prefix, index.name),
                &format!("{}{}", prefix, table.name),
                &index.columns.join(", "),
            )
        })
        .collect();

    for col in &table.columns {
        if !(col.unique || col.indexed) {
            continue;
        }
        let covered = table
            .indexes
            .iter()
            .any(|index| index.columns.len() == 1 && index.columns[0] == col.name);
        if covered {
            continue;
        }

        let kind = if col.unique { "uniq" } else { "idx" };
        statements.push(index_statement(
            profile,
            col.unique,
            &format!("{}{}_{}_{}", prefix, kind, table.name, col.name),
            &format!("{}{}", prefix, table.name),
            &col.name,
        ));
    }

    statements
}

fn index_statement(
    profile: &DialectProfile,
    unique: bool,
    name: &str,
    table: &str,
    columns: &str,
) -> String {
    let unique = if unique { "UNIQUE " } else { "" };
    let if_not_exists = if profile.index_if_not_exists {
        "IF NOT EXISTS "
    } else {
        ""
    };
    format!(
        "CREATE {}INDEX {}{} ON {} ({})",
        unique, if_not_exists, name, table, columns
    )
}
