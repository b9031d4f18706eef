//! Conversion between typed records and untyped column maps.
//!
//! Field introspection goes through serde: a record serializes to a JSON
//! object whose keys are its field names (after any `#[serde(rename)]`), and
//! rows deserialize back from objects keyed by field name. The naming and
//! exclusion rules are plain functions so they can be tested on their own.

use crate::backend::QueryRow;
use crate::error::{DbError, Result};
use serde::de::{self, DeserializeOwned};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Column name -> value, iterated in column-name order.
pub type ColumnMap = BTreeMap<String, Value>;

/// Fields the server owns. Never written from a record.
pub const SERVER_MANAGED_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

/// An application entity that can be written to and read from a table.
///
/// Most types only need an empty impl:
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use vocab_store::Record;
///
/// #[derive(Debug, Default, Serialize, Deserialize)]
/// struct Word {
///     id: i64,
///     word: String,
///     #[serde(rename = "meaning")]
///     definition: String,
/// }
///
/// impl Record for Word {
///     fn column_tags() -> &'static [(&'static str, &'static str)] {
///         &[("meaning", "definition")]
///     }
/// }
/// ```
pub trait Record: Serialize {
    /// Explicit field -> column overrides, keyed by serialized field name.
    fn column_tags() -> &'static [(&'static str, &'static str)]
    where
        Self: Sized,
    {
        &[]
    }

    /// Column map used for INSERT and UPDATE.
    fn to_column_map(&self) -> Result<ColumnMap>
    where
        Self: Sized,
    {
        to_column_map(self)
    }
}

impl Record for ColumnMap {
    fn to_column_map(&self) -> Result<ColumnMap> {
        Ok(self.clone())
    }
}

impl Record for HashMap<String, Value> {
    fn to_column_map(&self) -> Result<ColumnMap> {
        Ok(self.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

impl Record for Map<String, Value> {
    fn to_column_map(&self) -> Result<ColumnMap> {
        Ok(self.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

/// Resolve the column for a field: explicit tag, else the convention-derived
/// name of the serialized field (which already reflects `#[serde(rename)]`).
pub fn column_name(field: &str, explicit_tag: Option<&str>) -> String {
    match explicit_tag {
        Some(tag) if !tag.is_empty() => tag.to_string(),
        _ => to_snake_case(field),
    }
}

/// `WordText` -> `word_text`, `quizID` -> `quiz_id`, `HTTPCode` -> `http_code`.
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some('_') => false,
                Some(p) if p.is_ascii_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_ascii_uppercase() => next.is_some_and(|n| n.is_ascii_lowercase()),
                _ => false,
            };
            if boundary {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

pub fn is_server_managed(name: &str) -> bool {
    SERVER_MANAGED_FIELDS.contains(&name)
}

/// Whether `value` is the zero value of its type: null, false, 0, "", or an
/// empty array/object.
pub fn is_zero_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

fn tag_for<'a>(tags: &'a [(&'static str, &'static str)], field: &str) -> Option<&'a str> {
    tags.iter().find(|(f, _)| *f == field).map(|(_, c)| *c)
}

/// Marshal a record into a column map.
///
/// Server-managed fields are dropped whatever their source, as are fields
/// holding a zero value. Fails with `InvalidRecord` if the value does not
/// serialize to a struct or map.
pub fn to_column_map<R: Record>(record: &R) -> Result<ColumnMap> {
    const OP: &str = "to_column_map";

    let value = serde_json::to_value(record).map_err(|e| DbError::InvalidRecord {
        op: OP,
        reason: e.to_string(),
    })?;

    let fields = match value {
        Value::Object(fields) => fields,
        other => {
            return Err(DbError::InvalidRecord {
                op: OP,
                reason: format!("expected a struct or map, got {}", json_kind(&other)),
            })
        }
    };

    let tags = R::column_tags();
    let mut columns = ColumnMap::new();
    for (field, value) in fields {
        let column = column_name(&field, tag_for(tags, &field));
        if is_server_managed(&field) || is_server_managed(&column) {
            continue;
        }
        if is_zero_value(&value) {
            continue;
        }
        columns.insert(column, value);
    }
    Ok(columns)
}

/// Scan result rows into records.
///
/// Each column is matched to the field whose resolved column name equals it;
/// columns with no matching field are dropped. Fails with
/// `InvalidDestination` if a row cannot be decoded into `R`.
pub fn scan_rows<R>(rows: Vec<QueryRow>) -> Result<Vec<R>>
where
    R: Record + DeserializeOwned,
{
    let tags = R::column_tags();
    let fields: HashMap<String, &'static str> = struct_fields::<R>()
        .iter()
        .map(|field| (column_name(field, tag_for(tags, field)), *field))
        .collect();

    rows.into_iter()
        .enumerate()
        .map(|(i, row)| {
            let object: Map<String, Value> = row
                .columns
                .into_iter()
                .map(|(column, value)| match fields.get(&column) {
                    Some(field) => (field.to_string(), value),
                    None => (column, value),
                })
                .collect();
            serde_json::from_value(Value::Object(object)).map_err(|e| {
                DbError::InvalidDestination {
                    op: "scan_rows",
                    reason: format!("row {}: {}", i, e),
                }
            })
        })
        .collect()
}

/// Serialized field names of a struct, read from its `Deserialize` impl.
/// Empty for maps and anything that is not a plain struct.
pub fn struct_fields<T: DeserializeOwned>() -> &'static [&'static str] {
    let mut fields = None;
    let _ = T::deserialize(FieldCollector {
        fields: &mut fields,
    });
    fields.unwrap_or(&[])
}

/// Deserializer that records the field list a struct asks for, then bails.
struct FieldCollector<'a> {
    fields: &'a mut Option<&'static [&'static str]>,
}

impl<'de, 'a> de::Deserializer<'de> for FieldCollector<'a> {
    type Error = de::value::Error;

    fn deserialize_any<V: de::Visitor<'de>>(self, _visitor: V) -> std::result::Result<V::Value, Self::Error> {
        Err(de::Error::custom("not a struct"))
    }

    fn deserialize_struct<V: de::Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        _visitor: V,
    ) -> std::result::Result<V::Value, Self::Error> {
        *self.fields = Some(fields);
        Err(de::Error::custom("fields collected"))
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map enum identifier ignored_any
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Word {
        id: i64,
        word: String,
        definition: String,
        #[serde(default)]
        level: i32,
        #[serde(default)]
        starred: bool,
        #[serde(default)]
        created_at: Option<String>,
        #[serde(default)]
        updated_at: Option<String>,
    }

    impl Record for Word {}

    // Serialize to something other than a struct or map.
    impl Record for Vec<String> {}
    impl Record for Option<Word> {}

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct QuizQuestion {
        #[serde(default)]
        id: i64,
        word_id: i64,
        prompt_text: String,
        #[serde(default)]
        created_at: String,
    }

    impl Record for QuizQuestion {
        fn column_tags() -> &'static [(&'static str, &'static str)] {
            &[("promptText", "question")]
        }
    }

    #[test]
    fn test_server_managed_fields_are_excluded() {
        let word = Word {
            id: 42,
            word: "hello".to_string(),
            definition: "a greeting".to_string(),
            created_at: Some("2024-01-01T00:00:00Z".to_string()),
            updated_at: Some("2024-01-02T00:00:00Z".to_string()),
            ..Default::default()
        };

        let columns = to_column_map(&word).unwrap();
        assert_eq!(
            columns.keys().collect::<Vec<_>>(),
            vec!["definition", "word"]
        );
    }

    #[test]
    fn test_zero_values_are_skipped() {
        let word = Word {
            word: "hello".to_string(),
            ..Default::default()
        };
        let columns = to_column_map(&word).unwrap();
        assert_eq!(columns.len(), 1);
        assert_eq!(columns["word"], json!("hello"));

        let word = Word {
            word: "hello".to_string(),
            level: 3,
            starred: true,
            ..Default::default()
        };
        let columns = to_column_map(&word).unwrap();
        assert_eq!(columns["level"], json!(3));
        assert_eq!(columns["starred"], json!(true));
    }

    #[test]
    fn test_tags_and_convention_naming() {
        let question = QuizQuestion {
            id: 5,
            word_id: 7,
            prompt_text: "Define 'hello'".to_string(),
            created_at: "now".to_string(),
        };
        let columns = question.to_column_map().unwrap();
        assert_eq!(
            columns,
            ColumnMap::from([
                ("question".to_string(), json!("Define 'hello'")),
                ("word_id".to_string(), json!(7)),
            ])
        );
    }

    #[test]
    fn test_maps_pass_through_unchanged() {
        let mut input = ColumnMap::new();
        input.insert("id".to_string(), json!(1));
        input.insert("word".to_string(), json!(""));
        assert_eq!(input.to_column_map().unwrap(), input);

        let mut hashed: HashMap<String, Value> = HashMap::new();
        hashed.insert("word".to_string(), json!("hello"));
        assert_eq!(hashed.to_column_map().unwrap().len(), 1);
    }

    #[test]
    fn test_non_record_is_rejected() {
        let err = to_column_map(&vec!["hello".to_string()]).unwrap_err();
        assert!(matches!(err, DbError::InvalidRecord { .. }));

        let err = to_column_map(&None::<Word>).unwrap_err();
        assert!(matches!(err, DbError::InvalidRecord { .. }));
    }

    #[test]
    fn test_scan_discards_unmatched_columns() {
        let mut row = QueryRow::new();
        row.insert("id".to_string(), json!(1));
        row.insert("word".to_string(), json!("hello"));
        row.insert("definition".to_string(), json!("a greeting"));
        row.insert("deck_id".to_string(), json!(99));

        let words: Vec<Word> = scan_rows(vec![row]).unwrap();
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].id, 1);
        assert_eq!(words[0].word, "hello");
    }

    #[test]
    fn test_scan_honors_tags() {
        let mut row = QueryRow::new();
        row.insert("id".to_string(), json!(3));
        row.insert("word_id".to_string(), json!(7));
        row.insert("question".to_string(), json!("Define 'hello'"));
        row.insert("created_at".to_string(), json!("2024-05-01T10:00:00"));

        let questions: Vec<QuizQuestion> = scan_rows(vec![row]).unwrap();
        assert_eq!(questions[0].id, 3);
        assert_eq!(questions[0].prompt_text, "Define 'hello'");
        assert_eq!(questions[0].word_id, 7);
        assert_eq!(questions[0].created_at, "2024-05-01T10:00:00");
    }

    #[test]
    fn test_scan_type_mismatch_is_invalid_destination() {
        let mut row = QueryRow::new();
        row.insert("id".to_string(), json!("not a number"));
        row.insert("word".to_string(), json!("hello"));
        row.insert("definition".to_string(), json!("x"));

        let err = scan_rows::<Word>(vec![row]).unwrap_err();
        assert!(matches!(err, DbError::InvalidDestination { .. }));
    }

    #[test]
    fn test_struct_fields_introspection() {
        assert_eq!(
            struct_fields::<QuizQuestion>(),
            &["id", "wordId", "promptText", "createdAt"]
        );
        assert!(struct_fields::<ColumnMap>().is_empty());
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("word"), "word");
        assert_eq!(to_snake_case("WordText"), "word_text");
        assert_eq!(to_snake_case("quizID"), "quiz_id");
        assert_eq!(to_snake_case("HTTPCode"), "http_code");
        assert_eq!(to_snake_case("created_at"), "created_at");
        assert_eq!(to_snake_case("level2Name"), "level2_name");
    }

    #[test]
    fn test_column_name_precedence() {
        assert_eq!(column_name("promptText", Some("question")), "question");
        assert_eq!(column_name("promptText", Some("")), "prompt_text");
        assert_eq!(column_name("promptText", None), "prompt_text");
    }

    #[test]
    fn test_zero_value_detection() {
        assert!(is_zero_value(&json!(null)));
        assert!(is_zero_value(&json!(0)));
        assert!(is_zero_value(&json!(0.0)));
        assert!(is_zero_value(&json!("")));
        assert!(is_zero_value(&json!(false)));
        assert!(is_zero_value(&json!([])));
        assert!(!is_zero_value(&json!(-1)));
        assert!(!is_zero_value(&json!("0")));
    }
}
