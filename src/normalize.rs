// ABOUTME: Turns raw remote records into flat typed rows per an EntitySpec
// ABOUTME: Handles explosion, projection, date and markup cleanup, and key derivation

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use serde_json::Value;

use crate::entity::{Derived, EmptyPolicy, EntitySpec, KeyRule};

/// The only accepted wire timestamp format (UTC).
pub const WIRE_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Seconds-precision form the store understands.
pub const STORE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A typed column value. Missing fields, JSON nulls, and unparsable dates all
/// collapse to `Null` so downstream code sees one absence representation.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    pub fn from_json(value: &Value) -> SqlValue {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => n
                .as_i64()
                .map(SqlValue::Int)
                .or_else(|| n.as_f64().map(SqlValue::Float))
                .unwrap_or(SqlValue::Null),
            Value::String(s) => SqlValue::Text(s.clone()),
            // Residual containers are kept verbatim rather than silently dropped.
            other => SqlValue::Text(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Textual rendering used when the store column is text.
    pub fn render_text(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Bool(b) => b.to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) => f.to_string(),
            SqlValue::Text(s) => s.clone(),
        }
    }
}

/// A flat record ready for reconciliation and batch application.
///
/// The primary key lives in `key` only; `columns` holds every mapped and derived
/// column in spec order.
#[derive(Debug, Clone)]
pub struct NormalizedRow {
    pub key: i64,
    pub columns: Vec<(&'static str, SqlValue)>,
}

impl NormalizedRow {
    pub fn column(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(column, _)| *column == name)
            .map(|(_, value)| value)
    }
}

/// Output of one entity's normalization pass.
#[derive(Debug, Default)]
pub struct Normalized {
    pub rows: Vec<NormalizedRow>,
    /// Records that could not produce a usable key. Skipped, never fatal for the run.
    pub skipped_records: usize,
}

/// Normalize a raw remote collection into rows for one entity.
///
/// Keys are unique within the returned set. A duplicate key keeps the latest
/// row and logs a warning; a record without a derivable key is skipped and
/// counted in `skipped_records`.
pub fn normalize(records: &[Value], spec: &EntitySpec) -> Normalized {
    let mut out = Normalized::default();
    let mut index: HashMap<i64, usize> = HashMap::new();

    for record in records {
        if let Some(filter) = spec.raw_filter {
            if !filter(record) {
                continue;
            }
        }
        for exploded in exploded_records(record, spec) {
            match normalize_record(&exploded, spec) {
                Ok(row) => {
                    if let Some(&existing) = index.get(&row.key) {
                        tracing::warn!(
                            entity = spec.name,
                            key = row.key,
                            "duplicate key within one run, keeping the latest row"
                        );
                        out.rows[existing] = row;
                    } else {
                        index.insert(row.key, out.rows.len());
                        out.rows.push(row);
                    }
                }
                Err(error) => {
                    tracing::error!(entity = spec.name, "record skipped: {error:#}");
                    out.skipped_records += 1;
                }
            }
        }
    }

    out
}

/// Expand a record over its multi-valued field, substituting each element back
/// under the field so projection paths address element sub-fields unchanged.
fn exploded_records(record: &Value, spec: &EntitySpec) -> Vec<Value> {
    let Some(rule) = &spec.explode else {
        return vec![record.clone()];
    };

    let elements = record
        .get(rule.field)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if elements.is_empty() {
        return match rule.on_empty {
            EmptyPolicy::Keep => {
                let mut kept = record.clone();
                if let Some(object) = kept.as_object_mut() {
                    object.insert(rule.field.to_string(), Value::Null);
                }
                vec![kept]
            }
            EmptyPolicy::Drop => Vec::new(),
        };
    }

    elements
        .into_iter()
        .map(|element| {
            let mut expanded = record.clone();
            if let Some(object) = expanded.as_object_mut() {
                object.insert(rule.field.to_string(), element);
            }
            expanded
        })
        .collect()
}

fn normalize_record(record: &Value, spec: &EntitySpec) -> Result<NormalizedRow> {
    let mut columns: Vec<(&'static str, SqlValue)> =
        Vec::with_capacity(spec.fields.len() + spec.derived.len());

    for field in spec.fields {
        let mut value = SqlValue::from_json(lookup(record, field.path).unwrap_or(&Value::Null));
        if spec.date_columns.contains(&field.column) {
            value = normalize_date(value);
        }
        if spec.sanitize_columns.contains(&field.column) {
            value = sanitize(value, spec.strip_tags);
        }
        columns.push((field.column, value));
    }

    for derived in spec.derived {
        let Derived::LeadingDigits { path, column, count } = derived;
        let source = SqlValue::from_json(lookup(record, path).unwrap_or(&Value::Null));
        let leading: String = digits_of(&source).chars().take(*count).collect();
        let value = leading.parse::<i64>().map(SqlValue::Int).unwrap_or(SqlValue::Null);
        columns.push((*column, value));
    }

    let key = derive_key(record, spec, &columns)?;
    Ok(NormalizedRow { key, columns })
}

/// Walk a dot-addressed path into nested objects.
fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Parse the wire timestamp and rewrite it in the store form. Anything that does
/// not parse, including non-strings, becomes null rather than an error.
fn normalize_date(value: SqlValue) -> SqlValue {
    match value {
        SqlValue::Text(raw) => NaiveDateTime::parse_from_str(&raw, WIRE_DATE_FORMAT)
            .map(|parsed| SqlValue::Text(parsed.format(STORE_DATE_FORMAT).to_string()))
            .unwrap_or(SqlValue::Null),
        _ => SqlValue::Null,
    }
}

/// Remove whitelisted markup tags by literal substring removal. Tags outside
/// the whitelist are left intact; this is not an HTML parser.
fn sanitize(value: SqlValue, tags: &[&str]) -> SqlValue {
    match value {
        SqlValue::Text(mut text) => {
            // Longer names first so stripping `<u>` cannot eat the prefix of `<ul>`.
            let mut ordered: Vec<&str> = tags.to_vec();
            ordered.sort_by_key(|tag| std::cmp::Reverse(tag.len()));
            for tag in ordered {
                text = text
                    .replace(&format!("<{tag}>"), "")
                    .replace(&format!("</{tag}>"), "");
            }
            SqlValue::Text(text)
        }
        other => other,
    }
}

fn digits_of(value: &SqlValue) -> String {
    match value {
        SqlValue::Int(i) => i.to_string().chars().filter(|c| c.is_ascii_digit()).collect(),
        SqlValue::Float(f) => f.to_string().chars().filter(|c| c.is_ascii_digit()).collect(),
        SqlValue::Text(s) => s.chars().filter(|c| c.is_ascii_digit()).collect(),
        SqlValue::Null | SqlValue::Bool(_) => String::new(),
    }
}

fn derive_key(record: &Value, spec: &EntitySpec, columns: &[(&'static str, SqlValue)]) -> Result<i64> {
    match &spec.key {
        KeyRule::Natural(path) => lookup(record, path)
            .and_then(Value::as_i64)
            .with_context(|| format!("record carries no usable primary key at `{path}`")),
        KeyRule::Digits(sources) => {
            let digits: String = sources
                .iter()
                .map(|source| {
                    columns
                        .iter()
                        .find(|(column, _)| column == source)
                        .map(|(_, value)| digits_of(value))
                        .unwrap_or_default()
                })
                .collect();
            if digits.is_empty() {
                bail!("no digits available to derive a synthetic key");
            }
            digits
                .parse::<i64>()
                .with_context(|| format!("synthetic key `{digits}` does not fit the key range"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EmptyPolicy, Explode, ExportIds, FieldMap, Source};
    use serde_json::json;

    fn natural_spec() -> EntitySpec {
        EntitySpec {
            name: "widgets",
            table: "widgets",
            source: Source::Paged { path: "widget" },
            key: KeyRule::Natural("id"),
            key_column: "id",
            fields: &[
                FieldMap { path: "nome", column: "name" },
                FieldMap { path: "dtCriacao", column: "created_at" },
                FieldMap { path: "detalhe.texto", column: "body" },
            ],
            date_columns: &["created_at"],
            sanitize_columns: &["body"],
            strip_tags: &["p"],
            explode: None,
            derived: &[],
            raw_filter: None,
            export_ids: Some(ExportIds::Keys),
        }
    }

    #[test]
    fn test_projection_and_rename() {
        let records = vec![json!({
            "id": 7,
            "nome": "Alpha",
            "dtCriacao": "2024-01-05T10:00:00Z",
            "detalhe": {"texto": "plain"}
        })];
        let normalized = normalize(&records, &natural_spec());
        assert_eq!(normalized.rows.len(), 1);
        let row = &normalized.rows[0];
        assert_eq!(row.key, 7);
        assert_eq!(row.column("name"), Some(&SqlValue::Text("Alpha".into())));
        assert_eq!(row.column("body"), Some(&SqlValue::Text("plain".into())));
    }

    #[test]
    fn test_date_normalizes_to_store_format() {
        let value = normalize_date(SqlValue::Text("2024-01-05T10:00:00Z".into()));
        assert_eq!(value, SqlValue::Text("2024-01-05 10:00:00".into()));
    }

    #[test]
    fn test_bad_date_becomes_null_not_error() {
        assert_eq!(normalize_date(SqlValue::Text("not-a-date".into())), SqlValue::Null);
        assert_eq!(normalize_date(SqlValue::Int(20240105)), SqlValue::Null);
    }

    #[test]
    fn test_sanitize_strips_only_whitelisted_tags() {
        let value = sanitize(SqlValue::Text("<p>Hello</p><b>world</b>".into()), &["p"]);
        assert_eq!(value, SqlValue::Text("Hello<b>world</b>".into()));
    }

    #[test]
    fn test_sanitize_handles_overlapping_tag_names() {
        let value = sanitize(SqlValue::Text("<ul><li><u>x</u></li></ul>".into()), &["u", "ul", "li"]);
        assert_eq!(value, SqlValue::Text("x".into()));
    }

    #[test]
    fn test_missing_field_canonicalizes_to_null() {
        let records = vec![json!({"id": 1})];
        let normalized = normalize(&records, &natural_spec());
        let row = &normalized.rows[0];
        assert_eq!(row.column("name"), Some(&SqlValue::Null));
        assert_eq!(row.column("created_at"), Some(&SqlValue::Null));
        assert_eq!(row.column("body"), Some(&SqlValue::Null));
    }

    #[test]
    fn test_record_without_key_is_skipped_and_counted() {
        let records = vec![json!({"nome": "no id"}), json!({"id": 2, "nome": "ok"})];
        let normalized = normalize(&records, &natural_spec());
        assert_eq!(normalized.rows.len(), 1);
        assert_eq!(normalized.skipped_records, 1);
    }

    fn exploding_spec(on_empty: EmptyPolicy) -> EntitySpec {
        EntitySpec {
            name: "tagged",
            table: "tagged",
            source: Source::Paged { path: "tagged" },
            key: KeyRule::Digits(&["owner_id", "tag_id"]),
            key_column: "id",
            fields: &[
                FieldMap { path: "id", column: "owner_id" },
                FieldMap { path: "titulo", column: "title" },
                FieldMap { path: "etiqueta.id", column: "tag_id" },
                FieldMap { path: "etiqueta.nome", column: "tag_name" },
            ],
            date_columns: &[],
            sanitize_columns: &[],
            strip_tags: &[],
            explode: Some(Explode { field: "etiqueta", on_empty }),
            derived: &[],
            raw_filter: None,
            export_ids: None,
        }
    }

    #[test]
    fn test_explosion_emits_one_row_per_element() {
        let records = vec![json!({
            "id": 9,
            "titulo": "lead",
            "etiqueta": [
                {"id": 1, "nome": "a"},
                {"id": 2, "nome": "b"}
            ]
        })];
        let normalized = normalize(&records, &exploding_spec(EmptyPolicy::Keep));
        assert_eq!(normalized.rows.len(), 2);
        // Shared fields repeat; only the exploded sub-fields differ.
        for row in &normalized.rows {
            assert_eq!(row.column("owner_id"), Some(&SqlValue::Int(9)));
            assert_eq!(row.column("title"), Some(&SqlValue::Text("lead".into())));
        }
        assert_eq!(normalized.rows[0].column("tag_name"), Some(&SqlValue::Text("a".into())));
        assert_eq!(normalized.rows[1].column("tag_name"), Some(&SqlValue::Text("b".into())));
        assert_ne!(normalized.rows[0].key, normalized.rows[1].key);
        assert_eq!(normalized.rows[0].key, 91);
        assert_eq!(normalized.rows[1].key, 92);
    }

    #[test]
    fn test_empty_explosion_keep_policy_emits_nulled_row() {
        let records = vec![json!({"id": 4, "titulo": "bare", "etiqueta": []})];
        let normalized = normalize(&records, &exploding_spec(EmptyPolicy::Keep));
        assert_eq!(normalized.rows.len(), 1);
        assert_eq!(normalized.rows[0].key, 4);
        assert_eq!(normalized.rows[0].column("tag_id"), Some(&SqlValue::Null));
        assert_eq!(normalized.rows[0].column("tag_name"), Some(&SqlValue::Null));
    }

    #[test]
    fn test_empty_explosion_drop_policy_emits_nothing() {
        let records = vec![json!({"id": 4, "titulo": "bare", "etiqueta": []})];
        let normalized = normalize(&records, &exploding_spec(EmptyPolicy::Drop));
        assert!(normalized.rows.is_empty());
        assert_eq!(normalized.skipped_records, 0);
    }

    #[test]
    fn test_synthetic_key_from_date_digits() {
        let spec = EntitySpec {
            name: "entries",
            table: "entries",
            source: Source::Paged { path: "entries" },
            key: KeyRule::Digits(&["created_at", "owner_id"]),
            key_column: "id",
            fields: &[
                FieldMap { path: "criado", column: "created_at" },
                FieldMap { path: "parentId", column: "owner_id" },
            ],
            date_columns: &["created_at"],
            sanitize_columns: &[],
            strip_tags: &[],
            explode: None,
            derived: &[],
            raw_filter: None,
            export_ids: None,
        };
        let records = vec![json!({"criado": "2024-01-05T10:00:00Z", "parentId": 123})];
        let normalized = normalize(&records, &spec);
        assert_eq!(normalized.rows[0].key, 20240105100000123);
    }

    #[test]
    fn test_synthetic_key_overflow_skips_record() {
        let spec = EntitySpec {
            name: "entries",
            table: "entries",
            source: Source::Paged { path: "entries" },
            key: KeyRule::Digits(&["created_at", "owner_id"]),
            key_column: "id",
            fields: &[
                FieldMap { path: "criado", column: "created_at" },
                FieldMap { path: "parentId", column: "owner_id" },
            ],
            date_columns: &["created_at"],
            sanitize_columns: &[],
            strip_tags: &[],
            explode: None,
            derived: &[],
            raw_filter: None,
            export_ids: None,
        };
        let records = vec![json!({"criado": "2024-01-05T10:00:00Z", "parentId": 999_999_999})];
        let normalized = normalize(&records, &spec);
        assert!(normalized.rows.is_empty());
        assert_eq!(normalized.skipped_records, 1);
    }

    #[test]
    fn test_duplicate_keys_keep_latest_row() {
        let records = vec![
            json!({"id": 5, "nome": "first"}),
            json!({"id": 5, "nome": "second"}),
        ];
        let normalized = normalize(&records, &natural_spec());
        assert_eq!(normalized.rows.len(), 1);
        assert_eq!(
            normalized.rows[0].column("name"),
            Some(&SqlValue::Text("second".into()))
        );
    }

    #[test]
    fn test_leading_digits_derivation() {
        let spec = EntitySpec {
            name: "graded",
            table: "graded",
            source: Source::Paged { path: "graded" },
            key: KeyRule::Natural("id"),
            key_column: "id",
            fields: &[FieldMap { path: "nome", column: "name" }],
            date_columns: &[],
            sanitize_columns: &[],
            strip_tags: &[],
            explode: None,
            derived: &[Derived::LeadingDigits {
                path: "id",
                column: "store_number",
                count: 3,
            }],
            raw_filter: None,
            export_ids: None,
        };
        let records = vec![json!({"id": 19344, "nome": "x"})];
        let normalized = normalize(&records, &spec);
        assert_eq!(normalized.rows[0].key, 19344);
        assert_eq!(normalized.rows[0].column("store_number"), Some(&SqlValue::Int(193)));
    }
}
