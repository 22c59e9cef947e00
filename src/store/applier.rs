// ABOUTME: BatchApplier against PostgreSQL: transactional update/insert/delete per entity
// ABOUTME: Statements are generated once per entity from the EntitySpec with quoted identifiers

use std::collections::HashSet;

use anyhow::{Context, Result};
use tokio_postgres::types::{private::BytesMut, to_sql_checked, IsNull, ToSql, Type};

use super::{ApplyStats, StoreSession, SyncStore};
use crate::entity::{Derived, EntitySpec};
use crate::normalize::SqlValue;
use crate::reconcile::SyncPlan;

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        if self.is_null() {
            return Ok(IsNull::Yes);
        }
        // Text columns take any variant's rendering; typed columns take the
        // matching variant, with integers widened for double precision columns.
        if *ty == Type::TEXT || *ty == Type::VARCHAR {
            return self.render_text().to_sql(ty, out);
        }
        match self {
            SqlValue::Bool(b) if *ty == Type::BOOL => b.to_sql(ty, out),
            SqlValue::Int(i) if *ty == Type::INT8 => i.to_sql(ty, out),
            SqlValue::Int(i) if *ty == Type::FLOAT8 => (*i as f64).to_sql(ty, out),
            SqlValue::Float(f) if *ty == Type::FLOAT8 => f.to_sql(ty, out),
            other => Err(format!("cannot encode {other:?} as {ty}").into()),
        }
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::BOOL
            || *ty == Type::INT8
            || *ty == Type::FLOAT8
            || *ty == Type::TEXT
            || *ty == Type::VARCHAR
    }

    to_sql_checked!();
}

/// Applies sync plans to the target PostgreSQL database.
///
/// Holds no connection of its own; every call opens a session scoped to that
/// batch (see StoreSession).
pub struct PgStore {
    url: String,
}

impl PgStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl SyncStore for PgStore {
    async fn read_keys(&self, spec: &EntitySpec) -> Result<HashSet<i64>> {
        let session = StoreSession::connect(&self.url).await?;
        let query = format!("SELECT \"{}\" FROM \"{}\"", spec.key_column, spec.table);
        let rows = session
            .client
            .query(&query, &[])
            .await
            .with_context(|| format!("Failed to read persisted keys from {}", spec.table))?;

        Ok(rows.iter().map(|row| row.get::<_, i64>(0)).collect())
    }

    /// Execute the three partitions inside one transaction. A failure on any
    /// statement abandons the transaction, so nothing from the batch becomes
    /// durably visible.
    async fn apply(&self, spec: &EntitySpec, plan: SyncPlan) -> Result<ApplyStats> {
        let mut session = StoreSession::connect(&self.url).await?;
        let tx = session
            .client
            .transaction()
            .await
            .with_context(|| format!("Failed to open a transaction for {}", spec.table))?;

        let mut stats = ApplyStats::default();

        let update_query = build_update_query(spec);
        for row in &plan.update {
            let mut params: Vec<&(dyn ToSql + Sync)> = row
                .columns
                .iter()
                .map(|(_, value)| value as &(dyn ToSql + Sync))
                .collect();
            params.push(&row.key);
            stats.updated += tx
                .execute(&update_query, &params)
                .await
                .with_context(|| format!("Failed to update key {} in {}", row.key, spec.table))?;
        }

        let insert_query = build_insert_query(spec);
        for row in &plan.insert {
            let mut params: Vec<&(dyn ToSql + Sync)> = vec![&row.key];
            params.extend(
                row.columns
                    .iter()
                    .map(|(_, value)| value as &(dyn ToSql + Sync)),
            );
            stats.inserted += tx
                .execute(&insert_query, &params)
                .await
                .with_context(|| format!("Failed to insert key {} into {}", row.key, spec.table))?;
        }

        if !plan.delete.is_empty() {
            let delete_query = build_delete_query(spec);
            for key in &plan.delete {
                stats.deleted += tx
                    .execute(&delete_query, &[key])
                    .await
                    .with_context(|| {
                        format!("Failed to delete key {key} from {}", spec.table)
                    })?;
            }
        }

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit the {} batch", spec.table))?;

        tracing::debug!(
            entity = spec.name,
            updated = stats.updated,
            inserted = stats.inserted,
            deleted = stats.deleted,
            "batch committed"
        );

        Ok(stats)
    }
}

/// Mapped and derived column names in row order, excluding the key column.
fn column_names(spec: &EntitySpec) -> Vec<&'static str> {
    spec.fields
        .iter()
        .map(|field| field.column)
        .chain(spec.derived.iter().map(|derived| match derived {
            Derived::LeadingDigits { column, .. } => *column,
        }))
        .collect()
}

/// Build the per-row update statement:
///
/// ```sql
/// UPDATE "table" SET "col1" = $1, ..., "last_synced_at" = NOW() WHERE "key" = $n
/// ```
fn build_update_query(spec: &EntitySpec) -> String {
    let columns = column_names(spec);
    let assignments: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(idx, column)| format!("\"{}\" = ${}", column, idx + 1))
        .collect();

    format!(
        "UPDATE \"{}\" SET {}, \"last_synced_at\" = NOW() WHERE \"{}\" = ${}",
        spec.table,
        assignments.join(", "),
        spec.key_column,
        columns.len() + 1
    )
}

/// Build the per-row insert statement, the key column first.
fn build_insert_query(spec: &EntitySpec) -> String {
    let mut columns = vec![spec.key_column];
    columns.extend(column_names(spec));

    let quoted: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();

    format!(
        "INSERT INTO \"{}\" ({}) VALUES ({})",
        spec.table,
        quoted.join(", "),
        placeholders.join(", ")
    )
}

fn build_delete_query(spec: &EntitySpec) -> String {
    format!(
        "DELETE FROM \"{}\" WHERE \"{}\" = $1",
        spec.table, spec.key_column
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ExportIds, FieldMap, KeyRule, Source};

    static WIDGETS: EntitySpec = EntitySpec {
        name: "widgets",
        table: "widgets",
        source: Source::Paged { path: "widget" },
        key: KeyRule::Natural("id"),
        key_column: "id",
        fields: &[
            FieldMap { path: "nome", column: "name" },
            FieldMap { path: "dtCriacao", column: "created_at" },
        ],
        date_columns: &["created_at"],
        sanitize_columns: &[],
        strip_tags: &[],
        explode: None,
        derived: &[Derived::LeadingDigits {
            path: "id",
            column: "store_number",
            count: 3,
        }],
        raw_filter: None,
        export_ids: Some(ExportIds::Keys),
    };

    #[test]
    fn test_build_update_query() {
        let query = build_update_query(&WIDGETS);
        assert_eq!(
            query,
            "UPDATE \"widgets\" SET \"name\" = $1, \"created_at\" = $2, \
             \"store_number\" = $3, \"last_synced_at\" = NOW() WHERE \"id\" = $4"
        );
    }

    #[test]
    fn test_build_insert_query_leads_with_key() {
        let query = build_insert_query(&WIDGETS);
        assert_eq!(
            query,
            "INSERT INTO \"widgets\" (\"id\", \"name\", \"created_at\", \"store_number\") \
             VALUES ($1, $2, $3, $4)"
        );
    }

    #[test]
    fn test_build_delete_query() {
        let query = build_delete_query(&WIDGETS);
        assert_eq!(query, "DELETE FROM \"widgets\" WHERE \"id\" = $1");
    }

    #[test]
    fn test_sql_value_accepts_store_types() {
        assert!(<SqlValue as ToSql>::accepts(&Type::BOOL));
        assert!(<SqlValue as ToSql>::accepts(&Type::INT8));
        assert!(<SqlValue as ToSql>::accepts(&Type::FLOAT8));
        assert!(<SqlValue as ToSql>::accepts(&Type::TEXT));
        assert!(<SqlValue as ToSql>::accepts(&Type::VARCHAR));
        assert!(!<SqlValue as ToSql>::accepts(&Type::INT4));
        assert!(!<SqlValue as ToSql>::accepts(&Type::TIMESTAMP));
    }

    #[test]
    fn test_int_widens_for_double_precision_columns() {
        let mut out = BytesMut::new();
        let result = SqlValue::Int(10).to_sql(&Type::FLOAT8, &mut out);
        assert!(matches!(result, Ok(IsNull::No)));
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn test_null_encodes_as_null_for_any_accepted_type() {
        let mut out = BytesMut::new();
        for ty in [Type::BOOL, Type::INT8, Type::FLOAT8, Type::TEXT] {
            assert!(matches!(
                SqlValue::Null.to_sql(&ty, &mut out),
                Ok(IsNull::Yes)
            ));
        }
    }
}
