//! Schema introspection.
//!
//! Every descriptor is read from `pg_catalog` through a borrowed connection.
//! Filters are always bound parameters. A failed catalog query fails the
//! whole call; no partial descriptor list is ever returned.

use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnDescriptor, ConstraintDescriptor, ConstraintKind, ConstraintReference, IndexDescriptor,
    RoutineDescriptor, RoutineKind, SchemaSummary, TableDescriptor, TableDetail, TableKind,
    TableSummary,
};
use humansize::{WINDOWS, format_size};
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::Row;
use tracing::debug;

/// Schema used by `describe_table` when the caller names none.
pub const DEFAULT_SCHEMA: &str = "public";

mod queries {
    // $1 = schema filter or NULL for every user schema, $2 = accepted relkinds
    pub const LIST_TABLES: &str = r#"
        SELECT
            n.nspname::text AS schema_name,
            c.relname::text AS table_name,
            c.relkind::text AS relkind,
            (SELECT count(*)
               FROM pg_catalog.pg_attribute a
              WHERE a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped) AS column_count,
            COALESCE((
                SELECT array_agg(a.attname::text ORDER BY k.ord)
                  FROM pg_catalog.pg_constraint con
                 CROSS JOIN LATERAL unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
                  JOIN pg_catalog.pg_attribute a
                    ON a.attrelid = con.conrelid AND a.attnum = k.attnum
                 WHERE con.conrelid = c.oid AND con.contype = 'p'
            ), ARRAY[]::text[]) AS primary_key_columns,
            pg_catalog.pg_total_relation_size(c.oid) AS size_bytes
        FROM pg_catalog.pg_class c
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE c.relkind::text = ANY($2)
          AND (
                ($1::text IS NULL
                 AND n.nspname NOT IN ('pg_catalog', 'information_schema')
                 AND n.nspname !~ '^pg_(toast|temp_)')
                OR n.nspname = $1
              )
        ORDER BY n.nspname, c.relname
        "#;

    pub const FIND_RELATION: &str = r#"
        SELECT c.oid
        FROM pg_catalog.pg_class c
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1
          AND c.relname = $2
          AND c.relkind IN ('r', 'p', 'v', 'm', 'f')
        "#;

    pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            a.attname::text AS column_name,
            pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type,
            NOT a.attnotnull AS nullable,
            pg_catalog.pg_get_expr(d.adbin, d.adrelid) AS column_default,
            a.attnum::int4 AS ordinal_position,
            CASE
                WHEN a.atttypid IN (1042, 1043) AND a.atttypmod > 4 THEN a.atttypmod - 4
            END AS max_length
        FROM pg_catalog.pg_attribute a
        LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
        WHERE a.attrelid = $1 AND a.attnum > 0 AND NOT a.attisdropped
        ORDER BY a.attnum
        "#;

    pub const DESCRIBE_CONSTRAINTS: &str = r#"
        SELECT
            con.conname::text AS constraint_name,
            con.contype::text AS contype,
            COALESCE((
                SELECT array_agg(a.attname::text ORDER BY k.ord)
                  FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
                  JOIN pg_catalog.pg_attribute a
                    ON a.attrelid = con.conrelid AND a.attnum = k.attnum
            ), ARRAY[]::text[]) AS columns,
            fn.nspname::text AS foreign_schema,
            fc.relname::text AS foreign_table,
            COALESCE((
                SELECT array_agg(a.attname::text ORDER BY k.ord)
                  FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
                  JOIN pg_catalog.pg_attribute a
                    ON a.attrelid = con.confrelid AND a.attnum = k.attnum
            ), ARRAY[]::text[]) AS foreign_columns,
            pg_catalog.pg_get_constraintdef(con.oid, true) AS definition
        FROM pg_catalog.pg_constraint con
        LEFT JOIN pg_catalog.pg_class fc ON fc.oid = con.confrelid
        LEFT JOIN pg_catalog.pg_namespace fn ON fn.oid = fc.relnamespace
        WHERE con.conrelid = $1 AND con.contype IN ('p', 'f', 'u', 'c')
        ORDER BY con.conname
        "#;

    pub const DESCRIBE_INDEXES: &str = r#"
        SELECT
            i.relname::text AS index_name,
            am.amname::text AS index_kind,
            ARRAY(
                SELECT pg_catalog.pg_get_indexdef(ix.indexrelid, k.ord, true)
                  FROM generate_series(1, ix.indnkeyatts::int) AS k(ord)
                 ORDER BY k.ord
            ) AS columns,
            ix.indisunique AS is_unique,
            ix.indisprimary AS is_primary
        FROM pg_catalog.pg_index ix
        JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
        JOIN pg_catalog.pg_am am ON am.oid = i.relam
        WHERE ix.indrelid = $1
        ORDER BY i.relname
        "#;

    // $1 = schema filter or NULL, $2 = LIKE pattern or NULL
    pub const LIST_ROUTINES: &str = r#"
        SELECT
            n.nspname::text AS schema_name,
            p.proname::text AS routine_name,
            pg_catalog.pg_get_function_arguments(p.oid) AS arguments,
            CASE WHEN p.prokind = 'p' THEN NULL
                 ELSE pg_catalog.pg_get_function_result(p.oid)
            END AS return_type,
            p.prokind::text AS prokind,
            l.lanname::text AS language,
            CASE p.provolatile
                WHEN 'i' THEN 'immutable'
                WHEN 's' THEN 'stable'
                ELSE 'volatile'
            END AS volatility,
            CASE WHEN p.prokind = 'a' THEN NULL
                 ELSE pg_catalog.pg_get_functiondef(p.oid)
            END AS definition
        FROM pg_catalog.pg_proc p
        JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
        JOIN pg_catalog.pg_language l ON l.oid = p.prolang
        WHERE (
                ($1::text IS NULL
                 AND n.nspname NOT IN ('pg_catalog', 'information_schema')
                 AND n.nspname !~ '^pg_(toast|temp_)')
                OR n.nspname = $1
              )
          AND ($2::text IS NULL OR p.proname LIKE $2)
        ORDER BY n.nspname, p.proname, p.oid
        "#;
}

/// List tables (and optionally views), ordered by schema then name.
pub async fn list_tables(
    conn: &mut PgConnection,
    schema: Option<&str>,
    include_views: bool,
) -> DbResult<Vec<TableDescriptor>> {
    let mut relkinds = vec!["r".to_string(), "p".to_string()];
    if include_views {
        relkinds.extend(["v".to_string(), "m".to_string()]);
    }

    let rows = sqlx::query(queries::LIST_TABLES)
        .bind(schema)
        .bind(relkinds)
        .fetch_all(&mut *conn)
        .await?;

    let tables = rows
        .iter()
        .map(table_from_row)
        .collect::<DbResult<Vec<_>>>()?;

    debug!(
        count = tables.len(),
        schema = schema.unwrap_or("*"),
        include_views,
        "Listed tables"
    );
    Ok(tables)
}

fn table_from_row(row: &PgRow) -> DbResult<TableDescriptor> {
    let relkind: String = row.try_get("relkind")?;
    let kind = TableKind::from_relkind(&relkind)
        .ok_or_else(|| DbError::internal(format!("Unexpected relation kind '{relkind}'")))?;
    let column_count: i64 = row.try_get("column_count")?;
    let size_bytes: i64 = row.try_get("size_bytes")?;
    let size_bytes = size_bytes.max(0) as u64;

    Ok(TableDescriptor {
        schema: row.try_get("schema_name")?,
        name: row.try_get("table_name")?,
        kind,
        column_count: column_count as u32,
        primary_key_columns: row.try_get("primary_key_columns")?,
        size: format_size(size_bytes, WINDOWS),
        size_bytes,
    })
}

/// Describe one table or view. Fails with `NotFound` when the pair does not exist.
pub async fn describe_table(
    conn: &mut PgConnection,
    table_name: &str,
    schema: Option<&str>,
) -> DbResult<TableDetail> {
    let schema_name = schema.unwrap_or(DEFAULT_SCHEMA);

    let oid: Option<Oid> = sqlx::query_scalar(queries::FIND_RELATION)
        .bind(schema_name)
        .bind(table_name)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(oid) = oid else {
        return Err(DbError::not_found(format!(
            "Table '{}.{}'",
            schema_name, table_name
        )));
    };

    let columns = fetch_columns(conn, oid).await?;
    let constraints = fetch_constraints(conn, oid).await?;
    let indexes = fetch_indexes(conn, oid).await?;

    debug!(
        table = table_name,
        schema = schema_name,
        columns = columns.len(),
        constraints = constraints.len(),
        indexes = indexes.len(),
        "Described table"
    );

    Ok(TableDetail {
        table_name: table_name.to_string(),
        schema: schema_name.to_string(),
        columns,
        constraints,
        indexes,
    })
}

async fn fetch_columns(conn: &mut PgConnection, oid: Oid) -> DbResult<Vec<ColumnDescriptor>> {
    let rows = sqlx::query(queries::DESCRIBE_COLUMNS)
        .bind(oid)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter()
        .map(|row| {
            let ordinal: i32 = row.try_get("ordinal_position")?;
            let max_length: Option<i32> = row.try_get("max_length")?;
            Ok(ColumnDescriptor {
                name: row.try_get("column_name")?,
                data_type: row.try_get("data_type")?,
                nullable: row.try_get("nullable")?,
                default: row.try_get("column_default")?,
                ordinal_position: ordinal as u32,
                max_length: max_length.map(|n| n as u32),
            })
        })
        .collect()
}

async fn fetch_constraints(
    conn: &mut PgConnection,
    oid: Oid,
) -> DbResult<Vec<ConstraintDescriptor>> {
    let rows = sqlx::query(queries::DESCRIBE_CONSTRAINTS)
        .bind(oid)
        .fetch_all(&mut *conn)
        .await?;

    let mut constraints = Vec::with_capacity(rows.len());
    for row in &rows {
        let contype: String = row.try_get("contype")?;
        // The query only selects the four supported kinds
        let Some(kind) = ConstraintKind::from_contype(&contype) else {
            continue;
        };

        let references = if kind == ConstraintKind::ForeignKey {
            let schema: Option<String> = row.try_get("foreign_schema")?;
            let table: Option<String> = row.try_get("foreign_table")?;
            match (schema, table) {
                (Some(schema), Some(table)) => Some(ConstraintReference {
                    schema,
                    table,
                    columns: row.try_get("foreign_columns")?,
                }),
                _ => None,
            }
        } else {
            None
        };

        constraints.push(ConstraintDescriptor {
            name: row.try_get("constraint_name")?,
            kind,
            columns: row.try_get("columns")?,
            references,
            definition: row.try_get("definition")?,
        });
    }
    Ok(constraints)
}

async fn fetch_indexes(conn: &mut PgConnection, oid: Oid) -> DbResult<Vec<IndexDescriptor>> {
    let rows = sqlx::query(queries::DESCRIBE_INDEXES)
        .bind(oid)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter()
        .map(|row| {
            Ok(IndexDescriptor {
                name: row.try_get("index_name")?,
                kind: row.try_get("index_kind")?,
                columns: row.try_get("columns")?,
                is_unique: row.try_get("is_unique")?,
                is_primary: row.try_get("is_primary")?,
            })
        })
        .collect()
}

/// List routines, optionally filtered by schema and name pattern.
///
/// The pattern is applied inside the catalog query; see [`like_pattern`].
pub async fn list_routines(
    conn: &mut PgConnection,
    schema: Option<&str>,
    name_pattern: Option<&str>,
) -> DbResult<Vec<RoutineDescriptor>> {
    let pattern = name_pattern.filter(|p| !p.is_empty()).map(like_pattern);

    let rows = sqlx::query(queries::LIST_ROUTINES)
        .bind(schema)
        .bind(pattern.as_deref())
        .fetch_all(&mut *conn)
        .await?;

    let mut routines = Vec::with_capacity(rows.len());
    for row in &rows {
        let prokind: String = row.try_get("prokind")?;
        let Some(kind) = RoutineKind::from_prokind(&prokind) else {
            continue;
        };
        let arguments: String = row.try_get("arguments")?;

        routines.push(RoutineDescriptor {
            schema: row.try_get("schema_name")?,
            name: row.try_get("routine_name")?,
            arguments: split_arguments(&arguments),
            return_type: row.try_get("return_type")?,
            kind,
            language: row.try_get("language")?,
            volatility: row.try_get("volatility")?,
            definition: row.try_get("definition")?,
        });
    }

    debug!(
        count = routines.len(),
        schema = schema.unwrap_or("*"),
        pattern = pattern.as_deref().unwrap_or(""),
        "Listed routines"
    );
    Ok(routines)
}

/// Build the full schema summary from scratch.
///
/// Several catalog round trips per table. Any failure aborts the whole summary.
pub async fn summarize(conn: &mut PgConnection) -> DbResult<SchemaSummary> {
    let tables = list_tables(conn, None, true)
        .await
        .map_err(|e| e.into_introspection("tables"))?;

    let mut summaries = Vec::with_capacity(tables.len());
    for table in tables {
        let object = table.qualified_name();
        let detail = match describe_table(conn, &table.name, Some(&table.schema)).await {
            Ok(detail) => detail,
            // Dropped between listing and describing
            Err(DbError::NotFound { .. }) => {
                return Err(DbError::introspection(
                    object,
                    "relation disappeared while the summary was being built",
                ));
            }
            Err(e) => return Err(e.into_introspection(&object)),
        };
        summaries.push(TableSummary {
            table,
            columns: detail.columns,
            constraints: detail.constraints,
        });
    }

    let routines = list_routines(conn, None, None)
        .await
        .map_err(|e| e.into_introspection("routines"))?;

    let summary = SchemaSummary::new(summaries, routines);
    debug!(
        tables = summary.counts.table_count,
        views = summary.counts.view_count,
        routines = summary.counts.routine_count,
        "Built schema summary"
    );
    Ok(summary)
}

/// Turn a user-supplied routine name filter into a LIKE pattern.
///
/// Patterns containing `%` or `*` are wildcards (`*` means `%`). Anything
/// else is a literal substring with LIKE metacharacters escaped.
pub fn like_pattern(pattern: &str) -> String {
    if pattern.contains('%') || pattern.contains('*') {
        return pattern.replace('*', "%");
    }

    let mut escaped = String::with_capacity(pattern.len() + 2);
    escaped.push('%');
    for ch in pattern.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

/// Split `pg_get_function_arguments` output at top-level commas.
///
/// Commas inside parentheses, brackets or quoted literals (e.g. in
/// `DEFAULT` expressions) do not split.
pub fn split_arguments(arguments: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_single = false;
    let mut in_double = false;

    for ch in arguments.chars() {
        match ch {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '(' | '[' if !in_single && !in_double => depth += 1,
            ')' | ']' if !in_single && !in_double => depth = depth.saturating_sub(1),
            ',' if depth == 0 && !in_single && !in_double => {
                let part = current.trim();
                if !part.is_empty() {
                    parts.push(part.to_string());
                }
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }

    let part = current.trim();
    if !part.is_empty() {
        parts.push(part.to_string());
    }
    parts
}
