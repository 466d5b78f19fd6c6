use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use sqlx::postgres::{PgColumn, PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::query_builder::Separated;
use sqlx::types::{Decimal, Json, Uuid};
use sqlx::{Column, Executor, QueryBuilder, Row as _, Statement, TypeInfo};
use std::sync::OnceLock;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{quote_ident, DbSettings, TableName};
use crate::error::PortalError;
use crate::model::{Cell, ColumnDef, Row, SqlType, Table};

/// PostgreSQL accepts at most this many bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;

/// Where pages read tables from and write them back to.
#[async_trait]
pub trait TableSource: Send + Sync {
    async fn fetch(&self, sql: &str) -> Result<Table, PortalError>;

    /// Replace every row of `target` with the rows of `table` in one
    /// transaction. Returns the number of rows inserted.
    async fn replace_all(&self, target: &TableName, table: &Table) -> Result<u64, PortalError>;
}

/// Process-wide database handle.
///
/// Constructed once at startup and shared by clone. The pool is opened on
/// first use; a failed attempt is not remembered, so the next request tries
/// again.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    settings: DbSettings,
    pool: OnceCell<PgPool>,
}

impl Database {
    pub fn new(settings: DbSettings) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                settings,
                pool: OnceCell::new(),
            }),
        }
    }

    pub async fn pool(&self) -> Result<&PgPool, PortalError> {
        self.inner
            .pool
            .get_or_try_init(|| connect(&self.inner.settings))
            .await
    }

    /// Close the pool if it was ever opened.
    pub async fn close(&self) {
        if let Some(pool) = self.inner.pool.get() {
            pool.close().await;
            info!("database pool closed");
        }
    }
}

/// Open a pool and confirm the server answers a round trip.
///
/// Missing settings fail before any network traffic.
pub async fn connect(settings: &DbSettings) -> Result<PgPool, PortalError> {
    let config = settings.resolve()?;
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections())
        .acquire_timeout(settings.acquire_timeout())
        .test_before_acquire(true)
        .connect_with(config.connect_options())
        .await
        .map_err(|e| PortalError::Connection(format!("failed to create database pool: {e}")))?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| PortalError::Connection(format!("database round trip failed: {e}")))?;

    info!(
        host = %config.host,
        port = config.port,
        database = %config.database,
        max_connections = settings.max_connections(),
        "connected to database"
    );
    Ok(pool)
}

#[async_trait]
impl TableSource for Database {
    async fn fetch(&self, sql: &str) -> Result<Table, PortalError> {
        let pool = self.pool().await?;
        let columns = column_defs(pool.prepare(sql).await?.columns());

        let has_other = columns.iter().any(|c| matches!(c.ty, SqlType::Other(_)));
        let projected = if has_other {
            text_projection(sql, &columns)
        } else {
            None
        };
        let unreadable: Vec<String> = if has_other && projected.is_none() {
            columns
                .iter()
                .filter(|c| matches!(c.ty, SqlType::Other(_)))
                .map(|c| c.name.clone())
                .collect()
        } else {
            Vec::new()
        };
        if !unreadable.is_empty() {
            warn!(sql, columns = ?unreadable, "column names are not unique; unsupported columns shown as null");
        }

        let rows: Vec<PgRow> = sqlx::query(projected.as_deref().unwrap_or(sql))
            .fetch_all(pool)
            .await?;
        let as_text = projected.is_some();
        let rows = rows
            .iter()
            .map(|row| decode_row(row, &columns, as_text))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(sql, rows = rows.len(), columns = columns.len(), "fetched table");
        Ok(Table::new(columns, rows).with_unreadable(unreadable))
    }

    async fn replace_all(&self, target: &TableName, table: &Table) -> Result<u64, PortalError> {
        let pool = self.pool().await?;
        let save_err = |e: sqlx::Error| PortalError::Save(e.to_string());

        // Dropping the transaction without commit rolls it back.
        let mut tx = pool.begin().await.map_err(save_err)?;

        let deleted = sqlx::query(&format!("DELETE FROM {}", target.quoted()))
            .execute(&mut *tx)
            .await
            .map_err(save_err)?
            .rows_affected();

        let mut inserted = 0u64;
        if !table.columns.is_empty() {
            let rows_per_statement = (MAX_BIND_PARAMS / table.columns.len()).max(1);
            for chunk in table.rows.chunks(rows_per_statement) {
                let mut qb = insert_statement(target, table, chunk);
                inserted += qb
                    .build()
                    .execute(&mut *tx)
                    .await
                    .map_err(save_err)?
                    .rows_affected();
            }
        }

        tx.commit().await.map_err(save_err)?;
        info!(table = %target, deleted, inserted, "replaced table contents");
        Ok(inserted)
    }
}

fn column_defs(columns: &[PgColumn]) -> Vec<ColumnDef> {
    columns
        .iter()
        .map(|c| {
            let ty = SqlType::from_pg_name(c.type_info().name());
            if let SqlType::Other(name) = &ty {
                debug!(column = c.name(), ty = %name, "unsupported column type; reading its text form");
            }
            ColumnDef {
                name: c.name().to_string(),
                ty,
            }
        })
        .collect()
}

/// Wrap `sql` so every column of an unsupported type is selected as text.
///
/// Returns `None` when the result has duplicate column names, which the
/// outer select could not address.
fn text_projection(sql: &str, columns: &[ColumnDef]) -> Option<String> {
    let mut names = HashSet::new();
    if !columns.iter().all(|c| names.insert(c.name.as_str())) {
        return None;
    }
    let select = columns
        .iter()
        .map(|c| {
            let name = quote_ident(&c.name);
            match c.ty {
                SqlType::Other(_) => format!("{name}::text AS {name}"),
                _ => name,
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    let inner = sql.trim().trim_end_matches(';').trim_end();
    Some(format!("SELECT {select} FROM ({inner}) AS portal_source"))
}

/// `as_text` means unsupported columns were projected to text by
/// [`text_projection`]; otherwise they cannot be read and come back null.
fn decode_row(row: &PgRow, columns: &[ColumnDef], as_text: bool) -> Result<Row, PortalError> {
    let values = columns
        .iter()
        .enumerate()
        .map(|(i, col)| decode_cell(row, i, &col.ty, as_text))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Row { values })
}

fn decode_cell(row: &PgRow, idx: usize, ty: &SqlType, as_text: bool) -> Result<Cell, sqlx::Error> {
    let cell = match ty {
        SqlType::Bool => row.try_get::<Option<bool>, _>(idx)?.map(Cell::Bool),
        SqlType::SmallInt => row
            .try_get::<Option<i16>, _>(idx)?
            .map(|v| Cell::Int(v.into())),
        SqlType::Int => row
            .try_get::<Option<i32>, _>(idx)?
            .map(|v| Cell::Int(v.into())),
        SqlType::BigInt => row.try_get::<Option<i64>, _>(idx)?.map(Cell::Int),
        SqlType::Real => row
            .try_get::<Option<f32>, _>(idx)?
            .map(|v| Cell::Float(v.into())),
        SqlType::Double => row.try_get::<Option<f64>, _>(idx)?.map(Cell::Float),
        SqlType::Numeric => row
            .try_get::<Option<Decimal>, _>(idx)?
            .map(|d| Cell::Text(d.to_string())),
        SqlType::Text => row.try_get::<Option<String>, _>(idx)?.map(Cell::Text),
        SqlType::Uuid => row
            .try_get::<Option<Uuid>, _>(idx)?
            .map(|u| Cell::Text(u.to_string())),
        SqlType::Date => row.try_get::<Option<NaiveDate>, _>(idx)?.map(Cell::Date),
        SqlType::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(Cell::DateTime),
        SqlType::TimestampTz => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)?
            .map(|dt| Cell::DateTime(dt.naive_utc())),
        SqlType::Json | SqlType::Jsonb => row
            .try_get::<Option<serde_json::Value>, _>(idx)?
            .map(Cell::Json),
        SqlType::Other(_) if as_text => row.try_get::<Option<String>, _>(idx)?.map(Cell::Text),
        SqlType::Other(_) => None,
    };
    Ok(cell.unwrap_or(Cell::Null))
}

fn insert_statement<'args>(
    target: &TableName,
    table: &Table,
    rows: &[Row],
) -> QueryBuilder<'args, Postgres> {
    let mut qb = QueryBuilder::new(format!("INSERT INTO {} (", target.quoted()));
    {
        let mut cols = qb.separated(", ");
        for col in &table.columns {
            cols.push(quote_ident(&col.name));
        }
    }
    qb.push(") ");
    qb.push_values(rows, |mut b, row| {
        for (cell, col) in row.values.iter().zip(&table.columns) {
            push_cell(&mut b, cell, &col.ty);
        }
    });
    qb
}

fn cast_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\[\])?$").expect("static regex must compile")
    })
}

/// Cast applied to every bound value so text, nulls and JSON land in the
/// column's real type.
fn cast_suffix(ty: &SqlType) -> Option<String> {
    let name = ty.pg_name();
    cast_pattern()
        .is_match(name)
        .then(|| format!("::{}", name.to_ascii_lowercase()))
}

fn push_cell<'args>(b: &mut Separated<'_, 'args, Postgres, &'static str>, cell: &Cell, ty: &SqlType) {
    match cell.clone() {
        Cell::Null => b.push_bind(None::<String>),
        Cell::Bool(v) => b.push_bind(v),
        Cell::Int(v) => b.push_bind(v),
        Cell::Float(v) => b.push_bind(v),
        Cell::Text(v) => b.push_bind(v),
        Cell::Date(v) => b.push_bind(v),
        Cell::DateTime(v) if *ty == SqlType::TimestampTz => b.push_bind(Utc.from_utc_datetime(&v)),
        Cell::DateTime(v) => b.push_bind(v),
        Cell::Json(v) => b.push_bind(Json(v)),
    };
    if let Some(cast) = cast_suffix(ty) {
        b.push_unseparated(cast);
    }
}
