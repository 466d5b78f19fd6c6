//! Command-line and environment configuration.
//!
//! Database settings keep their original environment variable names
//! (`DB_USER`, `DB_PASSWORD`, `DB_HOST`, `DB_PORT`, `DB_NAME`). The required
//! ones are optional at parse time so the portal can still start and report a
//! configuration error on the pages that need the database.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser};
use sqlparser::ast::{ObjectName, ObjectNamePart, SetExpr, Statement, TableFactor};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser as SqlParser;
use sqlx::postgres::PgConnectOptions;

use crate::error::PortalError;

pub const DEFAULT_TABLE_QUERY: &str = "select * from public.test";
pub const DEFAULT_MAP_QUERY: &str = "select * from public.test_geom limit 1000";
pub const DEFAULT_TARGET_TABLE: &str = "public.test";

/// EPSG:27700, British National Grid.
pub const BRITISH_NATIONAL_GRID: &str = "+proj=tmerc +lat_0=49 +lon_0=-2 +k=0.9996012717 \
    +x_0=400000 +y_0=-100000 +ellps=airy \
    +towgs84=446.448,-125.157,542.06,0.15,0.247,0.842,-20.489 +units=m +no_defs";

#[derive(Debug, Parser)]
#[command(name = "data-portal")]
#[command(about = "Web portal for browsing, editing and mapping PostgreSQL tables")]
#[command(version)]
pub struct Cli {
    /// Address to serve the portal on
    #[arg(long, env = "PORTAL_LISTEN", default_value = "127.0.0.1:8501")]
    pub listen: SocketAddr,

    #[command(flatten)]
    pub db: DbSettings,

    /// Seconds a cached query result stays valid
    #[arg(long, env = "PORTAL_CACHE_TTL_SECS", default_value_t = 600)]
    pub cache_ttl_secs: u64,

    /// Query behind the read-only table page
    #[arg(long, env = "PORTAL_TABLE_QUERY", default_value = DEFAULT_TABLE_QUERY)]
    pub table_query: String,

    /// Query behind the map page; must return a `geometry` column
    #[arg(long, env = "PORTAL_MAP_QUERY", default_value = DEFAULT_MAP_QUERY)]
    pub map_query: String,

    /// Table rewritten by the editor page
    #[arg(long, env = "PORTAL_TARGET_TABLE", default_value = DEFAULT_TARGET_TABLE)]
    pub target_table: String,

    /// proj string of the coordinate system stored in the geometry column
    #[arg(long, env = "PORTAL_SOURCE_CRS", default_value = BRITISH_NATIONAL_GRID)]
    pub source_crs: String,
}

#[derive(Clone, Args)]
pub struct DbSettings {
    #[arg(long = "db-user", env = "DB_USER")]
    pub user: Option<String>,

    #[arg(long = "db-password", env = "DB_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long = "db-host", env = "DB_HOST")]
    pub host: Option<String>,

    #[arg(long = "db-port", env = "DB_PORT", default_value_t = 5432)]
    pub port: u16,

    #[arg(long = "db-name", env = "DB_NAME")]
    pub name: Option<String>,

    /// Connections kept by the pool
    #[arg(long, env = "DB_POOL_SIZE", default_value_t = 5)]
    pub pool_size: u32,

    /// Extra connections allowed under load
    #[arg(long, env = "DB_MAX_OVERFLOW", default_value_t = 10)]
    pub max_overflow: u32,

    /// Seconds to wait for a pooled connection before failing
    #[arg(long, env = "DB_ACQUIRE_TIMEOUT_SECS", default_value_t = 30)]
    pub acquire_timeout_secs: u64,
}

impl fmt::Debug for DbSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbSettings")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("pool_size", &self.pool_size)
            .field("max_overflow", &self.max_overflow)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .finish()
    }
}

impl DbSettings {
    /// Check that every required value is present.
    pub fn resolve(&self) -> Result<DbConfig, PortalError> {
        fn required(value: &Option<String>, name: &str) -> Result<String, PortalError> {
            value
                .clone()
                .ok_or_else(|| PortalError::missing_setting(name))
        }

        Ok(DbConfig {
            user: required(&self.user, "DB_USER")?,
            password: required(&self.password, "DB_PASSWORD")?,
            host: required(&self.host, "DB_HOST")?,
            port: self.port,
            database: required(&self.name, "DB_NAME")?,
        })
    }

    pub fn max_connections(&self) -> u32 {
        self.pool_size.saturating_add(self.max_overflow).max(1)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Fully specified connection target.
#[derive(Clone)]
pub struct DbConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .finish()
    }
}

impl DbConfig {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .application_name("data-portal")
    }
}

/// A possibly schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    pub fn parse(raw: &str) -> Result<Self, PortalError> {
        let invalid = |why: &str| PortalError::Configuration(format!("invalid table name {raw:?}: {why}"));

        let sql = format!("SELECT * FROM {raw}");
        let ast = SqlParser::parse_sql(&PostgreSqlDialect {}, &sql).map_err(|e| invalid(&e.to_string()))?;
        let [Statement::Query(query)] = ast.as_slice() else {
            return Err(invalid("expected a single table name"));
        };
        let SetExpr::Select(select) = query.body.as_ref() else {
            return Err(invalid("expected a single table name"));
        };
        if select.from.len() != 1 || !select.from[0].joins.is_empty() || select.selection.is_some() {
            return Err(invalid("expected a single table name"));
        }
        match &select.from[0].relation {
            TableFactor::Table {
                name, alias: None, ..
            } => object_name_to_parts(name).map_err(|e| invalid(&e)),
            _ => Err(invalid("expected a single table name")),
        }
    }

    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

fn get_ident_name(part: &ObjectNamePart) -> Option<String> {
    match part {
        ObjectNamePart::Identifier(i) => Some(i.value.clone()),
        _ => None,
    }
}

fn object_name_to_parts(name: &ObjectName) -> Result<TableName, String> {
    let parts: Vec<String> = name
        .0
        .iter()
        .map(get_ident_name)
        .collect::<Option<_>>()
        .ok_or_else(|| "unsupported name part".to_string())?;
    match parts.as_slice() {
        [table] => Ok(TableName {
            schema: None,
            name: table.clone(),
        }),
        [schema, table] => Ok(TableName {
            schema: Some(schema.clone()),
            name: table.clone(),
        }),
        _ => Err("object name with more than 2 parts is not supported".into()),
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Page queries must be exactly one read-only query.
pub fn validate_read_query(sql: &str) -> Result<(), PortalError> {
    let ast = SqlParser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| PortalError::Configuration(format!("cannot parse query {sql:?}: {e}")))?;
    match ast.as_slice() {
        [Statement::Query(_)] => Ok(()),
        _ => Err(PortalError::Configuration(format!(
            "page query must be a single SELECT statement: {sql:?}"
        ))),
    }
}

/// Validated application settings (everything except the database).
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub listen: SocketAddr,
    pub cache_ttl: Duration,
    pub table_query: String,
    pub map_query: String,
    pub target_table: TableName,
    pub source_crs: String,
}

impl PortalConfig {
    /// The editor always reads the table it rewrites.
    pub fn editor_query(&self) -> String {
        format!("select * from {}", self.target_table.quoted())
    }
}

impl Cli {
    pub fn into_parts(self) -> Result<(PortalConfig, DbSettings), PortalError> {
        validate_read_query(&self.table_query)?;
        validate_read_query(&self.map_query)?;
        let target_table = TableName::parse(&self.target_table)?;
        let config = PortalConfig {
            listen: self.listen,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            table_query: self.table_query,
            map_query: self.map_query,
            target_table,
            source_crs: self.source_crs,
        };
        Ok((config, self.db))
    }
}
