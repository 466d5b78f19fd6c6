use crate::error::PortalError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::ser::Serializer;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Column type as reported by PostgreSQL. Decides how cells are decoded and
/// how they are bound back on save.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlType {
    Bool,
    SmallInt,
    Int,
    BigInt,
    Real,
    Double,
    Numeric,
    Text,
    Uuid,
    Date,
    Timestamp,
    TimestampTz,
    Json,
    Jsonb,
    Other(String),
}

impl SqlType {
    pub fn from_pg_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "BOOL" => SqlType::Bool,
            "INT2" => SqlType::SmallInt,
            "INT4" => SqlType::Int,
            "INT8" => SqlType::BigInt,
            "FLOAT4" => SqlType::Real,
            "FLOAT8" => SqlType::Double,
            "NUMERIC" => SqlType::Numeric,
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => SqlType::Text,
            "UUID" => SqlType::Uuid,
            "DATE" => SqlType::Date,
            "TIMESTAMP" => SqlType::Timestamp,
            "TIMESTAMPTZ" => SqlType::TimestampTz,
            "JSON" => SqlType::Json,
            "JSONB" => SqlType::Jsonb,
            _ => SqlType::Other(name.to_string()),
        }
    }

    pub fn pg_name(&self) -> &str {
        match self {
            SqlType::Bool => "bool",
            SqlType::SmallInt => "int2",
            SqlType::Int => "int4",
            SqlType::BigInt => "int8",
            SqlType::Real => "float4",
            SqlType::Double => "float8",
            SqlType::Numeric => "numeric",
            SqlType::Text => "text",
            SqlType::Uuid => "uuid",
            SqlType::Date => "date",
            SqlType::Timestamp => "timestamp",
            SqlType::TimestampTz => "timestamptz",
            SqlType::Json => "json",
            SqlType::Jsonb => "jsonb",
            SqlType::Other(name) => name,
        }
    }
}

impl Serialize for SqlType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.pg_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: SqlType,
}

#[derive(Debug, Clone)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Json(Value),
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Cell::Null, Cell::Null) => true,
            (Cell::Bool(a), Cell::Bool(b)) => a == b,
            (Cell::Int(a), Cell::Int(b)) => a == b,
            (Cell::Float(a), Cell::Float(b)) => a.to_bits() == b.to_bits(),
            (Cell::Text(a), Cell::Text(b)) => a == b,
            (Cell::Date(a), Cell::Date(b)) => a == b,
            (Cell::DateTime(a), Cell::DateTime(b)) => a == b,
            (Cell::Json(a), Cell::Json(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Cell {}

impl Hash for Cell {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Cell::Null => 0.hash(state),
            Cell::Bool(b) => {
                1.hash(state);
                b.hash(state);
            }
            Cell::Int(i) => {
                2.hash(state);
                i.hash(state);
            }
            Cell::Float(f) => {
                3.hash(state);
                f.to_bits().hash(state);
            }
            Cell::Text(s) => {
                4.hash(state);
                s.hash(state);
            }
            Cell::Date(d) => {
                5.hash(state);
                d.hash(state);
            }
            Cell::DateTime(dt) => {
                6.hash(state);
                dt.hash(state);
            }
            Cell::Json(v) => {
                7.hash(state);
                hash_json(v, state);
            }
        }
    }
}

// Object keys are hashed in sorted order so the hash agrees with `Value`'s
// order-insensitive equality.
fn hash_json<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        Value::Number(n) => {
            2u8.hash(state);
            n.to_string().hash(state);
        }
        Value::String(s) => {
            3u8.hash(state);
            s.hash(state);
        }
        Value::Array(items) => {
            4u8.hash(state);
            items.len().hash(state);
            for item in items {
                hash_json(item, state);
            }
        }
        Value::Object(map) => {
            5u8.hash(state);
            map.len().hash(state);
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                key.hash(state);
                hash_json(&map[key.as_str()], state);
            }
        }
    }
}

impl Cell {
    pub fn to_json(&self) -> Value {
        match self {
            Cell::Null => Value::Null,
            Cell::Bool(b) => Value::Bool(*b),
            Cell::Int(i) => Value::from(*i),
            Cell::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Cell::Text(s) => Value::String(s.clone()),
            Cell::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
            Cell::DateTime(dt) => Value::String(dt.format(DATETIME_FORMAT).to_string()),
            Cell::Json(v) => v.clone(),
        }
    }

    /// Convert a value posted by the grid into a cell of the column's type.
    ///
    /// `null` is SQL NULL. Empty strings in scalar non-text columns mean the
    /// user cleared the cell; in text and JSON columns they are values.
    pub fn from_json(value: &Value, ty: &SqlType) -> Result<Cell, PortalError> {
        if value.is_null() {
            return Ok(Cell::Null);
        }
        if let Value::String(s) = value {
            let keeps_empty = matches!(
                ty,
                SqlType::Text | SqlType::Other(_) | SqlType::Json | SqlType::Jsonb
            );
            if s.trim().is_empty() && !keeps_empty {
                return Ok(Cell::Null);
            }
        }

        let mismatch = || {
            PortalError::Invalid(format!(
                "value {value} is not valid for a column of type {}",
                ty.pg_name()
            ))
        };

        match ty {
            SqlType::Bool => match value {
                Value::Bool(b) => Ok(Cell::Bool(*b)),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "t" | "yes" | "1" => Ok(Cell::Bool(true)),
                    "false" | "f" | "no" | "0" => Ok(Cell::Bool(false)),
                    _ => Err(mismatch()),
                },
                _ => Err(mismatch()),
            },
            SqlType::SmallInt | SqlType::Int | SqlType::BigInt => match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                    .map(Cell::Int)
                    .ok_or_else(mismatch),
                Value::String(s) => s.trim().parse().map(Cell::Int).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            SqlType::Real | SqlType::Double => match value {
                Value::Number(n) => n.as_f64().map(Cell::Float).ok_or_else(mismatch),
                Value::String(s) => s.trim().parse().map(Cell::Float).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            SqlType::Numeric => match value {
                Value::Number(n) => Ok(Cell::Text(n.to_string())),
                Value::String(s) => Ok(Cell::Text(s.trim().to_string())),
                _ => Err(mismatch()),
            },
            SqlType::Text | SqlType::Uuid | SqlType::Other(_) => match value {
                Value::String(s) => Ok(Cell::Text(s.clone())),
                Value::Number(n) => Ok(Cell::Text(n.to_string())),
                Value::Bool(b) => Ok(Cell::Text(b.to_string())),
                _ => Err(mismatch()),
            },
            SqlType::Date => match value {
                Value::String(s) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
                    .map(Cell::Date)
                    .map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            SqlType::Timestamp | SqlType::TimestampTz => match value {
                Value::String(s) => parse_datetime(s.trim())
                    .map(Cell::DateTime)
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
            SqlType::Json | SqlType::Jsonb => Ok(Cell::Json(value.clone())),
        }
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Row {
    /// Values aligned to Table.columns.
    pub values: Vec<Cell>,
}

/// A tabular query result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Table {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Row>,
    /// Columns whose values could not be read and are shown as null. Such a
    /// table must not be written back.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unreadable: Vec<String>,
}

impl Table {
    pub fn new(columns: Vec<ColumnDef>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            unreadable: Vec::new(),
        }
    }

    pub fn with_unreadable(mut self, columns: Vec<String>) -> Self {
        self.unreadable = columns;
        self
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows at the given positions, in the given order. Out-of-range positions
    /// are skipped.
    pub fn select_rows(&self, indices: &[usize]) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: indices
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
            unreadable: self.unreadable.clone(),
        }
    }

    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// A row as a column-name → value object, optionally leaving one column out.
    pub fn row_object(&self, row: &Row, skip: Option<usize>) -> Map<String, Value> {
        self.columns
            .iter()
            .zip(&row.values)
            .enumerate()
            .filter(|(i, _)| Some(*i) != skip)
            .map(|(_, (col, cell))| (col.name.clone(), cell.to_json()))
            .collect()
    }
}
