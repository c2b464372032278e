//! `{table-spec, table-data}` wire format.
//!
//! ```json
//! {
//!   "table-spec": [{"column-int": "int"}, {"b": "string"}],
//!   "table-data": [[100, "boil"], [0, "freeze"]]
//! }
//! ```
//!
//! Encoding coerces per column: every non-null cell of a column that maps to
//! `string` is rendered as a string. Decoding reconciles every cell with its
//! declared column type; a cell that does not fit becomes a missing value.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{Map, Value};

use super::mapper::EngineType;
use super::{Cell, Column, Table};
use crate::error::{BridgeError, Result};

const TABLE_SPEC: &str = "table-spec";
const TABLE_DATA: &str = "table-data";

/// One `{name: type}` entry of a table-spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    /// Type tag as sent on the wire. Usually one of the [`EngineType`] tags,
    /// but the engine may report others (e.g. `localdate`).
    pub tag: String,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, ty: EngineType) -> Self {
        Self {
            name: name.into(),
            tag: ty.as_str().to_string(),
        }
    }

    /// Parsed type tag, `None` for tags outside the five table types.
    pub fn engine_type(&self) -> Option<EngineType> {
        self.tag.parse().ok()
    }
}

impl Serialize for ColumnSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.name, &self.tag)?;
        map.end()
    }
}

/// Wire-level table: column spec plus row-major JSON scalars.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodedTable {
    #[serde(rename = "table-spec")]
    pub table_spec: Vec<ColumnSpec>,
    #[serde(rename = "table-data")]
    pub table_data: Vec<Vec<Value>>,
}

impl EncodedTable {
    /// Parse and validate a wire payload.
    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| BridgeError::Format("payload is not a JSON object".to_string()))?;

        let spec = object
            .get(TABLE_SPEC)
            .and_then(Value::as_array)
            .ok_or_else(|| BridgeError::Format(format!("missing or invalid '{}'", TABLE_SPEC)))?;
        let data = object
            .get(TABLE_DATA)
            .and_then(Value::as_array)
            .ok_or_else(|| BridgeError::Format(format!("missing or invalid '{}'", TABLE_DATA)))?;

        let table_spec = spec
            .iter()
            .enumerate()
            .map(|(idx, entry)| parse_spec_entry(idx, entry))
            .collect::<Result<Vec<_>>>()?;

        let width = table_spec.len();
        let table_data = data
            .iter()
            .enumerate()
            .map(|(idx, row)| match row.as_array() {
                Some(cells) if cells.len() == width => Ok(cells.clone()),
                Some(cells) => Err(BridgeError::Format(format!(
                    "row {} has {} values, table-spec has {} columns",
                    idx,
                    cells.len(),
                    width
                ))),
                None => Err(BridgeError::Format(format!("row {} is not an array", idx))),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            table_spec,
            table_data,
        })
    }

    /// JSON form of the payload.
    pub fn to_value(&self) -> Value {
        let spec = self
            .table_spec
            .iter()
            .map(|c| {
                let mut entry = Map::new();
                entry.insert(c.name.clone(), Value::String(c.tag.clone()));
                Value::Object(entry)
            })
            .collect();
        let data = self
            .table_data
            .iter()
            .map(|row| Value::Array(row.clone()))
            .collect();

        let mut object = Map::new();
        object.insert(TABLE_SPEC.to_string(), Value::Array(spec));
        object.insert(TABLE_DATA.to_string(), Value::Array(data));
        Value::Object(object)
    }

    /// Column names in spec order.
    pub fn column_names(&self) -> Vec<&str> {
        self.table_spec.iter().map(|c| c.name.as_str()).collect()
    }

    /// Build a [`Table`], reconciling every cell with its declared column type.
    pub fn to_table(&self) -> Result<Table> {
        let types: Vec<Option<EngineType>> =
            self.table_spec.iter().map(ColumnSpec::engine_type).collect();

        let columns = self
            .table_spec
            .iter()
            .zip(&types)
            .map(|(spec, ty)| {
                if ty.is_none() {
                    tracing::debug!(column = %spec.name, tag = %spec.tag, "Decoding unknown column type as string");
                }
                let dtype = ty.map(|t| t.native_dtype()).unwrap_or("object");
                Column::new(spec.name.clone(), dtype)
            })
            .collect();

        let rows = self
            .table_data
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&types)
                    .map(|(value, ty)| reconcile(value, *ty))
                    .collect()
            })
            .collect();

        Table::new(columns, rows)
    }
}

impl From<&Table> for EncodedTable {
    fn from(table: &Table) -> Self {
        encode(table)
    }
}

fn parse_spec_entry(idx: usize, entry: &Value) -> Result<ColumnSpec> {
    let pair = entry.as_object().filter(|m| m.len() == 1).and_then(|m| m.iter().next());
    match pair {
        Some((name, Value::String(tag))) => Ok(ColumnSpec {
            name: name.clone(),
            tag: tag.clone(),
        }),
        _ => Err(BridgeError::Format(format!(
            "table-spec entry {} is not a single {{name: type}} mapping",
            idx
        ))),
    }
}

/// Fit a wire value into a column of the given type.
fn reconcile(value: &Value, ty: Option<EngineType>) -> Cell {
    match (ty, value) {
        (_, Value::Null) => Cell::Null,
        (Some(EngineType::Int | EngineType::Long), v) => integral(v).map(Cell::Int).unwrap_or(Cell::Null),
        (Some(EngineType::Double), v) => v.as_f64().map(Cell::Float).unwrap_or(Cell::Null),
        (Some(EngineType::Boolean), v) => v.as_bool().map(Cell::Bool).unwrap_or(Cell::Null),
        (Some(EngineType::String) | None, Value::String(s)) => Cell::Str(s.clone()),
        (Some(EngineType::String) | None, v) => Cell::Str(v.to_string()),
    }
}

/// Integer value of `v`, accepting floats without a fractional part (`3.0`).
fn integral(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| {
        v.as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

/// Encode a table into the wire form.
pub fn encode(table: &Table) -> EncodedTable {
    let types: Vec<EngineType> = table.columns().iter().map(Column::engine_type).collect();

    let table_spec = table
        .columns()
        .iter()
        .zip(&types)
        .map(|(column, ty)| ColumnSpec::new(column.name.clone(), *ty))
        .collect();

    let table_data = table
        .rows()
        .iter()
        .map(|row| {
            row.iter()
                .zip(&types)
                .map(|(cell, ty)| match ty {
                    EngineType::String => cell.render().map(Value::String).unwrap_or(Value::Null),
                    _ => cell.to_json(),
                })
                .collect()
        })
        .collect();

    EncodedTable {
        table_spec,
        table_data,
    }
}

/// Decode a wire payload into a [`Table`].
pub fn decode(value: &Value) -> Result<Table> {
    EncodedTable::from_value(value)?.to_table()
}

/// Value a caller places in an input slot.
#[derive(Debug, Clone, PartialEq)]
pub enum InputTable {
    /// Encoded at execution time.
    Table(Table),
    /// Already-encoded (or otherwise engine-ready) JSON, sent unchanged.
    Payload(Value),
}

impl InputTable {
    /// JSON sent to the engine for this input.
    pub fn to_payload(&self) -> Value {
        match self {
            InputTable::Table(table) => encode(table).to_value(),
            InputTable::Payload(value) => value.clone(),
        }
    }
}

impl From<Table> for InputTable {
    fn from(table: Table) -> Self {
        InputTable::Table(table)
    }
}

impl From<Value> for InputTable {
    fn from(value: Value) -> Self {
        InputTable::Payload(value)
    }
}

impl From<EncodedTable> for InputTable {
    fn from(encoded: EncodedTable) -> Self {
        InputTable::Payload(encoded.to_value())
    }
}
