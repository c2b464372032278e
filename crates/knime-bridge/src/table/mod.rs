//! Tabular values exchanged with Container Input/Output (Table) nodes.
//!
//! - [`Table`] - caller-side table: named, typed columns and row-major cells
//! - [`mapper`] - native type descriptor to KNIME column type
//! - [`codec`] - `{table-spec, table-data}` wire format

pub mod codec;
pub mod mapper;

use serde_json::Value;

use crate::error::{BridgeError, Result};

pub use codec::{decode, encode, ColumnSpec, EncodedTable, InputTable};
pub use mapper::{map_native_type, EngineType};

/// A single scalar value in a table.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Missing value.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Cell {
    /// Returns true for a missing value.
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Convert a JSON scalar into a cell. Arrays and objects are kept as their JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Int(i),
                None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Null),
            },
            Value::String(s) => Cell::Str(s.clone()),
            other => Cell::Str(other.to_string()),
        }
    }

    /// JSON form of the cell. Non-finite floats have no JSON form and become null.
    pub fn to_json(&self) -> Value {
        match self {
            Cell::Null => Value::Null,
            Cell::Bool(b) => Value::Bool(*b),
            Cell::Int(i) => Value::from(*i),
            Cell::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Cell::Str(s) => Value::String(s.clone()),
        }
    }

    /// String rendering used when a value lands in a string column.
    pub fn render(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Str(s) => Some(s.clone()),
            other => match other.to_json() {
                Value::Null => None,
                json => Some(json.to_string()),
            },
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Cell::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<i32> for Cell {
    fn from(v: i32) -> Self {
        Cell::Int(v as i64)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::Bool(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Str(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Str(v)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Cell::Null)
    }
}

/// Column name plus its native type descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Free-form descriptor (`int32`, `int64`, `float64`, `bool`, `object`, ...).
    pub dtype: String,
}

impl Column {
    pub fn new(name: impl Into<String>, dtype: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dtype: dtype.into(),
        }
    }

    /// KNIME column type this column is sent as.
    pub fn engine_type(&self) -> EngineType {
        map_native_type(&self.dtype)
    }
}

/// Ordered columns and row-major data. Every row is exactly as wide as the column list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Create a table with explicit column types.
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        let mut table = Self {
            columns,
            rows: Vec::with_capacity(rows.len()),
        };
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Create a table whose column types are inferred from the cells.
    pub fn from_rows<I, S>(names: I, rows: Vec<Vec<Cell>>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        check_widths(names.len(), &rows)?;
        let columns = names
            .into_iter()
            .enumerate()
            .map(|(idx, name)| {
                let dtype = infer_dtype(rows.iter().map(|row| &row[idx]));
                Column::new(name, dtype)
            })
            .collect();
        Ok(Self { columns, rows })
    }

    /// Append a row, rejecting rows of the wrong width.
    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(BridgeError::Format(format!(
                "row {} has {} values, expected {}",
                self.rows.len(),
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of the first column with the given name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// All cells of the named column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&Cell> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    /// Encode into the wire form.
    pub fn to_encoded(&self) -> EncodedTable {
        encode(self)
    }
}

fn check_widths(width: usize, rows: &[Vec<Cell>]) -> Result<()> {
    match rows.iter().position(|row| row.len() != width) {
        Some(idx) => Err(BridgeError::Format(format!(
            "row {} has {} values, expected {}",
            idx,
            rows[idx].len(),
            width
        ))),
        None => Ok(()),
    }
}

/// Infer a native descriptor for a column from its non-null cells.
fn infer_dtype<'a>(cells: impl Iterator<Item = &'a Cell>) -> &'static str {
    let mut ints = false;
    let mut floats = false;
    let mut bools = false;
    let mut other = false;

    for cell in cells {
        match cell {
            Cell::Null => {}
            Cell::Int(_) => ints = true,
            Cell::Float(_) => floats = true,
            Cell::Bool(_) => bools = true,
            Cell::Str(_) => other = true,
        }
    }

    match (ints, floats, bools, other) {
        (true, false, false, false) => "int64",
        (_, true, false, false) => "float64",
        (false, false, true, false) => "bool",
        _ => "object",
    }
}
