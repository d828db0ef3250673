//! Column-order-preserving result rows.

use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Portable scalar a SQL column value is coerced into.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Bool(bool),
    Integer(i64),
    Float(f64),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => f.write_str(s),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Integer(i) => write!(f, "{}", i),
            CellValue::Float(n) => write!(f, "{}", n),
        }
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Text(s) => serializer.serialize_str(s),
            CellValue::Bool(b) => serializer.serialize_bool(*b),
            CellValue::Integer(i) => serializer.serialize_i64(*i),
            CellValue::Float(n) => serializer.serialize_f64(*n),
        }
    }
}

/// One relational row as an ordered sequence of `(column, value)` pairs.
///
/// Serializes as a JSON object whose keys appear in result-set column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderedRow {
    cells: Vec<(String, CellValue)>,
}

impl OrderedRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cells: Vec::with_capacity(capacity),
        }
    }

    /// Append a column. Order of calls is the column order.
    pub fn push(&mut self, column: impl Into<String>, value: CellValue) {
        self.cells.push((column.into(), value));
    }

    /// Value of the first column named `column`.
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.cells.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Serialize for OrderedRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, value) in &self.cells {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OrderedRow {
        let mut row = OrderedRow::new();
        row.push("zeta", CellValue::Integer(1));
        row.push("alpha", CellValue::Text("a".to_string()));
        row.push("mid", CellValue::Bool(true));
        row.push("ratio", CellValue::Float(0.5));
        row
    }

    #[test]
    fn test_columns_keep_insertion_order() {
        let row = sample();
        let columns: Vec<&str> = row.columns().collect();
        assert_eq!(columns, vec!["zeta", "alpha", "mid", "ratio"]);
    }

    #[test]
    fn test_get() {
        let row = sample();
        assert_eq!(row.get("alpha"), Some(&CellValue::Text("a".to_string())));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_serialize_preserves_order() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert_eq!(
            json,
            r#"{"zeta":1,"alpha":"a","mid":true,"ratio":0.5}"#
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(CellValue::Text("x".to_string()).to_string(), "x");
        assert_eq!(CellValue::Bool(false).to_string(), "false");
        assert_eq!(CellValue::Integer(-3).to_string(), "-3");
        assert_eq!(CellValue::Float(1.25).to_string(), "1.25");
    }
}
