//! Column-ordered in-memory table of JSON values.
//!
//! Rows are keyed by column name; `columns` fixes the order used when the
//! table is written out. A row may omit a column, which reads as `null`.

use std::collections::BTreeMap;

use serde_json::Value;

pub type Row = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a table from rows, ordering columns by first appearance.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut table = Self::default();
        for row in rows {
            table.push_row(row);
        }
        table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|column| column == name)
    }

    pub fn push_row(&mut self, row: Row) {
        for key in row.keys() {
            if !self.has_column(key) {
                self.columns.push(key.clone());
            }
        }
        self.rows.push(row);
    }

    pub fn value<'a>(&'a self, row_index: usize, column: &str) -> &'a Value {
        self.rows
            .get(row_index)
            .and_then(|row| row.get(column))
            .unwrap_or(&Value::Null)
    }

    pub fn column_values(&self, name: &str) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| row.get(name).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Adds or overwrites a column. Missing trailing values become `null`.
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) {
        if !self.has_column(name) {
            self.columns.push(name.to_string());
        }
        let mut values = values.into_iter();
        for row in &mut self.rows {
            row.insert(name.to_string(), values.next().unwrap_or(Value::Null));
        }
    }

    pub fn map_column(&mut self, name: &str, mut f: impl FnMut(&Row) -> Value) {
        let values: Vec<Value> = self.rows.iter().map(&mut f).collect();
        self.set_column(name, values);
    }

    pub fn drop_column(&mut self, name: &str) -> bool {
        let before = self.columns.len();
        self.columns.retain(|column| column != name);
        for row in &mut self.rows {
            row.remove(name);
        }
        before != self.columns.len()
    }

    /// Renames `source -> target` pairs. Sources that do not exist are
    /// skipped; a target that already exists is replaced.
    pub fn rename_columns(&mut self, renames: &BTreeMap<String, String>) {
        for (source, target) in renames {
            if source == target || !self.has_column(source) {
                continue;
            }
            if self.has_column(target) {
                self.drop_column(target);
            }
            for column in &mut self.columns {
                if column == source {
                    *column = target.clone();
                }
            }
            for row in &mut self.rows {
                if let Some(value) = row.remove(source) {
                    row.insert(target.clone(), value);
                }
            }
        }
    }

    /// Splits rows into tables of at most `size` rows, keeping column order.
    pub fn chunks(&self, size: usize) -> Vec<Table> {
        let size = size.max(1);
        self.rows
            .chunks(size)
            .map(|rows| Table {
                columns: self.columns.clone(),
                rows: rows.to_vec(),
            })
            .collect()
    }

    /// Appends another table's rows; new columns are added at the end.
    pub fn concat(&mut self, other: Table) {
        for column in other.columns {
            if !self.has_column(&column) {
                self.columns.push(column);
            }
        }
        self.rows.extend(other.rows);
    }
}

pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}
