//! Marshaling of unknown-schema result rows into generic records.
//!
//! The column set is only known once a statement has been prepared, so every
//! row is scanned cell by cell into [`Value`] slots keyed by column name.

use rusqlite::{Row, Rows, Statement};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::value::Value;

/// One result row: column name to value, in query declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRecord {
    entries: Vec<(String, Value)>,
}

impl ResultRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `column`, replacing an earlier value under the same name in place.
    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        match self.entries.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((column, value)),
        }
    }

    pub fn with_value(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.insert(column, value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for ResultRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Column names of a prepared statement, captured before it is executed.
pub fn column_names(stmt: &Statement<'_>) -> Vec<String> {
    stmt.column_names()
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn scan_row(row: &Row<'_>, columns: &[String]) -> rusqlite::Result<ResultRecord> {
    let mut record = ResultRecord::new();
    for (idx, name) in columns.iter().enumerate() {
        record.insert(name.as_str(), Value::from(row.get_ref(idx)?));
    }
    Ok(record)
}

/// Every row of the cursor, in iteration order. Zero rows yields an empty vec.
pub fn collect_records(
    mut rows: Rows<'_>,
    columns: &[String],
) -> rusqlite::Result<Vec<ResultRecord>> {
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(scan_row(row, columns)?);
    }
    Ok(records)
}

/// The last row of the cursor, or an empty record when there are none.
///
/// Every row is still scanned so that a decode failure on any of them is
/// reported rather than silently skipped.
pub fn last_record(mut rows: Rows<'_>, columns: &[String]) -> rusqlite::Result<ResultRecord> {
    let mut last = ResultRecord::new();
    while let Some(row) = rows.next()? {
        last = scan_row(row, columns)?;
    }
    Ok(last)
}
