use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::{N1qlError, Result};

/// One emitted row: positional JSON texts aligned with the stream's columns.
///
/// A position is `None` when the element had no field for that column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Option<String>>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[String]>, values: Vec<Option<String>>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Option<String>> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// JSON text at `index`.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index)?.as_deref()
    }

    /// JSON text by case-insensitive column name.
    pub fn get_by_name(&self, name: &str) -> Option<&str> {
        let index = self
            .columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))?;
        self.get(index)
    }

    /// Deserializes the JSON text at `index`; `None` when the position is empty.
    pub fn decode<T: DeserializeOwned>(&self, index: usize) -> Result<Option<T>> {
        self.get(index)
            .map(|text| {
                serde_json::from_str(text).map_err(|err| {
                    N1qlError::Decode(format!("cannot decode column {index}: {err}"))
                })
            })
            .transpose()
    }
}
