use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

/// Shape of the rows a query projects, as declared by the service.
#[derive(Clone, Debug, PartialEq)]
pub enum Signature {
    /// Column name to type hint. Keys iterate in sorted order.
    Object(BTreeMap<String, JsonValue>),
    /// Rows are bare values of this type (`SELECT RAW ...`).
    Scalar(String),
    /// No signature (DML, or no projection).
    Null,
}

impl Signature {
    const WILDCARD: &'static str = "*";

    /// The `{"*": "*"}` signature returned for `SELECT *`.
    pub fn wildcard() -> Self {
        Self::Object(BTreeMap::from([(
            Self::WILDCARD.to_owned(),
            JsonValue::String(Self::WILDCARD.to_owned()),
        )]))
    }

    pub(crate) fn from_json(value: Option<JsonValue>) -> Self {
        match value {
            None | Some(JsonValue::Null) => Self::Null,
            Some(JsonValue::Object(columns)) => Self::Object(columns.into_iter().collect()),
            Some(JsonValue::String(kind)) => Self::Scalar(kind),
            Some(_other) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("unrecognized signature shape {}, using wildcard", _other);
                Self::wildcard()
            }
        }
    }

    /// Column names in emitted position order.
    pub fn columns(&self) -> Vec<String> {
        match self {
            Self::Object(columns) => columns.keys().cloned().collect(),
            Self::Scalar(kind) => vec![kind.clone()],
            Self::Null => vec!["null".to_owned()],
        }
    }

    /// Whether each row element is emitted whole at position 0 instead of
    /// being split into named columns.
    pub fn is_whole_element(&self) -> bool {
        match self {
            Self::Object(columns) => columns.len() == 1 && columns.contains_key(Self::WILDCARD),
            Self::Scalar(_) | Self::Null => true,
        }
    }

    pub(crate) fn to_json(&self) -> JsonValue {
        match self {
            Self::Object(columns) => JsonValue::Object(
                columns
                    .iter()
                    .map(|(name, kind)| (name.clone(), kind.clone()))
                    .collect(),
            ),
            Self::Scalar(kind) => JsonValue::String(kind.clone()),
            Self::Null => JsonValue::Null,
        }
    }
}

/// Outcome of a statement that returns no rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecResult {
    /// `metrics.mutationCount` of the response, zero when absent.
    pub affected_row_count: u64,
    /// Always zero: the service has no auto-increment keys.
    pub last_insert_id: i64,
}
