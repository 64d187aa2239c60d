use std::fmt;

use serde_json::Value as JsonValue;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum N1qlError {
    /// Network error while reading a response that already arrived.
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    /// Every endpoint in the pool failed at the transport level.
    #[error("no responding query nodes")]
    NoRespondingNodes {
        /// Transport error from the last endpoint tried.
        #[source]
        source: reqwest::Error,
    },
    /// Non-200 HTTP status with the (truncated) response body.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// Errors reported by the query service in the `errors` field.
    #[error("query error: {errors}")]
    Query {
        /// Aggregated `{code, msg}` entries.
        errors: ServerErrors,
        /// Mutation count reported alongside the errors, if any.
        ///
        /// Never treat this as a successful affected-row count.
        partial_mutations: Option<u64>,
    },
    /// Response decoding error.
    #[error("decode error: {0}")]
    Decode(String),
    /// The server broke the response contract (missing plan, unexpected row shape).
    #[error("internal error: {0}")]
    Internal(String),
    /// Placeholder count does not match the number of supplied arguments.
    #[error("argument count mismatch: {placeholders} placeholders, {args} arguments")]
    ArgumentCountMismatch { placeholders: usize, args: usize },
    /// A prepared statement was executed with fewer arguments than it declares.
    #[error("insufficient arguments: prepared statement expects {expected}, got {got}")]
    InsufficientArgs { expected: usize, got: usize },
    /// The prepared statement was closed.
    #[error("prepared statement not found")]
    StatementNotFound,
    /// An argument could not be encoded for the wire.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Invalid connection configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl N1qlError {
    pub(crate) fn query(errors: ServerErrors) -> Self {
        Self::Query {
            errors,
            partial_mutations: None,
        }
    }
}

/// One entry of the service's `errors` array.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerError {
    /// Numeric error code, `0` when absent.
    pub code: i64,
    /// Error message, empty when absent.
    pub msg: String,
}

impl ServerError {
    fn from_json(value: &JsonValue) -> Option<Self> {
        let entry = value.as_object()?;
        let code = entry.get("code").and_then(JsonValue::as_i64).unwrap_or(0);
        let msg = entry
            .get("msg")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_owned();
        Some(Self { code, msg })
    }
}

/// Aggregated server errors, displayed as one message.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerErrors {
    entries: Vec<ServerError>,
    raw: JsonValue,
}

impl ServerErrors {
    /// Builds the aggregate from the raw `errors` array.
    pub(crate) fn from_json(errors: &[JsonValue]) -> Self {
        Self {
            entries: errors.iter().filter_map(ServerError::from_json).collect(),
            raw: JsonValue::Array(errors.to_vec()),
        }
    }

    /// Parsed entries in server order.
    pub fn entries(&self) -> &[ServerError] {
        &self.entries
    }

    /// The `errors` array exactly as the server sent it.
    pub fn raw(&self) -> &JsonValue {
        &self.raw
    }
}

impl fmt::Display for ServerErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut written = 0usize;
        for entry in &self.entries {
            if entry.code == 0 && entry.msg.is_empty() {
                continue;
            }
            if written > 0 {
                f.write_str("; ")?;
            }
            write!(f, "code {}: {}", entry.code, entry.msg)?;
            written += 1;
        }
        if written == 0 {
            write!(f, "unrecognized error payload {}", self.raw)?;
        }
        Ok(())
    }
}
