//! `n1ql-http` is an async client for the N1QL query service REST API.
//!
//! Requests are form-encoded POSTs to one of several query endpoints, with
//! failover when an endpoint stops answering:
//! - [`Connection::query`] streams rows through a [`RowStream`]
//! - [`Connection::execute`] returns an [`ExecResult`]
//! - [`Connection::prepare`] creates a server-side [`PreparedStatement`]

mod client;
mod decode;
mod endpoint;
mod error;
mod options;
mod params;
mod rewrite;
mod row;
mod rows;
mod statement;
mod types;
mod value;
mod wire;

pub use client::{Connection, ERROR_BODY_LIMIT};
pub use endpoint::{query_service_url, QUERY_SERVICE_PATH};
pub use error::{N1qlError, ServerError, ServerErrors};
pub use options::{param, ConnectionOptions};
pub use params::Params;
pub use row::Row;
pub use rows::RowStream;
pub use statement::PreparedStatement;
pub use types::{ExecResult, Signature};
pub use value::Value;

pub type Result<T> = std::result::Result<T, N1qlError>;
