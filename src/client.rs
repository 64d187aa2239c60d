use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use reqwest::StatusCode;

use crate::{
    decode::{decode_exec_result, decode_prepared, decode_query_response},
    endpoint::{shared_http_client, EndpointPool},
    rewrite::{bind_statement, prepare_query},
    wire::{QueryRequest, QueryResponse},
    ConnectionOptions, ExecResult, N1qlError, Params, PreparedStatement, Result, RowStream,
};

/// Upper bound on the error body kept from a non-200 response.
pub const ERROR_BODY_LIMIT: usize = 512;

const PING_STATEMENT: &str = "SELECT 1";

/// Connection to one or more query service endpoints.
///
/// Cloning is cheap; clones share the endpoint pool and options.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    pool: EndpointPool,
    options: RwLock<ConnectionOptions>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoints", &self.inner.pool.snapshot())
            .field("options", &self.options())
            .finish()
    }
}

impl Connection {
    /// Creates a connection over the given query endpoint URLs without
    /// contacting them.
    pub fn new<I, S>(endpoints: I, options: ConnectionOptions) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            inner: Arc::new(Inner {
                http: shared_http_client(),
                pool: EndpointPool::new(endpoints)?,
                options: RwLock::new(options),
            }),
        })
    }

    /// Creates a connection and checks that a query node answers.
    pub async fn open<I, S>(endpoints: I, options: ConnectionOptions) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let conn = Self::new(endpoints, options)?;
        conn.ping().await?;
        Ok(conn)
    }

    /// Runs `SELECT 1`.
    pub async fn ping(&self) -> Result<()> {
        let response = self.fetch(QueryRequest::statement(PING_STATEMENT)).await?;
        match response.server_errors() {
            Some(errors) => Err(N1qlError::query(errors)),
            None => Ok(()),
        }
    }

    /// Endpoints still considered reachable.
    pub fn endpoints(&self) -> Vec<String> {
        self.inner.pool.snapshot()
    }

    /// Snapshot of the current options.
    pub fn options(&self) -> ConnectionOptions {
        self.inner
            .options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sets a request parameter for this connection only.
    pub fn set_query_param(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.options_mut().set_param(key, value)
    }

    /// Removes a request parameter for this connection only.
    pub fn unset_query_param(&self, key: &str) -> Result<()> {
        self.options_mut().unset_param(key)
    }

    /// Switches passthrough mode for this connection only.
    pub fn set_passthrough(&self, passthrough: bool) {
        self.options_mut().passthrough = passthrough;
    }

    /// Executes a statement and streams its rows.
    ///
    /// `?` placeholders are numbered and positional arguments substituted
    /// into the statement text.
    pub async fn query<P: Into<Params>>(&self, statement: &str, params: P) -> Result<RowStream> {
        let (statement, rest) = bind_statement(statement, params.into())?;
        let request = QueryRequest::statement(statement).with_params(rest)?;
        self.run_query(request).await
    }

    /// Executes a statement that returns no rows.
    pub async fn execute<P: Into<Params>>(&self, statement: &str, params: P) -> Result<ExecResult> {
        let (statement, rest) = bind_statement(statement, params.into())?;
        let request = QueryRequest::statement(statement).with_params(rest)?;
        self.run_exec(request).await
    }

    /// Prepares a statement on the server.
    pub async fn prepare(&self, statement: &str) -> Result<PreparedStatement> {
        let (statement, arg_count) = prepare_query(&format!("PREPARE {statement}"));
        let response = self.fetch(QueryRequest::statement(statement)).await?;
        let plan = decode_prepared(response)?;
        Ok(PreparedStatement::new(self.clone(), plan, arg_count))
    }

    /// Closes the connection. The shared HTTP transport stays open.
    pub fn close(self) {}

    pub(crate) async fn run_query(&self, request: QueryRequest) -> Result<RowStream> {
        let passthrough = self.options().passthrough;
        let response = self.fetch(request).await?;
        let parts = decode_query_response(response, passthrough)?;
        Ok(RowStream::spawn(parts))
    }

    pub(crate) async fn run_exec(&self, request: QueryRequest) -> Result<ExecResult> {
        let response = self.fetch(request).await?;
        decode_exec_result(response)
    }

    async fn fetch(&self, request: QueryRequest) -> Result<QueryResponse> {
        let response = self.dispatch(request).await?;
        let status = response.status();

        if status != StatusCode::OK {
            let body = read_truncated(response, ERROR_BODY_LIMIT).await?;
            return Err(N1qlError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await.map_err(N1qlError::Transport)?;
        serde_json::from_slice::<QueryResponse>(&body)
            .map_err(|err| N1qlError::Decode(format!("invalid query response JSON: {err}")))
    }

    /// Sends the request to a random endpoint, dropping endpoints that fail
    /// at the transport level until one answers or none is left.
    async fn dispatch(&self, request: QueryRequest) -> Result<reqwest::Response> {
        let options = self.options();
        let form = request.into_form(&options);

        loop {
            let endpoint = self
                .inner
                .pool
                .select()
                .ok_or_else(|| N1qlError::Config("endpoint pool is empty".to_owned()))?;

            let mut builder = self.inner.http.post(&endpoint).form(&form);
            if let Some(timeout) = options.request_timeout {
                builder = builder.timeout(timeout);
            }

            match builder.send().await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if !self.inner.pool.remove(&endpoint) {
                        return Err(N1qlError::NoRespondingNodes { source: err });
                    }

                    #[cfg(feature = "tracing")]
                    tracing::warn!("removed query endpoint {} after error: {}", endpoint, err);
                }
            }
        }
    }

    fn options_mut(&self) -> RwLockWriteGuard<'_, ConnectionOptions> {
        self.inner
            .options
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn read_truncated(mut response: reqwest::Response, limit: usize) -> Result<String> {
    let mut body = Vec::new();
    while body.len() < limit {
        match response.chunk().await.map_err(N1qlError::Transport)? {
            Some(chunk) => body.extend_from_slice(&chunk),
            None => break,
        }
    }
    body.truncate(limit);
    Ok(String::from_utf8_lossy(&body).into_owned())
}

#[cfg(test)]
mod tests {
    use super::Connection;
    use crate::{options::param, ConnectionOptions, N1qlError};

    #[test]
    fn new_rejects_empty_endpoint_list() {
        let err = Connection::new(Vec::<String>::new(), ConnectionOptions::new())
            .expect_err("must fail");
        assert!(matches!(err, N1qlError::Config(_)));
    }

    #[test]
    fn runtime_params_are_scoped_to_the_connection() {
        let first = Connection::new(["http://a/query/service"], ConnectionOptions::new())
            .expect("valid connection");
        let second = Connection::new(["http://b/query/service"], ConnectionOptions::new())
            .expect("valid connection");

        first
            .set_query_param(param::SCAN_CONSISTENCY, "request_plus")
            .expect("valid key");
        first.set_passthrough(true);

        assert_eq!(
            first.options().param(param::SCAN_CONSISTENCY),
            Some("request_plus")
        );
        assert!(first.options().passthrough);
        assert_eq!(second.options().param(param::SCAN_CONSISTENCY), None);
        assert!(!second.options().passthrough);

        first
            .unset_query_param(param::SCAN_CONSISTENCY)
            .expect("valid key");
        assert_eq!(first.options().param(param::SCAN_CONSISTENCY), None);
    }

    #[test]
    fn debug_redacts_credentials() {
        let conn = Connection::new(
            ["http://a/query/service"],
            ConnectionOptions::new().with_credentials([("admin", "secret-password")]),
        )
        .expect("valid connection");
        let debug = format!("{conn:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-password"));
    }
}
