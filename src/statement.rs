use std::fmt;
use std::future::Future;

use crate::{
    decode::PreparedPlan, wire::QueryRequest, Connection, ExecResult, N1qlError, Params, Result,
    RowStream, Signature,
};

/// A server-side query plan created by [`Connection::prepare`].
///
/// Executions reference the plan by name when the server assigned one, and
/// fall back to the full plan body once if the named plan is rejected.
pub struct PreparedStatement {
    conn: Connection,
    plan: Option<String>,
    name: Option<String>,
    arg_count: usize,
    signature: Signature,
}

impl fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("name", &self.name)
            .field("arg_count", &self.arg_count)
            .field("signature", &self.signature)
            .field("closed", &self.plan.is_none())
            .finish()
    }
}

impl PreparedStatement {
    pub(crate) fn new(conn: Connection, plan: PreparedPlan, arg_count: usize) -> Self {
        Self {
            conn,
            plan: Some(plan.plan),
            name: plan.name,
            arg_count,
            signature: plan.signature,
        }
    }

    /// Number of `?` placeholders in the prepared text.
    pub fn num_input(&self) -> usize {
        self.arg_count
    }

    /// Server-assigned plan name, cleared after a failed named execution.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Serialized plan, `None` once closed.
    pub fn plan(&self) -> Option<&str> {
        self.plan.as_deref()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn columns(&self) -> Vec<String> {
        self.signature.columns()
    }

    /// Executes the plan and streams its rows.
    pub async fn query<P: Into<Params>>(&mut self, params: P) -> Result<RowStream> {
        self.run(params.into(), |conn, request| async move {
            conn.run_query(request).await
        })
        .await
    }

    /// Executes the plan for its side effects.
    pub async fn execute<P: Into<Params>>(&mut self, params: P) -> Result<ExecResult> {
        self.run(params.into(), |conn, request| async move {
            conn.run_exec(request).await
        })
        .await
    }

    /// Drops the plan. Later executions fail with [`N1qlError::StatementNotFound`].
    pub fn close(&mut self) {
        self.plan = None;
        self.name = None;
        self.arg_count = 0;
        self.signature = Signature::Null;
    }

    async fn run<T, F, Fut>(&mut self, params: Params, mut send: F) -> Result<T>
    where
        F: FnMut(Connection, QueryRequest) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let plan = self.plan.clone().ok_or(N1qlError::StatementNotFound)?;

        let supplied = params.positional_len();
        if supplied < self.arg_count {
            return Err(N1qlError::InsufficientArgs {
                expected: self.arg_count,
                got: supplied,
            });
        }

        // At most two attempts: by name, then by full plan after clearing the name.
        loop {
            let by_name = self.name.is_some();
            let target = match &self.name {
                Some(name) => QueryRequest::named_plan(name)?,
                None => QueryRequest::plan(plan.clone()),
            };
            let request = target.with_params(params.clone())?;

            match send(self.conn.clone(), request).await {
                Err(_err) if by_name => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("named plan rejected, retrying with full plan: {}", _err);
                    self.name = None;
                }
                other => return other,
            }
        }
    }
}
