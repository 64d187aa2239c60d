use serde::Deserialize;
use serde_json::{value::RawValue, Value as JsonValue};

use crate::{
    rewrite::{build_positional_arg_list, encode_arg},
    ConnectionOptions, N1qlError, Params, Result, ServerErrors,
};

#[derive(Debug, Clone, PartialEq)]
enum Target {
    Statement(String),
    Prepared(String),
}

/// One query service request, flattened to form fields by [`QueryRequest::into_form`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct QueryRequest {
    target: Target,
    args: Option<String>,
    named_args: Vec<(String, String)>,
}

impl QueryRequest {
    pub(crate) fn statement(text: impl Into<String>) -> Self {
        Self::new(Target::Statement(text.into()))
    }

    /// References a server-side plan by name. The name travels as a JSON string.
    pub(crate) fn named_plan(name: &str) -> Result<Self> {
        let quoted = serde_json::to_string(name)
            .map_err(|err| N1qlError::InvalidArgument(format!("invalid plan name: {err}")))?;
        Ok(Self::new(Target::Prepared(quoted)))
    }

    /// Sends the full serialized plan.
    pub(crate) fn plan(plan: impl Into<String>) -> Self {
        Self::new(Target::Prepared(plan.into()))
    }

    fn new(target: Target) -> Self {
        Self {
            target,
            args: None,
            named_args: Vec::new(),
        }
    }

    /// Attaches bind parameters: positional values as the `args` JSON array,
    /// named values as `$name` fields.
    pub(crate) fn with_params(mut self, params: Params) -> Result<Self> {
        match params {
            Params::Positional(values) => {
                self.args = build_positional_arg_list(&values)?;
            }
            Params::Named(pairs) => {
                self.named_args = pairs
                    .into_iter()
                    .map(|(name, value)| {
                        let name = normalize_named_parameter_name(&name)?;
                        Ok((name, encode_arg(&value)?))
                    })
                    .collect::<Result<Vec<_>>>()?;
            }
        }
        Ok(self)
    }

    pub(crate) fn into_form(self, options: &ConnectionOptions) -> Vec<(String, String)> {
        let mut form = Vec::with_capacity(2 + self.named_args.len());
        match self.target {
            Target::Statement(text) => form.push(("statement".to_owned(), text)),
            Target::Prepared(plan) => form.push(("prepared".to_owned(), plan)),
        }
        if let Some(args) = self.args {
            form.push(("args".to_owned(), args));
        }
        form.extend(self.named_args);
        form.extend(
            options
                .params()
                .map(|(key, value)| (key.to_owned(), value.to_owned())),
        );
        form
    }
}

fn normalize_named_parameter_name(name: &str) -> Result<String> {
    let normalized = name.trim_start_matches('$');
    if normalized.is_empty() {
        return Err(N1qlError::InvalidArgument(
            "named parameter name cannot be empty".to_owned(),
        ));
    }
    Ok(format!("${normalized}"))
}

/// Top-level response object of the query service.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct QueryResponse {
    #[serde(rename = "requestID", default)]
    pub request_id: Option<JsonValue>,
    #[serde(default)]
    pub signature: Option<JsonValue>,
    #[serde(default)]
    pub results: Option<Box<RawValue>>,
    #[serde(default)]
    pub errors: Option<Vec<JsonValue>>,
    #[serde(default)]
    pub status: Option<JsonValue>,
    #[serde(default)]
    pub metrics: Option<JsonValue>,
}

impl QueryResponse {
    /// Aggregated `errors`, `None` when the field is absent or empty.
    pub(crate) fn server_errors(&self) -> Option<ServerErrors> {
        self.errors
            .as_deref()
            .filter(|errors| !errors.is_empty())
            .map(ServerErrors::from_json)
    }
}
