use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde_json::json;

use crate::{N1qlError, Result};

/// Names of the query service request parameters this crate knows about.
///
/// Values are forwarded as-is; the service validates them.
pub mod param {
    pub const CREDS: &str = "creds";
    pub const TIMEOUT: &str = "timeout";
    pub const ENCODING: &str = "encoding";
    pub const COMPRESSION: &str = "compression";
    pub const SCAN_CONSISTENCY: &str = "scan_consistency";
    pub const SCAN_VECTOR: &str = "scan_vector";
    pub const SCAN_WAIT: &str = "scan_wait";
    pub const CLIENT_CONTEXT_ID: &str = "client_context_id";
}

/// Form fields owned by the request itself.
const RESERVED_KEYS: [&str; 3] = ["statement", "prepared", "args"];

/// Per-connection configuration.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Emit request-id/status/metrics/errors as pseudo-rows around the data rows.
    pub passthrough: bool,
    /// Transport-level deadline for each HTTP request. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    params: BTreeMap<String, String>,
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_passthrough(mut self, passthrough: bool) -> Self {
        self.passthrough = passthrough;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Adds a request parameter forwarded with every query.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        self.set_param(key, value)?;
        Ok(self)
    }

    /// Sets the `creds` parameter from `(user, password)` pairs.
    pub fn with_credentials<I, U, P>(mut self, credentials: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        let creds = credentials
            .into_iter()
            .map(|(user, pass)| json!({ "user": user.into(), "pass": pass.into() }))
            .collect::<Vec<_>>();
        self.params
            .insert(param::CREDS.to_owned(), serde_json::Value::Array(creds).to_string());
        self
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = validate_key(key.into())?;
        self.params.insert(key, value.into());
        Ok(())
    }

    pub fn unset_param(&mut self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(N1qlError::Config("parameter key not specified".to_owned()));
        }
        self.params.remove(key);
        Ok(())
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// All request parameters, sorted by key.
    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|(key, value)| {
                let shown = if key == param::CREDS {
                    "<redacted>"
                } else {
                    value.as_str()
                };
                (key.as_str(), shown)
            })
            .collect::<BTreeMap<_, _>>();
        f.debug_struct("ConnectionOptions")
            .field("passthrough", &self.passthrough)
            .field("request_timeout", &self.request_timeout)
            .field("params", &params)
            .finish()
    }
}

fn validate_key(key: String) -> Result<String> {
    if key.is_empty() {
        return Err(N1qlError::Config("parameter key not specified".to_owned()));
    }
    if RESERVED_KEYS.contains(&key.as_str()) {
        return Err(N1qlError::Config(format!(
            "'{key}' is set by the request and cannot be configured"
        )));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::{param, ConnectionOptions};
    use crate::N1qlError;

    #[test]
    fn params_round_trip() {
        let mut opts = ConnectionOptions::new()
            .with_param(param::SCAN_CONSISTENCY, "request_plus")
            .expect("valid key");
        assert_eq!(opts.param(param::SCAN_CONSISTENCY), Some("request_plus"));

        opts.unset_param(param::SCAN_CONSISTENCY).expect("valid key");
        assert_eq!(opts.param(param::SCAN_CONSISTENCY), None);
    }

    #[test]
    fn rejects_empty_and_reserved_keys() {
        let mut opts = ConnectionOptions::new();
        assert!(matches!(opts.set_param("", "x"), Err(N1qlError::Config(_))));
        assert!(matches!(opts.unset_param(""), Err(N1qlError::Config(_))));
        assert!(matches!(
            opts.set_param("statement", "DROP"),
            Err(N1qlError::Config(_))
        ));
    }

    #[test]
    fn credentials_are_a_json_array() {
        let opts = ConnectionOptions::new().with_credentials([("local:beer", "s3cret")]);
        assert_eq!(
            opts.param(param::CREDS),
            Some(r#"[{"pass":"s3cret","user":"local:beer"}]"#)
        );
    }

    #[test]
    fn debug_redacts_credentials() {
        let opts = ConnectionOptions::new()
            .with_credentials([("admin", "secret-password")])
            .with_param(param::TIMEOUT, "5s")
            .expect("valid key");
        let debug = format!("{opts:?}");
        assert!(debug.contains("<redacted>"));
        assert!(debug.contains("5s"));
        assert!(!debug.contains("secret-password"));
    }
}
