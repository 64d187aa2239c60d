use std::sync::{OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rand::seq::SliceRandom;

use crate::{N1qlError, Result};

/// Path of the query REST endpoint on a query node.
pub const QUERY_SERVICE_PATH: &str = "/query/service";

const MAX_IDLE_PER_HOST: usize = 10;

/// Formats a node base URL into its query service endpoint.
///
/// Example: `"http://10.0.0.5:8093/"` → `"http://10.0.0.5:8093/query/service"`
pub fn query_service_url(node: &str) -> String {
    let trimmed = node.trim().trim_end_matches('/');
    if trimmed.ends_with(QUERY_SERVICE_PATH) {
        trimmed.to_owned()
    } else {
        format!("{trimmed}{QUERY_SERVICE_PATH}")
    }
}

/// Process-wide HTTP transport shared by every connection.
pub(crate) fn shared_http_client() -> reqwest::Client {
    static HTTP: OnceLock<reqwest::Client> = OnceLock::new();
    HTTP.get_or_init(|| {
        reqwest::Client::builder()
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    })
    .clone()
}

/// Query endpoints of one connection.
///
/// Selection takes the read lock, removal the write lock. The last
/// remaining endpoint is never removed.
#[derive(Debug)]
pub(crate) struct EndpointPool {
    endpoints: RwLock<Vec<String>>,
}

impl EndpointPool {
    pub(crate) fn new<I, S>(endpoints: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints = endpoints
            .into_iter()
            .map(|endpoint| endpoint.into().trim().to_owned())
            .collect::<Vec<_>>();
        if endpoints.is_empty() {
            return Err(N1qlError::Config("no query endpoints given".to_owned()));
        }
        if endpoints.iter().any(String::is_empty) {
            return Err(N1qlError::Config("query endpoint URL is empty".to_owned()));
        }
        Ok(Self {
            endpoints: RwLock::new(endpoints),
        })
    }

    /// Picks an endpoint uniformly at random.
    pub(crate) fn select(&self) -> Option<String> {
        self.read().choose(&mut rand::thread_rng()).cloned()
    }

    /// Removes a failed endpoint.
    ///
    /// Returns `false` when `endpoint` is the only one left, in which case
    /// nothing is removed and the caller has run out of endpoints. An
    /// endpoint already removed by a concurrent request counts as removed.
    pub(crate) fn remove(&self, endpoint: &str) -> bool {
        let mut endpoints = self.write();
        let Some(index) = endpoints.iter().position(|candidate| candidate == endpoint) else {
            return true;
        };
        if endpoints.len() == 1 {
            return false;
        }
        endpoints.remove(index);
        true
    }

    pub(crate) fn snapshot(&self) -> Vec<String> {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<String>> {
        self.endpoints.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<String>> {
        self.endpoints.write().unwrap_or_else(PoisonError::into_inner)
    }
}
