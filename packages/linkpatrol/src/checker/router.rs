//! Internal route dispatch seam.
//!
//! Internal links are verified by simulating a request against the host
//! application's own routing, not over the network. The host supplies the
//! implementation; tests use a table-backed one.

use anyhow::Result;
use async_trait::async_trait;

/// Outcome of a simulated internal request.
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub status: u16,
    /// Redirect target for 3xx responses.
    pub location: Option<String>,
    /// Rendered body, when the route produces one (needed for anchor checks).
    pub body: Option<String>,
}

impl RoutedResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            location: None,
            body: Some(body.into()),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            location: None,
            body: None,
        }
    }

    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        Self {
            status,
            location: Some(location.into()),
            body: None,
        }
    }
}

#[async_trait]
pub trait InternalRouter: Send + Sync {
    /// Dispatch a GET for a site-relative path (fragment already removed).
    async fn get(&self, path: &str) -> Result<RoutedResponse>;
}

/// Router for deployments with no internal dispatch wired up: every
/// internal path is reported missing.
pub struct NullRouter;

#[async_trait]
impl InternalRouter for NullRouter {
    async fn get(&self, _path: &str) -> Result<RoutedResponse> {
        Ok(RoutedResponse::not_found())
    }
}
