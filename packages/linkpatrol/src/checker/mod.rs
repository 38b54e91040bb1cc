//! The URL verification state machine.
//!
//! `UrlChecker` decides whether a URL is internal or external, dispatches
//! to the right verification path and records status, message and redirect
//! chain on the `Url` record. Expected failures (missing file, 404,
//! timeout, DNS failure) are absorbed here and recorded as values; nothing
//! propagates to callers under normal operation. Persistence is the
//! caller's job.

pub mod fetch;
pub mod router;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, info};

use crate::config::Config;
use crate::extract::{anchor_names_from_bytes, html_decode};
use crate::model::{strip_site_domain, Url};
use fetch::{FetchError, FetchMethod, FetchRequest, UrlFetcher};
use router::InternalRouter;

/// External redirect chains longer than this are reported as broken.
const MAX_REDIRECT_HOPS: usize = 5;

/// Per-check options. `self_anchors` carries the owning object's anchor
/// names when the URL is a hash link synthesized from that object's own
/// canonical address.
#[derive(Clone)]
pub struct CheckOptions<'a> {
    pub check_internal: bool,
    pub check_external: bool,
    /// Minimum minutes between two external checks of the same URL.
    pub external_recheck_interval: i64,
    pub self_anchors: Option<&'a HashSet<String>>,
}

impl<'a> CheckOptions<'a> {
    pub fn from_config(config: &Config) -> Self {
        Self {
            check_internal: true,
            check_external: true,
            external_recheck_interval: config.external_recheck_interval,
            self_anchors: None,
        }
    }

    pub fn with_self_anchors(mut self, anchors: &'a HashSet<String>) -> Self {
        self.self_anchors = Some(anchors);
        self
    }
}

/// Result of following an external request through its redirect chain.
struct FetchChain {
    first_status: u16,
    first_reason: Option<&'static str>,
    final_status: u16,
    final_url: String,
    hops: usize,
    body: Option<Vec<u8>>,
    user_agent: String,
}

pub struct UrlChecker {
    config: Config,
    fetcher: Arc<dyn UrlFetcher>,
    router: Arc<dyn InternalRouter>,
}

impl UrlChecker {
    pub fn new(
        config: Config,
        fetcher: Arc<dyn UrlFetcher>,
        router: Arc<dyn InternalRouter>,
    ) -> Self {
        Self {
            config,
            fetcher,
            router,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Verify one URL.
    ///
    /// Returns `Some(true)` if checked and valid, `Some(false)` if checked
    /// and invalid, `None` if the URL was not checked (either intentionally
    /// or because the matching toggle is off). When neither toggle applies
    /// the record is left untouched.
    pub async fn check_url(&self, url: &mut Url, opts: &CheckOptions<'_>) -> Option<bool> {
        let tested = strip_site_domain(&url.url, &self.config).to_string();
        let external = tested.starts_with("http://") || tested.starts_with("https://");

        if opts.check_internal && !external {
            self.check_internal(url, &tested, opts.self_anchors).await;
            url.status
        } else if opts.check_external && external {
            self.check_external(url, &tested, opts.external_recheck_interval)
                .await;
            url.status
        } else {
            None
        }
    }

    fn reset(url: &mut Url) {
        url.status = Some(false);
        url.status_code = None;
        url.redirect_status_code = None;
        url.anchor_status = None;
        url.ssl_status = None;
        url.message.clear();
        url.error_message.clear();
        url.redirect_to.clear();
    }

    /// Append a verdict to the message, capitalizing when it stands alone.
    fn append_message(url: &mut Url, note: &str) {
        if url.message.is_empty() {
            let mut chars = note.chars();
            url.message = match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            };
        } else {
            url.message.push_str(", ");
            url.message.push_str(note);
        }
    }

    // ------------------------------------------------------------------
    // Internal checks
    // ------------------------------------------------------------------

    pub async fn check_internal(
        &self,
        url: &mut Url,
        tested: &str,
        self_anchors: Option<&HashSet<String>>,
    ) {
        Self::reset(url);

        if tested.is_empty() {
            url.message = "Empty link".to_string();
        } else if tested.starts_with("mailto:") {
            url.status = None;
            url.message = "Email link (not automatically checked)".to_string();
        } else if tested.starts_with("tel:") {
            url.status = None;
            url.message = "Phone number link (not automatically checked)".to_string();
        } else if tested.starts_with('#') {
            match self_anchors {
                Some(names) => self.check_self_anchor(url, &tested[1..], names),
                None => {
                    url.status = None;
                    url.message =
                        "Link to within the same page (not automatically checked)".to_string();
                }
            }
        } else if tested.starts_with(&self.config.media_prefix) {
            self.check_file(url, tested).await;
        } else if let Some(names) = self_anchors {
            // Hash link synthesized from the owning object's own address:
            // verified against that object's anchors, no dispatch needed.
            let fragment = tested.split_once('#').map(|(_, f)| f).unwrap_or("");
            self.check_self_anchor(url, fragment, names);
        } else if tested.starts_with('/') {
            self.check_internal_route(url, tested).await;
        } else {
            url.message = "Invalid URL".to_string();
        }

        url.last_checked = Some(Utc::now());
    }

    /// Empty fragment (`#`) always passes.
    fn check_self_anchor(&self, url: &mut Url, fragment: &str, names: &HashSet<String>) {
        if fragment.is_empty() || names.contains(fragment) {
            url.status = Some(true);
            url.anchor_status = Some(true);
            url.message = "Working internal hash anchor".to_string();
        } else {
            url.status = Some(false);
            url.anchor_status = Some(false);
            url.message = "Broken internal hash anchor".to_string();
        }
    }

    async fn check_file(&self, url: &mut Url, tested: &str) {
        let unquoted = urlencoding::decode(tested)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| tested.to_string());
        let relative = unquoted
            .strip_prefix(&self.config.media_prefix)
            .unwrap_or(unquoted.as_str())
            .trim_start_matches('/');

        // The stored attribute may carry entity-encoded characters; accept
        // either spelling on disk.
        let path = self.config.media_root.join(relative);
        let entity_decoded = self.config.media_root.join(html_decode(relative));

        let exists = tokio::fs::try_exists(&path).await.unwrap_or(false)
            || tokio::fs::try_exists(&entity_decoded).await.unwrap_or(false);
        if exists {
            url.status = Some(true);
            url.message = "Working file link".to_string();
        } else {
            url.message = "Missing Document".to_string();
        }
    }

    async fn check_internal_route(&self, url: &mut Url, tested: &str) {
        let (path, fragment) = match tested.split_once('#') {
            Some((path, fragment)) => (path, Some(fragment)),
            None => (tested, None),
        };

        let first = match self.router.get(path).await {
            Ok(response) => response,
            Err(err) => {
                url.message = "Broken internal link".to_string();
                url.error_message = err.to_string();
                return;
            }
        };
        url.status_code = Some(i32::from(first.status));

        let mut body = first.body;
        if first.status < 300 {
            url.status = Some(true);
            url.message = "Working internal link".to_string();
        } else if (300..400).contains(&first.status) {
            body = self.follow_internal_redirect(url, first.status, first.location).await;
        } else {
            url.message = "Broken internal link".to_string();
        }

        if url.status == Some(true) {
            if let Some(fragment) = fragment {
                self.apply_anchor_check(url, fragment, body.as_deref().map(str::as_bytes), "internal");
            }
        }
    }

    /// Follow one internal redirect hop and classify the destination.
    /// Returns the destination body for a subsequent anchor check.
    async fn follow_internal_redirect(
        &self,
        url: &mut Url,
        status: u16,
        location: Option<String>,
    ) -> Option<String> {
        let permanence = if status == 301 || status == 308 {
            "permanent"
        } else {
            "temporary"
        };

        let Some(target) = location else {
            url.message = format!("Broken {permanence} redirect");
            url.error_message = "redirect response without a Location header".to_string();
            return None;
        };
        url.redirect_to = target.clone();

        let stripped = strip_site_domain(&target, &self.config).to_string();
        if !stripped.starts_with('/') {
            // Redirects out of the site; the target is not ours to dispatch.
            url.status = None;
            url.message =
                "This link redirects to an external URL (not automatically checked)".to_string();
            return None;
        }

        let target_path = stripped
            .split_once('#')
            .map(|(path, _)| path)
            .unwrap_or(stripped.as_str());
        match self.router.get(target_path).await {
            Ok(second) => {
                url.redirect_status_code = Some(i32::from(second.status));
                if second.status < 300 {
                    url.status = Some(true);
                    url.message = format!("Working {permanence} redirect");
                    second.body
                } else {
                    url.message = format!("Broken {permanence} redirect");
                    None
                }
            }
            Err(err) => {
                url.message = format!("Broken {permanence} redirect");
                url.error_message = err.to_string();
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // External checks
    // ------------------------------------------------------------------

    pub async fn check_external(&self, url: &mut Url, tested: &str, recheck_interval: i64) {
        if let Some(last) = url.last_checked {
            if Utc::now() - last < ChronoDuration::minutes(recheck_interval) {
                debug!(url = %url.url, "recheck interval not elapsed, keeping cached status");
                return;
            }
        }
        info!(url = %tested, "checking external link");

        let prior_last_checked = url.last_checked;
        Self::reset(url);

        let (base, fragment) = match tested.split_once('#') {
            Some((base, fragment)) => (base.to_string(), Some(fragment.to_string())),
            None => (tested.to_string(), None),
        };
        let https = base.starts_with("https://");
        let want_body = fragment.is_some();

        let mut insecure = false;
        let outcome = match self.fetch_chain(&base, insecure, want_body).await {
            Err(err) if https && err.may_be_certificate_failure() => {
                // Certificate validation failure? Confirmed if the request
                // goes through once verification is off.
                match self.fetch_chain(&base, true, want_body).await {
                    Ok(chain) => {
                        insecure = true;
                        Ok(chain)
                    }
                    Err(_) => Err(err),
                }
            }
            outcome => outcome,
        };

        match outcome {
            Ok(chain) => {
                url.status_code = Some(i32::from(chain.first_status));
                url.message = match chain.first_reason {
                    Some(reason) => format!("{} {reason}", chain.first_status),
                    None => chain.first_status.to_string(),
                };
                if chain.hops > 0 {
                    url.redirect_to = chain.final_url.clone();
                    url.redirect_status_code = Some(i32::from(chain.final_status));
                }
                url.status = Some(chain.final_status < 300);

                if https {
                    if insecure {
                        url.ssl_status = Some(false);
                        Self::append_message(url, "SSL certificate could not be verified");
                    } else {
                        url.ssl_status = Some(true);
                    }
                }

                if url.status == Some(true) {
                    if let Some(fragment) = &fragment {
                        let body = match chain.body {
                            Some(body) => Some(body),
                            None => {
                                self.fetch_body(&chain.final_url, &chain.user_agent, insecure)
                                    .await
                            }
                        };
                        self.apply_anchor_check(url, fragment, body.as_deref(), "external");
                    }
                }

                // 429 and 5xx are server-side transients: keep the prior
                // timestamp so the next run is not throttled away.
                if chain.final_status == 429 || chain.final_status >= 500 {
                    url.last_checked = prior_last_checked;
                } else {
                    url.last_checked = Some(Utc::now());
                }
            }
            Err(err) => {
                url.error_message = err.to_string();
                url.message = match &err {
                    FetchError::Timeout => "The read operation timed out".to_string(),
                    FetchError::Dns { host } => {
                        format!("Unreachable: DNS lookup failed for {host}")
                    }
                    FetchError::Connect { detail } => {
                        format!("Unreachable: connection failed ({detail})")
                    }
                    FetchError::InvalidUrl(_) => "Invalid URL".to_string(),
                    FetchError::Other(detail) => format!("Error: {detail}"),
                };
                url.last_checked = Some(Utc::now());
            }
        }
    }

    /// HEAD-first request ladder: GET retry on 400/405, fallback
    /// User-Agent retry on 403, redirects followed hop by hop.
    async fn fetch_chain(
        &self,
        start: &str,
        insecure: bool,
        want_body: bool,
    ) -> Result<FetchChain, FetchError> {
        let mut method = FetchMethod::Head;
        let mut user_agent = self.config.user_agent.clone();
        let mut tried_get = false;
        let mut used_fallback_agent = false;

        'ladder: loop {
            let mut current = start.to_string();
            let mut first: Option<(u16, Option<&'static str>)> = None;
            let mut hops = 0;

            loop {
                let mut request = FetchRequest::new(&current, method, &user_agent);
                request.verify_certificates = !insecure;
                request.want_body = want_body && method == FetchMethod::Get;

                let response = self.fetcher.fetch(&request).await?;
                if first.is_none() {
                    first = Some((response.status, response.reason));
                }

                match response.status {
                    400 | 405 if method == FetchMethod::Head && !tried_get => {
                        tried_get = true;
                        method = FetchMethod::Get;
                        continue 'ladder;
                    }
                    403 if !used_fallback_agent => {
                        used_fallback_agent = true;
                        user_agent = self.config.fallback_user_agent.clone();
                        continue 'ladder;
                    }
                    _ => {}
                }

                if response.is_redirect() && hops < MAX_REDIRECT_HOPS {
                    if let Some(location) = &response.location {
                        current = resolve_location(&current, location);
                        hops += 1;
                        continue;
                    }
                }

                let (first_status, first_reason) = first.unwrap_or((response.status, response.reason));
                return Ok(FetchChain {
                    first_status,
                    first_reason,
                    final_status: response.status,
                    final_url: current,
                    hops,
                    body: response.body,
                    user_agent,
                });
            }
        }
    }

    /// GET a body for the anchor sub-check. Failure here is not a link
    /// failure; the anchor just cannot be verified.
    async fn fetch_body(&self, url: &str, user_agent: &str, insecure: bool) -> Option<Vec<u8>> {
        let mut request = FetchRequest::new(url, FetchMethod::Get, user_agent);
        request.verify_certificates = !insecure;
        request.want_body = true;
        match self.fetcher.fetch(&request).await {
            Ok(response) if response.is_success() => response.body,
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Anchor sub-check (shared internal/external)
    // ------------------------------------------------------------------

    fn apply_anchor_check(&self, url: &mut Url, fragment: &str, body: Option<&[u8]>, scope: &str) {
        if fragment.is_empty() {
            url.anchor_status = Some(true);
            Self::append_message(url, &format!("working {scope} hash anchor"));
            return;
        }

        let Some(body) = body else {
            Self::append_message(url, "anchor could not be checked (no content)");
            if !self.config.tolerate_broken_anchor {
                url.status = Some(false);
            }
            return;
        };

        match anchor_names_from_bytes(body) {
            Ok(names) => {
                if names.contains(fragment) {
                    url.anchor_status = Some(true);
                    Self::append_message(url, &format!("working {scope} hash anchor"));
                } else {
                    url.anchor_status = Some(false);
                    Self::append_message(url, &format!("broken {scope} hash anchor"));
                    if !self.config.tolerate_broken_anchor {
                        url.status = Some(false);
                    }
                }
            }
            Err(err) => {
                Self::append_message(url, "anchor could not be checked (page could not be parsed)");
                url.error_message = err.to_string();
                if !self.config.tolerate_broken_anchor {
                    url.status = Some(false);
                }
            }
        }
    }
}

/// Resolve a Location header against the current URL; relative targets are
/// joined, absolute ones used as-is.
fn resolve_location(current: &str, location: &str) -> String {
    match url::Url::parse(current) {
        Ok(base) => base
            .join(location)
            .map(|joined| joined.to_string())
            .unwrap_or_else(|_| location.to_string()),
        Err(_) => location.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::fetch::FetchResponse;
    use super::router::{NullRouter, RoutedResponse};
    use super::*;
    use std::sync::Mutex;

    type FetchHandler =
        Box<dyn Fn(&FetchRequest) -> Result<FetchResponse, FetchError> + Send + Sync>;

    struct MockFetcher {
        handler: FetchHandler,
        calls: Mutex<Vec<FetchRequest>>,
    }

    impl MockFetcher {
        fn new(
            handler: impl Fn(&FetchRequest) -> Result<FetchResponse, FetchError>
                + Send
                + Sync
                + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                handler: Box::new(handler),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn calls(&self) -> Vec<FetchRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl UrlFetcher for MockFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
            self.calls.lock().unwrap().push(request.clone());
            (self.handler)(request)
        }
    }

    struct MockRouter {
        routes: std::collections::HashMap<String, RoutedResponse>,
    }

    impl MockRouter {
        fn new(routes: Vec<(&str, RoutedResponse)>) -> Arc<Self> {
            Arc::new(Self {
                routes: routes
                    .into_iter()
                    .map(|(path, response)| (path.to_string(), response))
                    .collect(),
            })
        }
    }

    #[async_trait::async_trait]
    impl InternalRouter for MockRouter {
        async fn get(&self, path: &str) -> anyhow::Result<RoutedResponse> {
            Ok(self
                .routes
                .get(path)
                .cloned()
                .unwrap_or_else(RoutedResponse::not_found))
        }
    }

    fn ok(status: u16) -> FetchResponse {
        FetchResponse {
            status,
            reason: reqwest::StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason()),
            location: None,
            body: None,
        }
    }

    fn checker_with_fetcher(fetcher: Arc<MockFetcher>) -> UrlChecker {
        UrlChecker::new(Config::default(), fetcher, Arc::new(NullRouter))
    }

    fn checker_with_router(router: Arc<MockRouter>) -> UrlChecker {
        let fetcher = MockFetcher::new(|_| Err(FetchError::Other("no network in test".into())));
        UrlChecker::new(Config::default(), fetcher, router)
    }

    #[tokio::test]
    async fn test_empty_link() {
        let checker = checker_with_router(MockRouter::new(vec![]));
        let mut url = Url::new("");
        let status = checker
            .check_url(&mut url, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(status, Some(false));
        assert_eq!(url.message, "Empty link");
        assert!(url.last_checked.is_some());
    }

    #[tokio::test]
    async fn test_mailto_not_checked() {
        let checker = checker_with_router(MockRouter::new(vec![]));
        let mut url = Url::new("mailto:nobody");
        let status = checker
            .check_url(&mut url, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(status, None);
        assert_eq!(url.message, "Email link (not automatically checked)");
        // Stamped so "known skippable" differs from "never examined".
        assert!(url.last_checked.is_some());
    }

    #[tokio::test]
    async fn test_phone_not_checked() {
        let checker = checker_with_router(MockRouter::new(vec![]));
        let mut url = Url::new("tel:+1-555-0100");
        let status = checker
            .check_url(&mut url, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(status, None);
        assert_eq!(url.message, "Phone number link (not automatically checked)");
    }

    #[tokio::test]
    async fn test_file_link() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.pdf"), b"pdf").unwrap();

        let mut config = Config::default();
        config.media_root = dir.path().to_path_buf();
        let fetcher = MockFetcher::new(|_| Err(FetchError::Other("no network".into())));
        let checker = UrlChecker::new(config, fetcher, Arc::new(NullRouter));

        let mut present = Url::new("/media/report.pdf");
        checker
            .check_url(&mut present, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(present.status, Some(true));
        assert_eq!(present.message, "Working file link");

        let mut missing = Url::new("/media/gone.pdf");
        checker
            .check_url(&mut missing, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(missing.status, Some(false));
        assert_eq!(missing.message, "Missing Document");
    }

    #[tokio::test]
    async fn test_file_link_percent_encoded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("annual report.pdf"), b"pdf").unwrap();

        let mut config = Config::default();
        config.media_root = dir.path().to_path_buf();
        let fetcher = MockFetcher::new(|_| Err(FetchError::Other("no network".into())));
        let checker = UrlChecker::new(config, fetcher, Arc::new(NullRouter));

        let mut url = Url::new("/media/annual%20report.pdf");
        checker
            .check_url(&mut url, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(url.status, Some(true));
    }

    #[tokio::test]
    async fn test_internal_route_ok_and_broken() {
        let router = MockRouter::new(vec![("/about/", RoutedResponse::ok("<h1>About</h1>"))]);
        let checker = checker_with_router(router);

        let mut good = Url::new("/about/");
        checker
            .check_url(&mut good, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(good.status, Some(true));
        assert_eq!(good.message, "Working internal link");
        assert_eq!(good.status_code, Some(200));

        let mut bad = Url::new("/missing/");
        checker
            .check_url(&mut bad, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(bad.status, Some(false));
        assert_eq!(bad.message, "Broken internal link");
        assert_eq!(bad.status_code, Some(404));
    }

    #[tokio::test]
    async fn test_internal_redirect_followed_once() {
        let router = MockRouter::new(vec![
            ("/old/", RoutedResponse::redirect(301, "/new/")),
            ("/new/", RoutedResponse::ok("moved here")),
            ("/loop/", RoutedResponse::redirect(302, "/gone/")),
        ]);
        let checker = checker_with_router(router);

        let mut url = Url::new("/old/");
        checker
            .check_url(&mut url, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(url.status, Some(true));
        assert_eq!(url.message, "Working permanent redirect");
        assert_eq!(url.status_code, Some(301));
        assert_eq!(url.redirect_status_code, Some(200));
        assert_eq!(url.redirect_to, "/new/");

        let mut broken = Url::new("/loop/");
        checker
            .check_url(&mut broken, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(broken.status, Some(false));
        assert_eq!(broken.message, "Broken temporary redirect");
        assert_eq!(broken.redirect_status_code, Some(404));
    }

    #[tokio::test]
    async fn test_internal_anchor_check() {
        let router = MockRouter::new(vec![(
            "/docs/",
            RoutedResponse::ok(r#"<h2 id="install">Install</h2>"#),
        )]);
        let checker = checker_with_router(router);

        let mut found = Url::new("/docs/#install");
        checker
            .check_url(&mut found, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(found.status, Some(true));
        assert_eq!(found.anchor_status, Some(true));

        let mut missing = Url::new("/docs/#setup");
        checker
            .check_url(&mut missing, &CheckOptions::from_config(checker.config()))
            .await;
        // Tolerant by default: page works, anchor flagged.
        assert_eq!(missing.status, Some(true));
        assert_eq!(missing.anchor_status, Some(false));
    }

    #[tokio::test]
    async fn test_self_anchor_with_context() {
        let checker = checker_with_router(MockRouter::new(vec![]));
        let anchors: HashSet<String> = ["team".to_string()].into_iter().collect();
        let opts = CheckOptions::from_config(checker.config()).with_self_anchors(&anchors);

        let mut found = Url::new("/about/#team");
        checker.check_url(&mut found, &opts).await;
        assert_eq!(found.status, Some(true));
        assert_eq!(found.message, "Working internal hash anchor");

        let mut missing = Url::new("/about/#board");
        checker.check_url(&mut missing, &opts).await;
        assert_eq!(missing.status, Some(false));
        assert_eq!(missing.message, "Broken internal hash anchor");

        // Bare '#' always passes.
        let mut bare = Url::new("/about/#");
        checker.check_url(&mut bare, &opts).await;
        assert_eq!(bare.status, Some(true));
    }

    #[tokio::test]
    async fn test_bare_anchor_without_context() {
        let checker = checker_with_router(MockRouter::new(vec![]));
        let mut url = Url::new("#section");
        let status = checker
            .check_url(&mut url, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(status, None);
        assert_eq!(
            url.message,
            "Link to within the same page (not automatically checked)"
        );
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let checker = checker_with_router(MockRouter::new(vec![]));
        let mut url = Url::new("not a url");
        checker
            .check_url(&mut url, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(url.status, Some(false));
        assert_eq!(url.message, "Invalid URL");
    }

    #[tokio::test]
    async fn test_external_success_records_ssl() {
        let fetcher = MockFetcher::new(|_| Ok(ok(200)));
        let checker = checker_with_fetcher(fetcher);
        let mut url = Url::new("https://example.org/page");
        let status = checker
            .check_url(&mut url, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(status, Some(true));
        assert_eq!(url.message, "200 OK");
        assert_eq!(url.status_code, Some(200));
        assert_eq!(url.ssl_status, Some(true));
        assert!(url.last_checked.is_some());
    }

    #[tokio::test]
    async fn test_recheck_interval_throttles() {
        let fetcher = MockFetcher::new(|_| Ok(ok(200)));
        let checker = checker_with_fetcher(fetcher.clone());
        let opts = CheckOptions::from_config(checker.config());
        let mut url = Url::new("http://example.org/");

        checker.check_url(&mut url, &opts).await;
        assert_eq!(fetcher.call_count(), 1);

        // Second call inside the interval: cached status, no request.
        let status = checker.check_url(&mut url, &opts).await;
        assert_eq!(status, Some(true));
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_keeps_last_checked() {
        let fetcher = MockFetcher::new(|_| Ok(ok(429)));
        let checker = checker_with_fetcher(fetcher.clone());
        let opts = CheckOptions::from_config(checker.config());
        let mut url = Url::new("http://example.org/busy");

        let status = checker.check_url(&mut url, &opts).await;
        assert_eq!(status, Some(false));
        // Previously unchecked: stays unchecked so the next run retries.
        assert!(url.last_checked.is_none());

        checker.check_url(&mut url, &opts).await;
        assert_eq!(fetcher.call_count(), 2);
    }

    #[tokio::test]
    async fn test_server_error_keeps_last_checked() {
        let fetcher = MockFetcher::new(|_| Ok(ok(503)));
        let checker = checker_with_fetcher(fetcher);
        let mut url = Url::new("http://example.org/down");
        checker
            .check_url(&mut url, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(url.status, Some(false));
        assert!(url.last_checked.is_none());
    }

    #[tokio::test]
    async fn test_external_redirect_chain_captured() {
        let fetcher = MockFetcher::new(|request| {
            if request.url == "http://example.org/old" {
                Ok(FetchResponse {
                    status: 301,
                    reason: Some("Moved Permanently"),
                    location: Some("http://example.org/new".to_string()),
                    body: None,
                })
            } else {
                Ok(ok(200))
            }
        });
        let checker = checker_with_fetcher(fetcher);
        let mut url = Url::new("http://example.org/old");
        checker
            .check_url(&mut url, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(url.status, Some(true));
        // Original status is the primary verdict.
        assert_eq!(url.message, "301 Moved Permanently");
        assert_eq!(url.status_code, Some(301));
        assert_eq!(url.redirect_status_code, Some(200));
        assert_eq!(url.redirect_to, "http://example.org/new");
    }

    #[tokio::test]
    async fn test_method_not_allowed_retries_with_get() {
        let fetcher = MockFetcher::new(|request| match request.method {
            FetchMethod::Head => Ok(ok(405)),
            FetchMethod::Get => Ok(ok(200)),
        });
        let checker = checker_with_fetcher(fetcher.clone());
        let mut url = Url::new("http://example.org/strict");
        checker
            .check_url(&mut url, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(url.status, Some(true));
        let methods: Vec<FetchMethod> = fetcher.calls().iter().map(|c| c.method).collect();
        assert_eq!(methods, vec![FetchMethod::Head, FetchMethod::Get]);
    }

    #[tokio::test]
    async fn test_forbidden_retries_with_fallback_agent() {
        let default_agent = Config::default().user_agent;
        let fetcher = MockFetcher::new(move |request| {
            if request.user_agent == default_agent {
                Ok(ok(403))
            } else {
                Ok(ok(200))
            }
        });
        let checker = checker_with_fetcher(fetcher.clone());
        let mut url = Url::new("http://example.org/guarded");
        checker
            .check_url(&mut url, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(url.status, Some(true));
        assert_eq!(fetcher.call_count(), 2);
    }

    #[tokio::test]
    async fn test_anchor_tolerance_modes() {
        let page = r#"<h2 id="other">Other</h2>"#;
        let handler = move |request: &FetchRequest| {
            Ok(FetchResponse {
                status: 200,
                reason: Some("OK"),
                location: None,
                body: request.want_body.then(|| page.as_bytes().to_vec()),
            })
        };

        // Tolerant (default): reachable page, broken anchor flagged only.
        let checker = checker_with_fetcher(MockFetcher::new(handler));
        let mut url = Url::new("http://example.org/page#missing");
        checker
            .check_url(&mut url, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(url.status, Some(true));
        assert_eq!(url.anchor_status, Some(false));

        // Strict: the broken anchor fails the whole check.
        let mut config = Config::default();
        config.tolerate_broken_anchor = false;
        let checker = UrlChecker::new(config, MockFetcher::new(handler), Arc::new(NullRouter));
        let mut url = Url::new("http://example.org/page#missing");
        checker
            .check_url(&mut url, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(url.status, Some(false));
        assert_eq!(url.anchor_status, Some(false));
    }

    #[tokio::test]
    async fn test_anchor_unparseable_body() {
        let handler = |request: &FetchRequest| {
            Ok(FetchResponse {
                status: 200,
                reason: Some("OK"),
                location: None,
                body: request.want_body.then(|| vec![0xff, 0xfe, 0x01]),
            })
        };
        let checker = checker_with_fetcher(MockFetcher::new(handler));
        let mut url = Url::new("http://example.org/binary#frag");
        checker
            .check_url(&mut url, &CheckOptions::from_config(checker.config()))
            .await;
        // Tolerant default: status unaffected, anchor left unverified.
        assert_eq!(url.status, Some(true));
        assert_eq!(url.anchor_status, None);
        assert!(url.message.contains("anchor could not be checked"));
    }

    #[tokio::test]
    async fn test_certificate_failure_retried_insecure() {
        let fetcher = MockFetcher::new(|request| {
            if request.verify_certificates {
                Err(FetchError::Connect {
                    detail: "connection error".to_string(),
                })
            } else {
                Ok(ok(200))
            }
        });
        let checker = checker_with_fetcher(fetcher);
        let mut url = Url::new("https://selfsigned.example.org/");
        checker
            .check_url(&mut url, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(url.status, Some(true));
        assert_eq!(url.ssl_status, Some(false));
        assert!(url.message.contains("SSL certificate could not be verified"));
    }

    #[tokio::test]
    async fn test_timeout_message() {
        let fetcher = MockFetcher::new(|_| Err(FetchError::Timeout));
        let checker = checker_with_fetcher(fetcher);
        let mut url = Url::new("http://example.org/slow");
        checker
            .check_url(&mut url, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(url.status, Some(false));
        assert_eq!(url.message, "The read operation timed out");
        assert!(url.last_checked.is_some());
    }

    #[tokio::test]
    async fn test_dns_failure_message() {
        let fetcher = MockFetcher::new(|_| {
            Err(FetchError::Dns {
                host: "no-such-host.example".to_string(),
            })
        });
        let checker = checker_with_fetcher(fetcher);
        let mut url = Url::new("http://no-such-host.example/");
        checker
            .check_url(&mut url, &CheckOptions::from_config(checker.config()))
            .await;
        assert_eq!(url.status, Some(false));
        assert!(url.message.contains("DNS lookup failed"));
        assert!(url.last_checked.is_some());
    }

    #[tokio::test]
    async fn test_toggles_skip_checks() {
        let fetcher = MockFetcher::new(|_| Ok(ok(200)));
        let checker = checker_with_fetcher(fetcher.clone());
        let mut opts = CheckOptions::from_config(checker.config());
        opts.check_external = false;

        let mut url = Url::new("http://example.org/");
        let status = checker.check_url(&mut url, &opts).await;
        assert_eq!(status, None);
        assert_eq!(fetcher.call_count(), 0);
        assert!(url.last_checked.is_none());
    }
}
