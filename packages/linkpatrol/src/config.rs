use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for extraction and verification.
///
/// Defaults follow the conventional values for a weekly external recheck
/// cycle. `from_env` reads `LINKPATROL_*` variables and falls back to these
/// defaults for anything unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Protocol+host prefixes that count as this site, e.g.
    /// `["http://example.org", "https://example.org"]`. URLs starting with
    /// one of these are stripped and treated as internal.
    pub site_domains: Vec<String>,
    /// URL prefix under which uploaded files are served, e.g. `/media/`.
    pub media_prefix: String,
    /// Local filesystem directory that `media_prefix` maps onto.
    pub media_root: PathBuf,
    /// URLs longer than this cannot be stored and are skipped.
    pub max_url_length: usize,
    /// Minimum minutes between two external checks of the same URL.
    pub external_recheck_interval: i64,
    /// Connection/read timeout for external requests.
    pub connect_timeout: Duration,
    /// When true (default), a reachable page with a missing `#fragment`
    /// still counts as a working link; when false the broken anchor fails
    /// the whole check.
    pub tolerate_broken_anchor: bool,
    /// User-Agent sent with external requests.
    pub user_agent: String,
    /// User-Agent retried on 403 responses (anti-bot mitigation).
    pub fallback_user_agent: String,
    /// Minimum delay between consecutive external checks in a batch run.
    pub check_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_domains: Vec::new(),
            media_prefix: "/media/".to_string(),
            media_root: PathBuf::from("media"),
            max_url_length: 255,
            external_recheck_interval: 10_080, // one week
            connect_timeout: Duration::from_secs(10),
            tolerate_broken_anchor: true,
            user_agent: "linkpatrol (+https://github.com/linkpatrol)".to_string(),
            fallback_user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                 AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            check_delay: Duration::from_millis(0),
        }
    }
}

impl Config {
    /// Build a config from `LINKPATROL_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(domains) = env::var("LINKPATROL_SITE_DOMAINS") {
            config.site_domains = domains
                .split(',')
                .map(|d| d.trim().trim_end_matches('/').to_string())
                .filter(|d| !d.is_empty())
                .collect();
        }
        if let Ok(prefix) = env::var("LINKPATROL_MEDIA_PREFIX") {
            config.media_prefix = prefix;
        }
        if let Ok(root) = env::var("LINKPATROL_MEDIA_ROOT") {
            config.media_root = PathBuf::from(root);
        }
        if let Ok(len) = env::var("LINKPATROL_MAX_URL_LENGTH") {
            if let Ok(len) = len.parse() {
                config.max_url_length = len;
            }
        }
        if let Ok(minutes) = env::var("LINKPATROL_RECHECK_INTERVAL_MINUTES") {
            if let Ok(minutes) = minutes.parse() {
                config.external_recheck_interval = minutes;
            }
        }
        if let Ok(secs) = env::var("LINKPATROL_TIMEOUT_SECONDS") {
            if let Ok(secs) = secs.parse() {
                config.connect_timeout = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = env::var("LINKPATROL_TOLERATE_BROKEN_ANCHOR") {
            config.tolerate_broken_anchor = v != "0" && v.to_lowercase() != "false";
        }
        if let Ok(ua) = env::var("LINKPATROL_USER_AGENT") {
            config.user_agent = ua;
        }
        if let Ok(ms) = env::var("LINKPATROL_CHECK_DELAY_MS") {
            if let Ok(ms) = ms.parse() {
                config.check_delay = Duration::from_millis(ms);
            }
        }

        config
    }

    /// Expand a bare domain list into the protocol/subdomain variants the
    /// internal-link stripper recognises.
    pub fn with_site_domain(mut self, domain: &str) -> Self {
        let root = domain
            .strip_prefix("www.")
            .or_else(|| domain.strip_prefix("test."))
            .unwrap_or(domain);
        for scheme in ["http", "https"] {
            for host in [root.to_string(), format!("www.{root}"), format!("test.{root}")] {
                self.site_domains.push(format!("{scheme}://{host}"));
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_url_length, 255);
        assert_eq!(config.external_recheck_interval, 10_080);
        assert!(config.tolerate_broken_anchor);
    }

    #[test]
    fn test_with_site_domain_expands_variants() {
        let config = Config::default().with_site_domain("www.example.org");
        assert!(config.site_domains.contains(&"http://example.org".to_string()));
        assert!(config.site_domains.contains(&"https://www.example.org".to_string()));
        assert!(config.site_domains.contains(&"http://test.example.org".to_string()));
        assert_eq!(config.site_domains.len(), 6);
    }
}
