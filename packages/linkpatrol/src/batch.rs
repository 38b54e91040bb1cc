//! Batch verification over the stored graph, for scheduled runs.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::info;

use crate::checker::{CheckOptions, UrlChecker};
use crate::config::Config;
use crate::model::UrlType;
use crate::storage::LinkStore;

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// How many URLs to actually check, oldest-checked first; URLs that
    /// yield no verdict do not consume it. None is unlimited.
    pub limit: Option<i64>,
    pub check_internal: bool,
    pub check_external: bool,
    pub external_recheck_interval: i64,
}

impl BatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            limit: None,
            check_internal: true,
            check_external: true,
            external_recheck_interval: config.external_recheck_interval,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    /// URLs that received a definitive verdict.
    pub checked: u64,
    /// URLs skipped or intentionally unchecked (mailto, tel, toggled off,
    /// still inside the recheck interval).
    pub skipped: u64,
    pub broken: u64,
}

pub struct BatchRunner {
    store: Arc<dyn LinkStore>,
    checker: Arc<UrlChecker>,
}

impl BatchRunner {
    pub fn new(store: Arc<dyn LinkStore>, checker: Arc<UrlChecker>) -> Self {
        Self { store, checker }
    }

    pub async fn check_links(&self, options: &BatchOptions) -> Result<BatchReport> {
        let urls = self.store.list_urls(None).await?;
        info!(count = urls.len(), "batch check starting");

        let config = self.checker.config().clone();
        let mut report = BatchReport::default();
        let mut remaining = options.limit;

        for mut url in urls {
            if matches!(remaining, Some(r) if r <= 0) {
                break;
            }
            let external = url.url_type(&config) == UrlType::External;
            // Mirrors the checker's recheck short-circuit: a throttled URL
            // keeps its cached verdict without a request, so it consumes
            // neither the limit nor a pacing delay.
            let throttled = external
                && options.check_external
                && url.last_checked.is_some_and(|last| {
                    Utc::now() - last
                        < ChronoDuration::minutes(options.external_recheck_interval)
                });
            let opts = CheckOptions {
                check_internal: options.check_internal,
                check_external: options.check_external,
                external_recheck_interval: options.external_recheck_interval,
                self_anchors: None,
            };

            match self.checker.check_url(&mut url, &opts).await {
                Some(status) if !throttled => {
                    report.checked += 1;
                    if !status {
                        report.broken += 1;
                    }
                    if let Some(r) = &mut remaining {
                        *r -= 1;
                    }
                }
                _ => report.skipped += 1,
            }
            self.store.save_url(&url).await?;

            // Pace outbound requests when configured.
            if external && options.check_external && !throttled && !config.check_delay.is_zero()
            {
                tokio::time::sleep(config.check_delay).await;
            }
        }

        info!(
            checked = report.checked,
            skipped = report.skipped,
            broken = report.broken,
            "batch check finished"
        );
        Ok(report)
    }

    /// Clear every operator-set ignore flag.
    pub async fn unignore(&self) -> Result<u64> {
        let cleared = self.store.unignore_all().await?;
        info!(cleared, "cleared ignore flags");
        Ok(cleared)
    }
}
