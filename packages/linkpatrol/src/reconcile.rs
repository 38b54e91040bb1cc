//! Reconciliation between source objects and the stored Url/Link graph.
//!
//! Extraction walks an object's fields in document order and produces one
//! occurrence per link; reconciliation then makes the stored graph match
//! exactly what extraction found, creating what is missing and deleting
//! what is stale. Running it twice over unchanged content is a no-op.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::config::Config;
use crate::extract::{extract_anchor_names, extract_images, extract_links};
use crate::model::{Link, LinkId, SourceRef, Url, UrlId};
use crate::registry::{SourceObject, SourceRegistry};
use crate::storage::LinkStore;

/// One link occurrence found in a source object's fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOccurrence {
    pub field: String,
    pub text: String,
    pub url: String,
    /// True when the URL was synthesized from a bare `#fragment` against
    /// the object's own canonical address.
    pub self_anchor: bool,
}

/// A Url that needs (re)verification after reconciling one object, with
/// the object's own anchors attached when the check is a self-anchor one.
pub struct CheckTarget {
    pub url: Url,
    pub self_anchors: Option<HashSet<String>>,
}

/// Outcome of reconciling one object.
#[derive(Default)]
pub struct ObjectSync {
    pub urls_created: u64,
    pub links_created: u64,
    pub links_deleted: u64,
    pub kept_link_ids: Vec<LinkId>,
    pub targets: Vec<CheckTarget>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub created: u64,
    pub deleted: u64,
    pub unchanged: u64,
}

/// Outcome of a full sweep over every registered source.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub urls: Counts,
    pub links: Counts,
}

pub struct Reconciler {
    store: Arc<dyn LinkStore>,
    config: Config,
}

impl Reconciler {
    pub fn new(store: Arc<dyn LinkStore>, config: Config) -> Self {
        Self { store, config }
    }

    /// All link occurrences in one object, in field order and document
    /// order within each field. Occurrences longer than the configured
    /// maximum are skipped with a warning.
    pub fn extract_occurrences(&self, object: &SourceObject) -> Vec<LinkOccurrence> {
        let mut occurrences = Vec::new();

        for field in &object.html_fields {
            for (text, href) in extract_links(&field.html) {
                self.push_occurrence(&mut occurrences, object, &field.name, text, href);
            }
            for (text, src) in extract_images(&field.html) {
                self.push_occurrence(&mut occurrences, object, &field.name, text, src);
            }
        }
        for field in &object.url_fields {
            if field.url.is_empty() && field.ignore_if_empty {
                continue;
            }
            self.push_occurrence(
                &mut occurrences,
                object,
                &field.name,
                String::new(),
                field.url.clone(),
            );
        }
        for field in &object.image_fields {
            self.push_occurrence(
                &mut occurrences,
                object,
                &field.name,
                String::new(),
                field.src.clone(),
            );
        }

        occurrences
    }

    fn push_occurrence(
        &self,
        occurrences: &mut Vec<LinkOccurrence>,
        object: &SourceObject,
        field: &str,
        text: String,
        url: String,
    ) {
        // A bare fragment points into the object's own page.
        let (url, self_anchor) = if url.starts_with('#') {
            match &object.canonical_url {
                Some(canonical) => (format!("{canonical}{url}"), true),
                None => (url, false),
            }
        } else {
            (url, false)
        };

        if url.len() > self.config.max_url_length {
            warn!(
                field = field,
                length = url.len(),
                "skipping overlong URL"
            );
            return;
        }

        occurrences.push(LinkOccurrence {
            field: field.to_string(),
            text,
            url,
            self_anchor,
        });
    }

    /// Anchor targets declared across the object's HTML fields, for
    /// verifying links the object makes to itself.
    pub fn own_anchors(&self, object: &SourceObject) -> HashSet<String> {
        let mut names = HashSet::new();
        for field in &object.html_fields {
            names.extend(extract_anchor_names(&field.html));
        }
        names
    }

    /// Make the stored graph for one object match its current fields.
    pub async fn reconcile_object(
        &self,
        type_tag: &str,
        object: &SourceObject,
    ) -> Result<ObjectSync> {
        let source = SourceRef::new(type_tag, object.id.clone());
        let occurrences = self.extract_occurrences(object);
        let own_anchors = self.own_anchors(object);

        let mut sync = ObjectSync::default();
        let mut seen_urls: HashMap<UrlId, bool> = HashMap::new();

        for occurrence in &occurrences {
            let (url, url_created) = self.store.get_or_create_url(&occurrence.url).await?;
            if url_created {
                sync.urls_created += 1;
            }
            let (link, link_created) = self
                .store
                .get_or_create_link(&source, &occurrence.field, &occurrence.text, url.id)
                .await?;
            if link_created {
                sync.links_created += 1;
            }
            sync.kept_link_ids.push(link.id);

            match seen_urls.get_mut(&url.id) {
                Some(is_self_anchor) => {
                    // Self-anchor context wins if any occurrence needs it.
                    *is_self_anchor = *is_self_anchor || occurrence.self_anchor;
                }
                None => {
                    seen_urls.insert(url.id, occurrence.self_anchor);
                    sync.targets.push(CheckTarget {
                        url,
                        self_anchors: None,
                    });
                }
            }
        }

        for target in &mut sync.targets {
            if seen_urls.get(&target.url.id).copied().unwrap_or(false) {
                target.self_anchors = Some(own_anchors.clone());
            }
        }

        // Drop links that no current occurrence produced.
        let kept: HashSet<LinkId> = sync.kept_link_ids.iter().copied().collect();
        let stale: Vec<LinkId> = self
            .store
            .links_for_object(&source)
            .await?
            .into_iter()
            .map(|link: Link| link.id)
            .filter(|id| !kept.contains(id))
            .collect();
        if !stale.is_empty() {
            sync.links_deleted = self.store.delete_links(&stale).await?;
            self.store.delete_orphaned_urls().await?;
        }

        debug!(
            type_tag = type_tag,
            object_id = %object.id,
            links_created = sync.links_created,
            links_deleted = sync.links_deleted,
            "reconciled object"
        );
        Ok(sync)
    }

    /// Rebuild the whole graph from every registered source. Links of
    /// objects that no longer exist are deleted, as are Urls nothing
    /// references afterwards.
    pub async fn sweep(&self, registry: &SourceRegistry) -> Result<SweepReport> {
        let urls_before = self.store.count_urls().await?;
        let links_before = self.store.count_links().await?;
        let mut urls_created = 0;
        let mut links_created = 0;

        let tags = registry.type_tags();
        for tag in &tags {
            let source = match registry.get(tag) {
                Some(source) => source,
                None => continue,
            };
            let mut kept: Vec<LinkId> = Vec::new();
            for object in source.objects().await? {
                let sync = self.reconcile_object(tag, &object).await?;
                urls_created += sync.urls_created;
                links_created += sync.links_created;
                kept.extend(sync.kept_link_ids);
            }
            self.store.delete_links_except(tag, &kept).await?;
        }
        // Links of sources that are no longer registered survive no sweep.
        self.store.delete_links_not_of_types(&tags).await?;
        self.store.delete_orphaned_urls().await?;

        let urls_after = self.store.count_urls().await?;
        let links_after = self.store.count_links().await?;

        let urls_deleted = (urls_before + urls_created).saturating_sub(urls_after);
        let links_deleted = (links_before + links_created).saturating_sub(links_after);
        Ok(SweepReport {
            urls: Counts {
                created: urls_created,
                deleted: urls_deleted,
                unchanged: urls_before.saturating_sub(urls_deleted),
            },
            links: Counts {
                created: links_created,
                deleted: links_deleted,
                unchanged: links_before.saturating_sub(links_deleted),
            },
        })
    }
}
