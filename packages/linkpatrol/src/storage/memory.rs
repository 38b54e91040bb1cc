//! In-memory `LinkStore` for tests and database-less embedders.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{Link, LinkId, SourceRef, Url, UrlId};

use super::LinkStore;

#[derive(Default)]
struct Inner {
    urls: HashMap<UrlId, Url>,
    url_ids_by_string: HashMap<String, UrlId>,
    links: HashMap<LinkId, Link>,
}

#[derive(Default)]
pub struct MemoryLinkStore {
    inner: Mutex<Inner>,
}

impl MemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LinkStore for MemoryLinkStore {
    async fn get_or_create_url(&self, url: &str) -> Result<(Url, bool)> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = inner.url_ids_by_string.get(url) {
            let existing = inner.urls[id].clone();
            return Ok((existing, false));
        }
        let record = Url::new(url);
        inner.url_ids_by_string.insert(url.to_string(), record.id);
        inner.urls.insert(record.id, record.clone());
        Ok((record, true))
    }

    async fn save_url(&self, url: &Url) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.urls.insert(url.id, url.clone());
        Ok(())
    }

    async fn url_by_id(&self, id: UrlId) -> Result<Option<Url>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.urls.get(&id).cloned())
    }

    async fn list_urls(&self, limit: Option<i64>) -> Result<Vec<Url>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut urls: Vec<Url> = inner.urls.values().cloned().collect();
        // Never-checked first, then stalest first.
        urls.sort_by_key(|u| (u.last_checked.is_some(), u.last_checked));
        if let Some(limit) = limit {
            urls.truncate(limit.max(0) as usize);
        }
        Ok(urls)
    }

    async fn urls_with_prefix(&self, prefix: &str) -> Result<Vec<Url>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .urls
            .values()
            .filter(|u| u.url.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get_or_create_link(
        &self,
        source: &SourceRef,
        field: &str,
        text: &str,
        url_id: UrlId,
    ) -> Result<(Link, bool)> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let truncated = crate::model::truncate_text(text);
        if let Some(existing) = inner.links.values().find(|l| {
            l.source == *source && l.field == field && l.text == truncated && l.url_id == url_id
        }) {
            return Ok((existing.clone(), false));
        }
        let link = Link::new(source.clone(), field, text, url_id);
        inner.links.insert(link.id, link.clone());
        Ok((link, true))
    }

    async fn links_for_object(&self, source: &SourceRef) -> Result<Vec<Link>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .links
            .values()
            .filter(|l| l.source == *source)
            .cloned()
            .collect())
    }

    async fn delete_links(&self, ids: &[LinkId]) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut deleted = 0;
        for id in ids {
            if inner.links.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn delete_links_for_object(&self, source: &SourceRef) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = inner.links.len();
        inner.links.retain(|_, l| l.source != *source);
        Ok((before - inner.links.len()) as u64)
    }

    async fn delete_links_except(&self, type_tag: &str, keep: &[LinkId]) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = inner.links.len();
        inner
            .links
            .retain(|id, l| l.source.type_tag != type_tag || keep.contains(id));
        Ok((before - inner.links.len()) as u64)
    }

    async fn delete_links_not_of_types(&self, type_tags: &[String]) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = inner.links.len();
        inner
            .links
            .retain(|_, l| type_tags.iter().any(|t| *t == l.source.type_tag));
        Ok((before - inner.links.len()) as u64)
    }

    async fn delete_orphaned_urls(&self) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let referenced: std::collections::HashSet<UrlId> =
            inner.links.values().map(|l| l.url_id).collect();
        let before = inner.urls.len();
        inner.urls.retain(|id, _| referenced.contains(id));
        inner.url_ids_by_string.retain(|_, id| referenced.contains(id));
        Ok((before - inner.urls.len()) as u64)
    }

    async fn set_ignore(&self, id: LinkId, ignore: bool) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.links.get_mut(&id) {
            Some(link) => {
                link.ignore = ignore;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn unignore_all(&self) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut changed = 0;
        for link in inner.links.values_mut() {
            if link.ignore {
                link.ignore = false;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn count_urls(&self) -> Result<u64> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.urls.len() as u64)
    }

    async fn count_links(&self) -> Result<u64> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.links.len() as u64)
    }

    async fn count_broken_links(&self) -> Result<u64> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .links
            .values()
            .filter(|l| {
                !l.ignore
                    && inner
                        .urls
                        .get(&l.url_id)
                        .is_some_and(|u| u.status == Some(false))
            })
            .count() as u64)
    }
}
