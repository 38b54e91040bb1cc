//! Source registration.
//!
//! A `LinkSource` adapts one kind of content object (pages, articles,
//! whatever the host application stores) into field snapshots the
//! reconciler can extract links from. The registry holds every source
//! under a unique type tag; that tag is what stored links carry.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

/// A rich-text field whose HTML is scanned for `<a>` and `<img>` tags.
#[derive(Debug, Clone)]
pub struct HtmlField {
    pub name: String,
    pub html: String,
}

/// A field that holds a URL directly (no markup).
#[derive(Debug, Clone)]
pub struct UrlField {
    pub name: String,
    pub url: String,
    /// Skip this field entirely when the value is empty, instead of
    /// recording an "Empty link".
    pub ignore_if_empty: bool,
}

/// A field that holds an image address directly.
#[derive(Debug, Clone)]
pub struct ImageField {
    pub name: String,
    pub src: String,
}

/// Snapshot of one content object as the checker sees it.
#[derive(Debug, Clone)]
pub struct SourceObject {
    pub id: String,
    /// Site-relative address of the object's own page, when it has one.
    /// Bare `#fragment` links resolve against this.
    pub canonical_url: Option<String>,
    pub html_fields: Vec<HtmlField>,
    pub url_fields: Vec<UrlField>,
    pub image_fields: Vec<ImageField>,
}

impl SourceObject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            canonical_url: None,
            html_fields: Vec::new(),
            url_fields: Vec::new(),
            image_fields: Vec::new(),
        }
    }

    pub fn with_canonical_url(mut self, url: impl Into<String>) -> Self {
        self.canonical_url = Some(url.into());
        self
    }

    pub fn with_html_field(mut self, name: impl Into<String>, html: impl Into<String>) -> Self {
        self.html_fields.push(HtmlField {
            name: name.into(),
            html: html.into(),
        });
        self
    }

    pub fn with_url_field(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.url_fields.push(UrlField {
            name: name.into(),
            url: url.into(),
            ignore_if_empty: false,
        });
        self
    }

    pub fn with_optional_url_field(
        mut self,
        name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        self.url_fields.push(UrlField {
            name: name.into(),
            url: url.into(),
            ignore_if_empty: true,
        });
        self
    }

    pub fn with_image_field(mut self, name: impl Into<String>, src: impl Into<String>) -> Self {
        self.image_fields.push(ImageField {
            name: name.into(),
            src: src.into(),
        });
        self
    }
}

#[async_trait]
pub trait LinkSource: Send + Sync {
    /// Unique tag identifying this source in stored links.
    fn type_tag(&self) -> &str;

    /// Every object currently eligible for checking.
    async fn objects(&self) -> Result<Vec<SourceObject>>;

    /// One object by id. None when it no longer exists or is currently
    /// excluded from checking (unpublished, filtered out).
    async fn get(&self, object_id: &str) -> Result<Option<SourceObject>>;
}

/// All registered sources, keyed by type tag.
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn LinkSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source. Duplicate type tags are rejected.
    pub fn register(&mut self, source: Arc<dyn LinkSource>) -> Result<()> {
        let tag = source.type_tag().to_string();
        if self.sources.contains_key(&tag) {
            bail!("source type tag already registered: {tag}");
        }
        self.sources.insert(tag, source);
        Ok(())
    }

    pub fn get(&self, type_tag: &str) -> Option<&Arc<dyn LinkSource>> {
        self.sources.get(type_tag)
    }

    pub fn sources(&self) -> impl Iterator<Item = &Arc<dyn LinkSource>> {
        self.sources.values()
    }

    pub fn type_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.sources.keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
