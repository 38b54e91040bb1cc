//! Persistence seam for the Url/Link graph.
//!
//! `LinkStore` is the only storage interface the rest of the crate sees.
//! Production uses `PostgresLinkStore`; tests and embedders without a
//! database use `MemoryLinkStore`.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{Link, LinkId, SourceRef, Url, UrlId};

pub use memory::MemoryLinkStore;
pub use postgres::PostgresLinkStore;

#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Look up a Url by its exact string, creating an unchecked record if
    /// none exists. The bool is true when the record was created.
    async fn get_or_create_url(&self, url: &str) -> Result<(Url, bool)>;

    /// Persist the verification fields of an existing Url.
    async fn save_url(&self, url: &Url) -> Result<()>;

    async fn url_by_id(&self, id: UrlId) -> Result<Option<Url>>;

    /// All Urls, oldest-checked first. `limit` of None means unlimited.
    async fn list_urls(&self, limit: Option<i64>) -> Result<Vec<Url>>;

    /// Urls whose string starts with `prefix` (used when a source object
    /// moves and everything under its old address needs attention).
    async fn urls_with_prefix(&self, prefix: &str) -> Result<Vec<Url>>;

    /// Find or create the Link for a (source, field, text, url) occurrence.
    /// The bool is true when the record was created.
    async fn get_or_create_link(
        &self,
        source: &SourceRef,
        field: &str,
        text: &str,
        url_id: UrlId,
    ) -> Result<(Link, bool)>;

    async fn links_for_object(&self, source: &SourceRef) -> Result<Vec<Link>>;

    async fn delete_links(&self, ids: &[LinkId]) -> Result<u64>;

    async fn delete_links_for_object(&self, source: &SourceRef) -> Result<u64>;

    /// Delete every link of `type_tag` whose id is not in `keep`. Used by
    /// the full sweep to drop links of objects that no longer exist.
    async fn delete_links_except(&self, type_tag: &str, keep: &[LinkId]) -> Result<u64>;

    /// Delete every link whose type tag is not in `type_tags`. Used by the
    /// full sweep to drop links of sources that are no longer registered.
    async fn delete_links_not_of_types(&self, type_tags: &[String]) -> Result<u64>;

    /// Drop Urls that no Link references any more. Returns how many went.
    async fn delete_orphaned_urls(&self) -> Result<u64>;

    /// Returns false when the link does not exist.
    async fn set_ignore(&self, id: LinkId, ignore: bool) -> Result<bool>;

    async fn unignore_all(&self) -> Result<u64>;

    async fn count_urls(&self) -> Result<u64>;

    async fn count_links(&self) -> Result<u64>;

    /// Links pointing at a broken Url, excluding operator-ignored ones.
    /// This is the "You have N broken links" number.
    async fn count_broken_links(&self) -> Result<u64>;
}
