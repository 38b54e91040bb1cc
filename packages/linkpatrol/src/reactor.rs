//! Change reactor: entry points the host application calls when source
//! objects change.
//!
//! Saves and deletes reconcile the stored graph immediately; verification
//! work goes to the background queue. The mutation phase is serialized
//! behind an async lock so two concurrent saves of related objects cannot
//! interleave their graph updates.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::reconcile::{CheckTarget, Reconciler};
use crate::registry::SourceRegistry;
use crate::storage::LinkStore;
use crate::worker::{CheckJob, CheckQueue, JobOptions};

/// State captured before a save, consumed by `after_save`.
#[derive(Debug)]
pub struct SaveToken {
    type_tag: String,
    object_id: String,
    /// Canonical address before the save, if the object had one.
    previous_url: Option<String>,
    /// False when the object did not exist before the save.
    existed: bool,
}

pub struct ChangeReactor {
    registry: Arc<SourceRegistry>,
    store: Arc<dyn LinkStore>,
    reconciler: Reconciler,
    queue: Arc<CheckQueue>,
    options: JobOptions,
    update_lock: Mutex<()>,
}

impl ChangeReactor {
    pub fn new(
        registry: Arc<SourceRegistry>,
        store: Arc<dyn LinkStore>,
        queue: Arc<CheckQueue>,
        config: Config,
    ) -> Self {
        let options = JobOptions::from_config(&config);
        let reconciler = Reconciler::new(store.clone(), config);
        Self {
            registry,
            store,
            reconciler,
            queue,
            options,
            update_lock: Mutex::new(()),
        }
    }

    /// Whether verification triggered by change events is still running.
    pub fn still_updating(&self) -> bool {
        self.queue.still_updating()
    }

    /// Call before persisting a change to an object, to capture its
    /// pre-save address. Pass the token to `after_save` once the change
    /// is persisted.
    pub async fn before_save(&self, type_tag: &str, object_id: &str) -> Result<SaveToken> {
        let previous = match self.registry.get(type_tag) {
            Some(source) => source.get(object_id).await?,
            None => None,
        };
        Ok(SaveToken {
            type_tag: type_tag.to_string(),
            object_id: object_id.to_string(),
            previous_url: previous.as_ref().and_then(|o| o.canonical_url.clone()),
            existed: previous.is_some(),
        })
    }

    /// Complete the save cycle: handle an address move, reconcile the
    /// object's links and queue verification.
    pub async fn after_save(&self, token: SaveToken) -> Result<()> {
        let _guard = self.update_lock.lock().await;

        let Some(source) = self.registry.get(&token.type_tag) else {
            warn!(type_tag = %token.type_tag, "save event for unregistered source");
            return Ok(());
        };
        let Some(object) = source.get(&token.object_id).await? else {
            // Filtered out of checking (or gone): its links are no longer valid.
            self.remove_object_links(&token.type_tag, &token.object_id)
                .await?;
            return Ok(());
        };

        // A moved object breaks everything under its old address. Skipped
        // for newly created objects, which had no old address.
        if token.existed {
            if let (Some(old), Some(new)) = (&token.previous_url, &object.canonical_url) {
                if old != new {
                    self.handle_moved(old, new).await?;
                }
            }
        }

        let sync = self
            .reconciler
            .reconcile_object(&token.type_tag, &object)
            .await?;
        self.queue
            .submit(CheckJob {
                targets: sync.targets,
                options: self.options,
            })
            .await?;
        Ok(())
    }

    /// Notification that an object was saved, when no pre-save state was
    /// captured.
    pub async fn on_object_saved(&self, type_tag: &str, object_id: &str) -> Result<()> {
        let token = SaveToken {
            type_tag: type_tag.to_string(),
            object_id: object_id.to_string(),
            previous_url: None,
            existed: false,
        };
        self.after_save(token).await
    }

    /// Call before deleting an object that has a page of its own: every
    /// stored Url under its address is about to break.
    pub async fn before_delete(&self, type_tag: &str, object_id: &str) -> Result<()> {
        let Some(source) = self.registry.get(type_tag) else {
            return Ok(());
        };
        let Some(object) = source.get(object_id).await? else {
            return Ok(());
        };
        if let Some(canonical) = &object.canonical_url {
            let _guard = self.update_lock.lock().await;
            self.mark_prefix_broken(canonical).await?;
        }
        Ok(())
    }

    /// Notification that an object was deleted: its links go, and any Url
    /// nothing references any more goes with them.
    pub async fn on_object_deleted(&self, type_tag: &str, object_id: &str) -> Result<()> {
        let _guard = self.update_lock.lock().await;
        self.remove_object_links(type_tag, object_id).await
    }

    /// Rebuild the graph from every registered source, serialized against
    /// concurrent change events.
    pub async fn sweep(&self) -> Result<crate::reconcile::SweepReport> {
        let _guard = self.update_lock.lock().await;
        self.reconciler.sweep(&self.registry).await
    }

    async fn remove_object_links(&self, type_tag: &str, object_id: &str) -> Result<()> {
        let source = crate::model::SourceRef::new(type_tag, object_id);
        let deleted = self.store.delete_links_for_object(&source).await?;
        if deleted > 0 {
            self.store.delete_orphaned_urls().await?;
            info!(type_tag, object_id, deleted, "removed links for object");
        }
        Ok(())
    }

    async fn mark_prefix_broken(&self, prefix: &str) -> Result<()> {
        for mut url in self.store.urls_with_prefix(prefix).await? {
            url.status = Some(false);
            url.message = "Broken internal link".to_string();
            self.store.save_url(&url).await?;
        }
        Ok(())
    }

    /// An object's canonical address changed: every stored Url under the
    /// old address is broken now, and everything under the new address
    /// needs a fresh verdict.
    async fn handle_moved(&self, old_url: &str, new_url: &str) -> Result<()> {
        info!(old_url, new_url, "object address changed");
        self.mark_prefix_broken(old_url).await?;

        let mut targets = Vec::new();
        for mut url in self.store.urls_with_prefix(new_url).await? {
            url.status = None;
            url.last_checked = None;
            self.store.save_url(&url).await?;
            targets.push(CheckTarget {
                url,
                self_anchors: None,
            });
        }
        if !targets.is_empty() {
            self.queue
                .submit(CheckJob {
                    targets,
                    options: self.options,
                })
                .await?;
        }
        Ok(())
    }
}
