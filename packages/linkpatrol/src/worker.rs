//! Background verification queue.
//!
//! Change events do not verify URLs on the caller's task; they submit a
//! job to a bounded queue drained by a single worker. A panicking or
//! failing job is logged and dropped without taking the worker down. An
//! atomic in-flight counter lets callers (and tests) observe whether
//! submitted work has finished.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::checker::{CheckOptions, UrlChecker};
use crate::reconcile::CheckTarget;
use crate::storage::LinkStore;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Which checks a job performs.
#[derive(Debug, Clone, Copy)]
pub struct JobOptions {
    pub check_internal: bool,
    pub check_external: bool,
    pub external_recheck_interval: i64,
}

impl JobOptions {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            check_internal: true,
            check_external: true,
            external_recheck_interval: config.external_recheck_interval,
        }
    }
}

/// One unit of queued work: verify these URLs and persist the results.
pub struct CheckJob {
    pub targets: Vec<CheckTarget>,
    pub options: JobOptions,
}

/// Executes jobs: check each target, save each result. One bad target
/// does not stop the rest of the job.
pub struct CheckWorker {
    checker: Arc<UrlChecker>,
    store: Arc<dyn LinkStore>,
}

impl CheckWorker {
    pub fn new(checker: Arc<UrlChecker>, store: Arc<dyn LinkStore>) -> Self {
        Self { checker, store }
    }

    pub async fn process(&self, job: CheckJob) {
        for mut target in job.targets {
            let opts = CheckOptions {
                check_internal: job.options.check_internal,
                check_external: job.options.check_external,
                external_recheck_interval: job.options.external_recheck_interval,
                self_anchors: target.self_anchors.as_ref(),
            };
            self.checker.check_url(&mut target.url, &opts).await;
            if let Err(err) = self.store.save_url(&target.url).await {
                error!(url = %target.url.url, error = %err, "failed to save check result");
            }
        }
    }
}

enum Dispatch {
    /// Jobs run on a spawned worker task.
    Background(mpsc::Sender<CheckJob>),
    /// Jobs run on the submitting task. For tests and one-shot commands.
    Inline,
}

pub struct CheckQueue {
    worker: Arc<CheckWorker>,
    dispatch: Dispatch,
    in_flight: Arc<AtomicUsize>,
}

impl CheckQueue {
    /// Spawn the worker task and return a queue handle. `submit` awaits
    /// queue capacity rather than dropping jobs when the queue is full.
    pub fn spawn(worker: Arc<CheckWorker>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<CheckJob>(capacity);
        let in_flight = Arc::new(AtomicUsize::new(0));

        let loop_worker = worker.clone();
        let loop_in_flight = in_flight.clone();
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                let task_worker = loop_worker.clone();
                // Run each job on its own task so a panic is contained.
                let outcome = tokio::spawn(async move { task_worker.process(job).await }).await;
                if let Err(err) = outcome {
                    error!(error = %err, "check job aborted");
                }
                loop_in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            debug!("check queue closed, worker exiting");
        });

        Self {
            worker,
            dispatch: Dispatch::Background(sender),
            in_flight,
        }
    }

    pub fn inline(worker: Arc<CheckWorker>) -> Self {
        Self {
            worker,
            dispatch: Dispatch::Inline,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn submit(&self, job: CheckJob) -> Result<()> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        match &self.dispatch {
            Dispatch::Background(sender) => {
                if let Err(err) = sender.send(job).await.context("check queue is closed") {
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    return Err(err);
                }
            }
            Dispatch::Inline => {
                self.worker.process(job).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    /// Whether submitted work is still queued or running.
    pub fn still_updating(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Wait until every submitted job has finished.
    pub async fn drain(&self) {
        while self.still_updating() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::fetch::{FetchError, FetchRequest, FetchResponse, UrlFetcher};
    use crate::checker::router::NullRouter;
    use crate::config::Config;
    use crate::storage::MemoryLinkStore;

    struct OkFetcher;

    #[async_trait::async_trait]
    impl UrlFetcher for OkFetcher {
        async fn fetch(&self, _request: &FetchRequest) -> Result<FetchResponse, FetchError> {
            Ok(FetchResponse {
                status: 200,
                reason: Some("OK"),
                location: None,
                body: None,
            })
        }
    }

    async fn queue_fixture(inline: bool) -> (CheckQueue, Arc<MemoryLinkStore>) {
        let store = Arc::new(MemoryLinkStore::new());
        let checker = Arc::new(UrlChecker::new(
            Config::default(),
            Arc::new(OkFetcher),
            Arc::new(NullRouter),
        ));
        let worker = Arc::new(CheckWorker::new(checker, store.clone()));
        let queue = if inline {
            CheckQueue::inline(worker)
        } else {
            CheckQueue::spawn(worker, DEFAULT_QUEUE_CAPACITY)
        };
        (queue, store)
    }

    #[tokio::test]
    async fn test_inline_job_persists_results() {
        let (queue, store) = queue_fixture(true).await;
        let (url, _) = store.get_or_create_url("http://example.org/").await.unwrap();

        queue
            .submit(CheckJob {
                targets: vec![CheckTarget {
                    url,
                    self_anchors: None,
                }],
                options: JobOptions::from_config(&Config::default()),
            })
            .await
            .unwrap();

        assert!(!queue.still_updating());
        let urls = store.list_urls(None).await.unwrap();
        assert_eq!(urls[0].status, Some(true));
        assert!(urls[0].last_checked.is_some());
    }

    #[tokio::test]
    async fn test_background_queue_drains() {
        let (queue, store) = queue_fixture(false).await;
        let (url, _) = store.get_or_create_url("http://example.org/").await.unwrap();

        queue
            .submit(CheckJob {
                targets: vec![CheckTarget {
                    url,
                    self_anchors: None,
                }],
                options: JobOptions::from_config(&Config::default()),
            })
            .await
            .unwrap();

        queue.drain().await;
        let urls = store.list_urls(None).await.unwrap();
        assert_eq!(urls[0].status, Some(true));
    }

    #[tokio::test]
    async fn test_empty_job_completes() {
        let (queue, _store) = queue_fixture(false).await;
        queue
            .submit(CheckJob {
                targets: Vec::new(),
                options: JobOptions::from_config(&Config::default()),
            })
            .await
            .unwrap();
        queue.drain().await;
        assert!(!queue.still_updating());
    }
}
