//! Link integrity checking for content-managed sites.
//!
//! The crate keeps a deduplicated graph of every URL mentioned anywhere in
//! registered content (`Url`) and every place each one appears (`Link`),
//! verifies internal links against the host's own routing, external links
//! over HTTP and file links against disk, and keeps the graph current as
//! content changes.
//!
//! Typical wiring:
//! - implement [`registry::LinkSource`] for each content type and register
//!   it in a [`registry::SourceRegistry`],
//! - build a [`checker::UrlChecker`] over a [`checker::fetch::ReqwestFetcher`]
//!   and the host's [`checker::router::InternalRouter`],
//! - run full rebuilds with [`reconcile::Reconciler::sweep`] and scheduled
//!   verification with [`batch::BatchRunner`],
//! - feed save/delete events through a [`reactor::ChangeReactor`].

pub mod batch;
pub mod checker;
pub mod config;
pub mod extract;
pub mod model;
pub mod reactor;
pub mod reconcile;
pub mod registry;
pub mod storage;
pub mod worker;

pub use batch::{BatchOptions, BatchReport, BatchRunner};
pub use checker::fetch::ReqwestFetcher;
pub use checker::router::{InternalRouter, NullRouter, RoutedResponse};
pub use checker::{CheckOptions, UrlChecker};
pub use config::Config;
pub use model::{Link, LinkId, SourceRef, Url, UrlId, UrlType};
pub use reactor::{ChangeReactor, SaveToken};
pub use reconcile::{Reconciler, SweepReport};
pub use registry::{LinkSource, SourceObject, SourceRegistry};
pub use storage::{LinkStore, MemoryLinkStore, PostgresLinkStore};
pub use worker::{CheckJob, CheckQueue, CheckWorker, JobOptions};
