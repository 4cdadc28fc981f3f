// SPDX-License-Identifier: MIT OR Apache-2.0

//! Entry point tying the store, the background queue and all request handlers together.
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backoff::BackoffConfig;
use crate::cache::PermissionCache;
use crate::comments::NoComments;
use crate::config::Config;
use crate::error::{ConsistencyViolation, GroveError};
use crate::graph;
use crate::mutator::HierarchyMutator;
use crate::query::TreeQueryEngine;
use crate::resolver::PermissionResolver;
use crate::shares::ShareStore;
use crate::store::MemoryStore;
use crate::tasks::{CacheTaskHandler, Task};
use crate::traits::{CommentSource, TaskQueue};
use crate::tree::Tree;
use crate::worker::{FailedTask, InlineQueue, WorkerPool};

pub struct GroveBuilder {
    config: Config,
    store: Option<MemoryStore>,
    comments: Option<Arc<dyn CommentSource>>,
}

impl GroveBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            store: None,
            comments: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.chunk_size = chunk_size;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Source of comment bodies for text search, no comments are searched by default.
    pub fn comments(mut self, comments: Arc<dyn CommentSource>) -> Self {
        self.comments = Some(comments);
        self
    }

    /// Start from an existing store. Its permission cache is used as-is, call
    /// [`Grove::submit_backfill`] if it needs to be populated.
    pub fn store(mut self, store: MemoryStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Run background tasks on a pool of tokio tasks. Must be called from within a tokio runtime.
    pub fn spawn(self) -> Grove {
        let store = self.store.unwrap_or_default();
        let handler = CacheTaskHandler::new(store.clone(), self.config.chunk_size);
        let pool = Arc::new(WorkerPool::spawn(handler, &self.config));
        debug!(workers = self.config.workers, "spawned worker pool");

        Grove {
            queue: pool.clone(),
            backend: Backend::Pool(pool),
            store,
            comments: self.comments.unwrap_or_else(|| Arc::new(NoComments)),
            config: self.config,
        }
    }

    /// Run every background task synchronously on the calling thread.
    ///
    /// Mutations only return after the cache has converged, which is what most tests want.
    pub fn build_inline(self) -> Grove {
        let store = self.store.unwrap_or_default();
        let handler = CacheTaskHandler::new(store.clone(), self.config.chunk_size);
        let inline = Arc::new(InlineQueue::new(handler, self.config.max_attempts));

        Grove {
            queue: inline.clone(),
            backend: Backend::Inline(inline),
            store,
            comments: self.comments.unwrap_or_else(|| Arc::new(NoComments)),
            config: self.config,
        }
    }
}

impl Default for GroveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
enum Backend {
    Inline(Arc<InlineQueue<CacheTaskHandler>>),
    Pool(Arc<WorkerPool>),
}

/// Permission index over a tree of nodes with grafts and clones.
///
/// All handles returned by a grove share the same store and task queue.
#[derive(Clone)]
pub struct Grove {
    config: Config,
    store: MemoryStore,
    queue: Arc<dyn TaskQueue>,
    backend: Backend,
    comments: Arc<dyn CommentSource>,
}

impl Grove {
    pub fn builder() -> GroveBuilder {
        GroveBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn tree(&self) -> Tree {
        Tree::new(self.store.clone(), self.queue.clone())
    }

    pub fn shares(&self) -> ShareStore {
        ShareStore::new(self.store.clone(), self.queue.clone())
    }

    pub fn mutator(&self) -> HierarchyMutator {
        HierarchyMutator::new(self.store.clone(), self.queue.clone())
    }

    pub fn resolver(&self) -> PermissionResolver {
        PermissionResolver::new(self.store.clone())
    }

    pub fn cache(&self) -> PermissionCache {
        PermissionCache::new(self.store.clone(), self.config.chunk_size)
    }

    pub fn query(&self) -> TreeQueryEngine {
        TreeQueryEngine::new(self.store.clone(), self.comments.clone())
    }

    /// Queue a rebuild of the whole permission cache.
    pub fn submit_backfill(&self) {
        let revision = self.store.read_store().revision();
        self.queue.submit(Task::Backfill { revision });
    }

    /// Resolves once every submitted background task finished.
    pub async fn wait_idle(&self) {
        match &self.backend {
            Backend::Inline(_) => (),
            Backend::Pool(pool) => pool.wait_idle().await,
        }
    }

    /// Tasks which failed on every attempt.
    pub fn failed_tasks(&self) -> Vec<FailedTask> {
        match &self.backend {
            Backend::Inline(inline) => inline.failed(),
            Backend::Pool(pool) => pool.failed(),
        }
    }

    /// Validate all indexes against the structural facts. Run this while no background task is
    /// pending, otherwise rows still waiting for propagation are reported.
    pub fn check_consistency(&self) -> Result<(), ConsistencyViolation> {
        graph::check_consistency(&self.store.read_store())
    }

    /// Fails with the first task which ran out of attempts, or with the broken invariants of
    /// the indexes. Same caveat as [`Grove::check_consistency`] regarding pending tasks.
    pub fn health_check(&self) -> Result<(), GroveError> {
        if let Some(failed) = self.failed_tasks().into_iter().next() {
            return Err(failed.error.into());
        }
        self.check_consistency()?;
        Ok(())
    }

    /// Finish queued tasks and stop the workers.
    ///
    /// Handles obtained from this grove keep the queue alive. If any of them is still around the
    /// workers are left running until the last one is dropped.
    pub async fn shutdown(self) {
        let Grove { queue, backend, .. } = self;
        drop(queue);

        if let Backend::Pool(pool) = backend {
            match Arc::try_unwrap(pool) {
                Ok(pool) => pool.shutdown().await,
                Err(pool) => warn!(
                    pending = pool.pending(),
                    "worker pool still in use, skip shutdown"
                ),
            }
        }
    }
}
