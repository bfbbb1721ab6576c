//! Pending update queue.
//!
//! Items wait in priority tiers, FIFO within a tier. A batch always comes
//! from a single tier so lazy compile requests, which carry a reply
//! channel, are never folded into a file-change update.

use std::collections::{BTreeMap, VecDeque};

use fob_protocol::LazyCompileResponse;
use indexmap::IndexSet;
use tokio::sync::oneshot;

use crate::error::Result;

pub type LazyReply = oneshot::Sender<Result<LazyCompileResponse>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// File-system changes
    #[default]
    Normal,
    /// Explicit rebuilds requested by tooling
    High,
    /// A client is blocked on a dynamic import
    Lazy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Result is broadcast to every client
    Hmr,
    /// Result answers the waiting lazy compile requests
    Lazy,
}

#[derive(Debug)]
pub struct UpdateQueueItem {
    pub paths: Vec<String>,
    pub priority: Priority,
    /// Paths skipped the known-module filter
    pub force: bool,
    /// Extra compile attempts allowed after a failure
    pub retries: u32,
    /// Lazy request for a Node target
    pub node: bool,
    reply: Option<LazyReply>,
}

impl UpdateQueueItem {
    pub fn new(paths: Vec<String>, priority: Priority, force: bool, retries: u32) -> Self {
        Self {
            paths,
            priority,
            force,
            retries,
            node: false,
            reply: None,
        }
    }

    pub(crate) fn lazy(paths: Vec<String>, node: bool, retries: u32, reply: LazyReply) -> Self {
        Self {
            paths,
            priority: Priority::Lazy,
            force: true,
            retries,
            node,
            reply: Some(reply),
        }
    }

    pub fn kind(&self) -> UpdateKind {
        kind_of(self.priority)
    }
}

/// Merged items of one tier, compiled together.
#[derive(Debug)]
pub struct UpdateBatch {
    /// Deduplicated, in first-seen order
    pub paths: Vec<String>,
    pub priority: Priority,
    pub force: bool,
    pub retries: u32,
    pub node: bool,
    pub(crate) replies: Vec<LazyReply>,
}

impl UpdateBatch {
    pub fn kind(&self) -> UpdateKind {
        kind_of(self.priority)
    }

    /// Number of queued items merged into this batch that expect a reply.
    pub fn waiters(&self) -> usize {
        self.replies.len()
    }
}

fn kind_of(priority: Priority) -> UpdateKind {
    match priority {
        Priority::Lazy => UpdateKind::Lazy,
        Priority::Normal | Priority::High => UpdateKind::Hmr,
    }
}

#[derive(Debug, Default)]
pub struct UpdateQueue {
    tiers: BTreeMap<Priority, VecDeque<UpdateQueueItem>>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: UpdateQueueItem) {
        self.tiers.entry(item.priority).or_default().push_back(item);
    }

    /// Remove the items of the highest non-empty tier and merge them.
    ///
    /// Only items sharing the first item's `node` target are merged; the rest
    /// stay queued, in order, for a later batch.
    pub fn take_batch(&mut self) -> Option<UpdateBatch> {
        let (priority, items) = self.tiers.pop_last()?;
        let node = items.front().is_some_and(|item| item.node);

        let mut paths = IndexSet::new();
        let mut force = false;
        let mut retries = 0;
        let mut replies = Vec::new();
        let mut deferred = VecDeque::new();

        for item in items {
            if item.node != node {
                deferred.push_back(item);
                continue;
            }
            paths.extend(item.paths);
            force |= item.force;
            retries = retries.max(item.retries);
            replies.extend(item.reply);
        }
        if !deferred.is_empty() {
            self.tiers.insert(priority, deferred);
        }

        Some(UpdateBatch {
            paths: paths.into_iter().collect(),
            priority,
            force,
            retries,
            node,
            replies,
        })
    }

    /// Number of queued items across all tiers.
    pub fn len(&self) -> usize {
        self.tiers.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}
