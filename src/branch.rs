//! Branch lifecycle: is this commit already indexed, and retiring entries
//! left behind by earlier commits on the same branch.
//!
//! Every operation here is best-effort. Store failures are logged and
//! reported as [`Cleanup::Failed`] (or a stale state) and never abort a run.

use anyhow::Result;

use crate::error::Cleanup;
use crate::models::BranchScope;
use crate::store::{DeleteTarget, MetadataFilter, VectorStore};

/// Ids per delete request when retiring entries.
pub const DELETE_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    Unknown,
    UpToDate,
    Stale,
}

pub struct BranchLifecycle<'a> {
    store: &'a dyn VectorStore,
    scope: &'a BranchScope,
    state: BranchState,
}

impl<'a> BranchLifecycle<'a> {
    pub fn new(store: &'a dyn VectorStore, scope: &'a BranchScope) -> Self {
        Self {
            store,
            scope,
            state: BranchState::Unknown,
        }
    }

    pub fn state(&self) -> BranchState {
        self.state
    }

    /// Resolve the state for the current scope. Only queries the store once.
    ///
    /// Without both a branch and a commit there is nothing to match against,
    /// so the scope is always stale.
    pub async fn check(&mut self) -> BranchState {
        if self.state != BranchState::Unknown {
            return self.state;
        }

        self.state = if !self.scope.has_branch() || !self.scope.has_commit() {
            BranchState::Stale
        } else {
            let filter =
                MetadataFilter::branch(self.scope.branch.clone()).with_commit(self.scope.commit.clone());
            match self.store.get(&filter, Some(1)).await {
                Ok(found) if !found.is_empty() => BranchState::UpToDate,
                Ok(_) => BranchState::Stale,
                Err(e) => {
                    tracing::warn!("Could not check whether {} is indexed: {:#}", self.scope.branch, e);
                    BranchState::Stale
                }
            }
        };
        self.state
    }

    /// Delete branch entries whose commit differs from the current one.
    pub async fn retire_superseded(&self) -> Cleanup {
        if !self.scope.has_branch() {
            return Cleanup::Nothing;
        }
        match self.try_retire_superseded().await {
            Ok(0) => Cleanup::Nothing,
            Ok(n) => {
                tracing::info!("Removed {} chunks from earlier commits on {}", n, self.scope.branch);
                Cleanup::Removed(n)
            }
            Err(e) => {
                tracing::warn!("Could not clean up old chunks for {}: {:#}", self.scope.branch, e);
                Cleanup::Failed(format!("{:#}", e))
            }
        }
    }

    async fn try_retire_superseded(&self) -> Result<usize> {
        let entries = self
            .store
            .get(&MetadataFilter::branch(self.scope.branch.clone()), None)
            .await?;
        let stale: Vec<String> = entries
            .into_iter()
            .filter(|e| e.metadata.commit_hash != self.scope.commit)
            .map(|e| e.id)
            .collect();
        self.delete_ids(stale).await
    }

    /// Remove every chunk of `path` within the current branch. Without a
    /// branch only unbranched entries are affected.
    pub async fn delete_file_chunks(&self, path: &str) -> Cleanup {
        let filter = MetadataFilter::branch(self.scope.branch.clone()).with_file_path(path);

        match self.try_delete_matching(&filter).await {
            Ok(0) => Cleanup::Nothing,
            Ok(n) => Cleanup::Removed(n),
            Err(e) => {
                tracing::warn!("Could not delete chunks for {}: {:#}", path, e);
                Cleanup::Failed(format!("{:#}", e))
            }
        }
    }

    /// Drop whatever the current commit has on the branch, after a run
    /// aborted part way. Leaves the scope stale so the next run starts over.
    pub async fn discard_current(&self) -> Cleanup {
        if !self.scope.has_branch() || !self.scope.has_commit() {
            return Cleanup::Nothing;
        }
        let filter =
            MetadataFilter::branch(self.scope.branch.clone()).with_commit(self.scope.commit.clone());
        match self.try_delete_matching(&filter).await {
            Ok(0) => Cleanup::Nothing,
            Ok(n) => {
                tracing::info!(
                    "Discarded {} partially written chunks for {} @ {}",
                    n,
                    self.scope.branch,
                    self.scope.commit_prefix()
                );
                Cleanup::Removed(n)
            }
            Err(e) => {
                tracing::warn!(
                    "Could not discard partial chunks for {}; the next run may report it as indexed: {:#}",
                    self.scope.branch,
                    e
                );
                Cleanup::Failed(format!("{:#}", e))
            }
        }
    }

    async fn try_delete_matching(&self, filter: &MetadataFilter) -> Result<usize> {
        let ids: Vec<String> = self
            .store
            .get(filter, None)
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect();
        self.delete_ids(ids).await
    }

    async fn delete_ids(&self, ids: Vec<String>) -> Result<usize> {
        for batch in ids.chunks(DELETE_BATCH_SIZE) {
            self.store.delete(&DeleteTarget::Ids(batch.to_vec())).await?;
        }
        Ok(ids.len())
    }
}
