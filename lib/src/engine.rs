// Copyright 2024 Mergin Sync Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The public sync engine facade (§6): wires the project store, diff
//! engine, and transport together into `project_status`/`pull`/`push`, and
//! the asynchronous job variants that expose progress and cancellation.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tracing::info;
use tracing::instrument;

use crate::apply_engine;
use crate::config::EngineConfig;
use crate::config::UPLOAD_CHUNK_SIZE;
use crate::diff_engine::DiffEngine;
use crate::error::SyncError;
use crate::file_util;
use crate::fingerprint::FileFingerprint;
use crate::inventory;
use crate::metadata::ProjectMetadata;
use crate::project_store::ProjectStore;
use crate::pull_plan::PullPlan;
use crate::pull_plan::plan_pull;
use crate::push_plan::PushPlan;
use crate::push_plan::plan_push;
use crate::push_plan::summarize_push;
use crate::transport::SyncJob;
use crate::transport::Transport;
use crate::version::ProjectVersion;

/// Per-path JSON changeset summaries, keyed the way [`summarize_push`]
/// returns them (§11).
pub type ChangeSummary = BTreeMap<String, serde_json::Value>;

/// The result of a completed [`SyncEngine::pull`]: the conflict-copy paths
/// Apply-Pull created, and the project version now recorded locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOutcome {
    pub conflicts: Vec<PathBuf>,
    pub version: ProjectVersion,
}

/// Replaces entries in `files` according to a completed pull plan, without
/// re-scanning disk — conflict copies Apply-Pull produced are deliberately
/// left untracked, exactly as a plain new local file would be (§9's
/// `renamed` contract note: the working tree after Apply-Pull may contain
/// more than what the plan describes, and only the plan's entries are
/// adopted into metadata).
fn apply_plan_to_file_list(files: Vec<FileFingerprint>, plan: &PullPlan) -> Vec<FileFingerprint> {
    let mut by_path: BTreeMap<String, FileFingerprint> =
        files.into_iter().map(|f| (f.path.clone(), f)).collect();

    for f in &plan.removed {
        by_path.remove(&f.path);
    }
    for r in &plan.renamed {
        if let Some(mut f) = by_path.remove(&r.origin.path) {
            f.path = r.new_path.clone();
            by_path.insert(f.path.clone(), f);
        }
    }
    for f in &plan.added {
        by_path.insert(f.path.clone(), f.clone());
    }
    for u in &plan.updated {
        by_path.insert(u.file.path.clone(), u.file.clone());
    }

    by_path.into_values().collect()
}

/// The client-side sync engine (§2): a `ProjectStore` plus the diff engine
/// and transport collaborators it needs to turn plans into completed
/// pulls and pushes.
pub struct SyncEngine {
    store: ProjectStore,
    project_name: String,
    config: EngineConfig,
    diff_engine: Box<dyn DiffEngine>,
    transport: Box<dyn Transport>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("store", &self.store)
            .field("project_name", &self.project_name)
            .field("config", &self.config)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        store: ProjectStore,
        project_name: impl Into<String>,
        config: EngineConfig,
        diff_engine: Box<dyn DiffEngine>,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            store,
            project_name: project_name.into(),
            config,
            diff_engine,
            transport,
        }
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    /// Whether structured-file changeset sync is actually usable right
    /// now: the diff engine reports itself available, and the config
    /// doesn't force it off (§11's server-compatibility-style gate).
    pub fn diff_engine_available(&self) -> bool {
        self.diff_engine.available() && !self.config.diff_engine_disabled
    }

    /// `(pull_changes, push_changes, push_summary)` without mutating
    /// anything (§6's `project_status`).
    #[instrument(skip(self))]
    pub async fn project_status(&self) -> Result<(PullPlan, PushPlan, ChangeSummary), SyncError> {
        let local_metadata = self.store.metadata_get()?;
        let server_files = self.transport.server_inventory(&self.project_name).await?;
        let pull_plan = plan_pull(
            &local_metadata,
            &server_files,
            self.diff_engine_available(),
            self.config.diffs_limit_size,
        );

        let inventory = inventory::inspect(self.store.dir())?;
        let push_plan = plan_push(
            &self.store,
            &local_metadata,
            &inventory,
            self.diff_engine.as_ref(),
            UPLOAD_CHUNK_SIZE,
        )?;
        let push_summary = summarize_push(&self.store, &push_plan, self.diff_engine.as_ref())?;

        Ok((pull_plan, push_plan, push_summary))
    }

    /// Runs a full pull to completion: plans, downloads (reconstructing
    /// diff chains onto the basefile where chosen), applies, and persists
    /// the new metadata document.
    pub async fn pull(&self) -> Result<PullOutcome, SyncError> {
        let progress = Arc::new(AtomicU64::new(0));
        self.run_pull(&progress).await
    }

    /// Runs a full push to completion: plans, uploads, finalizes on the
    /// server, reconciles basefiles, and persists the new metadata
    /// document.
    pub async fn push(&self) -> Result<ProjectVersion, SyncError> {
        let progress = Arc::new(AtomicU64::new(0));
        self.run_push(&progress).await
    }

    /// Spawns a pull as a cancellable background job (§5, §6). Planning
    /// (and therefore `total_size`) happens before the job starts running;
    /// progress is reported at file granularity against the server's
    /// reported file sizes, not wire-level chunk bytes, since the wire
    /// granularity is the transport's private concern.
    pub async fn pull_async(self: Arc<Self>) -> Result<Box<dyn SyncJob>, SyncError> {
        let local_metadata = self.store.metadata_get()?;
        let server_files = self.transport.server_inventory(&self.project_name).await?;
        let plan = plan_pull(
            &local_metadata,
            &server_files,
            self.diff_engine_available(),
            self.config.diffs_limit_size,
        );
        let total_size = plan.added.iter().map(|f| f.size).sum::<u64>()
            + plan.updated.iter().map(|u| u.file.size).sum::<u64>();

        let progress = Arc::new(AtomicU64::new(0));
        let cancelled = Arc::new(AtomicBool::new(false));
        let task_progress = progress.clone();
        let task_cancelled = cancelled.clone();

        let handle = tokio::spawn(async move {
            self.run_pull_plan(local_metadata, plan, &task_progress, &task_cancelled)
                .await
        });

        Ok(Box::new(EngineJob {
            handle,
            total_size,
            progress,
            cancelled,
        }))
    }

    /// Spawns a push as a cancellable background job. See `pull_async` for
    /// the progress-granularity caveat.
    pub async fn push_async(self: Arc<Self>) -> Result<Box<dyn SyncJob>, SyncError> {
        let local_metadata = self.store.metadata_get()?;
        let inventory = inventory::inspect(self.store.dir())?;
        let plan = plan_push(
            &self.store,
            &local_metadata,
            &inventory,
            self.diff_engine.as_ref(),
            UPLOAD_CHUNK_SIZE,
        )?;
        let total_size = plan.added.iter().map(|a| a.file.size).sum::<u64>()
            + plan
                .updated
                .iter()
                .map(|u| u.diff.as_ref().map_or(u.file.size, |d| d.size))
                .sum::<u64>();

        let progress = Arc::new(AtomicU64::new(0));
        let cancelled = Arc::new(AtomicBool::new(false));
        let task_progress = progress.clone();
        let task_cancelled = cancelled.clone();

        let handle = tokio::spawn(async move {
            self.run_push_plan(plan, &task_progress, &task_cancelled)
                .await
                .map(|_version| ())
        });

        Ok(Box::new(EngineJob {
            handle,
            total_size,
            progress,
            cancelled,
        }))
    }

    async fn run_pull(&self, progress: &Arc<AtomicU64>) -> Result<PullOutcome, SyncError> {
        let local_metadata = self.store.metadata_get()?;
        let server_files = self.transport.server_inventory(&self.project_name).await?;
        let plan = plan_pull(
            &local_metadata,
            &server_files,
            self.diff_engine_available(),
            self.config.diffs_limit_size,
        );
        let cancelled = Arc::new(AtomicBool::new(false));
        self.run_pull_plan_inner(local_metadata, plan, progress, &cancelled)
            .await
    }

    async fn run_push(&self, progress: &Arc<AtomicU64>) -> Result<ProjectVersion, SyncError> {
        let local_metadata = self.store.metadata_get()?;
        let inventory = inventory::inspect(self.store.dir())?;
        let plan = plan_push(
            &self.store,
            &local_metadata,
            &inventory,
            self.diff_engine.as_ref(),
            UPLOAD_CHUNK_SIZE,
        )?;
        let cancelled = Arc::new(AtomicBool::new(false));
        self.run_push_plan_inner(plan, progress, &cancelled).await
    }

    async fn run_pull_plan_inner(
        &self,
        local_metadata: ProjectMetadata,
        plan: PullPlan,
        progress: &Arc<AtomicU64>,
        cancelled: &Arc<AtomicBool>,
    ) -> Result<PullOutcome, SyncError> {
        let temp_dir = tempfile::tempdir().map_err(|source| {
            SyncError::Filesystem(file_util::PathError {
                path: std::env::temp_dir(),
                source,
            })
        })?;

        for f in &plan.added {
            if cancelled.load(Ordering::Relaxed) {
                return Err(SyncError::Transport("pull cancelled".to_owned()));
            }
            let dest = temp_dir.path().join(&f.path);
            ensure_parent(&dest)?;
            self.transport.fetch(&f.path, &dest).await?;
            progress.fetch_add(f.size, Ordering::Relaxed);
        }

        for (idx, u) in plan.updated.iter().enumerate() {
            if cancelled.load(Ordering::Relaxed) {
                return Err(SyncError::Transport("pull cancelled".to_owned()));
            }
            let dest = temp_dir.path().join(&u.file.path);
            ensure_parent(&dest)?;
            match &u.diffs {
                None => {
                    self.transport.fetch(&u.file.path, &dest).await?;
                }
                Some(chain) => {
                    let basefile = self.store.meta_path(&u.file.path)?;
                    file_util::copy_file(&basefile, &dest)?;
                    for (chain_idx, diff_server_path) in chain.iter().enumerate() {
                        let diff_dest =
                            temp_dir.path().join(format!("incoming-diff-{idx}-{chain_idx}"));
                        self.transport.fetch(diff_server_path, &diff_dest).await?;
                        self.diff_engine
                            .apply_changeset(&dest, &diff_dest)
                            .map_err(|source| SyncError::DiffFailure {
                                path: u.file.path.clone(),
                                source,
                            })?;
                    }
                }
            }
            progress.fetch_add(u.file.size, Ordering::Relaxed);
        }

        let conflicts = apply_engine::apply_pull(
            &self.store,
            &local_metadata,
            &plan,
            temp_dir.path(),
            self.diff_engine.as_ref(),
        )?;

        let version = self.transport.project_version(&self.project_name).await?;
        let files = apply_plan_to_file_list(local_metadata.files, &plan);
        self.store.metadata_put(&ProjectMetadata {
            name: local_metadata.name,
            version,
            files,
        })?;

        info!(conflict_count = conflicts.len(), %version, "pull complete");
        Ok(PullOutcome { conflicts, version })
    }

    async fn run_push_plan_inner(
        &self,
        plan: PushPlan,
        progress: &Arc<AtomicU64>,
        cancelled: &Arc<AtomicBool>,
    ) -> Result<ProjectVersion, SyncError> {
        for a in &plan.added {
            if cancelled.load(Ordering::Relaxed) {
                return Err(SyncError::Transport("push cancelled".to_owned()));
            }
            let path = self.store.path(&a.file.path)?;
            self.upload_in_chunks(&path, &a.chunks).await?;
            progress.fetch_add(a.file.size, Ordering::Relaxed);
        }

        for u in &plan.updated {
            if cancelled.load(Ordering::Relaxed) {
                return Err(SyncError::Transport("push cancelled".to_owned()));
            }
            let (path, size) = match &u.diff {
                Some(diff) => (self.store.meta_path(&diff.path)?, diff.size),
                None => (self.store.path(&u.file.path)?, u.file.size),
            };
            self.upload_in_chunks(&path, &u.chunks).await?;
            progress.fetch_add(size, Ordering::Relaxed);
        }

        let version = self.transport.finalize_push(&self.project_name).await?;
        apply_engine::apply_push(&self.store, &plan, self.diff_engine.as_ref())?;

        let local_metadata = self.store.metadata_get()?;
        let files = inventory::inspect(self.store.dir())?;
        self.store.metadata_put(&ProjectMetadata {
            name: local_metadata.name,
            version,
            files,
        })?;

        info!(%version, "push complete");
        Ok(version)
    }

    async fn upload_in_chunks(&self, path: &Path, chunk_ids: &[String]) -> Result<(), SyncError> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        use file_util::IoResultExt as _;
        let bytes = std::fs::read(path).context(path)?;
        let chunk_size = (UPLOAD_CHUNK_SIZE as usize).max(1);
        let mut chunks = bytes.chunks(chunk_size);
        for chunk_id in chunk_ids {
            let chunk = chunks.next().unwrap_or(&[]);
            self.transport.upload_chunk(chunk_id, chunk).await?;
        }
        Ok(())
    }
}

fn ensure_parent(path: &Path) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        file_util::create_dir_all(parent)?;
    }
    Ok(())
}

// `tokio::spawn` requires a `'static` future; `pull_async`/`push_async`
// hand the whole `Arc<SyncEngine>` to the spawned task, so these two
// entry points take `self: Arc<Self>` rather than `&self`.
impl SyncEngine {
    async fn run_pull_plan(
        self: Arc<Self>,
        local_metadata: ProjectMetadata,
        plan: PullPlan,
        progress: &Arc<AtomicU64>,
        cancelled: &Arc<AtomicBool>,
    ) -> Result<(), SyncError> {
        self.run_pull_plan_inner(local_metadata, plan, progress, cancelled)
            .await
            .map(|_outcome| ())
    }

    async fn run_push_plan(
        self: Arc<Self>,
        plan: PushPlan,
        progress: &Arc<AtomicU64>,
        cancelled: &Arc<AtomicBool>,
    ) -> Result<ProjectVersion, SyncError> {
        self.run_push_plan_inner(plan, progress, cancelled).await
    }
}

struct EngineJob {
    handle: tokio::task::JoinHandle<Result<(), SyncError>>,
    total_size: u64,
    progress: Arc<AtomicU64>,
    cancelled: Arc<AtomicBool>,
}

#[async_trait]
impl SyncJob for EngineJob {
    fn total_size(&self) -> u64 {
        self.total_size
    }

    fn transferred_size(&self) -> u64 {
        self.progress.load(Ordering::Relaxed)
    }

    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    async fn finalize(self: Box<Self>) -> Result<(), SyncError> {
        match self.handle.await {
            Ok(result) => result,
            Err(join_error) => Err(SyncError::Transport(join_error.to_string())),
        }
    }

    /// Idempotent: flags the background task's cooperative cancellation
    /// check, then aborts it outright. Apply-Pull only ever runs after
    /// every fetch completes, so aborting before that point can never
    /// leave the working tree mutated (§5).
    async fn cancel(self: Box<Self>) -> Result<(), SyncError> {
        self.cancelled.store(true, Ordering::Relaxed);
        self.handle.abort();
        let _ = self.handle.await;
        Ok(())
    }
}
