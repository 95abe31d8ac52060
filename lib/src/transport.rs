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

//! The transport boundary (§5, §6): everything HTTP, authentication, and
//! chunk-transfer-orchestration-specific is deliberately out of scope —
//! this module only states the *contract* the sync engine needs from
//! whatever carries bytes to and from the server.
//!
//! Implementations may dispatch chunk transfers however they like
//! (parallel, retried, rate-limited); the apply engine only ever consumes
//! the completed set after [`Transport::finalize`] resolves.

use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;

use crate::error::SyncError;
use crate::metadata::ServerFile;
use crate::version::ProjectVersion;

/// Everything the sync engine needs from the network/server side.
///
/// A `renamed` pull-plan entry's basefile handling assumes the transport
/// has already positioned the prior basefile content at
/// `temp_dir/<old_path>` before [`apply_engine::apply_pull`] runs (§9's
/// open question on this point is resolved by making it an explicit part
/// of this contract).
///
/// [`apply_engine::apply_pull`]: crate::apply_engine::apply_pull
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Server-side file inventory for `project`, including per-file
    /// version history for structured files.
    async fn server_inventory(&self, project: &str) -> Result<Vec<ServerFile>, SyncError>;

    /// Downloads the full content of a server file or changeset at
    /// `server_path` into `dest`.
    async fn fetch(&self, server_path: &str, dest: &Path) -> Result<(), SyncError>;

    /// The project's current version on the server, independent of any
    /// single file's history (§6's `"version": "v<N>"` on the metadata
    /// document).
    async fn project_version(&self, project: &str) -> Result<ProjectVersion, SyncError>;

    /// Uploads one chunk's bytes, identified by a chunk id allocated by
    /// the push planner.
    async fn upload_chunk(&self, chunk_id: &str, data: &[u8]) -> Result<(), SyncError>;

    /// Finalizes a push transaction, returning the new server version.
    async fn finalize_push(&self, project: &str) -> Result<ProjectVersion, SyncError>;
}

/// Progress/control surface for an asynchronous pull or push (§5, §6).
/// `transferred_size` is monotonically non-decreasing against a fixed
/// `total_size`; `cancel` is idempotent and must unwind any partially
/// transferred state without ever mutating the working tree (working-tree
/// mutation happens only in Apply-Pull, which runs after `finalize`).
#[async_trait]
pub trait SyncJob: Send + Sync {
    /// Total bytes this job will transfer, fixed at job creation.
    fn total_size(&self) -> u64;

    /// Bytes transferred so far. Never decreases.
    fn transferred_size(&self) -> u64;

    /// Whether the job is still in flight.
    fn is_running(&self) -> bool;

    /// Awaits completion and releases the job's temp directory, returning
    /// the directory containing downloaded content (for a pull) or the
    /// accepted server version (for a push's finalize step).
    async fn finalize(self: Box<Self>) -> Result<(), SyncError>;

    /// Idempotently aborts the job: stops in-flight chunk transfers and
    /// removes the job's temp directory. Never touches the working tree.
    async fn cancel(self: Box<Self>) -> Result<(), SyncError>;
}
