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

//! The push planner (§4.6): computes local changes and, for structured
//! files, derives a changeset against the basefile, assigning chunk
//! identifiers for the transport.

use std::collections::BTreeMap;

use tracing::debug;
use tracing::instrument;
use uuid::Uuid;

use crate::change_detector::Renamed;
use crate::change_detector::compare_file_sets;
use crate::diff_engine::DiffEngine;
use crate::error::SyncError;
use crate::file_util::IoResultExt as _;
use crate::fingerprint::FileFingerprint;
use crate::fingerprint::checksum_file;
use crate::ignore::is_structured_file;
use crate::metadata::ProjectMetadata;
use crate::project_store::ProjectStore;

/// A changed structured file, carrying the changeset against its basefile
/// when one was successfully derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushUpdated {
    pub file: FileFingerprint,
    pub origin_checksum: String,
    pub chunks: Vec<String>,
    pub diff: Option<FileFingerprint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushAdded {
    pub file: FileFingerprint,
    pub chunks: Vec<String>,
}

/// The result of [`plan_push`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushPlan {
    pub added: Vec<PushAdded>,
    pub removed: Vec<FileFingerprint>,
    pub updated: Vec<PushUpdated>,
    pub renamed: Vec<Renamed>,
}

fn allocate_chunks(size: u64, chunk_size: u64) -> Vec<String> {
    let count = size.div_ceil(chunk_size.max(1));
    (0..count).map(|_| Uuid::new_v4().to_string()).collect()
}

/// Computes the push plan for `inventory` against `local_metadata`,
/// deriving changesets for structured files against their basefiles when
/// the diff engine is available.
///
/// A `create_changeset` failure falls back to a full-file upload of that
/// entry (§7: `DiffFailure` during push planning is recovered, not
/// propagated). A successful changeset with no actual row-level change
/// drops the entry from `updated` entirely.
#[instrument(skip(store, local_metadata, inventory, diff_engine))]
pub fn plan_push(
    store: &ProjectStore,
    local_metadata: &ProjectMetadata,
    inventory: &[FileFingerprint],
    diff_engine: &dyn DiffEngine,
    chunk_size: u64,
) -> Result<PushPlan, SyncError> {
    let changes = compare_file_sets(&local_metadata.files, inventory);

    let added: Vec<PushAdded> = changes
        .added
        .into_iter()
        .map(|file| PushAdded {
            chunks: allocate_chunks(file.size, chunk_size),
            file,
        })
        .collect();

    let mut updated: Vec<PushUpdated> = changes
        .updated
        .into_iter()
        .map(|u| PushUpdated {
            chunks: allocate_chunks(u.file.size, chunk_size),
            file: u.file,
            origin_checksum: u.origin_checksum,
            diff: None,
        })
        .collect();

    if diff_engine.available() {
        let mut kept = Vec::with_capacity(updated.len());
        for mut entry in updated {
            if !is_structured_file(&entry.file.path) {
                kept.push(entry);
                continue;
            }

            let basefile = store.meta_path(&entry.file.path)?;
            let current_file = store.path(&entry.file.path)?;
            let diff_name = format!("{}-diff-{}", entry.file.path, Uuid::new_v4());
            let diff_path = store.meta_path(&diff_name)?;

            if diff_engine
                .create_changeset(&basefile, &current_file, &diff_path)
                .is_err()
            {
                debug!(path = %entry.file.path, "changeset creation failed, falling back to full upload");
                kept.push(entry);
                continue;
            }

            match diff_engine.has_changes(&diff_path) {
                Ok(true) => {
                    let diff_size = std::fs::metadata(&diff_path).context(&diff_path)?.len();
                    let diff_checksum = checksum_file(&diff_path)?;
                    let diff_mtime = std::fs::metadata(&diff_path)
                        .context(&diff_path)?
                        .modified()
                        .context(&diff_path)?
                        .into();
                    entry.file.checksum = entry.origin_checksum.clone();
                    entry.file.mtime = std::fs::metadata(&current_file)
                        .context(&current_file)?
                        .modified()
                        .context(&current_file)?
                        .into();
                    entry.chunks = allocate_chunks(diff_size, chunk_size);
                    entry.diff = Some(FileFingerprint {
                        path: diff_name,
                        checksum: diff_checksum,
                        size: diff_size,
                        mtime: diff_mtime,
                    });
                    kept.push(entry);
                }
                Ok(false) => {
                    debug!(path = %entry.file.path, "changeset has no row-level changes, dropping from push plan");
                }
                Err(_) => {
                    debug!(path = %entry.file.path, "changes inspection failed, falling back to full upload");
                    kept.push(entry);
                }
            }
        }
        updated = kept;
    }

    Ok(PushPlan {
        added,
        removed: changes.removed,
        updated,
        renamed: changes.renamed,
    })
}

/// Surfaces `list_changes_summary` for every pushable structured change as
/// a per-path JSON summary (§11). A file whose summary cannot be produced
/// is omitted rather than failing the whole operation (§7).
pub fn summarize_push(
    store: &ProjectStore,
    plan: &PushPlan,
    diff_engine: &dyn DiffEngine,
) -> Result<BTreeMap<String, serde_json::Value>, SyncError> {
    let mut summaries = BTreeMap::new();
    for (idx, entry) in plan.updated.iter().enumerate() {
        let Some(diff) = &entry.diff else {
            continue;
        };
        let changeset = store.meta_path(&diff.path)?;
        let result_path = store.meta_path(&format!("change_list{idx}"))?;
        if diff_engine
            .list_changes_summary(&changeset, &result_path)
            .is_err()
        {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&result_path) else {
            continue;
        };
        if let Ok(value) = serde_json::from_str(&content) {
            summaries.insert(entry.file.path.clone(), value);
        }
        let _ = std::fs::remove_file(&result_path);
    }
    Ok(summaries)
}
