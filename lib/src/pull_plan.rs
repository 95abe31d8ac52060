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

//! The pull planner (§4.5): turns a server inventory plus local metadata
//! into a concrete plan of full-file fetches vs. changeset chains.

use std::collections::HashMap;

use tracing::debug;
use tracing::instrument;

use crate::change_detector::Renamed;
use crate::change_detector::compare_file_sets;
use crate::fingerprint::FileFingerprint;
use crate::ignore::is_structured_file;
use crate::metadata::ProjectMetadata;
use crate::metadata::ServerFile;
use crate::version::ProjectVersion;

/// An `updated` entry in a pull plan. `diffs`, when present, names the
/// changeset files to apply in order to reconstruct the file; when absent
/// the file must be fetched in full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullUpdated {
    pub file: FileFingerprint,
    pub origin_checksum: String,
    pub diffs: Option<Vec<String>>,
}

/// The result of [`plan_pull`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullPlan {
    pub added: Vec<FileFingerprint>,
    pub removed: Vec<FileFingerprint>,
    pub updated: Vec<PullUpdated>,
    pub renamed: Vec<Renamed>,
}

/// Computes the pull plan against `server_files` (each carrying its
/// per-version history) given the locally recorded metadata.
///
/// When `diff_engine_available` is false, the change set is returned
/// verbatim (every `updated` entry will be fetched in full — `diffs` is
/// always `None`).
#[instrument(skip(local_metadata, server_files), fields(server_file_count = server_files.len()))]
pub fn plan_pull(
    local_metadata: &ProjectMetadata,
    server_files: &[ServerFile],
    diff_engine_available: bool,
    diffs_limit_size: u64,
) -> PullPlan {
    let current: Vec<FileFingerprint> = server_files
        .iter()
        .map(|f| f.fingerprint.clone())
        .collect();
    let changes = compare_file_sets(&local_metadata.files, &current);

    if !diff_engine_available {
        return PullPlan {
            added: changes.added,
            removed: changes.removed,
            renamed: changes.renamed,
            updated: changes
                .updated
                .into_iter()
                .map(|u| PullUpdated {
                    file: u.file,
                    origin_checksum: u.origin_checksum,
                    diffs: None,
                })
                .collect(),
        };
    }

    let server_by_path: HashMap<&str, &ServerFile> =
        server_files.iter().map(|f| (f.fingerprint.path.as_str(), f)).collect();

    let mut updated = Vec::with_capacity(changes.updated.len());
    for change in changes.updated {
        let Some(server_file) = server_by_path.get(change.file.path.as_str()) else {
            updated.push(PullUpdated {
                file: change.file,
                origin_checksum: change.origin_checksum,
                diffs: None,
            });
            continue;
        };

        if !is_structured_file(&change.file.path) {
            updated.push(PullUpdated {
                file: change.file,
                origin_checksum: change.origin_checksum,
                diffs: None,
            });
            continue;
        }

        let mut diffs: Vec<String> = Vec::new();
        let mut diffs_size: u64 = 0;
        let mut saw_later_entry = false;
        for (version, entry) in &server_file.history {
            if *version <= local_metadata.version {
                continue;
            }
            saw_later_entry = true;
            match &entry.diff {
                Some(diff_ref) => {
                    diffs.push(diff_ref.path.clone());
                    diffs_size += diff_ref.size;
                }
                None => {
                    debug!(path = %change.file.path, %version, "force update in history, discarding diff chain");
                    diffs.clear();
                    break;
                }
            }
        }

        if !saw_later_entry {
            // No history entry beyond the local version: this file has not
            // actually changed for this client.
            continue;
        }

        let use_diffs = !diffs.is_empty()
            && change.file.size > diffs_limit_size
            && diffs_size < change.file.size / 2;

        updated.push(PullUpdated {
            file: change.file,
            origin_checksum: change.origin_checksum,
            diffs: if use_diffs { Some(diffs) } else { None },
        });
    }

    PullPlan {
        added: changes.added,
        removed: changes.removed,
        renamed: changes.renamed,
        updated,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Local;

    use super::*;
    use crate::metadata::DiffRef;
    use crate::metadata::HistoryEntry;

    fn fingerprint(path: &str, checksum: &str, size: u64) -> FileFingerprint {
        FileFingerprint {
            path: path.to_owned(),
            checksum: checksum.to_owned(),
            size,
            mtime: Local::now(),
        }
    }

    fn local_metadata(version: u64, files: Vec<FileFingerprint>) -> ProjectMetadata {
        ProjectMetadata {
            name: "team/project".to_owned(),
            version: ProjectVersion(version),
            files,
        }
    }

    #[test]
    fn diff_engine_unavailable_returns_full_file_updates() {
        let local = local_metadata(1, vec![fingerprint("data.gpkg", "aaa", 20_000_000)]);
        let server = vec![ServerFile {
            fingerprint: fingerprint("data.gpkg", "bbb", 20_000_000),
            history: BTreeMap::new(),
        }];
        let plan = plan_pull(&local, &server, false, 1_048_576);
        assert_eq!(plan.updated.len(), 1);
        assert!(plan.updated[0].diffs.is_none());
    }

    #[test]
    fn chooses_diffs_when_small_relative_to_file_size() {
        let local = local_metadata(1, vec![fingerprint("data.gpkg", "aaa", 10 * 1024 * 1024)]);
        let mut history = BTreeMap::new();
        history.insert(
            ProjectVersion(2),
            HistoryEntry {
                diff: Some(DiffRef {
                    path: "data.gpkg-diff-2".to_owned(),
                    checksum: "d2".to_owned(),
                    size: 1 * 1024 * 1024,
                }),
            },
        );
        history.insert(
            ProjectVersion(3),
            HistoryEntry {
                diff: Some(DiffRef {
                    path: "data.gpkg-diff-3".to_owned(),
                    checksum: "d3".to_owned(),
                    size: 2 * 1024 * 1024,
                }),
            },
        );
        let server = vec![ServerFile {
            fingerprint: fingerprint("data.gpkg", "bbb", 10 * 1024 * 1024),
            history,
        }];
        let plan = plan_pull(&local, &server, true, 1_048_576);
        assert_eq!(plan.updated.len(), 1);
        let diffs = plan.updated[0].diffs.as_ref().unwrap();
        assert_eq!(diffs, &vec!["data.gpkg-diff-2".to_owned(), "data.gpkg-diff-3".to_owned()]);
    }

    #[test]
    fn chooses_full_file_when_diffs_are_not_small_enough() {
        let local = local_metadata(1, vec![fingerprint("data.gpkg", "aaa", 10 * 1024 * 1024)]);
        let mut history = BTreeMap::new();
        history.insert(
            ProjectVersion(2),
            HistoryEntry {
                diff: Some(DiffRef {
                    path: "data.gpkg-diff-2".to_owned(),
                    checksum: "d2".to_owned(),
                    size: 6 * 1024 * 1024,
                }),
            },
        );
        let server = vec![ServerFile {
            fingerprint: fingerprint("data.gpkg", "bbb", 10 * 1024 * 1024),
            history,
        }];
        let plan = plan_pull(&local, &server, true, 1_048_576);
        assert_eq!(plan.updated.len(), 1);
        assert!(plan.updated[0].diffs.is_none());
    }

    #[test]
    fn force_update_in_history_discards_diffs_and_fetches_full() {
        let local = local_metadata(1, vec![fingerprint("layer.gpkg", "aaa", 5_000_000)]);
        let mut history = BTreeMap::new();
        history.insert(
            ProjectVersion(2),
            HistoryEntry {
                diff: Some(DiffRef {
                    path: "layer.gpkg-diff-2".to_owned(),
                    checksum: "d2".to_owned(),
                    size: 1,
                }),
            },
        );
        history.insert(ProjectVersion(3), HistoryEntry { diff: None });
        let server = vec![ServerFile {
            fingerprint: fingerprint("layer.gpkg", "bbb", 5_000_000),
            history,
        }];
        let plan = plan_pull(&local, &server, true, 1_048_576);
        assert_eq!(plan.updated.len(), 1);
        assert!(plan.updated[0].diffs.is_none());
    }

    #[test]
    fn no_later_history_entries_drops_the_file_from_updated() {
        // Checksum differs (so compare_file_sets sees an update), but the
        // history map has nothing beyond the local version: stale metadata
        // rather than a real change for this client.
        let local = local_metadata(5, vec![fingerprint("layer.gpkg", "aaa", 5_000_000)]);
        let mut history = BTreeMap::new();
        history.insert(
            ProjectVersion(2),
            HistoryEntry {
                diff: Some(DiffRef {
                    path: "layer.gpkg-diff-2".to_owned(),
                    checksum: "d2".to_owned(),
                    size: 1,
                }),
            },
        );
        let server = vec![ServerFile {
            fingerprint: fingerprint("layer.gpkg", "bbb", 5_000_000),
            history,
        }];
        let plan = plan_pull(&local, &server, true, 1_048_576);
        assert!(plan.updated.is_empty());
    }

    #[test]
    fn non_structured_file_is_always_a_full_update() {
        let local = local_metadata(1, vec![fingerprint("notes.txt", "aaa", 5_000_000)]);
        let server = vec![ServerFile {
            fingerprint: fingerprint("notes.txt", "bbb", 5_000_000),
            history: BTreeMap::new(),
        }];
        let plan = plan_pull(&local, &server, true, 1_048_576);
        assert_eq!(plan.updated.len(), 1);
        assert!(plan.updated[0].diffs.is_none());
    }
}
