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

//! Change detection (§4.4): diffing two fingerprint sets by path and
//! checksum.

use std::collections::HashSet;

use crate::fingerprint::FileFingerprint;

/// A file present in `current` but absent (by path) from `origin`.
pub type Added = FileFingerprint;

/// A file present in `origin` but absent (by path) from `current`.
pub type Removed = FileFingerprint;

/// A file whose content changed between `origin` and `current`, carrying the
/// checksum it had in `origin` so callers can address the prior version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Updated {
    pub file: FileFingerprint,
    pub origin_checksum: String,
}

/// A file whose path changed but whose content (checksum and size) did not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renamed {
    pub origin: FileFingerprint,
    pub new_path: String,
}

/// The result of [`compare_file_sets`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<Added>,
    pub removed: Vec<Removed>,
    pub updated: Vec<Updated>,
    pub renamed: Vec<Renamed>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.updated.is_empty()
            && self.renamed.is_empty()
    }
}

/// Compares two fingerprint sets and classifies every difference as an add,
/// a remove, an update, or a rename.
///
/// Rename detection is a first-match-wins scan: a removed file is paired
/// with the first still-unmatched current file sharing its checksum and
/// size, in `current`'s iteration order. This mirrors the reference
/// behavior exactly, including its one quirk: if two removed files could
/// both match the same added file, only the first removed file (in
/// `origin`'s order) claims it.
pub fn compare_file_sets(origin: &[FileFingerprint], current: &[FileFingerprint]) -> ChangeSet {
    let current_paths: std::collections::HashMap<&str, &FileFingerprint> =
        current.iter().map(|f| (f.path.as_str(), f)).collect();
    let origin_paths: std::collections::HashMap<&str, &FileFingerprint> =
        origin.iter().map(|f| (f.path.as_str(), f)).collect();

    let removed: Vec<&FileFingerprint> = origin
        .iter()
        .filter(|f| !current_paths.contains_key(f.path.as_str()))
        .collect();

    let mut added: Vec<&FileFingerprint> = current
        .iter()
        .filter(|f| !origin_paths.contains_key(f.path.as_str()))
        .collect();

    let mut claimed_new_paths: HashSet<&str> = HashSet::new();
    let mut renamed = Vec::new();
    for rf in &removed {
        let candidate = current.iter().find(|f| {
            f.checksum == rf.checksum
                && f.size == rf.size
                && !claimed_new_paths.contains(f.path.as_str())
        });
        if let Some(matched) = candidate {
            claimed_new_paths.insert(matched.path.as_str());
            renamed.push(Renamed {
                origin: (*rf).clone(),
                new_path: matched.path.clone(),
            });
        }
    }

    added.retain(|f| !claimed_new_paths.contains(f.path.as_str()));
    let removed: Vec<FileFingerprint> = removed
        .into_iter()
        .filter(|f| !renamed.iter().any(|r| r.origin.path == f.path))
        .cloned()
        .collect();

    let updated = current
        .iter()
        .filter_map(|f| {
            let origin_file = origin_paths.get(f.path.as_str())?;
            if f.checksum == origin_file.checksum {
                return None;
            }
            Some(Updated {
                file: f.clone(),
                origin_checksum: origin_file.checksum.clone(),
            })
        })
        .collect();

    ChangeSet {
        added: added.into_iter().cloned().collect(),
        removed,
        updated,
        renamed,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Local;

    use super::*;

    fn file(path: &str, checksum: &str, size: u64) -> FileFingerprint {
        FileFingerprint {
            path: path.to_owned(),
            checksum: checksum.to_owned(),
            size,
            mtime: Local::now(),
        }
    }

    #[test]
    fn detects_added_and_removed() {
        let origin = vec![file("base.gpkg", "aaa", 100)];
        let current = vec![file("test.qgs", "bbb", 200)];

        let changes = compare_file_sets(&origin, &current);
        assert_eq!(changes.added, vec![file("test.qgs", "bbb", 200)]);
        assert_eq!(changes.removed, vec![file("base.gpkg", "aaa", 100)]);
        assert!(changes.renamed.is_empty());
        assert!(changes.updated.is_empty());
    }

    #[test]
    fn detects_rename_by_matching_checksum_and_size() {
        let origin = vec![file("old/name.gpkg", "aaa", 100)];
        let current = vec![file("new/name.gpkg", "aaa", 100)];

        let changes = compare_file_sets(&origin, &current);
        assert!(changes.added.is_empty());
        assert!(changes.removed.is_empty());
        assert_eq!(changes.renamed.len(), 1);
        assert_eq!(changes.renamed[0].new_path, "new/name.gpkg");
        assert_eq!(changes.renamed[0].origin.path, "old/name.gpkg");
    }

    #[test]
    fn detects_updated_with_origin_checksum() {
        let origin = vec![file("data.gpkg", "aaa", 100)];
        let current = vec![file("data.gpkg", "bbb", 120)];

        let changes = compare_file_sets(&origin, &current);
        assert_eq!(changes.updated.len(), 1);
        assert_eq!(changes.updated[0].origin_checksum, "aaa");
        assert_eq!(changes.updated[0].file.checksum, "bbb");
    }

    #[test]
    fn unchanged_files_produce_no_changes() {
        let origin = vec![file("data.gpkg", "aaa", 100)];
        let current = vec![file("data.gpkg", "aaa", 100)];
        assert!(compare_file_sets(&origin, &current).is_empty());
    }

    #[test]
    fn rename_match_is_first_match_wins_and_does_not_double_claim() {
        // Two removed files share a checksum/size with a single current
        // file: only the first (origin order) claims the rename, the other
        // is reported as a plain removal.
        let origin = vec![file("a.gpkg", "same", 10), file("b.gpkg", "same", 10)];
        let current = vec![file("c.gpkg", "same", 10)];

        let changes = compare_file_sets(&origin, &current);
        assert_eq!(changes.renamed.len(), 1);
        assert_eq!(changes.renamed[0].origin.path, "a.gpkg");
        assert_eq!(changes.removed.len(), 1);
        assert_eq!(changes.removed[0].path, "b.gpkg");
    }
}
