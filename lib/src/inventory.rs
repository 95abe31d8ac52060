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

//! File inventory (§4.2): a recursive, ignore-aware walk of the working
//! directory into fingerprints.

use std::path::Path;

use tracing::instrument;

use crate::file_util::PathError;
use crate::fingerprint::FileFingerprint;
use crate::fingerprint::to_project_path;
use crate::ignore::META_DIR_NAME;
use crate::ignore::is_ignored_file_name;

/// Walks `root`, skipping the meta directory subtree and any file
/// [`is_ignored_file_name`] excludes, and fingerprints everything left.
///
/// Re-running on an unchanged tree produces the same set of fingerprints
/// (modulo ordering): ordering here follows readdir order, which is not
/// itself stable, so callers that need a stable order should sort by path.
#[instrument(skip(root), fields(root = %root.display()))]
pub fn inspect(root: &Path) -> Result<Vec<FileFingerprint>, PathError> {
    let mut out = Vec::new();
    walk(root, root, &mut out)?;
    Ok(out)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<FileFingerprint>) -> Result<(), PathError> {
    use crate::file_util::IoResultExt as _;

    let entries = std::fs::read_dir(dir).context(dir)?;
    for entry in entries {
        let entry = entry.context(dir)?;
        let file_type = entry.file_type().context(entry.path())?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if file_type.is_dir() {
            if name == META_DIR_NAME {
                continue;
            }
            walk(root, &entry.path(), out)?;
            continue;
        }

        if !file_type.is_file() {
            // Symlinks and other special entries are not part of the
            // project inventory.
            continue;
        }

        if is_ignored_file_name(&name) {
            continue;
        }

        let abs_path = entry.path();
        let relative = abs_path
            .strip_prefix(root)
            .expect("walked path is under root");
        out.push(FileFingerprint::from_disk(
            to_project_path(relative),
            &abs_path,
        )?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn sorted_paths(mut files: Vec<FileFingerprint>) -> Vec<String> {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.into_iter().map(|f| f.path).collect()
    }

    #[test]
    fn walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.gpkg"), b"b").unwrap();

        let files = inspect(dir.path()).unwrap();
        assert_eq!(sorted_paths(files), vec!["a.txt", "sub/b.gpkg"]);
    }

    #[test]
    fn skips_meta_directory_and_ignored_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(META_DIR_NAME)).unwrap();
        fs::write(dir.path().join(META_DIR_NAME).join("mergin.json"), b"{}").unwrap();
        fs::write(dir.path().join(".DS_Store"), b"junk").unwrap();
        fs::write(dir.path().join("data.gpkg-wal"), b"wal").unwrap();
        fs::write(dir.path().join("keep.gpkg"), b"keep").unwrap();

        let files = inspect(dir.path()).unwrap();
        assert_eq!(sorted_paths(files), vec!["keep.gpkg"]);
    }

    #[test]
    fn rerunning_on_unchanged_tree_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.gpkg"), b"b").unwrap();

        let first = sorted_paths(inspect(dir.path()).unwrap());
        let second = sorted_paths(inspect(dir.path()).unwrap());
        assert_eq!(first, second);
    }
}
