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

//! The project store (§4.1): on-disk layout, path resolution, and atomic
//! moves. Every mutation to `<project>/` and `<project>/.mergin` routes
//! through here.

use std::path::Path;
use std::path::PathBuf;

use tracing::instrument;

use crate::error::SyncError;
use crate::file_util;
use crate::ignore::META_DIR_NAME;
use crate::metadata::ProjectMetadata;

const METADATA_FILE_NAME: &str = "mergin.json";

/// A validated handle onto a project directory and its `.mergin` meta
/// directory.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    dir: PathBuf,
    meta_dir: PathBuf,
}

impl ProjectStore {
    /// Validates that `dir` exists and ensures `<dir>/.mergin` exists,
    /// creating it if absent.
    #[instrument(skip(dir), fields(dir = %dir.as_ref().display()))]
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SyncError> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Err(SyncError::InvalidProject {
                path: dir.to_path_buf(),
                reason: "project directory does not exist".to_owned(),
            });
        }
        let dir = dir
            .canonicalize()
            .map_err(|source| SyncError::Filesystem(file_util::PathError {
                path: dir.to_path_buf(),
                source,
            }))?;
        let meta_dir = dir.join(META_DIR_NAME);
        file_util::create_dir_all(&meta_dir)?;
        Ok(Self { dir, meta_dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn meta_dir(&self) -> &Path {
        &self.meta_dir
    }

    /// Absolute path of a project-relative file in the working tree,
    /// creating its parent directories.
    pub fn path(&self, rel: &str) -> Result<PathBuf, SyncError> {
        Self::resolve(&self.dir, rel)
    }

    /// Absolute path of a project-relative file mirrored under `.mergin`
    /// (a basefile, or a transient changeset/backup).
    pub fn meta_path(&self, rel: &str) -> Result<PathBuf, SyncError> {
        Self::resolve(&self.meta_dir, rel)
    }

    fn resolve(root: &Path, rel: &str) -> Result<PathBuf, SyncError> {
        let abs_path = root.join(rel);
        if let Some(parent) = abs_path.parent() {
            file_util::create_dir_all(parent)?;
        }
        Ok(abs_path)
    }

    /// Reads `<meta>/mergin.json`. Fails with `InvalidProject` if it is
    /// absent: metadata is only ever written at the end of a completed
    /// Apply, so its absence means the project was never synced.
    pub fn metadata_get(&self) -> Result<ProjectMetadata, SyncError> {
        let path = self.meta_dir.join(METADATA_FILE_NAME);
        let content =
            std::fs::read_to_string(&path).map_err(|_| SyncError::InvalidProject {
                path: self.dir.clone(),
                reason: "project metadata has not been created yet".to_owned(),
            })?;
        serde_json::from_str(&content).map_err(|error| SyncError::InvalidProject {
            path: self.dir.clone(),
            reason: format!("metadata document is malformed: {error}"),
        })
    }

    /// Writes `<meta>/mergin.json`, replacing any prior content.
    #[instrument(skip(self, metadata))]
    pub fn metadata_put(&self, metadata: &ProjectMetadata) -> Result<(), SyncError> {
        use std::io::Write as _;

        let path = self.meta_dir.join(METADATA_FILE_NAME);
        let json = serde_json::to_string_pretty(metadata).expect("metadata serializes");
        let mut temp_file =
            tempfile::NamedTempFile::new_in(&self.meta_dir).map_err(|source| {
                SyncError::Filesystem(file_util::PathError {
                    path: self.meta_dir.clone(),
                    source,
                })
            })?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|source| SyncError::Filesystem(file_util::PathError {
                path: path.clone(),
                source,
            }))?;
        file_util::persist_temp_file(temp_file, &path).map_err(|source| {
            SyncError::Filesystem(file_util::PathError { path, source })
        })
    }

    /// Moves `src` to `dst`, falling back to copy+delete across devices.
    pub fn move_file(&self, src: &Path, dst: &Path) -> Result<(), SyncError> {
        file_util::rename_or_copy(src, dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_meta_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        assert!(store.meta_dir().is_dir());
    }

    #[test]
    fn open_rejects_missing_directory() {
        let err = ProjectStore::open("/nonexistent/does/not/exist").unwrap_err();
        assert!(matches!(err, SyncError::InvalidProject { .. }));
    }

    #[test]
    fn metadata_get_fails_before_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.metadata_get(),
            Err(SyncError::InvalidProject { .. })
        ));
    }

    #[test]
    fn metadata_round_trips_through_put_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let metadata = ProjectMetadata::new("team/project");
        store.metadata_put(&metadata).unwrap();
        assert_eq!(store.metadata_get().unwrap(), metadata);
    }

    #[test]
    fn path_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        let resolved = store.path("nested/dir/file.txt").unwrap();
        assert!(resolved.parent().unwrap().is_dir());
    }
}
