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

//! File fingerprints (§3): the unit change detection operates on.

use std::fs::File;
use std::io::Read as _;
use std::path::Path;

use chrono::DateTime;
use chrono::Local;
use serde::Deserialize;
use serde::Serialize;
use sha1::Digest as _;
use sha1::Sha1;

use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;

/// `{ path, checksum, size, mtime }` (§3). `path` is always a forward-slash
/// relative path inside the project, regardless of host platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub path: String,
    /// Lowercase hex-encoded SHA-1 digest.
    pub checksum: String,
    pub size: u64,
    pub mtime: DateTime<Local>,
}

impl FileFingerprint {
    /// Computes a fingerprint for a file already known to exist on disk at
    /// `abs_path`, recorded under the project-relative `path`.
    pub fn from_disk(path: String, abs_path: &Path) -> Result<Self, PathError> {
        let metadata = std::fs::metadata(abs_path).context(abs_path)?;
        let checksum = checksum_file(abs_path)?;
        Ok(Self {
            path,
            checksum,
            size: metadata.len(),
            mtime: metadata.modified().context(abs_path)?.into(),
        })
    }
}

/// Computes a lowercase hex SHA-1 digest of a file's content in a single
/// streaming pass — per §9, files are never loaded whole into memory for
/// hashing.
pub fn checksum_file(path: &Path) -> Result<String, PathError> {
    let mut file = File::open(path).context(path)?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).context(path)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Converts a host path separator convention to the posix separators used
/// in fingerprints and the metadata document.
pub fn to_project_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn checksum_is_stable_across_repeated_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.bin");
        fs::write(&path, b"some content to hash").unwrap();
        let first = checksum_file(&path).unwrap();
        let second = checksum_file(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 40);
    }

    #[test]
    fn checksum_differs_for_different_content() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        fs::write(&a, b"alpha").unwrap();
        fs::write(&b, b"beta").unwrap();
        assert_ne!(checksum_file(&a).unwrap(), checksum_file(&b).unwrap());
    }

    #[test]
    fn to_project_path_uses_forward_slashes() {
        let p = Path::new("a").join("b").join("c.gpkg");
        assert_eq!(to_project_path(&p), "a/b/c.gpkg");
    }
}
