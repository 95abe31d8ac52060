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

//! Low-level filesystem helpers shared by the project store, inventory, and
//! apply engine. Nothing here knows about project semantics.

use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use tempfile::NamedTempFile;
use tempfile::PersistError;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("cannot access {path}")]
pub struct PathError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

pub trait IoResultExt<T> {
    fn context(self, path: impl AsRef<Path>) -> Result<T, PathError>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn context(self, path: impl AsRef<Path>) -> Result<T, PathError> {
        self.map_err(|error| PathError {
            path: path.as_ref().to_path_buf(),
            source: error,
        })
    }
}

/// Creates a directory and all missing parents, tolerating one that already
/// exists.
pub fn create_dir_all(dirname: &Path) -> Result<(), PathError> {
    match fs::create_dir_all(dirname) {
        Ok(()) => Ok(()),
        Err(_) if dirname.is_dir() => Ok(()),
        Err(e) => Err(e).context(dirname),
    }
}

/// Persists the temporary file after synchronizing its content to disk.
///
/// See <https://lwn.net/Articles/457667/> for why `sync_data` before
/// `persist` is needed to avoid a crash losing the renamed file's content.
pub fn persist_temp_file<P: AsRef<Path>>(temp_file: NamedTempFile, new_path: P) -> io::Result<()> {
    temp_file.as_file().sync_data()?;
    temp_file
        .persist(new_path)
        .map(|_file| ())
        .map_err(|PersistError { error, file: _ }| error)
}

/// Renames `src` to `dst`, falling back to copy-then-delete when the two
/// paths live on different filesystems (`rename(2)` returns `EXDEV`).
///
/// This is the only supported way to move a file inside a project: the
/// project store never assumes `.mergin` and the working tree share a
/// device.
pub fn rename_or_copy(src: &Path, dst: &Path) -> Result<(), PathError> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(src, dst).context(dst)?;
            fs::remove_file(src).context(src)?;
            Ok(())
        }
    }
}

/// Copies `src` over `dst`, creating `dst`'s parent directories first.
pub fn copy_file(src: &Path, dst: &Path) -> Result<(), PathError> {
    if let Some(parent) = dst.parent() {
        create_dir_all(parent)?;
    }
    fs::copy(src, dst).context(dst)?;
    Ok(())
}

/// Removes a file if present; missing files are not an error.
pub fn remove_file_if_exists(path: &Path) -> Result<(), PathError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context(path),
    }
}
