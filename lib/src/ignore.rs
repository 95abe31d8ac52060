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

//! Ignore rules and the structured-file predicate (§3).

const IGNORE_SUFFIXES: &[&str] = &["-shm", "-wal", "~", "pyc", "swap"];
const IGNORE_NAMES: &[&str] = &[".DS_Store", ".directory"];

/// Extensions the diff engine can interpret as rows. The reference set;
/// only these participate in changeset-based sync (§3).
const STRUCTURED_EXTENSIONS: &[&str] = &[".gpkg", ".sqlite"];

/// Name of the meta directory, never walked by the inventory (§3).
pub const META_DIR_NAME: &str = ".mergin";

/// Splits a bare file name into (stem, extension) the way `os.path.splitext`
/// does: a run of leading dots is never treated as the start of an
/// extension, so `.DS_Store` has no extension at all.
pub(crate) fn splitext(file_name: &str) -> &str {
    let bytes = file_name.as_bytes();
    let Some(dot) = file_name.rfind('.') else {
        return "";
    };
    if bytes[..dot].iter().all(|&b| b == b'.') {
        return "";
    }
    &file_name[dot..]
}

/// Whether a bare file name (no directory components) should be excluded
/// from the inventory entirely. Mirrors the reference implementation: a
/// suffix match is only checked against the file's extension (per
/// `splitext`), never against the whole name, so e.g. `backup~` (no dot) is
/// not ignored but `map.gpkg~` is.
pub fn is_ignored_file_name(file_name: &str) -> bool {
    if IGNORE_NAMES.contains(&file_name) {
        return true;
    }
    let ext = splitext(file_name);
    !ext.is_empty() && IGNORE_SUFFIXES.iter().any(|suffix| ext.ends_with(suffix))
}

/// Whether `path` (a project-relative, forward-slash path) names a
/// structured file eligible for changeset-based sync. Matches the
/// reference implementation's `splitext`-based, case-sensitive check.
pub fn is_structured_file(path: &str) -> bool {
    STRUCTURED_EXTENSIONS.contains(&splitext(path))
}
