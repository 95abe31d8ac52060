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

//! The project metadata document (§3, §6): `<meta>/mergin.json`.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::fingerprint::FileFingerprint;
use crate::version::ProjectVersion;

/// A single entry in a structured file's server-side history: either a
/// changeset since the previous version, or a forced full replacement
/// (no `diff` field) that invalidates any diff chain built so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffRef>,
}

impl HistoryEntry {
    pub fn is_force_update(&self) -> bool {
        self.diff.is_none()
    }
}

/// A reference to a changeset file on the server, as carried in file
/// history and in push-plan `updated` entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRef {
    pub path: String,
    pub checksum: String,
    pub size: u64,
}

/// A server-reported file, with its full version history keyed by version
/// token (`v<N>`). Only structured files carry non-empty history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFile {
    #[serde(flatten)]
    pub fingerprint: FileFingerprint,
    #[serde(default)]
    pub history: BTreeMap<ProjectVersion, HistoryEntry>,
}

/// The persisted project metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub name: String,
    pub version: ProjectVersion,
    pub files: Vec<FileFingerprint>,
}

impl ProjectMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: ProjectVersion::INITIAL,
            files: Vec::new(),
        }
    }
}
