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

//! Top-level error type returned by the sync engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::diff_engine::DiffEngineError;
use crate::file_util::PathError;

/// Errors that can propagate out of the public sync engine operations.
///
/// `DiffFailure` is only ever seen here when no local recovery path applied
/// (see the module docs on `apply_engine` and `push_plan` for where it is
/// instead caught and turned into a conflict copy or a full-file fallback).
#[derive(Debug, Error)]
pub enum SyncError {
    /// The project directory does not exist, or its metadata document
    /// (`.mergin/mergin.json`) is missing or unreadable.
    #[error("invalid project at {path}: {reason}")]
    InvalidProject { path: PathBuf, reason: String },

    /// Network, authentication, or server-side rejection. The sync engine
    /// never constructs this variant itself; it is surfaced by whatever
    /// transport collaborator the caller supplies.
    #[error("transport error: {0}")]
    Transport(String),

    /// A changeset-based operation was requested but the diff engine
    /// capability is unavailable (`DiffEngine::available()` is false).
    #[error("structured-diff capability unavailable for {path}")]
    DiffUnavailable { path: String },

    /// Changeset creation, application, or rebase failed and no local
    /// recovery path was possible.
    #[error("diff engine failure on {path}: {source}")]
    DiffFailure {
        path: String,
        #[source]
        source: DiffEngineError,
    },

    /// I/O failure unrelated to the diff engine.
    #[error(transparent)]
    Filesystem(#[from] PathError),
}

pub type SyncResult<T> = Result<T, SyncError>;
