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

//! The structured-diff library adapter (§4.3). `DiffEngine` is a thin
//! capability over an opaque structured-diff dependency: the engine never
//! assumes a particular library is linked in, only that something
//! implementing this trait is supplied.
//!
//! [`SubprocessDiffEngine`] is the reference adapter, invoking an external
//! binary one subcommand per operation — the same shelling-out idiom as a
//! Git subprocess backend, just against a different tool. [`NullDiffEngine`]
//! stands in when the capability is disabled or unavailable.

use std::path::Path;
use std::process::Command;

use thiserror::Error;
use tracing::debug;
use tracing::instrument;

/// Two failure kinds the structured-diff library can report. Callers never
/// distinguish between them in outcome — both mean "cannot proceed with
/// this rebase or changeset" — but both must be caught so a fallback path
/// can run instead of propagating a panic or an unhandled process failure.
#[derive(Debug, Error)]
pub enum DiffEngineError {
    #[error("diff engine error: {0}")]
    Library(String),
    #[error("diff engine conflict: {0}")]
    Conflict(String),
}

/// Capability over a structured-diff library (§4.3). All operations are
/// side-effecting on the file paths given; none hold data in memory.
pub trait DiffEngine: Send + Sync {
    /// True only when the underlying library is present and at a
    /// compatible version. Every other method may be called regardless,
    /// but is expected to fail when this is false.
    fn available(&self) -> bool;

    /// Writes the changeset from `base` to `current` at `out_diff`.
    fn create_changeset(
        &self,
        base: &Path,
        current: &Path,
        out_diff: &Path,
    ) -> Result<(), DiffEngineError>;

    /// True iff `diff` represents any row-level change.
    fn has_changes(&self, diff: &Path) -> Result<bool, DiffEngineError>;

    /// Mutates `target` in place by applying `diff`.
    fn apply_changeset(&self, target: &Path, diff: &Path) -> Result<(), DiffEngineError>;

    /// Given `base` (common ancestor), `server` (new server content), and
    /// `local` (locally modified file), mutates `local` in place so it
    /// contains the server changes plus the local changes replayed on top.
    fn rebase(&self, base: &Path, server: &Path, local: &Path) -> Result<(), DiffEngineError>;

    /// Writes a JSON summary of per-table insert/update/delete counts for
    /// `diff` to `out_json`.
    fn list_changes_summary(&self, diff: &Path, out_json: &Path) -> Result<(), DiffEngineError>;
}

/// Stands in when the structured-diff capability is disabled or the
/// library failed to load. Every operation fails; `available()` is false.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDiffEngine;

impl DiffEngine for NullDiffEngine {
    fn available(&self) -> bool {
        false
    }

    fn create_changeset(&self, _: &Path, _: &Path, _: &Path) -> Result<(), DiffEngineError> {
        Err(DiffEngineError::Library(
            "structured-diff capability is disabled".to_owned(),
        ))
    }

    fn has_changes(&self, _: &Path) -> Result<bool, DiffEngineError> {
        Err(DiffEngineError::Library(
            "structured-diff capability is disabled".to_owned(),
        ))
    }

    fn apply_changeset(&self, _: &Path, _: &Path) -> Result<(), DiffEngineError> {
        Err(DiffEngineError::Library(
            "structured-diff capability is disabled".to_owned(),
        ))
    }

    fn rebase(&self, _: &Path, _: &Path, _: &Path) -> Result<(), DiffEngineError> {
        Err(DiffEngineError::Library(
            "structured-diff capability is disabled".to_owned(),
        ))
    }

    fn list_changes_summary(&self, _: &Path, _: &Path) -> Result<(), DiffEngineError> {
        Err(DiffEngineError::Library(
            "structured-diff capability is disabled".to_owned(),
        ))
    }
}

/// Invokes an external structured-diff binary, one subcommand per
/// operation: `<binary> create <base> <current> <out_diff>`, `<binary>
/// changes <diff>`, `<binary> apply <target> <diff>`, `<binary> rebase
/// <base> <server> <local>`, `<binary> summary <diff> <out_json>`.
///
/// The binary's wire contract (argument order, exit codes) is the opaque
/// dependency the engine never assumes more than this about: exit code 0
/// means success, exit code 1 means a resolvable library error, exit code
/// 2 means an unresolvable conflict. Anything else is treated as a library
/// error carrying the process's stderr.
#[derive(Debug, Clone)]
pub struct SubprocessDiffEngine {
    binary: std::path::PathBuf,
    available: bool,
}

const CONFLICT_EXIT_CODE: i32 = 2;

impl SubprocessDiffEngine {
    /// Probes `binary --version` once at construction time; `available()`
    /// reflects whether that probe succeeded.
    #[instrument]
    pub fn new(binary: impl Into<std::path::PathBuf>) -> Self {
        let binary = binary.into();
        let available = Command::new(&binary)
            .arg("--version")
            .output()
            .is_ok_and(|output| output.status.success());
        if !available {
            debug!(?binary, "structured-diff binary unavailable or failed probe");
        }
        Self { binary, available }
    }

    fn run(&self, args: &[&std::ffi::OsStr]) -> Result<std::process::Output, DiffEngineError> {
        Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|error| DiffEngineError::Library(error.to_string()))
    }

    fn run_checked(&self, args: &[&std::ffi::OsStr]) -> Result<std::process::Output, DiffEngineError> {
        let output = self.run(args)?;
        if output.status.success() {
            return Ok(output);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.code() == Some(CONFLICT_EXIT_CODE) {
            Err(DiffEngineError::Conflict(stderr))
        } else {
            Err(DiffEngineError::Library(stderr))
        }
    }
}

impl DiffEngine for SubprocessDiffEngine {
    fn available(&self) -> bool {
        self.available
    }

    fn create_changeset(
        &self,
        base: &Path,
        current: &Path,
        out_diff: &Path,
    ) -> Result<(), DiffEngineError> {
        self.run_checked(&[
            "create".as_ref(),
            base.as_os_str(),
            current.as_os_str(),
            out_diff.as_os_str(),
        ])?;
        Ok(())
    }

    fn has_changes(&self, diff: &Path) -> Result<bool, DiffEngineError> {
        let output = self.run_checked(&["changes".as_ref(), diff.as_os_str()])?;
        Ok(output.stdout.first() == Some(&b'1'))
    }

    fn apply_changeset(&self, target: &Path, diff: &Path) -> Result<(), DiffEngineError> {
        self.run_checked(&["apply".as_ref(), target.as_os_str(), diff.as_os_str()])?;
        Ok(())
    }

    fn rebase(&self, base: &Path, server: &Path, local: &Path) -> Result<(), DiffEngineError> {
        self.run_checked(&[
            "rebase".as_ref(),
            base.as_os_str(),
            server.as_os_str(),
            local.as_os_str(),
        ])?;
        Ok(())
    }

    fn list_changes_summary(&self, diff: &Path, out_json: &Path) -> Result<(), DiffEngineError> {
        self.run_checked(&["summary".as_ref(), diff.as_os_str(), out_json.as_os_str()])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_engine_is_never_available() {
        let engine = NullDiffEngine;
        assert!(!engine.available());
        assert!(engine.create_changeset(Path::new("a"), Path::new("b"), Path::new("c")).is_err());
    }

    #[test]
    fn subprocess_engine_reports_unavailable_for_missing_binary() {
        let engine = SubprocessDiffEngine::new("/nonexistent/definitely-not-a-binary");
        assert!(!engine.available());
    }
}
