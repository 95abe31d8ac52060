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

//! Environment-derived engine configuration (§6 of the design).
//!
//! Config is read once, at [`EngineConfig::from_env`] time, and handed
//! around as an immutable snapshot — it is not re-read mid operation.

use std::env;
use std::num::ParseIntError;

use thiserror::Error;

/// Below this size, downloading diffs and applying them is not worth it
/// compared to just fetching the full file (§4.5).
pub const DEFAULT_DIFFS_LIMIT_SIZE: u64 = 1024 * 1024;

/// Fixed upload granularity used to size push chunk plans (§4.6). The
/// transport layer defines the actual wire-level chunk boundary; this is
/// the value the planner uses to estimate how many chunk ids to allocate.
pub const UPLOAD_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not a valid size in bytes: {source}")]
    InvalidSize {
        name: &'static str,
        #[source]
        source: ParseIntError,
    },
}

/// Snapshot of the environment variables the engine consults (§6).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `MERGIN_URL` — server base URL. Opaque to the sync engine; forwarded
    /// to the transport collaborator.
    pub server_url: Option<String>,
    /// `MERGIN_AUTH` — bearer token. Opaque to the sync engine.
    pub auth_token: Option<String>,
    /// `DIFFS_LIMIT_SIZE` — byte threshold below which a structured file is
    /// always fetched in full rather than as a diff chain.
    pub diffs_limit_size: u64,
    /// When set, the diff engine capability is treated as unavailable
    /// regardless of whether a diff engine implementation was supplied.
    pub diff_engine_disabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            auth_token: None,
            diffs_limit_size: DEFAULT_DIFFS_LIMIT_SIZE,
            diff_engine_disabled: false,
        }
    }
}

impl EngineConfig {
    /// Reads `MERGIN_URL`, `MERGIN_AUTH`, and `DIFFS_LIMIT_SIZE` from the
    /// process environment. A malformed `DIFFS_LIMIT_SIZE` is reported
    /// rather than silently defaulted.
    pub fn from_env() -> Result<Self, ConfigError> {
        let diffs_limit_size = match env::var("DIFFS_LIMIT_SIZE") {
            Ok(value) => value
                .parse()
                .map_err(|source| ConfigError::InvalidSize {
                    name: "DIFFS_LIMIT_SIZE",
                    source,
                })?,
            Err(_) => DEFAULT_DIFFS_LIMIT_SIZE,
        };
        Ok(Self {
            server_url: env::var("MERGIN_URL").ok(),
            auth_token: env::var("MERGIN_AUTH").ok(),
            diffs_limit_size,
            diff_engine_disabled: false,
        })
    }

    /// Returns a config with the diff engine capability force-disabled,
    /// regardless of what the environment says.
    #[must_use]
    pub fn with_diff_engine_disabled(mut self) -> Self {
        self.diff_engine_disabled = true;
        self
    }
}
