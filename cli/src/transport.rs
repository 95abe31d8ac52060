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

//! HTTP transport details are explicitly out of scope for the sync engine
//! (it only defines the `Transport` contract); this binary is where a real
//! client would be wired in. Without one configured, every operation fails
//! fast with a `Transport` error naming the missing piece, rather than
//! silently doing nothing.

use std::path::Path;

use async_trait::async_trait;
use mergin_sync::SyncError;
use mergin_sync::ProjectVersion;
use mergin_sync::transport::Transport;
use mergin_sync::metadata::ServerFile;

#[derive(Debug)]
pub struct UnconfiguredTransport {
    server_url: Option<String>,
}

impl UnconfiguredTransport {
    pub fn new(server_url: Option<String>) -> Self {
        Self { server_url }
    }

    fn unavailable(&self) -> SyncError {
        match &self.server_url {
            Some(url) => SyncError::Transport(format!(
                "no HTTP client is wired in for {url}; this binary only exercises the sync engine's public API"
            )),
            None => SyncError::Transport(
                "MERGIN_URL is not set and no transport is configured".to_owned(),
            ),
        }
    }
}

#[async_trait]
impl Transport for UnconfiguredTransport {
    async fn server_inventory(&self, _project: &str) -> Result<Vec<ServerFile>, SyncError> {
        Err(self.unavailable())
    }

    async fn fetch(&self, _server_path: &str, _dest: &Path) -> Result<(), SyncError> {
        Err(self.unavailable())
    }

    async fn project_version(&self, _project: &str) -> Result<ProjectVersion, SyncError> {
        Err(self.unavailable())
    }

    async fn upload_chunk(&self, _chunk_id: &str, _data: &[u8]) -> Result<(), SyncError> {
        Err(self.unavailable())
    }

    async fn finalize_push(&self, _project: &str) -> Result<ProjectVersion, SyncError> {
        Err(self.unavailable())
    }
}
