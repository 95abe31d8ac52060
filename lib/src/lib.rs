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

//! Client-side synchronization engine for versioned, file-based project
//! stores (geopackages/sqlite mixed with plain files), modeled after the
//! Mergin Maps sync protocol.
//!
//! The crate is organized bottom-up, mirroring the component design:
//! [`fingerprint`] and [`ignore`] are the leaf primitives; [`inventory`]
//! walks a working tree into fingerprints; [`change_detector`] diffs two
//! fingerprint sets; [`pull_plan`] and [`push_plan`] turn a diff into a
//! concrete transfer plan; [`apply_engine`] executes a plan against
//! [`project_store`]; and [`engine`] wires all of it, plus a
//! [`diff_engine`] and a [`transport`], into the public [`engine::SyncEngine`]
//! facade.

pub mod apply_engine;
pub mod change_detector;
pub mod config;
pub mod diff_engine;
#[cfg(feature = "async")]
pub mod engine;
pub mod error;
pub mod file_util;
pub mod fingerprint;
pub mod ignore;
pub mod inventory;
pub mod metadata;
pub mod project_store;
pub mod pull_plan;
pub mod push_plan;
#[cfg(feature = "async")]
pub mod transport;
pub mod version;

pub use config::EngineConfig;
#[cfg(feature = "async")]
pub use engine::ChangeSummary;
#[cfg(feature = "async")]
pub use engine::PullOutcome;
#[cfg(feature = "async")]
pub use engine::SyncEngine;
pub use error::SyncError;
pub use error::SyncResult;
pub use project_store::ProjectStore;
pub use version::ProjectVersion;
