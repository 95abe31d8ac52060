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

//! Thin command-line front-end (§10.5): argument parsing, environment
//! collection for `EngineConfig`, and pretty-printing of the plans and
//! summaries `mergin-sync` computes. No sync logic lives here.

mod transport;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use mergin_sync::EngineConfig;
use mergin_sync::ProjectStore;
use mergin_sync::SyncEngine;
use mergin_sync::SyncError;
use mergin_sync::config::ConfigError;
use mergin_sync::diff_engine::DiffEngine;
use mergin_sync::diff_engine::NullDiffEngine;
use mergin_sync::diff_engine::SubprocessDiffEngine;
use mergin_sync::engine::ChangeSummary;
use mergin_sync::pull_plan::PullPlan;
use mergin_sync::push_plan::PushPlan;
use thiserror::Error;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Parser)]
#[command(name = "mergin", version, about = "Client-side sync for Mergin-style project stores")]
struct Cli {
    /// Project directory; defaults to the current directory.
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    /// Project name (`namespace/name`) recorded in `.mergin/mergin.json`.
    /// Defaults to whatever is already recorded there.
    #[arg(long, global = true)]
    project_name: Option<String>,

    /// Path to the structured-diff binary. Omit to run with structured
    /// sync disabled (every update is a full-file transfer).
    #[arg(long, global = true)]
    diff_engine: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show pending pull and push changes without applying them.
    Status,
    /// Pull server changes into the working tree.
    Pull,
    /// Push local changes to the server.
    Push,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let engine = build_engine(&cli)?;

    match cli.command {
        Command::Status => {
            let (pull_plan, push_plan, push_summary) = engine.project_status().await?;
            pretty_pull_plan(&pull_plan);
            pretty_push_plan(&push_plan);
            pretty_summary(&push_summary);
        }
        Command::Pull => {
            let outcome = engine.pull().await?;
            println!("pulled to {}", outcome.version);
            for conflict in &outcome.conflicts {
                println!("conflict copy: {}", conflict.display());
            }
        }
        Command::Push => {
            let version = engine.push().await?;
            println!("pushed to {version}");
        }
    }

    Ok(())
}

fn build_engine(cli: &Cli) -> Result<SyncEngine, CliError> {
    let dir = cli
        .project_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let store = ProjectStore::open(&dir)?;

    let project_name = cli.project_name.clone().unwrap_or_else(|| {
        store
            .metadata_get()
            .map(|metadata| metadata.name)
            .unwrap_or_else(|_| "unnamed".to_owned())
    });

    let config = EngineConfig::from_env()?;

    let diff_engine: Box<dyn DiffEngine> = match &cli.diff_engine {
        Some(binary) => Box::new(SubprocessDiffEngine::new(binary.clone())),
        None => Box::new(NullDiffEngine),
    };

    let server_url = config.server_url.clone();
    let transport = Box::new(transport::UnconfiguredTransport::new(server_url));

    Ok(SyncEngine::new(store, project_name, config, diff_engine, transport))
}

fn pretty_pull_plan(plan: &PullPlan) {
    println!("pull changes:");
    for f in &plan.added {
        println!("  + {} ({} bytes)", f.path, f.size);
    }
    for f in &plan.removed {
        println!("  - {}", f.path);
    }
    for r in &plan.renamed {
        println!("  > {} -> {}", r.origin.path, r.new_path);
    }
    for u in &plan.updated {
        match &u.diffs {
            Some(diffs) => println!("  ~ {} ({} changesets)", u.file.path, diffs.len()),
            None => println!("  ~ {} (full file)", u.file.path),
        }
    }
}

fn pretty_push_plan(plan: &PushPlan) {
    println!("push changes:");
    for a in &plan.added {
        println!("  + {} ({} chunks)", a.file.path, a.chunks.len());
    }
    for f in &plan.removed {
        println!("  - {}", f.path);
    }
    for r in &plan.renamed {
        println!("  > {} -> {}", r.origin.path, r.new_path);
    }
    for u in &plan.updated {
        match &u.diff {
            Some(diff) => println!("  ~ {} (changeset {} bytes)", u.file.path, diff.size),
            None => println!("  ~ {} (full file, {} chunks)", u.file.path, u.chunks.len()),
        }
    }
}

fn pretty_summary(summary: &ChangeSummary) {
    if summary.is_empty() {
        return;
    }
    println!("changeset summary:");
    for (path, value) in summary {
        println!("  {path}: {value}");
    }
}
