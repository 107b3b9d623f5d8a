// Copyright 2025 Snapgrep Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use snapgrep_serve::{
    load_config, ArchiveSource, FetchLimiter, GitArchiveSource, HttpArchiveSource, MergeOpts,
    SearchService, ServeConfig, SnapshotStore,
};

#[derive(Parser)]
struct Opts {
    /// Path to a TOML config file
    #[arg(long)]
    config: Option<std::path::PathBuf>,
    /// Address to listen on (env: SNAPGREP_BIND_ADDR)
    #[arg(long)]
    bind: Option<String>,
    /// Snapshot cache directory (env: SNAPGREP_CACHE_DIR)
    #[arg(long)]
    cache_dir: Option<std::path::PathBuf>,
    /// Cache size budget in bytes (env: SNAPGREP_MAX_CACHE_BYTES)
    #[arg(long)]
    max_cache_bytes: Option<u64>,
    /// Serve archives from git mirrors under this root instead of the
    /// configured HTTP endpoints (dev mode)
    #[arg(long)]
    git_mirror_root: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,h2=warn,reqwest=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let opts = Opts::parse();
    let cfg = load_config(
        ServeConfig::default(),
        MergeOpts {
            config_path: opts.config,
            cli_bind_addr: opts.bind,
            cli_cache_dir: opts.cache_dir,
            cli_max_cache_bytes: opts.max_cache_bytes,
            cli_git_mirror_root: opts.git_mirror_root,
        },
    )?;

    let source: Arc<dyn ArchiveSource> = match &cfg.git_mirror_root {
        Some(root) => {
            tracing::info!(root = %root.display(), "serving archives from local git mirrors");
            Arc::new(GitArchiveSource::new(root.clone()))
        }
        None => {
            if cfg.fetch_endpoints.is_empty() {
                anyhow::bail!(
                    "no archive source: set fetch_endpoints or git_mirror_root in the config"
                );
            }
            Arc::new(HttpArchiveSource::new(cfg.fetch_endpoints.clone()))
        }
    };

    let limiter = FetchLimiter::new(cfg.fetch_limit());
    let store = SnapshotStore::new(snapgrep_serve::StoreOpts {
        cache_dir: cfg.cache_dir.clone(),
        max_cache_bytes: cfg.max_cache_bytes,
        max_file_size: cfg.max_file_size,
        large_file_patterns: cfg.large_file_patterns.clone(),
        source,
        limiter: limiter.clone(),
        entry_filter: None,
    })?;

    store.spawn_eviction_loop(cfg.eviction_interval);
    spawn_limiter_recalc(limiter, cfg.clone());

    let service = SearchService::new(store, cfg.max_search_duration);
    let app = snapgrep_serve::http::router(service);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!(addr = %cfg.bind_addr, cache = %cfg.cache_dir.display(), "snapgrep-http listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Recompute the fetch limiter capacity from the known endpoint set. With
/// a static config this is a fixed point, but deployments that rotate the
/// endpoint list (env reload, orchestrator) pick the change up live.
fn spawn_limiter_recalc(limiter: FetchLimiter, cfg: ServeConfig) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let endpoints = match std::env::var("SNAPGREP_FETCH_ENDPOINTS") {
                Ok(s) => s.split(',').filter(|p| !p.trim().is_empty()).count(),
                Err(_) => cfg.fetch_endpoints.len(),
            };
            let limit = endpoints.max(1) * cfg.fetch_concurrency_per_endpoint.max(1);
            limiter.set_limit(limit);
            tracing::debug!(limit, "fetch limiter capacity recalculated");
        }
    });
}
