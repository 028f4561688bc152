// Copyright 2025 Kirky.X
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

use std::sync::Arc;
use tessera::config::settings::Settings;
use tessera::engines::proxy_pool::ProxyPool;
use tessera::engines::reqwest_engine::ReqwestEngine;
use tessera::infrastructure::descriptor_loader::DescriptorLoader;
use tessera::infrastructure::metrics::init_metrics;
use tessera::infrastructure::services::rate_limiting_service_impl::InMemoryRateLimiter;
use tessera::utils::telemetry;
use tessera::workers::manager::{cancel_on_ctrl_c, CheckOrchestrator};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

/// 每输出多少条结果记录一次进度
const PROGRESS_EVERY: usize = 100;

/// 主函数
///
/// 从标准输入读取候选号码，逐行输出 JSON 结果
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();
    info!("Starting tessera...");

    // 2. Load configuration
    let settings = Settings::new()?;
    info!("Configuration loaded");

    if let Some(addr) = settings.metrics.listen_addr {
        if let Err(e) = init_metrics(addr) {
            warn!("Failed to install Prometheus recorder: {}", e);
        }
    }

    // 3. Load descriptors
    let catalog = DescriptorLoader::new(settings.descriptors.dirs.clone()).load()?;
    let descriptors = catalog.select(&settings.descriptors.services);
    if descriptors.is_empty() {
        anyhow::bail!("no usable service descriptors found");
    }

    // 4. Read candidates
    let mut candidates = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if !line.is_empty() && !line.starts_with('#') {
            candidates.push(line.to_string());
        }
    }
    info!(
        "{} candidate(s) against {} service(s)",
        candidates.len(),
        descriptors.len()
    );

    // 5. Initialize components
    let proxy_pool = Arc::new(ProxyPool::new(
        settings.proxy.proxies.clone(),
        settings.proxy_pool_config(),
    ));
    let orchestrator = CheckOrchestrator::new(
        Arc::new(ReqwestEngine::new()),
        settings.engine_config(),
        settings.orchestrator_config(),
        Arc::new(InMemoryRateLimiter::new()),
        proxy_pool.clone(),
    );

    // 6. Run
    let cancel = orchestrator.cancel_token();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let (handle, mut results) = orchestrator.start(&candidates, &descriptors).await;
    let mut stdout = tokio::io::stdout();
    let mut written: usize = 0;
    while let Some(result) = results.recv().await {
        let mut line = serde_json::to_vec(&result)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;

        written += 1;
        if written % PROGRESS_EVERY == 0 {
            let progress = handle.progress();
            info!(
                completed = progress.completed,
                in_progress = progress.in_progress,
                remaining = progress.remaining,
                "Progress"
            );
        }
    }
    stdout.flush().await?;

    let summary = handle.join().await;
    cancel.cancel();

    let pool = proxy_pool.status();
    info!(
        found = summary.found,
        not_found = summary.not_found,
        errors = summary.error,
        rate_limited = summary.rate_limited,
        blocked = summary.blocked,
        timeouts = summary.timeout,
        cancelled = summary.cancelled,
        undelivered = summary.undelivered,
        proxies_dead = pool.dead,
        "Summary"
    );

    Ok(())
}
