// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tessera::domain::models::check::{CheckStatus, ErrorReason};
use tessera::domain::models::descriptor::ServiceDescriptor;
use tessera::engines::probe_runner::EngineConfig;
use tessera::engines::proxy_pool::ProxyPool;
use tessera::engines::traits::{EngineError, HttpEngine, ProbeRequest, ProbeResponse};
use tessera::infrastructure::services::rate_limiting_service_impl::InMemoryRateLimiter;
use tessera::queue::task_queue::QueueProgress;
use tessera::workers::manager::{CheckOrchestrator, OrchestratorConfig};
use tokio::time::Instant;

/// 按 URL 中的片段决定行为的引擎，记录每次请求的时间
#[derive(Default)]
struct ScriptedEngine {
    calls: Mutex<Vec<(String, Instant)>>,
    throttle_first: bool,
    latency: Duration,
}

impl ScriptedEngine {
    fn throttling_first() -> Self {
        Self {
            throttle_first: true,
            ..Self::default()
        }
    }

    fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<(String, Instant)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl HttpEngine for ScriptedEngine {
    async fn send(&self, request: &ProbeRequest) -> Result<ProbeResponse, EngineError> {
        let first = {
            let mut calls = self.calls.lock();
            calls.push((request.url.clone(), Instant::now()));
            calls.len() == 1
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if request.url.contains("/explode") {
            panic!("engine exploded");
        }
        if self.throttle_first && first {
            return Ok(ProbeResponse::new(429, ""));
        }
        Ok(ProbeResponse::new(200, "registered"))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

fn descriptor(service_key: &str, path: &str) -> Arc<ServiceDescriptor> {
    paced_descriptor(service_key, path, 0.0)
}

fn paced_descriptor(service_key: &str, path: &str, delay: f64) -> Arc<ServiceDescriptor> {
    Arc::new(
        serde_json::from_value(json!({
            "service_key": service_key,
            "recommended_delay": delay,
            "endpoints": [{
                "url": format!("https://{}.test{}?phone=${{phone_digits}}", service_key, path),
                "success_signals": [{"type": "body_contains", "text": "registered", "weight": 1.0}]
            }]
        }))
        .unwrap(),
    )
}

fn orchestrator(engine: Arc<ScriptedEngine>, config: OrchestratorConfig) -> CheckOrchestrator {
    CheckOrchestrator::new(
        engine,
        EngineConfig::default(),
        config,
        Arc::new(InMemoryRateLimiter::new()),
        Arc::new(ProxyPool::empty()),
    )
}

fn candidates(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("+420 600 000 00{}", i)).collect()
}

#[tokio::test]
async fn test_panicking_probe_becomes_internal_error() {
    let engine = Arc::new(ScriptedEngine::default());
    let descriptors = vec![descriptor("boom", "/explode"), descriptor("calm", "/check")];

    let config = OrchestratorConfig {
        worker_count: Some(2),
        ..OrchestratorConfig::default()
    };
    let (results, summary) = orchestrator(engine, config)
        .run_collect(&candidates(2), &descriptors)
        .await;

    assert_eq!(results.len(), 4);
    for result in &results {
        match result.service_key.as_str() {
            "boom" => {
                assert_eq!(result.status, CheckStatus::Error);
                assert_eq!(result.error_reason, Some(ErrorReason::Internal));
                assert!(result.detail.as_deref().unwrap().contains("engine exploded"));
            }
            _ => assert_eq!(result.status, CheckStatus::Found),
        }
    }
    assert_eq!(summary.error, 2);
    assert_eq!(summary.found, 2);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_service_cools_down() {
    let engine = Arc::new(ScriptedEngine::throttling_first());
    let descriptors = vec![descriptor("strict", "/check")];

    let config = OrchestratorConfig {
        worker_count: Some(1),
        rate_limit_cooldown: Duration::from_secs(60),
        ..OrchestratorConfig::default()
    };
    let (results, _) = orchestrator(engine.clone(), config)
        .run_collect(&candidates(2), &descriptors)
        .await;

    assert_eq!(results[0].status, CheckStatus::RateLimited);
    assert_eq!(results[1].status, CheckStatus::Found);

    let calls = engine.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].1.duration_since(calls[0].1) >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_zero_cooldown_does_not_wait() {
    let engine = Arc::new(ScriptedEngine::throttling_first());
    let descriptors = vec![descriptor("strict", "/check")];

    let config = OrchestratorConfig {
        worker_count: Some(1),
        rate_limit_cooldown: Duration::ZERO,
        ..OrchestratorConfig::default()
    };
    orchestrator(engine.clone(), config)
        .run_collect(&candidates(2), &descriptors)
        .await;

    let calls = engine.calls();
    assert!(calls[1].1.duration_since(calls[0].1) < Duration::from_secs(1));
}

#[tokio::test]
async fn test_empty_run_finishes_immediately() {
    let engine = Arc::new(ScriptedEngine::default());
    let (handle, mut receiver) = orchestrator(engine, OrchestratorConfig::default())
        .start(&[], &[descriptor("calm", "/check")])
        .await;

    assert_eq!(handle.worker_count(), 1);
    assert!(receiver.recv().await.is_none());
    assert_eq!(handle.progress(), QueueProgress::default());
    let summary = handle.join().await;
    assert_eq!(summary.total, 0);
    assert_eq!(summary.completed(), 0);
}

#[tokio::test]
async fn test_external_cancel_token_before_start() {
    let engine = Arc::new(ScriptedEngine::default());
    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();

    let orchestrator = orchestrator(engine.clone(), OrchestratorConfig::default())
        .with_cancel_token(cancel);
    let (results, summary) = orchestrator
        .run_collect(&candidates(3), &[descriptor("calm", "/check")])
        .await;

    assert!(results.is_empty());
    assert_eq!(summary.cancelled, 3);
    assert!(engine.calls().is_empty());
}

/// 某个服务的请求开始时刻，相对于 `origin`
fn start_offsets(calls: &[(String, Instant)], host: &str, origin: Instant) -> Vec<Duration> {
    calls
        .iter()
        .filter(|(url, _)| url.contains(host))
        .map(|(_, at)| at.duration_since(origin))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_delayed_service_starts_are_spaced() {
    let engine = Arc::new(ScriptedEngine::with_latency(Duration::from_millis(50)));
    let descriptors = vec![
        paced_descriptor("slow", "/check", 1.0),
        paced_descriptor("fast", "/check", 0.0),
    ];
    let config = OrchestratorConfig {
        worker_count: Some(4),
        ..OrchestratorConfig::default()
    };

    let origin = Instant::now();
    let (results, summary) = orchestrator(engine.clone(), config)
        .run_collect(&candidates(5), &descriptors)
        .await;

    assert_eq!(results.len(), 10);
    assert_eq!(summary.found, 10);

    let calls = engine.calls();
    let slow = start_offsets(&calls, "slow.test", origin);
    let fast = start_offsets(&calls, "fast.test", origin);
    assert_eq!(slow.len(), 5);
    assert_eq!(fast.len(), 5);

    for pair in slow.windows(2) {
        assert!(
            pair[1] - pair[0] >= Duration::from_secs(1),
            "slow starts too close: {:?}",
            slow
        );
    }
    assert!(slow[4] - slow[0] >= Duration::from_secs(4));

    // No spacing applies to the zero-delay service
    let tightest = fast
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .min()
        .unwrap_or_default();
    assert!(tightest < Duration::from_secs(1), "fast starts: {:?}", fast);
}

#[tokio::test(start_paused = true)]
async fn test_finished_check_is_delivered_after_cancel() {
    let engine = Arc::new(ScriptedEngine::default());
    let config = OrchestratorConfig {
        worker_count: Some(1),
        result_buffer: 1,
        ..OrchestratorConfig::default()
    };
    let (handle, mut receiver) = orchestrator(engine, config)
        .start(&candidates(3), &[descriptor("calm", "/check")])
        .await;

    // One result fills the channel, the second waits for capacity
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.stop();

    let mut delivered = 0;
    while receiver.recv().await.is_some() {
        delivered += 1;
    }
    let summary = handle.join().await;

    assert_eq!(delivered, 2);
    assert_eq!(summary.undelivered, 0);
    assert_eq!(summary.found, 2);
    assert_eq!(summary.cancelled, 1);
}
