// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tessera::domain::models::descriptor::ServiceDescriptor;
use tessera::engines::probe_runner::EngineConfig;
use tessera::engines::proxy_pool::ProxyPool;
use tessera::engines::reqwest_engine::ReqwestEngine;
use tessera::infrastructure::services::rate_limiting_service_impl::InMemoryRateLimiter;
use tessera::workers::manager::{CheckOrchestrator, OrchestratorConfig};

/// 指向 mock 服务器的最小描述符，`overrides` 中的顶层字段覆盖默认值
pub fn descriptor(service_key: &str, server_uri: &str, overrides: Value) -> Arc<ServiceDescriptor> {
    let mut base = json!({
        "service_key": service_key,
        "recommended_delay": 0,
        "request_timeout": 5,
        "endpoints": [{
            "name": "lookup",
            "url": format!("{}/check?phone=${{phone_digits}}", server_uri),
            "success_signals": [
                {"type": "json_path_equals", "path": "exists", "value": true, "weight": 1.0}
            ],
            "failure_signals": [
                {"type": "json_path_equals", "path": "exists", "value": false, "weight": 1.0}
            ]
        }]
    });
    if let (Some(base), Some(extra)) = (base.as_object_mut(), overrides.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }

    let descriptor: ServiceDescriptor = serde_json::from_value(base).unwrap();
    descriptor.validate_descriptor().unwrap();
    Arc::new(descriptor)
}

pub fn numbers(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// 不冷却的编排器配置
pub fn orchestrator_config(worker_count: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        worker_count: Some(worker_count),
        rate_limit_cooldown: Duration::ZERO,
        ..OrchestratorConfig::default()
    }
}

pub fn orchestrator(config: OrchestratorConfig, proxy_pool: ProxyPool) -> CheckOrchestrator {
    CheckOrchestrator::new(
        Arc::new(ReqwestEngine::new()),
        EngineConfig::default(),
        config,
        Arc::new(InMemoryRateLimiter::new()),
        Arc::new(proxy_pool),
    )
}
