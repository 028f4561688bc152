// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::services::rate_limiting_service::{
    RateLimitingError, RateLimitingService, RatePermit,
};

/// 单个服务的限流状态
#[derive(Debug, Default)]
struct ServiceSlot {
    /// 最近一次发放许可的时间
    last_granted: Option<Instant>,
}

/// 进程内限流服务实现
///
/// 每个服务一把异步互斥锁，获取许可时在锁内等待到 `last_granted + min_interval`。
/// tokio 的互斥锁按 FIFO 唤醒，等待者依次获得许可。
#[derive(Debug, Clone, Default)]
pub struct InMemoryRateLimiter {
    slots: Arc<DashMap<String, Arc<Mutex<ServiceSlot>>>>,
    /// 限流惩罚截止时间
    penalties: Arc<DashMap<String, Instant>>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取或创建指定服务的槽位
    fn get_or_create(&self, service_key: &str) -> Arc<Mutex<ServiceSlot>> {
        self.slots
            .entry(service_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ServiceSlot::default())))
            .clone()
    }

    fn penalty_until(&self, service_key: &str) -> Option<Instant> {
        self.penalties.get(service_key).map(|entry| *entry.value())
    }
}

#[async_trait]
impl RateLimitingService for InMemoryRateLimiter {
    async fn acquire(
        &self,
        service_key: &str,
        min_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<RatePermit, RateLimitingError> {
        let slot = self.get_or_create(service_key);

        let mut guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RateLimitingError::Cancelled),
            guard = slot.lock_owned() => guard,
        };

        let mut ready_at = guard
            .last_granted
            .map(|last| last + min_interval)
            .unwrap_or_else(Instant::now);
        if let Some(penalty) = self.penalty_until(service_key) {
            ready_at = ready_at.max(penalty);
        }

        if ready_at > Instant::now() {
            debug!(
                "Waiting {:?} before next request to {}",
                ready_at.saturating_duration_since(Instant::now()),
                service_key
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RateLimitingError::Cancelled),
                _ = sleep_until(ready_at) => {}
            }
        }

        guard.last_granted = Some(Instant::now());

        if min_interval.is_zero() {
            drop(guard);
            return Ok(RatePermit::new(service_key, None));
        }
        Ok(RatePermit::new(service_key, Some(Box::new(guard))))
    }

    async fn penalize(&self, service_key: &str, cooldown: Duration) {
        let until = Instant::now() + cooldown;
        self.penalties
            .entry(service_key.to_string())
            .and_modify(|existing| {
                if *existing < until {
                    *existing = until;
                }
            })
            .or_insert(until);
        debug!("Service {} penalized for {:?}", service_key, cooldown);
    }
}
