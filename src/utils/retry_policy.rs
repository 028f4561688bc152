// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::time::Duration;

use crate::domain::models::descriptor::RetrySpec;

/// 重试策略配置
///
/// 退避时间线性增长: base * (attempt + 1)，超过上限后保持在上限。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大重试次数
    pub max_retries: u32,
    /// 初始退避时间
    pub initial_backoff: Duration,
    /// 最大退避时间
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// 从端点的重试声明创建策略
    pub fn from_spec(spec: &RetrySpec) -> Self {
        Self {
            max_retries: spec.max_retries,
            initial_backoff: Duration::from_millis(spec.backoff_ms),
            ..Self::default()
        }
    }

    /// 计算第 `attempt` 次尝试（从0开始）失败后的退避时间
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * f64::from(attempt.saturating_add(1));

        Duration::from_secs_f64(backoff_secs.min(self.max_backoff.as_secs_f64()))
    }

    /// 是否应该重试
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// 最多执行的次数
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}
