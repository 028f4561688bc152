// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 请求许可
///
/// 间隔大于0时，许可持有该服务的锁，同一服务的下一次请求要等到许可释放且间隔已过。
#[must_use = "dropping the permit releases the service slot"]
pub struct RatePermit {
    guard: Option<Box<dyn Send + Sync>>,
    service_key: String,
}

impl RatePermit {
    pub fn new(service_key: impl Into<String>, guard: Option<Box<dyn Send + Sync>>) -> Self {
        Self {
            guard,
            service_key: service_key.into(),
        }
    }

    pub fn service_key(&self) -> &str {
        &self.service_key
    }

    /// 是否独占服务槽位
    pub fn is_exclusive(&self) -> bool {
        self.guard.is_some()
    }
}

impl std::fmt::Debug for RatePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatePermit")
            .field("service_key", &self.service_key)
            .field("exclusive", &self.is_exclusive())
            .finish()
    }
}

/// 限流服务接口
///
/// 按服务标识控制请求间隔，不同服务之间互不影响。
#[async_trait]
pub trait RateLimitingService: Send + Sync {
    /// 获取请求许可
    ///
    /// # 参数
    ///
    /// * `service_key` - 服务标识
    /// * `min_interval` - 同一服务两次请求之间的最小间隔
    /// * `cancel` - 取消信号，等待期间被取消时立即返回
    ///
    /// # 返回值
    ///
    /// * `Ok(RatePermit)` - 可以发出请求
    /// * `Err(RateLimitingError::Cancelled)` - 等待时运行被取消
    async fn acquire(
        &self,
        service_key: &str,
        min_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<RatePermit, RateLimitingError>;

    /// 服务返回限流后，在冷却期内不再发放许可
    async fn penalize(&self, service_key: &str, cooldown: Duration);
}

/// 限流错误类型
#[derive(Debug, thiserror::Error)]
pub enum RateLimitingError {
    #[error("等待限流许可时被取消")]
    Cancelled,
}
