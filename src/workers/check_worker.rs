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

use async_trait::async_trait;
use futures::FutureExt;
use metrics::counter;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::models::check::{CheckResult, CheckStatus, CheckTask, ErrorReason, RunSummary};
use crate::domain::models::proxy::ProxyOutcome;
use crate::domain::services::rate_limiting_service::{RateLimitingError, RateLimitingService};
use crate::engines::probe_runner::ProbeRunner;
use crate::engines::proxy_pool::ProxyPool;
use crate::queue::task_queue::{NextTask, TaskQueue};
use crate::workers::worker::Worker;

/// 所有检查工作者共享的运行上下文
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<dyn TaskQueue>,
    pub runner: Arc<ProbeRunner>,
    pub rate_limiter: Arc<dyn RateLimitingService>,
    pub proxy_pool: Arc<ProxyPool>,
    pub results: mpsc::Sender<CheckResult>,
    pub summary: Arc<Mutex<RunSummary>>,
    pub cancel: CancellationToken,
    /// 服务返回限流后的冷却时间
    pub rate_limit_cooldown: Duration,
}

/// 检查工作者
///
/// 从队列取任务，依次经过限流、代理分配、探测，再把结果写入结果通道。
pub struct CheckWorker {
    name: String,
    ctx: WorkerContext,
}

impl CheckWorker {
    /// 创建新的检查工作器实例
    pub fn new(id: usize, ctx: WorkerContext) -> Self {
        Self {
            name: format!("check-worker-{}", id),
            ctx,
        }
    }

    /// 处理单个任务
    ///
    /// # 返回值
    ///
    /// * `Some(CheckResult)` - 任务产生的结果
    /// * `None` - 任务在开始前被取消
    #[instrument(skip(self, task), fields(worker = %self.name, service = %task.service_key(), candidate = %task.candidate_number))]
    async fn process_task(&self, task: &CheckTask) -> Option<CheckResult> {
        let descriptor = task.descriptor.clone();
        let service_key = descriptor.service_key.as_str();

        let permit = match self
            .ctx
            .rate_limiter
            .acquire(service_key, descriptor.effective_delay(), &self.ctx.cancel)
            .await
        {
            Ok(permit) => permit,
            Err(RateLimitingError::Cancelled) => {
                debug!("Cancelled while waiting for rate limit");
                return None;
            }
        };

        let lease = self.ctx.proxy_pool.acquire(descriptor.requires_proxy);
        if descriptor.requires_proxy && lease.is_none() {
            warn!("No proxy available for proxy-only service");
            return Some(CheckResult::error(
                task,
                ErrorReason::ProxyUnavailable,
                "service requires a proxy but none is available",
            ));
        }

        let proxy = lease.as_ref().map(|lease| lease.address.as_str());
        let probe = self
            .ctx
            .runner
            .run(&descriptor, &task.candidate_number, proxy);
        let result = match AssertUnwindSafe(probe).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Probe panicked: {}", message);
                CheckResult::error(task, ErrorReason::Internal, format!("probe panicked: {}", message))
            }
        };

        if let Some(lease) = lease {
            if let Some(outcome) = ProxyOutcome::for_result(&result) {
                self.ctx.proxy_pool.release(lease, outcome);
            }
        }

        if result.status == CheckStatus::RateLimited && !self.ctx.rate_limit_cooldown.is_zero() {
            self.ctx
                .rate_limiter
                .penalize(service_key, self.ctx.rate_limit_cooldown)
                .await;
        }
        drop(permit);

        info!(status = %result.status, confidence = result.confidence, "Check finished");
        Some(result)
    }

    /// 记录并投递结果
    async fn publish(&self, result: CheckResult) {
        counter!(
            "tessera_checks_total",
            "service" => result.service_key.clone(),
            "status" => result.status.as_str()
        )
        .increment(1);
        self.ctx.summary.lock().record(result.status);

        // Finished checks are delivered even after cancellation; only a
        // dropped receiver discards them.
        if self.ctx.results.send(result).await.is_err() {
            warn!("Result receiver dropped, discarding result");
            self.ctx.summary.lock().undelivered += 1;
        }
    }
}

#[async_trait]
impl Worker for CheckWorker {
    async fn run(&self) {
        debug!("{} started", self.name);

        loop {
            if self.ctx.cancel.is_cancelled() {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => break,
                next = self.ctx.queue.next() => next,
            };
            let task = match next {
                NextTask::Task(task) => task,
                NextTask::Done => break,
            };

            match self.process_task(&task).await {
                Some(result) => self.publish(result).await,
                None => {
                    self.ctx.summary.lock().cancelled += 1;
                }
            }
            self.ctx.queue.mark_completed(&task);
        }

        debug!("{} stopped", self.name);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
