// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::check::{CheckResult, RunSummary};
use crate::domain::models::descriptor::ServiceDescriptor;
use crate::domain::services::rate_limiting_service::RateLimitingService;
use crate::engines::probe_runner::{EngineConfig, ProbeRunner};
use crate::engines::proxy_pool::ProxyPool;
use crate::engines::traits::HttpEngine;
use crate::queue::task_queue::{QueueProgress, TaskQueue, WorkDistributor};
use crate::workers::check_worker::{CheckWorker, WorkerContext};
use crate::workers::worker::Worker;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 保守默认的 worker 数
const DEFAULT_WORKERS: usize = 8;
/// 存在必须走代理的服务时的 worker 数
const PROXY_REQUIRED_WORKERS: usize = 2;
/// 存在慢速服务时的 worker 数
const SLOW_SERVICE_WORKERS: usize = 4;
const SLOW_SERVICE_DELAY: Duration = Duration::from_secs(2);

/// 编排器配置
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// 显式指定的 worker 数
    pub worker_count: Option<usize>,
    /// 自动推算时的上限
    pub max_workers_cap: usize,
    /// 结果通道容量
    pub result_buffer: usize,
    /// 服务返回限流后的冷却时间，0 表示不冷却
    pub rate_limit_cooldown: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            max_workers_cap: 16,
            result_buffer: 256,
            rate_limit_cooldown: Duration::from_secs(60),
        }
    }
}

/// 推算 worker 数
///
/// # 参数
///
/// * `explicit` - 显式指定的数量，优先使用
/// * `cap` - 自动推算时的上限
/// * `descriptors` - 本次运行的描述符
/// * `task_count` - 任务总数
pub fn resolve_worker_count(
    explicit: Option<usize>,
    cap: usize,
    descriptors: &[Arc<ServiceDescriptor>],
    task_count: usize,
) -> usize {
    let count = match explicit {
        Some(count) => count,
        None => {
            let mut conservative = DEFAULT_WORKERS;
            for descriptor in descriptors {
                if let Some(hint) = descriptor.max_workers {
                    conservative = conservative.min(hint);
                }
                if descriptor.requires_proxy {
                    conservative = conservative.min(PROXY_REQUIRED_WORKERS);
                }
                if descriptor.effective_delay() >= SLOW_SERVICE_DELAY {
                    conservative = conservative.min(SLOW_SERVICE_WORKERS);
                }
            }
            conservative.min(cap.max(1))
        }
    };

    count.min(task_count).max(1)
}

/// 运行句柄
pub struct RunHandle {
    handles: Vec<JoinHandle<()>>,
    queue: Arc<WorkDistributor>,
    summary: Arc<Mutex<RunSummary>>,
    cancel: CancellationToken,
    worker_count: usize,
}

impl RunHandle {
    /// 发出停止信号
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn progress(&self) -> QueueProgress {
        self.queue.progress()
    }

    /// 等待所有 worker 结束并返回汇总
    pub async fn join(self) -> RunSummary {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Worker task failed: {}", e);
            }
        }

        let never_started = self.queue.drain_pending();
        let mut summary = self.summary.lock().clone();
        summary.cancelled += never_started;
        summary.finished_at = Some(Utc::now());

        info!(
            run_id = %summary.run_id,
            total = summary.total,
            found = summary.found,
            not_found = summary.not_found,
            errors = summary.error,
            cancelled = summary.cancelled,
            "Run finished"
        );
        summary
    }
}

/// 检查编排器
///
/// 负责展开任务、启动 worker、汇总结果。
pub struct CheckOrchestrator {
    engine: Arc<dyn HttpEngine>,
    engine_config: EngineConfig,
    config: OrchestratorConfig,
    rate_limiter: Arc<dyn RateLimitingService>,
    proxy_pool: Arc<ProxyPool>,
    cancel: CancellationToken,
}

impl CheckOrchestrator {
    pub fn new(
        engine: Arc<dyn HttpEngine>,
        engine_config: EngineConfig,
        config: OrchestratorConfig,
        rate_limiter: Arc<dyn RateLimitingService>,
        proxy_pool: Arc<ProxyPool>,
    ) -> Self {
        Self {
            engine,
            engine_config,
            config,
            rate_limiter,
            proxy_pool,
            cancel: CancellationToken::new(),
        }
    }

    /// 使用外部的取消信号
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 开始一次运行
    ///
    /// # 参数
    ///
    /// * `candidates` - 候选号码
    /// * `descriptors` - 已校验的描述符
    ///
    /// # 返回值
    ///
    /// 运行句柄和结果接收端；所有 worker 结束后接收端返回 `None`
    pub async fn start(
        &self,
        candidates: &[String],
        descriptors: &[Arc<ServiceDescriptor>],
    ) -> (RunHandle, mpsc::Receiver<CheckResult>) {
        let queue = Arc::new(WorkDistributor::new());
        let total = match queue.enqueue(candidates, descriptors).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to enqueue tasks: {}", e);
                0
            }
        };
        queue.close();

        let worker_count = resolve_worker_count(
            self.config.worker_count,
            self.config.max_workers_cap,
            descriptors,
            total,
        );
        let (sender, receiver) = mpsc::channel(self.config.result_buffer.max(1));
        let summary = Arc::new(Mutex::new(RunSummary::new(total)));

        info!(
            run_id = %summary.lock().run_id,
            tasks = total,
            workers = worker_count,
            "Starting run"
        );

        let ctx = WorkerContext {
            queue: queue.clone(),
            runner: Arc::new(ProbeRunner::new(
                self.engine.clone(),
                self.engine_config.clone(),
                self.cancel.clone(),
            )),
            rate_limiter: self.rate_limiter.clone(),
            proxy_pool: self.proxy_pool.clone(),
            results: sender,
            summary: summary.clone(),
            cancel: self.cancel.clone(),
            rate_limit_cooldown: self.config.rate_limit_cooldown,
        };

        let mut handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let worker = CheckWorker::new(id, ctx.clone());
            let handle = tokio::spawn(async move { worker.run().await });
            handles.push(handle);
        }
        drop(ctx);

        (
            RunHandle {
                handles,
                queue,
                summary,
                cancel: self.cancel.clone(),
                worker_count,
            },
            receiver,
        )
    }

    /// 运行到结束并收集所有结果
    pub async fn run_collect(
        &self,
        candidates: &[String],
        descriptors: &[Arc<ServiceDescriptor>],
    ) -> (Vec<CheckResult>, RunSummary) {
        let (handle, mut receiver) = self.start(candidates, descriptors).await;
        let mut results = Vec::new();
        while let Some(result) = receiver.recv().await {
            results.push(result);
        }
        (results, handle.join().await)
    }
}

/// 等待 Ctrl-C 并取消运行
pub async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        signal = signal::ctrl_c() => match signal {
            Ok(()) => {
                info!("Shutdown signal received, stopping workers...");
                cancel.cancel();
            }
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        },
    }
}
