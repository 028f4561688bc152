// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::domain::models::check::{CheckResult, CheckStatus, ErrorReason, MatchedSignal};
use crate::domain::models::descriptor::ServiceDescriptor;
use crate::domain::services::signal_evaluator::evaluate;
use crate::engines::endpoint_executor::{
    EndpointExecutor, ExecutorConfig, ExecutorError, TransportStatus,
};
use crate::engines::traits::{EngineError, HttpEngine};

/// 默认确认阈值
pub const DEFAULT_CONFIRMATION_THRESHOLD: f64 = 100.0;

/// 默认请求超时
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// 多端点置信度的合并方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceAggregation {
    /// 取最大值
    #[default]
    Max,
    /// 取平均值
    Average,
    /// 求和后截断到 100
    Sum,
}

impl ConfidenceAggregation {
    fn combine(&self, scores: &[f64]) -> f64 {
        if scores.is_empty() {
            return 0.0;
        }
        let combined = match self {
            ConfidenceAggregation::Max => scores.iter().copied().fold(0.0, f64::max),
            ConfidenceAggregation::Average => scores.iter().sum::<f64>() / scores.len() as f64,
            ConfidenceAggregation::Sum => scores.iter().sum(),
        };
        combined.clamp(0.0, 100.0)
    }
}

/// 检查引擎配置
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 判定为 FOUND 的最低置信度
    pub confirmation_threshold: f64,
    pub aggregation: ConfidenceAggregation,
    /// 达到阈值后跳过剩余端点（仅 Max 合并时生效）
    pub stop_on_confirmation: bool,
    /// 描述符未声明时的请求超时
    pub default_request_timeout: Duration,
    /// 全局超时，优先于描述符
    pub request_timeout_override: Option<Duration>,
    pub executor: ExecutorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confirmation_threshold: DEFAULT_CONFIRMATION_THRESHOLD,
            aggregation: ConfidenceAggregation::Max,
            stop_on_confirmation: true,
            default_request_timeout: DEFAULT_REQUEST_TIMEOUT,
            request_timeout_override: None,
            executor: ExecutorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// 描述符实际使用的请求超时
    pub fn request_timeout_for(&self, descriptor: &ServiceDescriptor) -> Duration {
        self.request_timeout_override
            .or_else(|| descriptor.request_timeout())
            .unwrap_or(self.default_request_timeout)
    }

    pub fn threshold(&self) -> f64 {
        if self.confirmation_threshold.is_nan() {
            return DEFAULT_CONFIRMATION_THRESHOLD;
        }
        self.confirmation_threshold.clamp(0.0, 100.0)
    }
}

/// 探测执行器
///
/// 对一个号码依次执行描述符的所有端点，合并置信度并给出最终状态。
pub struct ProbeRunner {
    executor: EndpointExecutor,
    config: EngineConfig,
    cancel: CancellationToken,
}

impl ProbeRunner {
    pub fn new(engine: Arc<dyn HttpEngine>, config: EngineConfig, cancel: CancellationToken) -> Self {
        Self {
            executor: EndpointExecutor::new(engine, config.executor, cancel.clone()),
            config,
            cancel,
        }
    }

    /// 执行探测
    ///
    /// # 参数
    ///
    /// * `descriptor` - 服务描述符
    /// * `candidate` - 候选号码
    /// * `proxy` - 代理地址
    ///
    /// # 返回值
    ///
    /// 检查结果，任何失败都表达为结果状态而不是错误
    #[instrument(skip(self, descriptor, proxy), fields(service = %descriptor.service_key))]
    pub async fn run(
        &self,
        descriptor: &ServiceDescriptor,
        candidate: &str,
        proxy: Option<&str>,
    ) -> CheckResult {
        let threshold = self.config.threshold();
        let timeout = self.config.request_timeout_for(descriptor);
        let service_key = descriptor.service_key.as_str();

        let mut matched: Vec<MatchedSignal> = Vec::new();
        let mut scores: Vec<(f64, String)> = Vec::new();
        let mut has_success = false;
        let mut transport_failure: Option<(TransportStatus, Option<String>)> = None;
        let mut last_url: Option<String> = None;
        let mut interrupted = false;
        let mut attempts: u32 = 0;

        for (position, endpoint) in descriptor.endpoints.iter().enumerate() {
            if position > 0 && self.cancel.is_cancelled() {
                interrupted = true;
                break;
            }

            let outcome = match self
                .executor
                .execute(service_key, endpoint, candidate, proxy, timeout)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    let reason = match e {
                        ExecutorError::Engine(EngineError::InvalidRequest(_)) => {
                            ErrorReason::InvalidRequest
                        }
                        ExecutorError::Engine(_) => ErrorReason::Network,
                        _ => ErrorReason::InvalidDescriptor,
                    };
                    return CheckResult::new(candidate, service_key, CheckStatus::Error, 0.0)
                        .with_signals(matched)
                        .with_evidence_url(last_url)
                        .with_attempts(attempts)
                        .with_error(reason, format!("{}: {}", endpoint.name, e));
                }
            };
            attempts += outcome.attempts;
            last_url = Some(outcome.url.clone());

            match outcome.transport_status {
                TransportStatus::Ok => {
                    let Some(response) = outcome.response.as_ref() else {
                        continue;
                    };
                    let evaluation = evaluate(
                        &endpoint.name,
                        response,
                        &endpoint.success_signals,
                        &endpoint.failure_signals,
                    );
                    debug!(
                        "{} scored {:.1} on {}",
                        endpoint.name, evaluation.confidence, service_key
                    );
                    has_success |= evaluation.has_success_match();
                    matched.extend(evaluation.matched.iter().cloned());
                    scores.push((evaluation.confidence, outcome.url.clone()));

                    if self.config.stop_on_confirmation
                        && self.config.aggregation == ConfidenceAggregation::Max
                        && evaluation.has_success_match()
                        && evaluation.confidence >= threshold
                    {
                        break;
                    }
                }
                TransportStatus::RateLimited | TransportStatus::Blocked => {
                    let status = if outcome.transport_status == TransportStatus::RateLimited {
                        CheckStatus::RateLimited
                    } else {
                        CheckStatus::Blocked
                    };
                    let confidence = self.aggregate(&scores);
                    return CheckResult::new(candidate, service_key, status, confidence)
                        .with_signals(matched)
                        .with_evidence_url(last_url)
                        .with_attempts(attempts)
                        .with_detail(outcome.detail);
                }
                TransportStatus::Timeout | TransportStatus::NetworkError => {
                    transport_failure = Some((outcome.transport_status, outcome.detail));
                }
            }
        }

        let confidence = self.aggregate(&scores);
        let evidence_url = best_url(&scores).or(last_url);
        let result = |status: CheckStatus| {
            CheckResult::new(candidate, service_key, status, confidence)
                .with_signals(matched.clone())
                .with_evidence_url(evidence_url.clone())
                .with_attempts(attempts)
        };

        if has_success && confidence >= threshold {
            return result(CheckStatus::Found);
        }
        if let Some((status, detail)) = transport_failure {
            return match status {
                TransportStatus::Timeout => result(CheckStatus::Timeout).with_detail(detail),
                _ => result(CheckStatus::Error).with_error(
                    ErrorReason::Network,
                    detail.unwrap_or_else(|| "network error".to_string()),
                ),
            };
        }
        if interrupted {
            return result(CheckStatus::Error)
                .with_error(ErrorReason::Cancelled, "run cancelled before all endpoints ran");
        }
        result(CheckStatus::NotFound)
    }

    fn aggregate(&self, scores: &[(f64, String)]) -> f64 {
        let values: Vec<f64> = scores.iter().map(|(score, _)| *score).collect();
        self.config.aggregation.combine(&values)
    }
}

/// 得分最高的端点 URL，同分取先执行的
fn best_url(scores: &[(f64, String)]) -> Option<String> {
    let mut best: Option<&(f64, String)> = None;
    for entry in scores {
        if best.map_or(true, |b| entry.0 > b.0) {
            best = Some(entry);
        }
    }
    best.map(|(_, url)| url.clone())
}
