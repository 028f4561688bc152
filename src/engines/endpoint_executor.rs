// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::counter;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::models::descriptor::{BodyTemplate, EndpointSpec};
use crate::engines::signer::{apply_signer, SignerError};
use crate::engines::traits::{EngineError, HttpEngine, ProbeRequest, ProbeResponse, RequestBody};
use crate::engines::validators::{detect_block_page, is_rate_limit_status};
use crate::utils::errors::TemplateError;
use crate::utils::retry_policy::RetryPolicy;
use crate::utils::template::TemplateContext;

/// 执行器配置
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutorConfig {
    /// 限流响应是否按端点的重试策略重试
    pub rate_limited_retryable: bool,
    /// 5xx 是否视为网络错误（可重试）
    pub retry_server_errors: bool,
}

/// 传输层结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// 收到了可以评估的响应
    Ok,
    Timeout,
    NetworkError,
    RateLimited,
    Blocked,
}

impl TransportStatus {
    fn is_retryable(&self, config: &ExecutorConfig) -> bool {
        match self {
            TransportStatus::Timeout | TransportStatus::NetworkError => true,
            TransportStatus::RateLimited => config.rate_limited_retryable,
            TransportStatus::Ok | TransportStatus::Blocked => false,
        }
    }
}

/// 端点执行结果
#[derive(Debug, Clone)]
pub struct EndpointOutcome {
    pub transport_status: TransportStatus,
    /// 最后一次收到的响应
    pub response: Option<ProbeResponse>,
    /// 实际执行次数
    pub attempts: u32,
    /// 渲染后的请求 URL
    pub url: String,
    pub detail: Option<String>,
}

/// 执行器错误
///
/// 只表示请求无法构造，传输层失败通过 `TransportStatus` 表达。
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Unsupported method: {0}")]
    Method(String),

    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("Request rejected by engine: {0}")]
    Engine(EngineError),
}

/// 端点执行器
///
/// 渲染请求、发送、分类响应，并按端点的重试声明重试。
pub struct EndpointExecutor {
    engine: Arc<dyn HttpEngine>,
    config: ExecutorConfig,
    cancel: CancellationToken,
}

impl EndpointExecutor {
    pub fn new(engine: Arc<dyn HttpEngine>, config: ExecutorConfig, cancel: CancellationToken) -> Self {
        Self {
            engine,
            config,
            cancel,
        }
    }

    /// 执行端点
    ///
    /// # 参数
    ///
    /// * `service_key` - 服务标识，用于日志和指标
    /// * `endpoint` - 端点声明
    /// * `candidate` - 候选号码
    /// * `proxy` - 代理地址
    /// * `timeout` - 单次请求超时
    ///
    /// # 返回值
    ///
    /// * `Ok(EndpointOutcome)` - 最后一次尝试的结论
    /// * `Err(ExecutorError)` - 请求无法构造，不会重试
    pub async fn execute(
        &self,
        service_key: &str,
        endpoint: &EndpointSpec,
        candidate: &str,
        proxy: Option<&str>,
        timeout: Duration,
    ) -> Result<EndpointOutcome, ExecutorError> {
        let request = build_request(endpoint, candidate, proxy, timeout)?;
        let policy = RetryPolicy::from_spec(&endpoint.retry);
        let mut attempt: u32 = 0;

        loop {
            counter!("tessera_endpoint_attempts_total", "service" => service_key.to_string())
                .increment(1);
            let result = self.engine.send(&request).await;
            let (transport_status, response, detail) = match result {
                Ok(response) => self.classify(endpoint, response),
                Err(e) if e.is_timeout() => (TransportStatus::Timeout, None, Some(e.to_string())),
                Err(e) if e.is_retryable() => {
                    (TransportStatus::NetworkError, None, Some(e.to_string()))
                }
                Err(e) => return Err(ExecutorError::Engine(e)),
            };

            let outcome = EndpointOutcome {
                transport_status,
                response,
                attempts: attempt + 1,
                url: request.url.clone(),
                detail,
            };

            if !transport_status.is_retryable(&self.config)
                || !policy.should_retry(attempt)
                || self.cancel.is_cancelled()
            {
                debug!(
                    "{}/{} finished after {} attempt(s): {:?}",
                    service_key, endpoint.name, outcome.attempts, transport_status
                );
                return Ok(outcome);
            }

            let delay = policy.calculate_backoff(attempt);
            warn!(
                "{}/{} attempt {} ended with {:?}, retrying in {:?}",
                service_key,
                endpoint.name,
                attempt + 1,
                transport_status,
                delay
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(outcome),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// 对收到的响应分类
    fn classify(
        &self,
        endpoint: &EndpointSpec,
        response: ProbeResponse,
    ) -> (TransportStatus, Option<ProbeResponse>, Option<String>) {
        let status = response.status_code;

        if is_rate_limit_status(status, &endpoint.rate_limit_statuses) {
            return (
                TransportStatus::RateLimited,
                Some(response),
                Some(format!("HTTP {}", status)),
            );
        }
        if status == 403 {
            return (
                TransportStatus::Blocked,
                Some(response),
                Some("HTTP 403".to_string()),
            );
        }
        if let Some(marker) = detect_block_page(&response, &endpoint.block_markers) {
            return (
                TransportStatus::Blocked,
                Some(response),
                Some(format!("block page: {}", marker)),
            );
        }
        if self.config.retry_server_errors && (500..=599).contains(&status) {
            return (
                TransportStatus::NetworkError,
                Some(response),
                Some(format!("HTTP {}", status)),
            );
        }
        (TransportStatus::Ok, Some(response), None)
    }
}

/// 用候选号码渲染端点，生成请求
pub fn build_request(
    endpoint: &EndpointSpec,
    candidate: &str,
    proxy: Option<&str>,
    timeout: Duration,
) -> Result<ProbeRequest, ExecutorError> {
    let ctx = TemplateContext::for_candidate(candidate);

    let method = Method::from_bytes(endpoint.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| ExecutorError::Method(endpoint.method.clone()))?;

    let mut request = ProbeRequest::new(method, ctx.render(&endpoint.url)?, timeout);
    for (name, value) in &endpoint.headers {
        request.set_header(&ctx.render(name)?, ctx.render(value)?);
    }
    for (name, value) in &endpoint.query {
        request.query.push((ctx.render(name)?, ctx.render(value)?));
    }
    request.body = match &endpoint.body {
        Some(BodyTemplate::Form(fields)) => Some(RequestBody::Form(
            fields
                .iter()
                .map(|(name, value)| Ok((ctx.render(name)?, ctx.render(value)?)))
                .collect::<Result<_, TemplateError>>()?,
        )),
        Some(BodyTemplate::Json(value)) => Some(RequestBody::Json(ctx.render_json(value)?)),
        Some(BodyTemplate::Raw(raw)) => Some(RequestBody::Raw(ctx.render(raw)?)),
        None => None,
    };
    request.proxy = proxy.map(str::to_string);

    if let Some(signer) = &endpoint.signer {
        apply_signer(signer, candidate, &mut request)?;
    }
    Ok(request)
}
