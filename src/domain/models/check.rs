// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::descriptor::ServiceDescriptor;

/// 检查结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// 号码已在服务注册
    Found,
    /// 号码未注册
    NotFound,
    /// 检查失败
    Error,
    /// 服务限流
    RateLimited,
    /// 请求被拦截（WAF / 验证码）
    Blocked,
    /// 请求超时
    Timeout,
}

impl CheckStatus {
    pub const ALL: [CheckStatus; 6] = [
        CheckStatus::Found,
        CheckStatus::NotFound,
        CheckStatus::Error,
        CheckStatus::RateLimited,
        CheckStatus::Blocked,
        CheckStatus::Timeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Found => "found",
            CheckStatus::NotFound => "not_found",
            CheckStatus::Error => "error",
            CheckStatus::RateLimited => "rate_limited",
            CheckStatus::Blocked => "blocked",
            CheckStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 错误原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// 描述符无法渲染出合法请求
    InvalidDescriptor,
    /// HTTP 引擎拒绝了请求（例如代理地址无效）
    InvalidRequest,
    /// 服务要求代理但没有可用代理
    ProxyUnavailable,
    /// 网络错误
    Network,
    /// 运行被取消，部分端点未执行
    Cancelled,
    /// 内部错误
    Internal,
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ErrorReason::InvalidDescriptor => "invalid_descriptor",
            ErrorReason::InvalidRequest => "invalid_request",
            ErrorReason::ProxyUnavailable => "proxy_unavailable",
            ErrorReason::Network => "network",
            ErrorReason::Cancelled => "cancelled",
            ErrorReason::Internal => "internal",
        };
        f.write_str(value)
    }
}

/// 信号极性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalPolarity {
    Success,
    Failure,
}

/// 命中的信号，作为结果的证据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedSignal {
    /// 所属端点名称
    pub endpoint: String,
    pub polarity: SignalPolarity,
    /// 信号在列表中的位置
    pub index: usize,
    /// 信号类型
    pub rule: String,
    pub weight: f64,
    /// 命中的具体内容
    pub evidence: String,
}

/// 任务去重键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub candidate_number: String,
    pub service_key: String,
}

/// 检查任务：一个号码对一个服务
#[derive(Debug, Clone)]
pub struct CheckTask {
    pub candidate_number: String,
    pub descriptor: Arc<ServiceDescriptor>,
}

impl CheckTask {
    pub fn new(candidate_number: impl Into<String>, descriptor: Arc<ServiceDescriptor>) -> Self {
        Self {
            candidate_number: candidate_number.into(),
            descriptor,
        }
    }

    pub fn service_key(&self) -> &str {
        &self.descriptor.service_key
    }

    pub fn key(&self) -> TaskKey {
        TaskKey {
            candidate_number: self.candidate_number.clone(),
            service_key: self.descriptor.service_key.clone(),
        }
    }
}

/// 检查结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub candidate_number: String,
    pub service_key: String,
    pub status: CheckStatus,
    /// 0..=100
    pub confidence: f64,
    #[serde(default)]
    pub matched_signals: Vec<MatchedSignal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// 实际发出的请求次数（含重试），每个端点不超过 `max_retries + 1`
    #[serde(default)]
    pub attempts: u32,
}

impl CheckResult {
    pub fn new(
        candidate_number: impl Into<String>,
        service_key: impl Into<String>,
        status: CheckStatus,
        confidence: f64,
    ) -> Self {
        Self {
            candidate_number: candidate_number.into(),
            service_key: service_key.into(),
            status,
            confidence: confidence.clamp(0.0, 100.0),
            matched_signals: Vec::new(),
            evidence_url: None,
            timestamp: Utc::now(),
            error_reason: None,
            detail: None,
            attempts: 0,
        }
    }

    /// 创建错误结果
    pub fn error(task: &CheckTask, reason: ErrorReason, detail: impl Into<String>) -> Self {
        let mut result = Self::new(
            task.candidate_number.clone(),
            task.service_key(),
            CheckStatus::Error,
            0.0,
        );
        result.error_reason = Some(reason);
        result.detail = Some(detail.into());
        result
    }

    pub fn with_signals(mut self, signals: Vec<MatchedSignal>) -> Self {
        self.matched_signals = signals;
        self
    }

    pub fn with_evidence_url(mut self, url: Option<String>) -> Self {
        self.evidence_url = url;
        self
    }

    pub fn with_error(mut self, reason: ErrorReason, detail: impl Into<String>) -> Self {
        self.error_reason = Some(reason);
        self.detail = Some(detail.into());
        self
    }

    pub fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// 一次运行的汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// 去重后入队的任务数
    pub total: usize,
    pub found: usize,
    pub not_found: usize,
    pub error: usize,
    pub rate_limited: usize,
    pub blocked: usize,
    pub timeout: usize,
    /// 取消时尚未执行的任务数
    pub cancelled: usize,
    /// 结果通道已关闭而未能投递的结果数
    pub undelivered: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn new(total: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            total,
            found: 0,
            not_found: 0,
            error: 0,
            rate_limited: 0,
            blocked: 0,
            timeout: 0,
            cancelled: 0,
            undelivered: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// 记录一个已产生的结果
    pub fn record(&mut self, status: CheckStatus) {
        match status {
            CheckStatus::Found => self.found += 1,
            CheckStatus::NotFound => self.not_found += 1,
            CheckStatus::Error => self.error += 1,
            CheckStatus::RateLimited => self.rate_limited += 1,
            CheckStatus::Blocked => self.blocked += 1,
            CheckStatus::Timeout => self.timeout += 1,
        }
    }

    pub fn count(&self, status: CheckStatus) -> usize {
        match status {
            CheckStatus::Found => self.found,
            CheckStatus::NotFound => self.not_found,
            CheckStatus::Error => self.error,
            CheckStatus::RateLimited => self.rate_limited,
            CheckStatus::Blocked => self.blocked,
            CheckStatus::Timeout => self.timeout,
        }
    }

    /// 已产生结果的任务数
    pub fn completed(&self) -> usize {
        CheckStatus::ALL.iter().map(|s| self.count(*s)).sum()
    }
}
