// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use url::Url;
use validator::Validate;

use crate::utils::errors::DescriptorError;
use crate::utils::template::{unresolved_placeholders, TemplateContext, SAMPLE_CANDIDATE};

/// 未声明时使用的请求间隔（秒）
pub const DEFAULT_RECOMMENDED_DELAY_SECS: f64 = 2.0;

const MAX_RECOMMENDED_DELAY_SECS: f64 = 86_400.0;

const SUPPORTED_METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

fn default_schema_version() -> String {
    "1.0".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_endpoint_name() -> String {
    "probe".to_string()
}

fn default_weight() -> f64 {
    0.5
}

/// 服务描述符
///
/// 声明如何判断一个号码是否在某个服务注册过，纯数据，不含代码。
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServiceDescriptor {
    /// 描述符格式版本
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    /// 服务唯一标识
    #[validate(length(min = 1, message = "service_key must not be empty"))]
    pub service_key: String,

    /// 展示名称
    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// 是否必须通过代理访问
    #[serde(default)]
    pub requires_proxy: bool,

    /// 同一服务两次请求之间的最小间隔（秒）
    #[serde(default)]
    #[validate(range(min = 0.0, max = 86400.0, message = "recommended_delay out of range"))]
    pub recommended_delay: Option<f64>,

    /// 单次请求超时（秒）
    #[serde(default)]
    #[validate(range(min = 1, max = 600, message = "request_timeout out of range"))]
    pub request_timeout: Option<u64>,

    /// 该服务允许的最大并发 worker 数
    #[serde(default)]
    #[validate(range(min = 1, message = "max_workers must be at least 1"))]
    pub max_workers: Option<usize>,

    #[serde(default)]
    pub rate_limits: Option<RateLimits>,

    /// 按顺序执行的端点
    #[validate(length(min = 1, message = "at least one endpoint is required"), nested)]
    pub endpoints: Vec<EndpointSpec>,
}

/// 服务声明的限速
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RateLimits {
    /// 每分钟请求数
    #[serde(default)]
    pub rpm: Option<u32>,
}

/// 单个 HTTP 端点的声明
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EndpointSpec {
    #[serde(default = "default_endpoint_name")]
    pub name: String,

    #[serde(default = "default_method")]
    pub method: String,

    /// URL 模板
    pub url: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// 查询参数模板
    #[serde(default)]
    pub query: BTreeMap<String, String>,

    #[serde(default)]
    pub body: Option<BodyTemplate>,

    #[serde(default)]
    #[validate(nested)]
    pub success_signals: Vec<SignalRule>,

    #[serde(default)]
    #[validate(nested)]
    pub failure_signals: Vec<SignalRule>,

    #[serde(default)]
    pub retry: RetrySpec,

    /// 额外视为限流的状态码（429 始终视为限流）
    #[serde(default)]
    pub rate_limit_statuses: Vec<u16>,

    /// 额外的封禁页面标记（不区分大小写）
    #[serde(default)]
    pub block_markers: Vec<String>,

    #[serde(default)]
    pub signer: Option<SignerSpec>,
}

/// 请求体模板
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum BodyTemplate {
    /// application/x-www-form-urlencoded
    Form(BTreeMap<String, String>),
    /// application/json，所有字符串值都会做占位符替换
    Json(serde_json::Value),
    Raw(String),
}

/// 重试声明
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrySpec {
    #[serde(default)]
    pub max_retries: u32,
    /// 基础退避时间（毫秒），第 n 次重试前等待 backoff_ms * n
    #[serde(default)]
    pub backoff_ms: u64,
}

/// 信号规则
///
/// `weight` 取值 0..=1，评估时按 100 倍计分。
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct SignalRule {
    #[serde(flatten)]
    pub kind: SignalKind,

    #[serde(default = "default_weight")]
    #[validate(range(min = 0.0, max = 1.0, message = "signal weight must be within 0..=1"))]
    pub weight: f64,
}

impl SignalRule {
    pub fn new(kind: SignalKind, weight: f64) -> Self {
        Self { kind, weight }
    }
}

/// 信号匹配方式
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalKind {
    StatusEquals { code: u16 },
    StatusRange { min: u16, max: u16 },
    BodyContains { text: String },
    BodyNotContains { text: String },
    HeaderEquals { name: String, value: String },
    JsonPathEquals { path: String, value: serde_json::Value },
    BodyMatches { pattern: Pattern },
}

impl SignalKind {
    /// 信号类型名称，用于证据记录
    pub fn label(&self) -> &'static str {
        match self {
            SignalKind::StatusEquals { .. } => "status_equals",
            SignalKind::StatusRange { .. } => "status_range",
            SignalKind::BodyContains { .. } => "body_contains",
            SignalKind::BodyNotContains { .. } => "body_not_contains",
            SignalKind::HeaderEquals { .. } => "header_equals",
            SignalKind::JsonPathEquals { .. } => "json_path_equals",
            SignalKind::BodyMatches { .. } => "body_matches",
        }
    }
}

/// 加载时即编译的正则表达式
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Pattern)
    }

    pub fn regex(&self) -> &Regex {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Pattern::new(&raw).map_err(serde::de::Error::custom)
    }
}

/// 签名器声明
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignerSpec {
    /// 用 HMAC-SHA256 对 JSON 化的表单字段签名，替换为 `signed_body` 表单
    HmacSha256SignedBody {
        key: String,
        #[serde(default = "default_key_version")]
        key_version: String,
        #[serde(default = "default_phone_field")]
        phone_field: String,
        #[serde(default)]
        phone_format: PhoneFormat,
    },
}

fn default_key_version() -> String {
    "4".to_string()
}

fn default_phone_field() -> String {
    "q".to_string()
}

/// 签名时号码的写法
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhoneFormat {
    /// "+<digits>"
    #[default]
    Plus,
    /// "<digits>"
    Digits,
}

impl ServiceDescriptor {
    /// 展示名称，未设置时使用服务标识
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.service_key)
    }

    /// 实际生效的请求间隔
    ///
    /// 取 `recommended_delay` 与 `60 / rpm` 中较大者。
    pub fn effective_delay(&self) -> Duration {
        let base = self
            .recommended_delay
            .unwrap_or(DEFAULT_RECOMMENDED_DELAY_SECS)
            .max(0.0);
        let from_rpm = self
            .rate_limits
            .as_ref()
            .and_then(|limits| limits.rpm)
            .filter(|rpm| *rpm > 0)
            .map(|rpm| 60.0 / f64::from(rpm))
            .unwrap_or(0.0);

        Duration::from_secs_f64(base.max(from_rpm).min(MAX_RECOMMENDED_DELAY_SECS))
    }

    /// 描述符自带的请求超时
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout.map(Duration::from_secs)
    }

    /// 校验描述符
    ///
    /// 结构约束之外，还会用示例号码渲染所有模板，确保请求阶段不会出现未解析的占位符。
    pub fn validate_descriptor(&self) -> Result<(), DescriptorError> {
        self.validate().map_err(|e| DescriptorError::Invalid {
            service: self.service_key.clone(),
            reason: e.to_string(),
        })?;

        for endpoint in &self.endpoints {
            endpoint
                .check()
                .map_err(|reason| DescriptorError::InvalidEndpoint {
                    service: self.service_key.clone(),
                    endpoint: endpoint.name.clone(),
                    reason,
                })?;
        }
        Ok(())
    }
}

impl EndpointSpec {
    fn check(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("endpoint name must not be empty".to_string());
        }

        let method = self.method.to_ascii_uppercase();
        if !SUPPORTED_METHODS.contains(&method.as_str()) {
            return Err(format!("unsupported method: {}", self.method));
        }

        let ctx = TemplateContext::for_candidate(SAMPLE_CANDIDATE);
        for template in self.templates() {
            if let Some(name) = unresolved_placeholders(template).first() {
                return Err(format!("unresolved placeholder ${{{}}}", name));
            }
            ctx.render(template).map_err(|e| e.to_string())?;
        }

        let url = ctx.render(&self.url).map_err(|e| e.to_string())?;
        let parsed = Url::parse(&url).map_err(|e| format!("invalid url {}: {}", self.url, e))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(format!("url must be absolute http(s): {}", self.url));
        }

        for rule in self.success_signals.iter().chain(&self.failure_signals) {
            match &rule.kind {
                SignalKind::StatusRange { min, max } if min > max => {
                    return Err(format!("status_range min {} exceeds max {}", min, max));
                }
                SignalKind::HeaderEquals { name, .. } if name.trim().is_empty() => {
                    return Err("header_equals requires a header name".to_string());
                }
                _ => {}
            }
        }

        if let Some(code) = self
            .rate_limit_statuses
            .iter()
            .find(|code| !(100..=599).contains(*code))
        {
            return Err(format!("invalid rate limit status: {}", code));
        }

        if self.signer.is_some() && !matches!(self.body, None | Some(BodyTemplate::Form(_))) {
            return Err("signer requires a form body".to_string());
        }

        Ok(())
    }

    /// 端点中所有需要渲染的模板字符串
    fn templates(&self) -> Vec<&str> {
        let mut templates = vec![self.url.as_str()];
        for (name, value) in self.headers.iter().chain(&self.query) {
            templates.push(name);
            templates.push(value);
        }
        match &self.body {
            Some(BodyTemplate::Form(fields)) => {
                for (name, value) in fields {
                    templates.push(name);
                    templates.push(value);
                }
            }
            Some(BodyTemplate::Json(value)) => collect_json_strings(value, &mut templates),
            Some(BodyTemplate::Raw(raw)) => templates.push(raw),
            None => {}
        }
        templates
    }
}

fn collect_json_strings<'a>(value: &'a serde_json::Value, out: &mut Vec<&'a str>) {
    match value {
        serde_json::Value::String(s) => out.push(s),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_json_strings(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_json_strings(v, out)),
        _ => {}
    }
}

/// 校验一组描述符
///
/// 每个描述符单独校验，并拒绝重复的服务标识。
pub fn validate_descriptor_set(descriptors: &[ServiceDescriptor]) -> Result<(), DescriptorError> {
    let mut seen = HashSet::new();
    for descriptor in descriptors {
        descriptor.validate_descriptor()?;
        if !seen.insert(descriptor.service_key.as_str()) {
            return Err(DescriptorError::DuplicateServiceKey(
                descriptor.service_key.clone(),
            ));
        }
    }
    Ok(())
}
