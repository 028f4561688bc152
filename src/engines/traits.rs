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
use reqwest::Method;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// 引擎错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    /// 请求失败
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// 超时
    #[error("Timeout")]
    Timeout,
    /// 连接失败
    #[error("Connection failed: {0}")]
    Connect(String),
    /// 请求本身无法构造（例如代理地址无效）
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// 其他错误
    #[error("Other error: {0}")]
    Other(String),
}

impl EngineError {
    /// 是否为超时
    pub fn is_timeout(&self) -> bool {
        match self {
            EngineError::Timeout => true,
            EngineError::RequestFailed(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// 判断错误是否可重试
    ///
    /// # 返回值
    ///
    /// * `true` - 传输层错误，换个时间再试可能成功
    /// * `false` - 请求构造错误，重试没有意义
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::RequestFailed(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode()
            }
            EngineError::Timeout | EngineError::Connect(_) => true,
            EngineError::InvalidRequest(_) | EngineError::Other(_) => false,
        }
    }
}

/// 请求体
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
    /// 已编码好的原始请求体
    Raw(String),
}

/// 探测请求
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub method: Method,
    /// 目标URL
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    /// 超时时间
    pub timeout: Duration,
    /// 代理地址
    pub proxy: Option<String>,
}

impl ProbeRequest {
    pub fn new(method: Method, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            timeout,
            proxy: None,
        }
    }

    /// 设置请求头，同名（不区分大小写）则覆盖
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }
}

/// 探测响应
#[derive(Debug, Clone, Default)]
pub struct ProbeResponse {
    /// HTTP状态码
    pub status_code: u16,
    /// 响应头，键为小写
    pub headers: HashMap<String, String>,
    /// 响应内容
    pub body: String,
    /// 响应时间（毫秒）
    pub response_time_ms: u64,
    /// 跟随重定向后的最终URL
    pub final_url: String,
}

impl ProbeResponse {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// 按名称查找响应头（不区分大小写）
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// HTTP 引擎特质
///
/// 执行器只通过这个接口发送请求，测试中可以替换为脚本化的实现。
#[async_trait]
pub trait HttpEngine: Send + Sync {
    /// 发送一次请求
    ///
    /// # 参数
    ///
    /// * `request` - 已渲染完成的请求
    ///
    /// # 返回值
    ///
    /// * `Ok(ProbeResponse)` - 收到任何 HTTP 响应（包括 4xx/5xx）
    /// * `Err(EngineError)` - 传输层失败
    async fn send(&self, request: &ProbeRequest) -> Result<ProbeResponse, EngineError>;

    /// 获取引擎名称
    fn name(&self) -> &'static str;
}
