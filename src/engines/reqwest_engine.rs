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

use crate::engines::traits::{EngineError, HttpEngine, ProbeRequest, ProbeResponse, RequestBody};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::time::Instant;
use tracing::warn;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const BROWSER_HEADERS: [(&str, &str); 6] = [
    ("accept", "application/json, text/plain, */*"),
    ("accept-language", "en-US,en;q=0.9"),
    ("dnt", "1"),
    ("sec-fetch-dest", "empty"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-site", "same-origin"),
];

/// HTTP 引擎
///
/// 基于reqwest实现。每个请求使用独立的客户端，cookie 互不影响，
/// 并按请求设置代理和超时。
#[derive(Debug, Clone, Default)]
pub struct ReqwestEngine;

impl ReqwestEngine {
    pub fn new() -> Self {
        Self
    }

    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in BROWSER_HEADERS {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        headers
    }
}

#[async_trait]
impl HttpEngine for ReqwestEngine {
    /// 执行HTTP请求
    ///
    /// # 参数
    ///
    /// * `request` - 探测请求
    ///
    /// # 返回值
    ///
    /// * `Ok(ProbeResponse)` - 任意状态码的响应
    /// * `Err(EngineError)` - 请求过程中出现的错误
    async fn send(&self, request: &ProbeRequest) -> Result<ProbeResponse, EngineError> {
        // Build headers
        let mut headers = HeaderMap::new();
        for (k, v) in &request.headers {
            match (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(v),
            ) {
                (Ok(k), Ok(v)) => {
                    headers.insert(k, v);
                }
                _ => warn!("Skipping invalid header {}", k),
            }
        }

        // Each request gets a fresh client for cookie isolation
        let mut builder = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(Self::default_headers())
            .timeout(request.timeout)
            .cookie_store(true);

        // Handle proxy
        if let Some(proxy_url) = &request.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| EngineError::InvalidRequest(format!("Invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;

        let mut call = client
            .request(request.method.clone(), &request.url)
            .headers(headers);
        if !request.query.is_empty() {
            call = call.query(&request.query);
        }
        call = match &request.body {
            Some(RequestBody::Form(fields)) => call.form(fields),
            Some(RequestBody::Json(value)) => call.json(value),
            Some(RequestBody::Raw(raw)) => call.body(raw.clone()),
            None => call,
        };

        let start = Instant::now();
        let response = call.send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout
            } else if e.is_connect() {
                EngineError::Connect(e.to_string())
            } else {
                EngineError::RequestFailed(e)
            }
        })?;

        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();

        let mut response_headers = HashMap::new();
        for (k, v) in response.headers() {
            if let Ok(v_str) = v.to_str() {
                response_headers.insert(k.as_str().to_string(), v_str.to_string());
            }
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout
            } else {
                EngineError::RequestFailed(e)
            }
        })?;

        Ok(ProbeResponse {
            status_code,
            headers: response_headers,
            body,
            response_time_ms: start.elapsed().as_millis() as u64,
            final_url,
        })
    }

    /// 获取引擎名称
    fn name(&self) -> &'static str {
        "reqwest"
    }
}

#[cfg(test)]
#[path = "reqwest_engine_test.rs"]
mod tests;
