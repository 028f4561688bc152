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

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engines::endpoint_executor::ExecutorConfig;
use crate::engines::probe_runner::{
    ConfidenceAggregation, EngineConfig, DEFAULT_CONFIRMATION_THRESHOLD, DEFAULT_REQUEST_TIMEOUT,
};
use crate::engines::proxy_pool::ProxyPoolConfig;
use crate::workers::manager::OrchestratorConfig;

/// 应用程序配置设置
///
/// 包含引擎、工作器、代理、描述符目录和指标导出等配置项
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// 引擎配置
    pub engine: EngineSettings,
    /// 工作器配置
    pub workers: WorkerSettings,
    /// 代理配置
    pub proxy: ProxySettings,
    /// 描述符配置
    pub descriptors: DescriptorSettings,
    /// 指标配置
    #[serde(default)]
    pub metrics: MetricsSettings,
}

/// 引擎配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// 判定为 FOUND 的最低置信度
    pub confirmation_threshold: f64,
    /// 全局请求超时（秒），优先于描述符
    pub request_timeout_secs: Option<u64>,
    /// 多端点置信度合并方式
    pub aggregation: ConfidenceAggregation,
    /// 限流响应是否参与重试
    pub rate_limited_retryable: bool,
    /// 5xx 响应是否参与重试
    pub retry_server_errors: bool,
    /// 达到阈值后跳过剩余端点
    pub stop_on_confirmation: bool,
}

/// 工作器配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    /// 显式 worker 数
    pub count: Option<usize>,
    /// 自动推算时的上限
    pub max_cap: usize,
    /// 结果通道容量
    pub result_buffer: usize,
    /// 限流后的冷却时间（秒），0 表示不冷却
    pub rate_limit_cooldown_secs: u64,
}

/// 代理配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct ProxySettings {
    /// 代理地址列表
    #[serde(default)]
    pub proxies: Vec<String>,
    /// 连续失败多少次后判定为不可用
    pub dead_after_failures: u32,
    /// 不可用代理的恢复时间（秒）
    pub revive_after_secs: Option<u64>,
}

/// 描述符配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct DescriptorSettings {
    /// 描述符目录列表
    #[serde(default)]
    pub dirs: Vec<PathBuf>,
    /// 要运行的服务名，为空时运行全部
    #[serde(default)]
    pub services: Vec<String>,
}

/// 指标配置设置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsSettings {
    /// Prometheus 导出地址，未设置时不启动导出
    pub listen_addr: Option<SocketAddr>,
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次读取默认值、`config/default`、`config/{TESSERA_ENVIRONMENT}`
    /// 和 `TESSERA__` 前缀的环境变量
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载失败
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_from(Path::new("config"))
    }

    /// 从指定配置目录加载
    pub fn load_from(config_dir: &Path) -> Result<Self, ConfigError> {
        let env = std::env::var("TESSERA_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        let builder = Self::with_defaults(Config::builder())?
            .add_source(File::from(config_dir.join("default")).required(false))
            .add_source(File::from(config_dir.join(&env)).required(false))
            .add_source(
                Environment::with_prefix("TESSERA")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("proxy.proxies")
                    .with_list_parse_key("descriptors.dirs")
                    .with_list_parse_key("descriptors.services")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    fn with_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Engine
            .set_default("engine.confirmation_threshold", DEFAULT_CONFIRMATION_THRESHOLD)?
            .set_default("engine.aggregation", "max")?
            .set_default("engine.rate_limited_retryable", false)?
            .set_default("engine.retry_server_errors", false)?
            .set_default("engine.stop_on_confirmation", true)?
            // Workers
            .set_default("workers.max_cap", 16)?
            .set_default("workers.result_buffer", 256)?
            .set_default("workers.rate_limit_cooldown_secs", 60)?
            // Proxy
            .set_default("proxy.proxies", Vec::<String>::new())?
            .set_default("proxy.dead_after_failures", 3)?
            // Descriptors
            .set_default("descriptors.dirs", vec!["descriptors".to_string()])
    }

    /// 转换为探测引擎配置
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            confirmation_threshold: self.engine.confirmation_threshold,
            aggregation: self.engine.aggregation,
            stop_on_confirmation: self.engine.stop_on_confirmation,
            default_request_timeout: DEFAULT_REQUEST_TIMEOUT,
            request_timeout_override: self.engine.request_timeout_secs.map(Duration::from_secs),
            executor: ExecutorConfig {
                rate_limited_retryable: self.engine.rate_limited_retryable,
                retry_server_errors: self.engine.retry_server_errors,
            },
        }
    }

    /// 转换为编排器配置
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            worker_count: self.workers.count,
            max_workers_cap: self.workers.max_cap,
            result_buffer: self.workers.result_buffer,
            rate_limit_cooldown: Duration::from_secs(self.workers.rate_limit_cooldown_secs),
        }
    }

    /// 转换为代理池配置
    pub fn proxy_pool_config(&self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            dead_after_failures: self.proxy.dead_after_failures,
            revive_after: self.proxy.revive_after_secs.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
#[path = "settings_test.rs"]
mod tests;
