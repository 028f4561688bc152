// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::Utc;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::models::proxy::{ProxyHealth, ProxyOutcome, ProxyRecord};

/// 代理池配置
#[derive(Clone, Debug)]
pub struct ProxyPoolConfig {
    /// 连续失败多少次后判定为不可用
    pub dead_after_failures: u32,
    /// 不可用的代理在多久之后重新参与分配，`None` 表示永不恢复
    pub revive_after: Option<Duration>,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            dead_after_failures: 3,
            revive_after: None,
        }
    }
}

/// 代理租约
///
/// 检查结束后交还给代理池，并附带使用结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyLease {
    pub address: String,
    index: usize,
}

/// 代理池统计信息
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProxyPoolStatus {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub dead: usize,
}

#[derive(Debug)]
struct PoolState {
    records: Vec<ProxyRecord>,
    /// 轮询游标
    cursor: usize,
}

/// 代理池
///
/// 在健康代理之间轮询分配；只有必须走代理的任务才会退回到降级代理；不可用的代理不再分配。
#[derive(Debug)]
pub struct ProxyPool {
    state: Mutex<PoolState>,
    config: ProxyPoolConfig,
}

impl ProxyPool {
    /// 创建代理池
    ///
    /// # 参数
    ///
    /// * `addresses` - 代理地址列表，重复地址只保留一个
    /// * `config` - 配置
    pub fn new<I, S>(addresses: I, config: ProxyPoolConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut records: Vec<ProxyRecord> = Vec::new();
        for address in addresses {
            let address: String = address.into();
            let address = address.trim().to_string();
            if address.is_empty() || records.iter().any(|r| r.address == address) {
                continue;
            }
            records.push(ProxyRecord::new(address));
        }

        let pool = Self {
            state: Mutex::new(PoolState { records, cursor: 0 }),
            config: ProxyPoolConfig {
                dead_after_failures: config.dead_after_failures.max(1),
                ..config
            },
        };
        pool.update_gauges(&pool.state.lock());
        pool
    }

    /// 空代理池
    pub fn empty() -> Self {
        Self::new(Vec::<String>::new(), ProxyPoolConfig::default())
    }

    /// 是否配置了代理
    pub fn has_proxies(&self) -> bool {
        !self.state.lock().records.is_empty()
    }

    /// 分配一个代理
    ///
    /// # 参数
    ///
    /// * `required` - 服务是否必须走代理。为 `false` 时只分配健康代理，
    ///   没有健康代理就直连；为 `true` 时可退回到降级代理
    ///
    /// # 返回值
    ///
    /// * `Some(ProxyLease)` - 分配到的代理
    /// * `None` - 没有可分配的代理
    pub fn acquire(&self, required: bool) -> Option<ProxyLease> {
        let mut state = self.state.lock();
        if state.records.is_empty() {
            return None;
        }
        self.revive_expired(&mut state);

        let len = state.records.len();
        let tiers: &[ProxyHealth] = if required {
            &[ProxyHealth::Healthy, ProxyHealth::Degraded]
        } else {
            &[ProxyHealth::Healthy]
        };
        for &tier in tiers {
            for offset in 0..len {
                let index = (state.cursor + offset) % len;
                if state.records[index].health != tier {
                    continue;
                }
                state.cursor = (index + 1) % len;
                let record = &mut state.records[index];
                record.last_used_at = Some(Utc::now());
                return Some(ProxyLease {
                    address: record.address.clone(),
                    index,
                });
            }
        }

        if required {
            warn!("ALARM: no usable proxy left in pool of {}", len);
        } else {
            debug!("No healthy proxy in pool of {}, going direct", len);
        }
        None
    }

    /// 交还代理并记录结果
    pub fn release(&self, lease: ProxyLease, outcome: ProxyOutcome) {
        let mut state = self.state.lock();
        let Some(record) = state.records.get_mut(lease.index) else {
            return;
        };
        if record.address != lease.address {
            return;
        }

        match outcome {
            ProxyOutcome::Success => {
                record.total_successes += 1;
                record.consecutive_failures = 0;
                record.dead_since = None;
                if record.health != ProxyHealth::Healthy {
                    info!("Proxy {} recovered", record.address);
                }
                record.health = ProxyHealth::Healthy;
            }
            ProxyOutcome::Failure => {
                record.total_failures += 1;
                record.consecutive_failures += 1;
                counter!("tessera_proxy_failures_total", "proxy" => record.address.clone())
                    .increment(1);

                if record.consecutive_failures >= self.config.dead_after_failures {
                    if record.health != ProxyHealth::Dead {
                        warn!(
                            "Proxy {} marked dead after {} consecutive failures",
                            record.address, record.consecutive_failures
                        );
                    }
                    record.health = ProxyHealth::Dead;
                    record.dead_since = Some(Instant::now());
                } else {
                    record.health = ProxyHealth::Degraded;
                }
            }
        }

        self.update_gauges(&state);
    }

    /// 获取代理池统计信息
    pub fn status(&self) -> ProxyPoolStatus {
        Self::count(&self.state.lock())
    }

    /// 所有代理记录的快照
    pub fn records(&self) -> Vec<ProxyRecord> {
        self.state.lock().records.clone()
    }

    fn revive_expired(&self, state: &mut PoolState) {
        let Some(revive_after) = self.config.revive_after else {
            return;
        };
        for record in state.records.iter_mut() {
            let expired = record
                .dead_since
                .is_some_and(|since| since.elapsed() >= revive_after);
            if record.health == ProxyHealth::Dead && expired {
                info!("Proxy {} revived after cooldown", record.address);
                record.health = ProxyHealth::Degraded;
                record.consecutive_failures = 0;
                record.dead_since = None;
            }
        }
    }

    fn count(state: &PoolState) -> ProxyPoolStatus {
        let mut status = ProxyPoolStatus {
            total: state.records.len(),
            ..ProxyPoolStatus::default()
        };
        for record in &state.records {
            match record.health {
                ProxyHealth::Healthy => status.healthy += 1,
                ProxyHealth::Degraded => status.degraded += 1,
                ProxyHealth::Dead => status.dead += 1,
            }
        }
        status
    }

    fn update_gauges(&self, state: &PoolState) {
        let status = Self::count(state);
        gauge!("tessera_proxies_healthy").set(status.healthy as f64);
        gauge!("tessera_proxies_dead").set(status.dead as f64);
    }
}
