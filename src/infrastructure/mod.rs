// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 基础设施层模块
///
/// 提供领域抽象的具体实现和外部资源接入：
/// - 描述符加载（descriptor_loader）：从目录读取 JSON/YAML 描述符
/// - 指标（metrics）：Prometheus 指标导出
/// - 服务实现（services）：限流服务等
pub mod descriptor_loader;
pub mod metrics;
pub mod services;
