// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 包含服务描述符、检查结果等核心模型和信号评估
pub mod domain;

/// 引擎模块
///
/// 实现 HTTP 探测、重试、签名和代理池
pub mod engines;

/// 基础设施模块
///
/// 提供描述符加载、指标导出和限流实现
pub mod infrastructure;

/// 队列模块
///
/// 实现任务去重和分发
pub mod queue;

/// 工具模块
///
/// 提供模板渲染、重试策略、错误类型和日志初始化
pub mod utils;

/// 工作器模块
///
/// 实现检查工作器和运行编排
pub mod workers;
