// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域层模块
///
/// 该模块包含系统的核心业务逻辑，包括：
/// - 领域模型（models）：服务描述符、检查任务与结果、代理状态
/// - 服务（services）：信号评估和限流接口
///
/// 领域层不依赖具体的 HTTP 实现或运行时组件。
pub mod models;
pub mod services;
