// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// 该模块定义了系统的核心业务实体，包括：
/// - 服务描述符（descriptor）：声明如何探测一个服务
/// - 检查（check）：检查任务、检查结果和运行汇总
/// - 代理（proxy）：代理记录及健康状态
pub mod check;
pub mod descriptor;
pub mod proxy;
