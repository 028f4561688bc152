// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域服务模块
///
/// 包含的服务：
/// - 信号评估（signal_evaluator）：根据信号规则为响应打分
/// - 限流服务（rate_limiting_service）：按服务间隔发放请求许可
pub mod rate_limiting_service;
pub mod signal_evaluator;
