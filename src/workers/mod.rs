// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工作器模块
///
/// 提供检查工作器和运行编排
pub mod check_worker;
pub mod manager;
pub mod worker;

pub use manager::{CheckOrchestrator, OrchestratorConfig, RunHandle};
pub use worker::Worker;
