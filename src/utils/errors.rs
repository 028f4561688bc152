// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::path::PathBuf;
use thiserror::Error;

/// 描述符错误类型
///
/// 描述符在加载阶段校验，任何模板或结构问题都在这里一次性暴露，
/// 不会拖到请求阶段才出现。
#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("描述符 {service} 无效: {reason}")]
    Invalid { service: String, reason: String },

    #[error("描述符 {service} 的端点 {endpoint} 无效: {reason}")]
    InvalidEndpoint {
        service: String,
        endpoint: String,
        reason: String,
    },

    #[error("重复的服务标识: {0}")]
    DuplicateServiceKey(String),

    #[error("无法读取描述符文件 {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("无法解析描述符文件 {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// 模板渲染错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unresolved placeholder: ${{{0}}}")]
    UnresolvedPlaceholder(String),

    #[error("unterminated placeholder in template: {0}")]
    Unterminated(String),
}
