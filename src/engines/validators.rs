// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::traits::ProbeResponse;

/// 常见 WAF / 验证码页面的特征（小写）
const BLOCK_PAGE_MARKERS: [&str; 9] = [
    "attention required! | cloudflare",
    "cf-chl-bypass",
    "/cdn-cgi/challenge-platform",
    "px-captcha",
    "unusual traffic from your computer network",
    "are you a robot",
    "request unsuccessful. incapsula incident",
    "<title>access denied</title>",
    "g-recaptcha-response",
];

/// 响应头中的拦截特征
const BLOCK_HEADER_MARKERS: [(&str, &str); 2] = [("cf-mitigated", "challenge"), ("x-datadome", "protected")];

/// 检查响应是否为拦截页
///
/// # 参数
///
/// * `response` - 响应
/// * `extra_markers` - 描述符声明的额外标记，不区分大小写
///
/// # 返回值
///
/// 命中的标记；未命中返回 `None`
pub fn detect_block_page(response: &ProbeResponse, extra_markers: &[String]) -> Option<String> {
    for (name, value) in BLOCK_HEADER_MARKERS {
        if response
            .header(name)
            .is_some_and(|v| v.eq_ignore_ascii_case(value))
        {
            return Some(format!("{}: {}", name, value));
        }
    }

    let body = response.body.to_lowercase();
    BLOCK_PAGE_MARKERS
        .iter()
        .map(|marker| marker.to_string())
        .chain(
            extra_markers
                .iter()
                .filter(|m| !m.trim().is_empty())
                .map(|m| m.to_lowercase()),
        )
        .find(|marker| body.contains(marker.as_str()))
}

/// 是否为限流状态码
pub fn is_rate_limit_status(status: u16, declared: &[u16]) -> bool {
    status == 429 || declared.contains(&status)
}
