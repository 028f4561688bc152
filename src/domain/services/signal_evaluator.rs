// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde_json::Value;

use crate::domain::models::check::{MatchedSignal, SignalPolarity};
use crate::domain::models::descriptor::{SignalKind, SignalRule};
use crate::engines::traits::ProbeResponse;

const MAX_EVIDENCE_LEN: usize = 120;

/// 评估结果
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// 0..=100
    pub confidence: f64,
    pub matched: Vec<MatchedSignal>,
}

impl Evaluation {
    /// 是否命中了权重大于0的成功信号
    pub fn has_success_match(&self) -> bool {
        self.matched
            .iter()
            .any(|m| m.polarity == SignalPolarity::Success && m.weight > 0.0)
    }
}

/// 评估响应
///
/// 成功信号加分，失败信号减分，每个信号按 `weight * 100` 计分，结果截断到 0..=100。
/// 纯函数，不做任何 I/O。
///
/// # 参数
///
/// * `endpoint` - 端点名称，写入证据
/// * `response` - 响应
/// * `success_signals` - 成功信号
/// * `failure_signals` - 失败信号
pub fn evaluate(
    endpoint: &str,
    response: &ProbeResponse,
    success_signals: &[SignalRule],
    failure_signals: &[SignalRule],
) -> Evaluation {
    let needs_json = success_signals
        .iter()
        .chain(failure_signals)
        .any(|rule| matches!(rule.kind, SignalKind::JsonPathEquals { .. }));
    let json = if needs_json {
        serde_json::from_str::<Value>(&response.body).ok()
    } else {
        None
    };

    let mut score = 0.0;
    let mut matched = Vec::new();

    for (polarity, rules) in [
        (SignalPolarity::Success, success_signals),
        (SignalPolarity::Failure, failure_signals),
    ] {
        for (index, rule) in rules.iter().enumerate() {
            let Some(evidence) = match_rule(&rule.kind, response, json.as_ref()) else {
                continue;
            };

            let points = rule.weight * 100.0;
            match polarity {
                SignalPolarity::Success => score += points,
                SignalPolarity::Failure => score -= points,
            }

            matched.push(MatchedSignal {
                endpoint: endpoint.to_string(),
                polarity,
                index,
                rule: rule.kind.label().to_string(),
                weight: rule.weight,
                evidence,
            });
        }
    }

    Evaluation {
        confidence: clamp_confidence(score),
        matched,
    }
}

fn clamp_confidence(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 100.0)
}

/// 匹配单个信号，命中时返回证据
fn match_rule(kind: &SignalKind, response: &ProbeResponse, json: Option<&Value>) -> Option<String> {
    match kind {
        SignalKind::StatusEquals { code } => {
            (response.status_code == *code).then(|| format!("status={}", response.status_code))
        }
        SignalKind::StatusRange { min, max } => (*min..=*max)
            .contains(&response.status_code)
            .then(|| format!("status={} in [{}, {}]", response.status_code, min, max)),
        SignalKind::BodyContains { text } => response
            .body
            .contains(text.as_str())
            .then(|| format!("body contains {:?}", truncate(text))),
        SignalKind::BodyNotContains { text } => (!response.body.contains(text.as_str()))
            .then(|| format!("body lacks {:?}", truncate(text))),
        SignalKind::HeaderEquals { name, value } => response
            .header(name)
            .filter(|actual| *actual == value.as_str())
            .map(|actual| format!("{}: {}", name.to_ascii_lowercase(), truncate(actual))),
        SignalKind::JsonPathEquals { path, value } => {
            let actual = lookup_json_path(json?, path)?;
            json_values_match(actual, value).then(|| format!("{} = {}", path, truncate(&actual.to_string())))
        }
        SignalKind::BodyMatches { pattern } => pattern
            .regex()
            .find(&response.body)
            .map(|m| format!("body matches {:?}", truncate(m.as_str()))),
    }
}

/// 按 `$.a.b[0]` 形式的路径查找 JSON 值
///
/// 只支持对象键和数组下标，路径不存在时返回 `None`。
pub fn lookup_json_path<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    let trimmed = path.trim();
    let trimmed = trimmed.strip_prefix('$').unwrap_or(trimmed);
    let trimmed = trimmed.strip_prefix('.').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Some(root);
    }

    let mut current = root;
    for segment in trimmed.split('.') {
        let mut parts = segment.split('[');
        let key = parts.next()?;
        if !key.is_empty() {
            current = current.as_object()?.get(key)?;
        }
        for index in parts {
            let index: usize = index.strip_suffix(']')?.trim().parse().ok()?;
            current = current.as_array()?.get(index)?;
        }
    }
    Some(current)
}

/// 宽松比较：字符串和标量按字面形式比较，`"1"` 与 `1`、`"true"` 与 `true` 视为相等
fn json_values_match(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (actual, expected) {
        (Value::String(a), Value::String(e)) => a == e,
        (Value::String(text), scalar) | (scalar, Value::String(text)) => {
            scalar_literal(scalar).is_some_and(|literal| literal == *text)
        }
        (Value::Number(a), Value::Number(e)) => match (a.as_f64(), e.as_f64()) {
            (Some(a), Some(e)) => a == e,
            _ => false,
        },
        _ => false,
    }
}

fn scalar_literal(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some("null".to_string()),
        _ => None,
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_EVIDENCE_LEN {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX_EVIDENCE_LEN).collect();
    out.push('…');
    out
}
