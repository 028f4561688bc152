// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use crate::utils::errors::TemplateError;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_]*)\}").expect("placeholder pattern is valid"));

/// 模板中可用的占位符
pub const KNOWN_PLACEHOLDERS: [&str; 4] = ["phone", "phone_digits", "phone_e164", "phone_urlencoded"];

/// 校验用的示例号码
pub const SAMPLE_CANDIDATE: &str = "+420 731 234 567";

/// 模板渲染上下文
///
/// 针对一个候选号码预先计算所有占位符的取值。
#[derive(Debug, Clone)]
pub struct TemplateContext {
    values: BTreeMap<&'static str, String>,
}

impl TemplateContext {
    /// 为候选号码创建渲染上下文
    ///
    /// # 参数
    ///
    /// * `candidate` - 候选号码，按原样代入 `${phone}`
    pub fn for_candidate(candidate: &str) -> Self {
        let digits = digits_only(candidate);
        let e164 = if digits.is_empty() {
            String::new()
        } else {
            format!("+{}", digits)
        };

        let mut values = BTreeMap::new();
        values.insert("phone", candidate.to_string());
        values.insert("phone_digits", digits);
        values.insert("phone_e164", e164);
        values.insert(
            "phone_urlencoded",
            urlencoding::encode(candidate).into_owned(),
        );
        Self { values }
    }

    /// 获取占位符取值
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// 渲染模板
    ///
    /// # 返回值
    ///
    /// * `Ok(String)` - 渲染结果
    /// * `Err(TemplateError)` - 模板包含未知或未闭合的占位符
    pub fn render(&self, template: &str) -> Result<String, TemplateError> {
        if let Some(name) = unresolved_placeholders(template).into_iter().next() {
            return Err(TemplateError::UnresolvedPlaceholder(name));
        }
        // Candidate values may contain "${" themselves, so only the template is checked
        if PLACEHOLDER.replace_all(template, "").contains("${") {
            return Err(TemplateError::Unterminated(template.to_string()));
        }

        let rendered = PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| {
            self.get(&caps[1]).unwrap_or_default().to_string()
        });
        Ok(rendered.into_owned())
    }

    /// 渲染 JSON 值中的所有字符串
    pub fn render_json(&self, value: &serde_json::Value) -> Result<serde_json::Value, TemplateError> {
        use serde_json::Value;

        Ok(match value {
            Value::String(s) => Value::String(self.render(s)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.render_json(v))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), self.render_json(v)?);
                }
                Value::Object(out)
            }
            other => other.clone(),
        })
    }
}

/// 列出模板中无法解析的占位符名称
pub fn unresolved_placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .filter(|name| !KNOWN_PLACEHOLDERS.contains(&name.as_str()))
        .collect()
}

/// 只保留数字
pub fn digits_only(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}
