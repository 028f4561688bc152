// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::domain::models::descriptor::{PhoneFormat, SignerSpec};
use crate::engines::traits::{ProbeRequest, RequestBody};
use crate::utils::template::digits_only;

type HmacSha256 = Hmac<Sha256>;

const VERSION_FIELD: &str = "ig_sig_key_version";

/// 签名错误
#[derive(Error, Debug)]
pub enum SignerError {
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Signer requires a form body")]
    UnsupportedBody,
}

/// 对请求应用签名器
///
/// 表单字段（号码字段替换为规范写法）序列化为 JSON 后做 HMAC-SHA256，
/// 请求体替换为 `ig_sig_key_version=<v>&signed_body=<sig>.<payload>`。
pub fn apply_signer(
    spec: &SignerSpec,
    candidate: &str,
    request: &mut ProbeRequest,
) -> Result<(), SignerError> {
    match spec {
        SignerSpec::HmacSha256SignedBody {
            key,
            key_version,
            phone_field,
            phone_format,
        } => {
            let mut fields = match request.body.take() {
                Some(RequestBody::Form(fields)) => fields,
                None => Vec::new(),
                Some(other) => {
                    request.body = Some(other);
                    return Err(SignerError::UnsupportedBody);
                }
            };

            let phone = format_phone(candidate, *phone_format);
            match fields.iter_mut().find(|(name, _)| name == phone_field) {
                Some((_, value)) => *value = phone,
                None => fields.push((phone_field.clone(), phone)),
            }

            let version = fields
                .iter()
                .find(|(name, _)| name == VERSION_FIELD)
                .map(|(_, value)| value.clone())
                .unwrap_or_else(|| key_version.clone());

            let payload = json_payload(&fields);
            let signature = sign(key, &payload)?;
            let encoded = urlencoding::encode(&payload).replace("%20", "+");

            request.body = Some(RequestBody::Raw(format!(
                "{}={}&signed_body={}.{}",
                VERSION_FIELD, version, signature, encoded
            )));
            request.set_header(
                "Content-Type",
                "application/x-www-form-urlencoded; charset=UTF-8",
            );
            Ok(())
        }
    }
}

fn format_phone(candidate: &str, format: PhoneFormat) -> String {
    let digits = digits_only(candidate);
    match format {
        PhoneFormat::Digits => digits,
        PhoneFormat::Plus if digits.is_empty() => String::new(),
        PhoneFormat::Plus => format!("+{}", digits),
    }
}

/// HMAC-SHA256 签名，十六进制小写
pub fn sign(key: &str, payload: &str) -> Result<String, SignerError> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// 按字段顺序生成 `{"k": "v", "k2": "v2"}` 形式的 JSON，非 ASCII 字符转义为 `\uXXXX`
fn json_payload(fields: &[(String, String)]) -> String {
    let body = fields
        .iter()
        .map(|(name, value)| format!("{}: {}", json_string(name), json_string(value)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{}}}", body)
}

fn json_string(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    let mut out = String::with_capacity(quoted.len());
    for c in quoted.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}
