use super::{int_arg, text_arg};
use crate::context::{EvalError, EventContext};
use crate::jdoc::{to_text, JDoc};
use base64::engine::general_purpose::{STANDARD as BASE64_STANDARD, URL_SAFE as BASE64_URL_SAFE};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use regex::Regex;
use serde_json::Value as JsonValue;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

pub(super) fn upper(_: &EventContext, _: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    Ok(JsonValue::String(text_arg(args, 0).to_uppercase()))
}

pub(super) fn lower(_: &EventContext, _: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    Ok(JsonValue::String(text_arg(args, 0).to_lowercase()))
}

/// `substr(text, start, end)` over characters; bounds are clamped.
pub(super) fn substr(
    _: &EventContext,
    _: &JDoc,
    args: &[JsonValue],
) -> Result<JsonValue, EvalError> {
    let text = text_arg(args, 0);
    let length = text.chars().count() as i64;
    let start = int_arg("substr", args, 1)?.clamp(0, length);
    let end = int_arg("substr", args, 2)?.clamp(0, length);
    if start >= end {
        return Ok(JsonValue::String(String::new()));
    }
    Ok(JsonValue::String(
        text.chars()
            .skip(start as usize)
            .take((end - start) as usize)
            .collect(),
    ))
}

fn compile(pattern: &str) -> Result<Regex, EvalError> {
    Regex::new(pattern)
        .map_err(|err| EvalError::syntax(format!("invalid regular expression `{pattern}`: {err}")))
}

/// `regex(text, pattern[, group])`: the first match (or capture group), empty when absent.
pub(super) fn regex(_: &EventContext, _: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    let text = text_arg(args, 0);
    let pattern = compile(&text_arg(args, 1))?;
    let group = if args.len() > 2 {
        int_arg("regex", args, 2)?.max(0) as usize
    } else {
        0
    };
    let found = pattern
        .captures(&text)
        .and_then(|captures| captures.get(group))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    Ok(JsonValue::String(found))
}

pub(super) fn is_match(
    _: &EventContext,
    _: &JDoc,
    args: &[JsonValue],
) -> Result<JsonValue, EvalError> {
    let pattern = compile(&text_arg(args, 1))?;
    Ok(JsonValue::Bool(pattern.is_match(&text_arg(args, 0))))
}

pub(super) fn base64decode(
    _: &EventContext,
    _: &JDoc,
    args: &[JsonValue],
) -> Result<JsonValue, EvalError> {
    let encoded = text_arg(args, 0);
    let trimmed = encoded.trim();
    let bytes = BASE64_STANDARD
        .decode(trimmed)
        .or_else(|_| BASE64_URL_SAFE.decode(trimmed))
        .map_err(|err| EvalError::runtime(format!("invalid base64 input: {err}")))?;
    Ok(JsonValue::String(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Characters of a string, elements of a sequence, keys of a mapping.
pub(super) fn len(_: &EventContext, _: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    let length = match args.first() {
        Some(JsonValue::Array(items)) => items.len(),
        Some(JsonValue::Object(map)) => map.len(),
        Some(JsonValue::Null) | None => 0,
        Some(other) => to_text(other).chars().count(),
    };
    Ok(JsonValue::from(length))
}

pub(super) fn string(_: &EventContext, _: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    Ok(JsonValue::String(text_arg(args, 0)))
}

/// `hmac(key, data)`: base64 HMAC-SHA1.
pub(super) fn hmac(_: &EventContext, _: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    let signature = hmac_sha1_base64(text_arg(args, 0).as_bytes(), text_arg(args, 1).as_bytes())?;
    Ok(JsonValue::String(signature))
}

pub(super) fn hmac_sha1_base64(key: &[u8], data: &[u8]) -> Result<String, EvalError> {
    let mut mac = HmacSha1::new_from_slice(key)
        .map_err(|err| EvalError::runtime(format!("invalid hmac key: {err}")))?;
    mac.update(data);
    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

/// `hashmod(text, n)`: FNV-1a 32-bit hash modulo `n`.
pub(super) fn hashmod(
    _: &EventContext,
    _: &JDoc,
    args: &[JsonValue],
) -> Result<JsonValue, EvalError> {
    let modulus = int_arg("hashmod", args, 1)?;
    if modulus <= 0 {
        return Err(EvalError::runtime(format!(
            "hashmod modulus must be positive, got {modulus}"
        )));
    }
    let hash = fnv1a32(text_arg(args, 0).as_bytes());
    Ok(JsonValue::from(i64::from(hash) % modulus))
}

pub(crate) fn fnv1a32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_matches_reference_vectors() {
        assert_eq!(fnv1a32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn hmac_sha1_matches_rfc2202() {
        let signature = hmac_sha1_base64(b"Jefe", b"what do ya want for nothing?").expect("hmac");
        // effcdf6ae5eb2fa2d27416d5f184df9c259a7c79
        assert_eq!(signature, "7/zfauXrL6LSdBbV8YTfnCWafHk=");
    }
}
