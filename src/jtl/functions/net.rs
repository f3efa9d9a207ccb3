use super::text::hmac_sha1_base64;
use super::{json_arg, present_arg, text_arg};
use crate::codec::http::{decode_body, insert_if_absent, CurlRequest};
use crate::context::{EvalError, EventContext};
use crate::jdoc::{to_text, JDoc};
use crate::jtl::eval::is_truthy;
use chrono::Utc;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use url::Url;
use uuid::Uuid;

/// RFC 3986 unreserved characters stay literal.
const OAUTH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// `curl(verb, url[, body[, headers[, retry]]])`.
pub(super) fn curl(ctx: &EventContext, _: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    let mut request = request_from_args(ctx, args, 0)?;
    request.retry = present_arg(args, 4).is_some_and(is_truthy);
    perform(ctx, &request)
}

/// `curlOAuth1(keyFile, verb, url[, body[, headers]])`.
pub(super) fn curl_oauth1(
    ctx: &EventContext,
    _: &JDoc,
    args: &[JsonValue],
) -> Result<JsonValue, EvalError> {
    let key_file = text_arg(args, 0);
    let raw = std::fs::read_to_string(&key_file).map_err(|err| {
        EvalError::runtime(format!("unable to read OAuth1 key file `{key_file}`: {err}"))
    })?;
    let keys: OAuth1Keys = serde_json::from_str(&raw).map_err(|err| {
        EvalError::parse(format!("invalid OAuth1 key file `{key_file}`: {err}"))
    })?;

    let mut request = request_from_args(ctx, args, 1)?;
    let authorization = oauth1_authorization(
        &keys,
        &request.method,
        &request.url,
        &Uuid::new_v4().simple().to_string(),
        Utc::now().timestamp(),
    )?;
    request
        .headers
        .insert("Authorization".to_string(), authorization);
    perform(ctx, &request)
}

/// `loadfile(path)`: file contents as text.
pub(super) fn loadfile(_: &EventContext, _: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    let path = text_arg(args, 0);
    std::fs::read_to_string(&path)
        .map(JsonValue::String)
        .map_err(|err| EvalError::runtime(format!("unable to load file `{path}`: {err}")))
}

fn request_from_args(
    ctx: &EventContext,
    args: &[JsonValue],
    offset: usize,
) -> Result<CurlRequest, EvalError> {
    let method = text_arg(args, offset).trim().to_ascii_uppercase();
    let url = text_arg(args, offset + 1).trim().to_string();
    if url.is_empty() {
        return Err(EvalError::syntax("curl requires a url"));
    }
    let body = present_arg(args, offset + 2).map(to_text);

    let mut headers = BTreeMap::new();
    if let Some(raw) = present_arg(args, offset + 3) {
        match json_arg(raw) {
            JsonValue::Object(map) => {
                for (name, value) in map {
                    headers.insert(name, to_text(&value));
                }
            }
            other => {
                return Err(EvalError::syntax(format!(
                    "curl headers must be a JSON object, got `{}`",
                    to_text(&other)
                )))
            }
        }
    }

    let config = ctx.engine().config();
    insert_if_absent(&mut headers, &config.http_transaction_header, ctx.trace_id());
    insert_if_absent(&mut headers, &config.http_tenant_header, ctx.tenant_id());

    Ok(CurlRequest {
        method: if method.is_empty() { "GET".to_string() } else { method },
        url,
        body,
        headers,
        retry: false,
    })
}

fn perform(ctx: &EventContext, request: &CurlRequest) -> Result<JsonValue, EvalError> {
    let response = ctx.engine().http_caller().call(request)?;
    if !(200..300).contains(&response.status) {
        return Err(EvalError::network(
            &request.url,
            response.status,
            String::from_utf8_lossy(&response.body).into_owned(),
        ));
    }
    Ok(decode_body(&response.body))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuth1Keys {
    pub consumer_key: String,
    pub consumer_secret: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub token_secret: String,
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, OAUTH_ENCODE_SET).to_string()
}

/// `Authorization` header value for an HMAC-SHA1 signed OAuth 1.0 request.
pub fn oauth1_authorization(
    keys: &OAuth1Keys,
    method: &str,
    url: &str,
    nonce: &str,
    timestamp: i64,
) -> Result<String, EvalError> {
    let parsed = Url::parse(url)
        .map_err(|err| EvalError::syntax(format!("invalid url `{url}`: {err}")))?;

    let mut oauth_params = vec![
        ("oauth_consumer_key".to_string(), keys.consumer_key.clone()),
        ("oauth_nonce".to_string(), nonce.to_string()),
        ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
        ("oauth_timestamp".to_string(), timestamp.to_string()),
        ("oauth_version".to_string(), "1.0".to_string()),
    ];
    if !keys.token.is_empty() {
        oauth_params.push(("oauth_token".to_string(), keys.token.clone()));
    }

    let query: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    let mut signed: Vec<(String, String)> = oauth_params
        .iter()
        .chain(query.iter())
        .map(|(key, value)| (encode(key), encode(value)))
        .collect();
    signed.sort();
    let parameter_string = signed
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut base_url = parsed.clone();
    base_url.set_query(None);
    base_url.set_fragment(None);
    let base_string = format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        encode(base_url.as_str()),
        encode(&parameter_string)
    );
    let signing_key = format!(
        "{}&{}",
        encode(&keys.consumer_secret),
        encode(&keys.token_secret)
    );
    let signature = hmac_sha1_base64(signing_key.as_bytes(), base_string.as_bytes())?;

    oauth_params.push(("oauth_signature".to_string(), signature));
    let header = oauth_params
        .iter()
        .map(|(key, value)| format!("{}=\"{}\"", encode(key), encode(value)))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("OAuth {header}"))
}
