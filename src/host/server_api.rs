//! `server-api` - generic HTTP exchange with the storage server

use log::debug;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, Url};
use serde_json::{json, Map, Value};

use crate::config::AppConfig;
use crate::error::{HostError, CODE_BAD_REQUEST};
use crate::ipc::HostCall;
use crate::remote_path::fs_endpoint;

/// Query values are sent as plain strings; JSON strings lose their quotes.
fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `{base}{endpoint}` with `query` appended as URL query pairs.
pub(crate) fn build_url(
    base: &str,
    endpoint: &str,
    query: &Map<String, Value>,
) -> Result<Url, HostError> {
    let mut url = Url::parse(&format!("{}{}", base, endpoint))
        .map_err(|e| HostError::new(format!("Invalid URL {}{}: {}", base, endpoint, e), CODE_BAD_REQUEST))?;
    let pairs: Vec<(&String, String)> = query
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k, query_value(v)))
        .collect();
    if !pairs.is_empty() {
        let mut serializer = url.query_pairs_mut();
        for (key, value) in pairs {
            serializer.append_pair(key, &value);
        }
    }
    Ok(url)
}

/// Storage URL of `remote` carrying the session token.
pub(crate) fn fs_url(config: &AppConfig, remote: &str, token: &str) -> Result<Url, HostError> {
    let mut query = Map::new();
    query.insert("token".to_string(), Value::from(token));
    build_url(&config.base_url(), &fs_endpoint(remote), &query)
}

/// Response bodies are JSON when they parse, a string otherwise, null when empty.
pub(crate) fn parse_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

pub(crate) async fn server_api(
    client: &Client,
    config: &AppConfig,
    call: &HostCall,
) -> Result<Value, HostError> {
    let endpoint = call
        .str_arg(0)
        .ok_or_else(|| HostError::new("server-api requires an endpoint", CODE_BAD_REQUEST))?;
    let method = call.str_arg(1).unwrap_or("get").to_uppercase();
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| HostError::new(format!("Invalid method {}", method), CODE_BAD_REQUEST))?;
    let empty = Map::new();
    let query = call.arg(2).and_then(Value::as_object).unwrap_or(&empty);
    let headers = call.arg(4).and_then(Value::as_object).unwrap_or(&empty);

    let url = build_url(&config.base_url(), endpoint, query)?;
    debug!("server_api: {} {}", method, url.path());

    let mut request = client.request(method, url);
    for (name, value) in headers {
        request = request.header(name.as_str(), query_value(value));
    }
    if let Some(body) = call.arg(3) {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| HostError::new(e.to_string(), CODE_BAD_REQUEST))?;
        request = request.header(CONTENT_TYPE, "application/json").body(bytes);
    }

    let response = request.send().await?;
    let status = response.status().as_u16();
    let bytes = response.bytes().await?;
    Ok(json!({ "status": status, "body": parse_body(&bytes) }))
}
