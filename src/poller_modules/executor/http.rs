//! HTTP, keyword and JSON-query checks.
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use super::{CheckConfig, CheckExecutor, ExecutionError, elapsed_ms};
use crate::evaluation::json_query;
use crate::version::user_agent;
use crate::evaluation::status_codes::AcceptedStatusCodes;
use crate::models::{CheckResult, CheckStatus};
use crate::poller_modules::dns_cache::CachedDnsResolve;

/// `headers` may be a JSON object or a JSON-encoded string of one. Unparsable
/// input means no extra headers.
fn parse_headers(value: Option<&Value>) -> Result<HeaderMap, ExecutionError> {
    let parsed;
    let object = match value {
        Some(Value::Object(map)) => map,
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => {
                parsed = map;
                &parsed
            }
            _ => return Ok(HeaderMap::new()),
        },
        _ => return Ok(HeaderMap::new()),
    };

    let mut headers = HeaderMap::new();
    for (name, value) in object {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ExecutionError::Config(format!("Invalid header name: {name}")))?;
        let value = HeaderValue::from_str(&rendered)
            .map_err(|_| ExecutionError::Config(format!("Invalid value for header {name}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

pub(crate) fn map_reqwest_error(e: reqwest::Error, timeout_secs: f64) -> ExecutionError {
    if e.is_timeout() {
        ExecutionError::Timeout(format!("Request timed out after {timeout_secs:.1}s"))
    } else {
        let mut message = e.to_string();
        let mut source = std::error::Error::source(&e);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        ExecutionError::Transport(message)
    }
}

pub async fn check_http(executor: &CheckExecutor, config: &CheckConfig<'_>) -> Result<CheckResult, ExecutionError> {
    let url = config
        .str("url")
        .ok_or_else(|| ExecutionError::Config("URL is required".to_string()))?;
    let timeout = config.timeout();
    let headers = parse_headers(config.raw("headers"))?;
    let method_name = config.str("method").unwrap_or("GET").to_ascii_uppercase();
    let method = Method::from_bytes(method_name.as_bytes())
        .map_err(|_| ExecutionError::Config(format!("Invalid HTTP method: {method_name}")))?;
    let accepted = AcceptedStatusCodes::from_config(
        config
            .raw("accepted_statuscodes")
            .or_else(|| config.raw("accepted_statuscodes_json")),
    );

    let client = reqwest::Client::builder()
        .user_agent(user_agent())
        .timeout(timeout)
        .danger_accept_invalid_certs(config.flag("ignoreTls"))
        .dns_resolver(Arc::new(CachedDnsResolve::new(
            Arc::clone(executor.dns()),
            config.dns_options(),
        )))
        .build()
        .map_err(|e| ExecutionError::Config(format!("Failed to build HTTP client: {e}")))?;

    let mut request = client.request(method, url).headers(headers);
    if let Some(body) = config.str("body") {
        request = request.body(body.to_string());
    }

    let start = Instant::now();
    let response = request
        .send()
        .await
        .map_err(|e| map_reqwest_error(e, timeout.as_secs_f64()))?;
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| map_reqwest_error(e, timeout.as_secs_f64()))?;
    let latency_ms = elapsed_ms(start);

    let result = if accepted.accepts(status) {
        CheckResult::up("OK", Some(latency_ms))
    } else {
        CheckResult::down(format!("Unexpected status code {status}"), Some(latency_ms))
    };
    Ok(result.with_body(body))
}

pub async fn check_keyword(executor: &CheckExecutor, config: &CheckConfig<'_>) -> Result<CheckResult, ExecutionError> {
    let response = check_http(executor, config).await?;
    if response.status != CheckStatus::Up {
        return Ok(response);
    }
    let body = response.raw_body.as_deref().unwrap_or_default();
    let keyword = config.text("keyword").unwrap_or_default();
    let invert = config.flag("invertKeyword");
    let found = body.contains(&keyword);

    Ok(match (found, invert) {
        (true, false) | (false, true) => CheckResult::up("Keyword matched", response.latency_ms),
        (false, false) => CheckResult::down("Keyword not found", response.latency_ms),
        (true, true) => CheckResult::down("Keyword found", response.latency_ms),
    })
}

pub async fn check_json_query(executor: &CheckExecutor, config: &CheckConfig<'_>) -> Result<CheckResult, ExecutionError> {
    let response = check_http(executor, config).await?;
    if response.status != CheckStatus::Up {
        return Ok(response);
    }
    let body = Value::String(response.raw_body.clone().unwrap_or_default());
    let expression = config.text("jsonPath").unwrap_or_default();
    let operator = config.str("jsonPathOperator").unwrap_or("==");
    let expected = config.text("expectedValue").unwrap_or_default();

    let outcome = json_query::evaluate(&body, &expression, operator, &expected)?;
    Ok(if outcome.passed {
        CheckResult::up("JSON query matched", response.latency_ms)
    } else {
        CheckResult::down("JSON query failed", response.latency_ms)
    })
}
