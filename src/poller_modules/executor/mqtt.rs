//! MQTT check: subscribe, wait for one message, evaluate it.
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{CheckConfig, CheckExecutor, ExecutionError, elapsed_ms};
use crate::evaluation::conditions::active_conditions;
use crate::evaluation::json_query::{query_value, render_value};
use crate::models::CheckResult;

const DEFAULT_INTERVAL_SECONDS: u64 = 20;
const MIN_DEADLINE: Duration = Duration::from_secs(1);
const KEEP_ALIVE: Duration = Duration::from_secs(10);

/// 80% of the monitor interval (20 s when unset), never below one second.
pub fn message_deadline(interval_seconds: u64) -> Duration {
    let interval = if interval_seconds == 0 {
        DEFAULT_INTERVAL_SECONDS
    } else {
        interval_seconds
    };
    Duration::from_millis(interval * 800).max(MIN_DEADLINE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerScheme {
    Mqtt,
    Mqtts,
    Ws,
    Wss,
}

impl BrokerScheme {
    fn default_port(&self) -> u16 {
        match self {
            BrokerScheme::Mqtt | BrokerScheme::Ws => 1883,
            BrokerScheme::Mqtts | BrokerScheme::Wss => 8883,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerTarget {
    pub scheme: BrokerScheme,
    pub host: String,
}

/// A bare host means `mqtt://`.
pub fn parse_broker(hostname: &str) -> Result<BrokerTarget, ExecutionError> {
    let hostname = hostname.trim();
    let (scheme, rest) = match hostname.split_once("://") {
        None => (BrokerScheme::Mqtt, hostname),
        Some((scheme, rest)) => {
            let scheme = match scheme.to_ascii_lowercase().as_str() {
                "mqtt" | "tcp" => BrokerScheme::Mqtt,
                "mqtts" | "ssl" => BrokerScheme::Mqtts,
                "ws" => BrokerScheme::Ws,
                "wss" => BrokerScheme::Wss,
                other => {
                    return Err(ExecutionError::Config(format!("Unsupported MQTT scheme: {other}")));
                }
            };
            (scheme, rest)
        }
    };
    let host = rest.split('/').next().unwrap_or_default().to_string();
    if host.is_empty() {
        return Err(ExecutionError::Config("Hostname is required".to_string()));
    }
    Ok(BrokerTarget { scheme, host })
}

pub async fn check_mqtt(
    executor: &CheckExecutor,
    config: &CheckConfig<'_>,
    interval_seconds: u64,
) -> Result<CheckResult, ExecutionError> {
    let hostname = config
        .str("hostname")
        .ok_or_else(|| ExecutionError::Config("Hostname is required".to_string()))?;
    let topic = config
        .str("mqttTopic")
        .ok_or_else(|| ExecutionError::Config("MQTT topic is required".to_string()))?;
    let conditions = active_conditions(config.raw("conditions"))?;
    let target = parse_broker(hostname)?;
    let port = config.port().unwrap_or_else(|| target.scheme.default_port());
    let client_id = format!("poller_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);

    let mut options = match target.scheme {
        BrokerScheme::Mqtt => {
            // Plain TCP goes through the poller's DNS cache.
            let ip = executor.resolve_host(&target.host, config).await?;
            MqttOptions::new(client_id, ip.to_string(), port)
        }
        BrokerScheme::Mqtts => {
            let mut options = MqttOptions::new(client_id, target.host.clone(), port);
            options.set_transport(Transport::tls_with_default_config());
            options
        }
        BrokerScheme::Ws | BrokerScheme::Wss => {
            let path = config.str("mqttWebsocketPath").unwrap_or("");
            let separator = if path.is_empty() || path.starts_with('/') { "" } else { "/" };
            let scheme = if target.scheme == BrokerScheme::Ws { "ws" } else { "wss" };
            let url = format!("{scheme}://{}:{port}{separator}{path}", target.host);
            let mut options = MqttOptions::new(client_id, url, port);
            options.set_transport(if target.scheme == BrokerScheme::Ws {
                Transport::Ws
            } else {
                Transport::wss_with_default_config()
            });
            options
        }
    };
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(true);
    if let Some(username) = config.str("mqttUsername") {
        options.set_credentials(username, config.str("mqttPassword").unwrap_or(""));
    }

    let start = Instant::now();
    let (client, mut eventloop) = AsyncClient::new(options, 10);
    let outcome = tokio::time::timeout(
        message_deadline(interval_seconds),
        receive_one(&client, &mut eventloop, topic),
    )
    .await;
    // Best-effort disconnect on every path.
    if let Err(e) = client.try_disconnect() {
        debug!(error = %e, "MQTT disconnect failed.");
    }
    drop(eventloop);

    let (message_topic, message) = match outcome {
        Ok(received) => received?,
        Err(_) => return Err(ExecutionError::Timeout("Timeout, Message not received".to_string())),
    };
    let latency_ms = elapsed_ms(start);

    match conditions {
        Some(conditions) => {
            let json_value = extract_json_value(&message, config.str("jsonPath"));
            let context = HashMap::from([
                ("topic", message_topic.clone()),
                ("message", message.clone()),
                ("json_value", json_value),
            ]);
            if !conditions.evaluate(&context)? {
                return Err(ExecutionError::ConditionsNotMet(format!(
                    "Conditions not met - Topic: {message_topic}; Message: {message}"
                )));
            }
            Ok(CheckResult::up(
                format!("Topic: {message_topic}; Message: {message}"),
                Some(latency_ms),
            ))
        }
        None => evaluate_message(config, topic, &message_topic, &message, latency_ms),
    }
}

async fn receive_one(
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    topic: &str,
) -> Result<(String, String), ExecutionError> {
    client
        .subscribe(topic, QoS::AtMostOnce)
        .await
        .map_err(|e| ExecutionError::Transport(format!("Cannot subscribe topic: {e}")))?;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                return Ok((publish.topic, payload));
            }
            Ok(_) => {}
            Err(e) => return Err(ExecutionError::Transport(e.to_string())),
        }
    }
}

/// Empty on any parse or query failure.
fn extract_json_value(message: &str, expression: Option<&str>) -> String {
    let Some(expression) = expression else {
        return String::new();
    };
    let Ok(parsed) = serde_json::from_str::<Value>(message) else {
        return String::new();
    };
    match query_value(&parsed, expression) {
        Ok(Value::Null) | Err(_) => String::new(),
        Ok(value) => render_value(&value),
    }
}

/// Keyword or JSON-query evaluation when no conditions are configured.
fn evaluate_message(
    config: &CheckConfig<'_>,
    configured_topic: &str,
    message_topic: &str,
    message: &str,
    latency_ms: f64,
) -> Result<CheckResult, ExecutionError> {
    match config.str("mqttCheckType").unwrap_or("keyword") {
        "keyword" => {
            let success_message = config.text("mqttSuccessMessage").unwrap_or_default();
            if message.contains(&success_message) {
                Ok(CheckResult::up(
                    format!("Topic: {message_topic}; Message: {message}"),
                    Some(latency_ms),
                ))
            } else {
                Err(ExecutionError::Mismatch(format!(
                    "Message Mismatch - Topic: {configured_topic}; Message: {message}"
                )))
            }
        }
        "json-query" => {
            let parsed: Value = serde_json::from_str(message)
                .map_err(|e| ExecutionError::Mismatch(format!("Message is not valid JSON: {e}")))?;
            let selected = query_value(&parsed, config.str("jsonPath").unwrap_or(""))?;
            let actual = match selected {
                Value::Null => String::new(),
                other => render_value(&other),
            };
            let expected = config.text("expectedValue").unwrap_or_default();
            if actual == expected {
                Ok(CheckResult::up(
                    "Message received, expected value is found",
                    Some(latency_ms),
                ))
            } else {
                Err(ExecutionError::Mismatch(format!(
                    "Message received but value is not equal to expected value, value was: [{actual}]"
                )))
            }
        }
        _ => Err(ExecutionError::Config("Unknown MQTT Check Type".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CheckStatus;
    use serde_json::json;

    #[test]
    fn test_message_deadline() {
        assert_eq!(message_deadline(0), Duration::from_secs(16));
        assert_eq!(message_deadline(60), Duration::from_secs(48));
        assert_eq!(message_deadline(1), Duration::from_secs(1));
    }

    #[test]
    fn test_parse_broker() {
        assert_eq!(
            parse_broker("broker.local").unwrap(),
            BrokerTarget {
                scheme: BrokerScheme::Mqtt,
                host: "broker.local".into()
            }
        );
        assert_eq!(parse_broker("wss://edge.example.com/mqtt").unwrap().scheme, BrokerScheme::Wss);
        assert_eq!(parse_broker("wss://edge.example.com/mqtt").unwrap().host, "edge.example.com");
        assert!(parse_broker("gopher://x").is_err());
    }

    #[test]
    fn test_keyword_evaluation() {
        let raw = json!({"mqttSuccessMessage": "online"});
        let config = CheckConfig::new(raw.as_object().unwrap());
        let result = evaluate_message(&config, "sensors/1", "sensors/1", "status online", 3.0).unwrap();
        assert_eq!(result.status, CheckStatus::Up);
        assert_eq!(result.message, "Topic: sensors/1; Message: status online");

        let err = evaluate_message(&config, "sensors/+", "sensors/1", "offline", 3.0).unwrap_err();
        assert_eq!(
            err,
            ExecutionError::Mismatch("Message Mismatch - Topic: sensors/+; Message: offline".into())
        );
    }

    #[test]
    fn test_json_query_evaluation() {
        let raw = json!({"mqttCheckType": "json-query", "jsonPath": "temp", "expectedValue": 21});
        let config = CheckConfig::new(raw.as_object().unwrap());
        let ok = evaluate_message(&config, "t", "t", "{\"temp\": 21}", 1.0).unwrap();
        assert_eq!(ok.message, "Message received, expected value is found");

        let err = evaluate_message(&config, "t", "t", "{\"temp\": 30}", 1.0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Message received but value is not equal to expected value, value was: [30]"
        );
    }

    #[test]
    fn test_unknown_check_type() {
        let raw = json!({"mqttCheckType": "regex"});
        let config = CheckConfig::new(raw.as_object().unwrap());
        assert_eq!(
            evaluate_message(&config, "t", "t", "m", 1.0).unwrap_err(),
            ExecutionError::Config("Unknown MQTT Check Type".into())
        );
    }

    #[test]
    fn test_extract_json_value() {
        assert_eq!(extract_json_value("{\"a\": {\"b\": 5}}", Some("a.b")), "5");
        assert_eq!(extract_json_value("not json", Some("a")), "");
        assert_eq!(extract_json_value("{}", Some("missing")), "");
        assert_eq!(extract_json_value("{\"a\": 1}", None), "");
    }
}
