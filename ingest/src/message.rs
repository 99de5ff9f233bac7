//! Parser for the event format emitted by the API gateway's log-to-stream
//! policy. Each stream event carries one half of an HTTP transaction,
//! discriminated by `event_type` and correlated by `message-id`.

use crate::errors::ParseError;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

const EVENT_TYPE_REQUEST: &str = "request";
const EVENT_TYPE_RESPONSE: &str = "response";

/// One side of an HTTP transaction, arriving as an independent stream event.
#[derive(Clone, Debug)]
pub enum HalfMessage {
    Request(RequestHalf),
    Response(ResponseHalf),
}

impl HalfMessage {
    pub fn correlation_id(&self) -> &str {
        match self {
            HalfMessage::Request(half) => &half.correlation_id,
            HalfMessage::Response(half) => &half.correlation_id,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RequestHalf {
    pub correlation_id: String,
    /// Event time; defaults to ingestion time when absent from the payload.
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub uri: String,
    pub ip_address: Option<String>,
    pub user_id: Option<String>,
    pub company_id: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub metadata: Map<String, Value>,
    /// Base64-encoded JSON blob describing the caller identity, when the
    /// gateway forwards one.
    pub identity_context: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ResponseHalf {
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

/// Raw wire shape. Request and response fields share one flat object
/// discriminated by `event_type`; field names follow the gateway policy
/// format.
#[derive(Deserialize)]
struct RawHalf {
    event_type: Option<String>,
    #[serde(rename = "message-id")]
    message_id: Option<String>,
    #[serde(rename = "contextTimestamp")]
    context_timestamp: Option<DateTime<Utc>>,

    method: Option<String>,
    uri: Option<String>,
    ip_address: Option<String>,
    user_id: Option<String>,
    company_id: Option<String>,
    request_headers: Option<Value>,
    request_body: Option<String>,
    metadata: Option<Map<String, Value>>,
    #[serde(rename = "contextRequestUser")]
    context_request_user: Option<String>,

    status_code: Option<Value>,
    response_headers: Option<Value>,
    response_body: Option<String>,
}

pub fn parse(body: &[u8]) -> Result<HalfMessage, ParseError> {
    let raw: RawHalf = serde_json::from_slice(body)?;

    let event_type = raw
        .event_type
        .filter(|value| !value.is_empty())
        .ok_or(ParseError::MissingField("event_type"))?;
    let correlation_id = raw
        .message_id
        .filter(|value| !value.is_empty())
        .ok_or(ParseError::MissingField("message-id"))?;
    let timestamp = raw.context_timestamp.unwrap_or_else(Utc::now);

    match event_type.as_str() {
        EVENT_TYPE_REQUEST => Ok(HalfMessage::Request(RequestHalf {
            correlation_id,
            timestamp,
            method: raw
                .method
                .ok_or(ParseError::MissingField("method"))?
                .to_uppercase(),
            uri: raw.uri.ok_or(ParseError::MissingField("uri"))?,
            ip_address: raw.ip_address.filter(|value| !value.is_empty()),
            user_id: raw.user_id.filter(|value| !value.is_empty()),
            company_id: raw.company_id.filter(|value| !value.is_empty()),
            headers: header_map(raw.request_headers),
            body: raw.request_body,
            metadata: raw.metadata.unwrap_or_default(),
            identity_context: raw
                .context_request_user
                .filter(|value| !value.trim().is_empty()),
        })),
        EVENT_TYPE_RESPONSE => Ok(HalfMessage::Response(ResponseHalf {
            correlation_id,
            timestamp,
            status: parse_status(raw.status_code)?,
            headers: header_map(raw.response_headers),
            body: raw.response_body,
        })),
        other => Err(ParseError::UnknownEventType(other.to_string())),
    }
}

/// The gateway serializes the status code as either a JSON number or a
/// string.
fn parse_status(value: Option<Value>) -> Result<u16, ParseError> {
    match value.ok_or(ParseError::MissingField("status_code"))? {
        Value::Number(number) => number
            .as_u64()
            .and_then(|value| u16::try_from(value).ok())
            .ok_or_else(|| ParseError::InvalidStatus(number.to_string())),
        Value::String(text) => text
            .trim()
            .parse::<u16>()
            .map_err(|_| ParseError::InvalidStatus(text.clone())),
        other => Err(ParseError::InvalidStatus(other.to_string())),
    }
}

/// Headers arrive either as a JSON object or as a JSON object embedded in a
/// string; both normalize to a flat string map. Multi-valued headers are
/// joined with ", ".
fn header_map(value: Option<Value>) -> HashMap<String, String> {
    let value = match value {
        Some(Value::String(text)) => serde_json::from_str(&text).unwrap_or(Value::Null),
        Some(value) => value,
        None => Value::Null,
    };
    let Value::Object(entries) = value else {
        return HashMap::new();
    };

    entries
        .into_iter()
        .map(|(name, value)| {
            let rendered = match value {
                Value::String(text) => text,
                Value::Array(items) => items
                    .iter()
                    .map(render_scalar)
                    .collect::<Vec<_>>()
                    .join(", "),
                other => other.to_string(),
            };
            (name.trim().to_string(), rendered.trim().to_string())
        })
        .collect()
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
