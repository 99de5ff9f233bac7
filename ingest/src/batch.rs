//! Turns completed pairs into outbound collector records, applying the
//! sampling policy to each pair along the way.

use crate::metrics_defs::{RECORDS_ACCEPTED, RECORDS_SAMPLED_OUT};
use crate::store::CompletedPair;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::SecondsFormat;
use sampling::{PolicyHandle, decide, random_draw};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Request side of an outbound record, in the collector's event schema.
#[derive(Serialize, Clone, Debug)]
pub struct RecordRequest {
    pub time: String,
    pub uri: String,
    pub verb: String,
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub body: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_encoding: Option<&'static str>,
}

/// Response side of an outbound record.
#[derive(Serialize, Clone, Debug)]
pub struct RecordResponse {
    pub time: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_encoding: Option<&'static str>,
}

/// One sampled transaction ready for delivery to the collector.
#[derive(Serialize, Clone, Debug)]
pub struct OutboundRecord {
    pub request: RecordRequest,
    pub response: RecordResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Value>,
    pub direction: &'static str,
    pub weight: f64,
}

/// Source of the uniform draw used for sampling; swappable for tests.
pub type DrawFn = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Builds the outbound batch for a flush cycle.
pub struct EventBatchBuilder {
    policy: PolicyHandle,
    session_token_header: Option<String>,
    api_version: Option<String>,
    draw: DrawFn,
}

impl EventBatchBuilder {
    pub fn new(
        policy: PolicyHandle,
        session_token_header: Option<String>,
        api_version: Option<String>,
    ) -> Self {
        EventBatchBuilder {
            policy,
            session_token_header,
            api_version,
            draw: Arc::new(random_draw),
        }
    }

    /// Replaces the random draw with a deterministic one.
    pub fn with_draw(mut self, draw: DrawFn) -> Self {
        self.draw = draw;
        self
    }

    /// Applies the active sampling policy to each pair and converts the
    /// survivors. Each accepted record also nudges the policy refresher, so
    /// a busy pipeline keeps its policy warm without a dedicated timer.
    pub fn build_batch(&self, pairs: Vec<CompletedPair>) -> Vec<OutboundRecord> {
        let policy = self.policy.current();
        let mut records = Vec::with_capacity(pairs.len());

        for pair in pairs {
            let decision = decide(
                &policy,
                pair.request.user_id.as_deref(),
                pair.request.company_id.as_deref(),
                (self.draw)(),
            );
            match decision.weight.filter(|_| decision.accepted) {
                Some(weight) => {
                    records.push(self.build_record(pair, weight));
                    metrics::counter!(RECORDS_ACCEPTED.name).increment(1);
                    self.policy.freshness_check();
                }
                None => {
                    metrics::counter!(RECORDS_SAMPLED_OUT.name).increment(1);
                    tracing::debug!(
                        correlation_id = %pair.correlation_id,
                        applied_percentage = decision.applied_percentage,
                        "pair sampled out"
                    );
                }
            }
        }
        records
    }

    fn build_record(&self, pair: CompletedPair, weight: f64) -> OutboundRecord {
        let request = pair.request;
        let response = pair.response;

        let session_token = self
            .session_token_header
            .as_deref()
            .and_then(|name| header_value(&request.headers, name));
        let identity = request
            .identity_context
            .as_deref()
            .and_then(|blob| decode_identity(&pair.correlation_id, blob));
        let (request_body, request_encoding) = wrap_body(request.body.as_deref());
        let (response_body, response_encoding) = wrap_body(response.body.as_deref());

        let mut metadata = request.metadata;
        metadata.insert(
            "sourceMessageId".to_string(),
            Value::String(pair.correlation_id),
        );

        OutboundRecord {
            request: RecordRequest {
                time: request
                    .timestamp
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
                uri: request.uri,
                verb: request.method,
                headers: request.headers,
                api_version: self.api_version.clone(),
                ip_address: request.ip_address,
                body: request_body,
                transfer_encoding: request_encoding,
            },
            response: RecordResponse {
                time: response
                    .timestamp
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
                status: response.status,
                headers: response.headers,
                body: response_body,
                transfer_encoding: response_encoding,
            },
            user_id: request.user_id,
            company_id: request.company_id,
            session_token,
            metadata,
            identity,
            direction: "Incoming",
            weight,
        }
    }
}

fn header_value(headers: &HashMap<String, String>, name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.clone())
}

/// Bodies that parse as JSON are embedded directly; anything else is sent
/// base64-encoded with a transfer encoding marker so the collector can
/// recover the original bytes.
fn wrap_body(body: Option<&str>) -> (Value, Option<&'static str>) {
    let Some(text) = body else {
        return (Value::Null, None);
    };
    match serde_json::from_str::<Value>(text) {
        Ok(parsed) => (parsed, None),
        Err(_) => (Value::String(BASE64.encode(text)), Some("base64")),
    }
}

/// The gateway forwards caller identity as a base64-encoded JSON object.
/// Anything that fails to decode or is not a non-empty object is dropped
/// with a warning; the record still ships.
fn decode_identity(correlation_id: &str, blob: &str) -> Option<Value> {
    let decoded = match BASE64.decode(blob.trim()) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(
                correlation_id = %correlation_id,
                error = %err,
                "identity context is not valid base64, dropping it"
            );
            return None;
        }
    };
    match serde_json::from_slice::<Value>(&decoded) {
        Ok(Value::Object(fields)) if !fields.is_empty() => Some(Value::Object(fields)),
        Ok(_) => None,
        Err(err) => {
            tracing::warn!(
                correlation_id = %correlation_id,
                error = %err,
                "identity context is not valid JSON, dropping it"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::parse;
    use crate::store::CorrelationStore;
    use async_trait::async_trait;
    use sampling::{FetchError, PolicyFetcher, SamplingPolicy};
    use std::time::Duration;

    struct NoopFetcher;

    #[async_trait]
    impl PolicyFetcher for NoopFetcher {
        async fn fetch(&self) -> Result<SamplingPolicy, FetchError> {
            Ok(SamplingPolicy::default())
        }
    }

    fn handle(policy: SamplingPolicy) -> PolicyHandle {
        PolicyHandle::with_initial(policy, Arc::new(NoopFetcher), Duration::from_secs(300))
    }

    fn fixed_draw(value: f64) -> DrawFn {
        Arc::new(move || value)
    }

    fn pair() -> CompletedPair {
        let store = CorrelationStore::new();
        store
            .insert(
                parse(
                    br#"{
                        "event_type": "request",
                        "message-id": "m-1",
                        "contextTimestamp": "2024-03-01T12:00:00Z",
                        "method": "POST",
                        "uri": "https://api.example.com/orders",
                        "ip_address": "10.0.0.1",
                        "user_id": "u1",
                        "company_id": "c1",
                        "request_headers": {"Content-Type": "application/json", "X-Session": "tok-9"},
                        "request_body": "{\"order\":1}",
                        "metadata": {"region": "us-east"},
                        "contextRequestUser": "eyJuYW1lIjoiYWRhIn0="
                    }"#,
                )
                .unwrap(),
            )
            .unwrap();
        store
            .insert(
                parse(
                    br#"{
                        "event_type": "response",
                        "message-id": "m-1",
                        "contextTimestamp": "2024-03-01T12:00:01Z",
                        "status_code": 201,
                        "response_headers": {"Content-Type": "text/plain"},
                        "response_body": "created"
                    }"#,
                )
                .unwrap(),
            )
            .unwrap();
        store.extract_completed().into_iter().next().unwrap()
    }

    fn half_policy() -> SamplingPolicy {
        SamplingPolicy {
            global_percentage: 50,
            etag: Some("v1".to_string()),
            ..SamplingPolicy::default()
        }
    }

    #[test]
    fn accepted_pair_becomes_a_weighted_record() {
        let builder = EventBatchBuilder::new(
            handle(half_policy()),
            Some("x-session".to_string()),
            Some("2024-03-01".to_string()),
        )
        .with_draw(fixed_draw(30.0));

        let batch = builder.build_batch(vec![pair()]);
        assert_eq!(batch.len(), 1);
        let record = &batch[0];

        assert_eq!(record.weight, 2.0);
        assert_eq!(record.direction, "Incoming");
        assert_eq!(record.user_id.as_deref(), Some("u1"));
        assert_eq!(record.company_id.as_deref(), Some("c1"));
        assert_eq!(record.session_token.as_deref(), Some("tok-9"));

        assert_eq!(record.request.verb, "POST");
        assert_eq!(record.request.time, "2024-03-01T12:00:00.000Z");
        assert_eq!(record.request.api_version.as_deref(), Some("2024-03-01"));
        assert_eq!(record.request.body["order"], 1);
        assert_eq!(record.request.transfer_encoding, None);

        assert_eq!(record.response.status, 201);
        // Non-JSON bodies ship base64-encoded.
        assert_eq!(
            record.response.body,
            Value::String(BASE64.encode("created"))
        );
        assert_eq!(record.response.transfer_encoding, Some("base64"));

        assert_eq!(
            record.metadata.get("sourceMessageId"),
            Some(&Value::String("m-1".to_string()))
        );
        assert_eq!(
            record.metadata.get("region"),
            Some(&Value::String("us-east".to_string()))
        );
        assert_eq!(record.identity.as_ref().unwrap()["name"], "ada");
    }

    #[test]
    fn rejected_pair_produces_no_record() {
        let builder = EventBatchBuilder::new(handle(half_policy()), None, None)
            .with_draw(fixed_draw(70.0));

        assert!(builder.build_batch(vec![pair()]).is_empty());
    }

    #[test]
    fn zero_percentage_rejects_everything() {
        let policy = SamplingPolicy {
            global_percentage: 0,
            etag: Some("v1".to_string()),
            ..SamplingPolicy::default()
        };
        let builder =
            EventBatchBuilder::new(handle(policy), None, None).with_draw(fixed_draw(0.0));

        assert!(builder.build_batch(vec![pair()]).is_empty());
    }

    #[test]
    fn missing_session_header_leaves_token_unset() {
        let builder = EventBatchBuilder::new(
            handle(half_policy()),
            Some("authorization".to_string()),
            None,
        )
        .with_draw(fixed_draw(0.0));

        let batch = builder.build_batch(vec![pair()]);
        assert_eq!(batch[0].session_token, None);
        assert_eq!(batch[0].request.api_version, None);
    }

    #[test]
    fn malformed_identity_context_is_dropped() {
        let builder = EventBatchBuilder::new(handle(half_policy()), None, None)
            .with_draw(fixed_draw(0.0));

        let mut sample = pair();
        sample.request.identity_context = Some("!!not-base64!!".to_string());
        let batch = builder.build_batch(vec![sample]);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].identity, None);
    }
}
