//! In-memory correlation cache matching request and response halves.

use crate::errors::IngestError;
use crate::message::{HalfMessage, RequestHalf, ResponseHalf};
use crate::metrics_defs::{ORPHANS_SWEPT, REQUEST_CACHE_SIZE, RESPONSE_CACHE_SIZE};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

/// A matched request/response pair. Created only by
/// [`CorrelationStore::extract_completed`], which removes both halves from
/// the store; ownership transfers to the batch builder.
#[derive(Clone, Debug)]
pub struct CompletedPair {
    pub correlation_id: String,
    pub request: RequestHalf,
    pub response: ResponseHalf,
}

/// Which side of a transaction an orphaned half belonged to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum HalfKind {
    Request,
    Response,
}

impl fmt::Display for HalfKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HalfKind::Request => write!(f, "request"),
            HalfKind::Response => write!(f, "response"),
        }
    }
}

/// An unmatched half evicted by the TTL sweep: its partner never arrived.
#[derive(Debug)]
pub struct OrphanedHalf {
    pub correlation_id: String,
    pub kind: HalfKind,
    pub age: Duration,
}

struct Entry<T> {
    half: T,
    inserted_at: Instant,
}

impl<T> Entry<T> {
    fn new(half: T) -> Self {
        Entry {
            half,
            inserted_at: Instant::now(),
        }
    }
}

#[derive(Default)]
struct StoreInner {
    requests: HashMap<String, Entry<RequestHalf>>,
    responses: HashMap<String, Entry<ResponseHalf>>,
}

/// Correlation cache shared by all partition workers.
///
/// Inserts from any number of workers interleave freely. Extraction holds
/// the write lock for the whole intersect-and-remove step, so a pair is
/// produced exactly once and an id never leaves one side without the other.
#[derive(Default)]
pub struct CorrelationStore {
    inner: RwLock<StoreInner>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one half. Last write wins when the same id and side arrive
    /// twice (the stream platform may deliver duplicates).
    pub fn insert(&self, message: HalfMessage) -> Result<(), IngestError> {
        if message.correlation_id().is_empty() {
            return Err(IngestError::MissingCorrelationId);
        }
        let mut inner = self.inner.write();
        match message {
            HalfMessage::Request(half) => {
                inner
                    .requests
                    .insert(half.correlation_id.clone(), Entry::new(half));
            }
            HalfMessage::Response(half) => {
                inner
                    .responses
                    .insert(half.correlation_id.clone(), Entry::new(half));
            }
        }
        Ok(())
    }

    /// Atomically removes and returns every id present on both sides.
    pub fn extract_completed(&self) -> Vec<CompletedPair> {
        let mut inner = self.inner.write();
        let matched: Vec<String> = inner
            .requests
            .keys()
            .filter(|id| inner.responses.contains_key(*id))
            .cloned()
            .collect();

        let mut pairs = Vec::with_capacity(matched.len());
        for correlation_id in matched {
            if let (Some(request), Some(response)) = (
                inner.requests.remove(&correlation_id),
                inner.responses.remove(&correlation_id),
            ) {
                pairs.push(CompletedPair {
                    correlation_id,
                    request: request.half,
                    response: response.half,
                });
            }
        }
        pairs
    }

    /// Removes and reports halves older than `ttl` on either side.
    pub fn sweep_orphans(&self, ttl: Duration) -> Vec<OrphanedHalf> {
        let now = Instant::now();
        let mut orphans = Vec::new();
        let mut inner = self.inner.write();

        inner.requests.retain(|id, entry| {
            let age = now.duration_since(entry.inserted_at);
            if age > ttl {
                orphans.push(OrphanedHalf {
                    correlation_id: id.clone(),
                    kind: HalfKind::Request,
                    age,
                });
                false
            } else {
                true
            }
        });
        inner.responses.retain(|id, entry| {
            let age = now.duration_since(entry.inserted_at);
            if age > ttl {
                orphans.push(OrphanedHalf {
                    correlation_id: id.clone(),
                    kind: HalfKind::Response,
                    age,
                });
                false
            } else {
                true
            }
        });

        orphans
    }

    pub fn request_count(&self) -> usize {
        self.inner.read().requests.len()
    }

    pub fn response_count(&self) -> usize {
        self.inner.read().responses.len()
    }
}

/// Spawns the background sweep evicting halves whose partner never arrived.
/// Orphans are logged and counted, not delivered downstream.
pub fn spawn_orphan_sweeper(
    store: Arc<CorrelationStore>,
    ttl: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let orphans = store.sweep_orphans(ttl);
            metrics::gauge!(REQUEST_CACHE_SIZE.name).set(store.request_count() as f64);
            metrics::gauge!(RESPONSE_CACHE_SIZE.name).set(store.response_count() as f64);
            if orphans.is_empty() {
                continue;
            }
            metrics::counter!(ORPHANS_SWEPT.name).increment(orphans.len() as u64);
            for orphan in &orphans {
                tracing::warn!(
                    correlation_id = %orphan.correlation_id,
                    kind = %orphan.kind,
                    age_secs = orphan.age.as_secs(),
                    "evicted orphaned half, partner never arrived"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::parse;

    fn request(id: &str) -> HalfMessage {
        parse(
            format!(
                r#"{{"event_type": "request", "message-id": "{id}", "method": "GET",
                     "uri": "https://api.example.com/{id}", "user_id": "u1", "company_id": "c1"}}"#
            )
            .as_bytes(),
        )
        .unwrap()
    }

    fn response(id: &str) -> HalfMessage {
        parse(
            format!(r#"{{"event_type": "response", "message-id": "{id}", "status_code": 200}}"#)
                .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn matched_ids_are_extracted_exactly_once() {
        let store = CorrelationStore::new();
        store.insert(request("a")).unwrap();
        store.insert(response("a")).unwrap();
        store.insert(request("b")).unwrap();

        let pairs = store.extract_completed();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].correlation_id, "a");

        // The id is gone from both sides; a second extraction yields nothing.
        assert!(store.extract_completed().is_empty());
        assert_eq!(store.request_count(), 1);
        assert_eq!(store.response_count(), 0);
    }

    #[test]
    fn extraction_without_matches_mutates_nothing() {
        let store = CorrelationStore::new();
        store.insert(request("a")).unwrap();
        store.insert(response("b")).unwrap();

        assert!(store.extract_completed().is_empty());
        assert_eq!(store.request_count(), 1);
        assert_eq!(store.response_count(), 1);
    }

    #[test]
    fn arrival_order_does_not_matter() {
        let store = CorrelationStore::new();
        store.insert(response("a")).unwrap();
        store.insert(request("a")).unwrap();

        let pairs = store.extract_completed();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].request.correlation_id, "a");
        assert_eq!(pairs[0].response.correlation_id, "a");
    }

    #[test]
    fn duplicate_delivery_is_last_write_wins() {
        let store = CorrelationStore::new();
        store.insert(request("a")).unwrap();
        let HalfMessage::Request(mut newer) = request("a") else {
            unreachable!();
        };
        newer.uri = "https://api.example.com/updated".to_string();
        store.insert(HalfMessage::Request(newer)).unwrap();
        store.insert(response("a")).unwrap();

        let pairs = store.extract_completed();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].request.uri, "https://api.example.com/updated");
    }

    #[test]
    fn empty_correlation_id_is_rejected_without_corruption() {
        let store = CorrelationStore::new();
        let HalfMessage::Request(mut bad) = request("a") else {
            unreachable!();
        };
        bad.correlation_id = String::new();
        assert!(matches!(
            store.insert(HalfMessage::Request(bad)),
            Err(IngestError::MissingCorrelationId)
        ));
        assert_eq!(store.request_count(), 0);

        // Other ids keep working.
        store.insert(request("b")).unwrap();
        store.insert(response("b")).unwrap();
        assert_eq!(store.extract_completed().len(), 1);
    }

    #[test]
    fn sweep_evicts_only_entries_older_than_ttl() {
        let store = CorrelationStore::new();
        store.insert(request("old")).unwrap();
        store.insert(response("old-resp")).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        store.insert(request("fresh")).unwrap();

        let orphans = store.sweep_orphans(Duration::from_millis(15));
        let mut swept: Vec<_> = orphans
            .iter()
            .map(|orphan| (orphan.correlation_id.as_str(), orphan.kind))
            .collect();
        swept.sort();
        assert_eq!(
            swept,
            vec![("old", HalfKind::Request), ("old-resp", HalfKind::Response)]
        );
        assert_eq!(store.request_count(), 1);
        assert_eq!(store.response_count(), 0);
    }

    #[test]
    fn concurrent_inserts_and_extracts_produce_each_pair_once() {
        let store = Arc::new(CorrelationStore::new());
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    let id = format!("id-{i}");
                    store.insert(request(&id)).unwrap();
                    store.insert(response(&id)).unwrap();
                }
            })
        };

        let mut seen = std::collections::HashSet::new();
        loop {
            for pair in store.extract_completed() {
                assert!(seen.insert(pair.correlation_id), "pair extracted twice");
            }
            if seen.len() == 200 {
                break;
            }
            std::thread::yield_now();
        }
        writer.join().unwrap();
        assert_eq!(store.request_count(), 0);
        assert_eq!(store.response_count(), 0);
    }
}
