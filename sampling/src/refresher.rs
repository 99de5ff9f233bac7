use crate::fetch::PolicyFetcher;
use crate::metrics_defs::{POLICY_REFRESH_FAILURE, POLICY_REFRESH_SUCCESS};
use crate::policy::SamplingPolicy;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Cheap-to-clone handle to the active sampling policy.
///
/// Readers call [`PolicyHandle::current`] on the ingestion path and never
/// wait on a refresh: the refresher publishes a complete replacement
/// snapshot under the write lock, so a reader sees either the old or the
/// new policy, never a partial update. At most one refresh runs at a time;
/// overlapping triggers are coalesced by a single-permit semaphore.
#[derive(Clone)]
pub struct PolicyHandle {
    inner: Arc<PolicyInner>,
}

struct PolicyInner {
    fetcher: Arc<dyn PolicyFetcher>,
    policy: RwLock<Arc<SamplingPolicy>>,
    refresh_lock: Arc<Semaphore>,
    // Instant of the last successful fetch; fetch failures leave it alone so
    // the next freshness check retries.
    last_refresh: RwLock<Option<Instant>>,
    refresh_interval: Duration,
}

impl PolicyHandle {
    /// Starts with the permissive default policy; call
    /// [`PolicyHandle::spawn_refresh`] to warm it.
    pub fn new(fetcher: Arc<dyn PolicyFetcher>, refresh_interval: Duration) -> Self {
        Self::with_initial(SamplingPolicy::default(), fetcher, refresh_interval)
    }

    /// Starts from a known snapshot, treated as freshly fetched.
    pub fn with_initial(
        initial: SamplingPolicy,
        fetcher: Arc<dyn PolicyFetcher>,
        refresh_interval: Duration,
    ) -> Self {
        let last_refresh = initial.etag.is_some().then(Instant::now);
        PolicyHandle {
            inner: Arc::new(PolicyInner {
                fetcher,
                policy: RwLock::new(Arc::new(initial)),
                refresh_lock: Arc::new(Semaphore::new(1)),
                last_refresh: RwLock::new(last_refresh),
                refresh_interval,
            }),
        }
    }

    /// The active policy snapshot.
    pub fn current(&self) -> Arc<SamplingPolicy> {
        self.inner.policy.read().clone()
    }

    /// Instant of the last successful refresh, if any.
    pub fn last_refresh(&self) -> Option<Instant> {
        *self.inner.last_refresh.read()
    }

    /// Schedules a background refresh unless one is already in flight.
    pub fn spawn_refresh(&self) {
        let permit = match self.inner.refresh_lock.clone().try_acquire_owned() {
            Ok(permit) => permit,
            // A refresh is already running; its result serves this trigger too.
            Err(_) => return,
        };
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.refresh().await;
            drop(permit);
        });
    }

    /// Runs after each accepted record: schedules a refresh once the active
    /// policy has gone stale. Keeps the policy warm under load without a
    /// fixed-rate timer firing on idle partitions.
    pub fn freshness_check(&self) {
        let stale = match self.last_refresh() {
            Some(at) => at.elapsed() > self.inner.refresh_interval,
            None => true,
        };
        if stale {
            self.spawn_refresh();
        }
    }
}

impl PolicyInner {
    async fn refresh(&self) {
        match self.fetcher.fetch().await {
            Ok(fresh) => {
                *self.last_refresh.write() = Some(Instant::now());
                metrics::counter!(POLICY_REFRESH_SUCCESS.name).increment(1);

                let mut active = self.policy.write();
                if active.etag.is_none() || active.etag != fresh.etag {
                    tracing::info!(
                        etag = ?fresh.etag,
                        global_percentage = fresh.global_percentage,
                        "sampling policy updated"
                    );
                    *active = Arc::new(fresh);
                } else {
                    tracing::debug!(etag = ?active.etag, "sampling policy unchanged");
                }
            }
            Err(err) => {
                // Stale-but-valid beats none; the previous policy stays active.
                metrics::counter!(POLICY_REFRESH_FAILURE.name).increment(1);
                tracing::warn!(error = %err, "sampling policy refresh failed, keeping previous policy");
            }
        }
    }
}
