use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Immutable snapshot of the remotely configured sampling policy.
///
/// Never mutated in place: the refresher publishes a complete replacement
/// snapshot, so readers always observe either the old or the new policy
/// (see [`crate::refresher::PolicyHandle`]).
#[derive(Clone, Debug, PartialEq)]
pub struct SamplingPolicy {
    /// Percentage of events to keep when no override applies, 0-100.
    pub global_percentage: i32,
    /// Per-user percentage overrides, keyed by user id.
    pub user_percentages: HashMap<String, i32>,
    /// Per-company percentage overrides, keyed by company id. Take
    /// precedence over user overrides.
    pub company_percentages: HashMap<String, i32>,
    /// Opaque version tag from the config source, used to detect change.
    /// `None` until the first successful fetch.
    pub etag: Option<String>,
    /// When this snapshot was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl Default for SamplingPolicy {
    /// Keep everything until the first config fetch succeeds.
    fn default() -> Self {
        SamplingPolicy {
            global_percentage: 100,
            user_percentages: HashMap::new(),
            company_percentages: HashMap::new(),
            etag: None,
            fetched_at: Utc::now(),
        }
    }
}

impl SamplingPolicy {
    /// Resolves the percentage applying to an event: company override, else
    /// user override, else the global percentage.
    pub fn applicable_percentage(
        &self,
        user_id: Option<&str>,
        company_id: Option<&str>,
    ) -> i32 {
        if let Some(id) = company_id
            && let Some(pct) = self.company_percentages.get(id)
        {
            return *pct;
        }
        if let Some(id) = user_id
            && let Some(pct) = self.user_percentages.get(id)
        {
            return *pct;
        }
        self.global_percentage
    }
}

/// Outcome of the sampling decision for one completed pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingDecision {
    pub accepted: bool,
    pub applied_percentage: i32,
    /// `100 / applied_percentage` for accepted records, letting the
    /// receiver extrapolate true traffic volume from the sampled subset.
    /// `None` when the applied percentage is 0.
    pub weight: Option<f64>,
}

/// Decides whether an event survives sampling, given a uniform draw in
/// [0, 100).
///
/// The comparison is inclusive: a draw exactly equal to the applied
/// percentage accepts. An applied percentage of 0 rejects unconditionally,
/// before the comparison or the weight division.
pub fn decide(
    policy: &SamplingPolicy,
    user_id: Option<&str>,
    company_id: Option<&str>,
    draw: f64,
) -> SamplingDecision {
    let applied = policy.applicable_percentage(user_id, company_id);
    if applied <= 0 {
        return SamplingDecision {
            accepted: false,
            applied_percentage: applied,
            weight: None,
        };
    }
    SamplingDecision {
        accepted: f64::from(applied) >= draw,
        applied_percentage: applied,
        weight: Some(100.0 / f64::from(applied)),
    }
}

/// Draws the random percentage used on the production sampling path.
pub fn random_draw() -> f64 {
    rand::random::<f64>() * 100.0
}
