//! Job priority model.
//!
//! A job's priority is the weighted sum of four factors, each normalized to
//! `[0, 1]`: role, timeout, age, and fair share. The role and timeout parts
//! never change after enqueue and are precomputed as the base priority; the
//! age and fair-share parts are recomputed at pop time.

use chrono::{DateTime, Duration, FixedOffset};
use dashmap::DashMap;

/// Weights of factors for priority calculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityFactorWeights {
    pub timeout_factor: f64,
    pub role_factor: f64,
    pub age_factor: f64,
    pub fair_share_factor: f64,
}

impl Default for PriorityFactorWeights {
    fn default() -> Self {
        Self {
            timeout_factor: 1000.0,
            role_factor: 0.0,
            age_factor: 2000.0,
            fair_share_factor: 1000.0,
        }
    }
}

/// Shared, immutable priority configuration.
///
/// One instance is built per process and handed to every queue, so all
/// queues rank jobs with the same weights and burst policy.
#[derive(Debug, Clone)]
pub struct PriorityConfig {
    pub factor_weights: PriorityFactorWeights,
    pub burst_score_half_life: Duration,
    pub burst_penalty: f64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            factor_weights: PriorityFactorWeights::default(),
            burst_score_half_life: Duration::minutes(1),
            burst_penalty: 2.0,
        }
    }
}

/// Get the maximum timeout for the given role.
pub fn role_max_timeout(role: &str) -> Duration {
    match role.to_lowercase().as_str() {
        "admin" => Duration::minutes(60),
        "developer" => Duration::minutes(10),
        _ => Duration::minutes(5),
    }
}

/// Calculate the role factor.
pub fn calc_role_factor(role: &str) -> f64 {
    match role.to_lowercase().as_str() {
        "admin" => 1.0,
        "developer" => 0.5,
        _ => 0.0,
    }
}

/// Calculate the timeout factor. Shorter jobs score higher.
pub fn calc_timeout_factor(timeout: Duration, role_max_timeout: Duration) -> f64 {
    let max_timeout_seconds = role_max_timeout.num_milliseconds() as f64 / 1000.0;
    let timeout_seconds = timeout.num_milliseconds() as f64 / 1000.0;

    if max_timeout_seconds <= 0.0 || timeout_seconds > max_timeout_seconds {
        return 0.0;
    }

    1.0 - timeout_seconds / max_timeout_seconds
}

/// Calculate the age factor, saturating at 1.0 once the waiting time
/// exceeds `max_age`.
pub fn calc_age_factor(
    current_time: DateTime<FixedOffset>,
    queued_at: DateTime<FixedOffset>,
    max_age: Duration,
) -> f64 {
    let waiting_seconds = (current_time - queued_at).num_milliseconds() as f64 / 1000.0;
    let max_age_seconds = max_age.num_milliseconds() as f64 / 1000.0;

    if max_age_seconds <= 0.0 || waiting_seconds > max_age_seconds {
        return 1.0;
    }

    waiting_seconds / max_age_seconds
}

/// Calculate the fair share factor from the burst score of the job token.
pub fn calc_fair_share_factor(burst_score: f64, burst_penalty: f64) -> f64 {
    if burst_penalty <= 0.0 {
        return 0.0;
    }
    if burst_score <= 1.0 {
        return 1.0;
    }
    (2.0_f64).powf(-((burst_score - 1.0) / burst_penalty))
}

#[derive(Debug, Clone, Copy)]
struct BurstScoreInfo {
    score: f64,
    last_updated_at: DateTime<FixedOffset>,
}

/// Token-based burst score tracking where scores decay exponentially
/// over time.
///
/// The table is process-wide and shared by every queue. Entries are never
/// evicted; the decay keeps scores bounded and each entry is a few dozen
/// bytes per distinct token.
pub struct BurstScoreTable {
    half_life: Duration,
    scores: DashMap<String, BurstScoreInfo>,
}

impl BurstScoreTable {
    /// Create a burst score table with the given half-life.
    pub fn new(half_life: Duration) -> Self {
        Self {
            half_life,
            scores: DashMap::new(),
        }
    }

    /// Update the burst score for the given token.
    ///
    /// A freshly seen token starts at 1.0; repeat submitters climb by one
    /// decayed step per submission.
    pub fn update(&self, token: &str, current_time: DateTime<FixedOffset>) {
        match self.scores.entry(token.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let info = *occupied.get();
                let half_life_ms = self.half_life.num_milliseconds() as f64;
                let decay = if half_life_ms <= 0.0 {
                    0.0
                } else {
                    let elapsed_ms = (current_time - info.last_updated_at).num_milliseconds() as f64;
                    (2.0_f64).powf(-(elapsed_ms / half_life_ms))
                };
                occupied.insert(BurstScoreInfo {
                    score: info.score * decay + 1.0,
                    last_updated_at: current_time,
                });
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(BurstScoreInfo {
                    score: 1.0,
                    last_updated_at: current_time,
                });
            }
        }
    }

    /// Get the burst score of the given token (1.0 when unseen).
    pub fn score(&self, token: &str) -> f64 {
        self.scores.get(token).map(|info| info.score).unwrap_or(1.0)
    }
}

/// Priority of a single queued job.
///
/// The base part (role + timeout) is fixed at enqueue; the dynamic part
/// (age + fair share) is added by [`JobPriority::calc_priority`].
#[derive(Debug, Clone)]
pub struct JobPriority {
    token: String,
    queued_at: DateTime<FixedOffset>,
    base_priority: f64,
}

impl JobPriority {
    /// Build the priority for a job being enqueued.
    pub fn new(
        config: &PriorityConfig,
        token: &str,
        role: &str,
        queued_at: DateTime<FixedOffset>,
        timeout: Duration,
    ) -> Self {
        let weights = &config.factor_weights;
        let base_priority = weights.role_factor * calc_role_factor(role)
            + weights.timeout_factor * calc_timeout_factor(timeout, role_max_timeout(role));
        Self {
            token: token.to_string(),
            queued_at,
            base_priority,
        }
    }

    /// Calculate the job priority as the weighted sum of all factors.
    pub fn calc_priority(
        &self,
        config: &PriorityConfig,
        burst_scores: &BurstScoreTable,
        current_time: DateTime<FixedOffset>,
        max_age: Duration,
    ) -> f64 {
        let weights = &config.factor_weights;
        let burst_score = burst_scores.score(&self.token);
        self.base_priority
            + weights.age_factor * calc_age_factor(current_time, self.queued_at, max_age)
            + weights.fair_share_factor
                * calc_fair_share_factor(burst_score, config.burst_penalty)
    }

    /// Waiting time of the job at `current_time`.
    pub fn waiting_time(&self, current_time: DateTime<FixedOffset>) -> Duration {
        current_time - self.queued_at
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn queued_at(&self) -> DateTime<FixedOffset> {
        self.queued_at
    }
}
