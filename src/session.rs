//! Query session state machine.
//!
//! `SessionState` is the single mutable record for the active (or last
//! finished) query. It only changes through the named transitions below, so the
//! controller never writes fields directly and the transition table can be
//! tested without a terminal or a network.
//!
//! ```text
//! idle --submit--> fetching_products --headers--> fetching_sales
//!      --body--> processing --finalize/succeed--> complete
//! any active phase --cancel/fail--> idle
//! complete --submit/clear--> ...
//! ```

use crate::error::QueryError;
use crate::model::{Phase, QueryParams, SessionSnapshot};
use std::time::Duration;
use tokio::time::Instant;

pub const PROGRESS_SUBMITTED: u8 = 10;
pub const PROGRESS_HEADERS: u8 = 40;
pub const PROGRESS_BODY: u8 = 80;
pub const PROGRESS_FINALIZING: u8 = 95;
pub const PROGRESS_DONE: u8 = 100;

/// Elapsed-time thresholds at which the status text escalates.
const STATUS_THRESHOLDS: [Duration; 3] = [
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(90),
];

/// Estimated wall-clock time for a query over `product_count` identifiers.
///
/// `round(5 + 0.8 * n + 2 * ceil(n / 5))` seconds: a fixed base, a per-product
/// cost and an overhead per batch of five.
pub fn estimate_duration(product_count: usize) -> Duration {
    let n = product_count as f64;
    let batches = (n / 5.0).ceil();
    let secs = (5.0 + 0.8 * n + 2.0 * batches).round();
    Duration::from_secs(secs as u64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    phase: Phase,
    progress: u8,
    started_at: Option<Instant>,
    total_products: usize,
    processed_products: usize,
    estimated: Duration,
    status: String,
    // Index of the highest threshold already crossed (0 = none).
    tier: usize,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            progress: 0,
            started_at: None,
            total_products: 0,
            processed_products: 0,
            estimated: Duration::ZERO,
            status: "Ready".into(),
            tier: 0,
        }
    }
}

impl SessionState {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn is_active(&self) -> bool {
        self.phase.is_active()
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn total_products(&self) -> usize {
        self.total_products
    }

    pub fn processed_products(&self) -> usize {
        self.processed_products
    }

    pub fn estimated(&self) -> Duration {
        self.estimated
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        self.started_at
            .map(|t0| now.saturating_duration_since(t0))
            .unwrap_or_default()
    }

    /// Begin a new query. Refused while another one is active.
    pub fn submit(&mut self, params: &QueryParams, now: Instant) -> Result<(), QueryError> {
        if self.is_active() {
            return Err(QueryError::Busy);
        }
        let total = params.product_ids.len();
        *self = Self {
            phase: Phase::FetchingProducts,
            progress: PROGRESS_SUBMITTED,
            started_at: Some(now),
            total_products: total,
            processed_products: 0,
            estimated: estimate_duration(total),
            status: String::new(),
            tier: 0,
        };
        self.status = status_text(self.phase, 0, total);
        Ok(())
    }

    /// Response headers accepted with a success status.
    pub fn headers_received(&mut self) -> bool {
        self.advance(Phase::FetchingProducts, Phase::FetchingSales, PROGRESS_HEADERS)
    }

    /// Response body parsed into rows.
    pub fn body_parsed(&mut self) -> bool {
        if self.phase == Phase::FetchingProducts {
            // Headers milestone can be coalesced with the body on fast responses.
            self.headers_received();
        }
        self.advance(Phase::FetchingSales, Phase::Processing, PROGRESS_BODY)
    }

    /// Rows ingested; waiting out the short completion pause.
    pub fn finalizing(&mut self) -> bool {
        if self.phase != Phase::Processing || self.progress >= PROGRESS_FINALIZING {
            return false;
        }
        self.progress = PROGRESS_FINALIZING;
        self.status = "Finalizing results…".into();
        true
    }

    pub fn succeed(&mut self, rows: usize) -> bool {
        if self.phase != Phase::Processing {
            return false;
        }
        self.phase = Phase::Complete;
        self.progress = PROGRESS_DONE;
        self.processed_products = self.total_products;
        self.status = format!("Done: {rows} row(s)");
        true
    }

    /// Request failed; back to idle.
    pub fn fail(&mut self, err: &QueryError) -> bool {
        if !self.is_active() {
            return false;
        }
        *self = Self {
            status: format!("Failed: {err}"),
            ..Self::default()
        };
        true
    }

    /// User or deadline cancellation. Returns false when nothing was in flight.
    pub fn cancel(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        *self = Self {
            status: "Cancelled".into(),
            ..Self::default()
        };
        true
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// One-second tick: refresh the heuristic counters and escalate the status
    /// text when a threshold is crossed. Returns true when the status changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.is_active() {
            return false;
        }
        let elapsed = self.elapsed(now);
        self.processed_products = estimate_processed(elapsed, self.estimated, self.total_products);

        let tier = STATUS_THRESHOLDS
            .iter()
            .take_while(|t| elapsed >= **t)
            .count();
        if tier == self.tier || self.progress >= PROGRESS_FINALIZING {
            return false;
        }
        self.tier = tier;
        self.status = status_text(self.phase, tier, self.total_products);
        true
    }

    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            progress: self.progress,
            elapsed_secs: self.elapsed(now).as_secs(),
            estimated_secs: self.estimated.as_secs(),
            total_products: self.total_products,
            processed_products: self.processed_products,
            status: self.status.clone(),
        }
    }

    fn advance(&mut self, from: Phase, to: Phase, progress: u8) -> bool {
        if self.phase != from {
            return false;
        }
        self.phase = to;
        self.progress = self.progress.max(progress);
        self.status = status_text(to, self.tier, self.total_products);
        true
    }
}

/// Products "processed" so far, scaled from elapsed time against the estimate.
/// Never reports the whole set before completion.
fn estimate_processed(elapsed: Duration, estimated: Duration, total: usize) -> usize {
    if total == 0 || estimated.is_zero() {
        return 0;
    }
    let ratio = elapsed.as_secs_f64() / estimated.as_secs_f64();
    let done = (ratio * total as f64).floor() as usize;
    done.min(total - 1)
}

fn status_text(phase: Phase, tier: usize, total: usize) -> String {
    match (phase, tier) {
        (Phase::FetchingProducts, 0) => format!("Looking up {total} product(s)…"),
        (Phase::FetchingSales, 0) => "Fetching sales data…".into(),
        (Phase::Processing, 0) => "Matching sales against analytics…".into(),
        (Phase::FetchingProducts, 1) => "Still resolving products, large lists take longer…".into(),
        (Phase::FetchingSales, 1) => "Still fetching sales, wide date ranges take longer…".into(),
        (Phase::Processing, 1) => "Still matching sales records…".into(),
        (_, 2) => "This query is larger than usual, still working…".into(),
        (_, t) if t >= 3 => "Almost there, hang tight…".into(),
        (phase, _) => phase.label().into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn params(n: usize) -> QueryParams {
        QueryParams {
            product_ids: (0..n).map(|i| i.to_string()).collect(),
            start_date: date!(2024 - 01 - 01),
            end_date: date!(2024 - 03 - 31),
        }
    }

    #[test]
    fn test_estimate_examples() {
        assert_eq!(estimate_duration(1), Duration::from_secs(8));
        assert_eq!(estimate_duration(5), Duration::from_secs(11));
        assert_eq!(estimate_duration(10), Duration::from_secs(17));
    }

    #[test]
    fn test_estimate_matches_formula() {
        for n in 1..200usize {
            let expected = (5.0 + 0.8 * n as f64 + 2.0 * (n as f64 / 5.0).ceil()).round() as u64;
            assert_eq!(estimate_duration(n).as_secs(), expected, "n = {n}");
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let now = Instant::now();
        let mut s = SessionState::default();
        s.submit(&params(3), now).unwrap();
        assert_eq!((s.phase(), s.progress()), (Phase::FetchingProducts, 10));
        assert_eq!(s.total_products(), 3);
        assert_eq!(s.estimated(), estimate_duration(3));

        assert!(s.headers_received());
        assert_eq!((s.phase(), s.progress()), (Phase::FetchingSales, 40));
        assert!(s.body_parsed());
        assert_eq!((s.phase(), s.progress()), (Phase::Processing, 80));
        assert!(s.finalizing());
        assert_eq!((s.phase(), s.progress()), (Phase::Processing, 95));
        assert!(s.succeed(2));
        assert_eq!((s.phase(), s.progress()), (Phase::Complete, 100));
        assert_eq!(s.processed_products(), 3);
    }

    #[test]
    fn test_body_without_headers_milestone_still_reaches_processing() {
        let mut s = SessionState::default();
        s.submit(&params(1), Instant::now()).unwrap();
        assert!(s.body_parsed());
        assert_eq!((s.phase(), s.progress()), (Phase::Processing, 80));
    }

    #[test]
    fn test_second_submit_while_active_is_busy() {
        let now = Instant::now();
        let mut s = SessionState::default();
        s.submit(&params(1), now).unwrap();
        assert_eq!(s.submit(&params(2), now), Err(QueryError::Busy));
        assert_eq!(s.total_products(), 1);
    }

    #[test]
    fn test_submit_after_complete_is_allowed() {
        let now = Instant::now();
        let mut s = SessionState::default();
        s.submit(&params(1), now).unwrap();
        s.body_parsed();
        s.succeed(0);
        assert!(s.submit(&params(4), now).is_ok());
        assert_eq!(s.phase(), Phase::FetchingProducts);
    }

    #[test]
    fn test_cancel_resets_and_is_idempotent() {
        let now = Instant::now();
        let mut s = SessionState::default();
        s.submit(&params(2), now).unwrap();
        s.headers_received();
        s.tick(now + Duration::from_secs(120));
        assert!(s.cancel());
        assert_eq!((s.phase(), s.progress()), (Phase::Idle, 0));
        assert!(s.started_at().is_none());
        assert!(!s.cancel());
    }

    #[test]
    fn test_fail_from_any_active_phase() {
        let err = QueryError::Transport("refused".into());
        for steps in 0..3 {
            let mut s = SessionState::default();
            s.submit(&params(1), Instant::now()).unwrap();
            if steps >= 1 {
                s.headers_received();
            }
            if steps >= 2 {
                s.body_parsed();
            }
            assert!(s.fail(&err));
            assert_eq!((s.phase(), s.progress()), (Phase::Idle, 0));
            assert!(s.status().contains("refused"));
        }
    }

    #[test]
    fn test_transitions_ignored_when_idle() {
        let mut s = SessionState::default();
        assert!(!s.headers_received());
        assert!(!s.body_parsed());
        assert!(!s.finalizing());
        assert!(!s.succeed(0));
        assert!(!s.fail(&QueryError::Cancelled));
        assert!(!s.tick(Instant::now()));
        assert_eq!(s, SessionState::default());
    }

    #[test]
    fn test_tick_escalates_status_at_thresholds() {
        let t0 = Instant::now();
        let mut s = SessionState::default();
        s.submit(&params(5), t0).unwrap();
        let initial = s.status().to_string();

        assert!(!s.tick(t0 + Duration::from_secs(29)));
        assert_eq!(s.status(), initial);
        assert!(s.tick(t0 + Duration::from_secs(30)));
        let tier1 = s.status().to_string();
        assert!(!s.tick(t0 + Duration::from_secs(45)));
        assert!(s.tick(t0 + Duration::from_secs(60)));
        assert_ne!(s.status(), tier1);
        assert!(s.tick(t0 + Duration::from_secs(90)));
        assert_eq!(s.status(), "Almost there, hang tight…");
        // Ticks never move the progress bar.
        assert_eq!(s.progress(), 10);
    }

    #[test]
    fn test_processed_count_stays_below_total_until_done() {
        let t0 = Instant::now();
        let mut s = SessionState::default();
        s.submit(&params(10), t0).unwrap();
        s.tick(t0 + Duration::from_secs(8));
        assert!(s.processed_products() > 0);
        s.tick(t0 + Duration::from_secs(600));
        assert_eq!(s.processed_products(), 9);
    }

    #[test]
    fn test_clear_returns_to_initial_state() {
        let mut s = SessionState::default();
        s.submit(&params(1), Instant::now()).unwrap();
        s.body_parsed();
        s.succeed(1);
        s.clear();
        assert_eq!(s, SessionState::default());
    }
}
