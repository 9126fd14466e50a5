//! Ordering gate between the snapshot source and the engines.
//!
//! The poller does not fetch anything itself; the monitor owns the I/O and
//! hands each result to [`Poller::ingest`]. What comes out is either a
//! fresh report that both engines must see, or a reason to leave them
//! alone.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::source::SourceReport;

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Accepted. `recovered` is set on the first success after an outage.
    Fresh { recovered: bool },
    /// Older than the last accepted snapshot; dropped. The source still
    /// answered, so `recovered` ends an outage here too.
    Stale {
        observed_at: DateTime<Utc>,
        last_accepted: DateTime<Utc>,
        recovered: bool,
    },
    /// Fetch failed. `first` is set only on the transition into the outage.
    Unreachable { reason: String, first: bool },
}

#[derive(Debug, Default)]
pub struct Poller {
    last_accepted: Option<DateTime<Utc>>,
    unreachable: bool,
    latest: Option<SourceReport>,
    in_flight: bool,
    skipped_ticks: u64,
    failures: u64,
}

impl Poller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the single fetch slot. Returns false (and counts the skipped
    /// tick) when a fetch is already outstanding.
    pub fn begin_fetch(&mut self) -> bool {
        if self.in_flight {
            self.skipped_ticks += 1;
            debug!(skipped = self.skipped_ticks, "poll tick skipped, fetch in flight");
            return false;
        }
        self.in_flight = true;
        true
    }

    pub fn finish_fetch(&mut self) {
        self.in_flight = false;
    }

    pub fn ingest(
        &mut self,
        result: Result<SourceReport, SourceError>,
        now: DateTime<Utc>,
    ) -> PollOutcome {
        self.finish_fetch();

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                self.failures += 1;
                let first = !self.unreachable;
                self.unreachable = true;
                warn!(error = %e, failures = self.failures, "snapshot source failed");
                return PollOutcome::Unreachable {
                    reason: e.to_string(),
                    first,
                };
            }
        };

        let recovered = self.unreachable;
        if recovered {
            info!(after_failures = self.failures, "snapshot source recovered");
        }
        self.unreachable = false;
        self.failures = 0;

        let observed_at = report.latest.observed_at;
        if let Some(last_accepted) = self.last_accepted {
            if observed_at < last_accepted {
                debug!(%observed_at, %last_accepted, %now, "dropping out-of-order snapshot");
                return PollOutcome::Stale {
                    observed_at,
                    last_accepted,
                    recovered,
                };
            }
        }

        self.last_accepted = Some(observed_at);
        self.latest = Some(report);
        PollOutcome::Fresh { recovered }
    }

    /// Last accepted report.
    pub fn latest(&self) -> Option<&SourceReport> {
        self.latest.as_ref()
    }

    pub fn last_accepted(&self) -> Option<DateTime<Utc>> {
        self.last_accepted
    }

    pub fn is_unreachable(&self) -> bool {
        self.unreachable
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks
    }
}
