use serde::Serialize;
use tracing::{info, warn};

/// What happened during one fetch–filter–act cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Items returned by the source this cycle.
    pub fetched: usize,
    /// Items whose body matched the pattern (retries included).
    pub matched: usize,
    /// Replies posted, or logged in dry-run mode.
    pub replied: usize,
    /// Items recorded without a reply: already seen, own, deleted or not matching.
    pub skipped: usize,
    /// Replies that failed. Transient failures are queued for the next cycle.
    pub failed: usize,
    pub fetch_failed: bool,
}

impl CycleReport {
    pub fn log(&self) {
        if self.fetch_failed {
            warn!(
                "Cycle finished without fetching: matched={} replied={} failed={}",
                self.matched, self.replied, self.failed
            );
        } else {
            info!(
                "Cycle finished: fetched={} matched={} replied={} skipped={} failed={}",
                self.fetched, self.matched, self.replied, self.skipped, self.failed
            );
        }
    }
}

/// Totals over every cycle of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub cycles: usize,
    pub fetched: usize,
    pub matched: usize,
    pub replied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub fetch_failures: usize,
}

impl RunSummary {
    pub fn absorb(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.fetched += report.fetched;
        self.matched += report.matched;
        self.replied += report.replied;
        self.skipped += report.skipped;
        self.failed += report.failed;
        if report.fetch_failed {
            self.fetch_failures += 1;
        }
    }
}
