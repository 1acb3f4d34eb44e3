use crate::report::{CycleReport, RunSummary};
use regex::Regex;
use replybot_core::{
    BotParams, CandidateItem, CoreError, ErrorExt, ErrorReporter, ItemSource, ReplySender,
    SeenStore,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A reply that failed and waits for the next cycle.
#[derive(Debug)]
struct PendingReply {
    item: CandidateItem,
    /// Source position (items yielded so far) when the reply first failed.
    queued_at: u64,
}

/// The poll/match/reply loop.
///
/// Every cycle first re-tries replies that failed last time, then fetches new
/// items from the source and answers the ones whose body matches the pattern.
/// An item id enters the Seen-set once it has been handled, and nothing in the
/// Seen-set is ever answered again.
pub struct ReplyBot<S, R> {
    params: BotParams,
    pattern: Regex,
    source: S,
    sender: R,
    store: Arc<dyn SeenStore>,
    reporter: ErrorReporter,
    pending: VecDeque<PendingReply>,
    pending_limit: usize,
    yielded: u64,
}

impl<S, R> ReplyBot<S, R>
where
    S: ItemSource,
    R: ReplySender,
{
    /// Fails on an invalid pattern before anything touches the network.
    pub fn new(
        params: BotParams,
        source: S,
        sender: R,
        store: Arc<dyn SeenStore>,
    ) -> Result<Self, CoreError> {
        let pattern = params.compile_pattern()?;
        Ok(Self::with_pattern(params, pattern, source, sender, store))
    }

    /// Uses a pattern already compiled from `params`.
    pub fn with_pattern(
        params: BotParams,
        pattern: Regex,
        source: S,
        sender: R,
        store: Arc<dyn SeenStore>,
    ) -> Self {
        let pending_limit = params.fetch_limit.max(1) as usize;

        Self {
            params,
            pattern,
            source,
            sender,
            store,
            reporter: ErrorReporter::new(),
            pending: VecDeque::new(),
            pending_limit,
            yielded: 0,
        }
    }

    pub fn params(&self) -> &BotParams {
        &self.params
    }

    /// Items whose reply failed and will be tried again next cycle.
    pub fn pending_retries(&self) -> usize {
        self.pending.len()
    }

    /// Marks the targets of the account's previous replies as seen. Failures
    /// only cost the extra protection, so they are logged and ignored.
    pub async fn seed_from_history(&self) -> Result<usize, CoreError> {
        let targets = match self.sender.replied_targets().await {
            Ok(targets) => targets,
            Err(e) => {
                warn!("Could not load previous replies, continuing without them: {}", e);
                return Ok(0);
            }
        };

        let mut added = 0;
        for id in targets {
            if !self.store.contains(&id).await? {
                self.store.record(&id, true).await?;
                added += 1;
            }
        }

        if added > 0 {
            info!("Marked {} previously answered items as seen", added);
        }
        Ok(added)
    }

    /// Runs cycles until `cancel` fires. A cycle in progress always finishes.
    ///
    /// Only Seen-set failures end the loop with an error; fetch and reply
    /// failures are retried on the next cycle.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<RunSummary, CoreError> {
        info!(
            "Watching r/{} ({:?}) for {:?}, every {:?}{}",
            self.params.subreddit,
            self.params.stream,
            self.pattern.as_str(),
            self.params.timeout,
            if self.params.dry_run { " [dry run]" } else { "" }
        );

        self.seed_from_history().await?;

        let mut summary = RunSummary::default();
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let report = self.run_cycle().await?;
            report.log();
            summary.absorb(&report);

            debug!("Sleeping for {:?}", self.params.timeout);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.params.timeout) => {}
            }
        }

        info!(
            "Stopped after {} cycles: {} replies, {} failed",
            summary.cycles, summary.replied, summary.failed
        );
        Ok(summary)
    }

    /// One fetch–filter–act pass.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CoreError> {
        let mut report = CycleReport::default();

        self.expire_pending();
        let retries: Vec<PendingReply> = self.pending.drain(..).collect();
        if !retries.is_empty() {
            debug!("Retrying {} failed replies", retries.len());
        }
        for PendingReply { item, queued_at } in retries {
            if self.store.contains(&item.id).await? {
                continue;
            }
            self.handle_match(item, Some(queued_at), &mut report).await?;
        }

        match self.source.fetch_new().await {
            Ok(items) => {
                report.fetched = items.len();
                self.yielded += items.len() as u64;
                for item in items {
                    debug!("Fetched {}", item.log_summary());
                    self.handle_item(item, &mut report).await?;
                }
            }
            Err(e) => {
                self.reporter.report_warning(&e);
                debug!(
                    "Fetching from r/{} again in {:?}",
                    self.params.subreddit, self.params.timeout
                );
                report.fetch_failed = true;
            }
        }

        Ok(report)
    }

    async fn handle_item(
        &mut self,
        item: CandidateItem,
        report: &mut CycleReport,
    ) -> Result<(), CoreError> {
        if self.store.contains(&item.id).await? {
            report.skipped += 1;
            return Ok(());
        }

        let skip_reason = if self
            .sender
            .account_name()
            .is_some_and(|me| item.is_authored_by(me))
        {
            Some("own item")
        } else if item.is_tombstone() {
            Some("deleted")
        } else if !self.pattern.is_match(&item.match_text()) {
            Some("no match")
        } else {
            None
        };

        if let Some(reason) = skip_reason {
            debug!("Skipping {} ({})", item.id, reason);
            self.store.record(&item.id, false).await?;
            report.skipped += 1;
            return Ok(());
        }

        self.handle_match(item, None, report).await
    }

    async fn handle_match(
        &mut self,
        item: CandidateItem,
        queued_at: Option<u64>,
        report: &mut CycleReport,
    ) -> Result<(), CoreError> {
        report.matched += 1;

        if self.params.dry_run {
            info!("Would reply to:\n{}", item.log_summary());
            self.store.record(&item.id, false).await?;
            report.replied += 1;
            return Ok(());
        }

        match self.sender.send_reply(&item, &self.params.reply).await {
            Ok(()) => {
                info!("Replied to:\n{}", item.log_summary());
                self.store.record(&item.id, true).await?;
                report.replied += 1;
            }
            Err(e) if e.is_retryable() => {
                warn!("Reply to {} failed, will retry next cycle: {}", item.id, e);
                report.failed += 1;
                self.queue_retry(PendingReply {
                    item,
                    queued_at: queued_at.unwrap_or(self.yielded),
                });
            }
            Err(e) => {
                warn!(
                    code = %e.error_code(),
                    "Reply to {} refused, not trying again: {}",
                    item.id,
                    e
                );
                self.store.record(&item.id, false).await?;
                report.failed += 1;
            }
        }
        Ok(())
    }

    /// Drops retries for items the source has already moved past.
    fn expire_pending(&mut self) {
        let Some(window) = self.source.recent_window() else {
            return;
        };
        let yielded = self.yielded;
        self.pending.retain(|pending| {
            let keep = yielded.saturating_sub(pending.queued_at) < window as u64;
            if !keep {
                warn!(
                    "Giving up on reply to {}: it left the last {} items",
                    pending.item.id, window
                );
            }
            keep
        });
    }

    fn queue_retry(&mut self, pending: PendingReply) {
        if self.pending.iter().any(|queued| queued.item.id == pending.item.id) {
            return;
        }
        if self.pending.len() >= self.pending_limit {
            if let Some(dropped) = self.pending.pop_front() {
                warn!(
                    "Retry queue full ({} items), giving up on {}",
                    self.pending_limit, dropped.item.id
                );
            }
        }
        self.pending.push_back(pending);
    }
}
