use async_trait::async_trait;
use bot_service::{CycleReport, ReplyBot};
use chrono::{TimeZone, Utc};
use database::SqliteSeenStore;
use replybot_core::{
    BotParams, CandidateItem, ConfigError, CoreError, ItemId, ItemSource, MemorySeenStore,
    RedditApiError, ReplySender, SeenStore,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const TIMEOUT_SECS: u64 = 60;

fn params(extra: &str) -> BotParams {
    let yaml = format!(
        "pattern: '\\bdog\\b'\nreply: Woof\nsubreddit: dogs\ntimeout: {}\n{}",
        TIMEOUT_SECS, extra
    );
    BotParams::from_yaml_str(&yaml).unwrap()
}

fn comment(id: &str, author: &str, body: &str) -> CandidateItem {
    CandidateItem {
        id: ItemId::comment(id),
        author: author.to_string(),
        body: body.to_string(),
        created_utc: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        subreddit: "dogs".to_string(),
        permalink: None,
        title: Some("Dogs thread".to_string()),
    }
}

#[derive(Clone, Default)]
struct FakeSource {
    batches: Arc<Mutex<VecDeque<Result<Vec<CandidateItem>, CoreError>>>>,
    fetches: Arc<Mutex<Vec<Instant>>>,
    window: Option<usize>,
    cancel_on_fetch: Option<CancellationToken>,
}

impl FakeSource {
    fn with_batches(batches: Vec<Result<Vec<CandidateItem>, CoreError>>) -> Self {
        Self {
            batches: Arc::new(Mutex::new(batches.into())),
            ..Default::default()
        }
    }

    fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }
}

#[async_trait]
impl ItemSource for FakeSource {
    async fn fetch_new(&mut self) -> Result<Vec<CandidateItem>, CoreError> {
        self.fetches.lock().unwrap().push(Instant::now());
        if let Some(cancel) = &self.cancel_on_fetch {
            cancel.cancel();
        }
        self.batches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn recent_window(&self) -> Option<usize> {
        self.window
    }
}

#[derive(Clone, Default)]
struct FakeSender {
    sent: Arc<Mutex<Vec<(ItemId, String)>>>,
    attempts: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
    reject_code: Option<&'static str>,
    history: Vec<ItemId>,
    history_fails: bool,
}

impl FakeSender {
    fn failing(times: usize) -> Self {
        let sender = Self::default();
        sender.failures_left.store(times, Ordering::SeqCst);
        sender
    }

    fn sent_ids(&self) -> Vec<ItemId> {
        self.sent.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }
}

#[async_trait]
impl ReplySender for FakeSender {
    async fn send_reply(&self, item: &CandidateItem, body: &str) -> Result<(), CoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(code) = self.reject_code {
            return Err(CoreError::RedditApi(RedditApiError::Rejected {
                code: code.to_string(),
                message: "that thread is locked".to_string(),
            }));
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(CoreError::RedditApi(RedditApiError::ServerError {
                status_code: 503,
            }));
        }
        self.sent
            .lock()
            .unwrap()
            .push((item.id.clone(), body.to_string()));
        Ok(())
    }

    fn account_name(&self) -> Option<&str> {
        Some("replybot")
    }

    async fn replied_targets(&self) -> Result<Vec<ItemId>, CoreError> {
        if self.history_fails {
            return Err(CoreError::RedditApi(RedditApiError::RequestTimeout));
        }
        Ok(self.history.clone())
    }
}

fn memory_store() -> Arc<dyn SeenStore> {
    Arc::new(MemorySeenStore::new())
}

#[tokio::test]
async fn test_invalid_pattern_fails_before_any_fetch() {
    let params = BotParams::from_yaml_str(
        "pattern: '(unclosed'\nreply: Woof\nsubreddit: dogs\ntimeout: 10\n",
    )
    .unwrap();
    let source = FakeSource::default();

    let result = ReplyBot::new(params, source.clone(), FakeSender::default(), memory_store());

    assert!(matches!(
        result,
        Err(CoreError::Config(ConfigError::InvalidPattern { .. }))
    ));
    assert_eq!(source.fetch_count(), 0);
}

#[tokio::test]
async fn test_prebuilt_pattern_is_used_as_given() {
    let params = params("");
    let pattern = params.compile_pattern().unwrap();
    let source = FakeSource::with_batches(vec![Ok(vec![comment("p1", "alice", "good DOG")])]);
    let sender = FakeSender::default();
    let mut bot =
        ReplyBot::with_pattern(params, pattern, source, sender.clone(), memory_store());

    bot.run_cycle().await.unwrap();

    assert_eq!(sender.sent_ids(), vec![ItemId::comment("p1")]);
}

#[tokio::test]
async fn test_word_boundary_pattern_matches_only_whole_words() {
    let source = FakeSource::with_batches(vec![Ok(vec![
        comment("a1", "alice", "my dog is cute"),
        comment("a2", "bob", "the doghouse is red"),
    ])]);
    let sender = FakeSender::default();
    let store = memory_store();
    let mut bot = ReplyBot::new(params(""), source, sender.clone(), store.clone()).unwrap();

    let report = bot.run_cycle().await.unwrap();

    assert_eq!(sender.sent_ids(), vec![ItemId::comment("a1")]);
    assert_eq!(sender.sent.lock().unwrap()[0].1, "Woof");
    assert_eq!(report.fetched, 2);
    assert_eq!(report.matched, 1);
    assert_eq!(report.replied, 1);
    assert_eq!(report.skipped, 1);
    assert!(store.contains(&ItemId::comment("a1")).await.unwrap());
    assert!(store.contains(&ItemId::comment("a2")).await.unwrap());
}

#[tokio::test]
async fn test_pattern_is_case_insensitive_by_default() {
    let source = FakeSource::with_batches(vec![Ok(vec![comment("a1", "alice", "DOG!")])]);
    let sender = FakeSender::default();
    let mut bot = ReplyBot::new(params(""), source, sender.clone(), memory_store()).unwrap();

    bot.run_cycle().await.unwrap();
    assert_eq!(sender.sent_ids().len(), 1);

    let source = FakeSource::with_batches(vec![Ok(vec![comment("a2", "alice", "DOG!")])]);
    let sender = FakeSender::default();
    let mut bot = ReplyBot::new(
        params("case_sensitive: true\n"),
        source,
        sender.clone(),
        memory_store(),
    )
    .unwrap();

    bot.run_cycle().await.unwrap();
    assert!(sender.sent_ids().is_empty());
}

#[tokio::test]
async fn test_item_is_never_replied_to_twice() {
    let item = comment("b1", "alice", "good dog");
    let source = FakeSource::with_batches(vec![
        Ok(vec![item.clone()]),
        Ok(vec![item.clone()]),
        Ok(vec![item]),
    ]);
    let sender = FakeSender::default();
    let mut bot = ReplyBot::new(params(""), source, sender.clone(), memory_store()).unwrap();

    for _ in 0..3 {
        bot.run_cycle().await.unwrap();
    }

    assert_eq!(sender.sent_ids(), vec![ItemId::comment("b1")]);
}

#[tokio::test]
async fn test_dry_run_sends_nothing_but_records_items() {
    let source = FakeSource::with_batches(vec![Ok(vec![comment("c1", "alice", "a dog")])]);
    let sender = FakeSender::default();
    let store = memory_store();
    let mut bot =
        ReplyBot::new(params("dry_run: true\n"), source, sender.clone(), store.clone()).unwrap();

    let report = bot.run_cycle().await.unwrap();

    assert!(sender.sent_ids().is_empty());
    assert_eq!(report.matched, 1);
    assert!(store.contains(&ItemId::comment("c1")).await.unwrap());
}

#[tokio::test]
async fn test_own_and_deleted_items_are_skipped_and_recorded() {
    let source = FakeSource::with_batches(vec![Ok(vec![
        comment("d1", "ReplyBot", "I am a dog bot"),
        comment("d2", "[deleted]", "[deleted]"),
        comment("d3", "carol", "[removed]"),
    ])]);
    let sender = FakeSender::default();
    let store = memory_store();
    let mut bot = ReplyBot::new(params(""), source, sender.clone(), store.clone()).unwrap();

    let report = bot.run_cycle().await.unwrap();

    assert!(sender.sent_ids().is_empty());
    assert_eq!(report.skipped, 3);
    assert_eq!(store.len().await.unwrap(), 3);
}

#[tokio::test]
async fn test_fetch_failure_is_retried_next_cycle() {
    let source = FakeSource::with_batches(vec![
        Err(CoreError::RedditApi(RedditApiError::ServerError {
            status_code: 502,
        })),
        Ok(vec![comment("e1", "alice", "dog")]),
    ]);
    let sender = FakeSender::default();
    let mut bot = ReplyBot::new(params(""), source.clone(), sender.clone(), memory_store()).unwrap();

    let first = bot.run_cycle().await.unwrap();
    assert!(first.fetch_failed);
    assert_eq!(first.fetched, 0);

    let second = bot.run_cycle().await.unwrap();
    assert!(!second.fetch_failed);
    assert_eq!(second.replied, 1);
    assert_eq!(source.fetch_count(), 2);
}

#[tokio::test]
async fn test_failed_reply_is_recorded_only_after_success() {
    let source = FakeSource::with_batches(vec![Ok(vec![comment("f1", "alice", "dog")])]);
    let sender = FakeSender::failing(1);
    let store = memory_store();
    let mut bot = ReplyBot::new(params(""), source, sender.clone(), store.clone()).unwrap();

    let first = bot.run_cycle().await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(bot.pending_retries(), 1);
    assert!(!store.contains(&ItemId::comment("f1")).await.unwrap());

    let second = bot.run_cycle().await.unwrap();
    assert_eq!(
        second,
        CycleReport {
            matched: 1,
            replied: 1,
            ..Default::default()
        }
    );
    assert_eq!(bot.pending_retries(), 0);
    assert!(store.contains(&ItemId::comment("f1")).await.unwrap());
    assert_eq!(sender.sent_ids(), vec![ItemId::comment("f1")]);
}

#[tokio::test]
async fn test_retry_queue_is_bounded_by_fetch_limit() {
    let source = FakeSource::with_batches(vec![Ok(vec![
        comment("g1", "alice", "dog"),
        comment("g2", "alice", "dog"),
        comment("g3", "alice", "dog"),
    ])]);
    let sender = FakeSender::failing(3);
    let mut bot =
        ReplyBot::new(params("fetch_limit: 2\n"), source, sender.clone(), memory_store()).unwrap();

    bot.run_cycle().await.unwrap();
    assert_eq!(bot.pending_retries(), 2);

    bot.run_cycle().await.unwrap();
    assert_eq!(
        sender.sent_ids(),
        vec![ItemId::comment("g2"), ItemId::comment("g3")]
    );
}

fn chatter(cycle: usize, count: usize) -> Vec<CandidateItem> {
    (0..count)
        .map(|n| comment(&format!("c{cycle}x{n}"), "alice", "nothing to see"))
        .collect()
}

#[tokio::test]
async fn test_refused_reply_is_not_retried() {
    let mut batches = vec![Ok(vec![comment("j1", "alice", "locked dog")])];
    batches.extend((0..5).map(|cycle| Ok(chatter(cycle, 10))));
    let source = FakeSource::with_batches(batches);
    let sender = FakeSender {
        reject_code: Some("THREAD_LOCKED"),
        ..Default::default()
    };
    let store = memory_store();
    let mut bot = ReplyBot::new(params(""), source, sender.clone(), store.clone()).unwrap();

    let first = bot.run_cycle().await.unwrap();
    assert_eq!(first.failed, 1);
    for _ in 0..5 {
        bot.run_cycle().await.unwrap();
    }

    assert_eq!(sender.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(bot.pending_retries(), 0);
    assert!(store.contains(&ItemId::comment("j1")).await.unwrap());
    assert!(sender.sent_ids().is_empty());
}

#[tokio::test]
async fn test_retry_expires_once_source_window_moves_past() {
    let mut batches = vec![Ok(vec![comment("k1", "alice", "dog")])];
    batches.extend((0..5).map(|cycle| Ok(chatter(cycle, 10))));
    let source = FakeSource {
        window: Some(25),
        ..FakeSource::with_batches(batches)
    };
    let sender = FakeSender::failing(usize::MAX);
    let store = memory_store();
    let mut bot = ReplyBot::new(params(""), source, sender.clone(), store.clone()).unwrap();

    // 1 item, then 10 per cycle: by the fifth cycle 30 newer items were
    // yielded and the window of 25 no longer covers k1.
    for _ in 0..6 {
        bot.run_cycle().await.unwrap();
    }

    assert_eq!(sender.attempts.load(Ordering::SeqCst), 4);
    assert_eq!(bot.pending_retries(), 0);
    assert!(!store.contains(&ItemId::comment("k1")).await.unwrap());
}

#[tokio::test]
async fn test_previous_replies_seed_the_seen_set() {
    let source = FakeSource::with_batches(vec![Ok(vec![
        comment("h1", "alice", "dog"),
        comment("h2", "alice", "dog"),
    ])]);
    let sender = FakeSender {
        history: vec![ItemId::comment("h1")],
        ..Default::default()
    };
    let mut bot = ReplyBot::new(params(""), source, sender.clone(), memory_store()).unwrap();

    assert_eq!(bot.seed_from_history().await.unwrap(), 1);
    bot.run_cycle().await.unwrap();

    assert_eq!(sender.sent_ids(), vec![ItemId::comment("h2")]);
}

#[tokio::test]
async fn test_history_failure_is_ignored() {
    let sender = FakeSender {
        history_fails: true,
        ..Default::default()
    };
    let bot = ReplyBot::new(params(""), FakeSource::default(), sender, memory_store()).unwrap();

    assert_eq!(bot.seed_from_history().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cycles_are_spaced_by_timeout() {
    let source = FakeSource::default();
    let bot = ReplyBot::new(params(""), source.clone(), FakeSender::default(), memory_store())
        .unwrap();
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(bot.run(cancel.clone()));
    tokio::time::sleep(Duration::from_secs(TIMEOUT_SECS * 3 + 1)).await;
    cancel.cancel();
    let summary = handle.await.unwrap().unwrap();

    let fetches = source.fetches.lock().unwrap().clone();
    assert_eq!(fetches.len(), 4);
    assert_eq!(summary.cycles, 4);
    for pair in fetches.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(TIMEOUT_SECS));
    }
}

#[tokio::test]
async fn test_cancelled_bot_stops_without_cycling() {
    let source = FakeSource::default();
    let bot = ReplyBot::new(params(""), source.clone(), FakeSender::default(), memory_store())
        .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = bot.run(cancel).await.unwrap();

    assert_eq!(summary.cycles, 0);
    assert_eq!(source.fetch_count(), 0);
}

#[tokio::test]
async fn test_cancel_during_cycle_lets_it_finish() {
    let cancel = CancellationToken::new();
    let source = FakeSource {
        cancel_on_fetch: Some(cancel.clone()),
        ..FakeSource::with_batches(vec![Ok(vec![comment("m1", "alice", "a dog")])])
    };
    let sender = FakeSender::default();
    let store = memory_store();
    let bot = ReplyBot::new(params(""), source.clone(), sender.clone(), store.clone()).unwrap();

    let summary = bot.run(cancel).await.unwrap();

    assert_eq!(summary.cycles, 1);
    assert_eq!(summary.replied, 1);
    assert_eq!(source.fetch_count(), 1);
    assert_eq!(sender.sent_ids(), vec![ItemId::comment("m1")]);
    assert!(store.contains(&ItemId::comment("m1")).await.unwrap());
}

#[tokio::test]
async fn test_link_target_does_not_trigger_a_reply() {
    let source = FakeSource::with_batches(vec![Ok(vec![
        comment("n1", "alice", "read [this](https://dog.example/post)"),
        comment("n2", "bob", "[my dog](https://example.com) barks"),
    ])]);
    let sender = FakeSender::default();
    let mut bot = ReplyBot::new(params(""), source, sender.clone(), memory_store()).unwrap();

    bot.run_cycle().await.unwrap();

    assert_eq!(sender.sent_ids(), vec![ItemId::comment("n2")]);
}

#[tokio::test]
async fn test_persisted_seen_set_prevents_reply_after_restart() {
    let path = std::env::temp_dir().join(format!("replybot_restart_{}.db", uuid::Uuid::new_v4()));
    let item = comment("i1", "alice", "dog");

    {
        let store = Arc::new(SqliteSeenStore::open(&path).await.unwrap());
        let source = FakeSource::with_batches(vec![Ok(vec![item.clone()])]);
        let sender = FakeSender::default();
        let mut bot = ReplyBot::new(params(""), source, sender.clone(), store.clone()).unwrap();
        bot.run_cycle().await.unwrap();
        assert_eq!(sender.sent_ids().len(), 1);
        store.close().await;
    }

    let store = Arc::new(SqliteSeenStore::open(&path).await.unwrap());
    let source = FakeSource::with_batches(vec![Ok(vec![item])]);
    let sender = FakeSender::default();
    let mut bot = ReplyBot::new(params(""), source, sender.clone(), store).unwrap();

    let report = bot.run_cycle().await.unwrap();
    assert!(sender.sent_ids().is_empty());
    assert_eq!(report.skipped, 1);
}
