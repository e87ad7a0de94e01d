use super::metrics::{FeedError, FeedStats};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Stats table shared by all workers of one shard, behind a single lock
#[derive(Default)]
pub struct RunStats {
    feeds: Mutex<BTreeMap<String, FeedStats>>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a feed show up in snapshots even if it never sees traffic
    pub fn register(&self, feed: &str) {
        self.with_feed(feed, |_| {});
    }

    pub fn record_in(&self, feed: &str) {
        self.with_feed(feed, |stats| stats.inputs += 1);
    }

    pub fn record_out(&self, feed: &str) {
        self.with_feed(feed, |stats| stats.outputs += 1);
    }

    pub fn record_error(&self, feed: &str, reason: &str, err: FeedError) {
        self.with_feed(feed, |stats| {
            stats
                .errs_by_reason
                .entry(reason.to_string())
                .or_default()
                .add_error(err)
        });
    }

    pub fn snapshot(&self) -> BTreeMap<String, FeedStats> {
        self.feeds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn with_feed(&self, feed: &str, f: impl FnOnce(&mut FeedStats)) {
        let mut feeds = self
            .feeds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match feeds.get_mut(feed) {
            Some(stats) => f(stats),
            None => f(feeds.entry(feed.to_string()).or_default()),
        }
    }
}

/// Fold one shard's stats table into a running total
pub fn merge_stats(total: &mut BTreeMap<String, FeedStats>, shard: &BTreeMap<String, FeedStats>) {
    for (feed, stats) in shard {
        total.entry(feed.clone()).or_default().add(stats);
    }
}
