use super::metrics::FeedStats;
use std::collections::BTreeMap;

/// Human-readable summary of a run's per-feed stats
pub struct StatsReport {
    feeds: BTreeMap<String, FeedStats>,
}

impl StatsReport {
    pub fn new(feeds: BTreeMap<String, FeedStats>) -> Self {
        Self { feeds }
    }

    pub fn generate_report(&self) -> String {
        if self.feeds.is_empty() {
            return "No feeds registered".to_string();
        }

        let mut report = String::from("=== Feed Stats ===\n");

        for (feed, stats) in &self.feeds {
            let errors = stats.error_count();
            report.push_str(&format!(
                "\n[{}]\n  In: {}\n  Out: {}\n  Errors: {}\n",
                feed,
                stats.inputs,
                stats.outputs,
                if errors == 1 {
                    "1 error".to_string()
                } else {
                    format!("{} errors", errors)
                },
            ));
            for (reason, errs) in &stats.errs_by_reason {
                report.push_str(&format!("    {}: {}\n", reason, errs.count));
            }
        }

        report
    }

    pub fn feeds(&self) -> &BTreeMap<String, FeedStats> {
        &self.feeds
    }
}
