use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Upper bound on the error examples kept per feed and reason
pub const MAX_ERROR_SAMPLES: usize = 10;

/// One example of a sample error, with the record that caused it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FeedError {
    pub source_name: String,
    pub source_key: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl FeedError {
    pub fn new(
        source_name: impl Into<String>,
        source_key: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            source_key: source_key.into(),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Exact error count plus a bounded random sample of examples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FeedErrors {
    pub count: u64,
    pub samples: Vec<FeedError>,
}

impl FeedErrors {
    pub fn add_error(&mut self, err: FeedError) {
        self.add_error_with(err, &mut rand::thread_rng());
    }

    /// Reservoir sampling: after `n` calls every error has had the same
    /// `MAX_ERROR_SAMPLES / n` chance of being kept.
    pub fn add_error_with<R: Rng>(&mut self, err: FeedError, rng: &mut R) {
        self.count += 1;
        if self.samples.len() < MAX_ERROR_SAMPLES {
            self.samples.push(err);
            return;
        }
        let slot = rng.gen_range(0..self.count) as usize;
        if slot < MAX_ERROR_SAMPLES {
            self.samples[slot] = err;
        }
    }

    /// Counts add exactly; the kept examples are a random subset of both sides
    pub fn merge(&mut self, other: &FeedErrors) {
        self.count += other.count;
        self.samples.extend(other.samples.iter().cloned());
        if self.samples.len() > MAX_ERROR_SAMPLES {
            self.samples.shuffle(&mut rand::thread_rng());
            self.samples.truncate(MAX_ERROR_SAMPLES);
        }
    }
}

/// Per-feed traffic counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedStats {
    #[serde(rename = "In")]
    pub inputs: u64,
    #[serde(rename = "Out")]
    pub outputs: u64,
    #[serde(rename = "ErrsByReason")]
    pub errs_by_reason: BTreeMap<String, FeedErrors>,
}

impl FeedStats {
    pub fn add(&mut self, other: &FeedStats) {
        self.inputs += other.inputs;
        self.outputs += other.outputs;
        for (reason, errs) in &other.errs_by_reason {
            self.errs_by_reason
                .entry(reason.clone())
                .or_default()
                .merge(errs);
        }
    }

    pub fn error_count(&self) -> u64 {
        self.errs_by_reason.values().map(|e| e.count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(i: usize) -> FeedError {
        FeedError::new("src", format!("key-{}", i), "bad input")
    }

    #[test]
    fn test_reservoir_bounded() {
        let mut errs = FeedErrors::default();
        for i in 0..1000 {
            errs.add_error(err(i));
            assert!(errs.samples.len() <= MAX_ERROR_SAMPLES);
        }
        assert_eq!(errs.count, 1000);
        assert_eq!(errs.samples.len(), MAX_ERROR_SAMPLES);
    }

    #[test]
    fn test_reservoir_keeps_everything_below_cap() {
        let mut errs = FeedErrors::default();
        for i in 0..4 {
            errs.add_error(err(i));
        }
        assert_eq!(errs.count, 4);
        let keys: Vec<_> = errs.samples.iter().map(|e| e.source_key.as_str()).collect();
        assert_eq!(keys, vec!["key-0", "key-1", "key-2", "key-3"]);
    }

    #[test]
    fn test_stats_add() {
        let mut a = FeedStats {
            inputs: 3,
            outputs: 2,
            ..Default::default()
        };
        a.errs_by_reason
            .entry("parse".to_string())
            .or_default()
            .add_error(err(0));

        let mut b = FeedStats {
            inputs: 7,
            outputs: 1,
            ..Default::default()
        };
        for i in 0..12 {
            b.errs_by_reason
                .entry("parse".to_string())
                .or_default()
                .add_error(err(i));
        }

        a.add(&b);
        assert_eq!(a.inputs, 10);
        assert_eq!(a.outputs, 3);
        let parse = &a.errs_by_reason["parse"];
        assert_eq!(parse.count, 13);
        assert_eq!(parse.samples.len(), MAX_ERROR_SAMPLES);
        assert_eq!(a.error_count(), 13);
    }

    #[test]
    fn test_wire_field_names() {
        let stats = FeedStats {
            inputs: 1,
            outputs: 2,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["In"], 1);
        assert_eq!(json["Out"], 2);
        assert!(json["ErrsByReason"].is_object());
    }
}
