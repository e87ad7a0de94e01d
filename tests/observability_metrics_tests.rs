use shardflow::observability::{FeedError, FeedErrors, FeedStats, MAX_ERROR_SAMPLES};

#[test]
fn test_feed_error_creation() {
    let err = FeedError::new("numbers", "42", "bad input");
    assert_eq!(err.source_name, "numbers");
    assert_eq!(err.source_key, "42");
    assert_eq!(err.error, "bad input");
}

#[test]
fn test_reservoir_never_exceeds_cap() {
    let mut errs = FeedErrors::default();
    for i in 0..250 {
        errs.add_error(FeedError::new("numbers", i.to_string(), "bad input"));
        assert!(errs.samples.len() <= MAX_ERROR_SAMPLES);
        assert_eq!(errs.count, i + 1);
    }
}

#[test]
fn test_merge_counts_exactly() {
    let mut a = FeedErrors::default();
    let mut b = FeedErrors::default();
    for i in 0..8 {
        a.add_error(FeedError::new("numbers", i.to_string(), "bad input"));
        b.add_error(FeedError::new("numbers", i.to_string(), "bad input"));
    }

    a.merge(&b);
    assert_eq!(a.count, 16);
    assert_eq!(a.samples.len(), MAX_ERROR_SAMPLES);
}

#[test]
fn test_stats_json_round_trip() {
    let mut stats = FeedStats {
        inputs: 4,
        outputs: 3,
        ..Default::default()
    };
    stats
        .errs_by_reason
        .entry("empty".to_string())
        .or_default()
        .add_error(FeedError::new("files", "a.txt", "empty"));

    let json = serde_json::to_string(&stats).unwrap();
    assert!(json.contains("\"ErrsByReason\""));
    assert!(json.contains("\"SourceKey\":\"a.txt\""));

    let back: FeedStats = serde_json::from_str(&json).unwrap();
    assert_eq!(back, stats);
}
