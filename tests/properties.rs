//! Property tests: replay determinism, cache transparency, TTL expiry and
//! the diff laws.

use agency_replay::diff::edit_cost;
use agency_replay::{
    diff_lines, patch, DiffLine, LogEntry, LogIndex, LogSource, ReplayConfig, ReplayCoordinator,
    Timestamp, UpdateStatus,
};
use proptest::prelude::*;
use serde_json::{json, Value as Json};
use std::sync::Arc;

const PATHS: &[&str] = &["/a", "/b", "/a/x", "/list", "/list/0", "/q", "/n/m"];

fn descriptor() -> impl Strategy<Value = Json> {
    prop_oneof![
        (0i64..10).prop_map(|n| json!(n)),
        (0i64..10).prop_map(|n| json!({"op": "set", "new": {"v": n}})),
        (1i64..4).prop_map(|n| json!({"op": "increment", "step": n})),
        (1i64..4).prop_map(|n| json!({"op": "decrement", "new": n})),
        Just(json!({"op": "delete"})),
        (0i64..5).prop_map(|n| json!({"op": "push", "new": n})),
        (0i64..5).prop_map(|n| json!({"op": "prepend", "new": n})),
        (0i64..5, 1u64..4).prop_map(|(n, len)| json!({"op": "push-queue", "new": n, "len": len})),
        Just(json!({"op": "pop"})),
        Just(json!({"op": "shift"})),
        (0i64..5).prop_map(|n| json!({"op": "erase", "val": n})),
        (0i64..5, 0i64..5).prop_map(|(v, n)| json!({"op": "replace", "val": v, "new": n})),
        Just(json!({"op": "read-lock", "by": "s1"})),
        Just(json!({"op": "read-unlock", "by": "s1"})),
        (1u64..5).prop_map(|ttl| json!({"op": "set", "new": true, "ttl": ttl})),
        Just(json!({"op": "observe"})),
    ]
}

fn request() -> impl Strategy<Value = Json> {
    prop::collection::vec((prop::sample::select(PATHS), descriptor()), 1..4).prop_map(|ops| {
        let map: serde_json::Map<String, Json> =
            ops.into_iter().map(|(p, d)| (p.to_string(), d)).collect();
        Json::Object(map)
    })
}

/// A genesis log whose entries are one to three seconds apart.
fn log() -> impl Strategy<Value = Arc<LogSource>> {
    prop::collection::vec((request(), 1i64..3), 1..60).prop_map(|items| {
        let mut at = 0;
        let entries = items
            .into_iter()
            .enumerate()
            .map(|(i, (request, gap))| {
                at += gap * 1000;
                LogEntry::from_request(i as u64, request).with_timestamp(Timestamp::from_millis(at))
            })
            .collect();
        Arc::new(LogSource::new(entries, None).unwrap())
    })
}

fn fine_config() -> ReplayConfig {
    ReplayConfig {
        coarse_stride: 4,
        min_stride: 1,
        stride_divisor: 2,
        ..Default::default()
    }
}

/// Length of the longest common subsequence.
fn lcs(a: &[String], b: &[String]) -> usize {
    let mut table = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            table[i][j] = if a[i - 1] == b[j - 1] {
                table[i - 1][j - 1] + 1
            } else {
                table[i - 1][j].max(table[i][j - 1])
            };
        }
    }
    table[a.len()][b.len()]
}

fn lines() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "{", "}"]), 0..12)
        .prop_map(|v| v.into_iter().map(str::to_string).collect())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn prop_checkpoints_do_not_change_results(source in log()) {
        let last = source.last_index().unwrap();
        let plain = ReplayCoordinator::new(Arc::clone(&source), ReplayConfig::default());
        let dense = ReplayCoordinator::new(Arc::clone(&source), fine_config());

        let a = plain.state_at(last).unwrap();
        let b = dense.state_at(last).unwrap();
        prop_assert_eq!(a.digest().unwrap(), b.digest().unwrap());
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_warm_cache_matches_cold(source in log(), picks in (0usize..60, 0usize..60)) {
        let n = source.len();
        let (i, j) = (picks.0 % n, picks.1 % n);
        let (early, late) = (LogIndex(i.min(j) as u64), LogIndex(i.max(j) as u64));

        let cold = ReplayCoordinator::new(Arc::clone(&source), fine_config());
        let expected = cold.state_at(late).unwrap();

        let mut warm = ReplayCoordinator::new(Arc::clone(&source), fine_config());
        warm.update_index(early).unwrap();
        warm.update_index(late).unwrap();
        prop_assert_eq!(warm.current().unwrap(), &expected);

        // Going back and forth again is served from checkpoints.
        warm.update_index(early).unwrap();
        warm.update_index(late).unwrap();
        prop_assert_eq!(warm.current().unwrap(), &expected);
    }

    #[test]
    fn prop_requery_is_unchanged(source in log(), pick in 0usize..60) {
        let target = LogIndex((pick % source.len()) as u64);
        let mut coordinator = ReplayCoordinator::new(source, ReplayConfig::default());

        prop_assert_eq!(coordinator.update_index(target).unwrap(), UpdateStatus::Updated);
        let before = coordinator.current().unwrap().clone();
        prop_assert_eq!(coordinator.update_index(target).unwrap(), UpdateStatus::Unchanged);
        prop_assert_eq!(coordinator.current().unwrap(), &before);
    }

    #[test]
    fn prop_ttl_expires_after_deadline(ttl_ms in 1i64..10_000, gap_ms in 1i64..20_000) {
        let entries = vec![
            LogEntry::from_request(0, json!({"/lease": {"new": 1, "ttl": ttl_ms as f64 / 1000.0}}))
                .with_timestamp(Timestamp::from_millis(0)),
            LogEntry::from_request(1, json!({"/tick": 1}))
                .with_timestamp(Timestamp::from_millis(gap_ms)),
        ];
        let source = Arc::new(LogSource::new(entries, None).unwrap());
        let mut coordinator = ReplayCoordinator::new(source, ReplayConfig::default());
        coordinator.update_index(LogIndex(1)).unwrap();

        let present = coordinator.get("/lease").is_some();
        prop_assert_eq!(present, gap_ms <= ttl_ms);
    }

    #[test]
    fn prop_diff_patches_and_is_minimal(a in lines(), b in lines()) {
        let diff = diff_lines(&a, &b);
        prop_assert_eq!(patch(&a, &diff), Some(b.clone()));
        prop_assert_eq!(edit_cost(&diff), a.len() + b.len() - 2 * lcs(&a, &b));
    }

    #[test]
    fn prop_self_diff_is_equal(a in lines()) {
        let diff = diff_lines(&a, &a);
        prop_assert!(diff.iter().all(|line| matches!(line, DiffLine::Equal(_))));
        prop_assert_eq!(diff.len(), a.len());
    }
}
