mod support;

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tablescan_core::prefix_scan::{StepKind, expand};
use tablescan_core::store::{InMemoryTableStore, TableStore};
use tablescan_core::{
    PrefixScanConfig, ScanError, TablePrefixScanner, TableRow,
};
use tablescan_model::compare_keys;

use support::{EmptyPageStore, FlakyStore, render, rows, sorted, table};

fn scanner() -> TablePrefixScanner {
    TablePrefixScanner::new(PrefixScanConfig::default())
}

fn format_segments(segments: &[Vec<TableRow>]) -> String {
    segments
        .iter()
        .map(|segment| {
            let keys: Vec<&str> =
                segment.iter().map(|r| r.partition_key.as_str()).collect();
            format!("[{}]", keys.join(", "))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn grouping_table() -> Arc<InMemoryTableStore> {
    let keys: Vec<String> = "ABCDEFGHIJKLMNOP"
        .chars()
        .enumerate()
        .map(|(i, c)| format!("{}{c}", if i < 8 { 'A' } else { 'B' }))
        .collect();
    table(
        "grouping",
        keys.iter().map(|pk| TableRow::new(pk.as_str(), "1")).collect(),
    )
}

#[tokio::test]
async fn groups_pages_into_segments() {
    let cases = [
        (
            1,
            1,
            1,
            "[AA] [AB] [AC] [AD] [AE] [AF] [AG] [AH] [BI] [BJ] [BK] [BL] [BM] [BN] [BO] [BP]",
        ),
        (
            1,
            2,
            1,
            "[AA, AB] [AC, AD] [AE] [AF] [AG] [AH] [BI] [BJ, BK] [BL] [BM] [BN] [BO] [BP]",
        ),
        (
            1,
            2,
            3,
            "[AA, AB] [AC, AD] [AE, AF, AG] [AH] [BI, BJ, BK] [BL, BM] [BN, BO, BP]",
        ),
        (
            1,
            3,
            2,
            "[AA, AB, AC] [AD, AE, AF] [AG, AH] [BI, BJ] [BK, BL, BM] [BN, BO] [BP]",
        ),
        (
            2,
            1,
            3,
            "[AA, AB] [AC, AD] [AE, AF, AG, AH] [BI, BJ, BK, BL, BM, BN] [BO, BP]",
        ),
        (
            2,
            3,
            1,
            "[AA, AB, AC, AD, AE, AF] [AG, AH] [BI, BJ] [BK, BL, BM, BN, BO, BP]",
        ),
        (
            3,
            1,
            2,
            "[AA, AB, AC] [AD, AE, AF] [AG, AH] [BI, BJ, BK, BL, BM, BN] [BO, BP]",
        ),
        (
            3,
            2,
            1,
            "[AA, AB, AC, AD, AE, AF] [AG, AH] [BI, BJ, BK] [BL, BM, BN, BO, BP]",
        ),
        (
            2,
            1,
            1,
            "[AA, AB] [AC, AD] [AE, AF] [AG, AH] [BI, BJ] [BK, BL] [BM, BN] [BO, BP]",
        ),
    ];

    let table = grouping_table();
    let scanner = scanner();
    for (take, first, subsequent, expected) in cases {
        let request = scanner
            .request("")
            .with_take_count(take)
            .with_segments_per_prefix(first, subsequent);
        let segments =
            scanner.list_segments(table.clone(), request).await.unwrap();
        assert_eq!(
            format_segments(&segments),
            expected,
            "take {take}, segments {first}/{subsequent}"
        );
    }
}

fn prefix_fixture() -> Vec<TableRow> {
    rows(&[
        ("AK1", "R1"),
        ("P", "R1"),
        ("PA", "R1"),
        ("PP", "R1"),
        ("PPA", "R1"),
        ("PPP", "R1"),
        ("PPP", "R2"),
        ("PPP", "R3"),
        ("PPPA", "R1"),
        ("PPPP", "R1"),
        ("PPPPP", "R1"),
        ("PPPPPP", "R1"),
        ("PPPPPPP", "R1"),
        ("PPPZ", "R1"),
        ("PPZ", "R1"),
        ("PZ", "R1"),
        ("ZK1", "R1"),
    ])
}

#[tokio::test]
async fn lists_exactly_the_rows_under_each_prefix() {
    let all = prefix_fixture();
    let table = table("prefixes", all.clone());
    let scanner = scanner();
    let expected_counts = [17, 15, 12, 9, 4, 3, 2, 1, 0, 0];

    for (length, expected_count) in expected_counts.into_iter().enumerate() {
        let prefix = "P".repeat(length);
        let expected = sorted(
            all.iter()
                .filter(|r| r.partition_key.starts_with(&prefix))
                .cloned()
                .collect(),
        );

        for take in [1, 2, 1000] {
            let request = scanner.request(prefix.as_str()).with_take_count(take);
            let actual =
                scanner.list_with(table.clone(), request).await.unwrap();
            assert_eq!(actual.len(), expected_count, "prefix {prefix:?} take {take}");
            assert_eq!(render(&actual), render(&expected), "prefix {prefix:?} take {take}");
        }
    }
}

fn surrogate_fixture(prefix: &str) -> Vec<TableRow> {
    let p = |suffix: &str| format!("{prefix}{suffix}");
    vec![
        TableRow::new(p("B"), "R1"),
        TableRow::new(p("C"), "R1"),
        TableRow::new(p("\u{10437}"), "R1"),
        TableRow::new(p("\u{10437}"), "R2"),
        TableRow::new(p("\u{10437}"), "R3"),
        TableRow::new(p("\u{24B62}a"), "R1"),
        TableRow::new(p("\u{24B62}b"), "R2"),
        TableRow::new(p("\u{24B62}c"), "R3"),
        TableRow::new(p("\u{24B63}"), "R1"),
        TableRow::new(p("\u{24B63}"), "R2"),
        TableRow::new(p("\u{24B63}"), "R3"),
    ]
}

#[tokio::test]
async fn never_splits_surrogate_pairs() {
    let scanner = scanner();
    for prefix in ["", "P"] {
        let all = surrogate_fixture(prefix);
        let table = table("surrogates", all.clone());
        let expected = sorted(all);

        for take in [1, 2, 1000] {
            let request = scanner.request(prefix).with_take_count(take);
            let actual =
                scanner.list_with(table.clone(), request).await.unwrap();
            assert_eq!(
                render(&actual),
                render(&expected),
                "prefix {prefix:?} take {take}"
            );
        }
    }
}

fn bounds_fixture() -> Vec<TableRow> {
    rows(&[
        ("", "R1"),
        ("AK1", "R1"),
        ("P", "R1"),
        ("PA", "R1"),
        ("PM", "R1"),
        ("PN", "R1"),
        ("PP", "R1"),
        ("PPA", "R1"),
        ("PPM", "R1"),
        ("PPN", "R1"),
        ("PPP", "R1"),
        ("PPP", "R2"),
        ("PPP", "R3"),
        ("PPPA", "R1"),
        ("PPPM", "R1"),
        ("PPPN", "R1"),
        ("PPPP", "R1"),
        ("PPPPP", "R1"),
        ("PPPPPP", "R1"),
        ("PPPPPPP", "R1"),
        ("PPPZ", "R1"),
        ("PPZ", "R1"),
        ("PZ", "R1"),
        ("ZK1", "R1"),
    ])
}

#[tokio::test]
async fn honors_partition_key_bounds() {
    let cases: [(&str, Option<&str>, Option<&str>, usize); 20] = [
        ("", Some("___"), Some("000"), 0),
        ("", Some("000"), Some("___"), 23),
        ("", Some("BB"), Some("CC"), 0),
        ("", None, Some("PPPP"), 16),
        ("A", Some("PPPP"), Some("ZZZZ"), 0),
        ("AK1", Some("-"), Some("_"), 1),
        ("AK1", Some("-"), Some("~"), 1),
        ("AK1", Some("-"), None, 1),
        ("AK1", None, Some("_"), 1),
        ("AK1", None, Some("~"), 1),
        ("P", Some("PA"), Some("PN"), 1),
        ("P", Some("PA"), Some("PPPP"), 12),
        ("P", Some("PPAAAAAAAAAA"), None, 15),
        ("P", None, Some("PPPP"), 14),
        ("PP", Some("A"), None, 16),
        ("PPP", Some("AAAA"), Some("ZZZZ"), 11),
        ("PPPP", Some("PPPP"), Some("PPPPPPP"), 2),
        ("PPPP", Some("PPPPA"), Some("PPPPPPP"), 2),
        ("PPPP", Some("PPPPP"), Some("PPPPPPP"), 1),
        ("PPPP", Some("PPPPPP"), Some("PPPPPPP"), 0),
    ];

    let all = bounds_fixture();
    let table = table("bounds", all.clone());
    let scanner = scanner();
    let takes: Vec<usize> = (1..=10).chain([1000]).collect();

    for (prefix, lower, upper, count) in cases {
        let expected = sorted(
            all.iter()
                .filter(|r| {
                    let pk = r.partition_key.as_str();
                    pk.starts_with(prefix)
                        && lower.is_none_or(|lb| pk > lb)
                        && upper.is_none_or(|ub| pk < ub)
                })
                .cloned()
                .collect(),
        );
        assert_eq!(expected.len(), count, "fixture {prefix:?} {lower:?} {upper:?}");

        for &take in &takes {
            let request = scanner
                .request(prefix)
                .with_bounds(lower.map(String::from), upper.map(String::from))
                .with_take_count(take);
            let actual =
                scanner.list_with(table.clone(), request).await.unwrap();
            assert_eq!(
                render(&actual),
                render(&expected),
                "prefix {prefix:?} lower {lower:?} upper {upper:?} take {take}"
            );
        }
    }
}

#[tokio::test]
async fn without_expansion_only_first_page_of_straddling_keys() {
    let mut all = Vec::new();
    for pk in 1..=8 {
        for rk in 1..=3 {
            all.push(TableRow::new(format!("P{pk}"), format!("R{rk}")));
        }
    }
    let all = sorted(all);
    let table = table("no-expand", all.clone());

    let expected: Vec<TableRow> = [0..4, 6..10, 12..16, 18..22]
        .into_iter()
        .flat_map(|range| all[range].to_vec())
        .collect();

    let scanner = scanner();
    let request = scanner
        .request("")
        .with_take_count(4)
        .with_expand_partition_keys(false);
    let actual = scanner.list_with(table, request).await.unwrap();

    assert_eq!(render(&actual), render(&expected));
    let partition_keys: HashSet<&str> =
        actual.iter().map(|r| r.partition_key.as_str()).collect();
    assert_eq!(partition_keys.len(), 8);
}

#[tokio::test]
async fn projection_keeps_selected_columns_and_keys() {
    let table = table(
        "projection",
        vec![
            TableRow::new("A", "1")
                .with_property("Size", 10)
                .with_property("Hash", "aa"),
            TableRow::new("AB", "1")
                .with_property("Size", 20)
                .with_property("Hash", "bb"),
        ],
    );

    let scanner = scanner();
    let request = scanner
        .request("A")
        .with_take_count(1)
        .with_select(Some(vec!["Size".into()]));
    let actual = scanner.list_with(table, request).await.unwrap();

    assert_eq!(render(&actual), vec!["A/1", "AB/1"]);
    for row in &actual {
        assert_eq!(row.properties.len(), 1);
        assert!(row.property("Size").is_some());
    }
    assert_eq!(actual[1].property("Size"), Some(&json!(20)));
}

#[tokio::test]
async fn loops_past_empty_pages_with_tokens() {
    let all = prefix_fixture();
    let inner = table("empty-pages", all.clone());
    let store: Arc<dyn TableStore> = Arc::new(EmptyPageStore { inner });

    let scanner = scanner();
    for take in [1, 3] {
        let request = scanner.request("").with_take_count(take);
        let actual = scanner.list_with(store.clone(), request).await.unwrap();
        assert_eq!(render(&actual), render(&sorted(all.clone())));
    }
}

#[tokio::test]
async fn store_errors_abort_without_partial_results() {
    let inner = table("flaky", prefix_fixture());
    let store: Arc<dyn TableStore> = Arc::new(FlakyStore::new(inner, 1));

    let scanner = scanner();
    let result = scanner.list(store.clone(), "P").await;
    assert!(matches!(result, Err(ScanError::Store(_))));

    let retried = scanner.list(store, "P").await.unwrap();
    assert_eq!(retried.len(), 15);
}

#[tokio::test]
async fn expansion_is_idempotent_and_bounds_are_monotonic() {
    let fixtures = [
        ("idempotent", "", prefix_fixture()),
        ("surrogates", "", surrogate_fixture("")),
        ("surrogates", "P", surrogate_fixture("P")),
    ];
    for (name, prefix, rows) in fixtures {
        let table: Arc<dyn TableStore> = table(name, rows);
        for take in [1, 2, 3] {
            walk_expansions(table.clone(), prefix, take).await;
        }
    }
}

async fn walk_expansions(table: Arc<dyn TableStore>, prefix: &str, take: usize) {
    let context = format!("table {} prefix {prefix:?} take {take}", table.name());
    let start = scanner()
        .request(prefix)
        .with_take_count(take)
        .into_start_step(table)
        .unwrap();

    let mut pending = vec![start];
    while let Some(step) = pending.pop() {
        let first = expand(&step).await.unwrap();
        let second = expand(&step).await.unwrap();
        let kinds = |steps: &[tablescan_core::prefix_scan::ScanStep]| {
            steps.iter().map(|s| s.kind.clone()).collect::<Vec<_>>()
        };
        assert_eq!(kinds(&first), kinds(&second), "{context}");

        for child in &first {
            assert_eq!(child.depth, step.depth + 1);
            if let (
                StepKind::PrefixQuery {
                    lower_bound: parent_lower,
                    upper_bound: parent_upper,
                    ..
                },
                StepKind::PrefixQuery {
                    prefix,
                    lower_bound,
                    upper_bound,
                },
            ) = (&step.kind, &child.kind)
            {
                assert_ne!(compare_keys(lower_bound, parent_lower), Ordering::Less, "{context}");
                assert_ne!(compare_keys(upper_bound, parent_upper), Ordering::Greater, "{context}");
                assert!(lower_bound.starts_with(prefix.as_str()) || lower_bound == parent_lower);
            }
            if let StepKind::EntitySegment { rows } = &child.kind
                && let StepKind::PrefixQuery { prefix, .. } = &step.kind
            {
                assert!(rows.iter().all(|r| r.partition_key.starts_with(prefix.as_str())));
            }
        }
        let child_lowers: Vec<&String> = first
            .iter()
            .filter_map(|c| match &c.kind {
                StepKind::PrefixQuery { lower_bound, .. } => Some(lower_bound),
                _ => None,
            })
            .collect();
        assert!(
            child_lowers
                .windows(2)
                .all(|w| compare_keys(w[0], w[1]) == Ordering::Less),
            "{context}: {child_lowers:?}"
        );

        pending.extend(first);
    }
}

#[tokio::test]
async fn anomalous_store_rows_are_rejected() {
    use async_trait::async_trait;
    use tablescan_core::store::{ContinuationToken, TablePage, TableQuery};

    #[derive(Debug)]
    struct WrongPrefixStore;

    #[async_trait]
    impl TableStore for WrongPrefixStore {
        fn name(&self) -> &str {
            "wrong"
        }

        async fn query(
            &self,
            _query: &TableQuery,
            _continuation: Option<&ContinuationToken>,
        ) -> tablescan_core::Result<TablePage> {
            Ok(TablePage {
                rows: vec![TableRow::new("ZZ", "1")],
                continuation: Some(ContinuationToken("x".into())),
            })
        }
    }

    let scanner = scanner();
    let request = scanner
        .request("P")
        .with_expand_partition_keys(false);
    let result = scanner.list_with(Arc::new(WrongPrefixStore), request).await;
    assert!(matches!(result, Err(ScanError::UnexpectedResponse(_))));
}
