//! Step expansion.
//!
//! Each function maps one step plus the current store contents to its child
//! steps. Expansion never drains its own children, so the same functions back
//! both the in-process runner and the queue-driven one.

use std::cmp::Ordering;

use tablescan_model::{
    TableRow, compare_keys, key_max, key_min, prefix_upper_bound,
};
use tracing::{debug, trace};

use super::step::{ScanStep, StepKind};
use crate::error::{Result, ScanError};
use crate::store::{MAX_TAKE_COUNT, TableFilter, TablePage, TableQuery};

/// Expand any step. Terminal steps have no children.
pub async fn expand(step: &ScanStep) -> Result<Vec<ScanStep>> {
    match &step.kind {
        StepKind::Start { .. } => expand_start(step),
        StepKind::PartitionKeyQuery { .. } => {
            expand_partition_key_query(step).await
        }
        StepKind::PrefixQuery { .. } => expand_prefix_query(step).await,
        StepKind::EntitySegment { .. } => Ok(Vec::new()),
    }
}

/// Split a scan root into its equality query and its range query.
///
/// The range query's lower bound is exclusive, so a partition key equal to
/// the prefix is only reachable through the equality query.
pub fn expand_start(step: &ScanStep) -> Result<Vec<ScanStep>> {
    let StepKind::Start {
        prefix,
        lower_bound,
        upper_bound,
    } = &step.kind
    else {
        return Err(wrong_kind("start", &step.kind));
    };

    let mut children = Vec::with_capacity(2);

    let above_lower = lower_bound
        .as_deref()
        .is_none_or(|lb| compare_keys(prefix, lb) == Ordering::Greater);
    let below_upper = upper_bound
        .as_deref()
        .is_none_or(|ub| compare_keys(prefix, ub) == Ordering::Less);

    if step.parameters.expand_partition_keys() && above_lower && below_upper {
        children.push(step.child(StepKind::PartitionKeyQuery {
            partition_key: prefix.clone(),
            row_key_skip: None,
        }));
    }

    let prefix_end = prefix_upper_bound(prefix);
    let lower = match lower_bound {
        Some(lb) => key_max(prefix, lb),
        None => prefix.as_str(),
    };
    let upper = match upper_bound {
        Some(ub) => key_min(&prefix_end, ub),
        None => prefix_end.as_str(),
    };

    children.push(step.child(StepKind::PrefixQuery {
        prefix: prefix.clone(),
        lower_bound: lower.to_string(),
        upper_bound: upper.to_string(),
    }));

    Ok(children)
}

/// Page through one partition key, one segment per non-empty page.
pub async fn expand_partition_key_query(
    step: &ScanStep,
) -> Result<Vec<ScanStep>> {
    let StepKind::PartitionKeyQuery {
        partition_key,
        row_key_skip,
    } = &step.kind
    else {
        return Err(wrong_kind("partition key query", &step.kind));
    };

    let query = TableQuery::new(
        TableFilter::PartitionKeyEquals {
            partition_key: partition_key.clone(),
            row_key_after: row_key_skip.clone(),
        },
        MAX_TAKE_COUNT,
    )
    .with_select(step.parameters.select().map(<[String]>::to_vec));

    let table = step.parameters.table();
    let mut children = Vec::new();
    let mut token = None;

    loop {
        let TablePage { rows, continuation } =
            table.query(&query, token.as_ref()).await?;

        for row in &rows {
            check_partition_key_row(
                row,
                partition_key,
                row_key_skip.as_deref(),
            )?;
        }

        if !rows.is_empty() {
            children.push(step.child(StepKind::EntitySegment { rows }));
        }

        match continuation {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    debug!(
        table = table.name(),
        partition_key = %partition_key,
        segments = children.len(),
        "expanded partition key query"
    );

    Ok(children)
}

/// Discover partition keys under a prefix.
///
/// Each batch of pages becomes a terminal segment. When the store has more
/// rows after a batch, the partition key that may straddle the page boundary
/// gets its own equality query and everything under the next one-character
/// longer prefix is delegated to a child range query; this step then resumes
/// past that prefix.
pub async fn expand_prefix_query(step: &ScanStep) -> Result<Vec<ScanStep>> {
    let StepKind::PrefixQuery {
        prefix,
        lower_bound,
        upper_bound,
    } = &step.kind
    else {
        return Err(wrong_kind("prefix query", &step.kind));
    };

    let params = &step.parameters;
    let table = params.table();
    let select = params.select().map(<[String]>::to_vec);

    let mut children = Vec::new();
    let mut lower = lower_bound.clone();
    let mut segments_wanted = params.segments_per_first_prefix();

    loop {
        let query = TableQuery::new(
            TableFilter::PartitionKeyRange {
                lower_exclusive: lower.clone(),
                upper_exclusive: upper_bound.clone(),
            },
            params.take_count(),
        )
        .with_select(select.clone());

        let mut batch: Vec<TableRow> = Vec::new();
        let mut segments = 0;
        let mut token = None;

        loop {
            let page = table.query(&query, token.as_ref()).await?;
            if !page.rows.is_empty() {
                for row in &page.rows {
                    check_range_row(row, prefix, &lower, upper_bound)?;
                }
                batch.extend(page.rows);
                segments += 1;
            } else if page.continuation.is_some() {
                trace!(
                    table = table.name(),
                    prefix = %prefix,
                    "empty page with continuation token"
                );
            }
            token = page.continuation;
            if segments >= segments_wanted || token.is_none() {
                break;
            }
        }
        segments_wanted = params.segments_per_subsequent_prefix();

        let Some(last) = batch.last() else {
            break;
        };
        let last_pk = last.partition_key.clone();
        let last_rk = last.row_key.clone();

        children.push(step.child(StepKind::EntitySegment { rows: batch }));

        if token.is_none() {
            break;
        }

        let next_prefix = increment_prefix(prefix, &last_pk)?;
        let next_end = prefix_upper_bound(&next_prefix);

        if params.expand_partition_keys() {
            children.push(step.child(StepKind::PartitionKeyQuery {
                partition_key: last_pk.clone(),
                row_key_skip: Some(last_rk),
            }));
        }

        children.push(step.child(StepKind::PrefixQuery {
            prefix: next_prefix.clone(),
            lower_bound: key_max(lower_bound, &last_pk).to_string(),
            upper_bound: key_min(upper_bound, &next_end).to_string(),
        }));

        lower = next_end;
    }

    debug!(
        table = table.name(),
        prefix = %prefix,
        depth = step.depth,
        children = children.len(),
        "expanded prefix query"
    );

    Ok(children)
}

/// `prefix` extended by the next character of `partition_key`.
///
/// A supplementary-plane character is kept whole so a surrogate pair is
/// never split.
pub fn increment_prefix(prefix: &str, partition_key: &str) -> Result<String> {
    let next = partition_key
        .strip_prefix(prefix)
        .and_then(|rest| rest.chars().next())
        .ok_or_else(|| {
            ScanError::UnexpectedResponse(format!(
                "partition key {partition_key:?} does not extend prefix {prefix:?}"
            ))
        })?;

    let mut incremented = String::with_capacity(prefix.len() + next.len_utf8());
    incremented.push_str(prefix);
    incremented.push(next);
    Ok(incremented)
}

fn check_range_row(
    row: &TableRow,
    prefix: &str,
    lower: &str,
    upper: &str,
) -> Result<()> {
    let pk = row.partition_key.as_str();
    let in_range = compare_keys(pk, lower) == Ordering::Greater
        && compare_keys(pk, upper) == Ordering::Less;
    if !in_range || !pk.starts_with(prefix) {
        return Err(ScanError::UnexpectedResponse(format!(
            "row {row} outside prefix {prefix:?} range ({lower:?}, {upper:?})"
        )));
    }
    Ok(())
}

fn check_partition_key_row(
    row: &TableRow,
    partition_key: &str,
    row_key_skip: Option<&str>,
) -> Result<()> {
    let skipped = row_key_skip.is_some_and(|skip| {
        compare_keys(&row.row_key, skip) != Ordering::Greater
    });
    if row.partition_key != partition_key || skipped {
        return Err(ScanError::UnexpectedResponse(format!(
            "row {row} does not match partition key {partition_key:?} after {row_key_skip:?}"
        )));
    }
    Ok(())
}

fn wrong_kind(expected: &str, actual: &StepKind) -> ScanError {
    ScanError::InvalidArgument(format!(
        "expected a {expected} step, got {}",
        actual.name()
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::prefix_scan::step::QueryParameters;
    use crate::store::{InMemoryTableStore, TableStore};

    fn params(
        rows: Vec<TableRow>,
        take: usize,
        expand: bool,
    ) -> Arc<QueryParameters> {
        let table: Arc<dyn TableStore> =
            Arc::new(InMemoryTableStore::from_rows("t", rows).unwrap());
        Arc::new(
            QueryParameters::new(table, None, take)
                .unwrap()
                .with_expand_partition_keys(expand),
        )
    }

    #[test]
    fn increment_keeps_surrogate_pairs_whole() {
        assert_eq!(increment_prefix("P", "PPA").unwrap(), "PP");
        assert_eq!(increment_prefix("", "\u{10437}x").unwrap(), "\u{10437}");
        assert_eq!(
            increment_prefix("P", "P\u{24B62}a").unwrap(),
            "P\u{24B62}"
        );
        assert!(matches!(
            increment_prefix("P", "P"),
            Err(ScanError::UnexpectedResponse(_))
        ));
        assert!(increment_prefix("P", "QA").is_err());
    }

    #[test]
    fn start_emits_equality_then_range() {
        let step = ScanStep::start(params(vec![], 10, true), "P", None, None);
        let children = expand_start(&step).unwrap();
        assert_eq!(
            children.iter().map(|c| c.kind.clone()).collect::<Vec<_>>(),
            vec![
                StepKind::PartitionKeyQuery {
                    partition_key: "P".into(),
                    row_key_skip: None,
                },
                StepKind::PrefixQuery {
                    prefix: "P".into(),
                    lower_bound: "P".into(),
                    upper_bound: "P\u{FFFF}".into(),
                },
            ]
        );
        assert!(children.iter().all(|c| c.depth == 1));
    }

    #[test]
    fn start_clamps_to_bounds() {
        let step = ScanStep::start(
            params(vec![], 10, true),
            "P",
            Some("PA".into()),
            Some("PN".into()),
        );
        let children = expand_start(&step).unwrap();
        assert_eq!(
            children.iter().map(|c| c.kind.clone()).collect::<Vec<_>>(),
            vec![StepKind::PrefixQuery {
                prefix: "P".into(),
                lower_bound: "PA".into(),
                upper_bound: "PN".into(),
            }]
        );

        let step = ScanStep::start(params(vec![], 10, false), "", None, None);
        let children = expand_start(&step).unwrap();
        assert_eq!(children.len(), 1);
        assert!(matches!(children[0].kind, StepKind::PrefixQuery { .. }));
    }

    #[tokio::test]
    async fn partition_key_query_pages_until_exhausted() {
        let rows = (0..2500)
            .map(|i| TableRow::new("PK", format!("R{i:05}")))
            .chain([TableRow::new("PKA", "R1")])
            .collect();
        let start = ScanStep::start(params(rows, 10, true), "PK", None, None);
        let step = start.child(StepKind::PartitionKeyQuery {
            partition_key: "PK".into(),
            row_key_skip: Some("R00099".into()),
        });

        let children = expand_partition_key_query(&step).await.unwrap();
        let sizes: Vec<usize> = children
            .iter()
            .map(|c| match &c.kind {
                StepKind::EntitySegment { rows } => rows.len(),
                other => panic!("unexpected child {other}"),
            })
            .collect();
        assert_eq!(sizes, vec![1000, 1000, 400]);
    }

    #[tokio::test]
    async fn prefix_query_delegates_straddling_keys() {
        let rows = vec![
            TableRow::new("PA", "R1"),
            TableRow::new("PB", "R1"),
            TableRow::new("PB", "R2"),
            TableRow::new("PC", "R1"),
        ];
        let start = ScanStep::start(params(rows, 2, true), "P", None, None);
        let step = start.child(StepKind::PrefixQuery {
            prefix: "P".into(),
            lower_bound: "P".into(),
            upper_bound: "P\u{FFFF}".into(),
        });

        let children = expand_prefix_query(&step).await.unwrap();
        let kinds: Vec<StepKind> =
            children.iter().map(|c| c.kind.clone()).collect();
        assert!(matches!(
            &kinds[0],
            StepKind::EntitySegment { rows } if rows.len() == 2
        ));
        assert_eq!(
            kinds[1],
            StepKind::PartitionKeyQuery {
                partition_key: "PB".into(),
                row_key_skip: Some("R1".into()),
            }
        );
        assert_eq!(
            kinds[2],
            StepKind::PrefixQuery {
                prefix: "PB".into(),
                lower_bound: "PB".into(),
                upper_bound: "PB\u{FFFF}".into(),
            }
        );
        assert!(matches!(
            &kinds[3],
            StepKind::EntitySegment { rows } if rows[0].partition_key == "PC"
        ));
        assert_eq!(kinds.len(), 4);
        assert!(children.iter().all(|c| c.depth == 2));
    }

    #[tokio::test]
    async fn prefix_query_on_empty_range_has_no_children() {
        let start = ScanStep::start(params(vec![], 1, true), "P", None, None);
        let step = start.child(StepKind::PrefixQuery {
            prefix: "P".into(),
            lower_bound: "P".into(),
            upper_bound: "P\u{FFFF}".into(),
        });
        assert!(expand_prefix_query(&step).await.unwrap().is_empty());
        assert!(expand(&start.child(StepKind::EntitySegment { rows: vec![] }))
            .await
            .unwrap()
            .is_empty());
    }
}
