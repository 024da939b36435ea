//! Step-by-step trace of a prefix scan, for diagnosing how a key space was
//! partitioned.

use std::{collections::VecDeque, io::Write, time::Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::expand::expand;
use super::step::{ScanStep, StepKind};
use crate::error::Result;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceOrder {
    /// Same order as the in-process scanner.
    #[default]
    DepthFirst,
    BreadthFirst,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub depth: u32,
    pub kind: String,
    pub step: String,
    /// Rows carried by a segment; zero for other steps.
    pub rows: usize,
    pub children: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: f64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StepTracer {
    order: TraceOrder,
}

impl StepTracer {
    pub fn new(order: TraceOrder) -> Self {
        Self { order }
    }

    /// Drain `start`, recording one entry per step including the root.
    pub async fn trace(&self, start: ScanStep) -> Result<Vec<TraceEntry>> {
        let mut pending: VecDeque<(Option<u64>, ScanStep)> = VecDeque::new();
        pending.push_back((None, start));

        let mut entries = Vec::new();
        let mut next_id = 0u64;

        while let Some((parent_id, step)) = match self.order {
            TraceOrder::DepthFirst => pending.pop_back(),
            TraceOrder::BreadthFirst => pending.pop_front(),
        } {
            let id = next_id;
            next_id += 1;

            let started_at = Utc::now();
            let clock = Instant::now();
            let children = expand(&step).await?;
            let elapsed_ms = clock.elapsed().as_secs_f64() * 1000.0;

            let rows = match &step.kind {
                StepKind::EntitySegment { rows } => rows.len(),
                _ => 0,
            };

            entries.push(TraceEntry {
                id,
                parent_id,
                depth: step.depth,
                kind: step.kind.name().to_string(),
                step: step.kind.to_string(),
                rows,
                children: children.len(),
                started_at,
                elapsed_ms,
            });

            match self.order {
                TraceOrder::DepthFirst => {
                    for child in children.into_iter().rev() {
                        pending.push_back((Some(id), child));
                    }
                }
                TraceOrder::BreadthFirst => {
                    for child in children {
                        pending.push_back((Some(id), child));
                    }
                }
            }
        }

        Ok(entries)
    }
}

/// Write entries as JSON lines.
pub fn write_json_lines<W: Write>(
    entries: &[TraceEntry],
    mut writer: W,
) -> Result<()> {
    for entry in entries {
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n").map_err(serde_json::Error::io)?;
    }
    writer.flush().map_err(serde_json::Error::io)?;
    Ok(())
}
