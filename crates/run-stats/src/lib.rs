use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use routewatch_core_types::{Algorithm, ComparisonResult, NodeId, RunSummary, StatsKey};
use serde::Serialize;
use serde_json::to_writer_pretty;
use tracing::debug;

/// Summary plus the wall-clock time it was recorded.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecordedSummary {
    pub summary: RunSummary,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<StatsKey, RecordedSummary>,
    latest: Option<StatsKey>,
}

/// One summary per (algorithm, origin, destination) for the session.
///
/// Growth is unbounded; a session is short-lived compared to the memory a
/// handful of summaries takes.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    inner: Mutex<Inner>,
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    exported_at: DateTime<Utc>,
    runs: &'a [RecordedSummary],
    comparisons: &'a [ComparisonResult],
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `summary`, replacing any earlier run with the same key. Returns
    /// the replaced summary.
    pub fn record(&self, summary: RunSummary) -> Option<RunSummary> {
        let key = summary.key();
        debug!(
            target: "run-stats",
            algorithm = %key.algorithm,
            origin = %key.origin,
            destination = %key.destination,
            explored = summary.explored_count,
            "recording run summary"
        );
        let mut guard = self.inner.lock();
        guard.latest = Some(key);
        guard
            .entries
            .insert(
                key,
                RecordedSummary {
                    summary,
                    recorded_at: Utc::now(),
                },
            )
            .map(|previous| previous.summary)
    }

    pub fn get(&self, key: &StatsKey) -> Option<RunSummary> {
        self.inner
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.summary.clone())
    }

    /// Comparison for the exact endpoint pair, only when both algorithms ran on it.
    pub fn compare(&self, origin: NodeId, destination: NodeId) -> Option<ComparisonResult> {
        let guard = self.inner.lock();
        let lookup = |algorithm| {
            guard
                .entries
                .get(&StatsKey {
                    algorithm,
                    origin,
                    destination,
                })
                .map(|entry| entry.summary.clone())
        };
        let dijkstra = lookup(Algorithm::Dijkstra)?;
        let astar = lookup(Algorithm::AStar)?;
        Some(ComparisonResult {
            dijkstra,
            astar,
            origin,
            destination,
        })
    }

    /// Most recently recorded summary.
    pub fn latest(&self) -> Option<RunSummary> {
        let guard = self.inner.lock();
        let key = guard.latest?;
        guard.entries.get(&key).map(|entry| entry.summary.clone())
    }

    /// Comparison for the endpoint pair of the latest summary, if complete.
    pub fn latest_comparison(&self) -> Option<ComparisonResult> {
        let latest = self.latest()?;
        self.compare(latest.origin, latest.destination)
    }

    /// Every recorded summary, ordered by key.
    pub fn all(&self) -> Vec<RecordedSummary> {
        let guard = self.inner.lock();
        let mut entries: Vec<(StatsKey, RecordedSummary)> = guard
            .entries
            .iter()
            .map(|(key, entry)| (*key, entry.clone()))
            .collect();
        drop(guard);
        entries.sort_by(|a, b| {
            (a.0.origin, a.0.destination, a.0.algorithm)
                .cmp(&(b.0.origin, b.0.destination, b.0.algorithm))
        });
        entries.into_iter().map(|(_, entry)| entry).collect()
    }

    /// Every complete comparison currently derivable.
    pub fn comparisons(&self) -> Vec<ComparisonResult> {
        let mut pairs: Vec<(NodeId, NodeId)> = self
            .all()
            .iter()
            .map(|entry| (entry.summary.origin, entry.summary.destination))
            .collect();
        pairs.dedup();
        pairs
            .into_iter()
            .filter_map(|(origin, destination)| self.compare(origin, destination))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn export_json(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let runs = self.all();
        let comparisons = self.comparisons();
        let document = ExportDocument {
            exported_at: Utc::now(),
            runs: &runs,
            comparisons: &comparisons,
        };
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        to_writer_pretty(&mut writer, &document)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        writer.flush()?;
        Ok(())
    }
}
