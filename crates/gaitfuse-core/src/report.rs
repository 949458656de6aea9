//! Plain-text result log and its summarizer.
//!
//! Every evaluation appends one block to the result file:
//!
//! ```text
//! Computing CMC and mAP
//! Results ----------
//! mAP: 61.3%
//! CMC curve
//! Rank-1  : 80.0%
//! Rank-5  : 92.5%
//! ------------------
//! ```
//!
//! [`summarize`] reads such a file back and averages each metric over all
//! recorded evaluations.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;
use crate::eval::RetrievalMetrics;

const SEPARATOR: &str = "------------------";

/// Result file handle.
pub struct ResultLog {
    path: PathBuf,
    file: File,
}

impl ResultLog {
    /// Create (or truncate) the result file. Used at the start of a run.
    pub fn create(path: &Path) -> Result<Self> {
        ensure_parent(path)?;
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Open the result file for appending, creating it if needed.
    pub fn open_append(path: &Path) -> Result<Self> {
        ensure_parent(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one evaluation block.
    pub fn append(&mut self, metrics: &RetrievalMetrics, ranks: &[usize]) -> Result<()> {
        let mut block = String::from("Computing CMC and mAP\nResults ----------\n");
        block.push_str(&format!("mAP: {:.1}%\nCMC curve\n", metrics.map * 100.0));
        for (rank, value) in metrics.at_ranks(ranks) {
            block.push_str(&format!("Rank-{:<3}: {:.1}%\n", rank, value * 100.0));
        }
        block.push_str(SEPARATOR);
        block.push('\n');

        self.file.write_all(block.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// One evaluation block read back from a result file, in percent.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedResult {
    pub map: f64,
    pub ranks: BTreeMap<usize, f64>,
}

/// Parse every evaluation block in a result file's text.
///
/// A `mAP:` line opens a block and the `Rank-N` lines that follow belong to
/// it. Lines that match neither are ignored.
pub fn parse_results(text: &str) -> Vec<RecordedResult> {
    let mut results: Vec<RecordedResult> = Vec::new();

    for line in text.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim();
        let Some(value) = parse_percent(value) else {
            continue;
        };

        if label == "mAP" {
            results.push(RecordedResult {
                map: value,
                ranks: BTreeMap::new(),
            });
        } else if let Some(rank) = label.strip_prefix("Rank-").and_then(|r| r.parse().ok()) {
            if let Some(current) = results.last_mut() {
                current.ranks.insert(rank, value);
            }
        }
    }
    results
}

fn parse_percent(value: &str) -> Option<f64> {
    value.trim().trim_end_matches('%').trim().parse().ok()
}

/// Averages over every evaluation in a result file, in percent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSummary {
    pub source: PathBuf,
    pub evaluations: usize,
    pub map: f64,
    /// Mean CMC value per rank, over the evaluations that reported that rank
    pub ranks: BTreeMap<usize, f64>,
}

impl ResultSummary {
    /// Average parsed results. Returns `None` when there is nothing to average.
    pub fn from_results(source: &Path, results: &[RecordedResult]) -> Option<Self> {
        if results.is_empty() {
            return None;
        }

        let map = results.iter().map(|r| r.map).sum::<f64>() / results.len() as f64;

        let mut totals: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
        for result in results {
            for (&rank, &value) in &result.ranks {
                let entry = totals.entry(rank).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }
        let ranks = totals
            .into_iter()
            .map(|(rank, (sum, count))| (rank, sum / count as f64))
            .collect();

        Some(Self {
            source: source.to_path_buf(),
            evaluations: results.len(),
            map,
            ranks,
        })
    }

    /// Summary block in the processed-results format.
    pub fn render(&self) -> String {
        let mut out = format!("{}\nmAP:{}\n", self.source.display(), self.map);
        for (rank, value) in &self.ranks {
            out.push_str(&format!("rank{}:{}\n", rank, value));
        }
        out
    }
}

/// Read a result file and average its evaluations.
pub fn summarize(path: &Path) -> Result<Option<ResultSummary>> {
    let text = std::fs::read_to_string(path)?;
    let results = parse_results(&text);
    tracing::debug!("Parsed {} evaluations from {:?}", results.len(), path);
    Ok(ResultSummary::from_results(path, &results))
}
