//! Observational record of each exchange. Nothing here is read back.

use crate::labels::LabelSet;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// One exchange: what the user said, what the character answered.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub user_text: String,
    pub assistant_text: String,
    /// Absent for the scripted opening exchange.
    pub friendliness_labels: Option<LabelSet>,
    pub response_latency: Option<Duration>,
}

/// Append-only sink for transcript entries.
pub trait TranscriptSink: Send {
    fn record(&mut self, entry: &TranscriptEntry) -> Result<()>;
}

#[derive(Serialize)]
struct CsvRow<'a> {
    user_text: &'a str,
    assistant_text: &'a str,
    friendliness_labels: Option<String>,
    response_seconds: Option<f64>,
}

/// Writes one CSV row per exchange and flushes after each.
pub struct CsvTranscript<W: Write> {
    writer: csv::Writer<W>,
}

impl CsvTranscript<File> {
    /// Creates (or truncates) the file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create transcript file {}", path.display()))?;
        Ok(Self::from_writer(file))
    }
}

impl<W: Write> CsvTranscript<W> {
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
        }
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush transcript: {}", e.error()))
    }
}

impl<W: Write + Send> TranscriptSink for CsvTranscript<W> {
    fn record(&mut self, entry: &TranscriptEntry) -> Result<()> {
        self.writer
            .serialize(CsvRow {
                user_text: &entry.user_text,
                assistant_text: &entry.assistant_text,
                friendliness_labels: entry.friendliness_labels.as_ref().map(LabelSet::joined),
                response_seconds: entry.response_latency.map(|d| d.as_secs_f64()),
            })
            .context("Failed to write transcript row")?;
        self.writer.flush().context("Failed to flush transcript")?;
        Ok(())
    }
}
