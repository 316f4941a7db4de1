//! JSONL source reading.
//!
//! A source is one append-only JSONL file. Each non-blank line is parsed as
//! an independent JSON value and handed to a [`JsonlProcessor`]. Lines that
//! are not valid JSON are skipped and logged with file and line number; one
//! bad line never aborts the source.

use crate::error::MalformedEntry;
use crate::models::{SourceInfo, SourceProvenance, UsageEntry};
use crate::normalizer::normalize;
use serde_json::Value;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::sync::Arc;
use tracing::{debug, warn};

const READ_BUFFER_SIZE: usize = 128 * 1024;

/// Trait for custom JSONL processing
pub trait JsonlProcessor {
    type Output;

    /// Called for every line that parsed as JSON.
    fn process_record(&mut self, record: Value, line_number: usize);

    /// Called for every line that could not be parsed as JSON.
    fn skip_line(&mut self, line_number: usize, error: &serde_json::Error);

    fn finalize(self, outcome: ReadOutcome) -> Self::Output;
}

/// How reading a source ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Complete,
    /// Reading stopped early on an IO error; what was read is kept.
    Partial,
    /// The source could not be opened at all.
    Unreadable,
}

/// Per-source line accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Non-blank lines seen.
    pub lines: usize,
    /// Valid JSON that is not a usage record.
    pub ignored: usize,
    /// Invalid JSON or failed normalization.
    pub malformed: usize,
}

impl std::ops::AddAssign for BatchStats {
    fn add_assign(&mut self, rhs: Self) {
        self.lines += rhs.lines;
        self.ignored += rhs.ignored;
        self.malformed += rhs.malformed;
    }
}

/// Normalized entries read from one source.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub source: Arc<SourceInfo>,
    pub entries: Vec<UsageEntry>,
    pub stats: BatchStats,
    pub outcome: ReadOutcome,
}

/// Processor that normalizes every record into a [`SourceBatch`].
pub struct NormalizingProcessor {
    source: Arc<SourceInfo>,
    entries: Vec<UsageEntry>,
    stats: BatchStats,
}

impl NormalizingProcessor {
    pub fn new(source: Arc<SourceInfo>) -> Self {
        Self {
            source,
            entries: Vec::new(),
            stats: BatchStats::default(),
        }
    }

    fn log_malformed(&self, line_number: usize, error: &MalformedEntry) {
        warn!(
            file = %self.source.path.display(),
            line = line_number,
            field = error.field,
            reason = %error.reason,
            "Skipping malformed usage entry"
        );
    }
}

impl JsonlProcessor for NormalizingProcessor {
    type Output = SourceBatch;

    fn process_record(&mut self, record: Value, line_number: usize) {
        self.stats.lines += 1;
        let provenance = SourceProvenance {
            source: Arc::clone(&self.source),
            line: line_number,
        };
        match normalize(&record, provenance) {
            Ok(Some(entry)) => self.entries.push(entry),
            Ok(None) => self.stats.ignored += 1,
            Err(error) => {
                self.stats.malformed += 1;
                self.log_malformed(line_number, &error);
            }
        }
    }

    fn skip_line(&mut self, line_number: usize, error: &serde_json::Error) {
        self.stats.lines += 1;
        self.stats.malformed += 1;
        warn!(
            file = %self.source.path.display(),
            line = line_number,
            error = %error,
            "Skipping line that is not valid JSON"
        );
    }

    fn finalize(self, outcome: ReadOutcome) -> SourceBatch {
        debug!(
            file = %self.source.path.display(),
            entries = self.entries.len(),
            ignored = self.stats.ignored,
            malformed = self.stats.malformed,
            "Finished reading source"
        );
        SourceBatch {
            source: self.source,
            entries: self.entries,
            stats: self.stats,
            outcome,
        }
    }
}

/// Processor that keeps raw JSON values with their line numbers.
#[derive(Default)]
pub struct RawCollector {
    records: Vec<(usize, Value)>,
    skipped: Vec<usize>,
}

impl JsonlProcessor for RawCollector {
    type Output = (Vec<(usize, Value)>, Vec<usize>);

    fn process_record(&mut self, record: Value, line_number: usize) {
        self.records.push((line_number, record));
    }

    fn skip_line(&mut self, line_number: usize, _error: &serde_json::Error) {
        self.skipped.push(line_number);
    }

    fn finalize(self, _outcome: ReadOutcome) -> Self::Output {
        (self.records, self.skipped)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FileParser;

impl FileParser {
    pub fn new() -> Self {
        Self
    }

    /// Read and normalize one source file. An unreadable file yields an
    /// empty batch instead of an error.
    pub fn parse_source(&self, source: SourceInfo) -> SourceBatch {
        let source = Arc::new(source);
        let processor = NormalizingProcessor::new(Arc::clone(&source));
        match File::open(&source.path) {
            Ok(file) => {
                let reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
                self.process_reader(reader, &source, processor)
            }
            Err(error) => {
                warn!(
                    file = %source.path.display(),
                    error = %error,
                    "Source is unreadable, treating it as empty"
                );
                processor.finalize(ReadOutcome::Unreadable)
            }
        }
    }

    /// Normalize JSONL from any reader, e.g. an in-memory fixture.
    pub fn parse_reader<R: BufRead>(&self, reader: R, source: SourceInfo) -> SourceBatch {
        let source = Arc::new(source);
        let processor = NormalizingProcessor::new(Arc::clone(&source));
        self.process_reader(reader, &source, processor)
    }

    // Generic method that accepts any processor
    pub fn process_reader<R: BufRead, P: JsonlProcessor>(
        &self,
        reader: R,
        source: &SourceInfo,
        mut processor: P,
    ) -> P::Output {
        let mut outcome = ReadOutcome::Complete;

        for (index, line) in reader.lines().enumerate() {
            let line_number = index + 1;
            let line = match line {
                Ok(line) => line,
                Err(error) if error.kind() == io::ErrorKind::InvalidData => {
                    warn!(
                        file = %source.path.display(),
                        line = line_number,
                        "Skipping line that is not valid UTF-8"
                    );
                    continue;
                }
                Err(error) => {
                    warn!(
                        file = %source.path.display(),
                        line = line_number,
                        error = %error,
                        "Read error, keeping the entries read so far"
                    );
                    outcome = ReadOutcome::Partial;
                    break;
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<Value>(trimmed) {
                Ok(record) => processor.process_record(record, line_number),
                Err(error) => processor.skip_line(line_number, &error),
            }
        }

        processor.finalize(outcome)
    }
}
