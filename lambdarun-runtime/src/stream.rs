//! Line-delimited event streams
//!
//! Records are parsed and handed to the per-record callback one at a time,
//! in input order, with no overlap. A record that fails to parse aborts the
//! whole stream; a record whose invocation fails does not, because the
//! callback only ever sees outcomes, never handler failures.

use crate::render::preview;
use crate::sampler::ResourceSample;
use crate::stats::StatsAccumulator;
use lambdarun_core::{parse_event, ErrorKind, ParseError, SourceError};
use serde_json::Value;
use std::io::{self, BufRead, Write};
use thiserror::Error;
use tracing::{debug, error};

/// Line buffer capacity kept between records
const SCRATCH_CAPACITY: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("failed to write stream output: {0}")]
    Output(#[from] io::Error),
}

impl StreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Source(e) => e.kind(),
            Self::Parse(e) => e.kind(),
            Self::Output(_) => ErrorKind::OutputError,
        }
    }
}

/// Feeds stream records to a callback, sequentially
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamHarness {
    verbose: bool,
}

impl StreamHarness {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Invoke `on_record` once per line of `reader`, appending each returned
    /// sample to `stats`. Returns the number of records processed.
    pub fn run<R, W, F>(
        &self,
        mut reader: R,
        origin: &str,
        out: &mut W,
        stats: &mut StatsAccumulator,
        mut on_record: F,
    ) -> Result<usize, StreamError>
    where
        R: BufRead,
        W: Write + ?Sized,
        F: FnMut(&mut W, Value) -> io::Result<ResourceSample>,
    {
        if self.verbose {
            writeln!(out, "Entering stream mode.")?;
        }

        let mut line = String::with_capacity(SCRATCH_CAPACITY);
        let mut index = 0usize;
        loop {
            reclaim(&mut line);
            let read = reader.read_line(&mut line).map_err(|e| {
                let at = format!("{origin} line {}", index + 1);
                error!(line = index + 1, error = %e, "Unreadable stream record, aborting stream");
                SourceError::read(at, e)
            })?;
            if read == 0 {
                break;
            }
            index += 1;

            if self.verbose {
                writeln!(out, "\nObject {index} {}", preview(&line))?;
            }

            let event = parse_event(&line, &format!("{origin} line {index}")).map_err(|e| {
                error!(line = index, error = %e, "Malformed stream record, aborting stream");
                e
            })?;

            let sample = on_record(&mut *out, event)?;
            stats.append(sample);
            debug!(record = index, clock_ms = sample.clock_ms, "Stream record processed");
        }

        Ok(index)
    }
}

/// Drop the previous record before reading the next, returning oversized
/// buffers to the allocator so memory samples are less noisy.
fn reclaim(line: &mut String) {
    line.clear();
    if line.capacity() > SCRATCH_CAPACITY {
        line.shrink_to(SCRATCH_CAPACITY);
    }
}
