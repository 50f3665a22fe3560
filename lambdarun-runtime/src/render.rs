//! Textual output contract
//!
//! Everything here writes to a caller-supplied sink. The wording and layout
//! are stable; scripts parse them.

use crate::invocation::InvocationOutcome;
use crate::sampler::ResourceSample;
use crate::stats::{billing_bucket, StreamSummary};
use serde_json::Value;
use std::io::{self, Write};

/// Characters of a stream record echoed in verbose mode
pub const PREVIEW_CHARS: usize = 65;

const SIZE_UNITS: [(i64, &str); 6] = [
    (1 << 50, "P"),
    (1 << 40, "T"),
    (1 << 30, "G"),
    (1 << 20, "M"),
    (1 << 10, "K"),
    (1, "B"),
];

/// Human-readable byte count in binary units, truncated (`1536` -> `1K`)
pub fn format_size(bytes: i64) -> String {
    let (factor, suffix) = SIZE_UNITS
        .iter()
        .copied()
        .find(|&(factor, _)| bytes >= factor)
        .unwrap_or((1, "B"));
    format!("{}{}", bytes / factor, suffix)
}

/// Strings print bare, everything else as compact JSON
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Trimmed record text, cut to [`PREVIEW_CHARS`] with `...` when longer
pub fn preview(line: &str) -> String {
    let line = line.trim_end();
    if line.chars().count() > PREVIEW_CHARS {
        let cut: String = line.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

/// Render one invocation, with the profiling block when verbose
pub fn render_result<W: Write + ?Sized>(
    out: &mut W,
    verbose: bool,
    handler_path: &str,
    outcome: &InvocationOutcome,
    sample: ResourceSample,
) -> io::Result<()> {
    if verbose {
        writeln!(out, "Executed {handler_path}")?;
        writeln!(out, "Estimated...")?;
        writeln!(
            out,
            "...execution clock time:\t\t {}ms ({}ms billing bucket)",
            sample.clock_ms as i64,
            billing_bucket(sample.clock_ms)
        )?;
        writeln!(
            out,
            "...execution peak RSS memory:\t\t {} ({} bytes)",
            format_size(sample.peak_rss_delta),
            sample.peak_rss_delta
        )?;
        writeln!(out, "----------------------RESULT----------------------")?;
    }
    writeln!(out, "{}", render_value(&outcome.result()))
}

/// Render the end-of-stream summary
pub fn render_summary<W: Write + ?Sized>(out: &mut W, summary: &StreamSummary) -> io::Result<()> {
    writeln!(out, "\nSummary profile from stream execution:")?;
    writeln!(out, "Samples: {}", summary.samples)?;
    if summary.sentinels_removed {
        writeln!(out, "(ERRORS DETECTED: Removing timing samples from aborted invocations.)")?;
        writeln!(out, "New sample size: {}", summary.valid_samples)?;
    }

    match &summary.clock {
        Some(clock) => {
            let std_dev = clock
                .rounded_std_dev()
                .map_or_else(|| "n/a".to_string(), |sd| sd.to_string());
            writeln!(out, "Clock time:")?;
            writeln!(
                out,
                "\tMin: {}ms, Max: {}ms, Median: {}ms, Median Billing Bucket: {}ms, Rounded Standard Deviation: {}ms",
                clock.min as i64,
                clock.max as i64,
                clock.median as i64,
                clock.median_billing_bucket,
                std_dev
            )?;
        }
        None => writeln!(out, "No valid timing samples!")?,
    }

    if let Some(rss) = &summary.rss {
        writeln!(out, "Peak resident set size (memory):")?;
        writeln!(out, "\tMin: {}, Max: {}", format_size(rss.min), format_size(rss.max))?;
    }
    Ok(())
}
