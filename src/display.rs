//! Output Formatting and Display Management
//!
//! Renders a [`UsageReport`] either as JSON (the report serialized as-is)
//! or as a coloured terminal summary. This is the only module that formats
//! text for humans; the pipeline itself returns structured data.
//!
//! ## Text Layout
//!
//! - A banner naming the granularity and cost mode
//! - One line per bucket: key, token totals, cost, models
//! - For blocks: status, burn rate, projection and token-limit usage
//! - A footer with skip and duplicate counts so partial input is visible
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use usage_ledger::display::DisplayManager;
//! # fn example(report: &usage_ledger::UsageReport) -> anyhow::Result<()> {
//! DisplayManager::new().print(report, true, true)?;
//! # Ok(())
//! # }
//! ```

use crate::aggregator::{AggregateBucket, Granularity};
use crate::analyzer::{BlockDetail, RunSummary, UsageReport};
use crate::blocks::BlockScope;
use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;
use std::io::{self, Write};

#[derive(Debug, Default, Clone, Copy)]
pub struct DisplayManager;

impl DisplayManager {
    pub fn new() -> Self {
        Self
    }

    /// Write the report to stdout.
    pub fn print(&self, report: &UsageReport, json_output: bool, pretty: bool) -> Result<()> {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if json_output {
            self.write_json(&mut out, report, pretty)
        } else {
            self.write_text(&mut out, report)
        }
    }

    pub fn write_json<W: Write>(&self, out: &mut W, report: &UsageReport, pretty: bool) -> Result<()> {
        let rendered = if pretty {
            serde_json::to_string_pretty(report)
        } else {
            serde_json::to_string(report)
        }
        .context("Failed to serialize report to JSON")?;
        writeln!(out, "{}", rendered)?;
        Ok(())
    }

    pub fn write_text<W: Write>(&self, out: &mut W, report: &UsageReport) -> Result<()> {
        writeln!(out, "\n{}", "=".repeat(80).bright_cyan())?;
        writeln!(
            out,
            "{}",
            format!(
                "Usage Report - {} (cost mode: {}, timezone: {})",
                title(report.granularity),
                report.cost_mode,
                report.timezone
            )
            .bright_white()
            .bold()
        )?;
        writeln!(out, "{}", "=".repeat(80).bright_cyan())?;

        if report.aggregate.buckets.is_empty() {
            writeln!(out, "\n{}", "No usage data found.".yellow())?;
        } else if report.granularity == Granularity::Block {
            if report.block_scope == Some(BlockScope::Session) {
                writeln!(out, "\n{}", "Blocks are tracked per session; several may be active.".dimmed())?;
            }
            for detail in &report.blocks {
                self.write_block(out, detail)?;
            }
        } else {
            writeln!(out)?;
            for bucket in &report.aggregate.buckets {
                self.write_bucket(out, bucket)?;
            }
        }

        let totals = &report.aggregate.totals;
        writeln!(
            out,
            "\n{} {} buckets • {} tokens • {} total",
            "📊".bright_yellow(),
            report.aggregate.buckets.len().to_string().bright_white().bold(),
            totals.total_tokens.to_string().bright_white().bold(),
            format!("${:.2}", totals.cost).bright_green().bold()
        )?;
        self.write_summary(out, &report.summary)?;
        Ok(())
    }

    fn write_bucket<W: Write>(&self, out: &mut W, bucket: &AggregateBucket) -> Result<()> {
        let totals = &bucket.totals;
        writeln!(
            out,
            "{} {} • {} ({} in / {} out / {} cache write / {} cache read)",
            "📅".bright_blue(),
            bucket.key.to_string().bright_white().bold(),
            format!("${:.2}", totals.cost).bright_green().bold(),
            totals.tokens.input_tokens,
            totals.tokens.output_tokens,
            totals.tokens.cache_creation_tokens,
            totals.tokens.cache_read_tokens
        )?;
        if !bucket.models_used.is_empty() {
            writeln!(out, "   {}", bucket.models_used.join(", ").bright_cyan())?;
        }
        Ok(())
    }

    fn write_block<W: Write>(&self, out: &mut W, detail: &BlockDetail) -> Result<()> {
        let block = &detail.block;
        let status = if block.is_active {
            "ACTIVE".bright_green().bold()
        } else {
            "ended".dimmed()
        };
        writeln!(
            out,
            "\n{} {} → {} [{}]",
            "⏱".bright_blue(),
            block.start.format("%Y-%m-%d %H:%M").to_string().bright_white().bold(),
            block.display_end.format("%H:%M"),
            status
        )?;
        writeln!(
            out,
            "   {} tokens • {} • {} entries",
            block.totals.total_tokens.to_string().bright_white(),
            format!("${:.2}", block.totals.cost).bright_green(),
            block.totals.entry_count
        )?;
        if let Some(rate) = &detail.burn_rate {
            writeln!(
                out,
                "   burn rate: {} ({:.0} tokens/min)",
                rate.to_string().yellow(),
                rate.tokens_per_minute
            )?;
        }
        if let Some(projection) = &detail.projection {
            writeln!(
                out,
                "   projected: {} tokens • {} ({} min remaining)",
                projection.projected_tokens,
                format!("${:.2}", projection.projected_cost).bright_yellow(),
                projection.remaining_minutes
            )?;
        }
        if let Some(limit) = &detail.token_limit {
            let percent = format!("{:.1}%", limit.percent_used);
            let percent = if limit.projected_exceeds {
                percent.bright_red().bold()
            } else {
                percent.bright_green()
            };
            writeln!(out, "   token limit: {} of {} ({})", limit.used, limit.limit, percent)?;
        }
        if !block.models.is_empty() {
            writeln!(out, "   {}", block.models.join(", ").bright_cyan())?;
        }
        Ok(())
    }

    fn write_summary<W: Write>(&self, out: &mut W, summary: &RunSummary) -> Result<()> {
        writeln!(
            out,
            "   {} entries from {} sources • {} duplicates removed",
            summary.entries, summary.load.sources, summary.duplicates_removed
        )?;
        let skipped = summary.load.malformed + summary.load.unreadable_sources;
        if skipped > 0 || summary.pricing_unavailable > 0 {
            writeln!(
                out,
                "   {} {} malformed lines • {} unreadable sources • {} entries without pricing",
                "⚠".bright_yellow(),
                summary.load.malformed,
                summary.load.unreadable_sources,
                summary.pricing_unavailable
            )?;
        }
        Ok(())
    }
}

fn title(granularity: Granularity) -> &'static str {
    match granularity {
        Granularity::Daily => "Daily",
        Granularity::Monthly => "Monthly",
        Granularity::Session => "By Session",
        Granularity::Block => "Session Blocks",
    }
}

/// Error body printed on stdout by `--json` runs.
pub fn json_error(error: &anyhow::Error) -> String {
    json!({ "error": format!("{:#}", error) }).to_string()
}
