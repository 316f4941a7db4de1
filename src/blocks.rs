//! Session-Block Reconstructor
//!
//! Groups time-ordered, cost-resolved entries into billing windows
//! ("session blocks") with a single-pass state machine:
//!
//! 1. The first entry seeds a block. Its start is the entry timestamp
//!    floored to the hour and its nominal end is `start + duration`.
//! 2. Each following entry joins the open block when it falls before the
//!    block end and no more than `gap` after the previous entry. Otherwise
//!    the open block is emitted and the entry seeds a new one.
//! 3. A block closed by an idle gap ends at its last entry plus `gap`
//!    (never later than the nominal end). A new block never starts before
//!    the previous block's end, so windows do not overlap and starts are
//!    strictly increasing.
//! 4. The last block is active when the evaluation instant is before its
//!    end.
//!
//! Blocks are rebuilt from scratch on every run; nothing here is cached.

use crate::aggregator::UsageTotals;
use crate::cost::ResolvedUsage;
use crate::error::ReconstructionError;
use crate::models::SessionId;
use chrono::{DateTime, Duration, DurationRound, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

pub const DEFAULT_BLOCK_HOURS: i64 = 5;

/// Window length and idle-gap threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockConfig {
    pub duration: Duration,
    pub gap: Duration,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            duration: Duration::hours(DEFAULT_BLOCK_HOURS),
            gap: Duration::hours(DEFAULT_BLOCK_HOURS),
        }
    }
}

impl BlockConfig {
    pub fn new(duration: Duration, gap: Duration) -> Self {
        Self { duration, gap }
    }
}

/// What one call to [`reconstruct`] may contain. Under `Session` each
/// session has its own timeline, so several blocks can be active at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockScope {
    /// Entries must all share one session id.
    Session,
    /// Any mix of sessions on one timeline.
    #[default]
    Global,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBlock {
    pub id: String,
    pub start: DateTime<Utc>,
    /// `start + duration`, or last entry plus `gap` when an idle gap
    /// closed the block.
    pub end: DateTime<Utc>,
    /// Timestamp of the last member entry.
    pub actual_end: DateTime<Utc>,
    /// Nominal end, or the evaluation instant while active.
    pub display_end: DateTime<Utc>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub totals: UsageTotals,
    pub models: Vec<String>,
    #[serde(skip)]
    pub entries: Vec<ResolvedUsage>,
}

impl SessionBlock {
    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.first().map(|usage| usage.entry.timestamp)
    }
}

/// Floor to the top of the hour (14:37:22 -> 14:00:00).
pub fn floor_to_hour(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .duration_trunc(Duration::hours(1))
        .unwrap_or(timestamp)
}

fn offset(timestamp: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    timestamp
        .checked_add_signed(by)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

struct OpenBlock {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    last: DateTime<Utc>,
    entries: Vec<ResolvedUsage>,
}

impl OpenBlock {
    /// Open a block at `usage`, starting no earlier than `not_before`.
    fn seed(usage: ResolvedUsage, config: &BlockConfig, not_before: Option<DateTime<Utc>>) -> Self {
        let floored = floor_to_hour(usage.entry.timestamp);
        let start = not_before.map_or(floored, |previous_end| floored.max(previous_end));
        Self {
            start,
            end: offset(start, config.duration),
            last: usage.entry.timestamp,
            entries: vec![usage],
        }
    }

    fn accepts(&self, timestamp: DateTime<Utc>, config: &BlockConfig) -> bool {
        timestamp < self.end && timestamp - self.last <= config.gap
    }

    /// Cut the end short when `next` arrives after an idle gap.
    fn close_before(&mut self, next: DateTime<Utc>, config: &BlockConfig) {
        if next - self.last > config.gap {
            self.end = self.end.min(offset(self.last, config.gap));
        }
    }

    fn push(&mut self, usage: ResolvedUsage) {
        self.last = usage.entry.timestamp;
        self.entries.push(usage);
    }

    fn close(self, session_id: Option<&SessionId>) -> SessionBlock {
        let totals = UsageTotals::from_entries(&self.entries);
        let models: BTreeSet<String> = self
            .entries
            .iter()
            .filter(|usage| !usage.entry.model.is_synthetic())
            .map(|usage| usage.entry.model.to_string())
            .collect();
        let start_id = self.start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let id = match session_id {
            Some(session) => format!("{}@{}", session, start_id),
            None => start_id,
        };

        SessionBlock {
            id,
            start: self.start,
            end: self.end,
            actual_end: self.last,
            display_end: self.end,
            is_active: false,
            session_id: session_id.cloned(),
            totals,
            models: models.into_iter().collect(),
            entries: self.entries,
        }
    }
}

fn check_preconditions(entries: &[ResolvedUsage], scope: BlockScope) -> Result<(), ReconstructionError> {
    let Some(first) = entries.first() else {
        return Ok(());
    };

    for (index, pair) in entries.windows(2).enumerate() {
        let (previous, current) = (&pair[0].entry, &pair[1].entry);
        if current.timestamp < previous.timestamp {
            return Err(ReconstructionError::Unsorted {
                index: index + 1,
                previous: previous.timestamp,
                current: current.timestamp,
            });
        }
    }

    if scope == BlockScope::Session {
        let expected = &first.entry.session_id;
        if let Some((index, usage)) = entries
            .iter()
            .enumerate()
            .find(|(_, usage)| &usage.entry.session_id != expected)
        {
            return Err(ReconstructionError::MixedSessions {
                index,
                expected: expected.to_string(),
                found: usage.entry.session_id.to_string(),
            });
        }
    }

    Ok(())
}

/// Reconstruct blocks from entries sorted by timestamp ascending.
///
/// Entries with equal timestamps keep their input order. Fails only when
/// the input is unsorted, or mixes sessions under [`BlockScope::Session`].
pub fn reconstruct(
    entries: Vec<ResolvedUsage>,
    config: &BlockConfig,
    scope: BlockScope,
    now: DateTime<Utc>,
) -> Result<Vec<SessionBlock>, ReconstructionError> {
    check_preconditions(&entries, scope)?;

    let session_id = match scope {
        BlockScope::Session => entries.first().map(|usage| usage.entry.session_id.clone()),
        BlockScope::Global => None,
    };

    let mut blocks = Vec::new();
    let mut open: Option<OpenBlock> = None;

    for usage in entries {
        let timestamp = usage.entry.timestamp;
        open = match open.take() {
            Some(mut block) if block.accepts(timestamp, config) => {
                block.push(usage);
                Some(block)
            }
            Some(mut block) => {
                block.close_before(timestamp, config);
                let previous_end = block.end;
                blocks.push(block.close(session_id.as_ref()));
                Some(OpenBlock::seed(usage, config, Some(previous_end)))
            }
            None => Some(OpenBlock::seed(usage, config, None)),
        };
    }

    if let Some(block) = open {
        blocks.push(block.close(session_id.as_ref()));
    }

    if let Some(last) = blocks.last_mut() {
        if now < last.end {
            last.is_active = true;
            last.display_end = now.max(last.start);
        }
    }

    debug!(
        blocks = blocks.len(),
        active = blocks.iter().any(|block| block.is_active),
        "Reconstructed session blocks"
    );
    Ok(blocks)
}

/// Partition by session, reconstruct each session on its own, and return
/// all blocks ordered by start (then session id).
pub fn reconstruct_by_session(
    entries: Vec<ResolvedUsage>,
    config: &BlockConfig,
    now: DateTime<Utc>,
) -> Result<Vec<SessionBlock>, ReconstructionError> {
    let mut sessions: BTreeMap<SessionId, Vec<ResolvedUsage>> = BTreeMap::new();
    for usage in entries {
        sessions
            .entry(usage.entry.session_id.clone())
            .or_default()
            .push(usage);
    }

    let mut blocks = Vec::new();
    for (_, session_entries) in sessions {
        blocks.extend(reconstruct(session_entries, config, BlockScope::Session, now)?);
    }
    blocks.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.session_id.cmp(&b.session_id)));
    Ok(blocks)
}

/// Spend rate between a block's first and last entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnRate {
    pub tokens_per_minute: f64,
    pub cost_per_hour: Decimal,
}

impl BurnRate {
    /// `None` when the block spans no measurable time.
    pub fn for_block(block: &SessionBlock) -> Option<Self> {
        let first = block.first_timestamp()?;
        let seconds = (block.actual_end - first).num_seconds();
        if seconds <= 0 {
            return None;
        }

        let tokens_per_minute = block.totals.tokens.total() as f64 * 60.0 / seconds as f64;
        let cost_per_hour = block.totals.cost * Decimal::from(3600) / Decimal::from(seconds);
        Some(Self {
            tokens_per_minute,
            cost_per_hour,
        })
    }
}

impl fmt::Display for BurnRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.2}/hr", self.cost_per_hour)
    }
}

/// Linear extrapolation of an active block to its nominal end. Realized
/// figures are in the block totals; everything here is an estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockProjection {
    pub elapsed_minutes: i64,
    pub remaining_minutes: i64,
    pub projected_tokens: u64,
    pub projected_cost: Decimal,
}

impl BlockProjection {
    /// Project `block` as of `now`. `None` unless the block is active and
    /// some time has elapsed since its start.
    pub fn for_block(block: &SessionBlock, now: DateTime<Utc>) -> Option<Self> {
        if !block.is_active {
            return None;
        }
        let window = (block.end - block.start).num_seconds();
        let elapsed = (now - block.start).num_seconds().min(window);
        if elapsed <= 0 || window <= 0 {
            return None;
        }

        let tokens = block.totals.tokens.total() as u128;
        let projected_tokens = (tokens * window as u128 / elapsed as u128).min(u64::MAX as u128) as u64;
        let projected_cost = block.totals.cost * Decimal::from(window) / Decimal::from(elapsed);

        Some(Self {
            elapsed_minutes: elapsed / 60,
            remaining_minutes: (block.end - now).num_minutes().max(0),
            projected_tokens,
            projected_cost,
        })
    }
}

/// Uncovered time between consecutive block windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleGap {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub minutes: i64,
}

pub fn idle_gaps(blocks: &[SessionBlock]) -> Vec<IdleGap> {
    blocks
        .windows(2)
        .filter(|pair| pair[1].start > pair[0].end)
        .map(|pair| IdleGap {
            start: pair[0].end,
            end: pair[1].start,
            minutes: (pair[1].start - pair[0].end).num_minutes(),
        })
        .collect()
}

pub fn active_only(blocks: Vec<SessionBlock>) -> Vec<SessionBlock> {
    blocks.into_iter().filter(|block| block.is_active).collect()
}

/// Blocks started within `days` of `now`, plus any active block.
pub fn recent(blocks: Vec<SessionBlock>, now: DateTime<Utc>, days: i64) -> Vec<SessionBlock> {
    let cutoff = Duration::try_days(days)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    blocks
        .into_iter()
        .filter(|block| block.is_active || block.start >= cutoff)
        .collect()
}

/// Token budget per block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLimit {
    Fixed(u64),
    /// Largest token total among completed blocks.
    Max,
}

impl FromStr for TokenLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("max") {
            return Ok(TokenLimit::Max);
        }
        s.parse::<u64>()
            .map(TokenLimit::Fixed)
            .map_err(|_| format!("Invalid token limit: {s}. Use a number or 'max'"))
    }
}

impl TokenLimit {
    pub fn resolve(&self, blocks: &[SessionBlock]) -> Option<u64> {
        match self {
            TokenLimit::Fixed(limit) => Some(*limit),
            TokenLimit::Max => blocks
                .iter()
                .filter(|block| !block.is_active)
                .map(|block| block.totals.tokens.total())
                .max()
                .filter(|max| *max > 0),
        }
    }
}

/// Active block usage measured against a token limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenLimitStatus {
    pub limit: u64,
    pub used: u64,
    pub projected: Option<u64>,
    pub percent_used: f64,
    pub projected_exceeds: bool,
}

impl TokenLimitStatus {
    pub fn new(limit: u64, block: &SessionBlock, projection: Option<&BlockProjection>) -> Self {
        let used = block.totals.tokens.total();
        let projected = projection.map(|p| p.projected_tokens);
        let percent_used = if limit == 0 {
            0.0
        } else {
            used as f64 * 100.0 / limit as f64
        };
        Self {
            limit,
            used,
            projected,
            percent_used,
            projected_exceeds: projected.map_or(used > limit, |p| p > limit),
        }
    }
}
