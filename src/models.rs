//! Core Data Models
//!
//! This module defines the primary data structures shared by every stage of
//! the usage pipeline, from normalized entries to the identity keys used for
//! deduplication.
//!
//! ## Data Flow
//!
//! 1. **Provenance**: [`SourceInfo`] - where a batch of raw records came from
//! 2. **Entries**: [`UsageEntry`] - one validated, immutable usage record
//! 3. **Identity**: [`EntryKey`] - composite key used to collapse duplicates
//!
//! ## Validated Identifiers
//!
//! [`ModelName`], [`SessionId`], [`RequestId`], [`MessageId`] and
//! [`ProjectName`] can only be built through `new`, which rejects empty or
//! whitespace-only values. Downstream code never re-checks them.

use crate::error::MalformedEntry;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::ops::{Add, AddAssign};
use std::path::PathBuf;
use std::sync::Arc;

macro_rules! validated_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap a raw identifier.
            pub fn new(value: impl Into<String>) -> Result<Self, MalformedEntry> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(MalformedEntry::invalid($field, "must be a non-empty string"));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

validated_id!(
    /// Model identifier as reported by the provider (e.g. `claude-sonnet-4-20250514`).
    ModelName,
    "message.model"
);
validated_id!(SessionId, "sessionId");
validated_id!(RequestId, "requestId");
validated_id!(MessageId, "message.id");
validated_id!(
    /// Project directory name under `projects/`.
    ProjectName,
    "project"
);

impl ModelName {
    /// Placeholder model emitted for locally generated messages.
    pub const SYNTHETIC: &'static str = "<synthetic>";

    pub fn is_synthetic(&self) -> bool {
        self.0 == Self::SYNTHETIC
    }
}

/// Token counts for one entry or a sum of entries. Sums saturate at
/// `u64::MAX` instead of wrapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl TokenCounts {
    pub fn new(input: u64, output: u64, cache_creation: u64, cache_read: u64) -> Self {
        Self {
            input_tokens: input,
            output_tokens: output,
            cache_creation_tokens: cache_creation,
            cache_read_tokens: cache_read,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_creation_tokens)
            .saturating_add(self.cache_read_tokens)
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }
}

impl Add for TokenCounts {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl AddAssign for TokenCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens = self.input_tokens.saturating_add(rhs.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(rhs.output_tokens);
        self.cache_creation_tokens = self.cache_creation_tokens.saturating_add(rhs.cache_creation_tokens);
        self.cache_read_tokens = self.cache_read_tokens.saturating_add(rhs.cache_read_tokens);
    }
}

/// A raw source (one JSONL file) as handed over by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub path: PathBuf,
    pub project: Option<ProjectName>,
    /// Session inferred from the file name; records may override it.
    pub session_id: Option<SessionId>,
}

impl SourceInfo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            project: None,
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_project(mut self, project: ProjectName) -> Self {
        self.project = Some(project);
        self
    }
}

/// Where an entry was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceProvenance {
    pub source: Arc<SourceInfo>,
    pub line: usize,
}

/// One normalized usage record. Constructed by the normalizer and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageEntry {
    pub timestamp: DateTime<Utc>,
    pub model: ModelName,
    pub session_id: SessionId,
    pub request_id: Option<RequestId>,
    pub message_id: Option<MessageId>,
    pub tokens: TokenCounts,
    /// Provider-reported cost. `None` means absent, which is distinct from
    /// a reported cost of zero.
    pub precomputed_cost: Option<Decimal>,
    pub provenance: SourceProvenance,
}

impl UsageEntry {
    /// Identity used for deduplication, if the entry carries a stable id.
    pub fn key(&self) -> Option<EntryKey> {
        match (&self.message_id, &self.request_id) {
            (Some(message_id), Some(request_id)) => Some(EntryKey::MessageRequest {
                message_id: message_id.clone(),
                request_id: request_id.clone(),
            }),
            (None, Some(request_id)) => Some(EntryKey::SessionRequest {
                session_id: self.session_id.clone(),
                request_id: request_id.clone(),
                timestamp: self.timestamp,
            }),
            (Some(message_id), None) => Some(EntryKey::SessionMessage {
                session_id: self.session_id.clone(),
                message_id: message_id.clone(),
                timestamp: self.timestamp,
            }),
            (None, None) => None,
        }
    }

    pub fn project(&self) -> Option<&ProjectName> {
        self.provenance.source.project.as_ref()
    }
}

/// Composite identity for a logical usage event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryKey {
    MessageRequest {
        message_id: MessageId,
        request_id: RequestId,
    },
    SessionRequest {
        session_id: SessionId,
        request_id: RequestId,
        timestamp: DateTime<Utc>,
    },
    SessionMessage {
        session_id: SessionId,
        message_id: MessageId,
        timestamp: DateTime<Utc>,
    },
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKey::MessageRequest {
                message_id,
                request_id,
            } => write!(f, "{}:{}", message_id, request_id),
            EntryKey::SessionRequest {
                session_id,
                request_id,
                timestamp,
            } => write!(f, "{}:{}@{}", session_id, request_id, timestamp.to_rfc3339()),
            EntryKey::SessionMessage {
                session_id,
                message_id,
                timestamp,
            } => write!(f, "{}:{}@{}", session_id, message_id, timestamp.to_rfc3339()),
        }
    }
}
