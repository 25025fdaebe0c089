//! Conflict resolution between a local and a remote version of an entity.
//!
//! Resolution is a pure function: the time used to stamp merged payloads is
//! passed in, so the same inputs always produce the same decision.

use crate::entity::Payload;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Payload field carrying the last modification time.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

const UPDATED_AT_ALIASES: [&str; 2] = [UPDATED_AT_FIELD, "updated_at"];
const CREATED_AT_ALIASES: [&str; 2] = ["createdAt", "created_at"];

/// One side of a conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityVersion {
    /// Entity body.
    pub payload: Payload,
    /// Last modification time, if the payload carries one.
    pub updated_at: Option<DateTime<Utc>>,
    /// Creation time, if the payload carries one.
    pub created_at: Option<DateTime<Utc>>,
}

impl EntityVersion {
    /// Builds a version, reading its timestamps from the payload.
    ///
    /// Timestamps may be RFC 3339 strings or milliseconds since the epoch.
    pub fn from_payload(payload: Payload) -> Self {
        let updated_at = read_timestamp(&payload, &UPDATED_AT_ALIASES);
        let created_at = read_timestamp(&payload, &CREATED_AT_ALIASES);
        Self {
            payload,
            updated_at,
            created_at,
        }
    }

    /// Returns the time used to order versions. Missing sorts oldest.
    pub fn effective_time(&self) -> Option<DateTime<Utc>> {
        self.updated_at.or(self.created_at)
    }
}

fn read_timestamp(payload: &Payload, fields: &[&str]) -> Option<DateTime<Utc>> {
    fields
        .iter()
        .filter_map(|field| payload.get(*field))
        .find_map(parse_timestamp)
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

/// Which side survived a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictWinner {
    /// The local version was kept as is.
    Local,
    /// The remote version was kept.
    Server,
    /// Fields from both versions were combined.
    Merged,
}

/// Outcome of a resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictDecision {
    /// Surviving side.
    pub winner: ConflictWinner,
    /// Payload to keep.
    pub payload: Payload,
    /// Modification time of the surviving payload.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Caller-supplied decision function for [`ConflictStrategy::Manual`].
pub type ManualResolver =
    Arc<dyn Fn(&EntityVersion, &EntityVersion) -> ConflictDecision + Send + Sync>;

/// Strategy for choosing the surviving version.
#[derive(Clone, Default)]
pub enum ConflictStrategy {
    /// Always keep the local version.
    PreferLocal,
    /// Always keep the remote version.
    PreferServer,
    /// Keep the newer version; ties favor local.
    #[default]
    MostRecentWins,
    /// Delegate to a decision function, or fall back to most-recent-wins.
    Manual(Option<ManualResolver>),
}

impl ConflictStrategy {
    /// Returns the strategy name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ConflictStrategy::PreferLocal => "prefer_local",
            ConflictStrategy::PreferServer => "prefer_server",
            ConflictStrategy::MostRecentWins => "most_recent_wins",
            ConflictStrategy::Manual(_) => "manual",
        }
    }
}

impl fmt::Debug for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictStrategy::Manual(resolver) => f
                .debug_tuple("Manual")
                .field(&resolver.as_ref().map(|_| "fn"))
                .finish(),
            other => f.write_str(other.name()),
        }
    }
}

/// Chooses the surviving version of an entity.
///
/// Under most-recent-wins the newer side's fields are overlaid on the older
/// side's, so fields present only on the older side survive, and the result
/// is stamped with `resolved_at`.
pub fn resolve(
    local: &EntityVersion,
    remote: &EntityVersion,
    strategy: &ConflictStrategy,
    resolved_at: DateTime<Utc>,
) -> ConflictDecision {
    match strategy {
        ConflictStrategy::PreferLocal => ConflictDecision {
            winner: ConflictWinner::Local,
            payload: local.payload.clone(),
            updated_at: local.effective_time(),
        },
        ConflictStrategy::PreferServer => ConflictDecision {
            winner: ConflictWinner::Server,
            payload: remote.payload.clone(),
            updated_at: remote.effective_time(),
        },
        ConflictStrategy::MostRecentWins | ConflictStrategy::Manual(None) => {
            most_recent_wins(local, remote, resolved_at)
        }
        ConflictStrategy::Manual(Some(decide)) => decide(local, remote),
    }
}

fn most_recent_wins(
    local: &EntityVersion,
    remote: &EntityVersion,
    resolved_at: DateTime<Utc>,
) -> ConflictDecision {
    // Option orders None first, so a missing timestamp loses
    let local_newer = local.effective_time() >= remote.effective_time();

    let (base, overlay, winner) = if local_newer {
        (&remote.payload, &local.payload, ConflictWinner::Merged)
    } else {
        (&local.payload, &remote.payload, ConflictWinner::Server)
    };

    let mut payload = base.clone();
    for (field, value) in overlay {
        payload.insert(field.clone(), value.clone());
    }
    payload.insert(
        UPDATED_AT_FIELD.to_string(),
        Value::String(resolved_at.to_rfc3339()),
    );

    ConflictDecision {
        winner,
        payload,
        updated_at: Some(resolved_at),
    }
}
