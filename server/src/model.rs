//! Entity model shared by both storage backends.
//!
//! The two tracked kinds (games and books) run through one state machine;
//! everything kind-specific lives in the static [`KindSpec`] table so the
//! business rules never branch on the kind itself.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Entity kinds tracked by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Game,
    Book,
}

impl Kind {
    pub const ALL: [Kind; 2] = [Kind::Game, Kind::Book];

    /// Stable identifier used in the database `kind` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Game => "game",
            Kind::Book => "book",
        }
    }

    pub fn spec(self) -> &'static KindSpec {
        match self {
            Kind::Game => &GAME_SPEC,
            Kind::Book => &BOOK_SPEC,
        }
    }
}

/// Per-kind configuration: which statuses exist, which one counts toward
/// the concurrency limit, and where the kind's data lives.
pub struct KindSpec {
    pub kind: Kind,
    /// The status that counts toward the concurrency limit. Also the
    /// default status at creation.
    pub counting: Status,
    pub allowed: &'static [Status],
    pub default_limit: u32,
    pub data_file: &'static str,
    pub limit_key: &'static str,
    pub next_id_key: &'static str,
}

static GAME_SPEC: KindSpec = KindSpec {
    kind: Kind::Game,
    counting: Status::Active,
    allowed: &[
        Status::Active,
        Status::Paused,
        Status::Casual,
        Status::Planned,
        Status::Finished,
        Status::Dropped,
    ],
    default_limit: 3,
    data_file: "games_data.json",
    limit_key: "game_active_limit",
    next_id_key: "game_next_id",
};

static BOOK_SPEC: KindSpec = KindSpec {
    kind: Kind::Book,
    counting: Status::Reading,
    allowed: &[
        Status::Reading,
        Status::Planned,
        Status::Finished,
        Status::Dropped,
    ],
    default_limit: 5,
    data_file: "books_data.json",
    limit_key: "book_active_limit",
    next_id_key: "book_next_id",
};

/// Entity status. The variant order drives the group order in list
/// responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Active,
    Reading,
    Paused,
    Casual,
    Planned,
    Finished,
    Dropped,
}

impl Status {
    /// Terminal statuses stamp `ended_at`; transitions out remain possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Finished | Status::Dropped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Reading => "reading",
            Status::Paused => "paused",
            Status::Casual => "casual",
            Status::Planned => "planned",
            Status::Finished => "finished",
            Status::Dropped => "dropped",
        }
    }

    pub fn parse(raw: &str) -> Option<Status> {
        match raw {
            "active" => Some(Status::Active),
            "reading" => Some(Status::Reading),
            "paused" => Some(Status::Paused),
            "casual" => Some(Status::Casual),
            "planned" => Some(Status::Planned),
            "finished" => Some(Status::Finished),
            "dropped" => Some(Status::Dropped),
            _ => None,
        }
    }
}

/// A tracked item (game or book).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub name: String,
    pub status: Status,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub reason: String,
    pub created_at: DateTime<Utc>,
    /// Stamped the first time the entity enters the counting status.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Non-null exactly while the status is terminal.
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Creation request. Status defaults to the kind's counting status.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewEntity {
    pub name: String,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub reason: String,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityPatch {
    pub name: Option<String>,
    pub status: Option<Status>,
    pub notes: Option<String>,
    pub rating: Option<u8>,
    pub reason: Option<String>,
}

/// Counting-status tally and the configured limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitStatus {
    pub count: u64,
    pub limit: u32,
}

/// Current time truncated to microseconds, so the fixed textual encoding
/// used by both backends round-trips losslessly.
pub fn now() -> DateTime<Utc> {
    let t = Utc::now();
    DateTime::from_timestamp_micros(t.timestamp_micros()).unwrap_or(t)
}

/// Fixed-width RFC 3339 encoding (`2024-01-02T03:04:05.000006Z`). Sorts
/// lexicographically in TEXT columns.
pub fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|t| t.with_timezone(&Utc))
}
