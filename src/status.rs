//! Typed game-status snapshot decoded from the push channel.
//!
//! The legacy backend encodes several numeric fields inconsistently: `score`
//! and `score_adjustment` arrive as decimal strings, `time_penalty` as a native
//! integer, and team ids as strings while the focus team id is an integer.
//! [`WireNumber`] and [`WireFlag`] keep the representation exactly as received
//! so re-encoding reproduces the original document; callers coerce with
//! [`WireNumber::as_i64`] and [`WireFlag::is_set`] where they need a value.

use std::fmt;

// ── Wire scalars ────────────────────────────────────────────────────

/// A numeric field as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireNumber {
    /// Encoded as a native `<integer>`.
    Integer(i64),
    /// Encoded as decimal text inside a `<string>`.
    Text(String),
}

impl WireNumber {
    /// Coerce to an integer.
    ///
    /// Text is trimmed and parsed as an integer first, then as a decimal
    /// (truncated toward zero). Returns `None` for text that is neither.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::Text(text) => {
                let text = text.trim();
                text.parse::<i64>().ok().or_else(|| {
                    text.parse::<f64>()
                        .ok()
                        .filter(|n| n.is_finite())
                        .map(|n| n.trunc() as i64)
                })
            }
        }
    }
}

impl From<i64> for WireNumber {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for WireNumber {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl fmt::Display for WireNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(n) => write!(f, "{n}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// A boolean field as it appeared on the wire.
///
/// `has_finished` is sent as the literal strings `"True"` / `"False"`, other
/// flags as native `<true/>` / `<false/>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFlag {
    /// Encoded as `<true/>` or `<false/>`.
    Boolean(bool),
    /// Encoded as a `<string>` literal.
    Text(String),
}

impl WireFlag {
    /// Coerce to a boolean. `"True"`, `"true"` and `"1"` are set; any other text is not.
    pub fn is_set(&self) -> bool {
        match self {
            Self::Boolean(b) => *b,
            Self::Text(text) => {
                let text = text.trim();
                text.eq_ignore_ascii_case("true") || text == "1"
            }
        }
    }
}

impl From<bool> for WireFlag {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for WireFlag {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

// ── Snapshot types ──────────────────────────────────────────────────

/// Reference to a treasure a team has found. Details come from the pull channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreasureRef {
    pub id: i64,
}

/// Per-team entry of a [`GameStatus`] snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamInfo {
    pub id: WireNumber,
    pub name: String,
    pub score: Option<WireNumber>,
    pub has_finished: Option<WireFlag>,
    pub found_treasures: Vec<TreasureRef>,
    /// Elapsed game time in seconds.
    pub game_duration: Option<WireNumber>,
    /// Start of play, milliseconds since the Unix epoch.
    pub start_time: Option<WireNumber>,
    pub score_adjustment: Option<WireNumber>,
    /// Accumulated time penalty in seconds.
    pub time_penalty: Option<WireNumber>,
    pub is_in_game: Option<bool>,
    /// `None` when the wire carries the literal `"None"`.
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    /// Opaque penalty records, carried through untouched.
    pub challenge_penalty: Vec<plist::Value>,
}

impl TeamInfo {
    /// Create a team entry with only an id and a name.
    pub fn new(id: impl Into<WireNumber>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            score: None,
            has_finished: None,
            found_treasures: Vec::new(),
            game_duration: None,
            start_time: None,
            score_adjustment: None,
            time_penalty: None,
            is_in_game: None,
            latitude: None,
            longitude: None,
            challenge_penalty: Vec::new(),
        }
    }

    /// Numeric team id, if the wire id parses.
    pub fn team_id(&self) -> Option<i64> {
        self.id.as_i64()
    }

    /// Score coerced to an integer; absent or unparsable scores count as zero.
    pub fn score_value(&self) -> i64 {
        self.score.as_ref().and_then(WireNumber::as_i64).unwrap_or(0)
    }

    /// Score adjustment coerced to an integer, zero when absent.
    pub fn score_adjustment_value(&self) -> i64 {
        self.score_adjustment
            .as_ref()
            .and_then(WireNumber::as_i64)
            .unwrap_or(0)
    }

    /// Whether the team has finished; absent means not finished.
    pub fn finished(&self) -> bool {
        self.has_finished.as_ref().is_some_and(WireFlag::is_set)
    }
}

/// One pushed snapshot of the whole game.
///
/// Snapshots are immutable and replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq)]
pub struct GameStatus {
    /// Backend status string, e.g. `"ONGOING"`.
    pub status_code: String,
    /// Team the snapshot was produced for, if any.
    pub focus_team_id: Option<WireNumber>,
    /// Team entries with unique ids.
    pub teams: Vec<TeamInfo>,
}

impl GameStatus {
    /// Build a snapshot, collapsing duplicate team ids so the last entry wins.
    pub fn new(
        status_code: impl Into<String>,
        focus_team_id: Option<WireNumber>,
        teams: Vec<TeamInfo>,
    ) -> Self {
        Self {
            status_code: status_code.into(),
            focus_team_id,
            teams: dedup_last_wins(teams),
        }
    }

    /// Look up a team by numeric id.
    pub fn team(&self, id: i64) -> Option<&TeamInfo> {
        self.teams.iter().find(|team| team.team_id() == Some(id))
    }

    /// The focus team's numeric id, if present and parsable.
    pub fn focus_team(&self) -> Option<i64> {
        self.focus_team_id.as_ref().and_then(WireNumber::as_i64)
    }
}

/// Keep the first position of each id but the contents of its last occurrence.
fn dedup_last_wins(teams: Vec<TeamInfo>) -> Vec<TeamInfo> {
    let mut out: Vec<TeamInfo> = Vec::with_capacity(teams.len());
    for team in teams {
        let key = team.id.to_string();
        match out.iter_mut().find(|existing| existing.id.to_string() == key) {
            Some(existing) => {
                tracing::debug!(team_id = %key, "duplicate team id in snapshot, keeping last");
                *existing = team;
            }
            None => out.push(team),
        }
    }
    out
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn wire_number_coerces_text_and_integers() {
        assert_eq!(WireNumber::from("3").as_i64(), Some(3));
        assert_eq!(WireNumber::from(" -12 ").as_i64(), Some(-12));
        assert_eq!(WireNumber::from("7.9").as_i64(), Some(7));
        assert_eq!(WireNumber::from(42).as_i64(), Some(42));
        assert_eq!(WireNumber::from("None").as_i64(), None);
        assert_eq!(WireNumber::from("").as_i64(), None);
    }

    #[test]
    fn wire_number_display_preserves_wire_text() {
        assert_eq!(WireNumber::from("0003").to_string(), "0003");
        assert_eq!(WireNumber::from(5).to_string(), "5");
    }

    #[test]
    fn wire_flag_literals() {
        assert!(WireFlag::from("True").is_set());
        assert!(WireFlag::from("true").is_set());
        assert!(WireFlag::from("1").is_set());
        assert!(!WireFlag::from("False").is_set());
        assert!(!WireFlag::from("yes please").is_set());
        assert!(WireFlag::from(true).is_set());
        assert!(!WireFlag::from(false).is_set());
    }

    #[test]
    fn team_defaults_when_fields_absent() {
        let team = TeamInfo::new("9", "Blue");
        assert_eq!(team.team_id(), Some(9));
        assert_eq!(team.score_value(), 0);
        assert_eq!(team.score_adjustment_value(), 0);
        assert!(!team.finished());
    }

    #[test]
    fn duplicate_team_ids_last_wins() {
        let mut first = TeamInfo::new("1", "Old");
        first.score = Some("1".into());
        let second = TeamInfo::new("2", "Other");
        let mut third = TeamInfo::new("1", "New");
        third.score = Some("8".into());

        let status = GameStatus::new("ONGOING", None, vec![first, second, third]);
        assert_eq!(status.teams.len(), 2);
        assert_eq!(status.teams[0].name, "New");
        assert_eq!(status.teams[0].score_value(), 8);
        assert_eq!(status.teams[1].name, "Other");
    }

    #[test]
    fn lookup_by_numeric_id() {
        let status = GameStatus::new(
            "ONGOING",
            Some(WireNumber::from(2)),
            vec![TeamInfo::new("1", "A"), TeamInfo::new("2", "B")],
        );
        assert_eq!(status.team(2).map(|t| t.name.as_str()), Some("B"));
        assert!(status.team(3).is_none());
        assert_eq!(status.focus_team(), Some(2));
    }
}
