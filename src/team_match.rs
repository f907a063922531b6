//! Locating "team N" in team-scoped scoreboard responses.
//!
//! The team endpoint has returned the requested team in several shapes over
//! time. Each shape is a pure extractor; they are tried in a fixed order and
//! the first structural match wins. If none match, the full scoreboard is
//! scanned. Anything unrecognised degrades to `None`, never an error.

use serde_json::{Map, Value};
use tracing::debug;

const TEAM_ID_KEY: &str = "game_team_id";

/// A team as normalised from a pull response.
#[derive(Debug, Clone, PartialEq)]
pub struct PulledTeam {
    /// Team id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Score as reported by the pull channel.
    pub score: i64,
    /// Whether the team has finished.
    pub has_finished: bool,
    /// Player records, passed through untouched.
    pub players: Vec<Value>,
}

/// Which rule produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamShape {
    /// `teams` is an array containing the team.
    TeamsArray,
    /// `teams` is the team object itself.
    TeamsObject,
    /// Team fields sit at the response root.
    Flattened,
    /// Team nested under a `team` key.
    Nested,
    /// Id-less team-like object; id synthesised from the request.
    Anonymous,
    /// Found by scanning the full scoreboard.
    ScoreboardScan,
}

type Extractor = fn(&Value, i64) -> Option<PulledTeam>;

/// Team-response extractors in priority order.
const EXTRACTORS: [(TeamShape, Extractor); 5] = [
    (TeamShape::TeamsArray, from_teams_array),
    (TeamShape::TeamsObject, from_teams_object),
    (TeamShape::Flattened, from_root),
    (TeamShape::Nested, from_nested),
    (TeamShape::Anonymous, from_anonymous),
];

/// Find `team_id` in the team-scoped response, falling back to the full
/// scoreboard.
///
/// ```
/// use scoreboard_sync::team_match::find_team;
/// use serde_json::json;
///
/// let response = json!({"teams": {"game_team_id": 7, "name": "Red", "score": 12}});
/// let (team, _) = find_team(Some(&response), None, 7).unwrap();
/// assert_eq!((team.id, team.name.as_str(), team.score), (7, "Red", 12));
/// ```
pub fn find_team(
    team_response: Option<&Value>,
    scoreboard: Option<&Value>,
    team_id: i64,
) -> Option<(PulledTeam, TeamShape)> {
    if let Some(response) = team_response {
        for (shape, extract) in EXTRACTORS {
            if let Some(team) = extract(response, team_id) {
                debug!(team_id, ?shape, "team matched in team response");
                return Some((team, shape));
            }
        }
    }

    let found = scoreboard
        .into_iter()
        .flat_map(scoreboard_teams)
        .find(|team| has_id(team, team_id))
        .and_then(|team| team.as_object())
        .map(|fields| normalise(fields, team_id));

    match found {
        Some(team) => {
            debug!(team_id, "team matched by scoreboard scan");
            Some((team, TeamShape::ScoreboardScan))
        }
        None => {
            debug!(team_id, "team not found in any response shape");
            None
        }
    }
}

/// Team entries of a scoreboard response: its `teams` array, or the
/// response itself if it is a bare array.
pub fn scoreboard_teams(scoreboard: &Value) -> &[Value] {
    match scoreboard {
        Value::Array(teams) => teams,
        other => other
            .get("teams")
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice),
    }
}

/// Normalise a scoreboard entry that carries its own id.
pub fn pulled_team(entry: &Value) -> Option<PulledTeam> {
    let fields = entry.as_object()?;
    let id = fields.get(TEAM_ID_KEY).and_then(as_i64)?;
    Some(normalise(fields, id))
}

fn from_teams_array(response: &Value, team_id: i64) -> Option<PulledTeam> {
    response
        .get("teams")?
        .as_array()?
        .iter()
        .find(|team| has_id(team, team_id))?
        .as_object()
        .map(|fields| normalise(fields, team_id))
}

fn from_teams_object(response: &Value, team_id: i64) -> Option<PulledTeam> {
    let team = response.get("teams")?;
    if !has_id(team, team_id) {
        return None;
    }
    team.as_object().map(|fields| normalise(fields, team_id))
}

fn from_root(response: &Value, team_id: i64) -> Option<PulledTeam> {
    if !has_id(response, team_id) {
        return None;
    }
    response.as_object().map(|fields| normalise(fields, team_id))
}

fn from_nested(response: &Value, team_id: i64) -> Option<PulledTeam> {
    let team = response.get("team")?;
    if !has_id(team, team_id) {
        return None;
    }
    team.as_object().map(|fields| normalise(fields, team_id))
}

fn from_anonymous(response: &Value, team_id: i64) -> Option<PulledTeam> {
    let fields = response.as_object()?;
    if fields.contains_key(TEAM_ID_KEY) {
        return None;
    }
    let named = fields.get("name").is_some_and(is_truthy);
    let scored = fields.get("score").is_some_and(|v| !v.is_null());
    if !named && !scored {
        return None;
    }
    Some(normalise(fields, team_id))
}

/// Build a [`PulledTeam`] with the fallbacks the older response shapes need.
fn normalise(fields: &Map<String, Value>, id: i64) -> PulledTeam {
    let name = ["name", "team_name"]
        .iter()
        .filter_map(|key| fields.get(*key).and_then(Value::as_str))
        .find(|name| !name.is_empty())
        .map_or_else(|| format!("Team {id}"), str::to_string);

    let score = ["score", "total_score"]
        .iter()
        .filter_map(|key| fields.get(*key).and_then(as_i64))
        .find(|score| *score != 0)
        .unwrap_or(0);

    let has_finished = ["has_finished", "finished"]
        .iter()
        .filter_map(|key| fields.get(*key))
        .any(is_truthy);

    let players = fields
        .get("players")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    PulledTeam {
        id,
        name,
        score,
        has_finished,
        players,
    }
}

fn has_id(candidate: &Value, team_id: i64) -> bool {
    candidate.get(TEAM_ID_KEY).and_then(as_i64) == Some(team_id)
}

/// Integer view of a JSON number or numeric string. Fractions truncate.
pub(crate) fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        _ => None,
    }
}

/// JSON truthiness: null, false, zero and empty strings are falsy.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

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
    use serde_json::json;

    fn find(response: Value, id: i64) -> Option<(PulledTeam, TeamShape)> {
        find_team(Some(&response), None, id)
    }

    #[test]
    fn teams_array_filters_by_id() {
        let (team, shape) = find(
            json!({"teams": [
                {"game_team_id": 1, "name": "Blue", "score": 4},
                {"game_team_id": 2, "name": "Green", "score": 9, "has_finished": true}
            ]}),
            2,
        )
        .unwrap();
        assert_eq!(shape, TeamShape::TeamsArray);
        assert_eq!(team.name, "Green");
        assert_eq!(team.score, 9);
        assert!(team.has_finished);
    }

    #[test]
    fn single_teams_object_must_match() {
        let (team, shape) = find(
            json!({"teams": {"game_team_id": 7, "name": "Red", "score": 12}}),
            7,
        )
        .unwrap();
        assert_eq!(shape, TeamShape::TeamsObject);
        assert_eq!(
            team,
            PulledTeam {
                id: 7,
                name: "Red".to_string(),
                score: 12,
                has_finished: false,
                players: vec![],
            }
        );

        assert!(find(json!({"teams": {"game_team_id": 8, "name": "Red"}}), 7).is_none());
    }

    #[test]
    fn flattened_root() {
        let (team, shape) = find(
            json!({"game_team_id": 3, "name": "Owls", "score": "41", "players": [{"name": "a"}]}),
            3,
        )
        .unwrap();
        assert_eq!(shape, TeamShape::Flattened);
        assert_eq!(team.score, 41);
        assert_eq!(team.players.len(), 1);
    }

    #[test]
    fn nested_under_team_key() {
        let (team, shape) = find(
            json!({"team": {"game_team_id": 5, "name": "Foxes", "score": 2}, "coupons": []}),
            5,
        )
        .unwrap();
        assert_eq!(shape, TeamShape::Nested);
        assert_eq!(team.name, "Foxes");
    }

    #[test]
    fn anonymous_object_synthesises_defaults() {
        // `team_name` alone does not identify a team.
        assert!(find(json!({"team_name": "Hawks", "total_score": 30}), 9).is_none());

        let (team, shape) = find(json!({"score": 0, "total_score": 30, "finished": true}), 9).unwrap();
        assert_eq!(shape, TeamShape::Anonymous);
        assert_eq!(team.id, 9);
        assert_eq!(team.name, "Team 9");
        assert_eq!(team.score, 30);
        assert!(team.has_finished);

        let (team, _) = find(json!({"name": "", "team_name": "Hawks", "score": 5}), 9).unwrap();
        assert_eq!(team.name, "Hawks");
    }

    #[test]
    fn shapes_are_tried_in_order() {
        // Both an array match and a nested match; the array wins.
        let (team, shape) = find(
            json!({
                "teams": [{"game_team_id": 4, "name": "FromArray"}],
                "team": {"game_team_id": 4, "name": "FromNested"}
            }),
            4,
        )
        .unwrap();
        assert_eq!(shape, TeamShape::TeamsArray);
        assert_eq!(team.name, "FromArray");
    }

    #[test]
    fn falls_back_to_scoreboard_scan() {
        let scoreboard = json!({"teams": [{"game_team_id": 6, "name": "Cats", "score": 1}]});
        let (team, shape) =
            find_team(Some(&json!({"unrelated": true})), Some(&scoreboard), 6).unwrap();
        assert_eq!(shape, TeamShape::ScoreboardScan);
        assert_eq!(team.name, "Cats");

        let bare = json!([{"game_team_id": 6, "name": "Dogs"}]);
        let (team, _) = find_team(None, Some(&bare), 6).unwrap();
        assert_eq!(team.name, "Dogs");
    }

    #[test]
    fn unrecognised_shapes_are_not_found() {
        assert!(find_team(Some(&json!("oops")), Some(&json!(42)), 1).is_none());
        assert!(find_team(Some(&json!({"teams": [1, 2, 3]})), None, 1).is_none());
        assert!(find_team(None, None, 1).is_none());
        // A root id that does not match is not an anonymous team either.
        assert!(find(json!({"game_team_id": 2, "name": "Other"}), 1).is_none());
    }

    #[test]
    fn numeric_strings_match_ids() {
        let (team, _) = find(json!({"teams": [{"game_team_id": "11", "name": "Str"}]}), 11).unwrap();
        assert_eq!(team.id, 11);
    }

    #[test]
    fn as_i64_accepts_wire_variants() {
        assert_eq!(as_i64(&json!(3)), Some(3));
        assert_eq!(as_i64(&json!(3.9)), Some(3));
        assert_eq!(as_i64(&json!(" 12 ")), Some(12));
        assert_eq!(as_i64(&json!("1.5")), Some(1));
        assert_eq!(as_i64(&json!("abc")), None);
        assert_eq!(as_i64(&json!(null)), None);
    }
}
