//! The reconciled view a scoreboard renders from.
//!
//! [`ReconciledView`] is derived state: [`build`] recomputes it from scratch
//! out of the latest pushed snapshot and the last good value of every pull.
//! Pushed state is authoritative for score and finish status; pulls fill in
//! what the push channel never carries.

use std::cmp::Reverse;
use std::sync::Arc;

use serde_json::Value;

use crate::status::{GameStatus, TeamInfo, TreasureRef, WireFlag, WireNumber};
use crate::team_match::{self, as_i64, is_truthy, PulledTeam, TeamShape};

/// Keys the team response has used for earned coupons, in lookup order.
const COUPON_KEYS: [&str; 4] = ["coupons", "rewards", "earned_coupons", "team_coupons"];

/// Latest value of every input the view is built from.
#[derive(Debug, Clone, Default)]
pub struct Sources {
    /// Game metadata.
    pub game: Option<Value>,
    /// Aggregate observer data.
    pub observer: Option<Value>,
    /// Full scoreboard.
    pub scoreboard: Option<Value>,
    /// Team-scoped scoreboard.
    pub team_scoreboard: Option<Value>,
    /// Treasures found by the focus team.
    pub treasures_found: Option<Value>,
    /// Challenge pictures of the focus team.
    pub pictures: Option<Value>,
    /// Latest pushed snapshot.
    pub pushed: Option<Arc<GameStatus>>,
    /// The pulls that can locate the focus team have all answered, so a
    /// team no source knows is really missing rather than not loaded yet.
    pub lookup_settled: bool,
}

/// One row of the scoreboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreboardEntry {
    pub id: i64,
    pub name: String,
    pub score: i64,
    pub has_finished: bool,
}

impl From<PulledTeam> for ScoreboardEntry {
    fn from(team: PulledTeam) -> Self {
        Self {
            id: team.id,
            name: team.name,
            score: team.score,
            has_finished: team.has_finished,
        }
    }
}

/// The requested team with pushed and pulled fields merged.
#[derive(Debug, Clone, PartialEq)]
pub struct FocusTeamView {
    pub id: i64,
    pub name: String,
    pub score: i64,
    pub has_finished: bool,
    pub players: Vec<Value>,
    pub coupons: Vec<Value>,
    pub pictures: Vec<Value>,
    /// Observer treasure records whose `found_by` lists this team.
    pub team_treasures: Vec<Value>,
    /// Treasure references from the push channel.
    pub found_treasures: Vec<TreasureRef>,
    pub score_adjustment: i64,
    pub time_penalty_seconds: Option<i64>,
    pub game_duration_seconds: Option<i64>,
    pub start_time_millis: Option<i64>,
    /// Pull shape the team was matched in; `None` if only the push knows it.
    pub matched_shape: Option<TeamShape>,
}

/// Outcome of resolving the requested team.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FocusTeam {
    /// No team id was requested and the push named none.
    #[default]
    NotRequested,
    /// The team was located.
    Found(FocusTeamView),
    /// Not located yet; the pulls that could locate it are still in flight.
    Pending { team_id: i64 },
    /// No source knows the team.
    NotFound { team_id: i64 },
}

impl FocusTeam {
    /// The located team, if any.
    pub fn as_found(&self) -> Option<&FocusTeamView> {
        match self {
            Self::Found(team) => Some(team),
            _ => None,
        }
    }
}

/// A treasure found by the focus team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredTreasure {
    pub id: i64,
    pub name: String,
    /// Point score plus every challenge score earned there.
    pub score: i64,
    /// Discovery time as reported by the backend.
    pub found_at: Option<String>,
    /// `false` for treasures known only from a pushed reference.
    pub enriched: bool,
}

/// Everything a scoreboard renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciledView {
    /// Backend status string from the latest push.
    pub status_code: Option<String>,
    pub scoreboard: Vec<ScoreboardEntry>,
    pub focus_team: FocusTeam,
    pub discovered_treasures: Vec<DiscoveredTreasure>,
    pub discovered_score: i64,
    pub game_started: bool,
    pub game_finished: bool,
}

impl ReconciledView {
    /// Up to `limit` teams by descending score. Ties keep scoreboard order.
    pub fn top_teams(&self, limit: usize) -> Vec<&ScoreboardEntry> {
        let mut teams: Vec<&ScoreboardEntry> = self.scoreboard.iter().collect();
        teams.sort_by_key(|team| Reverse(team.score));
        teams.truncate(limit);
        teams
    }

    /// Scoreboard row for a team.
    pub fn team(&self, id: i64) -> Option<&ScoreboardEntry> {
        self.scoreboard.iter().find(|team| team.id == id)
    }

    /// Number of teams on the scoreboard.
    pub fn teams_count(&self) -> usize {
        self.scoreboard.len()
    }
}

/// Recompute the view.
///
/// The focus team is `requested_team`, or the pushed snapshot's focus team
/// when none was requested.
pub fn build(sources: &Sources, requested_team: Option<i64>) -> ReconciledView {
    let pushed = sources.pushed.as_deref();
    let focus_id = requested_team.or_else(|| pushed.and_then(GameStatus::focus_team));

    let focus_team = match focus_id {
        None => FocusTeam::NotRequested,
        Some(team_id) => resolve_focus(sources, team_id),
    };

    let discovered_treasures = discovered_treasures(
        sources.treasures_found.as_ref(),
        focus_team.as_found().map(|team| team.found_treasures.as_slice()),
    );
    let discovered_score = discovered_treasures.iter().map(|t| t.score).sum();

    ReconciledView {
        status_code: pushed.map(|status| status.status_code.clone()),
        scoreboard: merge_scoreboard(sources.scoreboard.as_ref(), pushed),
        focus_team,
        discovered_treasures,
        discovered_score,
        game_started: game_flag(sources, "is_started", is_truthy),
        game_finished: game_flag(sources, "finish_time", |v| !v.is_null()),
    }
}

fn merge_scoreboard(pulled: Option<&Value>, pushed: Option<&GameStatus>) -> Vec<ScoreboardEntry> {
    let mut entries: Vec<ScoreboardEntry> = pulled
        .map(team_match::scoreboard_teams)
        .unwrap_or_default()
        .iter()
        .filter_map(team_match::pulled_team)
        .map(ScoreboardEntry::from)
        .collect();

    for team in pushed.map(|status| status.teams.as_slice()).unwrap_or_default() {
        let Some(id) = team.team_id() else {
            continue;
        };
        match entries.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => {
                if let Some(score) = pushed_score(team) {
                    entry.score = score;
                }
                if let Some(finished) = pushed_finished(team) {
                    entry.has_finished = finished;
                }
            }
            None => entries.push(ScoreboardEntry {
                id,
                name: team.name.clone(),
                score: team.score_value(),
                has_finished: team.finished(),
            }),
        }
    }
    entries
}

fn resolve_focus(sources: &Sources, team_id: i64) -> FocusTeam {
    let pulled = team_match::find_team(
        sources.team_scoreboard.as_ref(),
        sources.scoreboard.as_ref(),
        team_id,
    );
    let pushed = sources.pushed.as_deref().and_then(|s| s.team(team_id));

    let (mut view, shape) = match (pulled, pushed) {
        (None, None) if sources.lookup_settled => return FocusTeam::NotFound { team_id },
        (None, None) => return FocusTeam::Pending { team_id },
        (Some((team, shape)), _) => (from_pulled(team), Some(shape)),
        (None, Some(team)) => (from_pushed(team_id, team), None),
    };
    view.matched_shape = shape;

    if let Some(team) = pushed {
        if let Some(score) = pushed_score(team) {
            view.score = score;
        }
        if let Some(finished) = pushed_finished(team) {
            view.has_finished = finished;
        }
        view.found_treasures.clone_from(&team.found_treasures);
        view.score_adjustment = team.score_adjustment_value();
        view.time_penalty_seconds = team.time_penalty.as_ref().and_then(WireNumber::as_i64);
        view.game_duration_seconds = team.game_duration.as_ref().and_then(WireNumber::as_i64);
        view.start_time_millis = team.start_time.as_ref().and_then(WireNumber::as_i64);
    }

    view.coupons = coupons(sources.team_scoreboard.as_ref());
    view.pictures = pictures(sources.pictures.as_ref());
    view.team_treasures = team_treasures(sources.observer.as_ref(), team_id);
    FocusTeam::Found(view)
}

fn from_pulled(team: PulledTeam) -> FocusTeamView {
    FocusTeamView {
        id: team.id,
        name: team.name,
        score: team.score,
        has_finished: team.has_finished,
        players: team.players,
        coupons: Vec::new(),
        pictures: Vec::new(),
        team_treasures: Vec::new(),
        found_treasures: Vec::new(),
        score_adjustment: 0,
        time_penalty_seconds: None,
        game_duration_seconds: None,
        start_time_millis: None,
        matched_shape: None,
    }
}

fn from_pushed(team_id: i64, team: &TeamInfo) -> FocusTeamView {
    FocusTeamView {
        id: team_id,
        name: team.name.clone(),
        score: team.score_value(),
        has_finished: team.finished(),
        players: Vec::new(),
        coupons: Vec::new(),
        pictures: Vec::new(),
        team_treasures: Vec::new(),
        found_treasures: Vec::new(),
        score_adjustment: 0,
        time_penalty_seconds: None,
        game_duration_seconds: None,
        start_time_millis: None,
        matched_shape: None,
    }
}

/// Pushed score, only when the snapshot actually carries a parsable one.
fn pushed_score(team: &TeamInfo) -> Option<i64> {
    team.score.as_ref().and_then(WireNumber::as_i64)
}

fn pushed_finished(team: &TeamInfo) -> Option<bool> {
    team.has_finished.as_ref().map(WireFlag::is_set)
}

fn coupons(team_response: Option<&Value>) -> Vec<Value> {
    let Some(response) = team_response else {
        return Vec::new();
    };
    COUPON_KEYS
        .iter()
        .find_map(|key| response.get(*key).and_then(Value::as_array))
        .cloned()
        .unwrap_or_default()
}

fn pictures(response: Option<&Value>) -> Vec<Value> {
    match response {
        Some(Value::Array(pictures)) => pictures.clone(),
        Some(other) => other
            .get("pictures")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Treasures from the observer feed that list `team_id` among their finders.
fn team_treasures(observer: Option<&Value>, team_id: i64) -> Vec<Value> {
    let found_by_team = |treasure: &&Value| {
        treasure
            .get("found_by")
            .and_then(Value::as_array)
            .is_some_and(|finders| {
                finders
                    .iter()
                    .any(|finder| finder.get("id").and_then(as_i64) == Some(team_id))
            })
    };
    observer
        .and_then(|observer| observer.get("treasures_found"))
        .and_then(Value::as_array)
        .map(|treasures| treasures.iter().filter(found_by_team).cloned().collect())
        .unwrap_or_default()
}

fn discovered_treasures(
    treasures_found: Option<&Value>,
    pushed_refs: Option<&[TreasureRef]>,
) -> Vec<DiscoveredTreasure> {
    let mut treasures: Vec<DiscoveredTreasure> = treasures_found
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(index, treasure)| enrich(index + 1, treasure))
        .collect();

    for treasure_ref in pushed_refs.unwrap_or_default() {
        if treasures.iter().any(|t| t.id == treasure_ref.id) {
            continue;
        }
        let position = treasures.len() + 1;
        treasures.push(DiscoveredTreasure {
            id: treasure_ref.id,
            name: format!("Treasure {position}"),
            score: 0,
            found_at: None,
            enriched: false,
        });
    }
    treasures
}

fn enrich(position: usize, treasure: &Value) -> DiscoveredTreasure {
    let fallback_id = i64::try_from(position).unwrap_or(i64::MAX);
    let id = treasure
        .get("found_waypoint")
        .and_then(as_i64)
        .filter(|id| *id != 0)
        .unwrap_or(fallback_id);

    let name = treasure
        .get("alias")
        .and_then(Value::as_str)
        .filter(|alias| !alias.is_empty())
        .map_or_else(|| format!("Treasure {position}"), str::to_string);

    let point_score = score_earned(treasure);
    let challenge_score: i64 = treasure
        .get("challenges")
        .and_then(Value::as_array)
        .map(|challenges| challenges.iter().map(score_earned).sum())
        .unwrap_or(0);

    DiscoveredTreasure {
        id,
        name,
        score: point_score + challenge_score,
        found_at: treasure
            .get("time")
            .and_then(Value::as_str)
            .map(str::to_string),
        enriched: true,
    }
}

fn score_earned(value: &Value) -> i64 {
    value.get("score_earned").and_then(as_i64).unwrap_or(0)
}

/// Observer data first, game metadata as fallback.
fn game_flag(sources: &Sources, key: &str, test: fn(&Value) -> bool) -> bool {
    [sources.observer.as_ref(), sources.game.as_ref()]
        .into_iter()
        .flatten()
        .find_map(|source| source.get(key))
        .is_some_and(test)
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

    fn pushed_team(id: i64, score: &str, finished: &str) -> TeamInfo {
        let mut team = TeamInfo::new(id, format!("Pushed {id}"));
        team.score = Some(WireNumber::from(score));
        team.has_finished = Some(WireFlag::Text(finished.to_string()));
        team
    }

    fn pushed(teams: Vec<TeamInfo>) -> Option<Arc<GameStatus>> {
        Some(Arc::new(GameStatus::new("ONGOING", None, teams)))
    }

    #[test]
    fn empty_sources_build_an_empty_view() {
        let view = build(&Sources::default(), None);
        assert_eq!(view, ReconciledView::default());
        assert_eq!(view.focus_team, FocusTeam::NotRequested);
    }

    #[test]
    fn push_only_focus_team() {
        let sources = Sources {
            pushed: pushed(vec![pushed_team(1, "3", "True")]),
            ..Sources::default()
        };
        let view = build(&sources, Some(1));
        let team = view.focus_team.as_found().unwrap();
        assert_eq!((team.id, team.score, team.has_finished), (1, 3, true));
        assert_eq!(team.matched_shape, None);
        assert_eq!(view.status_code.as_deref(), Some("ONGOING"));
    }

    #[test]
    fn push_wins_for_score_and_finish_but_pull_fields_stay() {
        let sources = Sources {
            team_scoreboard: Some(json!({
                "team": {"game_team_id": 2, "name": "Owls", "score": 10, "has_finished": false,
                         "players": [{"name": "ann"}]},
                "rewards": [{"code": "FREE"}]
            })),
            pictures: Some(json!({"pictures": [{"url": "a.jpg"}]})),
            pushed: pushed(vec![pushed_team(2, "25", "True")]),
            ..Sources::default()
        };
        let team = build(&sources, Some(2)).focus_team.as_found().cloned().unwrap();
        assert_eq!(team.score, 25);
        assert!(team.has_finished);
        assert_eq!(team.name, "Owls");
        assert_eq!(team.players.len(), 1);
        assert_eq!(team.coupons, vec![json!({"code": "FREE"})]);
        assert_eq!(team.pictures.len(), 1);
        assert_eq!(team.matched_shape, Some(TeamShape::Nested));
    }

    #[test]
    fn push_without_score_keeps_pulled_score() {
        let mut silent = TeamInfo::new(2_i64, "Owls");
        silent.has_finished = None;
        let sources = Sources {
            scoreboard: Some(json!({"teams": [{"game_team_id": 2, "name": "Owls", "score": 8}]})),
            pushed: pushed(vec![silent]),
            ..Sources::default()
        };
        let view = build(&sources, Some(2));
        assert_eq!(view.focus_team.as_found().unwrap().score, 8);
        assert_eq!(view.team(2).unwrap().score, 8);
    }

    #[test]
    fn unknown_team_is_not_found_once_lookup_settles() {
        let mut sources = Sources {
            scoreboard: Some(json!({"teams": [{"game_team_id": 1, "name": "A"}]})),
            ..Sources::default()
        };
        assert_eq!(
            build(&sources, Some(99)).focus_team,
            FocusTeam::Pending { team_id: 99 }
        );

        sources.lookup_settled = true;
        assert_eq!(
            build(&sources, Some(99)).focus_team,
            FocusTeam::NotFound { team_id: 99 }
        );
    }

    #[test]
    fn team_treasures_filtered_by_finder() {
        let sources = Sources {
            scoreboard: Some(json!({"teams": [{"game_team_id": 3, "name": "Foxes"}]})),
            observer: Some(json!({"treasures_found": [
                {"alias": "Bridge", "found_by": [{"id": 3}, {"id": 4}]},
                {"alias": "Tower", "found_by": [{"id": 4}]},
                {"alias": "Well", "found_by": [{"id": "3"}]},
                {"alias": "Gate"}
            ]})),
            lookup_settled: true,
            ..Sources::default()
        };
        let team = build(&sources, Some(3)).focus_team.as_found().cloned().unwrap();
        let names: Vec<&str> = team
            .team_treasures
            .iter()
            .filter_map(|t| t["alias"].as_str())
            .collect();
        assert_eq!(names, vec!["Bridge", "Well"]);

        let other = build(&sources, Some(4));
        assert_eq!(other.focus_team, FocusTeam::NotFound { team_id: 4 });
    }

    #[test]
    fn pushed_focus_team_used_when_none_requested() {
        let status = GameStatus::new(
            "ONGOING",
            Some(WireNumber::Integer(4)),
            vec![pushed_team(4, "1", "False")],
        );
        let sources = Sources {
            pushed: Some(Arc::new(status)),
            ..Sources::default()
        };
        assert_eq!(build(&sources, None).focus_team.as_found().unwrap().id, 4);
    }

    #[test]
    fn scoreboard_merges_push_over_pull() {
        let sources = Sources {
            scoreboard: Some(json!([
                {"game_team_id": 1, "name": "A", "score": 5},
                {"game_team_id": 2, "name": "B", "score": 7}
            ])),
            pushed: pushed(vec![pushed_team(1, "9", "False"), pushed_team(3, "1", "False")]),
            ..Sources::default()
        };
        let view = build(&sources, None);
        let scores: Vec<(i64, i64)> = view.scoreboard.iter().map(|t| (t.id, t.score)).collect();
        assert_eq!(scores, vec![(1, 9), (2, 7), (3, 1)]);

        let top: Vec<i64> = view.top_teams(2).iter().map(|t| t.id).collect();
        assert_eq!(top, vec![1, 2]);
        assert_eq!(view.teams_count(), 3);
    }

    #[test]
    fn discovered_treasures_and_score() {
        let mut team = pushed_team(1, "0", "False");
        team.found_treasures = vec![TreasureRef { id: 30 }, TreasureRef { id: 99 }];
        let sources = Sources {
            treasures_found: Some(json!([
                {"found_waypoint": 30, "alias": "Old Mill", "score_earned": 10,
                 "challenges": [{"score_earned": 5}, {"score_earned": "2"}], "time": "12:01"},
                {"score_earned": 4}
            ])),
            pushed: pushed(vec![team]),
            ..Sources::default()
        };
        let view = build(&sources, Some(1));

        assert_eq!(view.discovered_score, 21);
        assert_eq!(
            view.discovered_treasures,
            vec![
                DiscoveredTreasure {
                    id: 30,
                    name: "Old Mill".to_string(),
                    score: 17,
                    found_at: Some("12:01".to_string()),
                    enriched: true,
                },
                DiscoveredTreasure {
                    id: 2,
                    name: "Treasure 2".to_string(),
                    score: 4,
                    found_at: None,
                    enriched: true,
                },
                DiscoveredTreasure {
                    id: 99,
                    name: "Treasure 3".to_string(),
                    score: 0,
                    found_at: None,
                    enriched: false,
                },
            ]
        );
    }

    #[test]
    fn game_flags_prefer_observer() {
        let sources = Sources {
            observer: Some(json!({"is_started": true, "finish_time": null})),
            game: Some(json!({"is_started": false, "finish_time": "2024-05-01T10:00:00Z"})),
            ..Sources::default()
        };
        let view = build(&sources, None);
        assert!(view.game_started);
        assert!(!view.game_finished);

        let sources = Sources {
            game: Some(json!({"is_started": true, "finish_time": "2024-05-01T10:00:00Z"})),
            ..Sources::default()
        };
        let view = build(&sources, None);
        assert!(view.game_started);
        assert!(view.game_finished);
    }
}
