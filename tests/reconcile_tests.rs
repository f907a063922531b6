//! Integration tests for reconciliation.
//!
//! Drives `ScoreboardSession` with the canned `MockApi` and, where pushed
//! state matters, with a `TransportClient` over the scripted transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use scoreboard_sync::status::GameStatus;
use scoreboard_sync::team_match::TeamShape;
use scoreboard_sync::{
    FocusTeam, ReconciledView, ScoreboardSession, SessionConfig, SessionPhase, SyncConfig,
    TransportClient,
};
use serde_json::json;

use common::{status_frame, team, MockApi, MockConnector, MockTransport};

async fn wait_for_view<F>(session: &ScoreboardSession, mut ready: F) -> Arc<ReconciledView>
where
    F: FnMut(&ReconciledView) -> bool,
{
    let mut rx = session.watch();
    let view = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|v| ready(v)))
        .await
        .expect("view not reached")
        .expect("session dropped");
    Arc::clone(&view)
}

#[tokio::test]
async fn pushed_snapshot_resolves_focus_team() {
    let status = GameStatus::new("ONGOING", None, vec![team(1, "Blue", "3", true)]);
    let (transport, _sent, _closed) = MockTransport::new(vec![Some(Ok(status_frame(&status)))]);
    let client = TransportClient::new(
        "48213",
        SyncConfig::default(),
        MockConnector::new(vec![Ok(transport)]),
    );

    let session = ScoreboardSession::new(
        SessionConfig::new("ABC").with_team(1),
        Arc::new(MockApi::default()),
    );
    let _attached = session.attach(client.publisher());
    client.connect().await.unwrap();

    let view = wait_for_view(&session, |v| v.focus_team.as_found().is_some()).await;
    let focus = view.focus_team.as_found().unwrap();
    assert_eq!(focus.id, 1);
    assert_eq!(focus.score, 3);
    assert!(focus.has_finished);

    client.disconnect().await;
}

#[tokio::test]
async fn single_teams_object_is_matched() {
    let api = MockApi::default()
        .with_ok("/apis/observer/ABC/scoreboard", json!({"teams": []}))
        .with_ok(
            "/apis/observer/ABC/scoreboard/7",
            json!({"teams": {"game_team_id": 7, "name": "Red", "score": 12}}),
        );
    let session = ScoreboardSession::new(SessionConfig::new("ABC").with_team(7), Arc::new(api));

    session.load().await;

    assert_eq!(session.phase(), SessionPhase::Ready);
    let view = session.view();
    let focus = view.focus_team.as_found().unwrap();
    assert_eq!((focus.id, focus.name.as_str(), focus.score), (7, "Red", 12));
    assert_eq!(focus.matched_shape, Some(TeamShape::TeamsObject));
}

#[tokio::test]
async fn unknown_team_is_reported_not_found() {
    let api = MockApi::default()
        .with_ok("/apis/observer/ABC/scoreboard", json!({"teams": [{"game_team_id": 1}]}))
        .with_ok("/apis/observer/ABC/scoreboard/5", json!({"schema": "changed"}));
    let session = ScoreboardSession::new(SessionConfig::new("ABC").with_team(5), Arc::new(api));

    session.load().await;

    assert_eq!(session.phase(), SessionPhase::Ready);
    assert_eq!(session.view().focus_team, FocusTeam::NotFound { team_id: 5 });
}

#[tokio::test]
async fn full_load_issues_every_pull() {
    let api = Arc::new(
        MockApi::default()
            .with_ok("/apis/observer/ABC/scoreboard", json!({"teams": []}))
            .with_ok("/game/apis/games/by_code/ABC", json!({"is_started": true}))
            .with_ok("/apis/observer/ABC", json!({"is_started": true, "finish_time": "12:00"}))
            .with_ok(
                "/apis/observer/ABC/scoreboard/2",
                json!({"game_team_id": 2, "name": "Owls", "score": 5, "coupons": [{"id": 1}]}),
            )
            .with_ok(
                "/apis/observer/ABC/treasures_found/2",
                json!([{"found_waypoint": 11, "alias": "Bridge", "score_earned": 10}]),
            )
            .with_ok("/apis/observer/ABC/pictures/2", json!([{"url": "p.jpg"}])),
    );
    let session = ScoreboardSession::new(SessionConfig::new("ABC").with_team(2), api.clone());

    session.load().await;

    let mut requests = api.requests.lock().unwrap().clone();
    requests.sort();
    assert_eq!(
        requests,
        vec![
            "/apis/observer/ABC",
            "/apis/observer/ABC/pictures/2",
            "/apis/observer/ABC/scoreboard",
            "/apis/observer/ABC/scoreboard/2",
            "/apis/observer/ABC/treasures_found/2",
            "/game/apis/games/by_code/ABC",
        ]
    );

    let view = session.view();
    assert!(view.game_started && view.game_finished);
    assert_eq!(view.discovered_score, 10);
    let focus = view.focus_team.as_found().unwrap();
    assert_eq!(focus.matched_shape, Some(TeamShape::Flattened));
    assert_eq!(focus.coupons.len(), 1);
    assert_eq!(focus.pictures.len(), 1);
}

#[tokio::test]
async fn push_wins_while_pull_only_fields_survive() {
    let api = MockApi::default()
        .with_ok(
            "/apis/observer/ABC/scoreboard",
            json!({"teams": [
                {"game_team_id": 1, "name": "Blue", "score": 1, "players": [{"name": "a"}, {"name": "b"}]},
                {"game_team_id": 2, "name": "Green", "score": 2}
            ]}),
        )
        .with_ok(
            "/apis/observer/ABC/scoreboard/1",
            json!({"team": {"game_team_id": 1, "name": "Blue", "score": 1,
                            "players": [{"name": "a"}, {"name": "b"}]},
                   "earned_coupons": [{"id": "c1"}]}),
        );
    let session = ScoreboardSession::new(SessionConfig::new("ABC").with_team(1), Arc::new(api));
    session.load().await;

    session.apply_push(Arc::new(GameStatus::new(
        "ONGOING",
        None,
        vec![team(1, "Blue", "40", true), team(2, "Green", "30", false)],
    )));

    let view = session.view();
    let focus = view.focus_team.as_found().unwrap();
    assert_eq!((focus.score, focus.has_finished), (40, true));
    assert_eq!(focus.players.len(), 2);
    assert_eq!(focus.coupons.len(), 1);

    let top: Vec<(i64, i64)> = view.top_teams(5).iter().map(|t| (t.id, t.score)).collect();
    assert_eq!(top, vec![(1, 40), (2, 30)]);

    // A later pull does not undo pushed scores.
    session.refresh().await;
    assert_eq!(session.view().team(1).unwrap().score, 40);
}

#[tokio::test(start_paused = true)]
async fn polling_fallback_keeps_the_view_fresh() {
    let api = Arc::new(MockApi::default().with_ok(
        "/apis/observer/ABC/scoreboard",
        json!({"teams": [{"game_team_id": 1, "name": "Blue", "score": 1}]}),
    ));
    let session = ScoreboardSession::new(SessionConfig::new("ABC"), api.clone());
    session.load().await;

    let handle = session.start_polling(Duration::from_secs(5));
    api.respond(
        "/apis/observer/ABC/scoreboard",
        200,
        json!({"teams": [{"game_team_id": 1, "name": "Blue", "score": 9}]}),
    );

    let view = wait_for_view(&session, |v| v.team(1).is_some_and(|t| t.score == 9)).await;
    assert_eq!(view.teams_count(), 1);

    handle.stop();
    let polled = api.requests.lock().unwrap().len();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(api.requests.lock().unwrap().len(), polled);
}

#[tokio::test(start_paused = true)]
async fn polling_stops_with_the_session() {
    let api = Arc::new(MockApi::default().with_ok("/apis/observer/ABC/scoreboard", json!([])));
    let session = ScoreboardSession::new(SessionConfig::new("ABC"), api.clone());
    let handle = session.start_polling(Duration::from_secs(1));

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(api.requests.lock().unwrap().len(), 3);

    drop(session);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!handle.is_running());
}
