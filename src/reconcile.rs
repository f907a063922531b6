//! Scoreboard session: folds pushed and pulled state into one view.
//!
//! A [`ScoreboardSession`] keeps the last good value of every pull and the
//! latest pushed snapshot, and republishes a freshly built
//! [`ReconciledView`] after every change. Pulls fold independently: a failed
//! pull leaves that field at its previous value and never reaches the view.
//!
//! Phases follow `Uninitialized -> Loading -> Ready -> Stale -> Ready`.
//! A load that ends with nothing to show, or a refresh in which every pull
//! failed, enters [`SessionPhase::Error`] until [`ScoreboardSession::retry`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiResponse, ObserverApi, PullKind};
use crate::polling::{self, PollHandle, PollSink, PollingConfig, PollingFallback, RoundOutcome};
use crate::publisher::{StatusPublisher, Subscription};
use crate::status::GameStatus;
use crate::view::{self, ReconciledView, Sources};

/// Error recorded when a load finishes without any scoreboard to show.
const NOTHING_LOADED: &str = "no scoreboard data available";

/// Which game and team a session follows.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Game code used on the pull channel.
    pub game_code: String,
    /// Team to resolve as the focus team.
    pub team_id: Option<i64>,
}

impl SessionConfig {
    /// Follow a game without a focus team.
    pub fn new(game_code: impl Into<String>) -> Self {
        Self {
            game_code: game_code.into(),
            team_id: None,
        }
    }

    /// Resolve `team_id` as the focus team and include team-scoped pulls.
    #[must_use]
    pub fn with_team(mut self, team_id: i64) -> Self {
        self.team_id = Some(team_id);
        self
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Nothing requested yet.
    Uninitialized,
    /// A full load is in flight.
    Loading,
    /// The view reflects the latest successful pulls.
    Ready,
    /// The last refresh partially failed; some fields hold older values.
    Stale,
    /// The last attempt produced nothing usable. Cleared by `retry`.
    Error,
}

struct SessionState {
    phase: SessionPhase,
    sources: Sources,
    last_error: Option<String>,
    /// Scoreboard pull has answered at least once, successfully or not.
    scoreboard_answered: bool,
    /// Same for the team scoreboard pull.
    team_answered: bool,
}

struct SessionInner {
    config: SessionConfig,
    api: Arc<dyn ObserverApi>,
    state: Mutex<SessionState>,
    view_tx: watch::Sender<Arc<ReconciledView>>,
    closed: AtomicBool,
}

impl SessionInner {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Rebuild and publish the view. Called with the state lock held so
    /// published views follow mutation order.
    fn republish(&self, state: &SessionState) {
        let view = view::build(&state.sources, self.config.team_id);
        self.view_tx.send_replace(Arc::new(view));
    }

    fn set_phase(&self, state: &mut SessionState, next: SessionPhase) {
        if state.phase != next {
            debug!(code = %self.config.game_code, from = ?state.phase, to = ?next, "session phase changed");
            state.phase = next;
        }
    }

    /// Recompute whether a missing focus team is final. Returns whether it changed.
    fn settle_lookup(&self, state: &mut SessionState) -> bool {
        let settled = matches!(
            state.phase,
            SessionPhase::Ready | SessionPhase::Stale | SessionPhase::Error
        ) || (state.scoreboard_answered
            && (state.team_answered || self.config.team_id.is_none()));
        let changed = settled != state.sources.lookup_settled;
        state.sources.lookup_settled = settled;
        changed
    }

    fn fold(&self, kind: PullKind, response: ApiResponse) -> bool {
        if self.is_closed() {
            debug!(code = %self.config.game_code, ?kind, "session closed, discarding pull");
            return false;
        }

        let mut state = self.state();
        match kind {
            PullKind::Scoreboard => state.scoreboard_answered = true,
            PullKind::TeamScoreboard => state.team_answered = true,
            _ => {}
        }
        let Some(data) = response.usable_data() else {
            warn!(
                code = %self.config.game_code,
                ?kind,
                status = response.status,
                error = response.error.as_deref().unwrap_or_default(),
                "pull failed, keeping last good value"
            );
            state.last_error = response.error.clone();
            if self.settle_lookup(&mut state) {
                self.republish(&state);
            }
            return false;
        };

        let slot = match kind {
            PullKind::Game => &mut state.sources.game,
            PullKind::Observer => &mut state.sources.observer,
            PullKind::Scoreboard => &mut state.sources.scoreboard,
            PullKind::TeamScoreboard => &mut state.sources.team_scoreboard,
            PullKind::TreasuresFound => &mut state.sources.treasures_found,
            PullKind::Pictures => &mut state.sources.pictures,
        };
        *slot = Some(data.clone());
        debug!(code = %self.config.game_code, ?kind, "pull folded");
        self.settle_lookup(&mut state);
        self.republish(&state);
        true
    }

    fn apply_push(&self, status: Arc<GameStatus>) {
        if self.is_closed() {
            return;
        }
        let mut state = self.state();
        state.sources.pushed = Some(status);
        self.republish(&state);
    }

    fn finish_round(&self, outcome: RoundOutcome) {
        if self.is_closed() {
            return;
        }
        let mut state = self.state();
        if !matches!(state.phase, SessionPhase::Ready | SessionPhase::Stale) {
            return;
        }
        let next = if outcome.all_accepted() {
            SessionPhase::Ready
        } else if outcome.none_accepted() {
            SessionPhase::Error
        } else {
            SessionPhase::Stale
        };
        if next == SessionPhase::Ready {
            state.last_error = None;
        }
        self.set_phase(&mut state, next);
    }
}

impl PollSink for SessionInner {
    fn accept(&self, kind: PullKind, response: ApiResponse) -> bool {
        self.fold(kind, response)
    }

    fn round_complete(&self, outcome: RoundOutcome) {
        self.finish_round(outcome);
    }

    fn is_alive(&self) -> bool {
        !self.is_closed()
    }
}

/// Poll sink that does not keep the session alive.
struct WeakSession(Weak<SessionInner>);

impl PollSink for WeakSession {
    fn accept(&self, kind: PullKind, response: ApiResponse) -> bool {
        self.0
            .upgrade()
            .is_some_and(|inner| inner.fold(kind, response))
    }

    fn round_complete(&self, outcome: RoundOutcome) {
        if let Some(inner) = self.0.upgrade() {
            inner.finish_round(outcome);
        }
    }

    fn is_alive(&self) -> bool {
        self.0.upgrade().is_some_and(|inner| !inner.is_closed())
    }
}

/// Reconciliation state for one game, shared by cloning.
#[derive(Clone)]
pub struct ScoreboardSession {
    inner: Arc<SessionInner>,
}

impl ScoreboardSession {
    /// Create an `Uninitialized` session.
    pub fn new(config: SessionConfig, api: Arc<dyn ObserverApi>) -> Self {
        let (view_tx, _) = watch::channel(Arc::new(ReconciledView::default()));
        Self {
            inner: Arc::new(SessionInner {
                config,
                api,
                state: Mutex::new(SessionState {
                    phase: SessionPhase::Uninitialized,
                    sources: Sources::default(),
                    last_error: None,
                    scoreboard_answered: false,
                    team_answered: false,
                }),
                view_tx,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Issue every pull together and fold each as it resolves.
    ///
    /// Ends `Ready` if a scoreboard (pulled or pushed) is available, `Error`
    /// otherwise.
    pub async fn load(&self) {
        if self.inner.is_closed() {
            return;
        }
        {
            let mut state = self.inner.state();
            self.inner.set_phase(&mut state, SessionPhase::Loading);
        }

        let inner = &*self.inner;
        let api = &*inner.api;
        let code = inner.config.game_code.as_str();
        let team_id = inner.config.team_id;
        info!(code, team_id, "loading scoreboard");

        tokio::join!(
            async { inner.fold(PullKind::Game, api.game_by_code(code).await) },
            async { inner.fold(PullKind::Observer, api.observer(code).await) },
            async { inner.fold(PullKind::Scoreboard, api.scoreboard(code).await) },
            async {
                if let Some(id) = team_id {
                    inner.fold(PullKind::TeamScoreboard, api.team_scoreboard(code, id).await);
                }
            },
            async {
                if let Some(id) = team_id {
                    inner.fold(PullKind::TreasuresFound, api.treasures_found(code, id).await);
                }
            },
            async {
                if let Some(id) = team_id {
                    inner.fold(PullKind::Pictures, api.pictures(code, id).await);
                }
            },
        );

        if inner.is_closed() {
            return;
        }
        let mut state = inner.state();
        if state.phase != SessionPhase::Loading {
            return;
        }
        if state.sources.scoreboard.is_some() || state.sources.pushed.is_some() {
            state.last_error = None;
            inner.set_phase(&mut state, SessionPhase::Ready);
        } else {
            if state.last_error.is_none() {
                state.last_error = Some(NOTHING_LOADED.to_string());
            }
            warn!(code, error = state.last_error.as_deref().unwrap_or_default(), "load failed");
            inner.set_phase(&mut state, SessionPhase::Error);
        }
        if inner.settle_lookup(&mut state) {
            inner.republish(&state);
        }
    }

    /// Re-pull the scoreboard, and the team scoreboard and treasures when a
    /// team is followed.
    pub async fn refresh(&self) -> RoundOutcome {
        let inner = &*self.inner;
        let outcome = polling::pull_round(
            &*inner.api,
            &inner.config.game_code,
            inner.config.team_id,
            inner,
        )
        .await;
        inner.finish_round(outcome);
        outcome
    }

    /// Reload after an error. Returns `false` if the session was not in
    /// [`SessionPhase::Error`].
    pub async fn retry(&self) -> bool {
        if self.phase() != SessionPhase::Error {
            return false;
        }
        self.load().await;
        true
    }

    /// Fold a pull response obtained elsewhere. Returns whether it was used.
    pub fn apply_pull(&self, kind: PullKind, response: ApiResponse) -> bool {
        self.inner.fold(kind, response)
    }

    /// Fold a pushed snapshot.
    pub fn apply_push(&self, status: Arc<GameStatus>) {
        self.inner.apply_push(status);
    }

    /// Feed every snapshot from `publisher` into this session, starting with
    /// the one it already holds.
    ///
    /// The subscription holds the session weakly.
    #[must_use = "dropping the subscription detaches the session"]
    pub fn attach(&self, publisher: &StatusPublisher) -> Subscription {
        let weak = Arc::downgrade(&self.inner);
        let subscription = publisher.subscribe(move |status| {
            if let Some(inner) = weak.upgrade() {
                inner.apply_push(Arc::clone(status));
            }
        });
        // Subscribed first so nothing published in between is missed. A
        // snapshot that races in twice is applied twice, which is harmless.
        if let Some(latest) = publisher.latest() {
            self.apply_push(latest);
        }
        subscription
    }

    /// Poll with the session's team on `interval` for as long as the handle
    /// and the session live.
    #[must_use = "dropping the handle stops polling"]
    pub fn start_polling(&self, interval: std::time::Duration) -> PollHandle {
        let mut config = PollingConfig::default().with_interval(interval);
        config.team_id = self.inner.config.team_id;
        PollingFallback::new(
            Arc::clone(&self.inner.api),
            self.inner.config.game_code.clone(),
            config,
        )
        .start(Arc::new(WeakSession(Arc::downgrade(&self.inner))))
    }

    /// Stop accepting results. In-flight pulls complete but are discarded.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!(code = %self.inner.config.game_code, "session closed");
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.inner.state().phase
    }

    /// Message of the most recent failed pull or load.
    pub fn last_error(&self) -> Option<String> {
        self.inner.state().last_error.clone()
    }

    /// Latest view.
    pub fn view(&self) -> Arc<ReconciledView> {
        self.inner.view_tx.borrow().clone()
    }

    /// Watch view updates.
    pub fn watch(&self) -> watch::Receiver<Arc<ReconciledView>> {
        self.inner.view_tx.subscribe()
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for ScoreboardSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoreboardSession")
            .field("config", &self.inner.config)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
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
    use crate::api::Endpoint;
    use crate::status::{TeamInfo, WireFlag, WireNumber};
    use crate::view::FocusTeam;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    /// Serves canned bodies by path; unknown paths answer 404.
    #[derive(Default)]
    struct CannedApi {
        bodies: Mutex<HashMap<String, (u16, Value)>>,
    }

    impl CannedApi {
        fn with(self, path: &str, status: u16, body: Value) -> Self {
            self.set(path, status, body);
            self
        }

        fn set(&self, path: &str, status: u16, body: Value) {
            self.bodies
                .lock()
                .unwrap()
                .insert(path.to_string(), (status, body));
        }
    }

    #[async_trait]
    impl ObserverApi for CannedApi {
        async fn fetch(&self, endpoint: Endpoint<'_>) -> ApiResponse {
            match self.bodies.lock().unwrap().get(&endpoint.path()) {
                Some((status, body)) => ApiResponse::from_body(*status, &body.to_string()),
                None => ApiResponse::from_body(404, r#"{"error":"not found"}"#),
            }
        }
    }

    fn scoreboard(score: i64) -> Value {
        json!({"teams": [{"game_team_id": 1, "name": "Blue", "score": score}]})
    }

    #[tokio::test]
    async fn load_reaches_ready() {
        let api = CannedApi::default()
            .with("/apis/observer/G/scoreboard", 200, scoreboard(4))
            .with("/apis/observer/G", 200, json!({"is_started": true}));
        let session = ScoreboardSession::new(SessionConfig::new("G").with_team(1), Arc::new(api));
        assert_eq!(session.phase(), SessionPhase::Uninitialized);

        session.load().await;

        assert_eq!(session.phase(), SessionPhase::Ready);
        let view = session.view();
        assert!(view.game_started);
        assert_eq!(view.focus_team.as_found().unwrap().score, 4);
    }

    #[tokio::test]
    async fn load_without_scoreboard_errors_then_retry_recovers() {
        let api = Arc::new(CannedApi::default());
        let session = ScoreboardSession::new(SessionConfig::new("G"), api.clone());

        session.load().await;
        assert_eq!(session.phase(), SessionPhase::Error);
        assert_eq!(session.last_error().as_deref(), Some("not found"));

        api.set("/apis/observer/G/scoreboard", 200, scoreboard(1));
        assert!(session.retry().await);
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert_eq!(session.last_error(), None);
        assert!(!session.retry().await);
    }

    #[tokio::test]
    async fn failed_pull_keeps_last_good_value() {
        let api = Arc::new(CannedApi::default().with("/apis/observer/G/scoreboard", 200, scoreboard(4)));
        let session = ScoreboardSession::new(SessionConfig::new("G"), api.clone());
        session.load().await;

        api.set("/apis/observer/G/scoreboard", 500, json!({"error": "boom"}));
        let outcome = session.refresh().await;

        assert!(outcome.none_accepted());
        assert_eq!(session.phase(), SessionPhase::Error);
        assert_eq!(session.view().team(1).unwrap().score, 4);
    }

    #[tokio::test]
    async fn partial_refresh_is_stale_until_a_clean_round() {
        let api = Arc::new(
            CannedApi::default()
                .with("/apis/observer/G/scoreboard", 200, scoreboard(4))
                .with("/apis/observer/G/scoreboard/1", 200, json!({"teams": {"game_team_id": 1, "name": "Blue"}}))
                .with("/apis/observer/G/treasures_found/1", 200, json!([])),
        );
        let session = ScoreboardSession::new(SessionConfig::new("G").with_team(1), api.clone());
        session.load().await;
        assert_eq!(session.phase(), SessionPhase::Ready);

        api.set("/apis/observer/G/treasures_found/1", 503, json!("down"));
        session.refresh().await;
        assert_eq!(session.phase(), SessionPhase::Stale);

        api.set("/apis/observer/G/treasures_found/1", 200, json!([]));
        session.refresh().await;
        assert_eq!(session.phase(), SessionPhase::Ready);
    }

    #[tokio::test]
    async fn push_via_publisher_overrides_pulled_score() {
        let api = Arc::new(CannedApi::default().with("/apis/observer/G/scoreboard", 200, scoreboard(4)));
        let session = ScoreboardSession::new(SessionConfig::new("G").with_team(1), api);
        session.load().await;

        let publisher = StatusPublisher::new();
        let _sub = session.attach(&publisher);

        let mut team = TeamInfo::new(1_i64, "Blue");
        team.score = Some(WireNumber::from("9"));
        team.has_finished = Some(WireFlag::Text("True".to_string()));
        publisher.publish_status(GameStatus::new("ONGOING", None, vec![team]));

        let view = session.view();
        let focus = view.focus_team.as_found().unwrap();
        assert_eq!((focus.score, focus.has_finished), (9, true));
        assert_eq!(focus.name, "Blue");
    }

    #[tokio::test]
    async fn closed_session_discards_results() {
        let api = Arc::new(CannedApi::default().with("/apis/observer/G/scoreboard", 200, scoreboard(4)));
        let session = ScoreboardSession::new(SessionConfig::new("G").with_team(2), api);
        session.close();

        session.load().await;
        assert_eq!(session.phase(), SessionPhase::Uninitialized);
        assert!(!session.apply_pull(PullKind::Scoreboard, ApiResponse::from_body(200, "{}")));
        assert_eq!(session.view().focus_team, FocusTeam::NotRequested);
    }

    #[tokio::test]
    async fn watch_sees_every_fold() {
        let session = ScoreboardSession::new(SessionConfig::new("G"), Arc::new(CannedApi::default()));
        let mut rx = session.watch();

        assert!(session.apply_pull(
            PullKind::Scoreboard,
            ApiResponse::from_body(200, &scoreboard(2).to_string())
        ));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().teams_count(), 1);
    }

    /// Holds back one path until released; everything else answers at once.
    struct GatedApi {
        canned: CannedApi,
        gated: &'static str,
        gate: tokio::sync::Notify,
    }

    #[async_trait]
    impl ObserverApi for GatedApi {
        async fn fetch(&self, endpoint: Endpoint<'_>) -> ApiResponse {
            if endpoint.path() == self.gated {
                self.gate.notified().await;
            }
            self.canned.fetch(endpoint).await
        }
    }

    #[tokio::test]
    async fn focus_team_is_pending_while_its_pull_is_in_flight() {
        let api = Arc::new(GatedApi {
            canned: CannedApi::default()
                .with("/apis/observer/G/scoreboard", 200, json!({"teams": []}))
                .with(
                    "/apis/observer/G/scoreboard/7",
                    200,
                    json!({"teams": {"game_team_id": 7, "name": "Red", "score": 12}}),
                ),
            gated: "/apis/observer/G/scoreboard/7",
            gate: tokio::sync::Notify::new(),
        });
        let session = ScoreboardSession::new(SessionConfig::new("G").with_team(7), api.clone());

        let load = {
            let session = session.clone();
            tokio::spawn(async move { session.load().await })
        };
        let mut rx = session.watch();
        rx.wait_for(|v| v.focus_team != FocusTeam::NotRequested)
            .await
            .unwrap();
        assert_eq!(session.phase(), SessionPhase::Loading);
        assert_eq!(session.view().focus_team, FocusTeam::Pending { team_id: 7 });

        api.gate.notify_one();
        load.await.unwrap();

        assert_eq!(session.phase(), SessionPhase::Ready);
        assert_eq!(session.view().focus_team.as_found().unwrap().score, 12);
    }

    #[tokio::test]
    async fn failed_team_pull_settles_to_not_found() {
        let api = Arc::new(CannedApi::default().with("/apis/observer/G/scoreboard", 200, json!([])));
        let session = ScoreboardSession::new(SessionConfig::new("G").with_team(7), api);

        session.load().await;

        assert_eq!(session.phase(), SessionPhase::Ready);
        assert_eq!(session.view().focus_team, FocusTeam::NotFound { team_id: 7 });
    }

    #[tokio::test]
    async fn attach_seeds_from_the_latest_snapshot() {
        let session = ScoreboardSession::new(SessionConfig::new("G").with_team(1), Arc::new(CannedApi::default()));
        let publisher = StatusPublisher::new();
        let mut team = TeamInfo::new(1_i64, "Blue");
        team.score = Some(WireNumber::from("5"));
        publisher.publish_status(GameStatus::new("ONGOING", None, vec![team]));

        let _sub = session.attach(&publisher);

        assert_eq!(session.view().focus_team.as_found().unwrap().score, 5);
        assert_eq!(publisher.subscriber_count(), 1);
    }
}
