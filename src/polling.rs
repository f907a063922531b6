//! Periodic pulls for when the push channel is unavailable or disabled.
//!
//! A polling round issues the full-scoreboard pull, plus the team-scoped
//! scoreboard and treasure pulls when a team id is set. The pulls run
//! concurrently and each response is handed to the [`PollSink`] as soon as it
//! resolves.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::api::{ApiResponse, ObserverApi, PullKind};

/// Default polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for [`PollingFallback`].
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Time between rounds. Defaults to **5 seconds**; clamped to at least 1ms.
    pub interval: Duration,
    /// Team whose scoped pulls join each round.
    pub team_id: Option<i64>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            team_id: None,
        }
    }
}

impl PollingConfig {
    /// Set the interval between rounds.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Include the team-scoped pulls for `team_id`.
    #[must_use]
    pub fn with_team(mut self, team_id: i64) -> Self {
        self.team_id = Some(team_id);
        self
    }
}

/// Tally of one polling round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundOutcome {
    /// Pulls issued.
    pub attempted: usize,
    /// Pulls the sink accepted.
    pub accepted: usize,
}

impl RoundOutcome {
    fn record(&mut self, accepted: Option<bool>) {
        if let Some(accepted) = accepted {
            self.attempted += 1;
            self.accepted += usize::from(accepted);
        }
    }

    /// Every pull was accepted.
    pub fn all_accepted(&self) -> bool {
        self.accepted == self.attempted
    }

    /// No pull was accepted.
    pub fn none_accepted(&self) -> bool {
        self.accepted == 0
    }
}

/// Receiver of pull responses.
///
/// Implemented for closures `Fn(PullKind, ApiResponse) -> bool`, where the
/// return value says whether the response was accepted.
pub trait PollSink: Send + Sync + 'static {
    /// Handle one response as soon as it resolves.
    fn accept(&self, kind: PullKind, response: ApiResponse) -> bool;

    /// Called once every pull of a round has resolved.
    fn round_complete(&self, _outcome: RoundOutcome) {}

    /// `false` stops the poller before its next round.
    fn is_alive(&self) -> bool {
        true
    }
}

impl<F> PollSink for F
where
    F: Fn(PullKind, ApiResponse) -> bool + Send + Sync + 'static,
{
    fn accept(&self, kind: PullKind, response: ApiResponse) -> bool {
        self(kind, response)
    }
}

/// Run one round: scoreboard, and team scoreboard plus treasures if `team_id`
/// is set. All pulls are issued together.
pub async fn pull_round(
    api: &dyn ObserverApi,
    code: &str,
    team_id: Option<i64>,
    sink: &dyn PollSink,
) -> RoundOutcome {
    let scoreboard = async {
        let response = api.scoreboard(code).await;
        Some(sink.accept(PullKind::Scoreboard, response))
    };
    let team_scoreboard = async {
        let id = team_id?;
        let response = api.team_scoreboard(code, id).await;
        Some(sink.accept(PullKind::TeamScoreboard, response))
    };
    let treasures = async {
        let id = team_id?;
        let response = api.treasures_found(code, id).await;
        Some(sink.accept(PullKind::TreasuresFound, response))
    };

    let (scoreboard, team_scoreboard, treasures) =
        tokio::join!(scoreboard, team_scoreboard, treasures);

    let mut outcome = RoundOutcome::default();
    outcome.record(scoreboard);
    outcome.record(team_scoreboard);
    outcome.record(treasures);
    outcome
}

/// Periodic pull loop for one game.
pub struct PollingFallback {
    api: Arc<dyn ObserverApi>,
    game_code: String,
    config: PollingConfig,
}

impl PollingFallback {
    /// Create a poller; nothing is issued until [`start`](Self::start).
    pub fn new(api: Arc<dyn ObserverApi>, game_code: impl Into<String>, config: PollingConfig) -> Self {
        Self {
            api,
            game_code: game_code.into(),
            config,
        }
    }

    /// Run a single round without spawning anything.
    pub async fn poll_once(&self, sink: &dyn PollSink) -> RoundOutcome {
        pull_round(&*self.api, &self.game_code, self.config.team_id, sink).await
    }

    /// Spawn the loop. The first round is issued immediately.
    ///
    /// Polling stops when the returned handle is stopped or dropped, or when
    /// the sink reports it is no longer alive.
    #[must_use = "dropping the handle stops polling"]
    pub fn start(self, sink: Arc<dyn PollSink>) -> PollHandle {
        let interval = self.config.interval.max(MIN_POLL_INTERVAL);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(code = %self.game_code, ?interval, "polling started");

            loop {
                ticker.tick().await;
                if !sink.is_alive() {
                    debug!(code = %self.game_code, "poll sink gone, stopping");
                    break;
                }
                let outcome =
                    pull_round(&*self.api, &self.game_code, self.config.team_id, &*sink).await;
                debug!(
                    code = %self.game_code,
                    attempted = outcome.attempted,
                    accepted = outcome.accepted,
                    "poll round complete"
                );
                sink.round_complete(outcome);
            }
        });
        PollHandle { task }
    }
}

impl std::fmt::Debug for PollingFallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingFallback")
            .field("game_code", &self.game_code)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Cancellation handle for a running poller.
#[derive(Debug)]
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Stop polling. A round in flight is abandoned at its next await point.
    pub fn stop(self) {
        self.task.abort();
    }

    /// `true` until the loop has exited.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
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
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Answers every pull with an empty JSON object; team pulls fail.
    #[derive(Default)]
    struct CountingApi {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObserverApi for CountingApi {
        async fn fetch(&self, endpoint: Endpoint<'_>) -> ApiResponse {
            self.calls.lock().unwrap().push(endpoint.path());
            match endpoint {
                Endpoint::TeamScoreboard { .. } => ApiResponse::from_body(502, "bad gateway"),
                _ => ApiResponse::from_body(200, "{}"),
            }
        }
    }

    fn accept_successes() -> Arc<dyn PollSink> {
        Arc::new(|_kind: PullKind, response: ApiResponse| response.success)
    }

    #[tokio::test]
    async fn round_without_team_pulls_scoreboard_only() {
        let api = Arc::new(CountingApi::default());
        let poller = PollingFallback::new(api.clone(), "G1", PollingConfig::default());

        let outcome = poller.poll_once(&*accept_successes()).await;

        assert_eq!(outcome, RoundOutcome { attempted: 1, accepted: 1 });
        assert!(outcome.all_accepted());
        assert_eq!(
            *api.calls.lock().unwrap(),
            vec!["/apis/observer/G1/scoreboard".to_string()]
        );
    }

    #[tokio::test]
    async fn round_with_team_adds_scoped_pulls() {
        let api = Arc::new(CountingApi::default());
        let poller = PollingFallback::new(api.clone(), "G1", PollingConfig::default().with_team(3));

        let outcome = poller.poll_once(&*accept_successes()).await;

        assert_eq!(outcome, RoundOutcome { attempted: 3, accepted: 2 });
        assert!(!outcome.all_accepted() && !outcome.none_accepted());
        let mut calls = api.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                "/apis/observer/G1/scoreboard".to_string(),
                "/apis/observer/G1/scoreboard/3".to_string(),
                "/apis/observer/G1/treasures_found/3".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_interval_until_stopped() {
        let api = Arc::new(CountingApi::default());
        let rounds = Arc::new(AtomicUsize::new(0));

        struct Counter(Arc<AtomicUsize>);
        impl PollSink for Counter {
            fn accept(&self, _kind: PullKind, _response: ApiResponse) -> bool {
                true
            }
            fn round_complete(&self, _outcome: RoundOutcome) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let handle = PollingFallback::new(
            api,
            "G1",
            PollingConfig::default().with_interval(Duration::from_secs(5)),
        )
        .start(Arc::new(Counter(rounds.clone())));

        // Rounds at t = 0, 5, 10.
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(rounds.load(Ordering::SeqCst), 3);
        assert!(handle.is_running());

        handle.stop();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rounds.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_sink_stops_the_loop() {
        struct Gone;
        impl PollSink for Gone {
            fn accept(&self, _kind: PullKind, _response: ApiResponse) -> bool {
                unreachable!("a dead sink is never fed")
            }
            fn is_alive(&self) -> bool {
                false
            }
        }

        let handle = PollingFallback::new(
            Arc::new(CountingApi::default()),
            "G1",
            PollingConfig::default(),
        )
        .start(Arc::new(Gone));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_running());
    }
}
