//! # Watch Scoreboard Example
//!
//! Follows a running game and prints the standings whenever they change:
//!
//! 1. Share the game's push channel through a connection registry
//! 2. Load the observer endpoints into a scoreboard session
//! 3. Fall back to polling if the push channel cannot be opened
//! 4. Print the top teams and the focus team on every view update
//! 5. Shut down gracefully on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! GAME_INSTANCE=48213 GAME_CODE=ABC123 TEAM_ID=7 cargo run --example watch_scoreboard
//!
//! # Point at other servers:
//! SCOREBOARD_WS=ws://localhost:8000 SCOREBOARD_API=http://localhost:3000/api \
//!     GAME_INSTANCE=1 GAME_CODE=DEMO cargo run --example watch_scoreboard
//! ```

use std::sync::Arc;
use std::time::Duration;

use scoreboard_sync::{
    ApiConfig, ConnectionRegistry, FocusTeam, HttpObserverApi, ScoreboardSession, SessionConfig,
    SyncConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=scoreboard_sync=debug` to see every frame and pull.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let instance = std::env::var("GAME_INSTANCE").unwrap_or_else(|_| "1".to_string());
    let code = std::env::var("GAME_CODE").unwrap_or_else(|_| "DEMO".to_string());
    let team_id = std::env::var("TEAM_ID").ok().and_then(|t| t.parse::<i64>().ok());

    let mut sync_config = SyncConfig::default();
    if let Ok(ws) = std::env::var("SCOREBOARD_WS") {
        sync_config = sync_config.with_ws_base_url(ws);
    }
    let api_config = std::env::var("SCOREBOARD_API")
        .map(ApiConfig::new)
        .unwrap_or_default();

    // ── Session ─────────────────────────────────────────────────────
    let api = Arc::new(HttpObserverApi::new(api_config)?);
    let mut session_config = SessionConfig::new(code);
    if let Some(id) = team_id {
        session_config = session_config.with_team(id);
    }
    let session = ScoreboardSession::new(session_config, api);

    // ── Push channel, or polling if it is unavailable ───────────────
    let registry = ConnectionRegistry::websocket(sync_config);
    let mut _poller = None;
    let connection = match registry.acquire(&instance).await {
        Ok(connection) => Some(connection),
        Err(e) => {
            tracing::warn!("Push channel unavailable ({e}), polling instead");
            _poller = Some(session.start_polling(Duration::from_secs(5)));
            None
        }
    };
    let _attached = connection.as_ref().map(|c| session.attach(c.publisher()));

    session.load().await;
    tracing::info!("Session {:?}", session.phase());

    // ── Render loop ─────────────────────────────────────────────────
    let mut views = session.watch();
    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();

                println!("── {} ──", view.status_code.as_deref().unwrap_or("scoreboard"));
                for (rank, team) in view.top_teams(5).iter().enumerate() {
                    let flag = if team.has_finished { " ✓" } else { "" };
                    println!("{:>2}. {:<20} {:>6}{flag}", rank + 1, team.name, team.score);
                }
                match &view.focus_team {
                    FocusTeam::Found(team) => println!(
                        "Your team: {} with {} points, {} treasure(s) worth {}",
                        team.name,
                        team.score,
                        view.discovered_treasures.len(),
                        view.discovered_score,
                    ),
                    FocusTeam::Pending { team_id } => println!("Locating team {team_id}..."),
                    FocusTeam::NotFound { team_id } => println!("Team {team_id} not found"),
                    FocusTeam::NotRequested => {}
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    session.close();
    if let Some(connection) = connection {
        connection.release().await;
    }
    Ok(())
}
