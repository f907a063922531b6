//! JSON frame types for the game-status push channel.
//!
//! Two inbound shapes share the socket and are told apart by their
//! discriminating key:
//!
//! - `{"type": "heartbeat", "timestamp": 1761639609000}`
//! - `{"event": "game_status_update", "data": "<?xml ...?><plist>...</plist>"}`
//!
//! The only outbound frame is the heartbeat.

use serde::{Deserialize, Serialize};

/// Event name carried by status update frames.
pub const GAME_STATUS_UPDATE: &str = "game_status_update";

/// Value of the `type` key on heartbeat frames.
pub const HEARTBEAT: &str = "heartbeat";

/// Frames the client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Liveness ping, sent on the heartbeat interval while open.
    Heartbeat {
        /// Milliseconds since the Unix epoch.
        timestamp: i64,
    },
}

impl OutboundFrame {
    /// A heartbeat stamped with the current wall-clock time.
    pub fn heartbeat_now() -> Self {
        Self::Heartbeat {
            timestamp: now_millis(),
        }
    }
}

/// Frames received from the server, after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Server heartbeat. Consumed internally.
    Heartbeat {
        /// Server timestamp, if one was sent.
        timestamp: Option<i64>,
    },
    /// A serialized property-list snapshot of the game.
    GameStatusUpdate {
        /// The property-list document.
        data: String,
    },
    /// Any well-formed JSON frame that is neither of the above.
    Unknown {
        /// The `type` key, if present.
        kind: Option<String>,
        /// The `event` key, if present.
        event: Option<String>,
    },
}

/// Loose superset of every inbound shape; missing keys are `None`.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    event: Option<String>,
    timestamp: Option<i64>,
    data: Option<String>,
}

impl InboundFrame {
    /// Parse and classify a raw text frame.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the text is not a JSON object.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawFrame = serde_json::from_str(text)?;
        Ok(match (raw.kind, raw.event, raw.data) {
            (Some(kind), _, _) if kind == HEARTBEAT => Self::Heartbeat {
                timestamp: raw.timestamp,
            },
            (_, Some(event), Some(data)) if event == GAME_STATUS_UPDATE => {
                Self::GameStatusUpdate { data }
            }
            (kind, event, _) => Self::Unknown { kind, event },
        })
    }
}

/// Milliseconds since the Unix epoch, saturating on clock errors.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
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
    fn outbound_heartbeat_shape() {
        let json = serde_json::to_value(OutboundFrame::Heartbeat { timestamp: 42 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "heartbeat", "timestamp": 42}));
    }

    #[test]
    fn heartbeat_now_is_recent() {
        let OutboundFrame::Heartbeat { timestamp } = OutboundFrame::heartbeat_now();
        // 2020-01-01T00:00:00Z
        assert!(timestamp > 1_577_836_800_000);
    }

    #[test]
    fn classifies_heartbeat() {
        let frame = InboundFrame::parse(r#"{"type":"heartbeat","timestamp":1761639609000}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Heartbeat {
                timestamp: Some(1761639609000)
            }
        );
    }

    #[test]
    fn classifies_status_update() {
        let frame =
            InboundFrame::parse(r#"{"event":"game_status_update","data":"<plist/>"}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::GameStatusUpdate {
                data: "<plist/>".into()
            }
        );
    }

    #[test]
    fn status_update_without_data_is_unknown() {
        let frame = InboundFrame::parse(r#"{"event":"game_status_update"}"#).unwrap();
        assert!(matches!(frame, InboundFrame::Unknown { .. }));
    }

    #[test]
    fn unrelated_event_is_unknown() {
        let frame = InboundFrame::parse(r#"{"event":"chat","data":"hi"}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Unknown {
                kind: None,
                event: Some("chat".into())
            }
        );
    }

    #[test]
    fn non_json_is_an_error() {
        assert!(InboundFrame::parse("not json").is_err());
        assert!(InboundFrame::parse("[1,2]").is_err());
    }
}
