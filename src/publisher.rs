//! Decoding and fan-out of inbound push frames.
//!
//! [`StatusPublisher`] classifies every raw text frame, consumes heartbeats,
//! decodes `game_status_update` payloads and hands the resulting
//! [`GameStatus`] to every registered subscriber in registration order.
//!
//! Subscriptions are RAII tokens: dropping a [`Subscription`] removes the
//! callback. Disconnecting the transport does not release them.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use crate::decoder::decode_game_status;
use crate::protocol::InboundFrame;
use crate::status::GameStatus;

type Callback = Arc<dyn Fn(&Arc<GameStatus>) + Send + Sync>;

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A heartbeat; consumed without notifying anyone.
    Heartbeat,
    /// A snapshot was decoded and handed to `notified` subscribers, of which
    /// `panicked` panicked.
    Delivered {
        /// Subscribers invoked.
        notified: usize,
        /// Subscribers whose callback panicked.
        panicked: usize,
    },
    /// The frame was not valid JSON.
    Malformed,
    /// The property-list payload failed to decode; the frame was dropped.
    DecodeFailed,
    /// A well-formed frame of an unrecognized kind.
    Ignored,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: BTreeMap<u64, Callback>,
}

struct Shared {
    registry: Mutex<Registry>,
    latest: watch::Sender<Option<Arc<GameStatus>>>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Callbacks never run under this lock, so poisoning carries no broken invariant.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fan-out hub for decoded game status snapshots.
///
/// Cloning is cheap and every clone shares the same subscriber set.
#[derive(Clone)]
pub struct StatusPublisher {
    shared: Arc<Shared>,
}

impl StatusPublisher {
    /// Create a publisher with no subscribers.
    pub fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                latest,
            }),
        }
    }

    /// Register a callback for every subsequently decoded snapshot.
    ///
    /// The callback stays registered until the returned [`Subscription`] is
    /// dropped or [`unsubscribe`](Subscription::unsubscribe)d.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Arc<GameStatus>) + Send + Sync + 'static,
    {
        let mut registry = self.shared.registry();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscribers.insert(id, Arc::new(callback));
        debug!(
            subscriber = id,
            subscribers = registry.subscribers.len(),
            "status subscriber added"
        );
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Receive snapshots over a bounded channel instead of a callback.
    ///
    /// When the receiver falls behind, snapshots are dropped with a warning
    /// rather than blocking delivery to other subscribers. Capacity is clamped
    /// to at least 1.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe_channel(
        &self,
        capacity: usize,
    ) -> (Subscription, mpsc::Receiver<Arc<GameStatus>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let subscription = self.subscribe(move |status| match tx.try_send(Arc::clone(status)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("status channel full, dropping snapshot");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("status channel closed, receiver dropped");
            }
        });
        (subscription, rx)
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared.registry().subscribers.len()
    }

    /// The most recently decoded snapshot.
    pub fn latest(&self) -> Option<Arc<GameStatus>> {
        self.shared.latest.borrow().clone()
    }

    /// Watch the most recent snapshot.
    pub fn watch(&self) -> watch::Receiver<Option<Arc<GameStatus>>> {
        self.shared.latest.subscribe()
    }

    /// Classify, decode and deliver one raw text frame.
    ///
    /// Never fails: malformed frames and payloads are logged and dropped.
    pub fn publish(&self, text: &str) -> FrameOutcome {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, len = text.len(), "failed to parse push frame");
                return FrameOutcome::Malformed;
            }
        };

        match frame {
            InboundFrame::Heartbeat { timestamp } => {
                debug!(?timestamp, "received heartbeat");
                FrameOutcome::Heartbeat
            }
            InboundFrame::GameStatusUpdate { data } => match decode_game_status(&data) {
                Ok(status) => self.publish_status(status),
                Err(e) => {
                    warn!(error = %e, len = data.len(), "discarding undecodable status payload");
                    FrameOutcome::DecodeFailed
                }
            },
            InboundFrame::Unknown { kind, event } => {
                debug!(?kind, ?event, "ignoring unknown push frame");
                FrameOutcome::Ignored
            }
        }
    }

    /// Deliver an already-decoded snapshot.
    ///
    /// Subscribers registered at the moment of the call are notified once
    /// each, in registration order. A panicking subscriber is logged and
    /// skipped.
    pub fn publish_status(&self, status: GameStatus) -> FrameOutcome {
        let status = Arc::new(status);
        self.shared.latest.send_replace(Some(Arc::clone(&status)));

        let callbacks: Vec<(u64, Callback)> = self
            .shared
            .registry()
            .subscribers
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        let mut panicked = 0;
        for (id, callback) in &callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&status))).is_err() {
                error!(subscriber = *id, "status subscriber panicked");
                panicked += 1;
            }
        }
        debug!(
            notified = callbacks.len(),
            panicked,
            teams = status.teams.len(),
            "delivered game status"
        );
        FrameOutcome::Delivered {
            notified: callbacks.len(),
            panicked,
        }
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StatusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPublisher")
            .field("subscribers", &self.subscriber_count())
            .field("has_latest", &self.latest().is_some())
            .finish()
    }
}

/// De-registration token returned by [`StatusPublisher::subscribe`].
///
/// Dropping it removes the callback.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Remove the callback now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            let mut registry = shared.registry();
            registry.subscribers.remove(&self.id);
            debug!(
                subscriber = self.id,
                subscribers = registry.subscribers.len(),
                "status subscriber removed"
            );
        }
    }
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn status_frame(score: &str) -> String {
        let plist = format!(
            r#"<plist version="1.0"><dict>
                <key>status_code</key><string>ONGOING</string>
                <key>teams_info</key><array><dict>
                    <key>id</key><string>1</string>
                    <key>score</key><string>{score}</string>
                </dict></array>
            </dict></plist>"#
        );
        serde_json::json!({"event": "game_status_update", "data": plist}).to_string()
    }

    fn recorder() -> (Arc<Mutex<Vec<i64>>>, impl Fn(&Arc<GameStatus>) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |status: &Arc<GameStatus>| {
            sink.lock().unwrap().push(status.teams[0].score_value());
        })
    }

    #[test]
    fn delivers_in_arrival_order() {
        let publisher = StatusPublisher::new();
        let (seen, cb) = recorder();
        let _sub = publisher.subscribe(cb);

        for score in ["1", "2", "3"] {
            publisher.publish(&status_frame(score));
        }
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn heartbeats_are_not_delivered() {
        let publisher = StatusPublisher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _sub = publisher.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let outcome = publisher.publish(r#"{"type":"heartbeat","timestamp":1}"#);
        assert_eq!(outcome, FrameOutcome::Heartbeat);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(publisher.latest().is_none());
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let publisher = StatusPublisher::new();
        let _first = publisher.subscribe(|_| panic!("subscriber bug"));
        let (seen, cb) = recorder();
        let _second = publisher.subscribe(cb);

        let outcome = publisher.publish(&status_frame("5"));
        assert_eq!(
            outcome,
            FrameOutcome::Delivered {
                notified: 2,
                panicked: 1
            }
        );
        assert_eq!(*seen.lock().unwrap(), vec![5]);

        // Still registered and still isolated on the next frame.
        publisher.publish(&status_frame("6"));
        assert_eq!(*seen.lock().unwrap(), vec![5, 6]);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let publisher = StatusPublisher::new();
        let (seen, cb) = recorder();
        let sub = publisher.subscribe(cb);
        assert_eq!(publisher.subscriber_count(), 1);

        publisher.publish(&status_frame("1"));
        sub.unsubscribe();
        assert_eq!(publisher.subscriber_count(), 0);
        publisher.publish(&status_frame("2"));

        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn subscriber_added_during_delivery_waits_for_next_frame() {
        let publisher = StatusPublisher::new();
        let late = Arc::new(AtomicUsize::new(0));
        let holder: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));

        let inner_publisher = publisher.clone();
        let inner_late = Arc::clone(&late);
        let inner_holder = Arc::clone(&holder);
        let _sub = publisher.subscribe(move |_| {
            let counter = Arc::clone(&inner_late);
            let sub = inner_publisher.subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            inner_holder.lock().unwrap().push(sub);
        });

        publisher.publish(&status_frame("1"));
        assert_eq!(late.load(Ordering::SeqCst), 0);
        publisher.publish(&status_frame("2"));
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bad_frames_are_dropped_without_delivery() {
        let publisher = StatusPublisher::new();
        let (seen, cb) = recorder();
        let _sub = publisher.subscribe(cb);

        assert_eq!(publisher.publish("{not json"), FrameOutcome::Malformed);
        let bad_payload =
            serde_json::json!({"event": "game_status_update", "data": "<plist><dict>"}).to_string();
        assert_eq!(publisher.publish(&bad_payload), FrameOutcome::DecodeFailed);
        assert_eq!(
            publisher.publish(r#"{"event":"something_else"}"#),
            FrameOutcome::Ignored
        );

        assert!(seen.lock().unwrap().is_empty());
        publisher.publish(&status_frame("4"));
        assert_eq!(*seen.lock().unwrap(), vec![4]);
    }

    #[test]
    fn latest_tracks_most_recent_snapshot() {
        let publisher = StatusPublisher::new();
        publisher.publish(&status_frame("2"));
        publisher.publish(&status_frame("9"));
        assert_eq!(publisher.latest().unwrap().teams[0].score_value(), 9);
    }

    #[tokio::test]
    async fn channel_subscription_receives_snapshots() {
        let publisher = StatusPublisher::new();
        let (_sub, mut rx) = publisher.subscribe_channel(4);
        publisher.publish(&status_frame("7"));
        let status = rx.recv().await.unwrap();
        assert_eq!(status.teams[0].score_value(), 7);
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let publisher = StatusPublisher::new();
        let (_sub, mut rx) = publisher.subscribe_channel(1);
        publisher.publish(&status_frame("1"));
        publisher.publish(&status_frame("2"));

        assert_eq!(rx.recv().await.unwrap().teams[0].score_value(), 1);
        assert!(rx.try_recv().is_err());
    }

    /// Records the field names of every event.
    #[derive(Clone, Default)]
    struct FieldNames(Arc<Mutex<Vec<&'static str>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for FieldNames {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut names = self.0.lock().unwrap();
            names.extend(event.metadata().fields().iter().map(|field| field.name()));
        }
    }

    #[test]
    fn malformed_frame_logs_its_length_not_its_body() {
        use tracing_subscriber::layer::SubscriberExt;

        let fields = FieldNames::default();
        let subscriber = tracing_subscriber::registry().with(fields.clone());
        let publisher = StatusPublisher::new();
        let huge = format!("<plist>{}", "x".repeat(64 * 1024));

        let outcome = tracing::subscriber::with_default(subscriber, || publisher.publish(&huge));

        assert_eq!(outcome, FrameOutcome::Malformed);
        let names = fields.0.lock().unwrap();
        assert!(names.contains(&"len"));
        assert!(!names.contains(&"raw"));
    }
}
