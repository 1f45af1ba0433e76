//! Progress broadcaster: fan structured events out to whoever is watching
//! an operation.
//!
//! Fire-and-forget: no history, no buffering. A sink that fails a send is
//! dropped from the set; detached or vanished subscribers are never an
//! error. The subscriber list is copied under a short lock and sends happen
//! outside it, so one slow sink cannot block attachment.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::error::{ControlError, Result};
use crate::playbook::progress::ProgressEvent;

#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: &ProgressEvent) -> Result<()>;
}

struct Subscriber {
    id: Uuid,
    sink: Arc<dyn EventSink>,
}

#[derive(Default)]
pub struct ProgressBroadcaster {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attach(&self, op_id: &str, sink: Arc<dyn EventSink>) -> Uuid {
        let id = Uuid::new_v4();
        let mut subs = self.subscribers.lock().await;
        subs.entry(op_id.to_string())
            .or_default()
            .push(Subscriber { id, sink });
        tracing::debug!(op_id = %op_id, subscriber = %id, "subscriber attached");
        id
    }

    pub async fn detach(&self, op_id: &str, subscriber_id: Uuid) {
        let mut subs = self.subscribers.lock().await;
        if let Some(list) = subs.get_mut(op_id) {
            list.retain(|s| s.id != subscriber_id);
            if list.is_empty() {
                subs.remove(op_id);
            }
        }
    }

    pub async fn broadcast(&self, op_id: &str, event: &ProgressEvent) {
        let targets: Vec<(Uuid, Arc<dyn EventSink>)> = {
            let subs = self.subscribers.lock().await;
            match subs.get(op_id) {
                Some(list) => list.iter().map(|s| (s.id, s.sink.clone())).collect(),
                None => return,
            }
        };

        let mut failed = Vec::new();
        for (id, sink) in targets {
            if let Err(e) = sink.send(event).await {
                tracing::debug!(op_id = %op_id, subscriber = %id, error = %e, "dropping subscriber");
                failed.push(id);
            }
        }

        if !failed.is_empty() {
            let mut subs = self.subscribers.lock().await;
            if let Some(list) = subs.get_mut(op_id) {
                list.retain(|s| !failed.contains(&s.id));
                if list.is_empty() {
                    subs.remove(op_id);
                }
            }
        }
    }

    pub async fn subscriber_count(&self, op_id: &str) -> usize {
        self.subscribers
            .lock()
            .await
            .get(op_id)
            .map_or(0, Vec::len)
    }
}

/// Sink backed by an unbounded channel; the WS handler pumps the receiver
/// into the socket. A dropped receiver turns the next send into a prune.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl EventSink for ChannelSink {
    async fn send(&self, event: &ProgressEvent) -> Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| ControlError::Internal("subscriber channel closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        events: StdMutex<Vec<ProgressEvent>>,
        fail: bool,
    }

    impl RecordingSink {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                events: StdMutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait::async_trait]
    impl EventSink for RecordingSink {
        async fn send(&self, event: &ProgressEvent) -> Result<()> {
            if self.fail {
                return Err(ControlError::Internal("sink broken".into()));
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn event(stage: &str) -> ProgressEvent {
        ProgressEvent {
            stage: stage.to_string(),
            message: format!("{stage} message"),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers() {
        let broadcaster = ProgressBroadcaster::new();
        let a = RecordingSink::new(false);
        let b = RecordingSink::new(false);
        broadcaster.attach("run-1", a.clone()).await;
        broadcaster.attach("run-1", b.clone()).await;

        broadcaster.broadcast("run-1", &event("slm_syncing")).await;

        assert_eq!(a.events.lock().unwrap().len(), 1);
        assert_eq!(b.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failing_subscriber_is_pruned() {
        let broadcaster = ProgressBroadcaster::new();
        let good = RecordingSink::new(false);
        let bad = RecordingSink::new(true);
        broadcaster.attach("run-1", good.clone()).await;
        broadcaster.attach("run-1", bad).await;
        assert_eq!(broadcaster.subscriber_count("run-1").await, 2);

        broadcaster.broadcast("run-1", &event("play1_start")).await;
        assert_eq!(broadcaster.subscriber_count("run-1").await, 1);

        // The survivor keeps receiving.
        broadcaster.broadcast("run-1", &event("complete")).await;
        assert_eq!(good.events.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn events_are_scoped_to_their_operation() {
        let broadcaster = ProgressBroadcaster::new();
        let a = RecordingSink::new(false);
        broadcaster.attach("run-1", a.clone()).await;

        broadcaster.broadcast("run-2", &event("complete")).await;
        assert!(a.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn detach_removes_subscriber() {
        let broadcaster = ProgressBroadcaster::new();
        let a = RecordingSink::new(false);
        let id = broadcaster.attach("run-1", a.clone()).await;
        broadcaster.detach("run-1", id).await;

        broadcaster.broadcast("run-1", &event("complete")).await;
        assert!(a.events.lock().unwrap().is_empty());
        assert_eq!(broadcaster.subscriber_count("run-1").await, 0);
    }

    #[tokio::test]
    async fn channel_sink_delivers_until_receiver_drops() {
        let broadcaster = ProgressBroadcaster::new();
        let (sink, mut rx) = ChannelSink::new();
        broadcaster.attach("run-1", Arc::new(sink)).await;

        broadcaster.broadcast("run-1", &event("slm_syncing")).await;
        assert_eq!(rx.recv().await.unwrap().stage, "slm_syncing");

        drop(rx);
        broadcaster.broadcast("run-1", &event("complete")).await;
        assert_eq!(broadcaster.subscriber_count("run-1").await, 0);
    }
}
