//! Per-session fan-out of events to open push channels.
//!
//! Each session owns a set of channels (one per connected observer). A
//! publish serializes the event once and writes the same frame to every
//! channel registered at that moment. Delivery is best-effort: a channel
//! whose write fails is dropped and its client is expected to reconnect.
//!
//! ```text
//! subscribe(sid, sink) ---> channels[sid] += (id, sink)
//! publish(sid, event)  ---> json = serialize(event)
//!                           for sink in snapshot(channels[sid]): sink.write(json)
//!                           failed ids -> removed
//! unsubscribe(sid, id) ---> channels[sid] -= id   (no-op when absent)
//! ```

pub mod event;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;

pub use event::BroadcastEvent;

/// A write to a closed or broken channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("push channel closed")]
pub struct ChannelClosed;

/// The writable end of one observer's push channel.
pub trait EventSink: Send + Sync {
    /// Deliver one serialized event.
    fn write(&self, frame: &str) -> Result<(), ChannelClosed>;
}

impl EventSink for mpsc::UnboundedSender<String> {
    fn write(&self, frame: &str) -> Result<(), ChannelClosed> {
        self.send(frame.to_string()).map_err(|_| ChannelClosed)
    }
}

/// Identifier of one registered channel, unique within a [`Broadcaster`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

type Channels = Vec<(ChannelId, Arc<dyn EventSink>)>;

/// The broadcast manager: session id to open channels.
#[derive(Default)]
pub struct Broadcaster {
    sessions: RwLock<HashMap<String, Channels>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<&str, usize> = sessions
            .iter()
            .map(|(sid, channels)| (sid.as_str(), channels.len()))
            .collect();
        f.debug_struct("Broadcaster")
            .field("channels", &counts)
            .finish()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel for a session.
    pub fn subscribe(&self, session_id: &str, sink: impl EventSink + 'static) -> ChannelId {
        let id = ChannelId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions
            .entry(session_id.to_string())
            .or_default()
            .push((id, Arc::new(sink)));
        tracing::debug!(session_id, channel = id.0, "channel subscribed");
        id
    }

    /// Register a channel that unsubscribes itself when the returned guard
    /// is dropped.
    pub fn subscribe_guarded(
        self: &Arc<Self>,
        session_id: &str,
        sink: impl EventSink + 'static,
    ) -> Subscription {
        let id = self.subscribe(session_id, sink);
        Subscription {
            broadcaster: Arc::clone(self),
            session_id: session_id.to_string(),
            id,
        }
    }

    /// Remove a channel. Removing an unknown channel is a no-op.
    pub fn unsubscribe(&self, session_id: &str, id: ChannelId) {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let Some(channels) = sessions.get_mut(session_id) else {
            return;
        };
        let before = channels.len();
        channels.retain(|(cid, _)| *cid != id);
        if channels.len() != before {
            tracing::debug!(session_id, channel = id.0, "channel unsubscribed");
        }
        if channels.is_empty() {
            sessions.remove(session_id);
        }
    }

    /// Serialize `event` and write it to every open channel of the session.
    ///
    /// Returns the number of channels the frame was delivered to. Channels
    /// whose write fails are removed.
    pub fn publish(&self, session_id: &str, event: &BroadcastEvent) -> usize {
        let targets: Channels = {
            let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            match sessions.get(session_id) {
                Some(channels) => channels.clone(),
                None => return 0,
            }
        };

        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(session_id, error = %e, "failed to serialize broadcast event");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, sink) in &targets {
            match sink.write(&frame) {
                Ok(()) => delivered += 1,
                Err(ChannelClosed) => failed.push(*id),
            }
        }

        for id in &failed {
            self.unsubscribe(session_id, *id);
        }

        tracing::debug!(
            session_id,
            kind = event.kind(),
            delivered,
            dropped = failed.len(),
            "published event"
        );
        delivered
    }

    /// Number of open channels for a session.
    pub fn channel_count(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .map_or(0, Vec::len)
    }
}

/// A registered channel that is removed from its broadcaster on drop.
#[derive(Debug)]
pub struct Subscription {
    broadcaster: Arc<Broadcaster>,
    session_id: String,
    id: ChannelId,
}

impl Subscription {
    pub fn id(&self) -> ChannelId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(&self.session_id, self.id);
    }
}
