//! Per-session SSE fan-out.
//!
//! Exactly one subscriber per session: the orchestrator publishes into
//! a bounded channel, the stream handler takes the sole receiver. A
//! subscriber that stalls a single event write past the slow-consumer
//! window gets the session cancelled rather than blocking inference.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use sy_domain::events::SynergyEvent;
use sy_domain::{Error, Result};

/// Events buffered between the orchestrator and the socket.
const CHANNEL_DEPTH: usize = 256;

struct SessionChannel {
    tx: mpsc::Sender<SynergyEvent>,
    /// Present until the single subscriber claims it.
    rx: Option<mpsc::Receiver<SynergyEvent>>,
}

pub struct StreamHub {
    channels: Mutex<HashMap<String, SessionChannel>>,
    slow_consumer: Duration,
}

impl StreamHub {
    pub fn new(slow_consumer: Duration) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            slow_consumer,
        }
    }

    /// Open the session's channel and return the publisher half. An
    /// existing channel for the id is replaced.
    pub fn register(&self, session_id: &str) -> SessionPublisher {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        self.channels.lock().insert(
            session_id.to_owned(),
            SessionChannel {
                tx: tx.clone(),
                rx: Some(rx),
            },
        );
        SessionPublisher {
            session_id: session_id.to_owned(),
            tx,
            slow_consumer: self.slow_consumer,
        }
    }

    /// Claim the sole receiver for a session. Returns `None` when the
    /// session has no channel or another subscriber already claimed it.
    pub fn take_receiver(&self, session_id: &str) -> Option<mpsc::Receiver<SynergyEvent>> {
        self.channels
            .lock()
            .get_mut(session_id)
            .and_then(|c| c.rx.take())
    }

    /// Tear down the session's channel.
    pub fn remove(&self, session_id: &str) {
        self.channels.lock().remove(session_id);
    }

    pub fn session_count(&self) -> usize {
        self.channels.lock().len()
    }
}

/// The orchestrator's handle for one session's event stream.
#[derive(Clone)]
pub struct SessionPublisher {
    session_id: String,
    tx: mpsc::Sender<SynergyEvent>,
    slow_consumer: Duration,
}

impl SessionPublisher {
    /// Publish one event.
    ///
    /// Errors when the subscriber disconnected or stalled past the
    /// slow-consumer window; the caller cancels the session.
    pub async fn publish(&self, event: SynergyEvent) -> Result<()> {
        let event_type = event.type_name();
        match tokio::time::timeout(self.slow_consumer, self.tx.send(event)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    event_type,
                    "subscriber too slow, cancelling session"
                );
                Err(Error::Cancelled)
            }
        }
    }

    /// Best-effort publish for terminal events, where the subscriber may
    /// already be gone.
    pub async fn publish_final(&self, event: SynergyEvent) {
        if let Err(e) = self.publish(event).await {
            tracing::debug!(session_id = %self.session_id, error = %e, "final event dropped");
        }
    }
}
