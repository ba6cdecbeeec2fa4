//! Marker transport seam
//!
//! The engine pushes outgoing markers to an external sink and receives
//! decoded prediction records push-style through subscribed handlers. The
//! concrete transport (LSL, network, in-process) lives with the host; this
//! module defines the traits plus [`LocalTransport`], an in-process
//! implementation used as the default wiring and by the test suites.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::marker::{decode, IncomingMarker, OutgoingMarker};

/// Stable key for one prediction subscription. Subscribing or unsubscribing
/// the same key twice is a no-op, which makes both calls idempotent.
pub type SubscriberId = Uuid;

/// Receives decoded prediction records, push-style.
///
/// Handlers are invoked synchronously from the transport's delivery cadence
/// and must not block; re-entrant start/stop from inside a handler must go
/// through the same replace-not-stack discipline the runner uses.
pub trait PredictionHandler: Send + Sync {
    /// A resolved classifier selection, zero-indexed.
    fn on_prediction(&self, selection: usize);
}

/// Bidirectional marker transport.
#[async_trait]
pub trait MarkerTransport: Send + Sync {
    /// Push one outgoing marker. Must tolerate the sink being temporarily
    /// absent: log and drop, never error.
    async fn push(&self, marker: &OutgoingMarker);

    /// Register a prediction handler under a caller-stable key.
    fn subscribe(&self, id: SubscriberId, handler: Arc<dyn PredictionHandler>);

    /// Remove the handler registered under `id`, if any.
    fn unsubscribe(&self, id: SubscriberId);
}

/// In-process marker transport.
///
/// Outgoing markers are serialized to their wire form and sent over an
/// unbounded flume channel; the receiver half is the sink (dropping it
/// models an absent sink). Incoming lines are fed through [`deliver`]
/// and dispatched to every subscribed handler.
///
/// [`deliver`]: LocalTransport::deliver
pub struct LocalTransport {
    outgoing: flume::Sender<String>,
    handlers: Mutex<HashMap<SubscriberId, Arc<dyn PredictionHandler>>>,
}

impl LocalTransport {
    /// Create a transport plus the receiver half of its outgoing stream.
    pub fn new() -> (Arc<Self>, flume::Receiver<String>) {
        let (tx, rx) = flume::unbounded();
        let transport = Arc::new(Self {
            outgoing: tx,
            handlers: Mutex::new(HashMap::new()),
        });
        (transport, rx)
    }

    /// Decode one incoming line and dispatch it. Predictions fan out to all
    /// subscribed handlers; everything else is logged and dropped.
    pub fn deliver(&self, line: &str) {
        match decode(line) {
            IncomingMarker::Prediction { selection } => {
                let handlers: Vec<Arc<dyn PredictionHandler>> = {
                    let guard = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
                    guard.values().cloned().collect()
                };
                if handlers.is_empty() {
                    debug!(selection, "prediction received with no subscribers");
                }
                for handler in handlers {
                    handler.on_prediction(selection);
                }
            }
            IncomingMarker::Ping => debug!("transport keepalive"),
            IncomingMarker::Unparsed(text) => {
                warn!(%text, "dropping unparsed incoming record");
            }
            other => debug!(?other, "ignoring echoed marker"),
        }
    }
}

#[async_trait]
impl MarkerTransport for LocalTransport {
    async fn push(&self, marker: &OutgoingMarker) {
        if self.outgoing.send(marker.to_wire()).is_err() {
            debug!("marker sink absent, dropping outgoing marker");
        }
    }

    fn subscribe(&self, id: SubscriberId, handler: Arc<dyn PredictionHandler>) {
        let mut guard = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(id, handler);
    }

    fn unsubscribe(&self, id: SubscriberId) {
        let mut guard = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(&id);
    }
}
