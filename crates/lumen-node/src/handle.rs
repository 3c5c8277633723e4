//! Request/response handle on the live ledger connection.
//!
//! A [`LedgerHandle`] exists only while the manager is connected. Requests
//! travel over an mpsc channel to the task that owns the socket, which stamps
//! an `id`, sends the payload and parks a oneshot in [`PendingRequests`] until
//! the response with the same `id` comes back.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use lumen_core::{LumenError, Result};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Requests buffered between callers and the socket task.
const REQUEST_QUEUE: usize = 64;

/// One request on its way to the socket task.
pub(crate) struct Request {
    pub(crate) payload: Value,
    pub(crate) reply: oneshot::Sender<Result<Value>>,
}

/// Cloneable handle for request/response traffic on the pinned endpoint.
#[derive(Clone)]
pub struct LedgerHandle {
    network: Arc<str>,
    url: Arc<str>,
    tx: mpsc::Sender<Request>,
    request_timeout: Duration,
}

impl LedgerHandle {
    /// New handle plus the receiving end for the socket task.
    pub(crate) fn channel(
        network: &str,
        url: &str,
        request_timeout: Duration,
    ) -> (Self, mpsc::Receiver<Request>) {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
        (Self { network: network.into(), url: url.into(), tx, request_timeout }, rx)
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Endpoint the handle talks to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// `false` once the session behind this handle has ended.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Send `payload` (a JSON object) and wait for the response carrying the
    /// same `id`. Any `id` already present is overwritten.
    pub async fn request(&self, payload: Value) -> Result<Value> {
        if !payload.is_object() {
            return Err(LumenError::Parse("request payload must be a JSON object".into()));
        }
        let (reply, rx) = oneshot::channel();
        self.tx.send(Request { payload, reply }).await.map_err(|_| LumenError::NotConnected)?;

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LumenError::NotConnected),
            Err(_) => Err(LumenError::RequestTimeout(self.request_timeout)),
        }
    }
}

impl std::fmt::Debug for LedgerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerHandle")
            .field("network", &self.network)
            .field("url", &self.url)
            .field("open", &self.is_open())
            .finish()
    }
}

/// In-flight requests of one session, keyed by the stamped `id`.
#[derive(Default)]
pub(crate) struct PendingRequests {
    next_id: u64,
    waiting: AHashMap<u64, oneshot::Sender<Result<Value>>>,
}

impl PendingRequests {
    /// Stamp the request with a fresh id, park its reply channel and return
    /// the text to put on the wire.
    pub(crate) fn register(&mut self, request: Request) -> String {
        // Callers that timed out have dropped their receiver.
        self.waiting.retain(|_, reply| !reply.is_closed());

        self.next_id += 1;
        let id = self.next_id;
        let Request { mut payload, reply } = request;
        if let Value::Object(map) = &mut payload {
            map.insert("id".into(), Value::from(id));
        }
        self.waiting.insert(id, reply);
        payload.to_string()
    }

    /// Hand a response to its waiter. Messages that are not responses come
    /// back as `Some` so they can be published as stream events.
    pub(crate) fn resolve(&mut self, message: Value) -> Option<Value> {
        let Some(id) = message.get("id").and_then(Value::as_u64) else {
            return Some(message);
        };
        match self.waiting.remove(&id) {
            Some(reply) => {
                let _ = reply.send(Ok(message));
            }
            None => debug!("[ecm] dropping response {id} with no waiting request"),
        }
        None
    }

    /// Fail every waiter. Called when the session ends.
    pub(crate) fn fail_all(&mut self) {
        for (_, reply) in self.waiting.drain() {
            let _ = reply.send(Err(LumenError::NotConnected));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.waiting.len()
    }
}
