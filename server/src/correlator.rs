//! The request correlator (§4.7): a concurrent table of pending public
//! HTTP requests keyed by request id, completed at most once.

use dashmap::DashMap;
use tokio::sync::oneshot;
use tunnel_protocol::HttpResponseEnvelope;

struct PendingRequest {
    reply: oneshot::Sender<HttpResponseEnvelope>,
}

/// Concurrent mapping from request id to a one-shot completion handle
/// (§4.7). Collisions on insert are vanishingly unlikely with UUIDv4 ids
/// but are treated as a fatal invariant violation rather than silently
/// overwriting a live request — see [`CorrelatorError::Collision`].
pub struct RequestCorrelator {
    pending: DashMap<String, PendingRequest>,
}

#[derive(Debug, thiserror::Error)]
pub enum CorrelatorError {
    #[error("request id '{0}' collided with an already-pending request")]
    Collision(String),
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self { pending: DashMap::new() }
    }

    /// Registers a new pending request. Returns the receiver the caller
    /// awaits (with its own deadline) for the eventual response.
    pub fn insert(&self, id: String) -> Result<oneshot::Receiver<HttpResponseEnvelope>, CorrelatorError> {
        let (tx, rx) = oneshot::channel();
        match self.pending.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(CorrelatorError::Collision(id)),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(PendingRequest { reply: tx });
                Ok(rx)
            }
        }
    }

    /// Delivers a response to its waiting request. Returns whether the
    /// id was still present — a response for an unknown or
    /// already-completed id is logged by the caller and discarded
    /// (§4.3 "A response for an unknown id is logged and discarded").
    pub fn complete(&self, id: &str, response: HttpResponseEnvelope) -> bool {
        match self.pending.remove(id) {
            Some((_, pending)) => {
                let _ = pending.reply.send(response);
                true
            }
            None => false,
        }
    }

    /// Removes a single pending request without delivering a response —
    /// used when the caller's own deadline has already fired and it is
    /// about to synthesize the timeout response itself.
    pub fn forget(&self, id: &str) {
        self.pending.remove(id);
    }

    /// Fails every outstanding request with the same synthetic response
    /// (§4.6 "Draining: ... fail all pending requests with 503";
    /// §4.3 "On tunnel death, all pending requests are fulfilled with
    /// HTTP 503").
    pub fn drain(&self, build_response: impl Fn(&str) -> HttpResponseEnvelope) {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.reply.send(build_response(&id));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(id: &str) -> HttpResponseEnvelope {
        HttpResponseEnvelope {
            request_id: id.to_string(),
            status_code: 200,
            headers: Default::default(),
            body: Vec::new(),
            error_message: None,
        }
    }

    #[tokio::test]
    async fn complete_delivers_exactly_once() {
        let correlator = RequestCorrelator::new();
        let rx = correlator.insert("r1".into()).unwrap();
        assert!(correlator.complete("r1", envelope("r1")));
        // Second completion for the same id: already removed, discarded.
        assert!(!correlator.complete("r1", envelope("r1")));
        let resp = rx.await.unwrap();
        assert_eq!(resp.request_id, "r1");
    }

    #[test]
    fn insert_collision_is_reported_not_silently_overwritten() {
        let correlator = RequestCorrelator::new();
        let _rx = correlator.insert("dup".into()).unwrap();
        let err = correlator.insert("dup".into()).unwrap_err();
        assert!(matches!(err, CorrelatorError::Collision(id) if id == "dup"));
    }

    #[tokio::test]
    async fn drain_fails_every_outstanding_request() {
        let correlator = RequestCorrelator::new();
        let rx1 = correlator.insert("a".into()).unwrap();
        let rx2 = correlator.insert("b".into()).unwrap();
        correlator.drain(|id| envelope(id));
        assert_eq!(rx1.await.unwrap().request_id, "a");
        assert_eq!(rx2.await.unwrap().request_id, "b");
        assert_eq!(correlator.len(), 0);
    }
}
