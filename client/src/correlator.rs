//! Client-side request correlator for reverse-proxy (`$dispatch$`) mode
//! (§4.4, §4.7). Mirrors `server::correlator::RequestCorrelator` — the
//! shape is identical on both sides of the control channel, just keyed
//! to whichever requests *this* process originated.

use dashmap::DashMap;
use tokio::sync::oneshot;
use tunnel_protocol::HttpResponseEnvelope;

struct PendingDispatch {
    reply: oneshot::Sender<HttpResponseEnvelope>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchCorrelatorError {
    #[error("dispatch request id '{0}' collided with an already-pending request")]
    Collision(String),
}

/// Concurrent table of `$dispatch$` requests this client originated
/// (via its optional reverse-proxy listener) and is waiting on a
/// `$dispatchresponse$` for.
pub struct DispatchCorrelator {
    pending: DashMap<String, PendingDispatch>,
}

impl DispatchCorrelator {
    pub fn new() -> Self {
        Self { pending: DashMap::new() }
    }

    pub fn insert(&self, id: String) -> Result<oneshot::Receiver<HttpResponseEnvelope>, DispatchCorrelatorError> {
        let (tx, rx) = oneshot::channel();
        match self.pending.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(DispatchCorrelatorError::Collision(id)),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(PendingDispatch { reply: tx });
                Ok(rx)
            }
        }
    }

    pub fn complete(&self, id: &str, response: HttpResponseEnvelope) -> bool {
        match self.pending.remove(id) {
            Some((_, pending)) => {
                let _ = pending.reply.send(response);
                true
            }
            None => false,
        }
    }

    pub fn forget(&self, id: &str) {
        self.pending.remove(id);
    }

    /// Fails every outstanding reverse-proxy request — called when the
    /// control channel ends before every in-flight dispatch was answered
    /// (§4.6 "Draining: ... fail all pending requests with 503").
    pub fn drain(&self, build_response: impl Fn(&str) -> HttpResponseEnvelope) {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.reply.send(build_response(&id));
            }
        }
    }
}

impl Default for DispatchCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
