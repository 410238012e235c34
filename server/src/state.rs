//! Shared application state: the tunnel registry and per-tunnel records
//! (§3 "Tunnel record", §4.2 "Tunnel registry").
//!
//! Generalizes the teacher's `AppState` (`agents: Arc<DashMap<...>>`,
//! `sessions: Arc<DashMap<...>>`) into a single registry keyed by tunnel
//! id, since the spec's tunnel concept subsumes both the teacher's
//! "agent" (a registered endpoint) and "session" (one routed request)
//! notions — a tunnel here carries both HTTP pending-requests and TCP
//! sub-streams over the one control channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tunnel_protocol::Frame;

use crate::config::AppConfig;
use crate::correlator::RequestCorrelator;
use crate::error::RegistryError;

/// Which public surface a control channel was opened for. A single
/// control channel serves one kind at a time; both kinds still share
/// the frame codec and the outbound send discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelKind {
    Http,
    Tcp,
}

/// One multiplexed TCP sub-stream on the server side (§3 "TCP sub-stream").
pub struct TcpStreamHandle {
    /// Decoded bytes arriving from the client are pushed here; a writer
    /// task owns the public socket's write half and drains this queue.
    pub data_tx: mpsc::UnboundedSender<Vec<u8>>,
    pub last_activity: AsyncMutex<Instant>,
    /// Aborted when the client closes or errors the stream, or when the
    /// tunnel itself tears down.
    pub reader_handle: JoinHandle<()>,
}

/// The tunnel record (§3). Owned exclusively by its processing loop;
/// the registry holds only a non-owning `Arc` clone (§3 "Ownership").
pub struct TunnelRecord {
    pub id: String,
    pub kind: TunnelKind,
    outbound: mpsc::UnboundedSender<Frame>,
    last_activity: AsyncMutex<Instant>,
    request_count: AtomicU64,
    pub pending_pings: AtomicU64,
    pub tcp_streams: DashMap<String, TcpStreamHandle>,
    /// Pending public/dispatch requests awaiting a response *on this
    /// tunnel's own control channel* (§3 "request id is unique across a
    /// tunnel"). Scoped per-tunnel rather than server-wide so that one
    /// tunnel's disconnect only fails the requests it owns (§4.3 "On
    /// tunnel death, all pending requests are fulfilled with HTTP 503") —
    /// a server-wide table would wrongly 503 every other tunnel's
    /// in-flight requests too.
    pub correlator: RequestCorrelator,
    pub cancel: CancellationToken,
    disposed: AtomicBool,
}

impl TunnelRecord {
    pub fn new(id: String, kind: TunnelKind, outbound: mpsc::UnboundedSender<Frame>) -> Arc<Self> {
        Arc::new(Self {
            id,
            kind,
            outbound,
            last_activity: AsyncMutex::new(Instant::now()),
            request_count: AtomicU64::new(0),
            pending_pings: AtomicU64::new(0),
            tcp_streams: DashMap::new(),
            correlator: RequestCorrelator::new(),
            cancel: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        })
    }

    /// Serializes all outbound sends through one channel so frames are
    /// never interleaved on the wire (§5 "Shared-resource policy").
    pub fn send(&self, frame: Frame) -> Result<(), mpsc::error::SendError<Frame>> {
        self.outbound.send(frame)
    }

    pub async fn touch(&self) {
        *self.last_activity.lock().await = Instant::now();
        self.pending_pings.store(0, Ordering::SeqCst);
    }

    pub async fn idle_for(&self) -> Duration {
        self.last_activity.lock().await.elapsed()
    }

    pub fn record_completed_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn mark_disposed(&self) -> bool {
        !self.disposed.swap(true, Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Tears down every sub-stream and cancels all work anchored to this
    /// tunnel (§5 "Cancellation and timeouts": the root token propagates
    /// to the processing loop, heartbeat task, sub-streams, and pending
    /// requests).
    pub fn shutdown(&self) {
        self.cancel.cancel();
        for entry in self.tcp_streams.iter() {
            entry.value().reader_handle.abort();
        }
        self.tcp_streams.clear();
    }
}

/// Point-in-time view of a tunnel for `/$status` and the idle reaper (§4.2 `snapshot`).
#[derive(Debug, Clone)]
pub struct TunnelSummary {
    pub id: String,
    pub kind_label: &'static str,
    pub request_count: u64,
    pub active_streams: usize,
}

/// In-memory mapping from tunnel id to active tunnel (§4.2).
pub struct TunnelRegistry {
    tunnels: DashMap<String, Arc<TunnelRecord>>,
    single_tunnel: bool,
}

impl TunnelRegistry {
    pub fn new(single_tunnel: bool) -> Self {
        Self {
            tunnels: DashMap::new(),
            single_tunnel,
        }
    }

    pub fn register(&self, id: String, record: Arc<TunnelRecord>) -> Result<(), RegistryError> {
        if self.single_tunnel && !self.tunnels.is_empty() {
            return Err(RegistryError::SingleTunnelOccupied);
        }
        if record.kind == TunnelKind::Tcp && self.tunnels.iter().any(|e| e.value().kind == TunnelKind::Tcp) {
            return Err(RegistryError::TcpConflict);
        }
        match self.tunnels.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RegistryError::IdInUse(id)),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(record);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<TunnelRecord>> {
        self.tunnels.get(id).map(|e| e.value().clone())
    }

    /// Public-ingress lookup: ignores the requested id and returns the
    /// sole tunnel when in single-tunnel mode (§4.2, §4.3).
    pub fn resolve_public(&self, requested_id: Option<&str>) -> Option<Arc<TunnelRecord>> {
        if self.single_tunnel {
            self.tunnels.iter().next().map(|e| e.value().clone())
        } else {
            requested_id.and_then(|id| self.lookup(id))
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        if let Some((_, record)) = self.tunnels.remove(id) {
            record.shutdown();
            true
        } else {
            false
        }
    }

    pub fn is_single_tunnel(&self) -> bool {
        self.single_tunnel
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn snapshot(&self) -> Vec<TunnelSummary> {
        self.tunnels
            .iter()
            .map(|e| {
                let r = e.value();
                TunnelSummary {
                    id: r.id.clone(),
                    kind_label: match r.kind {
                        TunnelKind::Http => "http",
                        TunnelKind::Tcp => "tcp",
                    },
                    request_count: r.request_count(),
                    active_streams: r.tcp_streams.len(),
                }
            })
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.tunnels.iter().map(|e| e.key().clone()).collect()
    }
}

/// Mints a UUID fallback id when the client's connect query string
/// omits one (§4.2 "if absent, the server mints a UUID").
pub fn mint_tunnel_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A pluggable authentication check run against the requested tunnel id
/// before registration (§6 "the server MAY reject upgrade ... if
/// authentication fails"). This is a seam, not a scheme: no concrete
/// auth mechanism is specified, so embedders supply their own closure.
pub type AuthHook = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// The full application state threaded through every axum handler.
/// The request correlator lives on [`TunnelRecord`] instead of here — see
/// its field doc comment.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<TunnelRegistry>,
    pub http_client: reqwest::Client,
    /// `None` admits every connect attempt, matching the spec's "no
    /// strong authentication by default".
    pub auth_hook: Option<AuthHook>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let registry = Arc::new(TunnelRegistry::new(config.single_tunnel));
        Self {
            config: Arc::new(config),
            registry,
            http_client: reqwest::Client::new(),
            auth_hook: None,
        }
    }

    /// Installs an authentication hook: a closure run with the requested
    /// tunnel id before registration, returning `false` to reject the
    /// upgrade with a policy-violation close.
    pub fn with_auth_hook(mut self, hook: AuthHook) -> Self {
        self.auth_hook = Some(hook);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_record(id: &str, kind: TunnelKind) -> Arc<TunnelRecord> {
        let (tx, _rx) = mpsc::unbounded_channel();
        TunnelRecord::new(id.to_string(), kind, tx)
    }

    #[test]
    fn register_rejects_duplicate_ids() {
        let registry = TunnelRegistry::new(false);
        registry.register("a".into(), dummy_record("a", TunnelKind::Http)).unwrap();
        let err = registry.register("a".into(), dummy_record("a", TunnelKind::Http)).unwrap_err();
        assert_eq!(err, RegistryError::IdInUse("a".into()));
    }

    #[test]
    fn single_tunnel_mode_rejects_second_registration() {
        let registry = TunnelRegistry::new(true);
        registry.register("a".into(), dummy_record("a", TunnelKind::Http)).unwrap();
        let err = registry.register("b".into(), dummy_record("b", TunnelKind::Http)).unwrap_err();
        assert_eq!(err, RegistryError::SingleTunnelOccupied);
    }

    #[test]
    fn single_tunnel_mode_resolves_any_requested_id_to_the_sole_tunnel() {
        let registry = TunnelRegistry::new(true);
        registry.register("only".into(), dummy_record("only", TunnelKind::Http)).unwrap();
        let resolved = registry.resolve_public(Some("whatever")).unwrap();
        assert_eq!(resolved.id, "only");
    }

    #[test]
    fn second_tcp_tunnel_is_rejected_as_conflict() {
        let registry = TunnelRegistry::new(false);
        registry.register("t1".into(), dummy_record("t1", TunnelKind::Tcp)).unwrap();
        let err = registry.register("t2".into(), dummy_record("t2", TunnelKind::Tcp)).unwrap_err();
        assert_eq!(err, RegistryError::TcpConflict);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = TunnelRegistry::new(false);
        registry.register("a".into(), dummy_record("a", TunnelKind::Http)).unwrap();
        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
    }
}
