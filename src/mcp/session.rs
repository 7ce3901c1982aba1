use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::logging::{LogLevel, Logger};
use crate::mcp::lifecycle::RequestTracker;

pub const NOTIFICATION_BUFFER: usize = 64;
pub const ANONYMOUS_SESSION_ID: &str = "anonymous";
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One client connection: its in-flight request namespace and its push channel.
#[derive(Debug)]
pub struct Session {
    id: String,
    tracker: Arc<RequestTracker>,
    notifications: broadcast::Sender<Value>,
    last_seen: Mutex<Instant>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            id: id.into(),
            tracker: Arc::new(RequestTracker::new()),
            notifications,
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Throwaway session for a single request that carries no session id.
    pub fn ephemeral() -> Arc<Self> {
        Arc::new(Self::new(ANONYMOUS_SESSION_ID))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracker(&self) -> &Arc<RequestTracker> {
        &self.tracker
    }

    pub fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// Open event streams and in-flight requests keep a session alive.
    fn is_busy(&self) -> bool {
        self.notifications.receiver_count() > 0 || !self.tracker.is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.notifications.subscribe()
    }

    /// Pushes a server notification. Never blocks; dropped when nobody is listening.
    pub fn notify(&self, method: &str, params: Value) {
        let message = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });

        if self.notifications.send(message).is_err() {
            debug!(session = %self.id, method, "no subscribers for notification");
        }
    }

    /// Sends `notifications/message` when `level` passes the logger threshold.
    pub fn notify_log(&self, logger: &Logger, level: LogLevel, source: &str, data: Value) -> bool {
        if !logger.enabled(level) {
            return false;
        }

        self.notify(
            "notifications/message",
            json!({
                "level": level.mcp_name(),
                "logger": source,
                "data": data,
            }),
        );
        true
    }

    pub fn notify_progress(&self, token: &Value, progress: u64, total: u64, message: &str) {
        self.notify(
            "notifications/progress",
            json!({
                "progressToken": token,
                "progress": progress,
                "total": total,
                "message": message,
            }),
        );
    }

    pub fn close(&self) -> usize {
        self.tracker.cancel_all()
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, Arc<Session>>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session::new(Uuid::new_v4().to_string()));
        self.sessions
            .insert(session.id().to_string(), Arc::clone(&session));
        info!(session = %session.id(), "session opened");
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.get(id).map(|entry| Arc::clone(entry.value()))?;
        session.touch();
        Some(session)
    }

    pub fn close(&self, id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(id) else {
            return false;
        };

        let cancelled = session.close();
        info!(session = %id, cancelled, "session closed");
        true
    }

    /// Closes every session unused for at least `max_idle`. Returns how many were closed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| !entry.is_busy() && entry.idle_for() >= max_idle)
            .map(|entry| entry.key().clone())
            .collect();

        let evicted = expired.iter().filter(|id| self.close(id)).count();
        if evicted > 0 {
            info!(evicted, remaining = self.len(), "idle sessions evicted");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Periodically evicts idle sessions until `shutdown` fires.
pub fn spawn_idle_sweeper(
    sessions: SessionStore,
    max_idle: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL.min(max_idle));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    sessions.evict_idle(max_idle);
                }
            }
        }
        debug!("idle session sweeper stopped");
    })
}
