//! Import session manager.
//!
//! Keeps interactive imports alive between requests. Each session sits
//! behind its own async mutex, so two requests for the same session are
//! served one after the other while different sessions proceed in parallel.
//! Sessions nobody has touched for the configured time-to-live are evicted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use importer_engine::{ImportSession, ImportState};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Shared handle to one session.
pub type SharedSession = Arc<Mutex<ImportSession>>;

/// A retained import.
#[derive(Debug)]
pub struct SessionEntry {
    /// Unique identifier for this session
    pub id: String,
    /// Resource the import writes into
    pub resource: String,
    pub created_at: DateTime<Utc>,
    /// Last registration or lookup
    pub last_active: DateTime<Utc>,
    pub session: SharedSession,
}

/// Listing entry for an open session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub resource: String,
    pub state: ImportState,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Manages open import sessions.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: DashMap<String, SessionEntry>,
}

impl SessionManager {
    /// Create a new session manager.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Create a new session manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Retain a session that is waiting for input.
    ///
    /// Returns the session ID.
    pub fn register(&self, session: ImportSession) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let resource = session.resource().to_string();

        let now = Utc::now();
        let entry = SessionEntry {
            id: id.clone(),
            resource: resource.clone(),
            created_at: now,
            last_active: now,
            session: Arc::new(Mutex::new(session)),
        };
        self.sessions.insert(id.clone(), entry);

        tracing::info!(session_id = %id, resource = %resource, "Import session registered");

        id
    }

    /// Drop a session.
    pub fn unregister(&self, id: &str) {
        if let Some((_, entry)) = self.sessions.remove(id) {
            tracing::info!(session_id = %id, resource = %entry.resource, "Import session closed");
        }
    }

    /// Look a session up and mark it active.
    pub fn get(&self, id: &str) -> Option<SharedSession> {
        self.sessions.get_mut(id).map(|mut entry| {
            entry.last_active = Utc::now();
            entry.session.clone()
        })
    }

    /// Drop every session last active before `cutoff`.
    ///
    /// Returns how many were dropped.
    pub fn evict_inactive_since(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|id, entry| {
            let keep = entry.last_active >= cutoff;
            if !keep {
                tracing::info!(session_id = %id, resource = %entry.resource, "Import session expired");
            }
            keep
        });
        before.saturating_sub(self.sessions.len())
    }

    /// Drop every session idle for longer than `max_idle`.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(max_idle)
            .ok()
            .and_then(|max_idle| Utc::now().checked_sub_signed(max_idle));
        match cutoff {
            Some(cutoff) => self.evict_inactive_since(cutoff),
            None => 0,
        }
    }

    /// Evict idle sessions in the background, checking a few times per
    /// `max_idle`.
    pub fn spawn_reaper(self: Arc<Self>, max_idle: Duration) -> JoinHandle<()> {
        let period = (max_idle / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let evicted = self.evict_idle(max_idle);
                if evicted > 0 {
                    tracing::debug!(evicted, open = self.session_count(), "Evicted idle imports");
                }
            }
        })
    }

    /// Describe every open session, oldest first.
    pub async fn list(&self) -> Vec<SessionInfo> {
        // collect first: no map guard may be held across an await
        let entries: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| {
                (
                    entry.id.clone(),
                    entry.resource.clone(),
                    entry.created_at,
                    entry.last_active,
                    entry.session.clone(),
                )
            })
            .collect();

        let mut infos = Vec::with_capacity(entries.len());
        for (id, resource, created_at, last_active, session) in entries {
            let state = session.lock().await.state();
            infos.push(SessionInfo {
                id,
                resource,
                state,
                created_at,
                last_active,
            });
        }
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    /// Get the number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
